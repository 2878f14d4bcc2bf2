//! Wallet Common Types
//!
//! This crate contains the types shared by the ledger engine, its stores and
//! the command line front end: identifiers, fixed-point amounts, errors and
//! time helpers.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
