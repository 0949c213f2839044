//! # Domain Module
//!
//! Core domain types for the sharding layer.

pub mod entities;
pub mod errors;
pub mod invariants;
pub mod query;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use invariants::*;
pub use query::*;
pub use value_objects::*;
