//! Core data types for the price distribution engine.

pub mod currency;
pub mod provider;
pub mod quote;
pub mod symbol;

pub use currency::*;
pub use provider::*;
pub use quote::*;
pub use symbol::*;
