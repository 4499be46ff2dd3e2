//! Value generation for mockalchemy collections.
//!
//! Defines the `ValueGenerator` port consumed by the collection stores, a
//! faker-backed implementation and the foreign-key pools that keep generated
//! references pointing at records that actually exist.

pub mod catalog;
pub mod errors;
pub mod faker;
pub mod foreign;
pub mod generator;

pub use errors::GenerationError;
pub use faker::{FakerGenerator, OPTIONAL_OMIT_RATE};
pub use foreign::{FkPools, KeyIndex, enforce_pools};
pub use generator::{GenerateRequest, ValueGenerator};
