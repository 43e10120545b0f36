//! Event types consumed by herald.

pub mod product;

pub use product::ProductCreated;
