//! Domain layer - Cache contracts, values and errors

pub mod cache;
pub mod error;

pub use error::DomainError;
