pub mod config;
pub mod error;

pub use config::{AdapterConfig, AdapterEntry, AdapterKind, CourierConfig};
pub use error::{CourierError, Result};
