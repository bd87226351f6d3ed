pub mod config;
pub mod error;
pub mod types;

pub use config::{DeploySection, KeelConfig};
pub use error::ValidationError;
pub use types::*;
