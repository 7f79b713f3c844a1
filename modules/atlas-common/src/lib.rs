pub mod config;
pub mod error;
pub mod types;

pub use config::ReconConfig;
pub use error::AtlasError;
pub use types::*;
