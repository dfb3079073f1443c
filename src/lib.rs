pub mod chain;
pub mod config;
pub mod error;
pub mod facilitators;
pub mod pagination;
pub mod provider;
pub mod query;
pub mod repository;
pub mod sync;
pub mod watermark;

pub use chain::Chain;
pub use error::{ConfigError, FetchError, StoreError, SyncError};
pub use provider::Provider;
