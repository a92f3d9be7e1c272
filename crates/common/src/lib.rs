pub mod config;
pub mod error;
pub mod execution;
pub mod repository;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use execution::ExecutionClient;
pub use repository::{RecordSink, SinkHandle};
pub use types::*;
