pub mod apis;
pub mod common;
pub mod config;
pub mod infra;
pub mod observability;
pub mod pipeline;
pub mod server;

pub use common::{PipelineError, Result};
