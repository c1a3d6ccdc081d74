// Observability: metrics and logging

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{heartbeat, init as init_metrics};
