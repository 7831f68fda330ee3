pub mod log_feed;
pub mod metrics;

pub use log_feed::*;
pub use metrics::*;
