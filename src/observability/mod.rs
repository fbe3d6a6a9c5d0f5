pub mod health;
pub mod logging;

pub use health::{HealthChecker, UpstreamStatus};
pub use logging::init_logging;
