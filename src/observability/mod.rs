pub mod logging;
pub mod metrics;
pub mod health;

pub use logging::{init_logging, LogConfig, LogFormat, mask_sensitive};
pub use metrics::{init_metrics, get_metrics, Metrics, LatencyTimer, METRICS, INTERNAL_INCONSISTENCY_TOTAL};
pub use health::{HealthChecker, HealthStatus, DependencyHealth, AggregatedHealth, KafkaHealth};
