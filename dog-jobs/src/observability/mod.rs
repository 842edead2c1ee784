pub mod stats;

#[cfg(feature = "tracing-basic")]
pub mod tracing;

pub use stats::{JobStats, JobTypeStats, StatsSnapshot};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
