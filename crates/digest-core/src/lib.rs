pub mod clock;
pub mod config;
pub mod scheduler;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use scheduler::{DailyScheduler, ScheduledJob, SchedulerError, SchedulerHandle};
pub use types::ChatEvent;
