//! Services module for reconciliation-service.

pub mod channel_source;
pub mod database;
pub mod matching;
pub mod metrics;
pub mod orchestrator;
pub mod platform_source;
pub mod report;
pub mod scheduler;
pub mod store;

pub use channel_source::{ChannelSource, HttpChannelSource};
pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{ReconciliationService, TaskDetails};
pub use platform_source::{HttpPlatformSource, PlatformSource};
pub use report::{FileReportGenerator, ReportGenerator};
pub use scheduler::DailyScheduler;
pub use store::ReconciliationStore;
