use async_trait::async_trait;
use facegate_common::AttendanceEvent;

use crate::error::Result;

pub mod attendance_api;
pub mod notifier;

pub use attendance_api::AttendanceApiClient;
pub use notifier::EventNotifier;

/// Destination for attendance events beyond the local store, such as an
/// HR system. Failures are reported to the caller, which logs them.
#[async_trait]
pub trait AttendanceSink: Send + Sync {
    async fn forward(&self, event: &AttendanceEvent) -> Result<()>;
}
