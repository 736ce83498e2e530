use facegate_common::AttendanceEvent;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::AttendanceSink;
use crate::error::Result;
use crate::storage::{AttendanceRecord, Store, FACE_RECOGNITION_SOURCE};
use crate::utils::metrics::Metrics;

/// Records attendance events in the store and forwards them to an optional
/// external sink on a background task.
pub struct EventNotifier {
    store: Arc<dyn Store>,
    sink: Option<(Arc<dyn AttendanceSink>, Handle)>,
    metrics: Arc<Metrics>,
}

impl EventNotifier {
    pub fn new(
        store: Arc<dyn Store>,
        sink: Option<(Arc<dyn AttendanceSink>, Handle)>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { store, sink, metrics }
    }

    /// Persists `event` synchronously, then schedules the external push.
    /// Returns the handle of the push task, if one was started. An identity
    /// unknown to the store is logged and not forwarded.
    pub fn notify(&self, event: AttendanceEvent) -> Result<Option<JoinHandle<()>>> {
        let Some(user) = self.store.find_user(&event.identity)? else {
            error!(
                identity = %event.identity,
                camera_id = event.camera_id,
                "Crossing for an identity missing from the store, event not recorded"
            );
            return Ok(None);
        };

        self.store.append_attendance(AttendanceRecord {
            user_id: user.user_id,
            identity: event.identity.clone(),
            event_type: event.event_type,
            camera_id: event.camera_id,
            tripwire: event.tripwire.clone(),
            timestamp: event.timestamp,
            source: FACE_RECOGNITION_SOURCE.to_string(),
        })?;
        self.metrics
            .record_attendance_event(event.camera_id, event.event_type.as_str());
        info!(
            identity = %event.identity,
            name = %user.name,
            camera_id = event.camera_id,
            event = event.event_type.as_str(),
            "Attendance recorded"
        );

        let Some((sink, runtime)) = &self.sink else {
            return Ok(None);
        };
        let sink = Arc::clone(sink);
        let metrics = Arc::clone(&self.metrics);
        Ok(Some(runtime.spawn(async move {
            if let Err(e) = sink.forward(&event).await {
                error!(identity = %event.identity, "Failed to forward attendance event: {}", e);
                metrics.record_api_failure();
            }
        })))
    }
}
