pub mod queue;
pub mod worker;

pub use queue::{PendingEmbeddingUpdate, PopResult, PushError, UpdateQueue};
pub use worker::{rebuild_index, EmbeddingMaintenanceWorker, MaintenanceSettings};
