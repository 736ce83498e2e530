pub mod metrics;
pub mod pool;
pub mod shutdown;
