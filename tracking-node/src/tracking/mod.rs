pub mod kalman;
pub mod rules;
pub mod tripwire;

pub use kalman::{ConstantVelocityFilter, PositionSmoother};
pub use rules::{StatusRule, StatusRuleTable, WorkTransition};
pub use tripwire::{Crossing, CrossingDirection, CrossingZone, TripwireMonitor};
