use facegate_common::{AttendanceEventType, WorkStatus};
use serde::{Deserialize, Serialize};

use super::tripwire::CrossingDirection;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkTransition {
    EnterWorkArea,
    ExitWorkArea,
}

impl WorkTransition {
    pub fn event_type(&self) -> AttendanceEventType {
        match self {
            Self::EnterWorkArea => AttendanceEventType::CheckIn,
            Self::ExitWorkArea => AttendanceEventType::CheckOut,
        }
    }

    pub fn work_status(&self) -> WorkStatus {
        match self {
            Self::EnterWorkArea => WorkStatus::Working,
            Self::ExitWorkArea => WorkStatus::OnBreak,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StatusRule {
    pub camera_id: u32,
    pub direction: CrossingDirection,
    pub transition: WorkTransition,
}

/// Maps a crossing on a camera to a work-status transition. Cameras face
/// the work area from different sides, so the same physical direction can
/// mean entry on one camera and exit on another.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(transparent)]
pub struct StatusRuleTable {
    rules: Vec<StatusRule>,
}

impl StatusRuleTable {
    pub fn new(rules: Vec<StatusRule>) -> Self {
        Self { rules }
    }

    pub fn lookup(&self, camera_id: u32, direction: CrossingDirection) -> Option<WorkTransition> {
        self.rules
            .iter()
            .find(|rule| rule.camera_id == camera_id && rule.direction == direction)
            .map(|rule| rule.transition)
    }

    pub fn rules(&self) -> &[StatusRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for StatusRuleTable {
    /// Two opposing cameras: camera 0 enters left-to-right and top-to-bottom,
    /// camera 1 the reverse.
    fn default() -> Self {
        use CrossingDirection::*;
        use WorkTransition::*;

        let rule = |camera_id, direction, transition| StatusRule {
            camera_id,
            direction,
            transition,
        };
        Self::new(vec![
            rule(0, LeftToRight, EnterWorkArea),
            rule(0, RightToLeft, ExitWorkArea),
            rule(0, TopToBottom, EnterWorkArea),
            rule(0, BottomToTop, ExitWorkArea),
            rule(1, RightToLeft, EnterWorkArea),
            rule(1, LeftToRight, ExitWorkArea),
            rule(1, BottomToTop, EnterWorkArea),
            rule(1, TopToBottom, ExitWorkArea),
        ])
    }
}
