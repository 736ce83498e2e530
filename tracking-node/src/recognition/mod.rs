pub mod cache;
pub mod index;
pub mod quality;
pub mod registry;
pub mod resolver;
pub mod temporal;

pub use cache::ResolutionCache;
pub use index::{FlatIpIndex, IdentityIndex};
pub use quality::QualityGate;
pub use registry::{IdentityRecord, IdentityRegistry};
pub use resolver::IdentityResolver;
pub use temporal::TemporalVoter;

/// Label reported for faces that match no enrolled identity.
pub const UNKNOWN_IDENTITY: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub identity: String,
    pub score: f32,
}

impl Resolution {
    pub fn new(identity: impl Into<String>, score: f32) -> Self {
        Self {
            identity: identity.into(),
            score,
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_IDENTITY, 0.0)
    }

    pub fn is_unknown(&self) -> bool {
        self.identity == UNKNOWN_IDENTITY
    }
}
