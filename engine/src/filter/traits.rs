use schlieren_common::frame::Frame;
use schlieren_common::settings::{FilterKind, FilterSpec};

/// Everything a filter may look at for one cycle. All three frames are
/// single-channel and share dimensions.
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    /// `|current - background|`.
    pub diff: &'a Frame,
    pub current: &'a Frame,
    pub background: &'a Frame,
}

/// One enhancement algorithm over the difference signal.
///
/// Implementations are pure: the same input and parameter always produce
/// the same frame. `spec.param()` has already been clamped into the
/// kind's domain.
pub trait FrameFilter: Send + Sync {
    fn kind(&self) -> FilterKind;

    fn apply(&self, input: &FilterInput<'_>, spec: &FilterSpec) -> Result<Frame, FilterFault>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str {
        self.kind().name()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterFault {
    #[error("{filter} produced a non-finite value")]
    NonFinite { filter: &'static str },
    #[error("{filter} received mismatched inputs: {reason}")]
    Input { filter: &'static str, reason: String },
    #[error("{filter} panicked: {message}")]
    Panicked { filter: &'static str, message: String },
    #[error("no filter registered for {0}")]
    Unregistered(FilterKind),
}
