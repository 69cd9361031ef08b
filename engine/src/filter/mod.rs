//! Enhancement filters applied to the absolute-difference signal.
//!
//! [`FilterPipeline`] holds one [`FrameFilter`] per [`FilterKind`] and
//! dispatches on the kind selected for the current cycle. A filter that
//! faults (or panics) never takes the stream down: the cycle falls back to
//! the unfiltered difference.

pub mod edges;
pub mod kernel;
pub mod ratio;
pub mod smoothing;
pub mod traits;
pub mod unsharp;

use schlieren_common::frame::Frame;
use schlieren_common::settings::{FilterKind, FilterSpec};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

pub use traits::{FilterFault, FilterInput, FrameFilter};

/// Result of one pipeline pass.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub frame: Frame,
    /// Set when the selected filter failed and `frame` is the raw difference.
    pub fault: Option<FilterFault>,
}

impl FilterOutcome {
    pub fn is_fallback(&self) -> bool {
        self.fault.is_some()
    }
}

pub struct FilterPipeline {
    filters: HashMap<FilterKind, Box<dyn FrameFilter>>,
}

impl FilterPipeline {
    /// Empty registry. Use [`FilterPipeline::standard`] for the built-in set.
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// All seven built-in filters.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(Box::new(smoothing::GaussianBlur));
        pipeline.register(Box::new(smoothing::MedianFilter));
        pipeline.register(Box::new(smoothing::BilateralFilter));
        pipeline.register(Box::new(edges::SobelEdges));
        pipeline.register(Box::new(edges::LaplacianEdges));
        pipeline.register(Box::new(unsharp::UnsharpMask));
        pipeline.register(Box::new(ratio::Ratio));
        pipeline
    }

    /// Add or replace the filter for its kind.
    pub fn register(&mut self, filter: Box<dyn FrameFilter>) {
        self.filters.insert(filter.kind(), filter);
    }

    pub fn kinds(&self) -> impl Iterator<Item = FilterKind> + '_ {
        self.filters.keys().copied()
    }

    /// Run the selected filter. The parameter is re-clamped into the kind's
    /// domain; any fault yields the unfiltered difference for this cycle only.
    pub fn apply(&self, spec: FilterSpec, input: &FilterInput<'_>) -> FilterOutcome {
        let spec = FilterSpec::new(spec.kind(), spec.param());
        match self.run(&spec, input) {
            Ok(frame) => FilterOutcome { frame, fault: None },
            Err(fault) => {
                warn!(
                    filter = spec.kind().name(),
                    param = spec.param(),
                    error = %fault,
                    "filter failed, passing the difference through"
                );
                FilterOutcome {
                    frame: input.diff.clone(),
                    fault: Some(fault),
                }
            }
        }
    }

    fn run(&self, spec: &FilterSpec, input: &FilterInput<'_>) -> Result<Frame, FilterFault> {
        let filter = self
            .filters
            .get(&spec.kind())
            .ok_or(FilterFault::Unregistered(spec.kind()))?;

        let frame = panic::catch_unwind(AssertUnwindSafe(|| filter.apply(input, spec)))
            .map_err(|payload| FilterFault::Panicked {
                filter: filter.name(),
                message: panic_message(payload.as_ref()),
            })??;

        if !frame.same_dimensions(input.diff) {
            return Err(FilterFault::Input {
                filter: filter.name(),
                reason: format!(
                    "output {:?} does not match input {:?}",
                    frame.dimensions(),
                    input.diff.dimensions()
                ),
            });
        }
        Ok(frame)
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
