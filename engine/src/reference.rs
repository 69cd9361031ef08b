use schlieren_common::frame::{Frame, Layout};
use schlieren_common::settings::{ReferenceSettings, UpdatePolicy};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePhase {
    /// Nothing seen since start or the last reset; differencing is skipped.
    NoReference,
    /// Seeded from the first frame, never updated since.
    SingleReference,
    /// Updated at least once by the configured policy.
    BlendedReference,
}

/// What [`ReferenceModel::observe`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The frame became the reference; there is nothing to difference against.
    Seeded,
    /// The reference was refreshed from this frame before differencing.
    Updated,
    Unchanged,
}

/// Evolving grayscale background estimate for one streaming session.
///
/// Owned exclusively by the processing worker. `frame_index` counts frames
/// since the reference was seeded, so the seeding frame is index 0.
#[derive(Debug, Default)]
pub struct ReferenceModel {
    reference: Option<Frame>,
    previous: Option<Frame>,
    frame_index: u64,
    updates: u64,
}

impl ReferenceModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ReferencePhase {
        match (&self.reference, self.updates) {
            (None, _) => ReferencePhase::NoReference,
            (Some(_), 0) => ReferencePhase::SingleReference,
            (Some(_), _) => ReferencePhase::BlendedReference,
        }
    }

    pub fn reference(&self) -> Option<&Frame> {
        self.reference.as_ref()
    }

    /// The reference as it was before the most recent update.
    pub fn previous(&self) -> Option<&Frame> {
        self.previous.as_ref()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Clear everything. Called whenever the source reconnects.
    pub fn reset(&mut self) {
        if self.reference.is_some() {
            debug!(frames = self.frame_index, updates = self.updates, "reference reset");
        }
        *self = Self::default();
    }

    /// Feed the grayscale version of the current frame.
    ///
    /// Seeds the reference on the first frame (or when the stream changes
    /// resolution), otherwise advances the frame index and applies the
    /// update policy when the schedule is due.
    pub fn observe(&mut self, gray: &Frame, settings: &ReferenceSettings) -> Observation {
        let seed = match &self.reference {
            None => true,
            Some(reference) => !reference.same_dimensions(gray),
        };
        if seed {
            if self.reference.is_some() {
                debug!(
                    width = gray.width(),
                    height = gray.height(),
                    "stream resolution changed, reseeding reference"
                );
            }
            *self = Self {
                reference: Some(gray.clone()),
                ..Self::default()
            };
            return Observation::Seeded;
        }

        self.frame_index += 1;
        if !settings.schedule().is_due(self.frame_index) {
            return Observation::Unchanged;
        }

        let Some(previous) = self.reference.take() else {
            return Observation::Unchanged;
        };
        let next = match settings.policy {
            UpdatePolicy::Replace => gray.clone(),
            UpdatePolicy::Blend => blend(gray, &previous, settings.alpha),
        };
        self.previous = Some(previous);
        self.reference = Some(next);
        self.updates += 1;
        Observation::Updated
    }
}

/// Per-pixel `alpha * current + (1 - alpha) * previous`, rounded.
///
/// `alpha` is clamped to `[0, 1]`: `1` replaces, `0` keeps `previous`.
/// Both frames must be single-channel and the same size; a mismatch
/// yields `current` unchanged.
pub fn blend(current: &Frame, previous: &Frame, alpha: f64) -> Frame {
    if !current.same_dimensions(previous)
        || current.layout() != Layout::Gray
        || previous.layout() != Layout::Gray
    {
        return current.clone();
    }
    let alpha = if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 0.5 };
    Frame::from_fn_gray(current.width(), current.height(), |x, y| {
        let (c, p) = (current.sample(x, y, 0), previous.sample(x, y, 0));
        let v = alpha * c as f64 + (1.0 - alpha) * p as f64;
        v.round().clamp(0.0, 255.0) as u8
    })
}
