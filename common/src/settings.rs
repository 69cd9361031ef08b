//! Runtime-adjustable processing settings and the thread-safe handoff used
//! between the control path and the processing worker.
//!
//! The worker reads one [`Settings`] snapshot at the start of every cycle.
//! Writers go through [`SettingsHandle`], which clamps every value into its
//! declared domain and reports what was adjusted instead of failing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

pub const GAIN_MIN: f64 = 0.1;
pub const GAIN_MAX: f64 = 100.0;
pub const DEFAULT_ALPHA: f64 = 0.5;

// =============================================================================
// Filter kinds
// =============================================================================

/// The enhancement filters that can be applied to the difference signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    GaussianBlur,
    MedianFilter,
    BilateralFilter,
    SobelEdges,
    LaplacianEdges,
    UnsharpMask,
    Ratio,
}

impl FilterKind {
    pub const ALL: [FilterKind; 7] = [
        FilterKind::GaussianBlur,
        FilterKind::MedianFilter,
        FilterKind::BilateralFilter,
        FilterKind::SobelEdges,
        FilterKind::LaplacianEdges,
        FilterKind::UnsharpMask,
        FilterKind::Ratio,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FilterKind::GaussianBlur => "gaussian_blur",
            FilterKind::MedianFilter => "median_filter",
            FilterKind::BilateralFilter => "bilateral_filter",
            FilterKind::SobelEdges => "sobel_edges",
            FilterKind::LaplacianEdges => "laplacian_edges",
            FilterKind::UnsharpMask => "unsharp_mask",
            FilterKind::Ratio => "ratio",
        }
    }

    /// Declared parameter domain for this filter.
    pub fn domain(self) -> ParamDomain {
        match self {
            FilterKind::GaussianBlur | FilterKind::MedianFilter => ParamDomain::odd(1.0, 21.0),
            FilterKind::BilateralFilter => ParamDomain::range(1.0, 100.0),
            FilterKind::SobelEdges | FilterKind::LaplacianEdges => ParamDomain::odd(1.0, 7.0),
            FilterKind::UnsharpMask => ParamDomain::range(0.0, 100.0),
            FilterKind::Ratio => ParamDomain::range(1.0, 100.0),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = normalize(s);
        let kind = match norm.as_str() {
            "gaussian_blur" | "gaussian" | "blur" => FilterKind::GaussianBlur,
            "median_filter" | "median" => FilterKind::MedianFilter,
            "bilateral_filter" | "bilateral" => FilterKind::BilateralFilter,
            "sobel_edges" | "sobel" => FilterKind::SobelEdges,
            "laplacian_edges" | "laplacian" => FilterKind::LaplacianEdges,
            "unsharp_mask" | "unsharp_masking" | "unsharp" => FilterKind::UnsharpMask,
            "ratio" => FilterKind::Ratio,
            _ => return Err(UnknownName::new("filter", s)),
        };
        Ok(kind)
    }
}

/// Valid range of a filter's scalar parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamDomain {
    pub min: f64,
    pub max: f64,
    /// Kernel-size parameters are truncated to an integer and forced odd.
    pub odd: bool,
}

impl ParamDomain {
    pub const fn range(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            odd: false,
        }
    }

    pub const fn odd(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            odd: true,
        }
    }

    /// Clamp `value` into the domain. Non-finite input maps to `min`.
    /// Odd domains truncate, then round even values up to the next odd integer.
    pub fn clamp(&self, value: f64) -> f64 {
        let v = if value.is_finite() { value } else { self.min };
        let v = v.clamp(self.min, self.max);
        if !self.odd {
            return v;
        }
        let k = (v.trunc() as i64).max(1) | 1;
        (k as f64).min(self.max)
    }
}

/// A filter selection with its parameter, always held clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    kind: FilterKind,
    param: f64,
}

impl FilterSpec {
    pub fn new(kind: FilterKind, param: f64) -> Self {
        Self {
            kind,
            param: kind.domain().clamp(param),
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn param(&self) -> f64 {
        self.param
    }

    /// Parameter as an odd kernel size ≥ 1 (meaningful for kernel-size filters).
    pub fn kernel_size(&self) -> usize {
        (self.param.trunc() as usize).max(1) | 1
    }
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self::new(FilterKind::GaussianBlur, 5.0)
    }
}

// =============================================================================
// Colormaps, reference policy, crop
// =============================================================================

/// Pseudo-color lookup applied by the compositor. `None` keeps grayscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Colormap {
    #[default]
    None,
    Jet,
    Hot,
    Bone,
    Viridis,
    Inferno,
    Turbo,
}

impl Colormap {
    pub const ALL: [Colormap; 7] = [
        Colormap::None,
        Colormap::Jet,
        Colormap::Hot,
        Colormap::Bone,
        Colormap::Viridis,
        Colormap::Inferno,
        Colormap::Turbo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Colormap::None => "none",
            Colormap::Jet => "jet",
            Colormap::Hot => "hot",
            Colormap::Bone => "bone",
            Colormap::Viridis => "viridis",
            Colormap::Inferno => "inferno",
            Colormap::Turbo => "turbo",
        }
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Colormap {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = normalize(s);
        Colormap::ALL
            .into_iter()
            .find(|c| c.name() == norm || (norm == "gray" && *c == Colormap::None))
            .ok_or_else(|| UnknownName::new("colormap", s))
    }
}

/// How the reference is refreshed when an update is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// `alpha * current + (1 - alpha) * previous`.
    #[default]
    Blend,
    /// The current frame becomes the reference.
    Replace,
}

impl FromStr for UpdatePolicy {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "blend" => Ok(UpdatePolicy::Blend),
            "replace" => Ok(UpdatePolicy::Replace),
            _ => Err(UnknownName::new("update policy", s)),
        }
    }
}

/// When the reference is refreshed. Built from the signed interval so that
/// `0` and negative values are an explicit frozen mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSchedule {
    Frozen,
    Every(NonZeroU64),
}

impl UpdateSchedule {
    pub fn from_interval(interval: i64) -> Self {
        u64::try_from(interval)
            .ok()
            .and_then(NonZeroU64::new)
            .map_or(UpdateSchedule::Frozen, UpdateSchedule::Every)
    }

    /// True when frame number `index` (counted since the reference was seeded) is due.
    pub fn is_due(&self, index: u64) -> bool {
        match self {
            UpdateSchedule::Frozen => false,
            UpdateSchedule::Every(n) => index % n.get() == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSettings {
    pub update_interval: i64,
    pub alpha: f64,
    pub policy: UpdatePolicy,
}

impl ReferenceSettings {
    pub fn schedule(&self) -> UpdateSchedule {
        UpdateSchedule::from_interval(self.update_interval)
    }
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            update_interval: 0,
            alpha: DEFAULT_ALPHA,
            policy: UpdatePolicy::Blend,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorSettings {
    pub gain: f64,
    pub colormap: Colormap,
    pub crop: Option<CropRegion>,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            gain: 1.0,
            colormap: Colormap::None,
            crop: None,
        }
    }
}

/// Everything the worker needs for one cycle. Cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Settings {
    pub filter: FilterSpec,
    pub reference: ReferenceSettings,
    pub compositor: CompositorSettings,
}

impl Settings {
    /// Clamp every field into its domain, collecting what had to change.
    pub fn sanitized(mut self) -> (Self, Vec<Adjustment>) {
        let mut adjustments = Vec::new();
        let requested = self.filter.param;
        self.filter = FilterSpec::new(self.filter.kind, requested);
        adjustments.extend(Adjustment::check("param", requested, self.filter.param));

        let gain = clamp_gain(self.compositor.gain);
        adjustments.extend(Adjustment::check("gain", self.compositor.gain, gain));
        self.compositor.gain = gain;

        let alpha = clamp_alpha(self.reference.alpha);
        adjustments.extend(Adjustment::check("alpha", self.reference.alpha, alpha));
        self.reference.alpha = alpha;

        let interval = self.reference.update_interval.max(0);
        adjustments.extend(Adjustment::check(
            "update_interval",
            self.reference.update_interval as f64,
            interval as f64,
        ));
        self.reference.update_interval = interval;

        if matches!(self.compositor.crop, Some(c) if c.width == 0 || c.height == 0) {
            self.compositor.crop = None;
        }
        (self, adjustments)
    }
}

fn clamp_gain(gain: f64) -> f64 {
    if gain.is_finite() {
        gain.clamp(GAIN_MIN, GAIN_MAX)
    } else {
        1.0
    }
}

fn clamp_alpha(alpha: f64) -> f64 {
    if alpha.is_finite() {
        alpha.clamp(0.0, 1.0)
    } else {
        DEFAULT_ALPHA
    }
}

// =============================================================================
// Adjustment reporting
// =============================================================================

/// A value that was moved into its domain on the way in.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub field: &'static str,
    pub requested: f64,
    pub applied: f64,
}

impl Adjustment {
    fn check(field: &'static str, requested: f64, applied: f64) -> Option<Self> {
        (requested != applied).then_some(Self {
            field,
            requested,
            applied,
        })
    }
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} out of range, using {}",
            self.field, self.requested, self.applied
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what} '{name}'")]
pub struct UnknownName {
    pub what: &'static str,
    pub name: String,
}

impl UnknownName {
    fn new(what: &'static str, name: &str) -> Self {
        Self {
            what,
            name: name.to_string(),
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

// =============================================================================
// Handoff
// =============================================================================

/// Shared writer side of the settings snapshot. Clone freely; every clone
/// writes to the same snapshot.
#[derive(Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Settings>>,
}

impl SettingsHandle {
    pub fn new(initial: Settings) -> Self {
        let (settings, _) = initial.sanitized();
        let (tx, _rx) = watch::channel(settings);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Settings {
        *self.tx.borrow()
    }

    /// Switch filter kind, re-clamping the current parameter into the new domain.
    pub fn set_filter(&self, kind: FilterKind) -> Option<Adjustment> {
        let mut adjustment = None;
        self.tx.send_modify(|s| {
            let requested = s.filter.param;
            s.filter = FilterSpec::new(kind, requested);
            adjustment = Adjustment::check("param", requested, s.filter.param);
        });
        adjustment
    }

    pub fn set_param(&self, param: f64) -> Option<Adjustment> {
        let mut adjustment = None;
        self.tx.send_modify(|s| {
            s.filter = FilterSpec::new(s.filter.kind, param);
            adjustment = Adjustment::check("param", param, s.filter.param);
        });
        adjustment
    }

    pub fn set_gain(&self, gain: f64) -> Option<Adjustment> {
        let applied = clamp_gain(gain);
        self.tx.send_modify(|s| s.compositor.gain = applied);
        Adjustment::check("gain", gain, applied)
    }

    pub fn set_colormap(&self, colormap: Colormap) {
        self.tx.send_modify(|s| s.compositor.colormap = colormap);
    }

    pub fn set_crop(&self, crop: Option<CropRegion>) {
        let crop = crop.filter(|c| c.width > 0 && c.height > 0);
        self.tx.send_modify(|s| s.compositor.crop = crop);
    }

    /// `0` (or a negative request, reported as adjusted) freezes the reference.
    pub fn set_update_interval(&self, interval: i64) -> Option<Adjustment> {
        let applied = interval.max(0);
        self.tx.send_modify(|s| s.reference.update_interval = applied);
        Adjustment::check("update_interval", interval as f64, applied as f64)
    }

    pub fn set_alpha(&self, alpha: f64) -> Option<Adjustment> {
        let applied = clamp_alpha(alpha);
        self.tx.send_modify(|s| s.reference.alpha = applied);
        Adjustment::check("alpha", alpha, applied)
    }

    pub fn set_policy(&self, policy: UpdatePolicy) {
        self.tx.send_modify(|s| s.reference.policy = policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_domains_force_odd() {
        let domain = FilterKind::MedianFilter.domain();
        assert_eq!(domain.clamp(0.0), 1.0);
        assert_eq!(domain.clamp(4.0), 5.0);
        assert_eq!(domain.clamp(4.9), 5.0);
        assert_eq!(domain.clamp(7.0), 7.0);
        assert_eq!(domain.clamp(40.0), 21.0);
        assert_eq!(domain.clamp(f64::NAN), 1.0);
    }

    #[test]
    fn every_kernel_size_is_odd_and_positive() {
        for kind in [FilterKind::GaussianBlur, FilterKind::MedianFilter] {
            for p in -3..30 {
                let k = FilterSpec::new(kind, p as f64).kernel_size();
                assert!(k >= 1 && k % 2 == 1, "{kind} param {p} gave kernel {k}");
                assert!(k <= 21);
            }
        }
    }

    #[test]
    fn edge_kernels_capped_at_seven() {
        assert_eq!(FilterSpec::new(FilterKind::SobelEdges, 8.0).kernel_size(), 7);
        assert_eq!(FilterSpec::new(FilterKind::LaplacianEdges, 6.0).kernel_size(), 7);
        assert_eq!(FilterSpec::new(FilterKind::LaplacianEdges, 2.0).kernel_size(), 3);
    }

    #[test]
    fn continuous_domains_clamp_without_rounding() {
        assert_eq!(FilterKind::UnsharpMask.domain().clamp(-5.0), 0.0);
        assert_eq!(FilterKind::Ratio.domain().clamp(2.5), 2.5);
        assert_eq!(FilterKind::BilateralFilter.domain().clamp(500.0), 100.0);
    }

    #[test]
    fn parses_filter_aliases() {
        assert_eq!("Gaussian Blur".parse::<FilterKind>().unwrap(), FilterKind::GaussianBlur);
        assert_eq!("unsharp-masking".parse::<FilterKind>().unwrap(), FilterKind::UnsharpMask);
        assert_eq!("SOBEL".parse::<FilterKind>().unwrap(), FilterKind::SobelEdges);
        assert!("fft".parse::<FilterKind>().is_err());
    }

    #[test]
    fn parses_colormaps() {
        assert_eq!("JET".parse::<Colormap>().unwrap(), Colormap::Jet);
        assert_eq!("None".parse::<Colormap>().unwrap(), Colormap::None);
        assert!("rainbow".parse::<Colormap>().is_err());
    }

    #[test]
    fn zero_and_negative_intervals_freeze() {
        assert_eq!(UpdateSchedule::from_interval(0), UpdateSchedule::Frozen);
        assert_eq!(UpdateSchedule::from_interval(-4), UpdateSchedule::Frozen);
        assert!(!UpdateSchedule::Frozen.is_due(0));
        let every3 = UpdateSchedule::from_interval(3);
        assert!(every3.is_due(3));
        assert!(!every3.is_due(4));
    }

    #[test]
    fn handle_clamps_and_reports() {
        let handle = SettingsHandle::new(Settings::default());
        let adj = handle.set_gain(500.0).expect("gain should be clamped");
        assert_eq!(adj.applied, GAIN_MAX);
        assert!(adj.to_string().contains("gain"));
        assert_eq!(handle.snapshot().compositor.gain, GAIN_MAX);

        assert!(handle.set_gain(2.0).is_none());
        assert!(handle.set_update_interval(-1).is_some());
        assert_eq!(handle.snapshot().reference.update_interval, 0);
    }

    #[test]
    fn switching_filter_reclamps_param() {
        let handle = SettingsHandle::new(Settings::default());
        handle.set_filter(FilterKind::BilateralFilter);
        handle.set_param(80.0);
        let adj = handle.set_filter(FilterKind::SobelEdges).unwrap();
        assert_eq!(adj.applied, 7.0);
        assert_eq!(handle.snapshot().filter.kind(), FilterKind::SobelEdges);
    }

    #[test]
    fn subscribers_see_latest_snapshot() {
        let handle = SettingsHandle::new(Settings::default());
        let rx = handle.subscribe();
        handle.set_colormap(Colormap::Inferno);
        assert_eq!(rx.borrow().compositor.colormap, Colormap::Inferno);
    }

    #[test]
    fn sanitized_drops_empty_crop() {
        let mut settings = Settings::default();
        settings.compositor.crop = Some(CropRegion { width: 0, height: 10 });
        let (clean, _) = settings.sanitized();
        assert!(clean.compositor.crop.is_none());
    }
}
