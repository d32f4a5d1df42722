//! Dynamic-deflection policy: a pure function from swept-solid metadata to
//! a pair of tessellation tolerances, independent of the decimation kernel
//! in [`crate::simplify`]. Given a profile's cross-section, a sweep length
//! and the caller's default tolerances, it returns tolerances that may only
//! coarsen — never refine below what the caller already asked for.
//!
//! Unlike the simplifier, this half is reentrant: [`DeflectionPolicy`] holds
//! only a pair of keyed caches behind `RwLock`, safe for concurrent read
//! from multiple tessellation workers sharing one policy instance.

use std::sync::RwLock;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts;

/// Opaque id of a curve entity, used only to key the two caches. The
/// policy never dereferences it; callers hand back the same id for the
/// same curve so cached length/bounds can be reused.
pub type CurveId = u64;

/// The cross section of a swept profile, closed enough to cover the
/// shapes spec §4.5 enumerates, plus an arbitrary closed curve for
/// everything else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProfileKind {
    Rectangle { x_dim: f64, y_dim: f64 },
    Circle { radius: f64 },
    Ellipse { semi_major: f64, semi_minor: f64 },
    /// I, L, T, U and C-shaped rolled sections all reduce to the same pair:
    /// overall (flange) width and overall depth.
    RolledSection { overall_width: f64, depth: f64 },
    SweptDisk { radius: f64 },
    /// An arbitrary closed curve, identified by id so its bounding box can
    /// be computed once and cached rather than re-walked on every query.
    ArbitraryClosedCurve { curve_id: CurveId },
}

/// How a profile is carried along its directrix. Determines how the sweep
/// length is derived in step 2 of the procedure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SweepKind {
    Extrusion {
        depth: f64,
    },
    /// A profile swept along an arbitrary curve; `trim_span` is the
    /// absolute trim-parameter range over which it's swept.
    CurveSweep {
        trim_span: f64,
    },
    /// A profile swept along a fixed reference curve (same trim-span
    /// semantics as [`SweepKind::CurveSweep`], kept distinct since the two
    /// are classified separately upstream).
    FixedReferenceSweep {
        trim_span: f64,
    },
    Revolution {
        /// Perpendicular distance from the profile origin to the axis of
        /// revolution.
        radius: f64,
        angle_radians: f64,
    },
    /// A swept disk: either an explicit parameter span, or `None` to fall
    /// back to the cached directrix arc length.
    SweptDisk {
        curve_id: CurveId,
        param_span: Option<f64>,
    },
}

/// One scattered sample of the target-facet-count surface: at section
/// width `min_dim_mm` and `slenderness`, the recommended facet count is
/// `facets`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub min_dim_mm: f64,
    pub slenderness: f64,
    pub facets: f64,
}

/// A scattered lattice of [`ControlPoint`]s queried by bilinear
/// interpolation over (section width, slenderness), falling back to
/// nearest-neighbour when the query point can't be bracketed on both axes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlPointLattice {
    points: Vec<ControlPoint>,
}

impl ControlPointLattice {
    pub fn new(points: Vec<ControlPoint>) -> Self {
        Self { points }
    }

    /// Target facet count at `(min_dim_mm, slenderness)`: the bilinear
    /// interpolation of the bracketing four corners when both axes have at
    /// least two distinct values and all four corners are present;
    /// otherwise the Euclidean-nearest control point; [`consts::EMPTY_LATTICE_FACET_COUNT`]
    /// when the lattice has no points at all.
    pub fn query(&self, min_dim_mm: f64, slenderness: f64) -> f64 {
        if self.points.is_empty() {
            return consts::EMPTY_LATTICE_FACET_COUNT;
        }
        self.bilinear(min_dim_mm, slenderness)
            .unwrap_or_else(|| self.nearest(min_dim_mm, slenderness))
    }

    fn bilinear(&self, x: f64, y: f64) -> Option<f64> {
        let xs = sorted_distinct(self.points.iter().map(|p| p.min_dim_mm));
        let ys = sorted_distinct(self.points.iter().map(|p| p.slenderness));

        let (x1, x2) = bracket(&xs, x)?;
        let (y1, y2) = bracket(&ys, y)?;

        let lookup = |px: f64, py: f64| -> Option<f64> {
            self.points
                .iter()
                .find(|p| {
                    (p.min_dim_mm - px).abs() < consts::CONTROL_POINT_EQUALITY
                        && (p.slenderness - py).abs() < consts::CONTROL_POINT_EQUALITY
                })
                .map(|p| p.facets)
        };

        let q11 = lookup(x1, y1)?;
        let q21 = lookup(x2, y1)?;
        let q12 = lookup(x1, y2)?;
        let q22 = lookup(x2, y2)?;

        let tx = if (x2 - x1).abs() < consts::CONTROL_POINT_EQUALITY {
            0.0
        } else {
            (x - x1) / (x2 - x1)
        };
        let ty = if (y2 - y1).abs() < consts::CONTROL_POINT_EQUALITY {
            0.0
        } else {
            (y - y1) / (y2 - y1)
        };

        let top = q11 + (q21 - q11) * tx;
        let bottom = q12 + (q22 - q12) * tx;
        Some(top + (bottom - top) * ty)
    }

    fn nearest(&self, x: f64, y: f64) -> f64 {
        self.points
            .iter()
            .min_by(|a, b| {
                let da = (a.min_dim_mm - x).powi(2) + (a.slenderness - y).powi(2);
                let db = (b.min_dim_mm - x).powi(2) + (b.slenderness - y).powi(2);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| p.facets)
            .expect("checked non-empty above")
    }
}

fn sorted_distinct(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    v.dedup_by(|a, b| (*a - *b).abs() < consts::CONTROL_POINT_EQUALITY);
    v
}

/// Brackets `x` between two consecutive entries of `sorted`. Values below
/// the range snap to the first two entries; values above snap to the last
/// two. Requires at least two distinct values to bracket on this axis.
fn bracket(sorted: &[f64], x: f64) -> Option<(f64, f64)> {
    if sorted.len() < 2 {
        return None;
    }
    if x <= sorted[0] {
        return Some((sorted[0], sorted[1]));
    }
    if x >= sorted[sorted.len() - 1] {
        return Some((sorted[sorted.len() - 2], sorted[sorted.len() - 1]));
    }
    for w in sorted.windows(2) {
        if x >= w[0] && x <= w[1] {
            return Some((w[0], w[1]));
        }
    }
    None
}

/// The "settings bundle" of spec §6: every knob the policy's procedure
/// reads, plus an optional custom lattice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeflectionSettings {
    pub baseline_section_width_mm: f64,
    pub minimum_perimeter_facets: u32,
    pub maximum_perimeter_facets: u32,
    pub critical_slenderness: f64,
    pub max_linear_deflection_ratio: f64,
    pub max_angular_deflection_radians: f64,
    pub custom_strategy: Option<ControlPointLattice>,
}

impl Default for DeflectionSettings {
    fn default() -> Self {
        Self {
            baseline_section_width_mm: consts::DEFAULT_BASELINE_WIDTH_MM,
            minimum_perimeter_facets: consts::DEFAULT_MIN_PERIMETER_FACETS,
            maximum_perimeter_facets: consts::DEFAULT_MAX_PERIMETER_FACETS,
            critical_slenderness: consts::DEFAULT_CRITICAL_SLENDERNESS,
            max_linear_deflection_ratio: consts::DEFAULT_MAX_LINEAR_DEFLECTION_RATIO,
            max_angular_deflection_radians: consts::DEFAULT_MAX_ANGULAR_RADIANS,
            custom_strategy: None,
        }
    }
}

impl DeflectionSettings {
    /// A settings bundle whose proportional fallback (no custom lattice)
    /// targets `target` facets at `baseline_mm`. Panics if `target < 3`,
    /// `baseline_mm <= 0`, `max_facets < target` or `critical_slenderness <= 0`
    /// — these are caller-supplied constants, not user data, so a bad value
    /// here is a programmer error.
    pub fn for_target_facet_count(
        target: u32,
        baseline_mm: f64,
        max_facets: u32,
        critical_slenderness: f64,
    ) -> Self {
        assert!(target >= 3, "target facet count must be at least 3, got {target}");
        assert!(baseline_mm > 0.0, "baseline width must be positive, got {baseline_mm}");
        assert!(
            max_facets >= target,
            "maximum facet count {max_facets} must be >= target {target}"
        );
        assert!(
            critical_slenderness > 0.0,
            "critical slenderness must be positive, got {critical_slenderness}"
        );
        Self {
            baseline_section_width_mm: baseline_mm,
            minimum_perimeter_facets: target,
            maximum_perimeter_facets: max_facets,
            critical_slenderness,
            ..Self::default()
        }
    }

    /// A settings bundle at otherwise-default values, driven by `lattice`
    /// instead of the proportional fallback.
    pub fn with_custom_strategy(lattice: ControlPointLattice) -> Self {
        Self {
            custom_strategy: Some(lattice),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct Caches {
    curve_length: AHashMap<CurveId, f64>,
    curve_bounds: AHashMap<CurveId, (f64, f64)>,
}

/// Thread-safe cache of per-curve-id facts (directrix length, outer-curve
/// bounding box) that would otherwise be recomputed on every query for the
/// same profile. The policy itself carries no other state: every query is
/// a pure function of its arguments plus whatever is already cached.
#[derive(Debug, Default)]
pub struct DeflectionPolicy {
    caches: RwLock<Caches>,
}

impl DeflectionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches `length` for `curve_id`, overwriting any previous value.
    /// Exposed for callers that already know a curve's directrix length
    /// (e.g. the CAD kernel that produced it) and want to seed the cache
    /// rather than pay for a recompute on first query.
    pub fn set_curve_length(&self, curve_id: CurveId, length: f64) {
        self.caches.write().unwrap().curve_length.insert(curve_id, length);
    }

    fn cached_curve_length(&self, curve_id: CurveId) -> Option<f64> {
        self.caches.read().unwrap().curve_length.get(&curve_id).copied()
    }

    /// Caches `(width, height)` for `curve_id`'s outer-curve bounding box.
    pub fn set_curve_bounds(&self, curve_id: CurveId, bounds: (f64, f64)) {
        self.caches.write().unwrap().curve_bounds.insert(curve_id, bounds);
    }

    fn cached_curve_bounds(&self, curve_id: CurveId) -> Option<(f64, f64)> {
        self.caches.read().unwrap().curve_bounds.get(&curve_id).copied()
    }

    /// The full 7-step procedure of spec §4.5. `mm_per_model_unit` converts
    /// the profile's model-unit dimensions into the millimetres the facet-count
    /// query (and `baseline_section_width_mm`) are keyed in — spec §6 lists it
    /// as a required input precisely because a non-mm model would otherwise
    /// feed the wrong magnitude into that query. `bounding_box_diagonal` is
    /// the shape's overall bounding-box diagonal, used as the last-resort
    /// sweep-length fallback. `default_linear`/`default_angular` are the
    /// caller's model defaults; the result is never finer than these.
    pub fn deflection_for(
        &self,
        profile: ProfileKind,
        sweep: SweepKind,
        bounding_box_diagonal: f64,
        mm_per_model_unit: f64,
        default_linear: f64,
        default_angular: f64,
        settings: &DeflectionSettings,
    ) -> (f64, f64) {
        let Some((width, height)) = self.section_dims(profile) else {
            warn!(?profile, "deflection policy: unknown profile kind, no dynamic adjustment");
            return (default_linear, default_angular);
        };
        let min_dim = width.min(height);
        if min_dim <= 0.0 {
            warn!(?profile, "deflection policy: non-positive section dimension, no dynamic adjustment");
            return (default_linear, default_angular);
        }

        let sweep_length = self.sweep_length(sweep, bounding_box_diagonal);
        let slenderness = sweep_length / min_dim;
        let min_dim_mm = min_dim * mm_per_model_unit;
        debug!(min_dim, min_dim_mm, slenderness, "deflection policy: computed slenderness");

        if slenderness < settings.critical_slenderness {
            return (default_linear, default_angular);
        }

        let target = self.target_facet_count(settings, min_dim_mm, slenderness);
        let target = target.clamp(
            settings.minimum_perimeter_facets as f64,
            settings.maximum_perimeter_facets as f64,
        );

        let angular = 4.0 * std::f64::consts::PI / target;
        let r = min_dim / 2.0;
        let linear = r * (1.0 - (angular / 2.0).cos());

        let linear = linear.min(r * settings.max_linear_deflection_ratio);
        let angular = angular.min(settings.max_angular_deflection_radians);

        (linear.max(default_linear), angular.max(default_angular))
    }

    fn target_facet_count(&self, settings: &DeflectionSettings, min_dim_mm: f64, slenderness: f64) -> f64 {
        match &settings.custom_strategy {
            Some(lattice) => lattice.query(min_dim_mm, slenderness),
            None => {
                settings.minimum_perimeter_facets as f64 * (min_dim_mm / settings.baseline_section_width_mm)
            }
        }
    }

    /// (width, height) per spec §4.5 step 1. Returns `None` for a profile
    /// whose bounds can't be determined (arbitrary curve with uncomputable
    /// bounds), which the caller treats as "no dynamic adjustment".
    fn section_dims(&self, profile: ProfileKind) -> Option<(f64, f64)> {
        match profile {
            ProfileKind::Rectangle { x_dim, y_dim } => Some((x_dim, y_dim)),
            ProfileKind::Circle { radius } => Some((2.0 * radius, 2.0 * radius)),
            ProfileKind::Ellipse { semi_major, semi_minor } => {
                Some((2.0 * semi_major, 2.0 * semi_minor))
            }
            ProfileKind::RolledSection { overall_width, depth } => Some((overall_width, depth)),
            ProfileKind::SweptDisk { radius } => Some((2.0 * radius, 2.0 * radius)),
            ProfileKind::ArbitraryClosedCurve { curve_id } => self.cached_curve_bounds(curve_id).or_else(|| {
                warn!(curve_id, "deflection policy: curve bounds uncomputable and not cached");
                None
            }),
        }
    }

    /// Sweep length per spec §4.5 step 2.
    fn sweep_length(&self, sweep: SweepKind, bounding_box_diagonal: f64) -> f64 {
        match sweep {
            SweepKind::Extrusion { depth } => depth,
            SweepKind::CurveSweep { trim_span } | SweepKind::FixedReferenceSweep { trim_span } => {
                trim_span.abs()
            }
            SweepKind::Revolution { radius, angle_radians } => radius * angle_radians.abs(),
            SweepKind::SweptDisk { curve_id, param_span } => param_span.unwrap_or_else(|| {
                self.cached_curve_length(curve_id).unwrap_or_else(|| {
                    warn!(curve_id, "deflection policy: directrix length uncached, falling back to bounding box diagonal");
                    bounding_box_diagonal
                })
            }),
        }
    }
}
