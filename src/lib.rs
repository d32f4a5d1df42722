//! Garland-Heckbert quadric-error mesh decimation for triangulated BIM
//! surfaces, plus the dynamic-deflection policy that decides how finely
//! swept solids are faceted before this kernel ever sees them.
//!
//! The two halves are independent: [`simplify::Simplifier`] reduces an
//! already-tessellated [`mesh::TriangleMesh`] toward a target triangle
//! count, while [`deflection::DeflectionPolicy`] is a pure function from
//! swept-solid metadata to a pair of tessellation tolerances. Neither one
//! calls the other.

pub mod connectivity;
pub mod deflection;
pub mod heap;
pub mod mesh;
pub mod quadric;
pub mod simplify;

/// Fixed numeric tolerances used throughout the kernel, collected in one
/// place per the design note against scattering magic numbers.
pub mod consts {
    /// `|det A| <= SINGULARITY_THRESHOLD` means the quadric's optimal-point
    /// system is treated as singular and `Quadric::optimal` falls back to
    /// the cheapest of `p0`, `p1` and their midpoint.
    pub const SINGULARITY_THRESHOLD: f64 = 1000.0 * 1e-10;

    /// Triangles with area below this contribute no quadric and are
    /// skipped entirely during costing.
    pub const MIN_TRIANGLE_AREA: f64 = 1e-12;

    /// Below this dot product between a triangle's current and
    /// post-contraction normal, the contraction is rejected as a normal
    /// flip (roughly a 37 degree bound).
    pub const NORMAL_FLIP_DOT_THRESHOLD: f64 = 0.8;

    /// Two control-point coordinates within this distance of each other
    /// are treated as equal when bracketing the deflection lattice.
    pub const CONTROL_POINT_EQUALITY: f64 = 1e-6;

    /// Default slenderness below which the deflection policy leaves the
    /// caller's defaults untouched.
    pub const DEFAULT_CRITICAL_SLENDERNESS: f64 = 5.0;

    /// Default baseline section width (millimetres) used by the
    /// proportional facet-count fallback when no custom lattice is given.
    pub const DEFAULT_BASELINE_WIDTH_MM: f64 = 20.0;

    pub const DEFAULT_MIN_PERIMETER_FACETS: u32 = 3;
    pub const DEFAULT_MAX_PERIMETER_FACETS: u32 = 1000;
    pub const DEFAULT_MAX_LINEAR_DEFLECTION_RATIO: f64 = 1.5;

    /// Default ceiling on the angular step between facets, in radians.
    pub const DEFAULT_MAX_ANGULAR_RADIANS: f64 = 1.5 * std::f64::consts::PI;

    /// The facet count returned for an empty control-point lattice. Not
    /// derived from first principles; exposed explicitly rather than
    /// buried in the lattice-query code path.
    pub const EMPTY_LATTICE_FACET_COUNT: f64 = 6.0;
}
