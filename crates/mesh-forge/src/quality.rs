//! Quality scoring.
//!
//! [`score_mesh`] turns a mesh into a [`QualityMetrics`] snapshot: topology flags,
//! counts, genus, edge and angle extrema, a 1–10 score and three recommendation
//! flags. Scoring is pure and deterministic.

use std::fmt;

use tracing::debug;

use crate::Mesh;
use crate::decimate::DEFAULT_TARGET_FACES;
use crate::repair::DEGENERATE_AREA_EPSILON;
use crate::validate::validate_mesh;

/// Highest possible score.
pub const MAX_SCORE: f64 = 10.0;
/// Lowest possible score.
pub const MIN_SCORE: f64 = 1.0;

/// Thresholds used by [`score_mesh`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct ScoreParams {
    /// Face budget the mesh is judged against for `needs_decimation`. Default: 50 000
    pub target_faces: usize,
    /// Below this many faces the mesh is not viable. Default: 100
    pub min_viable_faces: usize,
    /// Upper complexity bound. Default: 500 000
    pub max_faces: usize,
    /// Smallest acceptable face angle in degrees. Default: 10
    pub min_angle_deg: f64,
    /// Largest acceptable face angle in degrees. Default: 170
    pub max_angle_deg: f64,
    /// Faces below this area are degenerate. Default: 1e-10
    pub degenerate_area: f64,
    /// `needs_decimation` fires above `target_faces × decimation_slack`. Default: 1.5
    pub decimation_slack: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            target_faces: DEFAULT_TARGET_FACES,
            min_viable_faces: 100,
            max_faces: 500_000,
            min_angle_deg: 10.0,
            max_angle_deg: 170.0,
            degenerate_area: DEGENERATE_AREA_EPSILON,
            decimation_slack: 1.5,
        }
    }
}

impl ScoreParams {
    /// Default thresholds judged against a specific face budget.
    pub fn with_target_faces(target_faces: usize) -> Self {
        Self {
            target_faces,
            ..Default::default()
        }
    }
}

/// Snapshot of one mesh's quality.
///
/// Serializes as a flat record with camelCase keys.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct QualityMetrics {
    pub watertight: bool,
    pub manifold: bool,
    pub face_count: usize,
    pub vertex_count: usize,
    pub edge_count: usize,
    /// Handles, from the Euler characteristic; 0 when `euler >= 2`.
    pub genus: u32,
    pub min_edge_length: f64,
    pub max_edge_length: f64,
    pub avg_edge_length: f64,
    /// Smallest interior face angle in degrees.
    pub min_face_angle: f64,
    /// Largest interior face angle in degrees.
    pub max_face_angle: f64,
    pub has_degenerate_faces: bool,
    /// Always in `[1.0, 10.0]`.
    pub overall_score: f64,
    pub needs_repair: bool,
    pub needs_decimation: bool,
    pub needs_smoothing: bool,
}

impl QualityMetrics {
    /// Whether the score reaches `min_quality`.
    pub fn meets(&self, min_quality: f64) -> bool {
        self.overall_score >= min_quality
    }
}

impl fmt::Display for QualityMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Quality score: {:.1}/10", self.overall_score)?;
        writeln!(
            f,
            "  Faces: {}, vertices: {}, edges: {}, genus: {}",
            self.face_count, self.vertex_count, self.edge_count, self.genus
        )?;
        writeln!(
            f,
            "  Watertight: {}, manifold: {}, degenerate faces: {}",
            yes_no(self.watertight),
            yes_no(self.manifold),
            yes_no(self.has_degenerate_faces)
        )?;
        writeln!(
            f,
            "  Edge length: min {:.4}, max {:.4}, avg {:.4}",
            self.min_edge_length, self.max_edge_length, self.avg_edge_length
        )?;
        writeln!(
            f,
            "  Face angle: min {:.1}°, max {:.1}°",
            self.min_face_angle, self.max_face_angle
        )?;
        write!(
            f,
            "  Needs repair: {}, decimation: {}, smoothing: {}",
            yes_no(self.needs_repair),
            yes_no(self.needs_decimation),
            yes_no(self.needs_smoothing)
        )
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Edge and angle extrema over all faces.
#[derive(Debug, Default)]
struct Extrema {
    min_edge: f64,
    max_edge: f64,
    avg_edge: f64,
    min_angle: f64,
    max_angle: f64,
    has_degenerate: bool,
}

fn measure(mesh: &Mesh, degenerate_area: f64) -> Extrema {
    if mesh.faces.is_empty() {
        return Extrema::default();
    }

    let mut min_edge = f64::INFINITY;
    let mut max_edge = 0.0_f64;
    let mut edge_sum = 0.0;
    let mut min_angle = f64::INFINITY;
    let mut max_angle = 0.0_f64;
    let mut has_degenerate = false;

    for tri in mesh.triangles() {
        for len in tri.edge_lengths() {
            min_edge = min_edge.min(len);
            max_edge = max_edge.max(len);
            edge_sum += len;
        }

        // Angles of a face with a zero-length edge are undefined; count it as fully collapsed.
        let [a, b, c] = tri.angles_degrees().unwrap_or([0.0, 0.0, 180.0]);
        min_angle = min_angle.min(a.min(b).min(c));
        max_angle = max_angle.max(a.max(b).max(c));

        has_degenerate |= tri.is_degenerate(degenerate_area);
    }

    Extrema {
        min_edge,
        max_edge,
        avg_edge: edge_sum / (mesh.faces.len() * 3) as f64,
        min_angle,
        max_angle,
        has_degenerate,
    }
}

/// Score a mesh.
///
/// Starts at 10 and deducts: 2 if not watertight, 1 for any degenerate face,
/// 1 if the smallest angle is below `min_angle_deg`, 1 if the largest exceeds
/// `max_angle_deg`, 1 above `max_faces`, 2 below `min_viable_faces`. The result
/// is clamped to `[1, 10]`.
///
/// # Example
///
/// ```
/// use mesh_forge::{Mesh, ScoreParams, score_mesh};
///
/// let metrics = score_mesh(&Mesh::new(), &ScoreParams::default());
/// assert!(metrics.overall_score >= 1.0 && metrics.overall_score <= 10.0);
/// assert!(metrics.needs_repair);
/// ```
pub fn score_mesh(mesh: &Mesh, params: &ScoreParams) -> QualityMetrics {
    let report = validate_mesh(mesh);
    let extrema = measure(mesh, params.degenerate_area);

    let face_count = report.face_count;
    let has_faces = face_count > 0;

    let euler = report.vertex_count as i64 - report.edge_count as i64 + face_count as i64;
    let genus = if has_faces && euler < 2 {
        ((2 - euler) / 2) as u32
    } else {
        0
    };

    let sharp = has_faces && extrema.min_angle < params.min_angle_deg;
    let obtuse = has_faces && extrema.max_angle > params.max_angle_deg;

    let mut score = MAX_SCORE;
    if !report.is_watertight {
        score -= 2.0;
    }
    if extrema.has_degenerate {
        score -= 1.0;
    }
    if sharp {
        score -= 1.0;
    }
    if obtuse {
        score -= 1.0;
    }
    if face_count > params.max_faces {
        score -= 1.0;
    }
    if face_count < params.min_viable_faces {
        score -= 2.0;
    }
    let overall_score = score.clamp(MIN_SCORE, MAX_SCORE);

    let metrics = QualityMetrics {
        watertight: report.is_watertight,
        manifold: report.is_manifold,
        face_count,
        vertex_count: report.vertex_count,
        edge_count: report.edge_count,
        genus,
        min_edge_length: extrema.min_edge,
        max_edge_length: extrema.max_edge,
        avg_edge_length: extrema.avg_edge,
        min_face_angle: extrema.min_angle,
        max_face_angle: extrema.max_angle,
        has_degenerate_faces: extrema.has_degenerate,
        overall_score,
        needs_repair: !report.is_watertight || !report.is_manifold,
        needs_decimation: face_count as f64 > params.target_faces as f64 * params.decimation_slack,
        needs_smoothing: sharp || obtuse || extrema.has_degenerate,
    };

    debug!(
        score = metrics.overall_score,
        faces = face_count,
        watertight = metrics.watertight,
        "Scored mesh"
    );

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tetrahedron() -> Mesh {
        Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            &[[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    #[test]
    fn test_empty_mesh_scores_within_bounds() {
        let metrics = score_mesh(&Mesh::new(), &ScoreParams::default());
        assert_relative_eq!(metrics.overall_score, 6.0);
        assert!(!metrics.watertight);
        assert!(metrics.needs_repair);
        assert_eq!(metrics.genus, 0);
    }

    #[test]
    fn test_small_closed_mesh_only_loses_viability_points() {
        let metrics = score_mesh(&tetrahedron(), &ScoreParams::default());
        assert!(metrics.watertight);
        assert!(metrics.manifold);
        assert_eq!(metrics.edge_count, 6);
        assert_eq!(metrics.genus, 0);
        assert_relative_eq!(metrics.min_face_angle, 45.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.max_face_angle, 90.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.overall_score, 8.0);
        assert!(!metrics.needs_repair);
        assert!(!metrics.needs_smoothing);
    }

    #[test]
    fn test_worst_case_is_clamped() {
        // Open sliver: not watertight, degenerate, sharp, obtuse, too few faces.
        let mesh = Mesh::from_raw(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1e-12, 0.0]],
            &[[0, 1, 2]],
        );
        let metrics = score_mesh(&mesh, &ScoreParams::default());
        assert_relative_eq!(metrics.overall_score, 3.0);
        assert!(metrics.has_degenerate_faces);
        assert!(metrics.needs_smoothing);

        let strict = ScoreParams {
            max_faces: 0,
            ..Default::default()
        };
        assert_relative_eq!(score_mesh(&mesh, &strict).overall_score, 2.0);
    }

    #[test]
    fn test_needs_decimation_uses_slack() {
        let mesh = tetrahedron();
        assert!(score_mesh(&mesh, &ScoreParams::with_target_faces(2)).needs_decimation);
        assert!(!score_mesh(&mesh, &ScoreParams::with_target_faces(3)).needs_decimation);
    }

    #[test]
    fn test_open_mesh_needs_repair() {
        let mut mesh = tetrahedron();
        mesh.faces.pop();
        let metrics = score_mesh(&mesh, &ScoreParams::default());
        assert!(!metrics.watertight);
        assert!(metrics.needs_repair);
        assert_relative_eq!(metrics.overall_score, 6.0);
    }

    #[test]
    fn test_scoring_does_not_mutate() {
        let mesh = tetrahedron();
        let before = mesh.clone();
        let _ = score_mesh(&mesh, &ScoreParams::default());
        assert_eq!(mesh, before);
    }

    #[cfg(feature = "pipeline-config")]
    #[test]
    fn test_metrics_serialize_flat() {
        let metrics = score_mesh(&tetrahedron(), &ScoreParams::default());
        let value = serde_json::to_value(&metrics).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 16);
        assert_eq!(object["overallScore"], 8.0);
        assert!(object.values().all(|v| !v.is_object() && !v.is_array()));
    }
}
