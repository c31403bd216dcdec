//! Hybrid combiner: merge a primary and an optional secondary mesh.
//!
//! Each operand is scaled then translated, then the operator is applied.
//! Solid operators that cannot be evaluated fall back instead of failing:
//!
//! | Operator | Fallback |
//! |---|---|
//! | `union` | `concatenate` |
//! | `difference` | primary unchanged |
//! | `intersection` | primary unchanged |
//!
//! Every fallback is logged and recorded as a `BooleanOperationInfeasible`
//! annotation.

use std::str::FromStr;

use nalgebra::Vector3;
use tracing::{debug, info};

use crate::boolean::{BooleanParams, SolidOp, boolean_operation};
use crate::error::{Annotation, MeshError};
use crate::process::{ProcessConfig, ProcessOutcome, process_mesh};
use crate::tracing_ext::{OperationTimer, log_annotation};
use crate::Mesh;

/// Uniform or per-axis scale factor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(untagged)
)]
pub enum Scale {
    Uniform(f64),
    PerAxis([f64; 3]),
}

impl Default for Scale {
    fn default() -> Self {
        Scale::Uniform(1.0)
    }
}

impl Scale {
    /// Per-axis factors.
    pub fn factors(&self) -> Vector3<f64> {
        match *self {
            Scale::Uniform(s) => Vector3::new(s, s, s),
            Scale::PerAxis([x, y, z]) => Vector3::new(x, y, z),
        }
    }
}

/// Scale followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Transform {
    pub scale: Scale,
    pub translation: [f64; 3],
}

impl Transform {
    /// Translation only.
    pub fn translate(x: f64, y: f64, z: f64) -> Self {
        Self {
            translation: [x, y, z],
            ..Default::default()
        }
    }

    /// Scale only.
    pub fn scale(scale: Scale) -> Self {
        Self {
            scale,
            ..Default::default()
        }
    }

    pub fn is_identity(&self) -> bool {
        self.scale.factors() == Vector3::new(1.0, 1.0, 1.0) && self.translation == [0.0; 3]
    }

    /// Apply to a mesh in place. A mirroring scale (negative determinant)
    /// also reverses face winding so normals keep pointing outward.
    pub fn apply(&self, mesh: &mut Mesh) {
        if self.is_identity() {
            return;
        }
        let factors = self.scale.factors();
        mesh.scale_axes(factors);
        if factors.x * factors.y * factors.z < 0.0 {
            mesh.flip_faces();
        }
        let [x, y, z] = self.translation;
        mesh.translate(Vector3::new(x, y, z));
    }
}

/// A mesh with the transform to apply before combining.
#[derive(Debug, Clone)]
pub struct Operand {
    pub mesh: Mesh,
    pub transform: Transform,
}

impl Operand {
    pub fn new(mesh: Mesh) -> Self {
        Self {
            mesh,
            transform: Transform::default(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    fn into_transformed(self) -> Mesh {
        let mut mesh = self.mesh;
        self.transform.apply(&mut mesh);
        mesh
    }
}

/// Combination operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum BooleanOp {
    Union,
    Difference,
    Intersection,
    /// Place both meshes in one coordinate space without touching topology.
    #[default]
    Concatenate,
}

impl BooleanOp {
    pub fn name(self) -> &'static str {
        match self {
            BooleanOp::Union => "union",
            BooleanOp::Difference => "difference",
            BooleanOp::Intersection => "intersection",
            BooleanOp::Concatenate => "concatenate",
        }
    }

    /// The solid operator, or `None` for concatenate.
    pub fn solid(self) -> Option<SolidOp> {
        match self {
            BooleanOp::Union => Some(SolidOp::Union),
            BooleanOp::Difference => Some(SolidOp::Difference),
            BooleanOp::Intersection => Some(SolidOp::Intersection),
            BooleanOp::Concatenate => None,
        }
    }

    /// Where this operator lands when the solid operation is infeasible.
    pub fn fallback(self) -> CombineFallback {
        match self {
            BooleanOp::Union | BooleanOp::Concatenate => CombineFallback::Concatenate,
            BooleanOp::Difference | BooleanOp::Intersection => CombineFallback::Primary,
        }
    }
}

impl FromStr for BooleanOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "union" => Ok(BooleanOp::Union),
            "difference" => Ok(BooleanOp::Difference),
            "intersection" => Ok(BooleanOp::Intersection),
            "concatenate" => Ok(BooleanOp::Concatenate),
            other => Err(format!(
                "unknown operator '{}' (expected union, difference, intersection or concatenate)",
                other
            )),
        }
    }
}

impl std::fmt::Display for BooleanOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result substituted for an infeasible solid operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum CombineFallback {
    /// Both operands side by side.
    Concatenate,
    /// The transformed primary alone.
    Primary,
}

impl CombineFallback {
    pub fn name(self) -> &'static str {
        match self {
            CombineFallback::Concatenate => "concatenate",
            CombineFallback::Primary => "primary",
        }
    }
}

/// A hybrid merge request.
#[derive(Debug, Clone)]
pub struct CombinationRequest {
    pub primary: Operand,
    pub secondary: Option<Operand>,
    pub operator: BooleanOp,
}

impl CombinationRequest {
    pub fn new(primary: Operand, secondary: Option<Operand>, operator: BooleanOp) -> Self {
        Self {
            primary,
            secondary,
            operator,
        }
    }
}

/// Result of [`combine`].
#[derive(Debug, Clone)]
pub struct CombineOutcome {
    pub mesh: Mesh,
    /// Operator that produced `mesh`: the requested one, or `concatenate` after a union fallback.
    pub operator_applied: BooleanOp,
    pub fallback: Option<CombineFallback>,
    pub annotations: Vec<Annotation>,
}

/// Result of [`combine_and_process`].
#[derive(Debug, Clone)]
pub struct CombinedOutcome {
    pub operator_applied: BooleanOp,
    pub fallback: Option<CombineFallback>,
    /// Orchestrator result; its annotations start with the combiner's.
    pub processed: ProcessOutcome,
}

fn concatenate(mut primary: Mesh, secondary: &Mesh) -> Mesh {
    primary.append(secondary);
    primary
}

/// Apply the transforms and the operator. Never fails.
pub fn combine(request: CombinationRequest) -> CombineOutcome {
    let operator = request.operator;
    let primary = request.primary.into_transformed();

    let Some(secondary) = request.secondary.map(Operand::into_transformed) else {
        debug!("Combine: no secondary operand, returning transformed primary");
        return CombineOutcome {
            mesh: primary,
            operator_applied: operator,
            fallback: None,
            annotations: Vec::new(),
        };
    };

    let _timer = OperationTimer::with_context(
        "combine",
        primary.face_count() + secondary.face_count(),
        primary.vertex_count() + secondary.vertex_count(),
    );

    let Some(solid) = operator.solid() else {
        return CombineOutcome {
            mesh: concatenate(primary, &secondary),
            operator_applied: BooleanOp::Concatenate,
            fallback: None,
            annotations: Vec::new(),
        };
    };

    match boolean_operation(&primary, &secondary, solid, &BooleanParams::default()) {
        Ok(result) => {
            info!(
                "Combine {}: {} faces ({} from primary, {} from secondary)",
                operator,
                result.mesh.face_count(),
                result.faces_from_a,
                result.faces_from_b
            );
            CombineOutcome {
                mesh: result.mesh,
                operator_applied: operator,
                fallback: None,
                annotations: Vec::new(),
            }
        }
        Err(e) => {
            let fallback = operator.fallback();
            let annotation = Annotation::BooleanOperationInfeasible {
                operation: operator.name().to_string(),
                fallback: fallback.name().to_string(),
                reason: match e {
                    MeshError::BooleanFailed { details, .. } => details,
                    other => other.to_string(),
                },
            };
            log_annotation(&annotation);

            let (mesh, operator_applied) = match fallback {
                CombineFallback::Concatenate => {
                    (concatenate(primary, &secondary), BooleanOp::Concatenate)
                }
                CombineFallback::Primary => (primary, operator),
            };
            CombineOutcome {
                mesh,
                operator_applied,
                fallback: Some(fallback),
                annotations: vec![annotation],
            }
        }
    }
}

/// Combine, then run the result through the processing orchestrator.
pub fn combine_and_process(request: CombinationRequest, config: &ProcessConfig) -> CombinedOutcome {
    let combined = combine(request);
    let mut processed = process_mesh(&combined.mesh, config);

    let mut annotations = combined.annotations;
    annotations.append(&mut processed.annotations);
    processed.annotations = annotations;

    CombinedOutcome {
        operator_applied: combined.operator_applied,
        fallback: combined.fallback,
        processed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;
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
    fn test_scale_then_translate() {
        let mut mesh = tetrahedron();
        Transform {
            scale: Scale::Uniform(2.0),
            translation: [10.0, 0.0, 0.0],
        }
        .apply(&mut mesh);
        // (1, 0, 0) scaled to (2, 0, 0), then moved to (12, 0, 0).
        assert_relative_eq!(mesh.vertices[1].position.x, 12.0);
        assert_relative_eq!(mesh.volume(), 8.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mirror_keeps_outward_orientation() {
        let mut mesh = tetrahedron();
        assert!(mesh.signed_volume() > 0.0);
        Transform::scale(Scale::PerAxis([-1.0, 1.0, 1.0])).apply(&mut mesh);
        assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_concatenate_sums_faces() {
        let request = CombinationRequest::new(
            Operand::new(tetrahedron()),
            Some(Operand::new(tetrahedron()).with_transform(Transform::translate(0.2, 0.2, 0.2))),
            BooleanOp::Concatenate,
        );
        let outcome = combine(request);
        assert_eq!(outcome.mesh.face_count(), 8);
        assert_eq!(outcome.mesh.vertex_count(), 8);
        assert!(outcome.fallback.is_none());
    }

    #[test]
    fn test_without_secondary_returns_primary() {
        let request = CombinationRequest::new(Operand::new(tetrahedron()), None, BooleanOp::Union);
        let outcome = combine(request);
        assert_eq!(outcome.mesh, tetrahedron());
        assert!(outcome.annotations.is_empty());
    }

    fn non_manifold_secondary() -> Operand {
        let mut mesh = tetrahedron();
        mesh.vertices.push(Vertex::from_coords(0.5, -1.0, 0.5));
        mesh.faces.push([0, 1, 4]);
        Operand::new(mesh).with_transform(Transform::translate(0.25, 0.25, 0.25))
    }

    #[test]
    fn test_union_falls_back_to_concatenate() {
        let request = CombinationRequest::new(
            Operand::new(tetrahedron()),
            Some(non_manifold_secondary()),
            BooleanOp::Union,
        );
        let outcome = combine(request);
        assert_eq!(outcome.fallback, Some(CombineFallback::Concatenate));
        assert_eq!(outcome.operator_applied, BooleanOp::Concatenate);
        assert_eq!(outcome.mesh.face_count(), 9);
        assert!(matches!(
            outcome.annotations[0],
            Annotation::BooleanOperationInfeasible { .. }
        ));
    }

    #[test]
    fn test_difference_and_intersection_fall_back_to_primary() {
        for op in [BooleanOp::Difference, BooleanOp::Intersection] {
            let primary = Operand::new(tetrahedron())
                .with_transform(Transform::scale(Scale::Uniform(3.0)));
            let request = CombinationRequest::new(primary, Some(non_manifold_secondary()), op);
            let outcome = combine(request);
            assert_eq!(outcome.fallback, Some(CombineFallback::Primary), "{op}");
            assert_eq!(outcome.operator_applied, op);
            assert_eq!(outcome.mesh.face_count(), 4);
            assert_relative_eq!(outcome.mesh.vertices[1].position.x, 3.0);
            assert_eq!(outcome.annotations.len(), 1);
        }
    }

    #[test]
    fn test_combine_and_process_keeps_fallback_annotation() {
        let request = CombinationRequest::new(
            Operand::new(tetrahedron()),
            Some(non_manifold_secondary()),
            BooleanOp::Intersection,
        );
        let config = ProcessConfig {
            min_quality: 1.0,
            ..Default::default()
        };
        let outcome = combine_and_process(request, &config);
        assert!(outcome.processed.accepted());
        assert!(matches!(
            outcome.processed.annotations.first(),
            Some(Annotation::BooleanOperationInfeasible { .. })
        ));
    }

    fn unit_cube() -> Mesh {
        Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
                [0.0, 1.0, 1.0],
            ],
            &[
                [0, 2, 1],
                [0, 3, 2],
                [4, 5, 6],
                [4, 6, 7],
                [0, 1, 5],
                [0, 5, 4],
                [2, 3, 7],
                [2, 7, 6],
                [1, 2, 6],
                [1, 6, 5],
                [3, 0, 4],
                [3, 4, 7],
            ],
        )
    }

    #[test]
    fn test_overlapping_union_never_returns_open_mesh() {
        let request = CombinationRequest::new(
            Operand::new(unit_cube()),
            Some(Operand::new(unit_cube()).with_transform(Transform::translate(0.5, 0.5, 0.5))),
            BooleanOp::Union,
        );
        let outcome = combine(request);
        let report = crate::validate::validate_mesh(&outcome.mesh);
        if outcome.fallback.is_none() {
            assert!(report.is_watertight && report.is_manifold);
        } else {
            assert_eq!(outcome.fallback, Some(CombineFallback::Concatenate));
            assert_eq!(outcome.operator_applied, BooleanOp::Concatenate);
            assert_eq!(outcome.mesh.face_count(), 24);
            assert!(matches!(
                outcome.annotations.as_slice(),
                [Annotation::BooleanOperationInfeasible { .. }]
            ));
        }
    }

    #[test]
    fn test_overlapping_difference_keeps_primary() {
        let request = CombinationRequest::new(
            Operand::new(unit_cube()),
            Some(Operand::new(unit_cube()).with_transform(Transform::translate(0.5, 0.5, 0.5))),
            BooleanOp::Difference,
        );
        let outcome = combine(request);
        match outcome.fallback {
            None => assert!(crate::validate::validate_mesh(&outcome.mesh).is_watertight),
            Some(fallback) => {
                assert_eq!(fallback, CombineFallback::Primary);
                assert_eq!(outcome.mesh, unit_cube());
                assert_eq!(outcome.annotations.len(), 1);
            }
        }
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!("UNION".parse::<BooleanOp>().unwrap(), BooleanOp::Union);
        assert!("xor".parse::<BooleanOp>().is_err());
    }
}
