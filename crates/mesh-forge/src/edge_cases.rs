//! Edge case tests: degenerate inputs through every stage.
//!
//! The pipeline promises some valid output for any syntactically valid mesh,
//! so none of these may panic.

#[cfg(test)]
mod tests {
    use crate::cleanup::{CleanParams, clean_mesh};
    use crate::combine::{BooleanOp, CombinationRequest, CombineFallback, Operand, combine};
    use crate::convert::{ConversionOptions, ConversionTarget, ConverterService, capability};
    use crate::decimate::{DecimateParams, decimate, decimate_mesh_checked};
    use crate::dxf::export_dxf_string;
    use crate::io::{MeshFormat, decode};
    use crate::process::{ProcessConfig, process_mesh};
    use crate::quality::{ScoreParams, score_mesh};
    use crate::repair::{RepairParams, repair_mesh};
    use crate::smooth::{SmoothParams, smooth_mesh};
    use crate::validate::{ValidationOptions, validate_mesh, validate_mesh_data};
    use crate::{Annotation, Mesh, MeshError, Vertex};

    fn tetrahedron() -> Mesh {
        Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.5, 1.0, 0.0],
                [0.5, 0.5, 1.0],
            ],
            &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
        )
    }

    fn in_score_range(score: f64) -> bool {
        (1.0..=10.0).contains(&score)
    }

    // ==================== Empty Mesh ====================

    #[test]
    fn test_empty_mesh_validate() {
        let report = validate_mesh(&Mesh::new());
        assert_eq!(report.face_count, 0);
        assert_eq!(report.component_count, 0);
        assert!(report.bounds.is_none());
    }

    #[test]
    fn test_empty_mesh_stages_are_noops() {
        let mut mesh = Mesh::new();
        assert!(clean_mesh(&mut mesh, &CleanParams::default()).is_noop());
        assert_eq!(repair_mesh(&mut mesh, &RepairParams::default()).holes_filled, 0);

        let decimated = decimate(&mesh, &DecimateParams::default());
        assert_eq!(decimated.final_faces, 0);
        assert!(decimated.annotation.is_none());

        let smoothed = smooth_mesh(&mut mesh, &SmoothParams::default());
        assert_eq!(smoothed.iterations_completed, 0);
        assert!(smoothed.annotation.is_none());
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_empty_mesh_score_in_range() {
        let metrics = score_mesh(&Mesh::new(), &ScoreParams::default());
        assert!(in_score_range(metrics.overall_score));
        assert_eq!(metrics.genus, 0);
        assert_eq!(metrics.face_count, 0);
    }

    #[test]
    fn test_empty_mesh_process_terminates() {
        let outcome = process_mesh(&Mesh::new(), &ProcessConfig::default());
        assert!(outcome.state.is_terminal());
        assert!(!outcome.attempts.is_empty() && outcome.attempts.len() <= 3);
        assert!(in_score_range(outcome.metrics.overall_score));
    }

    #[test]
    fn test_empty_mesh_exports_every_builtin_format() {
        let dxf = export_dxf_string(&Mesh::new());
        assert_eq!(dxf.face_count, 0);
        assert!(dxf.text.ends_with("0\nEOF\n"));

        let targets: Vec<ConversionTarget> = MeshFormat::all()
            .into_iter()
            .filter(|&f| capability(f).builtin)
            .map(ConversionTarget::new)
            .collect();
        let outputs = ConverterService::builtin_only()
            .export(&Mesh::new(), &targets)
            .unwrap();
        assert_eq!(outputs.len(), targets.len());
        for (output, target) in outputs.iter().zip(&targets) {
            assert_eq!(output.format, target.format);
            assert!(!output.bytes.is_empty(), "{}", target.format);
            assert!(output.annotations.is_empty());
        }
    }

    #[test]
    fn test_empty_bytes_are_validation_failures() {
        for format in [MeshFormat::Glb, MeshFormat::Stl, MeshFormat::Obj, MeshFormat::Ply] {
            let err = decode(b"", format).unwrap_err();
            assert!(
                matches!(err, MeshError::ValidationFailure { .. }),
                "{format}: {err:?}"
            );
        }
        let err = ConverterService::builtin_only()
            .convert(b"", MeshFormat::Obj, MeshFormat::Step, &ConversionOptions::default())
            .unwrap_err();
        assert!(matches!(err, MeshError::ValidationFailure { .. }));
    }

    // ==================== Combiner with degenerate operands ====================

    #[test]
    fn test_union_with_empty_secondary_falls_back() {
        let request = CombinationRequest::new(
            Operand::new(tetrahedron()),
            Some(Operand::new(Mesh::new())),
            BooleanOp::Union,
        );
        let outcome = combine(request);
        assert_eq!(outcome.fallback, Some(CombineFallback::Concatenate));
        assert_eq!(outcome.mesh.face_count(), 4);
        assert!(matches!(
            outcome.annotations[0],
            Annotation::BooleanOperationInfeasible { .. }
        ));
    }

    #[test]
    fn test_intersection_with_empty_primary_returns_primary() {
        let request = CombinationRequest::new(
            Operand::new(Mesh::new()),
            Some(Operand::new(tetrahedron())),
            BooleanOp::Intersection,
        );
        let outcome = combine(request);
        assert_eq!(outcome.fallback, Some(CombineFallback::Primary));
        assert!(outcome.mesh.is_empty());
    }

    // ==================== Single Triangle ====================

    #[test]
    fn test_single_triangle_needs_repair() {
        let mesh = Mesh::from_raw(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            &[[0, 1, 2]],
        );
        let metrics = score_mesh(&mesh, &ScoreParams::default());
        assert!(!metrics.watertight);
        assert!(metrics.needs_repair);
        assert!(in_score_range(metrics.overall_score));

        let outcome = process_mesh(&mesh, &ProcessConfig::default());
        assert!(outcome.mesh.face_count() >= 1);
    }

    // ==================== All Degenerate ====================

    fn all_degenerate_mesh() -> Mesh {
        Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [3.0, 0.0, 0.0],
            ],
            &[[0, 1, 2], [1, 2, 3], [0, 2, 3]],
        )
    }

    #[test]
    fn test_all_degenerate_scores_low_but_valid() {
        let metrics = score_mesh(&all_degenerate_mesh(), &ScoreParams::default());
        assert!(metrics.has_degenerate_faces);
        assert!(metrics.needs_smoothing);
        assert!(in_score_range(metrics.overall_score));
    }

    #[test]
    fn test_all_degenerate_clean_removes_everything() {
        let mut mesh = all_degenerate_mesh();
        let result = clean_mesh(&mut mesh, &CleanParams::default());
        assert_eq!(result.degenerate_faces_removed, 3);
        assert_eq!(mesh.face_count(), 0);
        assert_eq!(mesh.vertex_count(), 0);
    }

    // ==================== Non-finite Coordinates ====================

    fn nan_coordinate_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(f64::NAN, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);
        mesh
    }

    #[test]
    fn test_nan_rejected_by_data_validation() {
        let mesh = nan_coordinate_mesh();
        assert!(validate_mesh_data(&mesh, &ValidationOptions::default()).is_err());
        let collected = validate_mesh_data(&mesh, &ValidationOptions::collect_all()).unwrap();
        assert_eq!(collected.non_finite_count, 1);
    }

    #[test]
    fn test_nan_decimation_fails_with_error() {
        let params = DecimateParams::with_target_faces(0);
        let result = decimate_mesh_checked(&nan_coordinate_mesh(), &params);
        assert!(matches!(result, Err(MeshError::DecimationFailed { .. })));
    }

    #[test]
    fn test_nan_smoothing_keeps_last_good_state() {
        let mut mesh = nan_coordinate_mesh();
        let result = smooth_mesh(&mut mesh, &SmoothParams::default());
        assert_eq!(result.iterations_completed, 0);
        assert!(matches!(
            result.annotation,
            Some(Annotation::SmoothingFailed { .. })
        ));
        assert_eq!(mesh.vertices[1].position.x, 1.0);
    }

    // ==================== Out-of-range Indices ====================

    #[test]
    fn test_invalid_index_rejected() {
        let mut mesh = tetrahedron();
        mesh.faces.push([0, 1, 99]);
        let err = validate_mesh_data(&mesh, &ValidationOptions::default()).unwrap_err();
        assert!(matches!(err, MeshError::InvalidVertexIndex { .. }));
    }

    // ==================== Extreme Scales ====================

    #[test]
    fn test_large_coordinates_process() {
        let mut mesh = tetrahedron();
        mesh.scale(1e6);
        let outcome = process_mesh(&mesh, &ProcessConfig::default());
        assert!(outcome.metrics.watertight);
        assert_eq!(outcome.mesh.face_count(), 4);
    }

    #[test]
    fn test_tiny_coordinates_survive_weld() {
        // Millimetre-scale edges: above the weld and degenerate-area thresholds.
        let mut mesh = tetrahedron();
        mesh.scale(1e-3);
        let result = clean_mesh(&mut mesh, &CleanParams::default());
        assert_eq!(result.vertices_welded, 0);
        assert_eq!(mesh.face_count(), 4);
    }
}
