//! End-to-end integration tests for mesh-forge.
//!
//! These tests exercise the public surface the way a service would: bytes in,
//! processing and combination in the middle, converted bytes out.

use std::collections::HashMap;

use mesh_forge::backend::ExternalBackendConfig;
use mesh_forge::combine::CombineFallback;
use mesh_forge::{
    Annotation, BooleanOp, CleanParams, CombinationRequest, ConversionOptions, ConverterService,
    DecimateParams, Mesh, MeshError, MeshFormat, Operand, OutputSpec, PipelineConfig,
    ProcessConfig, ProcessState, ScoreParams, Transform, clean_mesh, combine, decimate, decode,
    encode, process, process_mesh, run_pipeline, score_mesh, validate_mesh,
};

/// Unit icosphere: 12 vertices subdivided `levels` times, CCW from outside.
fn icosphere(levels: usize) -> Mesh {
    let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let mut positions: Vec<[f64; 3]> = vec![
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ];
    let mut faces: Vec<[u32; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..levels {
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
        let mut midpoint = |a: u32, b: u32, positions: &mut Vec<[f64; 3]>| -> u32 {
            let key = (a.min(b), a.max(b));
            *midpoints.entry(key).or_insert_with(|| {
                let (pa, pb) = (positions[a as usize], positions[b as usize]);
                positions.push([
                    (pa[0] + pb[0]) / 2.0,
                    (pa[1] + pb[1]) / 2.0,
                    (pa[2] + pb[2]) / 2.0,
                ]);
                (positions.len() - 1) as u32
            })
        };

        let mut next = Vec::with_capacity(faces.len() * 4);
        for &[a, b, c] in &faces {
            let ab = midpoint(a, b, &mut positions);
            let bc = midpoint(b, c, &mut positions);
            let ca = midpoint(c, a, &mut positions);
            next.extend([[a, ab, ca], [b, bc, ab], [c, ca, bc], [ab, bc, ca]]);
        }
        faces = next;
    }

    for p in &mut positions {
        let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        p.iter_mut().for_each(|c| *c /= len);
    }
    Mesh::from_raw(&positions, &faces)
}

fn translated(mesh: &Mesh, x: f64) -> Operand {
    Operand::new(mesh.clone()).with_transform(Transform::translate(x, 0.0, 0.0))
}

// =============================================================================
// Scoring and processing
// =============================================================================

#[test]
fn test_icosphere_scores_perfect() {
    let sphere = icosphere(3);
    assert_eq!(sphere.vertex_count(), 642);
    assert_eq!(sphere.face_count(), 1280);

    let metrics = score_mesh(&sphere, &ScoreParams::default());
    assert!(metrics.watertight);
    assert!(metrics.manifold);
    assert_eq!(metrics.genus, 0);
    assert!(!metrics.has_degenerate_faces);
    assert_eq!(metrics.overall_score, 10.0);
    assert!(!metrics.needs_repair);
    assert!(!metrics.needs_decimation);
}

#[test]
fn test_icosphere_is_closed_and_outward() {
    let report = validate_mesh(&icosphere(2));
    assert!(report.is_watertight);
    assert!(report.is_manifold);
    assert!(!report.is_inside_out);
    assert_eq!(report.component_count, 1);
}

#[test]
fn test_process_accepts_clean_mesh_first_try() {
    let outcome = process_mesh(&icosphere(3), &ProcessConfig::default());
    assert_eq!(outcome.state, ProcessState::Accepted);
    assert_eq!(outcome.attempts.len(), 1);
    assert!(outcome.metrics.watertight);
    assert!(outcome.annotations.is_empty());
}

#[test]
fn test_unreachable_quality_returns_best_attempt() {
    let config = ProcessConfig {
        min_quality: 11.0,
        ..Default::default()
    };
    let outcome = process_mesh(&icosphere(2), &config);

    assert_eq!(outcome.state, ProcessState::Exhausted);
    assert_eq!(outcome.attempts.len(), config.max_retries);
    let best = outcome
        .attempts
        .iter()
        .map(|a| a.score)
        .fold(f64::MIN, f64::max);
    assert_eq!(outcome.metrics.overall_score, best);
    assert!(matches!(
        outcome.annotations.last(),
        Some(Annotation::QualityBelowThreshold { attempts: 3, .. })
    ));
}

#[test]
fn test_retry_targets_shrink() {
    let config = ProcessConfig {
        min_quality: 11.0,
        target_faces: 1000,
        ..Default::default()
    };
    let outcome = process_mesh(&icosphere(3), &config);
    let targets: Vec<usize> = outcome.attempts.iter().map(|a| a.target_faces).collect();
    assert_eq!(targets, vec![1000, 800, 640]);
    for record in &outcome.attempts {
        assert!(record.face_count <= 1280);
    }
}

#[test]
fn test_decimate_reduces_sphere() {
    let sphere = icosphere(3);
    let outcome = decimate(&sphere, &DecimateParams::with_target_faces(400));
    assert!(outcome.annotation.is_none());
    assert!(outcome.final_faces < sphere.face_count());
    assert!(outcome.final_faces > 0);
    assert_eq!(outcome.mesh.face_count(), outcome.final_faces);
}

// =============================================================================
// Cleanup
// =============================================================================

#[test]
fn test_duplicate_vertex_is_welded() {
    let mut mesh = Mesh::from_raw(
        &[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
        ],
        &[[0, 1, 2], [0, 3, 2]],
    );
    let result = clean_mesh(&mut mesh, &CleanParams::default());
    assert_eq!(result.vertices_welded, 1);
    assert_eq!(mesh.vertex_count(), 3);
}

#[test]
fn test_floating_debris_is_removed() {
    let mut mesh = icosphere(2);
    let debris = Mesh::from_raw(
        &[
            [5.0, 0.0, 0.0],
            [5.1, 0.0, 0.0],
            [5.0, 0.1, 0.0],
            [5.0, 0.0, 0.1],
        ],
        &[[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
    );
    mesh.append(&debris);

    let result = clean_mesh(&mut mesh, &CleanParams::default());
    assert_eq!(result.components_found, 2);
    assert_eq!(result.components_removed, 1);
    assert_eq!(mesh.face_count(), 320);
}

// =============================================================================
// Bytes in, bytes out
// =============================================================================

#[test]
fn test_process_bytes_keeps_format() {
    let stl = encode(&icosphere(2), MeshFormat::Stl).unwrap();
    let output = process(&stl, MeshFormat::Stl, &ProcessConfig::default()).unwrap();
    assert_eq!(output.format, MeshFormat::Stl);

    let decoded = decode(&output.bytes, MeshFormat::Stl).unwrap();
    assert_eq!(decoded.face_count(), output.metrics.face_count);
}

#[test]
fn test_garbage_bytes_are_validation_failures() {
    let err = process(b"definitely not a mesh", MeshFormat::Ply, &ProcessConfig::default())
        .unwrap_err();
    assert!(matches!(err, MeshError::ValidationFailure { .. }));
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let sphere = icosphere(1);
    for ext in ["stl", "obj", "ply", "glb"] {
        let path = dir.path().join(format!("sphere.{ext}"));
        sphere.save(&path).unwrap();
        let loaded = Mesh::load(&path).unwrap();
        assert_eq!(loaded.face_count(), sphere.face_count(), "{ext}");
    }
}

// =============================================================================
// Conversion
// =============================================================================

#[test]
fn test_same_format_is_passthrough() {
    let obj = encode(&icosphere(1), MeshFormat::Obj).unwrap();
    let output = ConverterService::builtin_only()
        .convert(&obj, MeshFormat::Obj, MeshFormat::Obj, &ConversionOptions::default())
        .unwrap();
    assert_eq!(output.bytes, obj);
    assert_eq!(output.backend, "passthrough");
}

#[test]
fn test_dxf_export_from_stl() {
    let stl = encode(&icosphere(1), MeshFormat::Stl).unwrap();
    let output = ConverterService::builtin_only()
        .convert(&stl, MeshFormat::Stl, MeshFormat::Dxf, &ConversionOptions::default())
        .unwrap();
    let text = String::from_utf8(output.bytes).unwrap();
    assert!(text.contains("3DFACE"));
    assert!(text.ends_with("EOF\n"));
    assert!(output.annotations.is_empty());
}

#[cfg(feature = "step")]
#[test]
fn test_step_with_missing_converter_falls_back() {
    let service = ConverterService::new(ExternalBackendConfig::for_executable(
        "/nonexistent/mesh-converter",
    ));
    let glb = encode(&icosphere(1), MeshFormat::Glb).unwrap();
    let output = service
        .convert(&glb, MeshFormat::Glb, MeshFormat::Step, &ConversionOptions::default())
        .unwrap();

    assert!(!output.bytes.is_empty());
    assert_eq!(output.backend, "builtin");
    assert_eq!(output.annotations.len(), 1);
    assert!(matches!(
        output.annotations[0],
        Annotation::BackendUnavailable { .. }
    ));
    assert!(String::from_utf8_lossy(&output.bytes).contains("ISO-10303-21;"));
}

#[test]
fn test_pipeline_exports_every_output() {
    let config = PipelineConfig::with_name("handoff")
        .add_output(OutputSpec::new(MeshFormat::Glb))
        .add_output(OutputSpec::new(MeshFormat::Dxf))
        .add_output(OutputSpec::new(MeshFormat::Obj));

    let ply = encode(&icosphere(2), MeshFormat::Ply).unwrap();
    let output = run_pipeline(&ply, MeshFormat::Ply, &config, &ConverterService::builtin_only())
        .unwrap();

    let formats: Vec<MeshFormat> = output.exports.iter().map(|e| e.format).collect();
    assert_eq!(formats, vec![MeshFormat::Glb, MeshFormat::Dxf, MeshFormat::Obj]);
    assert!(output.exports.iter().all(|e| !e.bytes.is_empty()));
    assert_eq!(output.state, ProcessState::Accepted);
}

#[test]
fn test_pipeline_exports_drafting_formats_for_collapsed_input() {
    // Decodes fine, but cleanup removes the only (zero-area) face.
    let obj = b"v 0 0 0\nv 1 0 0\nv 2 0 0\nf 1 2 3\n";
    let mut config = PipelineConfig::with_name("collapsed").add_output(OutputSpec::new(MeshFormat::Dxf));
    if cfg!(feature = "step") {
        config = config.add_output(OutputSpec::new(MeshFormat::Step));
    }

    let output = run_pipeline(obj, MeshFormat::Obj, &config, &ConverterService::builtin_only())
        .unwrap();

    assert_eq!(output.mesh.face_count(), 0);
    assert_eq!(output.exports.len(), config.outputs.len());
    let dxf = String::from_utf8(output.exports[0].bytes.clone()).unwrap();
    assert!(dxf.contains("ENTITIES"));
    assert!(!dxf.contains("3DFACE"));
    assert!(dxf.ends_with("0\nEOF\n"));
    if let Some(step) = output.exports.get(1) {
        let text = String::from_utf8(step.bytes.clone()).unwrap();
        assert!(text.contains("ISO-10303-21;"));
        assert!(text.contains("DATA;"));
    }
}

// =============================================================================
// Combination
// =============================================================================

#[test]
fn test_concatenate_sums_faces() {
    let sphere = icosphere(1);
    let request = CombinationRequest::new(
        Operand::new(sphere.clone()),
        Some(translated(&sphere, 0.5)),
        BooleanOp::Concatenate,
    );
    let outcome = combine(request);
    assert_eq!(outcome.mesh.face_count(), 2 * sphere.face_count());
    assert!(outcome.fallback.is_none());
}

#[test]
fn test_union_of_disjoint_spheres() {
    let sphere = icosphere(1);
    let outcome = combine(CombinationRequest::new(
        Operand::new(sphere.clone()),
        Some(translated(&sphere, 5.0)),
        BooleanOp::Union,
    ));
    assert!(outcome.fallback.is_none());
    assert_eq!(outcome.operator_applied, BooleanOp::Union);
    assert_eq!(outcome.mesh.face_count(), 2 * sphere.face_count());
}

#[test]
fn test_open_secondary_triggers_fallback() {
    let sphere = icosphere(1);
    let mut open = icosphere(1);
    open.faces.truncate(open.faces.len() - 1);

    let outcome = combine(CombinationRequest::new(
        Operand::new(sphere.clone()),
        Some(Operand::new(open.clone())),
        BooleanOp::Union,
    ));
    assert_eq!(outcome.fallback, Some(CombineFallback::Concatenate));
    assert_eq!(
        outcome.mesh.face_count(),
        sphere.face_count() + open.face_count()
    );
    assert!(matches!(
        outcome.annotations.as_slice(),
        [Annotation::BooleanOperationInfeasible { .. }]
    ));

    let outcome = combine(CombinationRequest::new(
        Operand::new(sphere.clone()),
        Some(Operand::new(open)),
        BooleanOp::Difference,
    ));
    assert_eq!(outcome.fallback, Some(CombineFallback::Primary));
    assert_eq!(outcome.mesh.face_count(), sphere.face_count());
}
