//! Built-in DXF (R12, ASCII) writer.
//!
//! Two layers:
//!
//! - `MESH`: one `3DFACE` entity per triangle (fourth corner repeats the third).
//! - `FOOTPRINT`: the XY outline as `LINE` entities at z = 0. The outline is the
//!   set of boundary edges of the upward-facing faces, or of all faces when none
//!   face up.

use std::fmt::Write as _;

use hashbrown::HashMap;
use nalgebra::Point3;

use crate::adjacency::edge_key;
use crate::Mesh;

/// Layer holding the triangle faces.
pub const MESH_LAYER: &str = "MESH";
/// Layer holding the 2D footprint.
pub const FOOTPRINT_LAYER: &str = "FOOTPRINT";

/// DXF text and entity counts.
#[derive(Debug, Clone)]
pub struct DxfExport {
    pub text: String,
    pub face_count: usize,
    pub footprint_segments: usize,
}

/// Boundary edges of the chosen face subset, projected to z = 0.
fn footprint_segments(mesh: &Mesh) -> Vec<(Point3<f64>, Point3<f64>)> {
    let upward: Vec<usize> = mesh
        .triangles()
        .enumerate()
        .filter(|(_, tri)| tri.normal_unnormalized().z > 0.0)
        .map(|(i, _)| i)
        .collect();
    let selected: Vec<usize> = if upward.is_empty() {
        (0..mesh.faces.len()).collect()
    } else {
        upward
    };

    // Directed first occurrence is kept so segments follow face winding.
    let mut uses: HashMap<(u32, u32), (u32, u32, usize)> = HashMap::new();
    for &fi in &selected {
        let [a, b, c] = mesh.faces[fi];
        for (u, v) in [(a, b), (b, c), (c, a)] {
            uses.entry(edge_key(u, v))
                .and_modify(|e| e.2 += 1)
                .or_insert((u, v, 1));
        }
    }

    let flat = |i: u32| {
        let p = mesh.vertices[i as usize].position;
        Point3::new(p.x, p.y, 0.0)
    };
    let mut segments: Vec<(Point3<f64>, Point3<f64>)> = uses
        .into_values()
        .filter(|&(_, _, count)| count == 1)
        .map(|(u, v, _)| (flat(u), flat(v)))
        .filter(|(p, q)| (p - q).norm_squared() > 0.0)
        .collect();
    // HashMap order is arbitrary; sort for reproducible output.
    segments.sort_by(|a, b| {
        (a.0.x, a.0.y, a.1.x, a.1.y)
            .partial_cmp(&(b.0.x, b.0.y, b.1.x, b.1.y))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    segments
}

fn group(out: &mut String, code: u16, value: impl std::fmt::Display) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "{code}\n{value}");
}

fn point(out: &mut String, slot: u16, p: &Point3<f64>) {
    group(out, 10 + slot, format_args!("{:.6}", p.x));
    group(out, 20 + slot, format_args!("{:.6}", p.y));
    group(out, 30 + slot, format_args!("{:.6}", p.z));
}

fn layer_entry(out: &mut String, name: &str, color: u8) {
    group(out, 0, "LAYER");
    group(out, 2, name);
    group(out, 70, 0);
    group(out, 62, color);
    group(out, 6, "CONTINUOUS");
}

/// Export a mesh as DXF R12 text.
///
/// A mesh without faces gives a complete document whose ENTITIES section is empty.
pub fn export_dxf_string(mesh: &Mesh) -> DxfExport {
    let segments = footprint_segments(mesh);
    let mut out = String::with_capacity(mesh.faces.len() * 200 + segments.len() * 120 + 512);

    group(&mut out, 0, "SECTION");
    group(&mut out, 2, "HEADER");
    group(&mut out, 9, "$ACADVER");
    group(&mut out, 1, "AC1009");
    group(&mut out, 0, "ENDSEC");

    group(&mut out, 0, "SECTION");
    group(&mut out, 2, "TABLES");
    group(&mut out, 0, "TABLE");
    group(&mut out, 2, "LAYER");
    group(&mut out, 70, 2);
    layer_entry(&mut out, MESH_LAYER, 7);
    layer_entry(&mut out, FOOTPRINT_LAYER, 1);
    group(&mut out, 0, "ENDTAB");
    group(&mut out, 0, "ENDSEC");

    group(&mut out, 0, "SECTION");
    group(&mut out, 2, "ENTITIES");
    for tri in mesh.triangles() {
        group(&mut out, 0, "3DFACE");
        group(&mut out, 8, MESH_LAYER);
        point(&mut out, 0, &tri.v0);
        point(&mut out, 1, &tri.v1);
        point(&mut out, 2, &tri.v2);
        point(&mut out, 3, &tri.v2);
    }
    for (start, end) in &segments {
        group(&mut out, 0, "LINE");
        group(&mut out, 8, FOOTPRINT_LAYER);
        point(&mut out, 0, start);
        point(&mut out, 1, end);
    }
    group(&mut out, 0, "ENDSEC");
    group(&mut out, 0, "EOF");

    DxfExport {
        text: out,
        face_count: mesh.faces.len(),
        footprint_segments: segments.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(text: &str, entity: &str) -> usize {
        text.lines().filter(|l| *l == entity).count()
    }

    #[test]
    fn test_closed_box_footprint_is_top_outline() {
        // Unit cube: the two top triangles face up, their outline is the square.
        let mesh = Mesh::from_raw(
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
        );
        let export = export_dxf_string(&mesh);
        assert_eq!(export.face_count, 12);
        assert_eq!(export.footprint_segments, 4);
        assert_eq!(count(&export.text, "3DFACE"), 12);
        assert_eq!(count(&export.text, "LINE"), 4);
        assert!(export.text.ends_with("0\nEOF\n"));

        // Every footprint line sits at z = 0.
        let entities = &export.text[export.text.find("ENTITIES").unwrap()..];
        let lines = &entities[entities.find("0\nLINE\n").unwrap()..];
        assert!(!lines.contains("30\n1.000000"));
        assert!(!lines.contains("31\n1.000000"));
    }

    #[test]
    fn test_downward_only_mesh_uses_all_faces() {
        let mesh = Mesh::from_raw(
            &[[0.0, 0.0, 2.0], [0.0, 1.0, 2.0], [1.0, 0.0, 2.0]],
            &[[0, 1, 2]],
        );
        let export = export_dxf_string(&mesh);
        assert_eq!(export.footprint_segments, 3);
        assert!(export.text.contains(FOOTPRINT_LAYER));
    }

    #[test]
    fn test_empty_mesh_gives_empty_document() {
        let export = export_dxf_string(&Mesh::new());
        assert_eq!(export.face_count, 0);
        assert_eq!(export.footprint_segments, 0);
        assert!(export.text.contains(MESH_LAYER));
        assert!(export.text.contains(FOOTPRINT_LAYER));
        assert!(export.text.contains("2\nENTITIES\n0\nENDSEC\n"));
        assert!(export.text.ends_with("0\nEOF\n"));
    }
}
