//! Built-in STEP (ISO 10303-21) writer.
//!
//! Triangle meshes are written as faceted B-rep through the truck CAD kernel:
//! every triangle becomes a planar face bounded by three line edges, and edges
//! are shared between neighbouring faces. A closed oriented shell is written as
//! a solid, anything else as a shell.
//!
//! This is a lower-fidelity placeholder for the external converter's output:
//! there is no surface fitting, so a CAD system sees thousands of planar
//! facets rather than analytic surfaces. The file carries a comment saying so.

use hashbrown::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, warn};
use truck_geometry::specifieds::{Line, Plane};
use truck_modeling::topology::{Edge, Face, Shell, Solid, Vertex, Wire};
use truck_modeling::{Curve, InnerSpace, Point3, ShellCondition, Surface};
use truck_stepio::out::{CompleteStepDisplay, StepHeaderDescriptor, StepModel};

use crate::adjacency::edge_key;
use crate::validate::validate_mesh;
use crate::Mesh;

const PLACEHOLDER_NOTE: &str = "/* mesh-forge built-in writer: faceted B-rep, one planar face per \
triangle. Lower fidelity than a kernel-based converter; no analytic surfaces. */";

/// Parameters for STEP export.
#[derive(Debug, Clone)]
pub struct StepExportParams {
    /// Organization system recorded in the header.
    pub organization: String,
    /// Write a closed, oriented mesh as a solid instead of a shell.
    pub prefer_solid: bool,
}

impl Default for StepExportParams {
    fn default() -> Self {
        Self {
            organization: "mesh-forge".to_string(),
            prefer_solid: true,
        }
    }
}

/// STEP text and what went into it.
#[derive(Debug, Clone)]
pub struct StepExport {
    pub text: String,
    /// Faces written (degenerate triangles are skipped).
    pub face_count: usize,
    pub exported_as_solid: bool,
}

/// Build a truck shell with one planar face per non-degenerate triangle.
fn mesh_to_shell(mesh: &Mesh) -> Shell {
    let vertices: Vec<Vertex> = mesh
        .vertices
        .iter()
        .map(|v| Vertex::new(Point3::new(v.position.x, v.position.y, v.position.z)))
        .collect();

    // Edges stored in (low, high) direction; the other direction uses `inverse`.
    let mut edges: HashMap<(u32, u32), Edge> = HashMap::new();
    let mut edge = |a: u32, b: u32| -> Edge {
        let key = edge_key(a, b);
        let stored = edges
            .entry(key)
            .or_insert_with(|| {
                let (v0, v1) = (&vertices[key.0 as usize], &vertices[key.1 as usize]);
                let line: Curve = Line(v0.point(), v1.point()).into();
                Edge::new(v0, v1, line)
            })
            .clone();
        if key.0 == a { stored } else { stored.inverse() }
    };

    let mut faces = Vec::with_capacity(mesh.faces.len());
    for &[a, b, c] in &mesh.faces {
        let (p0, p1, p2) = (
            vertices[a as usize].point(),
            vertices[b as usize].point(),
            vertices[c as usize].point(),
        );
        if (p1 - p0).cross(p2 - p0).magnitude2() < 1e-20 {
            continue;
        }

        let wire = Wire::from(vec![edge(a, b), edge(b, c), edge(c, a)]);
        let plane: Surface = Plane::new(p0, p1, p2).into();
        match Face::try_new(vec![wire], plane) {
            Ok(face) => faces.push(face),
            Err(e) => debug!("STEP: skipping face {:?}: {:?}", [a, b, c], e),
        }
    }

    Shell::from(faces)
}

/// Header-only exchange file with an empty DATA section.
fn empty_document(organization: &str) -> String {
    let escape = |s: &str| s.replace('\'', "''");
    format!(
        "ISO-10303-21;\n{note}\nHEADER;\n\
         FILE_DESCRIPTION(('empty model'), '2;1');\n\
         FILE_NAME('', '', (''), (''), '', '{system}', '');\n\
         FILE_SCHEMA(('AUTOMOTIVE_DESIGN {{ 1 0 10303 214 1 1 1 1 }}'));\n\
         ENDSEC;\nDATA;\nENDSEC;\nEND-ISO-10303-21;\n",
        note = PLACEHOLDER_NOTE,
        system = escape(organization),
    )
}

fn header(params: &StepExportParams) -> StepHeaderDescriptor {
    StepHeaderDescriptor {
        organization_system: params.organization.clone(),
        ..Default::default()
    }
}

/// Insert the fidelity note right after the exchange-structure keyword.
fn with_placeholder_note(mut text: String) -> String {
    const KEYWORD: &str = "ISO-10303-21;";
    match text.find(KEYWORD) {
        Some(pos) => text.insert_str(pos + KEYWORD.len(), &format!("\n{}", PLACEHOLDER_NOTE)),
        None => text.insert_str(0, &format!("{}\n", PLACEHOLDER_NOTE)),
    }
    text
}

/// Export a mesh as STEP text.
///
/// Meshes with no usable faces give a header-only file with an empty DATA section.
pub fn export_step_string(mesh: &Mesh, params: &StepExportParams) -> StepExport {
    let shell = mesh_to_shell(mesh);
    let face_count = shell.face_iter().count();
    if face_count == 0 {
        warn!("STEP: no non-degenerate faces, writing an empty model");
        return StepExport {
            text: empty_document(&params.organization),
            face_count,
            exported_as_solid: false,
        };
    }
    let closed = validate_mesh(mesh).is_watertight
        && matches!(
            shell.shell_condition(),
            ShellCondition::Closed | ShellCondition::Oriented
        );

    if params.prefer_solid && closed {
        let candidate = shell.clone();
        // Solid::new panics on shells it considers invalid.
        match catch_unwind(AssertUnwindSafe(move || Solid::new(vec![candidate]))) {
            Ok(solid) => {
                let compressed = solid.compress();
                let text =
                    CompleteStepDisplay::new(StepModel::from(&compressed), header(params)).to_string();
                return StepExport {
                    text: with_placeholder_note(text),
                    face_count,
                    exported_as_solid: true,
                };
            }
            Err(_) => warn!("STEP: shell rejected as a solid, writing it as a shell"),
        }
    }

    let compressed = shell.compress();
    let text = CompleteStepDisplay::new(StepModel::from(&compressed), header(params)).to_string();
    StepExport {
        text: with_placeholder_note(text),
        face_count,
        exported_as_solid: false,
    }
}
