//! Mesh encoding and decoding for GLB, STL, OBJ and PLY.
//!
//! The pipeline works on bytes: [`decode`] and [`encode`] convert between a
//! [`Mesh`] and an in-memory buffer of a given [`MeshFormat`]. [`load_mesh`] and
//! [`save_mesh`] are thin path wrappers on top.
//!
//! STEP and DXF are export-only and are produced by the conversion router
//! (see [`crate::convert`]).

use std::fmt::Write as _;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::tracing_ext::log_io_operation;
use crate::validate::{ValidationOptions, validate_mesh_data};
use crate::{Mesh, Vertex, glb};

/// Mesh formats known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum MeshFormat {
    /// Binary glTF 2.0, the primary interchange format.
    #[cfg_attr(feature = "pipeline-config", serde(alias = "gltf-binary"))]
    Glb,
    /// Stereolithography, binary or ASCII.
    Stl,
    /// Wavefront OBJ.
    Obj,
    /// Stanford polygon format, ASCII or binary.
    Ply,
    /// STEP (ISO 10303-21) solid exchange. Export only.
    #[cfg_attr(feature = "pipeline-config", serde(alias = "stp"))]
    Step,
    /// AutoCAD DXF drafting exchange. Export only.
    Dxf,
}

impl MeshFormat {
    /// All formats in capability-table order.
    pub fn all() -> [MeshFormat; 6] {
        [
            MeshFormat::Glb,
            MeshFormat::Stl,
            MeshFormat::Obj,
            MeshFormat::Ply,
            MeshFormat::Step,
            MeshFormat::Dxf,
        ]
    }

    /// Canonical lowercase tag.
    pub fn tag(self) -> &'static str {
        match self {
            MeshFormat::Glb => "glb",
            MeshFormat::Stl => "stl",
            MeshFormat::Obj => "obj",
            MeshFormat::Ply => "ply",
            MeshFormat::Step => "step",
            MeshFormat::Dxf => "dxf",
        }
    }

    /// File extension used when writing this format.
    pub fn extension(self) -> &'static str {
        self.tag()
    }

    /// Whether the format is a triangle mesh format that can be decoded and encoded directly.
    pub fn is_polygon(self) -> bool {
        matches!(
            self,
            MeshFormat::Glb | MeshFormat::Stl | MeshFormat::Obj | MeshFormat::Ply
        )
    }

    /// Parse a format tag or file extension (case-insensitive).
    pub fn from_tag(tag: &str) -> MeshResult<Self> {
        match tag.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "glb" | "gltf-binary" => Ok(MeshFormat::Glb),
            "stl" => Ok(MeshFormat::Stl),
            "obj" => Ok(MeshFormat::Obj),
            "ply" => Ok(MeshFormat::Ply),
            "step" | "stp" => Ok(MeshFormat::Step),
            "dxf" => Ok(MeshFormat::Dxf),
            _ => Err(MeshError::unsupported_format(tag)),
        }
    }

    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| Self::from_tag(ext).ok())
    }

    /// Sniff a polygon format from the leading bytes of a buffer.
    ///
    /// Binary STL is recognised by its size (84-byte header plus 50 bytes per
    /// triangle) before the ASCII `solid` keyword, because binary headers often
    /// start with `solid` too.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if glb::is_glb(bytes) {
            return Some(MeshFormat::Glb);
        }
        if bytes.starts_with(b"ply\n") || bytes.starts_with(b"ply\r\n") {
            return Some(MeshFormat::Ply);
        }
        if bytes.len() >= 84 {
            let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
            if count > 0 && bytes.len() == 84 + count * 50 {
                return Some(MeshFormat::Stl);
            }
        }

        let head = &bytes[..bytes.len().min(4096)];
        let text = String::from_utf8_lossy(head);
        if text.trim_start().starts_with("solid") {
            return Some(MeshFormat::Stl);
        }
        if text
            .lines()
            .any(|line| line.starts_with("v ") || line.starts_with("v\t"))
        {
            return Some(MeshFormat::Obj);
        }
        None
    }
}

impl FromStr for MeshFormat {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s)
    }
}

impl std::fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Decode `bytes` as a mesh in `format`.
///
/// Fails with `ValidationFailure` when the bytes cannot be parsed, when the
/// decoded mesh has no faces, or when it references missing vertices or holds
/// non-finite coordinates. STEP and DXF cannot be decoded.
pub fn decode(bytes: &[u8], format: MeshFormat) -> MeshResult<Mesh> {
    let mesh = match format {
        MeshFormat::Glb => glb::decode_glb(bytes)?,
        MeshFormat::Stl => decode_stl(bytes)?,
        MeshFormat::Obj => decode_obj(bytes)?,
        MeshFormat::Ply => decode_ply(bytes)?,
        MeshFormat::Step | MeshFormat::Dxf => {
            return Err(MeshError::unsupported_format(format!(
                "{} (export only)",
                format
            )));
        }
    };

    if mesh.faces.is_empty() {
        return Err(MeshError::validation_failure(
            format.tag(),
            "decoded mesh has no faces",
        ));
    }
    validate_mesh_data(&mesh, &ValidationOptions::default())
        .map_err(|e| MeshError::validation_failure(format.tag(), e.to_string()))?;

    debug!(
        "Decoded {}: {} vertices, {} faces",
        format,
        mesh.vertex_count(),
        mesh.face_count()
    );
    Ok(mesh)
}

/// Decode bytes of unknown format, sniffing it with [`MeshFormat::detect`].
pub fn decode_auto(bytes: &[u8]) -> MeshResult<(Mesh, MeshFormat)> {
    let format = MeshFormat::detect(bytes).ok_or_else(|| {
        MeshError::validation_failure("unknown", "bytes do not match any recognized mesh format")
    })?;
    Ok((decode(bytes, format)?, format))
}

/// Encode a mesh into one of the polygon formats.
pub fn encode(mesh: &Mesh, format: MeshFormat) -> MeshResult<Vec<u8>> {
    match format {
        MeshFormat::Glb => glb::encode_glb(mesh),
        MeshFormat::Stl => encode_stl(mesh),
        MeshFormat::Obj => Ok(encode_obj(mesh).into_bytes()),
        MeshFormat::Ply => encode_ply(mesh),
        MeshFormat::Step | MeshFormat::Dxf => Err(MeshError::unsupported_format(format!(
            "{} (use the conversion router)",
            format
        ))),
    }
}

/// Load a mesh from a file, choosing the format by extension or by content.
pub fn load_mesh(path: &Path) -> MeshResult<Mesh> {
    let bytes = std::fs::read(path).map_err(|e| MeshError::io_read(path, e))?;
    let format = match MeshFormat::from_path(path) {
        Some(format) => format,
        None => MeshFormat::detect(&bytes).ok_or_else(|| {
            MeshError::unsupported_format(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("<none>"),
            )
        })?,
    };

    info!("Loading mesh from {:?} (format: {})", path, format);
    let result = decode(&bytes, format);
    log_io_operation("load", path, format.tag(), result.is_ok());
    let mesh = result?;

    if let Some((min, max)) = mesh.bounds() {
        let dims = max - min;
        debug!("Dimensions: {:.3} x {:.3} x {:.3}", dims.x, dims.y, dims.z);
        if dims.x.max(dims.y).max(dims.z) < 1e-6 {
            warn!("Mesh extent is below 1e-6; tolerances may collapse it");
        }
    }
    Ok(mesh)
}

/// Save a mesh to a file in the polygon format named by its extension.
pub fn save_mesh(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    let format = MeshFormat::from_path(path).ok_or_else(|| {
        MeshError::unsupported_format(
            path.extension()
                .and_then(|e| e.to_str())
                .unwrap_or("<none>"),
        )
    })?;

    let bytes = encode(mesh, format)?;
    let result = std::fs::write(path, &bytes).map_err(|e| MeshError::io_write(path, e));
    log_io_operation("save", path, format.tag(), result.is_ok());
    result?;

    info!(
        "Saved {} vertices and {} faces to {:?}",
        mesh.vertex_count(),
        mesh.face_count(),
        path
    );
    Ok(())
}

fn decode_stl(bytes: &[u8]) -> MeshResult<Mesh> {
    let mut reader = Cursor::new(bytes);
    let stl = stl_io::read_stl(&mut reader)
        .map_err(|e| MeshError::validation_failure("stl", e.to_string()))?;

    let mut mesh = Mesh::with_capacity(stl.vertices.len(), stl.faces.len());
    for v in &stl.vertices {
        mesh.vertices.push(Vertex::from_coords(
            v.0[0] as f64,
            v.0[1] as f64,
            v.0[2] as f64,
        ));
    }

    let mut collapsed = 0usize;
    for face in &stl.faces {
        let indices = [
            face.vertices[0] as u32,
            face.vertices[1] as u32,
            face.vertices[2] as u32,
        ];
        // stl_io merges identical corners, so a zero-extent facet arrives as a repeated index.
        if indices[0] != indices[1] && indices[1] != indices[2] && indices[0] != indices[2] {
            mesh.faces.push(indices);
        } else {
            collapsed += 1;
        }
    }
    if collapsed > 0 {
        debug!("STL: dropped {} facets with repeated corners", collapsed);
    }

    Ok(mesh)
}

fn encode_stl(mesh: &Mesh) -> MeshResult<Vec<u8>> {
    let triangles: Vec<stl_io::Triangle> = mesh
        .triangles()
        .map(|tri| {
            let n = tri.normal().unwrap_or_else(Vector3::zeros);
            let corner = |p: nalgebra::Point3<f64>| stl_io::Vertex::new([p.x as f32, p.y as f32, p.z as f32]);
            stl_io::Triangle {
                normal: stl_io::Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                vertices: [corner(tri.v0), corner(tri.v1), corner(tri.v2)],
            }
        })
        .collect();

    let mut out = Vec::with_capacity(84 + triangles.len() * 50);
    stl_io::write_stl(&mut out, triangles.iter())
        .map_err(|e| MeshError::encode_failed("stl", e.to_string()))?;
    Ok(out)
}

fn decode_obj(bytes: &[u8]) -> MeshResult<Mesh> {
    let mut reader = Cursor::new(bytes);
    let (models, _materials) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        // Material libraries are external files; in-memory input has none.
        |_| Err(tobj::LoadError::OpenFileFailed),
    )
    .map_err(|e| MeshError::validation_failure("obj", e.to_string()))?;

    let mut mesh = Mesh::new();
    for model in &models {
        let offset = mesh.vertices.len() as u32;
        let obj_mesh = &model.mesh;

        for chunk in obj_mesh.positions.chunks_exact(3) {
            mesh.vertices.push(Vertex::from_coords(
                chunk[0] as f64,
                chunk[1] as f64,
                chunk[2] as f64,
            ));
        }
        for chunk in obj_mesh.indices.chunks_exact(3) {
            mesh.faces
                .push([chunk[0] + offset, chunk[1] + offset, chunk[2] + offset]);
        }
    }

    debug!("OBJ: merged {} model(s)", models.len());
    Ok(mesh)
}

/// OBJ text with `v`, optional `vn`, and 1-based `f` records.
fn encode_obj(mesh: &Mesh) -> String {
    let has_normals = mesh.vertices.iter().any(|v| v.normal.is_some());
    let mut out = String::with_capacity(mesh.vertices.len() * 40 + mesh.faces.len() * 24);

    // Writing into a String cannot fail.
    let _ = writeln!(out, "# mesh-forge");
    let _ = writeln!(out, "# Vertices: {}", mesh.vertices.len());
    let _ = writeln!(out, "# Faces: {}", mesh.faces.len());

    for v in &mesh.vertices {
        let _ = writeln!(
            out,
            "v {} {} {}",
            v.position.x, v.position.y, v.position.z
        );
    }
    if has_normals {
        for v in &mesh.vertices {
            let n = v.normal.unwrap_or_else(Vector3::zeros);
            let _ = writeln!(out, "vn {:.6} {:.6} {:.6}", n.x, n.y, n.z);
        }
    }
    for face in &mesh.faces {
        let [a, b, c] = face.map(|i| i + 1);
        if has_normals {
            let _ = writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}");
        } else {
            let _ = writeln!(out, "f {a} {b} {c}");
        }
    }
    out
}

fn decode_ply(bytes: &[u8]) -> MeshResult<Mesh> {
    use ply_rs::parser::Parser;
    use ply_rs::ply::{DefaultElement, Property};

    let mut reader = Cursor::new(bytes);
    let parser = Parser::<DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| MeshError::validation_failure("ply", e.to_string()))?;

    let mut mesh = Mesh::new();

    if let Some(vertices) = ply.payload.get("vertex") {
        mesh.vertices.reserve(vertices.len());
        for element in vertices {
            let x = ply_scalar(element.get("x"), "x")?;
            let y = ply_scalar(element.get("y"), "y")?;
            let z = ply_scalar(element.get("z"), "z")?;
            let mut vertex = Vertex::from_coords(x, y, z);

            if let (Ok(nx), Ok(ny), Ok(nz)) = (
                ply_scalar(element.get("nx"), "nx"),
                ply_scalar(element.get("ny"), "ny"),
                ply_scalar(element.get("nz"), "nz"),
            ) {
                vertex.normal = Some(Vector3::new(nx, ny, nz));
            }
            mesh.vertices.push(vertex);
        }
    }

    if let Some(faces) = ply.payload.get("face") {
        for element in faces {
            let list = element
                .get("vertex_indices")
                .or_else(|| element.get("vertex_index"));
            let indices: Vec<i64> = match list {
                Some(Property::ListInt(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListUInt(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListShort(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListUShort(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListUChar(v)) => v.iter().map(|&i| i as i64).collect(),
                Some(Property::ListChar(v)) => v.iter().map(|&i| i as i64).collect(),
                _ => return Err(MeshError::validation_failure("ply", "face without vertex_indices")),
            };
            if indices.iter().any(|&i| i < 0 || i > u32::MAX as i64) {
                return Err(MeshError::validation_failure("ply", "negative vertex index"));
            }
            // Fan-triangulate polygons.
            for i in 1..indices.len().saturating_sub(1) {
                mesh.faces.push([
                    indices[0] as u32,
                    indices[i] as u32,
                    indices[i + 1] as u32,
                ]);
            }
        }
    }

    Ok(mesh)
}

fn ply_scalar(prop: Option<&ply_rs::ply::Property>, name: &str) -> MeshResult<f64> {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::Float(v)) => Ok(*v as f64),
        Some(Property::Double(v)) => Ok(*v),
        Some(Property::Int(v)) => Ok(*v as f64),
        Some(Property::UInt(v)) => Ok(*v as f64),
        Some(Property::Short(v)) => Ok(*v as f64),
        Some(Property::UShort(v)) => Ok(*v as f64),
        Some(Property::Char(v)) => Ok(*v as f64),
        Some(Property::UChar(v)) => Ok(*v as f64),
        _ => Err(MeshError::validation_failure(
            "ply",
            format!("missing or invalid vertex property {}", name),
        )),
    }
}

/// Binary little-endian PLY with float positions (and normals when present).
fn encode_ply(mesh: &Mesh) -> MeshResult<Vec<u8>> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };
    use ply_rs::writer::Writer;

    let has_normals = mesh.vertices.iter().any(|v| v.normal.is_some());
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::BinaryLittleEndian;

    let float = || PropertyType::Scalar(ScalarType::Float);
    let mut vertex_def = ElementDef::new("vertex".to_string());
    for name in ["x", "y", "z"] {
        vertex_def.properties.add(PropertyDef::new(name.to_string(), float()));
    }
    if has_normals {
        for name in ["nx", "ny", "nz"] {
            vertex_def.properties.add(PropertyDef::new(name.to_string(), float()));
        }
    }
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::UInt),
    ));
    ply.header.elements.add(face_def);

    let vertices: Vec<DefaultElement> = mesh
        .vertices
        .iter()
        .map(|v| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Float(v.position.x as f32));
            element.insert("y".to_string(), Property::Float(v.position.y as f32));
            element.insert("z".to_string(), Property::Float(v.position.z as f32));
            if has_normals {
                let n = v.normal.unwrap_or_else(Vector3::zeros);
                element.insert("nx".to_string(), Property::Float(n.x as f32));
                element.insert("ny".to_string(), Property::Float(n.y as f32));
                element.insert("nz".to_string(), Property::Float(n.z as f32));
            }
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    let faces: Vec<DefaultElement> = mesh
        .faces
        .iter()
        .map(|face| {
            let mut element = DefaultElement::new();
            element.insert(
                "vertex_indices".to_string(),
                Property::ListUInt(face.to_vec()),
            );
            element
        })
        .collect();
    ply.payload.insert("face".to_string(), faces);

    ply.make_consistent()
        .map_err(|e| MeshError::encode_failed("ply", format!("{:?}", e)))?;

    let mut out = Vec::new();
    Writer::new()
        .write_ply(&mut out, &mut ply)
        .map_err(|e| MeshError::encode_failed("ply", e.to_string()))?;
    Ok(out)
}
