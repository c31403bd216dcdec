//! Binary glTF 2.0 (GLB) encoding and decoding.
//!
//! Export writes one mesh with one triangle primitive: a `POSITION` accessor
//! (FLOAT VEC3 with min/max) and an `indices` accessor (UNSIGNED_INT). Import
//! reads the first primitive of the first mesh, accepting u8/u16/u32 indices
//! and non-indexed primitives.

use serde_json::{Value, json};
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::{Mesh, Vertex};

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const GLB_VERSION: u32 = 2;
const GLB_CHUNK_JSON: u32 = 0x4E4F_534A; // "JSON"
const GLB_CHUNK_BIN: u32 = 0x004E_4942; // "BIN\0"

const UNSIGNED_BYTE: u64 = 5121;
const UNSIGNED_SHORT: u64 = 5123;
const UNSIGNED_INT: u64 = 5125;
const FLOAT: u64 = 5126;

const ARRAY_BUFFER: u32 = 34962;
const ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MODE_TRIANGLES: u64 = 4;

/// Whether `bytes` starts with the GLB magic.
pub fn is_glb(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && read_u32(bytes, 0) == Some(GLB_MAGIC)
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let slice = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn invalid(details: impl Into<String>) -> MeshError {
    MeshError::validation_failure("glb", details)
}

/// Encode a mesh as a GLB byte buffer.
pub fn encode_glb(mesh: &Mesh) -> MeshResult<Vec<u8>> {
    let mut bin = Vec::with_capacity(mesh.vertices.len() * 12 + mesh.faces.len() * 12);

    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for v in &mesh.vertices {
        let p = [v.position.x as f32, v.position.y as f32, v.position.z as f32];
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
            bin.extend_from_slice(&p[axis].to_le_bytes());
        }
    }
    if mesh.vertices.is_empty() {
        min = [0.0; 3];
        max = [0.0; 3];
    }

    let positions_len = bin.len();
    for face in &mesh.faces {
        for &index in face {
            bin.extend_from_slice(&index.to_le_bytes());
        }
    }
    let indices_len = bin.len() - positions_len;

    let document = json!({
        "asset": { "version": "2.0", "generator": "mesh-forge" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0 },
                "indices": 1,
                "mode": MODE_TRIANGLES
            }]
        }],
        "buffers": [{ "byteLength": bin.len() }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": positions_len, "target": ARRAY_BUFFER },
            { "buffer": 0, "byteOffset": positions_len, "byteLength": indices_len, "target": ELEMENT_ARRAY_BUFFER }
        ],
        "accessors": [
            {
                "bufferView": 0,
                "componentType": FLOAT,
                "count": mesh.vertices.len(),
                "type": "VEC3",
                "min": min,
                "max": max
            },
            {
                "bufferView": 1,
                "componentType": UNSIGNED_INT,
                "count": mesh.faces.len() * 3,
                "type": "SCALAR"
            }
        ]
    });

    let json_bytes =
        serde_json::to_vec(&document).map_err(|e| MeshError::encode_failed("glb", e.to_string()))?;

    let json_padded_len = (json_bytes.len() + 3) & !3;
    let bin_padded_len = (bin.len() + 3) & !3;
    let total_len = 12 + 8 + json_padded_len + 8 + bin_padded_len;

    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    buf.extend_from_slice(&GLB_VERSION.to_le_bytes());
    buf.extend_from_slice(&(total_len as u32).to_le_bytes());

    buf.extend_from_slice(&(json_padded_len as u32).to_le_bytes());
    buf.extend_from_slice(&GLB_CHUNK_JSON.to_le_bytes());
    buf.extend_from_slice(&json_bytes);
    buf.resize(buf.len() + json_padded_len - json_bytes.len(), b' ');

    buf.extend_from_slice(&(bin_padded_len as u32).to_le_bytes());
    buf.extend_from_slice(&GLB_CHUNK_BIN.to_le_bytes());
    buf.extend_from_slice(&bin);
    buf.resize(buf.len() + bin_padded_len - bin.len(), 0u8);

    debug!("Encoded GLB: {} bytes", buf.len());
    Ok(buf)
}

/// A view into the BIN chunk described by one accessor.
struct AccessorView<'a> {
    data: &'a [u8],
    count: usize,
    components: usize,
    component_type: u64,
    stride: usize,
}

impl<'a> AccessorView<'a> {
    fn resolve(root: &Value, bin: &'a [u8], index: usize) -> MeshResult<Self> {
        let accessor = root["accessors"]
            .get(index)
            .ok_or_else(|| invalid(format!("accessor {index} does not exist")))?;
        let view_index = accessor["bufferView"]
            .as_u64()
            .ok_or_else(|| invalid(format!("accessor {index} has no bufferView")))?
            as usize;
        let view = root["bufferViews"]
            .get(view_index)
            .ok_or_else(|| invalid(format!("bufferView {view_index} does not exist")))?;

        if view["buffer"].as_u64().unwrap_or(0) != 0 {
            return Err(invalid("only the embedded BIN buffer is supported"));
        }

        let components = match accessor["type"].as_str() {
            Some("SCALAR") => 1,
            Some("VEC2") => 2,
            Some("VEC3") => 3,
            Some("VEC4") => 4,
            other => return Err(invalid(format!("unsupported accessor type {other:?}"))),
        };
        let component_type = accessor["componentType"].as_u64().unwrap_or(0);
        let component_size = match component_type {
            UNSIGNED_BYTE => 1,
            UNSIGNED_SHORT => 2,
            UNSIGNED_INT | FLOAT => 4,
            other => return Err(invalid(format!("unsupported component type {other}"))),
        };

        let count = accessor["count"].as_u64().unwrap_or(0) as usize;
        let element_size = components * component_size;
        let stride = match view["byteStride"].as_u64() {
            Some(s) if s as usize >= element_size => s as usize,
            _ => element_size,
        };

        let start = view["byteOffset"].as_u64().unwrap_or(0) as usize
            + accessor["byteOffset"].as_u64().unwrap_or(0) as usize;
        let needed = if count == 0 {
            0
        } else {
            stride * (count - 1) + element_size
        };
        let data = bin
            .get(start..start + needed)
            .ok_or_else(|| invalid(format!("accessor {index} overruns the BIN chunk")))?;

        Ok(Self {
            data,
            count,
            components,
            component_type,
            stride,
        })
    }

    fn read_f32(&self) -> MeshResult<Vec<f32>> {
        if self.component_type != FLOAT {
            return Err(invalid("POSITION accessor must be FLOAT"));
        }
        let mut out = Vec::with_capacity(self.count * self.components);
        for i in 0..self.count {
            for c in 0..self.components {
                let off = i * self.stride + c * 4;
                let b = &self.data[off..off + 4];
                out.push(f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
            }
        }
        Ok(out)
    }

    fn read_indices(&self) -> MeshResult<Vec<u32>> {
        let mut out = Vec::with_capacity(self.count);
        for i in 0..self.count {
            let off = i * self.stride;
            let value = match self.component_type {
                UNSIGNED_BYTE => self.data[off] as u32,
                UNSIGNED_SHORT => u16::from_le_bytes([self.data[off], self.data[off + 1]]) as u32,
                UNSIGNED_INT => u32::from_le_bytes([
                    self.data[off],
                    self.data[off + 1],
                    self.data[off + 2],
                    self.data[off + 3],
                ]),
                _ => return Err(invalid("indices must be an unsigned integer accessor")),
            };
            out.push(value);
        }
        Ok(out)
    }
}

/// Decode a GLB byte buffer.
pub fn decode_glb(data: &[u8]) -> MeshResult<Mesh> {
    if data.len() < 12 {
        return Err(invalid("too short for a GLB header"));
    }
    if !is_glb(data) {
        return Err(invalid("missing glTF magic"));
    }

    let mut json_chunk: Option<&[u8]> = None;
    let mut bin_chunk: Option<&[u8]> = None;
    let mut offset = 12usize;

    while let (Some(chunk_len), Some(chunk_type)) = (read_u32(data, offset), read_u32(data, offset + 4)) {
        offset += 8;
        let Some(chunk) = data.get(offset..offset + chunk_len as usize) else {
            return Err(invalid("chunk length exceeds file size"));
        };
        match chunk_type {
            GLB_CHUNK_JSON => json_chunk = Some(chunk),
            GLB_CHUNK_BIN => bin_chunk = Some(chunk),
            _ => {}
        }
        offset += chunk_len as usize;
    }

    let json_bytes = json_chunk.ok_or_else(|| invalid("missing JSON chunk"))?;
    let bin = bin_chunk.unwrap_or(&[]);
    let root: Value =
        serde_json::from_slice(json_bytes).map_err(|e| invalid(format!("invalid glTF JSON: {e}")))?;

    let primitive = root["meshes"]
        .get(0)
        .and_then(|m| m["primitives"].get(0))
        .ok_or_else(|| invalid("no mesh primitive"))?;

    let mode = primitive["mode"].as_u64().unwrap_or(MODE_TRIANGLES);
    if mode != MODE_TRIANGLES {
        return Err(invalid(format!("primitive mode {mode} is not TRIANGLES")));
    }

    let position_index = primitive["attributes"]["POSITION"]
        .as_u64()
        .ok_or_else(|| invalid("primitive has no POSITION attribute"))? as usize;
    let positions = AccessorView::resolve(&root, bin, position_index)?;
    if positions.components != 3 {
        return Err(invalid("POSITION accessor must be VEC3"));
    }
    let coords = positions.read_f32()?;

    let indices = match primitive["indices"].as_u64() {
        Some(index) => AccessorView::resolve(&root, bin, index as usize)?.read_indices()?,
        None => (0..positions.count as u32).collect(),
    };

    let mut mesh = Mesh::with_capacity(positions.count, indices.len() / 3);
    for p in coords.chunks_exact(3) {
        mesh.vertices
            .push(Vertex::from_coords(p[0] as f64, p[1] as f64, p[2] as f64));
    }
    for tri in indices.chunks_exact(3) {
        mesh.faces.push([tri[0], tri[1], tri[2]]);
    }

    debug!(
        "Decoded GLB: {} vertices, {} faces",
        mesh.vertices.len(),
        mesh.faces.len()
    );
    Ok(mesh)
}
