//! Mesh topology queries via adjacency structures.

use hashbrown::{HashMap, HashSet};

/// Canonical (min, max) key for an undirected edge.
#[inline]
pub fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

/// Lightweight topology structure for mesh queries.
///
/// Provides lookups for vertex-to-face and edge-to-face relationships
/// without the overhead of a full half-edge data structure.
#[derive(Debug, Clone, Default)]
pub struct MeshAdjacency {
    /// Maps vertex index → list of face indices that use this vertex.
    pub vertex_to_faces: HashMap<u32, Vec<u32>>,

    /// Maps edge (min_idx, max_idx) → list of face indices that share this edge.
    pub edge_to_faces: HashMap<(u32, u32), Vec<u32>>,
}

impl MeshAdjacency {
    /// Build adjacency structures from a face list.
    pub fn build(faces: &[[u32; 3]]) -> Self {
        let mut vertex_to_faces: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut edge_to_faces: HashMap<(u32, u32), Vec<u32>> =
            HashMap::with_capacity(faces.len() * 3 / 2);

        for (face_idx, &[v0, v1, v2]) in faces.iter().enumerate() {
            let face_idx = face_idx as u32;

            vertex_to_faces.entry(v0).or_default().push(face_idx);
            vertex_to_faces.entry(v1).or_default().push(face_idx);
            vertex_to_faces.entry(v2).or_default().push(face_idx);

            for (a, b) in [(v0, v1), (v1, v2), (v2, v0)] {
                edge_to_faces.entry(edge_key(a, b)).or_default().push(face_idx);
            }
        }

        Self {
            vertex_to_faces,
            edge_to_faces,
        }
    }

    /// Number of distinct undirected edges.
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_to_faces.len()
    }

    /// Find boundary edges (edges with exactly 1 adjacent face).
    pub fn boundary_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() == 1)
            .map(|(&edge, _)| edge)
    }

    /// Find non-manifold edges (edges with more than 2 adjacent faces).
    pub fn non_manifold_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() > 2)
            .map(|(&edge, _)| edge)
    }

    /// Check if every edge has at most 2 faces.
    ///
    /// Edge-manifoldness only; see [`non_manifold_vertices`](Self::non_manifold_vertices)
    /// for bow-tie vertices.
    pub fn is_manifold(&self) -> bool {
        self.edge_to_faces.values().all(|faces| faces.len() <= 2)
    }

    /// Check if the mesh is watertight (no boundary edges).
    pub fn is_watertight(&self) -> bool {
        !self.edge_to_faces.is_empty()
            && self.edge_to_faces.values().all(|faces| faces.len() >= 2)
    }

    /// Count boundary edges.
    pub fn boundary_edge_count(&self) -> usize {
        self.edge_to_faces
            .values()
            .filter(|faces| faces.len() == 1)
            .count()
    }

    /// Count non-manifold edges.
    pub fn non_manifold_edge_count(&self) -> usize {
        self.edge_to_faces
            .values()
            .filter(|faces| faces.len() > 2)
            .count()
    }

    /// Get faces adjacent to a vertex.
    pub fn faces_for_vertex(&self, vertex_idx: u32) -> Option<&[u32]> {
        self.vertex_to_faces.get(&vertex_idx).map(|v| v.as_slice())
    }

    /// Get faces adjacent to an edge.
    /// The edge is automatically canonicalized (min, max).
    pub fn faces_for_edge(&self, v0: u32, v1: u32) -> Option<&[u32]> {
        self.edge_to_faces
            .get(&edge_key(v0, v1))
            .map(|v| v.as_slice())
    }

    /// Find vertices on boundary edges.
    pub fn boundary_vertices(&self) -> HashSet<u32> {
        self.boundary_edges().flat_map(|(a, b)| [a, b]).collect()
    }

    /// Vertices whose incident faces form more than one edge-connected fan
    /// (bow-tie vertices).
    pub fn non_manifold_vertices(&self, faces: &[[u32; 3]]) -> Vec<u32> {
        let mut result = Vec::new();

        for (&vertex, incident) in &self.vertex_to_faces {
            if incident.len() < 2 {
                continue;
            }

            // Flood fill across faces that share an edge through `vertex`.
            let mut visited: HashSet<u32> = HashSet::with_capacity(incident.len());
            let mut stack = vec![incident[0]];
            visited.insert(incident[0]);

            while let Some(face_idx) = stack.pop() {
                let face = faces[face_idx as usize];
                for other in face {
                    if other == vertex {
                        continue;
                    }
                    if let Some(neighbors) = self.faces_for_edge(vertex, other) {
                        for &n in neighbors {
                            if visited.insert(n) {
                                stack.push(n);
                            }
                        }
                    }
                }
            }

            if visited.len() < incident.len() {
                result.push(vertex);
            }
        }

        result.sort_unstable();
        result
    }

    /// Unique vertex neighbors (sharing an edge) for every vertex, indexed by vertex.
    pub fn vertex_neighbors(faces: &[[u32; 3]], vertex_count: usize) -> Vec<Vec<u32>> {
        let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); vertex_count];

        for &[a, b, c] in faces {
            for (from, to) in [(a, b), (b, c), (c, a)] {
                neighbors[from as usize].push(to);
                neighbors[to as usize].push(from);
            }
        }

        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }

        neighbors
    }
}
