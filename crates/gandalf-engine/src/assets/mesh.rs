//! Mesh library.
//!
//! Geometry is immutable once built and keyed by a BLAKE3 hash of its
//! attribute bytes. The renderer batches draws by that hash, so two entities
//! with byte-identical meshes share one vertex buffer and one draw call.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::AssetError;

/// Floats per interleaved vertex: position, normal, uv.
pub const VERTEX_STRIDE_FLOATS: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    /// Number of vertices a draw call consumes.
    pub fn element_count(&self) -> u32 {
        if self.is_indexed() {
            self.indices.len() as u32
        } else {
            self.vertices.len() as u32
        }
    }

    /// Attribute arrays must match in length and indices must be in range.
    pub fn validate(&self, name: &str) -> Result<(), AssetError> {
        let invalid = |details: String| AssetError::InvalidMesh {
            name: name.to_owned(),
            details,
        };
        let n = self.vertices.len();
        if n == 0 {
            return Err(invalid("mesh has no vertices".into()));
        }
        if self.normals.len() != n || self.uvs.len() != n {
            return Err(invalid(format!(
                "{n} vertices, {} normals, {} uvs",
                self.normals.len(),
                self.uvs.len()
            )));
        }
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= n) {
            return Err(invalid(format!("index {bad} out of range for {n} vertices")));
        }
        Ok(())
    }

    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        // Length prefixes keep array boundaries in the digest.
        for bytes in [
            bytemuck::cast_slice::<_, u8>(&self.vertices),
            bytemuck::cast_slice(&self.normals),
            bytemuck::cast_slice(&self.uvs),
            bytemuck::cast_slice(&self.indices),
        ] {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// `[px, py, pz, nx, ny, nz, u, v]` per vertex.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.vertices.len() * VERTEX_STRIDE_FLOATS);
        for ((p, n), uv) in self.vertices.iter().zip(&self.normals).zip(&self.uvs) {
            out.extend_from_slice(p);
            out.extend_from_slice(n);
            out.extend_from_slice(uv);
        }
        out
    }
}

#[derive(Debug)]
pub struct MeshInstance {
    pub name: String,
    pub hash: String,
    pub data: MeshData,
}

/// External mesh importer (OBJ, USD, ...).
///
/// Implementations return attribute arrays of matching length; the library
/// validates before caching.
pub trait MeshLoader {
    fn load(&self, path: &Path) -> Result<MeshData, String>;
}

// ---------------------------------------------------------------------------
// MeshLib
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MeshLib {
    by_hash: HashMap<String, Rc<MeshInstance>>,
    by_name: HashMap<String, Rc<MeshInstance>>,
}

impl MeshLib {
    pub fn new() -> Self {
        Self::default()
    }

    /// A library holding the `cube`, `plane` and `quad` primitives.
    pub fn with_primitives() -> Self {
        let mut lib = Self::new();
        for (name, data) in [
            (primitives::CUBE, primitives::cube()),
            (primitives::PLANE, primitives::plane()),
            (primitives::QUAD, primitives::quad()),
        ] {
            if let Err(err) = lib.build(name, data) {
                tracing::error!(%err, "built-in primitive rejected");
            }
        }
        lib
    }

    /// Register `data` as `name`, sharing an existing instance with the same
    /// content hash.
    pub fn build(&mut self, name: &str, data: MeshData) -> Result<Rc<MeshInstance>, AssetError> {
        data.validate(name)?;
        let hash = data.content_hash();
        let instance = match self.by_hash.get(&hash) {
            Some(existing) => {
                tracing::debug!(mesh = name, instance = %existing.name, "mesh alias registered");
                existing.clone()
            }
            None => {
                let instance = Rc::new(MeshInstance {
                    name: name.to_owned(),
                    hash: hash.clone(),
                    data,
                });
                tracing::debug!(
                    mesh = name,
                    vertices = instance.data.vertex_count(),
                    indices = instance.data.indices.len(),
                    "mesh built"
                );
                self.by_hash.insert(hash, instance.clone());
                instance
            }
        };
        self.by_name.insert(name.to_owned(), instance.clone());
        Ok(instance)
    }

    /// Import `path` through `loader` and register the result as `name`.
    pub fn load(
        &mut self,
        name: &str,
        path: &Path,
        loader: &dyn MeshLoader,
    ) -> Result<Rc<MeshInstance>, AssetError> {
        if let Some(existing) = self.by_name.get(name) {
            return Ok(existing.clone());
        }
        let data = loader.load(path).map_err(|details| AssetError::Loader {
            path: path.to_path_buf(),
            details,
        })?;
        self.build(name, data)
    }

    pub fn get(&self, name: &str) -> Option<Rc<MeshInstance>> {
        let found = self.by_name.get(name).cloned();
        if found.is_none() {
            tracing::warn!(mesh = name, "mesh not found");
        }
        found
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Number of distinct geometries.
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

pub mod primitives {
    use super::MeshData;

    pub const CUBE: &str = "cube";
    pub const PLANE: &str = "plane";
    pub const QUAD: &str = "quad";

    /// Unit cube centred on the origin, 24 vertices so every face has its
    /// own normals.
    pub fn cube() -> MeshData {
        // (normal, tangent u, tangent v) per face.
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];
        let mut mesh = MeshData::default();
        for (face, (n, u, v)) in FACES.iter().enumerate() {
            let base = (face * 4) as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let p = [
                    0.5 * (n[0] + su * u[0] + sv * v[0]),
                    0.5 * (n[1] + su * u[1] + sv * v[1]),
                    0.5 * (n[2] + su * u[2] + sv * v[2]),
                ];
                mesh.vertices.push(p);
                mesh.normals.push(*n);
                mesh.uvs.push([(su + 1.0) * 0.5, (sv + 1.0) * 0.5]);
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// Unit plane in XZ facing +Y.
    pub fn plane() -> MeshData {
        MeshData {
            vertices: vec![
                [-0.5, 0.0, 0.5],
                [0.5, 0.0, 0.5],
                [0.5, 0.0, -0.5],
                [-0.5, 0.0, -0.5],
            ],
            normals: vec![[0.0, 1.0, 0.0]; 4],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Unit quad in XY facing +Z.
    pub fn quad() -> MeshData {
        MeshData {
            vertices: vec![
                [-0.5, -0.5, 0.0],
                [0.5, -0.5, 0.0],
                [0.5, 0.5, 0.0],
                [-0.5, 0.5, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLoader(MeshData);

    impl MeshLoader for FixedLoader {
        fn load(&self, _path: &Path) -> Result<MeshData, String> {
            Ok(self.0.clone())
        }
    }

    struct FailingLoader;

    impl MeshLoader for FailingLoader {
        fn load(&self, path: &Path) -> Result<MeshData, String> {
            Err(format!("cannot open {}", path.display()))
        }
    }

    #[test]
    fn identical_geometry_shares_an_instance() {
        let mut lib = MeshLib::new();
        let a = lib.build("box", primitives::cube()).unwrap();
        let b = lib.build("crate", primitives::cube()).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(lib.len(), 1);
        assert!(lib.contains("crate"));
    }

    /// Two meshes whose concatenated array bytes are equal.
    fn split_differently() -> (MeshData, MeshData) {
        let one_vertex = MeshData {
            vertices: vec![[1.0, 2.0, 3.0]],
            normals: vec![[4.0, 5.0, 6.0]],
            uvs: vec![[7.0, 8.0]],
            indices: vec![0; 24],
        };
        let four_vertices = MeshData {
            vertices: vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 0.0], [0.0; 3]],
            normals: vec![[0.0; 3]; 4],
            uvs: vec![[0.0; 2]; 4],
            indices: vec![],
        };
        (one_vertex, four_vertices)
    }

    #[test]
    fn same_bytes_split_across_arrays_hash_differently() {
        let (a, b) = split_differently();
        assert_ne!(a.content_hash(), b.content_hash());

        let mut lib = MeshLib::new();
        let a = lib.build("a", a).unwrap();
        let b = lib.build("b", b).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(b.data.vertex_count(), 4);
        assert_eq!(lib.len(), 2);
    }

    #[test]
    fn cube_faces_point_outward() {
        let cube = primitives::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.indices.len(), 36);
        for (p, n) in cube.vertices.iter().zip(&cube.normals) {
            let along: f32 = p.iter().zip(n).map(|(a, b)| a * b).sum();
            assert!((along - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn mismatched_attributes_are_rejected() {
        let mut data = primitives::quad();
        data.uvs.pop();
        let err = MeshLib::new().build("q", data).unwrap_err();
        assert!(matches!(err, AssetError::InvalidMesh { .. }));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut data = primitives::quad();
        data.indices.push(4);
        assert!(MeshLib::new().build("q", data).is_err());
    }

    #[test]
    fn loader_results_are_validated_and_cached() {
        let mut lib = MeshLib::new();
        let mesh = lib
            .load("tri", Path::new("tri.obj"), &FixedLoader(primitives::plane()))
            .unwrap();
        assert_eq!(mesh.data.vertex_count(), 4);

        let err = lib
            .load("missing", Path::new("missing.obj"), &FailingLoader)
            .unwrap_err();
        assert!(matches!(err, AssetError::Loader { .. }));
    }

    #[test]
    fn interleaving_packs_eight_floats() {
        let quad = primitives::quad();
        let packed = quad.interleaved();
        assert_eq!(packed.len(), 4 * VERTEX_STRIDE_FLOATS);
        assert_eq!(&packed[0..8], &[-0.5, -0.5, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }
}
