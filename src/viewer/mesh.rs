//! GLB / glTF → flat triangle list.

use anyhow::{Context as _, anyhow, bail};
use base64::Engine;
use gltf::buffer::Source;
use gltf::mesh::Mode;
use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

/// Non-indexed triangles: every three consecutive vertices form one face.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub center: [f32; 3],
    pub radius: f32,
}

impl MeshData {
    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Interleaved `xyz nx ny nz` for the vertex buffer.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.positions.len() * 6);
        for (p, n) in self.positions.iter().zip(&self.normals) {
            out.extend_from_slice(p);
            out.extend_from_slice(n);
        }
        out
    }
}

/// Parse a binary GLB (or embedded-buffer glTF) and flatten its default scene.
pub fn load_glb(bytes: &[u8]) -> anyhow::Result<MeshData> {
    let gltf = gltf::Gltf::from_slice(bytes).context("not a glTF asset")?;
    let buffers = gltf
        .buffers()
        .map(|buffer| match buffer.source() {
            Source::Bin => gltf.blob.clone().ok_or_else(|| anyhow!("GLB binary chunk missing")),
            Source::Uri(uri) => decode_buffer_uri(uri),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let scene = gltf
        .default_scene()
        .or_else(|| gltf.scenes().next())
        .ok_or_else(|| anyhow!("asset has no scene"))?;

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    for node in scene.nodes() {
        visit(&node, Matrix4::identity(), &buffers, &mut positions, &mut normals)?;
    }
    if positions.is_empty() {
        bail!("asset contains no triangles");
    }

    let (center, radius) = bounds(&positions);
    log::info!("model loaded: {} triangles, radius {radius:.3}", positions.len() / 3);
    Ok(MeshData { positions, normals, center, radius })
}

fn decode_buffer_uri(uri: &str) -> anyhow::Result<Vec<u8>> {
    let Some((_, payload)) = uri.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) else {
        bail!("external buffer references are not supported");
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("malformed embedded buffer")
}

fn visit(
    node: &gltf::Node<'_>,
    parent: Matrix4<f32>,
    buffers: &[Vec<u8>],
    positions: &mut Vec<[f32; 3]>,
    normals: &mut Vec<[f32; 3]>,
) -> anyhow::Result<()> {
    let world = parent * Matrix4::from(node.transform().matrix());
    let linear: Matrix3<f32> = world.fixed_view::<3, 3>(0, 0).into_owned();
    let normal_matrix = linear.try_inverse().map(|m| m.transpose()).unwrap_or(linear);

    if let Some(mesh) = node.mesh() {
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                log::debug!("skipping {:?} primitive", primitive.mode());
                continue;
            }
            let reader = primitive.reader(|b| buffers.get(b.index()).map(Vec::as_slice));
            let Some(local) = reader.read_positions() else {
                continue;
            };
            let local: Vec<[f32; 3]> = local.collect();
            let local_normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(Iterator::collect);
            let indices: Vec<u32> = match reader.read_indices() {
                Some(ix) => ix.into_u32().collect(),
                None => (0..local.len() as u32).collect(),
            };

            for tri in indices.chunks_exact(3) {
                let mut corners = [Point3::origin(); 3];
                for (corner, &ix) in corners.iter_mut().zip(tri) {
                    let p = local.get(ix as usize).ok_or_else(|| anyhow!("index {ix} out of range"))?;
                    *corner = world.transform_point(&Point3::from(*p));
                }
                let face = (corners[1] - corners[0]).cross(&(corners[2] - corners[0]));
                let face = face.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::z);

                for (corner, &ix) in corners.iter().zip(tri) {
                    positions.push([corner.x, corner.y, corner.z]);
                    let n = local_normals
                        .as_ref()
                        .and_then(|ns| ns.get(ix as usize))
                        .and_then(|n| (normal_matrix * Vector3::from(*n)).try_normalize(f32::EPSILON))
                        .unwrap_or(face);
                    normals.push([n.x, n.y, n.z]);
                }
            }
        }
    }

    for child in node.children() {
        visit(&child, world, buffers, positions, normals)?;
    }
    Ok(())
}

fn bounds(positions: &[[f32; 3]]) -> ([f32; 3], f32) {
    let mut min = Vector3::repeat(f32::INFINITY);
    let mut max = Vector3::repeat(f32::NEG_INFINITY);
    for p in positions {
        let v = Vector3::from(*p);
        min = min.inf(&v);
        max = max.sup(&v);
    }
    let center = (min + max) * 0.5;
    let radius = positions
        .iter()
        .map(|p| (Vector3::from(*p) - center).norm())
        .fold(0.0_f32, f32::max)
        .max(1e-3);
    ([center.x, center.y, center.z], radius)
}
