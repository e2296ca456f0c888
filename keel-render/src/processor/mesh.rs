use std::{fs, path::Path};

use keel_asset::{read_artifact, write_artifact, ArtifactProbe, Error};

use crate::{ModelVertex, PositionVertex};

pub const MESH_ARTIFACT_VERSION: u8 = 2;

/// Imported mesh, split into the two vertex streams the renderer consumes.
#[derive(Debug)]
pub struct MeshData {
    pub position_vertices: Vec<PositionVertex>,
    pub model_vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
}

keel_asset::flat_struct!(MeshData {
    position_vertices: Vec<PositionVertex>,
    model_vertices: Vec<ModelVertex>,
    indices: Vec<u32>,
    bounds_min: [f32; 3],
    bounds_max: [f32; 3],
});

struct TangentWorkspace<'a> {
    vertices: &'a mut [ModelVertex],
    indices: &'a [u32],
}

impl TangentWorkspace<'_> {
    fn vertex_index(&self, face: usize, vert: usize) -> usize {
        self.indices[face * 3 + vert] as usize
    }
}

impl mikktspace::Geometry for TangentWorkspace<'_> {
    fn num_faces(&self) -> usize {
        self.indices.len() / 3
    }
    fn num_vertices_of_face(&self, _face: usize) -> usize {
        3
    }
    fn position(&self, face: usize, vert: usize) -> [f32; 3] {
        self.vertices[self.vertex_index(face, vert)].position
    }
    fn normal(&self, face: usize, vert: usize) -> [f32; 3] {
        self.vertices[self.vertex_index(face, vert)].normal
    }
    fn tex_coord(&self, face: usize, vert: usize) -> [f32; 2] {
        self.vertices[self.vertex_index(face, vert)].uv
    }
    fn set_tangent_encoded(&mut self, tangent: [f32; 4], face: usize, vert: usize) {
        let index = self.vertex_index(face, vert);
        self.vertices[index].tangent = tangent;
    }
}

fn unreadable(source: &Path, reason: impl ToString) -> Error {
    Error::SourceUnreadable {
        path: source.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[profiling::function]
fn process_mesh(source: &Path, output: &Path) -> Result<MeshData, Error> {
    let (models, _materials) = tobj::load_obj(
        source,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| unreadable(source, e))?;
    let mesh = &models
        .first()
        .ok_or_else(|| unreadable(source, "file contains no mesh"))?
        .mesh;

    let vertex_count = mesh.positions.len() / 3;
    if vertex_count == 0 {
        return Err(unreadable(source, "mesh has no vertices"));
    }
    if mesh.normals.len() != mesh.positions.len() {
        return Err(unreadable(source, "mesh has no normals"));
    }
    if mesh.texcoords.len() != vertex_count * 2 {
        return Err(unreadable(source, "mesh has no texture coordinates"));
    }

    let mut position_vertices = Vec::with_capacity(vertex_count);
    let mut model_vertices = Vec::with_capacity(vertex_count);
    let mut bounds_min = glam::Vec3::splat(f32::MAX);
    let mut bounds_max = glam::Vec3::splat(f32::MIN);
    for i in 0..vertex_count {
        let position = [
            mesh.positions[i * 3],
            mesh.positions[i * 3 + 1],
            mesh.positions[i * 3 + 2],
        ];
        bounds_min = bounds_min.min(glam::Vec3::from(position));
        bounds_max = bounds_max.max(glam::Vec3::from(position));
        position_vertices.push(PositionVertex { position });
        model_vertices.push(ModelVertex {
            position,
            // OBJ texture space has V growing upwards
            uv: [mesh.texcoords[i * 2], 1.0 - mesh.texcoords[i * 2 + 1]],
            normal: [
                mesh.normals[i * 3],
                mesh.normals[i * 3 + 1],
                mesh.normals[i * 3 + 2],
            ],
            tangent: [0.0; 4],
        });
    }

    let indices = mesh.indices.clone();
    let mut workspace = TangentWorkspace {
        vertices: &mut model_vertices,
        indices: &indices,
    };
    if !mikktspace::generate_tangents(&mut workspace) {
        log::warn!(
            "Tangent generation failed for '{}', leaving zero tangents",
            source.display()
        );
    }

    let mesh_data = MeshData {
        position_vertices,
        model_vertices,
        indices,
        bounds_min: bounds_min.into(),
        bounds_max: bounds_max.into(),
    };
    write_artifact(output, MESH_ARTIFACT_VERSION, &mesh_data)?;
    Ok(mesh_data)
}

pub fn read_mesh_data(name: &str, source: &Path, cache_path: &Path) -> Result<MeshData, Error> {
    match read_artifact::<MeshData>(cache_path, MESH_ARTIFACT_VERSION) {
        ArtifactProbe::Fresh(mesh_data) => {
            log::info!("Mesh [{}] loaded from cache", name);
            Ok(mesh_data)
        }
        ArtifactProbe::Stale => {
            log::warn!("Could not load mesh [{}] from cache, reprocessing", name);
            fs::remove_file(cache_path)?;
            process_mesh(source, cache_path)
        }
        ArtifactProbe::Missing => {
            log::info!("Processing mesh [{}]", name);
            process_mesh(source, cache_path)
        }
    }
}
