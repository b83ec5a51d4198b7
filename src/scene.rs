mod instance;
mod light;
mod material;
mod mesh;
mod transform;
mod vertex;

pub use instance::*;
pub use light::*;
pub use material::*;
pub use mesh::*;
pub use transform::*;
pub use vertex::*;

use ultraviolet::Vec3;

use crate::camera::Camera;

/// A flattened, fully loaded scene.
///
/// Meshes index into the shared vertex and index arrays, instances index into the meshes
/// and meshes index into the materials. Indices may dangle, consumers skip those records.
pub struct Scene {
    pub vertices: Vec<Vertex>,
    /// Relative to the owning mesh's `base_vertex`.
    pub indices: Vec<u32>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub instances: Vec<Instance>,
    pub point_lights: Vec<PointLight>,
    pub spot_lights: Vec<SpotLight>,
    pub directional_light: DirectionalLight,
    pub camera: Camera,
    pub fog: Fog,
    pub sky_sphere: Option<SkySphere>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fog {
    pub color: Vec3,
    pub density: f32,
}

impl Default for Fog {
    fn default() -> Self {
        Self {
            color: Vec3::new(0.5, 0.6, 0.7),
            density: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkySphere {
    pub instance_index: u32,
    pub texture_index: u32,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            instances: Vec::new(),
            point_lights: Vec::new(),
            spot_lights: Vec::new(),
            directional_light: DirectionalLight::default(),
            camera,
            fog: Fog::default(),
            sky_sphere: None,
        }
    }

    pub fn add_material(&mut self, material: Material) -> u32 {
        self.materials.push(material);
        (self.materials.len() - 1) as u32
    }

    /// Appends the geometry to the shared arrays and records the bounds of the new mesh.
    pub fn add_mesh(&mut self, vertices: &[Vertex], indices: &[u32], material: Option<u32>) -> u32 {
        let (min, max) = vertices.iter().fold(
            (Vec3::broadcast(f32::MAX), Vec3::broadcast(f32::MIN)),
            |(min, max), vertex| {
                let position = Vec3::from(vertex.position);
                (min.min_by_component(position), max.max_by_component(position))
            },
        );
        let bounds = if vertices.is_empty() {
            (Vec3::zero(), Vec3::zero())
        } else {
            (min, max)
        };

        let mesh = Mesh::new(
            bounds,
            self.vertices.len() as u32,
            vertices.len() as u32,
            self.indices.len() as u32,
            indices.len() as u32,
            material,
        );
        self.vertices.extend_from_slice(vertices);
        self.indices.extend_from_slice(indices);
        self.meshes.push(mesh);
        (self.meshes.len() - 1) as u32
    }

    pub fn add_instance(&mut self, instance: Instance) -> u32 {
        self.instances.push(instance);
        (self.instances.len() - 1) as u32
    }

    pub fn mesh_of(&self, instance: &Instance) -> Option<&Mesh> {
        instance.mesh_index().and_then(|index| self.meshes.get(index))
    }

    pub fn material_of(&self, mesh: &Mesh) -> Option<&Material> {
        mesh.material_index().and_then(|index| self.materials.get(index))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meshes_record_offsets_and_bounds() {
        let mut scene = test_scenes::three_cubes();
        let second = &scene.meshes[1];
        assert_eq!(second.base_vertex, 8);
        assert_eq!(second.base_index, 36);
        assert_eq!(second.triangle_count(), 12);
        assert_eq!(second.bounding_box_min, Vec3::broadcast(-0.5));
        assert_eq!(second.bounding_box_max, Vec3::broadcast(0.5));

        let empty = scene.add_mesh(&[], &[], None);
        assert_eq!(scene.meshes[empty as usize].material_index(), None);
    }

    #[test]
    fn dangling_indices_resolve_to_none() {
        let mut scene = test_scenes::three_cubes();
        let mut broken = scene.instances[0];
        broken.mesh_index = 42;
        assert!(scene.mesh_of(&broken).is_none());

        scene.meshes[0].material_index = 9;
        assert!(scene.material_of(&scene.meshes[0]).is_none());
    }

    #[test]
    fn gpu_records_keep_their_shader_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        assert_eq!(std::mem::size_of::<Mesh>(), 48);
        assert_eq!(std::mem::size_of::<Instance>(), 160);
        assert_eq!(std::mem::size_of::<Material>(), 80);
        assert_eq!(std::mem::size_of::<PointLight>(), 48);
        assert_eq!(std::mem::size_of::<SpotLight>(), 64);
        assert_eq!(std::mem::size_of::<DirectionalLight>(), 32);
    }
}
