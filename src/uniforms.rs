use bytemuck::{Pod, Zeroable};
use ultraviolet::{Mat4, Vec2, Vec3};

use crate::scene::{DirectionalLight, Scene};

/// Per-frame camera and lighting constants, bound as a uniform buffer.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct FrameUniforms {
    pub view: Mat4,
    /// Includes the TAA jitter.
    pub projection: Mat4,
    pub view_inverse: Mat4,
    pub projection_inverse: Mat4,
    pub previous_view: Mat4,
    /// Without jitter, so motion vectors only contain real motion.
    pub previous_projection: Mat4,
    pub camera_position: Vec3,
    pub time: f32,
    pub directional_light: DirectionalLight,
    pub point_light_count: u32,
    pub spot_light_count: u32,
    pub sky_sphere_instance: i32,
    pub sky_sphere_texture: i32,
    pub jitter: Vec2,
    pub screen_size: Vec2,
    pub fog_color: Vec3,
    pub fog_density: f32,
}

/// Remembers the previous frame's camera for motion vectors.
#[derive(Debug, Default)]
pub struct CameraHistory {
    previous: Option<(Mat4, Mat4)>,
}

impl CameraHistory {
    /// `jitter` is in pixels. Stores this frame's matrices for the next call.
    pub fn frame_uniforms(
        &mut self,
        scene: &Scene,
        time: f32,
        jitter: Vec2,
        extent: (u32, u32),
    ) -> FrameUniforms {
        let view = scene.camera.view_matrix();
        let unjittered = scene.camera.projection_matrix();
        let screen_size = Vec2::new(extent.0.max(1) as f32, extent.1.max(1) as f32);

        let mut projection = unjittered;
        projection.cols[2].x += jitter.x * 2.0 / screen_size.x;
        projection.cols[2].y += jitter.y * 2.0 / screen_size.y;

        let (previous_view, previous_projection) = self.previous.unwrap_or((view, unjittered));
        self.previous = Some((view, unjittered));

        let (sky_sphere_instance, sky_sphere_texture) = scene
            .sky_sphere
            .map_or((-1, -1), |sky| (sky.instance_index as i32, sky.texture_index as i32));

        FrameUniforms {
            view,
            projection,
            view_inverse: view.inversed(),
            projection_inverse: projection.inversed(),
            previous_view,
            previous_projection,
            camera_position: scene.camera.position,
            time,
            directional_light: scene.directional_light,
            point_light_count: scene.point_lights.len() as u32,
            spot_light_count: scene.spot_lights.len() as u32,
            sky_sphere_instance,
            sky_sphere_texture,
            jitter,
            screen_size,
            fog_color: scene.fog.color,
            fog_density: scene.fog.density,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ultraviolet::Vec3;

    use super::*;
    use crate::scene::test_scenes;

    #[test]
    fn layout_is_a_multiple_of_sixteen() {
        assert_eq!(std::mem::size_of::<FrameUniforms>() % 16, 0);
    }

    #[test]
    fn first_frame_uses_current_matrices_as_history() {
        let scene = test_scenes::three_cubes();
        let mut history = CameraHistory::default();
        let uniforms = history.frame_uniforms(&scene, 0.0, Vec2::zero(), (1920, 1080));
        assert_eq!(uniforms.previous_view, uniforms.view);
        assert_eq!(uniforms.previous_projection, uniforms.projection);
        assert_eq!(uniforms.point_light_count, 1);
        assert_eq!(uniforms.sky_sphere_instance, -1);
    }

    #[test]
    fn jitter_only_touches_the_current_projection() {
        let mut scene = test_scenes::three_cubes();
        let mut history = CameraHistory::default();
        let first = history.frame_uniforms(&scene, 0.0, Vec2::new(0.5, -0.25), (100, 50));
        let clean = scene.camera.projection_matrix();
        assert_relative_eq!(first.projection.cols[2].x, clean.cols[2].x + 0.01, epsilon = 1e-6);
        assert_relative_eq!(first.projection.cols[2].y, clean.cols[2].y - 0.01, epsilon = 1e-6);

        scene.camera.position += Vec3::new(1.0, 0.0, 0.0);
        let second = history.frame_uniforms(&scene, 0.1, Vec2::new(0.5, -0.25), (100, 50));
        assert_eq!(second.previous_view, first.view);
        assert_eq!(second.previous_projection, clean);
        assert_ne!(second.view, first.view);
    }
}
