use ultraviolet::{Mat4, Rotor3, Vec3};

use crate::scene::Scene;

/// Moves the records flagged `animated` for the frame that is about to be recorded.
///
/// Runs after the slot's fence wait, so `time` is as close as possible to the moment the
/// frame is displayed.
pub trait Animator {
    fn animate(&mut self, scene: &mut Scene, time: f32);
}

/// Spins every animated instance around its own vertical axis and circles animated point
/// lights around their starting position.
pub struct SpinAnimator {
    radians_per_second: f32,
    light_orbit_radius: f32,
    instance_rest: Vec<Mat4>,
    light_rest: Vec<Vec3>,
}

impl SpinAnimator {
    pub fn new(scene: &Scene, radians_per_second: f32) -> Self {
        Self {
            radians_per_second,
            light_orbit_radius: 1.0,
            instance_rest: scene.instances.iter().map(|i| *i.transform()).collect(),
            light_rest: scene.point_lights.iter().map(|l| l.position).collect(),
        }
    }

    pub fn with_light_orbit_radius(mut self, radius: f32) -> Self {
        self.light_orbit_radius = radius;
        self
    }
}

impl Animator for SpinAnimator {
    fn animate(&mut self, scene: &mut Scene, time: f32) {
        let angle = time * self.radians_per_second;
        let spin = Rotor3::from_rotation_xz(angle).into_matrix().into_homogeneous();

        for (instance, rest) in scene.instances.iter_mut().zip(&self.instance_rest) {
            if instance.is_animated() {
                instance.set_transform(*rest * spin);
            }
        }
        for (light, rest) in scene.point_lights.iter_mut().zip(&self.light_rest) {
            if light.animated != 0 {
                light.position =
                    *rest + Vec3::new(angle.cos(), 0.0, angle.sin()) * self.light_orbit_radius;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::scene::test_scenes;

    #[test]
    fn only_animated_records_move() {
        let mut scene = test_scenes::three_cubes();
        scene.instances[0] = scene.instances[0].with_animated(true);
        scene.point_lights[0] = scene.point_lights[0].with_animated(true);
        let still = *scene.instances[2].transform();
        let light_start = scene.point_lights[0].position;
        let mut animator = SpinAnimator::new(&scene, 1.0).with_light_orbit_radius(2.0);

        animator.animate(&mut scene, std::f32::consts::FRAC_PI_2);

        assert_eq!(*scene.instances[2].transform(), still);
        // A quarter turn keeps the translation but rotates the local x axis.
        let moved = scene.instances[0].transform();
        assert_abs_diff_eq!(moved.cols[3].x, -2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(moved.cols[3].z, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(moved.cols[0].x, 0.0, epsilon = 1e-5);

        let offset = scene.point_lights[0].position - light_start;
        assert_abs_diff_eq!(offset.mag(), 2.0, epsilon = 1e-5);
    }

    #[test]
    fn animation_is_a_function_of_time() {
        let mut scene = test_scenes::three_cubes();
        scene.instances[1] = scene.instances[1].with_animated(true);
        let mut animator = SpinAnimator::new(&scene, 3.0);

        animator.animate(&mut scene, 0.7);
        let first = *scene.instances[1].transform();
        animator.animate(&mut scene, 0.1);
        animator.animate(&mut scene, 0.7);
        assert_eq!(*scene.instances[1].transform(), first);
    }
}
