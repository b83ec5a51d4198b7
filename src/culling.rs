use ultraviolet::{Mat4, Vec3, Vec4};

/// `normal · p + distance = 0`, with the normal pointing into the frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = Vec3::new(coefficients.x, coefficients.y, coefficients.z);
        let length = normal.mag();
        if length > f32::EPSILON {
            Self {
                normal: normal / length,
                distance: coefficients.w / length,
            }
        } else {
            Self {
                normal,
                distance: coefficients.w,
            }
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustumPlane {
    Left = 0,
    Right = 1,
    Bottom = 2,
    Top = 3,
    Near = 4,
    Far = 5,
}

/// Planes used when deciding whether an instance gets a draw command.
///
/// Far is left out, the depth buffer takes care of distant geometry.
pub const CULLING_PLANES: [FrustumPlane; 5] = [
    FrustumPlane::Left,
    FrustumPlane::Right,
    FrustumPlane::Bottom,
    FrustumPlane::Top,
    FrustumPlane::Near,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Extracts normalized planes from a view-projection matrix with a `[0, 1]` depth range.
    pub fn from_view_projection(view_projection: &Mat4) -> Self {
        let [r0, r1, r2, r3] = [0, 1, 2, 3].map(|r| row(view_projection, r));

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r2),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    pub fn plane(&self, plane: FrustumPlane) -> &Plane {
        &self.planes[plane as usize]
    }

    pub fn is_sphere_visible(&self, sphere: &BoundingSphere) -> bool {
        CULLING_PLANES
            .iter()
            .all(|&plane| self.plane(plane).signed_distance(sphere.center) >= -sphere.radius)
    }
}

fn row(matrix: &Mat4, index: usize) -> Vec4 {
    let pick = |column: Vec4| [column.x, column.y, column.z, column.w][index];
    Vec4::new(
        pick(matrix.cols[0]),
        pick(matrix.cols[1]),
        pick(matrix.cols[2]),
        pick(matrix.cols[3]),
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn from_aabb(min: Vec3, max: Vec3) -> Self {
        Self {
            center: (min + max) * 0.5,
            radius: (max - min).mag() * 0.5,
        }
    }

    /// Conservative under non-uniform scale: the radius grows by the largest axis scale.
    pub fn transformed(&self, transform: &Mat4) -> Self {
        let center = *transform * Vec4::new(self.center.x, self.center.y, self.center.z, 1.0);
        let max_scale_squared = transform.cols[..3]
            .iter()
            .map(|column| Vec3::new(column.x, column.y, column.z).mag_sq())
            .fold(0.0f32, f32::max);

        Self {
            center: Vec3::new(center.x, center.y, center.z),
            radius: self.radius * max_scale_squared.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ultraviolet::{Mat4, Vec3};

    use super::*;
    use crate::scene::test_scenes;

    fn frustum() -> Frustum {
        test_scenes::camera().frustum()
    }

    #[test]
    fn planes_are_normalized() {
        let frustum = frustum();
        for plane in [
            FrustumPlane::Left,
            FrustumPlane::Right,
            FrustumPlane::Bottom,
            FrustumPlane::Top,
            FrustumPlane::Near,
            FrustumPlane::Far,
        ] {
            assert_relative_eq!(frustum.plane(plane).normal.mag(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn near_plane_sits_at_the_near_clip_distance() {
        // The camera is at z = 10 looking down -Z with near = 0.1.
        let near = *frustum().plane(FrustumPlane::Near);
        assert_relative_eq!(near.signed_distance(Vec3::new(0.0, 0.0, 9.9)), 0.0, epsilon = 1e-3);
        assert!(near.signed_distance(Vec3::zero()) > 0.0);
    }

    #[test]
    fn sphere_in_front_of_the_camera_is_visible() {
        let sphere = BoundingSphere {
            center: Vec3::zero(),
            radius: 1.0,
        };
        assert!(frustum().is_sphere_visible(&sphere));
    }

    #[test]
    fn sphere_outside_a_side_plane_is_rejected() {
        let frustum = frustum();
        let sphere = BoundingSphere {
            center: Vec3::new(-500.0, 0.0, 0.0),
            radius: 1.0,
        };
        assert!(frustum.plane(FrustumPlane::Left).signed_distance(sphere.center) < -sphere.radius);
        assert!(!frustum.is_sphere_visible(&sphere));
    }

    #[test]
    fn sphere_behind_the_camera_is_rejected() {
        let sphere = BoundingSphere {
            center: Vec3::new(0.0, 0.0, 20.0),
            radius: 1.0,
        };
        assert!(!frustum().is_sphere_visible(&sphere));
    }

    #[test]
    fn sphere_beyond_the_far_plane_is_still_drawn() {
        let frustum = frustum();
        let sphere = BoundingSphere {
            center: Vec3::new(0.0, 0.0, -5000.0),
            radius: 1.0,
        };
        assert!(frustum.plane(FrustumPlane::Far).signed_distance(sphere.center) < -sphere.radius);
        assert!(frustum.is_sphere_visible(&sphere));
    }

    #[test]
    fn sphere_straddling_a_plane_is_kept() {
        let frustum = frustum();
        let left = frustum.plane(FrustumPlane::Left);
        let inside = Vec3::zero();
        // Walk from the origin against the plane normal until the center is just outside.
        let center = inside - left.normal * (left.signed_distance(inside) + 0.5);
        let sphere = BoundingSphere { center, radius: 1.0 };
        assert!(frustum.is_sphere_visible(&sphere));
    }

    #[test]
    fn transformed_sphere_uses_the_largest_axis_scale() {
        let sphere = BoundingSphere::from_aabb(Vec3::broadcast(-1.0), Vec3::broadcast(1.0));
        assert_relative_eq!(sphere.radius, 3f32.sqrt(), epsilon = 1e-6);

        let transform = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0))
            * Mat4::from_nonuniform_scale(Vec3::new(1.0, 4.0, 2.0));
        let world = sphere.transformed(&transform);
        assert_relative_eq!(world.center.x, 5.0, epsilon = 1e-6);
        assert_relative_eq!(world.radius, 4.0 * 3f32.sqrt(), epsilon = 1e-5);
    }
}
