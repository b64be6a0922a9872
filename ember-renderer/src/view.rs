use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// Camera description for one traversal.
#[derive(Debug, Clone, Copy)]
pub struct ViewDescriptor {
    pub view: Mat4,
    pub proj: Mat4,
}

impl ViewDescriptor {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self { view, proj }
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(&(self.proj * self.view))
    }

    /// View-space distance along the camera forward axis.
    pub fn depth_of(&self, point: Vec3) -> f32 {
        -self.view.transform_point3(point).z
    }
}

/// Six clip planes extracted from a view-projection matrix.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_matrix(matrix: &Mat4) -> Self {
        let r0 = matrix.row(0);
        let r1 = matrix.row(1);
        let r2 = matrix.row(2);
        let r3 = matrix.row(3);

        let mut planes = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r3 + r2, // near
            r3 - r2, // far
        ];
        for plane in &mut planes {
            let length = plane.xyz().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }

        Self { planes }
    }

    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.xyz().dot(center) + plane.w >= -radius)
    }
}
