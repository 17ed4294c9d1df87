//! Camera system

use glam::{DVec3, Mat3, Mat4, Vec3};

use super::Skybox;

/// Axis the placeholder model transform spins around
const MODEL_ROTATION_AXIS: Vec3 = Vec3::new(0.5, 1.0, 0.0);

/// View/projection parameters of a scene
#[derive(Debug)]
pub struct Camera {
    background_color: [f32; 4],
    /// Kept in double precision so compiled-scene positions survive loading exactly
    position: DVec3,
    fov: f32,
    near: f32,
    far: f32,
    width: f32,
    height: f32,
    skybox: Option<Skybox>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            background_color: [0.2, 0.3, 0.3, 1.0],
            position: DVec3::new(0.0, 2.0, 2.0),
            fov: 45.0,
            near: 0.1,
            far: 100.0,
            width: 800.0,
            height: 600.0,
            skybox: None,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn background_color(&self) -> [f32; 4] {
        self.background_color
    }

    pub fn set_background_color(&mut self, color: [f32; 4]) {
        self.background_color = color;
    }

    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn set_position(&mut self, position: DVec3) {
        self.position = position;
    }

    /// Vertical field of view in degrees
    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn set_fov(&mut self, fov: f32) {
        self.fov = fov;
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn set_near(&mut self, near: f32) {
        self.near = near;
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn set_far(&mut self, far: f32) {
        self.far = far;
    }

    /// Viewport size as (width, height)
    pub fn view_rect(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn set_view_rect(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.state().aspect_ratio()
    }

    pub fn skybox(&self) -> Option<&Skybox> {
        self.skybox.as_ref()
    }

    pub fn skybox_mut(&mut self) -> Option<&mut Skybox> {
        self.skybox.as_mut()
    }

    pub fn set_skybox(&mut self, skybox: Skybox) {
        self.skybox = Some(skybox);
    }

    pub fn take_skybox(&mut self) -> Option<Skybox> {
        self.skybox.take()
    }

    /// Snapshot of the optics a backend needs for one frame
    pub fn state(&self) -> CameraState {
        CameraState {
            background_color: self.background_color,
            position: self.position.as_vec3(),
            fov: self.fov,
            near: self.near,
            far: self.far,
            width: self.width,
            height: self.height,
        }
    }
}

/// Value copy of a camera held by a backend between `set_camera` calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub background_color: [f32; 4],
    pub position: Vec3,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub width: f32,
    pub height: f32,
}

impl CameraState {
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.fov.to_radians(),
            self.aspect_ratio(),
            self.near,
            self.far,
        )
    }

    /// Look-at toward the origin with +Y up
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, Vec3::ZERO, Vec3::Y)
    }

    /// View matrix with translation removed, for skyboxes
    pub fn skybox_view_matrix(&self) -> Mat4 {
        Mat4::from_mat3(Mat3::from_mat4(self.view_matrix()))
    }
}

/// Model transform applied to every object: a spin around a fixed axis
pub fn model_matrix(elapsed_seconds: f32) -> Mat4 {
    Mat4::from_axis_angle(MODEL_ROTATION_AXIS.normalize(), elapsed_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let camera = Camera::default();
        assert_eq!(camera.background_color(), [0.2, 0.3, 0.3, 1.0]);
        assert_eq!(camera.position(), DVec3::new(0.0, 2.0, 2.0));
        assert_eq!(camera.fov(), 45.0);
        assert_eq!(camera.view_rect(), (800.0, 600.0));
        assert!(camera.skybox().is_none());
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        let mut camera = Camera::default();
        camera.set_view_rect(640.0, 0.0);
        assert_eq!(camera.aspect_ratio(), 1.0);
    }

    #[test]
    fn view_looks_at_origin() {
        let state = Camera::default().state();
        let origin_in_view = state.view_matrix().transform_point3(Vec3::ZERO);
        // Origin is straight ahead (negative Z in a right-handed view space)
        assert!(origin_in_view.x.abs() < 1e-5);
        assert!(origin_in_view.y.abs() < 1e-5);
        assert!(origin_in_view.z < 0.0);
    }

    #[test]
    fn skybox_view_has_no_translation() {
        let state = Camera::default().state();
        let view = state.skybox_view_matrix();
        assert_eq!(view.w_axis, glam::Vec4::W);
    }

    #[test]
    fn model_matrix_starts_at_identity() {
        assert!(model_matrix(0.0).abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }
}
