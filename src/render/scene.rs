use anyhow::Result;
use cgmath::{Deg, InnerSpace, Matrix4, Point3, SquareMatrix, Vector3};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Degrees added to the animation angle on every frame tick.
pub const ANGLE_INCREMENT: f32 = 1.2;

const FOV_DEGREES: f32 = 30.0;
const NEAR: f32 = 1.0;
const FAR: f32 = 100.0;

/// GL calls issued by [`SceneRenderer`].
///
/// All methods run on the thread that owns the current context.
pub trait RenderBackend {
    type Mesh;

    /// Clear color, depth test and blending.
    fn configure(&mut self);
    fn create_mesh(&mut self) -> Result<Self::Mesh>;
    fn destroy_mesh(&mut self, mesh: Self::Mesh);
    fn viewport(&mut self, width: i32, height: i32);
    /// Clear color and depth buffers.
    fn clear(&mut self);
    /// Draw `mesh` transformed by `mvp`, using the alternate palette when
    /// `alternate_colors` is set.
    fn draw(&mut self, mesh: &Self::Mesh, mvp: &Matrix4<f32>, alternate_colors: bool);
}

/// Shared handle for flipping the cube palette from outside the render loop.
#[derive(Debug, Clone, Default)]
pub struct ColorToggle(Arc<AtomicBool>);

impl ColorToggle {
    pub fn toggle(&self) {
        self.0.fetch_xor(true, Ordering::AcqRel);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Placement of one cube for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceTransform {
    pub translation: Vector3<f32>,
    pub rotation_angle: Deg<f32>,
    pub rotation_axis: Vector3<f32>,
}

impl InstanceTransform {
    /// Rotation applied after translation: `R * T`.
    pub fn model_matrix(&self) -> Matrix4<f32> {
        let rotation = Matrix4::from_axis_angle(self.rotation_axis.normalize(), self.rotation_angle);
        rotation * Matrix4::from_translation(self.translation)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnimationState {
    pub current_angle: f32,
    pub color_toggle: ColorToggle,
}

impl AnimationState {
    /// Object A spins twice as fast as B and in the opposite direction.
    pub fn instances(&self) -> [InstanceTransform; 2] {
        let axis = Vector3::new(0.0, 1.0, 1.0);
        [
            InstanceTransform {
                translation: Vector3::new(0.0, -0.5, -1.5),
                rotation_angle: Deg(2.0 * self.current_angle),
                rotation_axis: axis,
            },
            InstanceTransform {
                translation: Vector3::new(0.0, 2.0, 0.0),
                rotation_angle: Deg(-self.current_angle),
                rotation_axis: axis,
            },
        ]
    }

    pub fn advance(&mut self) {
        self.current_angle = (self.current_angle + ANGLE_INCREMENT).rem_euclid(360.0);
    }

    fn reset(&mut self) {
        self.current_angle = 0.0;
        self.color_toggle.reset();
    }
}

/// Fixed camera: eye at (0, 0, -10) looking at the origin, +Y up.
pub fn view_matrix() -> Matrix4<f32> {
    Matrix4::look_at_rh(
        Point3::new(0.0, 0.0, -10.0),
        Point3::new(0.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
    )
}

/// Perspective frustum for a 30 degree vertical field of view.
pub fn projection_matrix(width: i32, height: i32) -> Matrix4<f32> {
    let ratio = width as f32 / height as f32;
    let top = (FOV_DEGREES * std::f32::consts::PI / 360.0).tan() * NEAR;
    let bottom = -top;
    let left = ratio * bottom;
    let right = ratio * top;
    cgmath::frustum(left, right, bottom, top, NEAR, FAR)
}

/// Two tumbling cubes sharing one mesh.
///
/// Driven by the host through `on_context_created`, `on_viewport_resized`
/// and `on_frame_tick`, in that order, all on the render thread.
pub struct SceneRenderer<B: RenderBackend> {
    backend: B,
    mesh: Option<B::Mesh>,
    projection: Matrix4<f32>,
    state: AnimationState,
}

impl<B: RenderBackend> SceneRenderer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            mesh: None,
            projection: Matrix4::identity(),
            state: AnimationState::default(),
        }
    }

    pub fn on_context_created(&mut self) -> Result<()> {
        self.backend.configure();

        // Names from a lost context are gone with it, don't delete them here.
        if self.mesh.take().is_some() {
            log::debug!("Discarding mesh from previous context");
        }
        self.mesh = Some(self.backend.create_mesh()?);
        self.state.reset();
        Ok(())
    }

    pub fn on_viewport_resized(&mut self, width: i32, height: i32) {
        log::debug!("Viewport resized to {}x{}", width, height);
        self.backend.viewport(width, height);
        self.projection = projection_matrix(width, height);
    }

    pub fn on_frame_tick(&mut self) {
        let Some(mesh) = self.mesh.as_ref() else {
            log::warn!("Frame tick before context creation, skipping");
            return;
        };

        // One read per tick so both cubes agree on the palette.
        let alternate_colors = self.state.color_toggle.get();

        self.backend.clear();
        let view = view_matrix();
        for instance in self.state.instances() {
            let model_view = view * instance.model_matrix();
            let mvp = self.projection * model_view;
            self.backend.draw(mesh, &mvp, alternate_colors);
        }

        self.state.advance();
        log::trace!("Frame drawn, angle {:.1}", self.state.current_angle);
    }

    pub fn on_context_destroyed(&mut self) {
        if let Some(mesh) = self.mesh.take() {
            self.backend.destroy_mesh(mesh);
        }
    }

    pub fn toggle_color(&self) {
        self.state.color_toggle.toggle();
    }

    /// Handle for flipping the palette from another thread.
    #[cfg(test)]
    pub fn color_toggle(&self) -> ColorToggle {
        self.state.color_toggle.clone()
    }

    pub fn current_angle(&self) -> f32 {
        self.state.current_angle
    }

    #[cfg(test)]
    pub fn projection(&self) -> &Matrix4<f32> {
        &self.projection
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Rad, Vector4};
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Configure,
        CreateMesh(u32),
        DestroyMesh(u32),
        Viewport(i32, i32),
        Clear,
        Draw { mesh: u32, mvp: Matrix4<f32>, alternate: bool },
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        next_mesh: u32,
    }

    impl Recorder {
        fn draws(&self) -> Vec<(u32, Matrix4<f32>, bool)> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Draw { mesh, mvp, alternate } => Some((*mesh, *mvp, *alternate)),
                    _ => None,
                })
                .collect()
        }
    }

    impl RenderBackend for Recorder {
        type Mesh = u32;

        fn configure(&mut self) {
            self.calls.push(Call::Configure);
        }

        fn create_mesh(&mut self) -> Result<u32> {
            self.next_mesh += 1;
            self.calls.push(Call::CreateMesh(self.next_mesh));
            Ok(self.next_mesh)
        }

        fn destroy_mesh(&mut self, mesh: u32) {
            self.calls.push(Call::DestroyMesh(mesh));
        }

        fn viewport(&mut self, width: i32, height: i32) {
            self.calls.push(Call::Viewport(width, height));
        }

        fn clear(&mut self) {
            self.calls.push(Call::Clear);
        }

        fn draw(&mut self, mesh: &u32, mvp: &Matrix4<f32>, alternate_colors: bool) {
            self.calls.push(Call::Draw {
                mesh: *mesh,
                mvp: *mvp,
                alternate: alternate_colors,
            });
        }
    }

    fn ready_renderer() -> SceneRenderer<Recorder> {
        let mut renderer = SceneRenderer::new(Recorder::default());
        renderer.on_context_created().unwrap();
        renderer.on_viewport_resized(800, 480);
        renderer
    }

    fn assert_matrix_close(a: &Matrix4<f32>, b: &Matrix4<f32>) {
        let a: &[f32; 16] = a.as_ref();
        let b: &[f32; 16] = b.as_ref();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-4, "{:?} != {:?}", a, b);
        }
    }

    fn angular_distance(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    #[test]
    fn test_lifecycle_call_order() {
        let mut renderer = ready_renderer();
        renderer.on_frame_tick();

        let calls = &renderer.backend().calls;
        assert_eq!(calls[0], Call::Configure);
        assert_eq!(calls[1], Call::CreateMesh(1));
        assert_eq!(calls[2], Call::Viewport(800, 480));
        assert_eq!(calls[3], Call::Clear);
        assert_eq!(calls.len(), 6);
    }

    #[test]
    fn test_both_cubes_share_one_mesh() {
        let mut renderer = ready_renderer();
        for _ in 0..3 {
            renderer.on_frame_tick();
        }

        let draws = renderer.backend().draws();
        assert_eq!(draws.len(), 6);
        assert!(draws.iter().all(|(mesh, _, _)| *mesh == 1));
        let created = renderer
            .backend()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::CreateMesh(_)))
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn test_tick_before_context_is_skipped() {
        let mut renderer = SceneRenderer::new(Recorder::default());
        renderer.on_frame_tick();
        assert!(renderer.backend().calls.is_empty());
        assert_eq!(renderer.current_angle(), 0.0);
    }

    #[test]
    fn test_projection_for_800x480() {
        let renderer = ready_renderer();

        let ratio = 800.0f32 / 480.0;
        let top = (30.0f32.to_radians() / 2.0).tan();
        let right = ratio * top;
        let expected = cgmath::frustum(-right, right, -top, top, 1.0, 100.0);
        assert_matrix_close(renderer.projection(), &expected);

        // Standard perspective frustum terms.
        let p = renderer.projection();
        assert!((p.x.x - 1.0 / right).abs() < 1e-5);
        assert!((p.y.y - 1.0 / top).abs() < 1e-5);
        assert!((p.z.z - (-(101.0 / 99.0))).abs() < 1e-5);
        assert!((p.w.z - (-(200.0 / 99.0))).abs() < 1e-5);
        assert_eq!(p.z.w, -1.0);

        // Same as a symmetric perspective with the same fov and aspect.
        let perspective = cgmath::perspective(Deg(30.0), ratio, 1.0, 100.0);
        assert_matrix_close(p, &perspective);
    }

    #[test]
    fn test_resize_recomputes_projection() {
        let mut renderer = ready_renderer();
        let wide = *renderer.projection();
        renderer.on_viewport_resized(480, 800);
        assert_ne!(wide, *renderer.projection());
        assert_matrix_close(renderer.projection(), &projection_matrix(480, 800));
    }

    #[test]
    fn test_view_looks_down_positive_z() {
        let view = view_matrix();
        // The origin ends up 10 units in front of the camera.
        let origin = view * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!((origin.z + 10.0).abs() < 1e-5);
        // Eye on -Z looking at +Z flips X.
        let right = view * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert!((right.x + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_model_matrix_rotates_after_translating() {
        let instance = InstanceTransform {
            translation: Vector3::new(0.0, 2.0, 0.0),
            rotation_angle: Deg(90.0),
            rotation_axis: Vector3::new(0.0, 0.0, 2.0),
        };
        // The translated origin is itself rotated: (0, 2, 0) -> (-2, 0, 0).
        let p = instance.model_matrix() * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!((p.x + 2.0).abs() < 1e-5);
        assert!(p.y.abs() < 1e-5);
    }

    #[test]
    fn test_first_frame_matrices() {
        let mut renderer = ready_renderer();
        renderer.on_frame_tick();

        let projection = projection_matrix(800, 480);
        let view = view_matrix();
        let draws = renderer.backend().draws();

        let a = projection * view * Matrix4::from_translation(Vector3::new(0.0, -0.5, -1.5));
        let b = projection * view * Matrix4::from_translation(Vector3::new(0.0, 2.0, 0.0));
        assert_matrix_close(&draws[0].1, &a);
        assert_matrix_close(&draws[1].1, &b);
    }

    #[test]
    fn test_second_frame_uses_advanced_angle() {
        let mut renderer = ready_renderer();
        renderer.on_frame_tick();
        renderer.on_frame_tick();

        let projection = projection_matrix(800, 480);
        let axis = Vector3::new(0.0, 1.0, 1.0).normalize();
        let b_model = Matrix4::from_axis_angle(axis, Deg(-ANGLE_INCREMENT))
            * Matrix4::from_translation(Vector3::new(0.0, 2.0, 0.0));
        let draws = renderer.backend().draws();
        assert_matrix_close(&draws[3].1, &(projection * view_matrix() * b_model));
    }

    #[test]
    fn test_toggle_applies_from_next_tick() {
        let mut renderer = ready_renderer();
        let handle = renderer.color_toggle();

        renderer.on_frame_tick();
        handle.toggle();
        renderer.on_frame_tick();
        renderer.toggle_color();
        renderer.on_frame_tick();

        let flags: Vec<bool> = renderer.backend().draws().iter().map(|d| d.2).collect();
        assert_eq!(flags, vec![false, false, true, true, false, false]);
    }

    #[test]
    fn test_context_recreation_resets_state() {
        let mut renderer = ready_renderer();
        renderer.toggle_color();
        for _ in 0..10 {
            renderer.on_frame_tick();
        }
        assert!(renderer.current_angle() > 0.0);

        renderer.on_context_created().unwrap();
        assert_eq!(renderer.current_angle(), 0.0);
        assert!(!renderer.color_toggle().get());

        // The old mesh is not deleted on a new context.
        let calls = &renderer.backend().calls;
        assert!(!calls.iter().any(|c| matches!(c, Call::DestroyMesh(_))));
        assert_eq!(calls.last(), Some(&Call::CreateMesh(2)));
    }

    #[test]
    fn test_context_destroyed_releases_mesh_once() {
        let mut renderer = ready_renderer();
        renderer.on_context_destroyed();
        renderer.on_context_destroyed();

        let destroyed: Vec<_> = renderer
            .backend()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::DestroyMesh(_)))
            .collect();
        assert_eq!(destroyed, vec![&Call::DestroyMesh(1)]);

        renderer.on_frame_tick();
        assert!(renderer.backend().draws().is_empty());
    }

    #[test]
    fn test_angle_wraps_at_360() {
        let mut state = AnimationState::default();
        for _ in 0..310 {
            state.advance();
        }
        // 310 * 1.2 = 372
        assert!((state.current_angle - 12.0).abs() < 0.05, "{}", state.current_angle);
    }

    proptest! {
        #[test]
        fn prop_angle_after_n_ticks(n in 0usize..1000) {
            let mut renderer = ready_renderer();
            for _ in 0..n {
                renderer.on_frame_tick();
            }

            let expected = (n as f64 * ANGLE_INCREMENT as f64).rem_euclid(360.0);
            let actual = renderer.current_angle() as f64;
            prop_assert!((0.0..360.0).contains(&actual));
            prop_assert!(angular_distance(actual, expected) < 0.05,
                "n={} actual={} expected={}", n, actual, expected);
        }

        #[test]
        fn prop_a_spins_twice_b_opposite(n in 0usize..600) {
            let mut state = AnimationState::default();
            for _ in 0..n {
                state.advance();
            }

            let [a, b] = state.instances();
            prop_assert_eq!(a.rotation_angle, Deg(2.0 * state.current_angle));
            prop_assert_eq!(b.rotation_angle, Deg(-state.current_angle));
            prop_assert_eq!(a.rotation_axis, b.rotation_axis);

            let a_rad: Rad<f32> = a.rotation_angle.into();
            let b_rad: Rad<f32> = b.rotation_angle.into();
            prop_assert!((a_rad.0 + 2.0 * b_rad.0).abs() < 1e-4);
        }
    }
}
