pub mod config;
pub mod cube;
pub mod egl;
pub mod fps;
pub mod scene;
pub mod surface;

pub use config::SurfaceConfigProfile;
pub use cube::GlBackend;
pub use egl::EglContext;
pub use fps::FpsCounter;
pub use scene::SceneRenderer;
pub use surface::PresentationSurface;
