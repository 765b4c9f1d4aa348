use anyhow::{anyhow, bail, Context, Result};
use khronos_egl as egl;
use std::ffi::c_void;

use super::config::{self, AttribQuery, ConfigAttrib, ConfigAttribs, SurfaceConfigProfile};

type EglInstance = egl::DynamicInstance<egl::EGL1_5>;

pub struct EglContext {
    pub egl: EglInstance,
    pub display: egl::Display,
    pub context: egl::Context,
    pub config: egl::Config,
    /// Profile the config was actually selected with.
    pub profile: SurfaceConfigProfile,
}

/// `eglGetConfigAttrib` behind the selector's query seam.
pub struct EglAttribQuery<'a> {
    egl: &'a EglInstance,
    display: egl::Display,
}

impl<'a> EglAttribQuery<'a> {
    pub fn new(egl: &'a EglInstance, display: egl::Display) -> Self {
        Self { egl, display }
    }
}

impl AttribQuery<egl::Config> for EglAttribQuery<'_> {
    fn attrib(&self, config: &egl::Config, attrib: ConfigAttrib) -> Option<i32> {
        self.egl
            .get_config_attrib(self.display, *config, egl_attrib(attrib))
            .ok()
    }
}

fn egl_attrib(attrib: ConfigAttrib) -> egl::Int {
    match attrib {
        ConfigAttrib::Red => egl::RED_SIZE,
        ConfigAttrib::Green => egl::GREEN_SIZE,
        ConfigAttrib::Blue => egl::BLUE_SIZE,
        ConfigAttrib::Alpha => egl::ALPHA_SIZE,
        ConfigAttrib::Depth => egl::DEPTH_SIZE,
        ConfigAttrib::Stencil => egl::STENCIL_SIZE,
        ConfigAttrib::Samples => egl::SAMPLES,
    }
}

/// Attribute list handed to `eglChooseConfig` as a pre-filter.
pub fn config_attribs(profile: &SurfaceConfigProfile) -> Vec<egl::Int> {
    let mut attribs = vec![
        egl::SURFACE_TYPE,
        egl::WINDOW_BIT,
        egl::RED_SIZE,
        profile.red_bits,
        egl::GREEN_SIZE,
        profile.green_bits,
        egl::BLUE_SIZE,
        profile.blue_bits,
        egl::ALPHA_SIZE,
        profile.alpha_bits,
        egl::DEPTH_SIZE,
        profile.depth_bits,
        egl::STENCIL_SIZE,
        profile.stencil_bits,
        egl::RENDERABLE_TYPE,
        egl::OPENGL_ES2_BIT,
    ];
    if profile.wants_multisample() {
        attribs.extend([egl::SAMPLE_BUFFERS, 1, egl::SAMPLES, profile.sample_count]);
    }
    attribs.push(egl::NONE);
    attribs
}

fn choose_config(
    egl: &EglInstance,
    display: egl::Display,
    profile: &SurfaceConfigProfile,
) -> Result<Option<egl::Config>> {
    let attribs = config_attribs(profile);

    let count = egl
        .matching_config_count(display, &attribs)
        .context("Failed to count EGL configs")?;
    if count == 0 {
        return Ok(None);
    }

    let mut candidates = Vec::with_capacity(count);
    egl.choose_config(display, &attribs, &mut candidates)
        .context("Failed to choose EGL config")?;
    log::debug!("{} EGL config candidates for {:?}", candidates.len(), profile);

    let query = EglAttribQuery::new(egl, display);
    Ok(config::select(&candidates, profile, &query).copied())
}

/// Run `choose` with `profile`. If nothing matches and multisampling was
/// requested, retry once with `sample_count = 0`.
fn choose_with_fallback<C>(
    profile: &SurfaceConfigProfile,
    mut choose: impl FnMut(&SurfaceConfigProfile) -> Result<Option<C>>,
) -> Result<(C, SurfaceConfigProfile)> {
    if let Some(config) = choose(profile)? {
        return Ok((config, *profile));
    }
    if !profile.wants_multisample() {
        bail!("No suitable EGL config found for {:?}", profile);
    }

    log::warn!(
        "No EGL config with {}x multisampling, retrying without",
        profile.sample_count
    );
    let fallback = profile.with_samples(0);
    let config = choose(&fallback)?
        .ok_or_else(|| anyhow!("No suitable EGL config found for {:?}", fallback))?;
    Ok((config, fallback))
}

impl EglContext {
    pub fn new(wayland_display: *mut c_void, profile: &SurfaceConfigProfile) -> Result<Self> {
        let egl = unsafe { EglInstance::load_required() }.context("Failed to load EGL")?;

        let display = unsafe { egl.get_display(wayland_display) }
            .ok_or_else(|| anyhow!("Failed to get EGL display"))?;

        let (major, minor) = egl
            .initialize(display)
            .context("Failed to initialize EGL")?;
        log::debug!("EGL {}.{} initialized", major, minor);

        let (config, profile) =
            choose_with_fallback(profile, |p| choose_config(&egl, display, p))?;

        let chosen = ConfigAttribs::read(&EglAttribQuery::new(&egl, display), &config);
        log::info!(
            "Using EGL config r{} g{} b{} a{} depth {} stencil {} samples {}",
            chosen.red,
            chosen.green,
            chosen.blue,
            chosen.alpha,
            chosen.depth,
            chosen.stencil,
            chosen.samples
        );

        egl.bind_api(egl::OPENGL_ES_API)
            .context("Failed to bind OpenGL ES API")?;

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];

        let context = egl
            .create_context(display, config, None, &context_attribs)
            .context("Failed to create EGL context")?;

        Ok(Self {
            egl,
            display,
            context,
            config,
            profile,
        })
    }

    pub fn make_current(&self, surface: egl::Surface) -> Result<()> {
        self.egl
            .make_current(
                self.display,
                Some(surface),
                Some(surface),
                Some(self.context),
            )
            .context("Failed to make EGL context current")?;
        Ok(())
    }

    pub fn create_window_surface(
        &self,
        native_window: egl::NativeWindowType,
    ) -> Result<egl::Surface> {
        let surface = unsafe {
            self.egl
                .create_window_surface(self.display, self.config, native_window, None)
        }
        .context("Failed to create EGL window surface")?;
        Ok(surface)
    }

    pub fn destroy_surface(&self, surface: egl::Surface) -> Result<()> {
        self.egl
            .make_current(self.display, None, None, None)
            .context("Failed to release EGL context")?;
        self.egl
            .destroy_surface(self.display, surface)
            .context("Failed to destroy EGL window surface")?;
        Ok(())
    }

    /// Swap interval of the current surface. 1 ties swaps to frame callbacks.
    pub fn set_swap_interval(&self, interval: i32) -> Result<()> {
        self.egl
            .swap_interval(self.display, interval)
            .context("Failed to set swap interval")?;
        Ok(())
    }

    pub fn swap_buffers(&self, surface: egl::Surface) -> Result<()> {
        self.egl
            .swap_buffers(self.display, surface)
            .context("Failed to swap buffers")?;
        Ok(())
    }

    /// Load GL entry points through EGL. Needs a current context.
    pub fn load_gl(&self) {
        gl::load_with(|s| {
            self.egl
                .get_proc_address(s)
                .map(|p| p as *const c_void)
                .unwrap_or(std::ptr::null())
        });
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        let _ = self.egl.destroy_context(self.display, self.context);
        let _ = self.egl.terminate(self.display);
    }
}
