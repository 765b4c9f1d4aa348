use anyhow::{bail, Context, Result};
use khronos_egl as egl;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use wayland_client::{
    protocol::{wl_compositor, wl_output, wl_surface},
    Connection, Dispatch, Proxy, QueueHandle,
};
use wayland_egl::WlEglSurface;
use wayland_protocols_wlr::layer_shell::v1::client::{
    zwlr_layer_shell_v1::{self, ZwlrLayerShellV1},
    zwlr_layer_surface_v1::{self, ZwlrLayerSurfaceV1},
};

use crate::render::EglContext;
use crate::wayland::AppState;

/// State shared with the layer surface's event handler.
#[derive(Default)]
pub struct SurfaceData {
    configured: AtomicBool,
    closed: AtomicBool,
    pending_size: Mutex<Option<(u32, u32)>>,
}

impl SurfaceData {
    fn set_pending_size(&self, width: u32, height: u32) {
        let mut pending = self.pending_size.lock().unwrap_or_else(|e| e.into_inner());
        *pending = Some((width, height));
    }

    fn take_pending_size(&self) -> Option<(u32, u32)> {
        self.pending_size
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Run `roundtrip` until the first configure. A close before that is an error.
    fn wait_configured(&self, mut roundtrip: impl FnMut() -> Result<()>) -> Result<()> {
        while !self.configured.load(Ordering::Acquire) {
            if self.closed.load(Ordering::Acquire) {
                bail!("Surface closed by the compositor before it was configured");
            }
            roundtrip()?;
        }
        Ok(())
    }
}

/// Fullscreen overlay on the target output that the cubes are drawn into.
///
/// Creating one starts the presentation, dropping it ends it. The EGL
/// window surface must be released with [`EglContext::destroy_surface`]
/// before the drop.
pub struct PresentationSurface {
    pub wl_surface: wl_surface::WlSurface,
    pub layer_surface: ZwlrLayerSurfaceV1,
    pub egl_surface: WlEglSurface,
    pub egl_window_surface: egl::Surface,
    pub width: u32,
    pub height: u32,
    data: Arc<SurfaceData>,
}

impl PresentationSurface {
    pub fn new(
        compositor: &wl_compositor::WlCompositor,
        layer_shell: &ZwlrLayerShellV1,
        output: &wl_output::WlOutput,
        egl_ctx: &EglContext,
        qh: &QueueHandle<AppState>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        // The output may not have reported a mode yet, configure fixes it up.
        let width = width.max(1);
        let height = height.max(1);
        let data = Arc::new(SurfaceData::default());

        let wl_surface = compositor.create_surface(qh, ());

        let layer_surface = layer_shell.get_layer_surface(
            &wl_surface,
            Some(output),
            zwlr_layer_shell_v1::Layer::Overlay,
            "cube-mirror".to_string(),
            qh,
            data.clone(),
        );

        layer_surface.set_anchor(
            zwlr_layer_surface_v1::Anchor::Top
                | zwlr_layer_surface_v1::Anchor::Bottom
                | zwlr_layer_surface_v1::Anchor::Left
                | zwlr_layer_surface_v1::Anchor::Right,
        );
        layer_surface.set_exclusive_zone(-1);
        layer_surface
            .set_keyboard_interactivity(zwlr_layer_surface_v1::KeyboardInteractivity::None);

        // Initial commit without a buffer asks for the first configure.
        wl_surface.commit();

        let egl_surface = WlEglSurface::new(wl_surface.id(), width as i32, height as i32)
            .context("Failed to create WlEglSurface")?;

        let egl_window_surface =
            egl_ctx.create_window_surface(egl_surface.ptr() as egl::NativeWindowType)?;

        Ok(Self {
            wl_surface,
            layer_surface,
            egl_surface,
            egl_window_surface,
            width,
            height,
            data,
        })
    }

    pub fn wait_for_configure(&self, roundtrip: impl FnMut() -> Result<()>) -> Result<()> {
        self.data.wait_configured(roundtrip)
    }

    /// The compositor closed the surface, e.g. because the output went away.
    pub fn is_closed(&self) -> bool {
        self.data.closed.load(Ordering::Acquire)
    }

    /// Apply the latest configured size. Returns true if it changed.
    pub fn resize_if_needed(&mut self) -> bool {
        match self.data.take_pending_size() {
            Some((width, height)) if (width, height) != (self.width, self.height) => {
                log::debug!(
                    "Surface resized from {}x{} to {}x{}",
                    self.width,
                    self.height,
                    width,
                    height
                );
                self.width = width;
                self.height = height;
                self.egl_surface
                    .resize(self.width as i32, self.height as i32, 0, 0);
                true
            }
            _ => false,
        }
    }

    pub fn commit(&self) {
        self.wl_surface.commit();
    }
}

impl Dispatch<ZwlrLayerSurfaceV1, Arc<SurfaceData>> for AppState {
    fn event(
        _state: &mut Self,
        surface: &ZwlrLayerSurfaceV1,
        event: zwlr_layer_surface_v1::Event,
        data: &Arc<SurfaceData>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_layer_surface_v1::Event::Configure {
                serial,
                width,
                height,
            } => {
                surface.ack_configure(serial);
                if width > 0 && height > 0 {
                    data.set_pending_size(width, height);
                }
                data.configured.store(true, Ordering::Release);
            }
            zwlr_layer_surface_v1::Event::Closed => {
                log::info!("Presentation surface closed by the compositor");
                data.closed.store(true, Ordering::Release);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_surface::WlSurface, ()> for AppState {
    fn event(
        _state: &mut Self,
        _proxy: &wl_surface::WlSurface,
        _event: wl_surface::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        self.layer_surface.destroy();
        self.wl_surface.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_size_is_taken_once() {
        let data = SurfaceData::default();
        assert_eq!(data.take_pending_size(), None);

        data.set_pending_size(1920, 1080);
        data.set_pending_size(800, 480);
        assert_eq!(data.take_pending_size(), Some((800, 480)));
        assert_eq!(data.take_pending_size(), None);
    }

    #[test]
    fn test_wait_ends_at_configure() {
        let data = SurfaceData::default();
        let mut roundtrips = 0;

        data.wait_configured(|| {
            roundtrips += 1;
            if roundtrips == 3 {
                data.configured.store(true, Ordering::Release);
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(roundtrips, 3);
    }

    #[test]
    fn test_close_before_configure_stops_waiting() {
        let data = SurfaceData::default();
        let mut roundtrips = 0;

        let err = data
            .wait_configured(|| {
                roundtrips += 1;
                data.closed.store(true, Ordering::Release);
                Ok(())
            })
            .unwrap_err();

        assert_eq!(roundtrips, 1);
        assert!(err.to_string().contains("before it was configured"));
    }
}
