mod config;
mod instance;
mod logging;
mod render;
mod wayland;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use config::{FileConfig, Overrides, Settings};
use logging::{init_logging, LoggingConfig};
use render::{EglContext, FpsCounter, GlBackend, PresentationSurface, SceneRenderer};
use wayland::outputs::request_xdg_outputs;

#[derive(Parser)]
#[command(name = "cube-mirror")]
#[command(about = "Render two tumbling cubes on a second output")]
struct Cli {
    /// Output to present on (e.g., HDMI-A-1)
    target: Option<String>,

    /// List available outputs and exit
    #[arg(short, long)]
    list: bool,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Multisample count to request, 0 disables multisampling
    #[arg(long)]
    samples: Option<i32>,

    /// Log frames per second
    #[arg(long)]
    show_fps: bool,

    /// Flip the cube colors of a running cube-mirror instance
    #[arg(long, conflicts_with = "stop")]
    toggle_color: bool,

    /// Stop a running cube-mirror instance
    #[arg(long)]
    stop: bool,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Settings::resolve(
            file,
            Overrides {
                target: self.target.clone(),
                samples: self.samples,
                show_fps: self.show_fps,
            },
        ))
    }
}

/// Frame loop: one tick and one swap per display refresh until stopped.
fn present(
    conn: &mut wayland::WaylandConnection,
    surface: &mut PresentationSurface,
    egl_ctx: &EglContext,
    renderer: &mut SceneRenderer<GlBackend>,
    running: &AtomicBool,
    mut fps: Option<&mut FpsCounter>,
) -> Result<()> {
    while running.load(Ordering::SeqCst) && !surface.is_closed() {
        if surface.resize_if_needed() {
            renderer.on_viewport_resized(surface.width as i32, surface.height as i32);
        }

        // An even number of requests cancels out.
        if instance::take_toggle_requests() % 2 == 1 {
            renderer.toggle_color();
            log::info!("Cube colors toggled");
        }

        renderer.on_frame_tick();
        egl_ctx.swap_buffers(surface.egl_window_surface)?;

        if let Some(frames) = fps.as_mut().and_then(|f| f.tick(Instant::now())) {
            log::info!("fps={} angle={:.1}", frames, renderer.current_angle());
        }

        conn.dispatch()?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;

    init_logging(LoggingConfig {
        filter: settings.log_filter.clone(),
    });

    if cli.stop {
        return instance::stop_running_instance();
    }
    if cli.toggle_color {
        return instance::toggle_running_instance();
    }

    let _pid_file = instance::PidFile::claim()?;

    let mut conn = wayland::WaylandConnection::connect()?;
    {
        let qh = conn.queue_handle();
        request_xdg_outputs(&conn.state, &qh);
    }
    conn.roundtrip()?;

    if cli.list {
        println!("Available outputs:");
        for output in conn.state.output_manager.list() {
            println!(
                "  {} - {} ({}, scale {})",
                output.name,
                output.description,
                output.mode_label(),
                output.scale
            );
        }
        return Ok(());
    }

    let target_name = settings
        .target
        .clone()
        .ok_or_else(|| anyhow!("Target output required. Use --list to see available outputs."))?;

    let (target_output, width, height) = {
        let target = conn.state.output_manager.resolve(&target_name)?;
        log::info!(
            "Presenting on {} ({})",
            target.name,
            target.mode_label()
        );
        (
            target.wl_output.clone(),
            target.width.max(0) as u32,
            target.height.max(0) as u32,
        )
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;
    instance::install_toggle_handler()?;

    let wayland_display = conn.connection.backend().display_ptr() as *mut c_void;
    let egl_ctx = EglContext::new(wayland_display, &settings.profile)?;
    if egl_ctx.profile != settings.profile {
        log::info!("Running with fallback profile {:?}", egl_ctx.profile);
    }

    let mut surface = {
        let qh = conn.queue_handle();
        PresentationSurface::new(
            conn.state.compositor()?,
            conn.state.layer_shell()?,
            &target_output,
            &egl_ctx,
            &qh,
            width,
            height,
        )
        .with_context(|| format!("Failed to create surface for {}", target_name))?
    };

    surface
        .wait_for_configure(|| conn.roundtrip())
        .with_context(|| format!("No presentation on {}", target_name))?;
    surface.resize_if_needed();
    surface.commit();

    egl_ctx.make_current(surface.egl_window_surface)?;
    egl_ctx.load_gl();
    if let Err(e) = egl_ctx.set_swap_interval(1) {
        log::warn!("{:#}, frames will not follow the display refresh", e);
    }

    let mut renderer = SceneRenderer::new(GlBackend::new());
    renderer.on_context_created()?;
    renderer.on_viewport_resized(surface.width as i32, surface.height as i32);

    log::info!("Presentation active. Press Ctrl+C or use --stop to stop, --toggle-color to flip colors.");

    let mut fps = settings.show_fps.then(FpsCounter::new);
    let result = present(
        &mut conn,
        &mut surface,
        &egl_ctx,
        &mut renderer,
        &running,
        fps.as_mut(),
    );

    log::info!("Stopping presentation...");

    renderer.on_context_destroyed();
    if let Err(e) = egl_ctx.destroy_surface(surface.egl_window_surface) {
        log::warn!("{:#}", e);
    }
    // Destroys the layer surface, then flush so the compositor sees it
    drop(surface);
    let _ = conn.roundtrip();

    result
}
