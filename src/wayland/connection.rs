use anyhow::{anyhow, Context, Result};
use std::ops::{Deref, DerefMut};
use wayland_client::{
    protocol::{wl_compositor, wl_output, wl_registry},
    Connection, Dispatch, EventQueue, QueueHandle,
};
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_manager_v1;
use wayland_protocols_wlr::layer_shell::v1::client::zwlr_layer_shell_v1;

use super::outputs::OutputManager;

/// Globals bound from the registry.
pub struct WaylandState {
    pub compositor: Option<wl_compositor::WlCompositor>,
    pub layer_shell: Option<zwlr_layer_shell_v1::ZwlrLayerShellV1>,
    pub xdg_output_manager: Option<zxdg_output_manager_v1::ZxdgOutputManagerV1>,
    pub output_manager: OutputManager,
}

impl WaylandState {
    pub fn new() -> Self {
        Self {
            compositor: None,
            layer_shell: None,
            xdg_output_manager: None,
            output_manager: OutputManager::new(),
        }
    }

    pub fn compositor(&self) -> Result<&wl_compositor::WlCompositor> {
        self.compositor
            .as_ref()
            .ok_or_else(|| anyhow!("wl_compositor not available"))
    }

    pub fn layer_shell(&self) -> Result<&zwlr_layer_shell_v1::ZwlrLayerShellV1> {
        self.layer_shell
            .as_ref()
            .ok_or_else(|| anyhow!("zwlr_layer_shell_v1 not available, is this a wlroots compositor?"))
    }
}

/// Newtype wrapper to satisfy orphan rules
pub struct AppState(pub WaylandState);

impl Deref for AppState {
    type Target = WaylandState;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for AppState {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

pub struct WaylandConnection {
    pub connection: Connection,
    pub state: AppState,
    pub queue: EventQueue<AppState>,
}

impl WaylandConnection {
    pub fn connect() -> Result<Self> {
        let connection =
            Connection::connect_to_env().context("Failed to connect to Wayland display")?;

        let mut state = AppState(WaylandState::new());
        let mut queue = connection.new_event_queue();
        let qh = queue.handle();

        connection.display().get_registry(&qh, ());

        // Globals first, then the wl_output events they trigger.
        queue
            .roundtrip(&mut state)
            .context("Wayland registry roundtrip failed")?;
        queue
            .roundtrip(&mut state)
            .context("Wayland output roundtrip failed")?;

        Ok(Self {
            connection,
            state,
            queue,
        })
    }

    pub fn roundtrip(&mut self) -> Result<()> {
        self.queue.roundtrip(&mut self.state)?;
        Ok(())
    }

    /// Dispatch already queued events and flush requests, without blocking.
    pub fn dispatch(&mut self) -> Result<()> {
        self.queue.dispatch_pending(&mut self.state)?;
        self.queue.flush()?;
        Ok(())
    }

    pub fn queue_handle(&self) -> QueueHandle<AppState> {
        self.queue.handle()
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for AppState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => match interface.as_str() {
                "wl_compositor" => {
                    state.compositor = Some(registry.bind(name, version.min(5), qh, ()));
                }
                "zwlr_layer_shell_v1" => {
                    state.layer_shell = Some(registry.bind(name, version.min(4), qh, ()));
                }
                "zxdg_output_manager_v1" => {
                    state.xdg_output_manager = Some(registry.bind(name, version.min(3), qh, ()));
                }
                "wl_output" => {
                    let output: wl_output::WlOutput =
                        registry.bind(name, version.min(4), qh, name);
                    state.output_manager.add_output(name, output);
                }
                _ => {}
            },
            wl_registry::Event::GlobalRemove { name } => {
                if let Some(output) = state.output_manager.remove_output(name) {
                    log::info!("Output {} disconnected", output.name);
                }
            }
            _ => {}
        }
    }
}

// Globals we only store
impl Dispatch<wl_compositor::WlCompositor, ()> for AppState {
    fn event(
        _state: &mut Self,
        _proxy: &wl_compositor::WlCompositor,
        _event: wl_compositor::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<zwlr_layer_shell_v1::ZwlrLayerShellV1, ()> for AppState {
    fn event(
        _state: &mut Self,
        _proxy: &zwlr_layer_shell_v1::ZwlrLayerShellV1,
        _event: zwlr_layer_shell_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<zxdg_output_manager_v1::ZxdgOutputManagerV1, ()> for AppState {
    fn event(
        _state: &mut Self,
        _proxy: &zxdg_output_manager_v1::ZxdgOutputManagerV1,
        _event: zxdg_output_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}
