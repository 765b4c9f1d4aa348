use anyhow::{bail, Result};
use std::collections::HashMap;
use wayland_client::{protocol::wl_output, Connection, Dispatch, QueueHandle};
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_v1;

use super::connection::AppState;

/// A display the cubes can be presented on.
#[derive(Debug, Clone)]
pub struct Output {
    pub name: String,        // e.g., "HDMI-A-1"
    pub description: String, // e.g., "Philips PHL 276E8V"
    pub width: i32,
    pub height: i32,
    pub refresh: i32, // mHz
    pub scale: i32,
    pub wl_output: wl_output::WlOutput,
}

impl Output {
    pub fn new(wl_output: wl_output::WlOutput) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            width: 0,
            height: 0,
            refresh: 0,
            scale: 1,
            wl_output,
        }
    }

    pub fn mode_label(&self) -> String {
        format_mode(self.width, self.height, self.refresh)
    }
}

/// "1920x1080@60Hz", refresh given in mHz as wl_output reports it.
pub fn format_mode(width: i32, height: i32, refresh_mhz: i32) -> String {
    if refresh_mhz <= 0 {
        return format!("{}x{}", width, height);
    }
    if refresh_mhz % 1000 == 0 {
        format!("{}x{}@{}Hz", width, height, refresh_mhz / 1000)
    } else {
        format!("{}x{}@{:.2}Hz", width, height, refresh_mhz as f64 / 1000.0)
    }
}

pub struct OutputManager {
    pub outputs: HashMap<u32, Output>,
}

impl OutputManager {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
        }
    }

    pub fn add_output(&mut self, global_name: u32, wl_output: wl_output::WlOutput) {
        self.outputs.insert(global_name, Output::new(wl_output));
    }

    pub fn remove_output(&mut self, global_name: u32) -> Option<Output> {
        self.outputs.remove(&global_name)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Output> {
        self.outputs.values().find(|o| o.name == name)
    }

    /// Outputs ordered by name.
    pub fn list(&self) -> Vec<&Output> {
        let mut outputs: Vec<_> = self.outputs.values().collect();
        outputs.sort_by(|a, b| a.name.cmp(&b.name));
        outputs
    }

    /// Look up the presentation target, naming the alternatives on failure.
    pub fn resolve(&self, name: &str) -> Result<&Output> {
        if let Some(output) = self.get_by_name(name) {
            return Ok(output);
        }
        let known: Vec<&str> = self.list().iter().map(|o| o.name.as_str()).collect();
        bail!(
            "Output '{}' not found (available: {})",
            name,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        )
    }
}

impl Dispatch<wl_output::WlOutput, u32> for AppState {
    fn event(
        state: &mut Self,
        _proxy: &wl_output::WlOutput,
        event: wl_output::Event,
        global_name: &u32,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let Some(output) = state.output_manager.outputs.get_mut(global_name) {
            match event {
                wl_output::Event::Mode {
                    flags: wayland_client::WEnum::Value(mode_flags),
                    width,
                    height,
                    refresh,
                } if mode_flags.contains(wl_output::Mode::Current) => {
                    output.width = width;
                    output.height = height;
                    output.refresh = refresh;
                }
                wl_output::Event::Scale { factor } => {
                    output.scale = factor;
                }
                wl_output::Event::Name { name } => {
                    output.name = name;
                }
                wl_output::Event::Description { description } => {
                    output.description = description;
                }
                _ => {}
            }
        }
    }
}

impl Dispatch<zxdg_output_v1::ZxdgOutputV1, u32> for AppState {
    fn event(
        state: &mut Self,
        _proxy: &zxdg_output_v1::ZxdgOutputV1,
        event: zxdg_output_v1::Event,
        global_name: &u32,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let Some(output) = state.output_manager.outputs.get_mut(global_name) {
            // xdg_output name takes precedence on compositors without wl_output v4
            if let zxdg_output_v1::Event::Name { name } = event {
                if !name.is_empty() {
                    output.name = name;
                }
            }
        }
    }
}

/// Request xdg_output for all outputs to get their names
pub fn request_xdg_outputs(state: &AppState, qh: &QueueHandle<AppState>) {
    if let Some(ref manager) = state.xdg_output_manager {
        for (global_name, output) in &state.output_manager.outputs {
            manager.get_xdg_output(&output.wl_output, qh, *global_name);
        }
    }
}
