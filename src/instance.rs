//! Single running instance, addressed through a PID file.
//!
//! `--stop` and `--toggle-color` from a second invocation reach the running
//! instance as SIGTERM and SIGUSR1.

use anyhow::{anyhow, bail, Context, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};

const PROCESS_NAME: &str = "cube-mirror";

static TOGGLE_REQUESTS: AtomicU32 = AtomicU32::new(0);

fn pid_file_path_from(
    runtime_dir: Option<String>,
    state_home: Option<String>,
    home: Option<String>,
) -> PathBuf {
    // Per-user runtime dir first, it has the right permissions
    if let Some(dir) = runtime_dir {
        return PathBuf::from(dir).join("cube-mirror.pid");
    }
    if let Some(dir) = state_home {
        return PathBuf::from(dir).join("cube-mirror.pid");
    }
    if let Some(home) = home {
        return PathBuf::from(home).join(".local/state/cube-mirror.pid");
    }
    std::env::temp_dir().join("cube-mirror.pid")
}

pub fn pid_file_path() -> PathBuf {
    pid_file_path_from(
        std::env::var("XDG_RUNTIME_DIR").ok(),
        std::env::var("XDG_STATE_HOME").ok(),
        std::env::var("HOME").ok(),
    )
}

/// PID file owned by this process, removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim the PID file, failing if another live instance holds it.
    pub fn claim() -> Result<Self> {
        Self::claim_at(pid_file_path(), is_live_instance)
    }

    fn claim_at(path: PathBuf, is_live: impl Fn(i32) -> bool) -> Result<Self> {
        // Second attempt only after a stale file was removed
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    writeln!(file, "{}", process::id())
                        .with_context(|| format!("Failed to write PID file {}", path.display()))?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let contents = fs::read_to_string(&path).unwrap_or_default();
                    match parse_pid(&contents) {
                        Ok(pid) if is_live(pid) => bail!(
                            "cube-mirror is already running (PID {}). Use --stop to stop it.",
                            pid
                        ),
                        _ => {
                            log::debug!("Removing stale PID file");
                            let _ = fs::remove_file(&path);
                        }
                    }
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create PID file {}", path.display()))
                }
            }
        }
        bail!("Could not claim PID file {}", path.display())
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn parse_pid(contents: &str) -> Result<i32> {
    let pid: i32 = contents
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid PID in file"))?;
    if pid <= 0 {
        bail!("Invalid PID {} in file", pid);
    }
    Ok(pid)
}

fn is_cube_mirror_process(pid: i32) -> bool {
    // /proc/<pid>/comm guards against a recycled PID
    fs::read_to_string(format!("/proc/{}/comm", pid))
        .map(|comm| comm.trim() == PROCESS_NAME)
        .unwrap_or(false)
}

fn is_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None::<Signal>).is_ok()
}

fn is_live_instance(pid: i32) -> bool {
    is_cube_mirror_process(pid) && is_alive(pid)
}

fn signal_running_instance(sig: Signal) -> Result<i32> {
    let path = pid_file_path();
    let contents = fs::read_to_string(&path)
        .map_err(|_| anyhow!("No running cube-mirror instance found (no PID file)"))?;
    let pid = parse_pid(&contents)?;

    if !is_cube_mirror_process(pid) {
        remove_pid_file();
        bail!("PID {} is not a cube-mirror process (stale PID file removed)", pid);
    }

    if let Err(e) = signal::kill(Pid::from_raw(pid), sig) {
        remove_pid_file();
        bail!("Process {} not reachable: {} (stale PID file removed)", pid, e);
    }
    Ok(pid)
}

pub fn stop_running_instance() -> Result<()> {
    let pid = signal_running_instance(Signal::SIGTERM)?;
    log::info!("Sent stop signal to cube-mirror (PID {})", pid);
    Ok(())
}

pub fn toggle_running_instance() -> Result<()> {
    let pid = signal_running_instance(Signal::SIGUSR1)?;
    log::info!("Asked cube-mirror (PID {}) to toggle the cube colors", pid);
    Ok(())
}

extern "C" fn on_toggle_signal(_: nix::libc::c_int) {
    TOGGLE_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

/// Count SIGUSR1 deliveries for [`take_toggle_requests`].
pub fn install_toggle_handler() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_toggle_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGUSR1, &action) }
        .context("Failed to install SIGUSR1 handler")?;
    Ok(())
}

/// Toggle requests received since the previous call.
pub fn take_toggle_requests() -> u32 {
    TOGGLE_REQUESTS.swap(0, Ordering::Relaxed)
}
