//! Helper process that opens the Ember box ISA channels.
//!
//! The command channel only exists while `em3xx_load --isachan=all` runs.
//! Its stdout and stderr are drained by one task each into a log sink task,
//! so the helper never blocks on a full pipe.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::PloadError;

const LOG_QUEUE_DEPTH: usize = 64;
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Before `open` there is only a `ChannelGateway`, so a process handle is
/// always past the not-started state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Running,
    Stopped,
}

#[derive(Debug)]
enum GatewayLine {
    Stdout(String),
    Stderr(String),
}

/// Launches and cleans up the helper process
pub struct ChannelGateway {
    config: GatewayConfig,
}

/// A running helper. Owned by whoever opened it and consumed by `close`.
pub struct GatewayProcess {
    child: Child,
    pid: Option<u32>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    sink_task: JoinHandle<()>,
}

impl ChannelGateway {
    pub fn new(config: GatewayConfig) -> Self {
        ChannelGateway { config }
    }

    /// Kills every process named like the helper. Best effort: a helper left
    /// over from a previous run would hold the ISA channels, but failing to
    /// kill it is only logged.
    ///
    /// Returns how many processes were killed.
    pub fn kill_stale_instances(&self) -> usize {
        kill_by_name(&self.config.process_name)
    }

    /// Starts the helper with its output drained into the log
    pub fn open(&self) -> Result<GatewayProcess, PloadError> {
        let path = &self.config.executable;
        info!("Starting {} {}", path.display(), self.config.args.join(" "));

        let mut child = Command::new(path)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PloadError::LaunchFailure {
                path: path.clone(),
                source,
            })?;

        let pid = child.id();
        let (tx, rx) = mpsc::channel(LOG_QUEUE_DEPTH);

        let stdout_task = match child.stdout.take() {
            Some(stdout) => tokio::spawn(drain(stdout, tx.clone(), GatewayLine::Stdout)),
            None => tokio::spawn(async {}),
        };
        let stderr_task = match child.stderr.take() {
            Some(stderr) => tokio::spawn(drain(stderr, tx, GatewayLine::Stderr)),
            None => tokio::spawn(async {}),
        };
        let sink_task = tokio::spawn(log_sink(rx));

        debug!("Helper running with pid {:?}", pid);

        Ok(GatewayProcess {
            child,
            pid,
            stdout_task,
            stderr_task,
            sink_task,
        })
    }
}

impl GatewayProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&mut self) -> GatewayState {
        match self.child.try_wait() {
            Ok(None) => GatewayState::Running,
            Ok(Some(_)) => GatewayState::Stopped,
            Err(e) => {
                warn!("Failed to check helper status: {}", e);
                GatewayState::Stopped
            }
        }
    }

    /// Stops the helper: error draining first, then the process itself.
    /// Waits for it to be reaped before returning.
    pub async fn close(mut self) -> Result<ExitStatus, PloadError> {
        self.stderr_task.abort();

        if let Err(e) = self.child.start_kill() {
            // already exited on its own
            debug!("Helper kill: {}", e);
        }
        let status = self.child.wait().await?;
        info!("Helper stopped with status: {}", status);

        // stdout hits EOF once the process is gone, unless something it
        // spawned still holds the pipe
        if time::timeout(DRAIN_GRACE, &mut self.stdout_task).await.is_err() {
            debug!("stdout still open after exit, dropping it");
            self.stdout_task.abort();
        }
        // the sink ends once both senders are gone
        if let Err(e) = (&mut self.sink_task).await {
            debug!("log sink ended: {}", e);
        }
        Ok(status)
    }
}

async fn drain<R>(stream: R, tx: mpsc::Sender<GatewayLine>, wrap: fn(String) -> GatewayLine)
where
    R: AsyncRead + Unpin,
{
    // the helper may print bytes that are not UTF-8; the pipe must keep
    // being read regardless or the helper dies writing to it
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                if tx.send(wrap(line)).await.is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Failed to read helper output: {}", e);
                break;
            }
        }
    }
}

async fn log_sink(mut rx: mpsc::Receiver<GatewayLine>) {
    while let Some(line) = rx.recv().await {
        match line {
            GatewayLine::Stdout(line) => info!(target: "gateway", "{}", line),
            GatewayLine::Stderr(line) => warn!(target: "gateway", "Error: {}", line),
        }
    }
}

fn matches_name(process_name: &OsStr, wanted: &str) -> bool {
    // Windows reports "em3xx_load.exe"
    Path::new(process_name)
        .file_stem()
        .is_some_and(|stem| stem == OsStr::new(wanted))
}

fn kill_by_name(name: &str) -> usize {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut killed = 0;
    for process in system.processes().values() {
        if !matches_name(process.name(), name) {
            continue;
        }
        if process.kill() {
            info!("Killed stale {} (pid {})", name, process.pid());
            killed += 1;
        } else {
            warn!("Error killing {} (pid {})", name, process.pid());
        }
    }
    killed
}
