//! Supervision of the Node.js browser-automation sidecar.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

use crate::sidecar::DEFAULT_SIDECAR_PORT;

/// Directory name of the sidecar inside a checkout or install prefix.
const SIDECAR_SUBDIR: &str = "sidecar/whatsapp-web";

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then kill if the process is still around after 5 s.
    pub async fn stop(&mut self) -> Result<()> {
        info!(port = self.port, "stopping sidecar process");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id()
                && let Ok(pid) = i32::try_from(pid)
            {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill().await;
        }

        match tokio::time::timeout(STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "sidecar process exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
            Err(_) => {
                warn!("sidecar process did not exit gracefully, killing");
                let _ = self.child.kill().await;
            },
        }
        Ok(())
    }
}

impl Drop for SidecarProcess {
    fn drop(&mut self) {
        // kill_on_drop does the rest.
        if let Some(pid) = self.child.id() {
            debug!(pid, "dropping sidecar process handle");
        }
    }
}

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Directory containing the sidecar's `package.json`.
    pub sidecar_dir: PathBuf,
    /// WebSocket port passed as `WAGATE_SIDECAR_PORT`.
    pub port: u16,
    /// Credential directory passed as `WAGATE_AUTH_DIR`.
    pub auth_dir: Option<PathBuf>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            sidecar_dir: PathBuf::new(),
            port: DEFAULT_SIDECAR_PORT,
            auth_dir: None,
        }
    }
}

/// Locate the sidecar directory.
///
/// Searches, in order: the explicit path, `WAGATE_SIDECAR_DIR`, paths next to
/// the executable (installed layout and `cargo run`), then paths relative to
/// the working directory.
pub fn find_sidecar_dir(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        if has_package_json(path) {
            return Ok(path.to_path_buf());
        }
        bail!(
            "sidecar directory does not exist or is missing package.json: {}",
            path.display()
        );
    }

    if let Ok(dir) = std::env::var("WAGATE_SIDECAR_DIR") {
        let path = PathBuf::from(&dir);
        if has_package_json(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "WAGATE_SIDECAR_DIR set but package.json not found");
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        for prefix in ["..", "../.."] {
            let candidate = exe_dir.join(prefix).join(SIDECAR_SUBDIR);
            if has_package_json(&candidate) {
                return Ok(candidate);
            }
        }
    }

    for prefix in [".", "..", "../.."] {
        let path = Path::new(prefix).join(SIDECAR_SUBDIR);
        if has_package_json(&path) {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    bail!(
        "sidecar not found. Set WAGATE_SIDECAR_DIR or sidecar.dir, or make sure \
         {SIDECAR_SUBDIR} exists with a package.json"
    )
}

fn has_package_json(dir: &Path) -> bool {
    dir.join("package.json").exists()
}

/// Whether `dist/index.js` exists.
pub fn is_sidecar_built(sidecar_dir: &Path) -> bool {
    sidecar_dir.join("dist/index.js").exists()
}

pub fn has_node_modules(sidecar_dir: &Path) -> bool {
    sidecar_dir.join("node_modules").exists()
}

/// Install and build the sidecar if needed, then spawn it.
pub async fn start_sidecar(config: ProcessConfig) -> Result<SidecarProcess> {
    let sidecar_dir = &config.sidecar_dir;
    if !has_package_json(sidecar_dir) {
        bail!(
            "sidecar not found at {dir}. Run `cd {dir} && npm install && npm run build` first.",
            dir = sidecar_dir.display()
        );
    }

    if !is_sidecar_built(sidecar_dir) {
        info!(path = %sidecar_dir.display(), "building sidecar");
        if !has_node_modules(sidecar_dir) {
            run_npm(sidecar_dir, &["install"]).await?;
        }
        run_npm(sidecar_dir, &["run", "build"]).await?;
    }

    info!(
        path = %sidecar_dir.display(),
        port = config.port,
        "starting sidecar process"
    );

    let mut cmd = Command::new("node");
    cmd.arg("dist/index.js")
        .current_dir(sidecar_dir)
        .env("WAGATE_SIDECAR_PORT", config.port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(auth_dir) = &config.auth_dir {
        cmd.env("WAGATE_AUTH_DIR", auth_dir);
    }

    let mut child = cmd.spawn().context("failed to spawn sidecar process")?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                forward_log_line(&line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "wagate_sidecar", "{}", line);
            }
        });
    }

    // Give the process a moment to fail fast on bad installs.
    tokio::time::sleep(STARTUP_GRACE).await;
    match child.try_wait() {
        Ok(Some(status)) => bail!("sidecar process exited immediately with status: {status}"),
        Ok(None) => {},
        Err(e) => bail!("failed to check sidecar process status: {e}"),
    }

    info!(port = config.port, "sidecar process started");
    Ok(SidecarProcess {
        child,
        port: config.port,
    })
}

async fn run_npm(sidecar_dir: &Path, args: &[&str]) -> Result<()> {
    let command = format!("npm {}", args.join(" "));
    info!(path = %sidecar_dir.display(), command, "running npm for sidecar");

    let output = Command::new("npm")
        .args(args)
        .current_dir(sidecar_dir)
        .output()
        .await
        .with_context(|| format!("failed to run {command}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{command} failed: {stderr}");
    }
    Ok(())
}

/// Sidecar log severity, from pino's numeric levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Split a stdout line into level and message. Structured (pino) lines carry
/// a numeric `level` and a `msg`; anything else is logged verbatim at info.
fn parse_log_line(line: &str) -> (LogLevel, String) {
    if line.starts_with('{')
        && let Ok(log) = serde_json::from_str::<serde_json::Value>(line)
    {
        let level = match log.get("level").and_then(|v| v.as_u64()).unwrap_or(30) {
            0..=29 => LogLevel::Debug,
            30..=39 => LogLevel::Info,
            40..=49 => LogLevel::Warn,
            _ => LogLevel::Error,
        };
        let msg = log
            .get("msg")
            .and_then(|v| v.as_str())
            .unwrap_or(line)
            .to_string();
        return (level, msg);
    }
    (LogLevel::Info, line.to_string())
}

fn forward_log_line(line: &str) {
    let (level, msg) = parse_log_line(line);
    match level {
        LogLevel::Debug => debug!(target: "wagate_sidecar", "{}", msg),
        LogLevel::Info => info!(target: "wagate_sidecar", "{}", msg),
        LogLevel::Warn => warn!(target: "wagate_sidecar", "{}", msg),
        LogLevel::Error => error!(target: "wagate_sidecar", "{}", msg),
    }
}
