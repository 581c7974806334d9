//! WebDriver process management.
//!
//! A [`DriverManager`] finds a running `chromedriver`/`geckodriver` or
//! starts one. Drivers it started are stopped with it.

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::webdriver::BrowserType;

/// How long a freshly spawned driver gets to answer `/status`
const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);
const STARTUP_POLL: Duration = Duration::from_millis(100);
const STATUS_TIMEOUT: Duration = Duration::from_secs(1);

/// What a driver's `/status` endpoint reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Nothing answered
    Unreachable,
    /// Answered, but `value.ready` was not true
    Busy,
    Ready,
}

#[derive(Deserialize)]
struct StatusBody {
    value: StatusValue,
}

#[derive(Deserialize)]
struct StatusValue {
    #[serde(default)]
    ready: bool,
}

/// Starts and tracks WebDriver processes.
///
/// Owned by whoever launches browsers; processes it started are stopped
/// when it is dropped.
#[derive(Default)]
pub struct DriverManager {
    processes: Mutex<Vec<DriverProcess>>,
}

/// A driver this manager spawned
struct DriverProcess {
    browser_type: BrowserType,
    child: Child,
    port: u16,
}

impl DriverProcess {
    fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Stop the driver and, on unix, every browser in its process group
    fn stop(&mut self) {
        debug!("Stopping {} on port {}", self.browser_type.driver_command(), self.port);
        #[cfg(unix)]
        signal_group(self.child.id());
        if let Err(e) = self.child.kill() {
            debug!("Driver on port {} already gone: {}", self.port, e);
        }
        let _ = self.child.wait();
    }
}

/// SIGTERM then SIGKILL the group led by `pgid`
#[cfg(unix)]
fn signal_group(pgid: u32) {
    for (signal, pause) in [("-TERM", Some(Duration::from_millis(100))), ("-KILL", None)] {
        if let Err(e) = Command::new("kill")
            .args([signal, &format!("-{}", pgid)])
            .output()
        {
            debug!("kill {} -{} failed: {}", signal, pgid, e);
        }
        if let Some(pause) = pause {
            std::thread::sleep(pause);
        }
    }
}

impl DriverManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn processes(&self) -> MutexGuard<'_, Vec<DriverProcess>> {
        self.processes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// URL of a ready driver for `browser_type`: one we started, one on the
    /// conventional port, or a new one.
    pub async fn ensure_driver(&self, browser_type: BrowserType) -> Result<String> {
        let ours: Vec<String> = self
            .processes()
            .iter()
            .filter(|p| p.browser_type == browser_type)
            .map(DriverProcess::url)
            .collect();
        for url in ours {
            if Self::status(&url).await == DriverStatus::Ready {
                debug!("Reusing managed WebDriver at {}", url);
                return Ok(url);
            }
        }

        let conventional = browser_type.default_webdriver_url();
        if Self::status(conventional).await == DriverStatus::Ready {
            debug!("Found external WebDriver at {}", conventional);
            return Ok(conventional.to_string());
        }

        info!("No {} running, starting one", browser_type.driver_command());
        self.spawn_driver(browser_type).await
    }

    async fn spawn_driver(&self, browser_type: BrowserType) -> Result<String> {
        let command = browser_type.driver_command();
        if !Self::command_exists(command) {
            anyhow::bail!(
                "{} not found in PATH. Install it (e.g. `brew install {}`) or point \
                 browser.webdriver_url at a running driver",
                command,
                command
            );
        }

        let port = Self::find_free_port_for_browser(browser_type)?;
        let mut cmd = Command::new(command);
        match browser_type {
            BrowserType::Firefox => cmd.args(["--port", &port.to_string()]),
            BrowserType::Chrome => cmd.arg(format!("--port={}", port)),
        };
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        // Own process group so the driver's browsers can be stopped with it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        info!("Starting {} on port {}", command, port);
        let child = cmd.spawn().with_context(|| format!("Failed to start {}", command))?;
        let process = DriverProcess {
            browser_type,
            child,
            port,
        };
        let url = process.url();
        self.processes().push(process);

        let ready = tokio::time::timeout(STARTUP_TIMEOUT, async {
            while Self::status(&url).await == DriverStatus::Unreachable {
                tokio::time::sleep(STARTUP_POLL).await;
            }
        })
        .await;
        if ready.is_err() {
            warn!("{} did not answer within {:?}", command, STARTUP_TIMEOUT);
            self.stop_port(port);
            anyhow::bail!("WebDriver {} failed to start within {:?}", command, STARTUP_TIMEOUT);
        }
        info!("{} ready at {}", command, url);
        Ok(url)
    }

    /// Check if a command exists in PATH
    pub fn command_exists(command: &str) -> bool {
        #[cfg(unix)]
        let finder = "which";
        #[cfg(windows)]
        let finder = "where";

        Command::new(finder)
            .arg(command)
            .output()
            .is_ok_and(|output| output.status.success())
    }

    /// First free conventional port for the driver, else one from the OS
    pub fn find_free_port_for_browser(browser_type: BrowserType) -> Result<u16> {
        let preferred: [u16; 3] = match browser_type {
            BrowserType::Firefox => [4444, 4445, 4446],
            BrowserType::Chrome => [9515, 9516, 9517],
        };
        if let Some(port) = preferred.into_iter().find(|&port| !Self::is_port_in_use(port)) {
            return Ok(port);
        }
        let listener = TcpListener::bind("127.0.0.1:0").context("No free port for WebDriver")?;
        Ok(listener.local_addr()?.port())
    }

    pub fn is_port_in_use(port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).is_err()
    }

    /// Query `{url}/status`
    pub async fn status(url: &str) -> DriverStatus {
        let response = reqwest::Client::new()
            .get(format!("{}/status", url))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await;
        let Ok(response) = response else {
            return DriverStatus::Unreachable;
        };
        if !response.status().is_success() {
            return DriverStatus::Busy;
        }
        match response.json::<StatusBody>().await {
            Ok(body) if body.value.ready => DriverStatus::Ready,
            _ => DriverStatus::Busy,
        }
    }

    /// Something answers the status endpoint, ready or not
    pub async fn is_driver_running(url: &str) -> bool {
        Self::status(url).await != DriverStatus::Unreachable
    }

    /// Number of driver processes started by this manager
    pub fn managed_count(&self) -> usize {
        self.processes().len()
    }

    fn stop_port(&self, port: u16) {
        let mut processes = self.processes();
        if let Some(index) = processes.iter().position(|p| p.port == port) {
            processes.remove(index).stop();
        }
    }

    /// Stop every driver this manager started
    pub fn stop_all(&self) {
        for mut process in self.processes().drain(..) {
            process.stop();
        }
    }
}

impl Drop for DriverManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
#[path = "driver_manager_test.rs"]
mod driver_manager_test;
