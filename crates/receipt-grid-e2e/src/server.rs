//! Application server management - optional spawning and reachability checks

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Poll `url` until it answers with a success or redirect status
pub async fn wait_for_reachable(url: &str, timeout: Duration) -> E2eResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                info!("Application reachable at {} after {} attempt(s)", url, attempts);
                return Ok(());
            }
            Ok(resp) => {
                warn!("{} returned {}", url, resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for application at {}...", url);
                }
                // Connection refused is expected while the dev server boots
                if !e.is_connect() && !e.is_timeout() {
                    warn!("Reachability check error: {}", e);
                }
            }
        }

        if start.elapsed() >= timeout {
            return Err(E2eError::AppUnreachable {
                url: url.to_string(),
                attempts,
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Handle to an application process started by the harness
pub struct ServerHandle {
    child: Child,
    base_url: String,
}

impl ServerHandle {
    /// Start the application and wait until it serves `config.url`
    pub async fn spawn(config: &ServerConfig) -> E2eResult<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| E2eError::ServerStartup("empty server command".to_string()))?;

        info!("Starting application: {}", config.command.join(" "));

        let child = Command::new(program)
            .args(args)
            .current_dir(&config.working_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| E2eError::ServerStartup(format!("Failed to spawn {}: {}", program, e)))?;

        let handle = ServerHandle {
            child,
            base_url: config.url.clone(),
        };

        // On failure the handle drops here and the process is stopped
        wait_for_reachable(&handle.base_url, config.startup_timeout).await?;

        Ok(handle)
    }

    /// Stop the application
    pub fn stop(&mut self) -> E2eResult<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        info!("Stopping application (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();

        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// How to start the application under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Program and arguments, e.g. `["npm", "run", "dev"]`; empty means the
    /// application is already running
    pub command: Vec<String>,

    /// Directory the command runs in
    pub working_dir: PathBuf,

    /// URL polled for readiness
    pub url: String,

    #[serde(with = "secs")]
    pub startup_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: vec![],
            working_dir: PathBuf::from("."),
            url: "http://localhost:5173".to_string(),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn should_spawn(&self) -> bool {
        !self.command.is_empty()
    }
}

/// Durations stored as whole seconds in config files
pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
