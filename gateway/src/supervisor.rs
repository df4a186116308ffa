//! Launching of the companion plot service.
//!
//! Freeing a port is platform specific and lives behind [`ProcessManager`];
//! everything else goes through `tokio::process`.

use crate::config::Config;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};

#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to free port {port}: {reason}")]
    FreePort { port: u16, reason: String },
}

/// Command line of the companion process.
#[derive(Clone, Debug, PartialEq)]
pub struct CompanionCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CompanionCommand {
    /// `{python} -m uvicorn {app} --host {host} --port {port} --app-dir {dir}`
    pub fn uvicorn(config: &Config) -> Self {
        let supervisor = &config.supervisor;
        CompanionCommand {
            program: supervisor.python_path.clone(),
            args: vec![
                "-m".into(),
                "uvicorn".into(),
                supervisor.plot_service_script.clone(),
                "--host".into(),
                config.plot_service.host.clone(),
                "--port".into(),
                config.plot_service.port.to_string(),
                "--app-dir".into(),
                supervisor.app_dir.display().to_string(),
            ],
        }
    }
}

#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Terminates whatever process listens on `port`. Succeeds when nothing does.
    async fn free_port(&self, port: u16) -> Result<(), SupervisorError>;

    /// Starts `command` with inherited stdout/stderr. The child is killed
    /// when its handle is dropped.
    fn spawn(&self, command: &CompanionCommand) -> Result<Child, SupervisorError> {
        Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: command.program.display().to_string(),
                source,
            })
    }
}

/// Frees ports with `fuser`, falling back to `lsof` + `kill`.
#[cfg(unix)]
pub struct UnixProcessManager;

#[cfg(unix)]
#[async_trait]
impl ProcessManager for UnixProcessManager {
    async fn free_port(&self, port: u16) -> Result<(), SupervisorError> {
        let failed = |reason: String| SupervisorError::FreePort { port, reason };

        match Command::new("fuser")
            .arg("-k")
            .arg(format!("{port}/tcp"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            // fuser exits 1 when no process matched.
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("fuser not available, trying lsof");
            }
            Err(e) => return Err(failed(e.to_string())),
        }

        let output = Command::new("lsof")
            .arg("-t")
            .arg(format!("-iTCP:{port}"))
            .arg("-sTCP:LISTEN")
            .output()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for pid in stdout.split_whitespace() {
            tracing::info!(port, pid, "killing process holding port");
            let status = Command::new("kill")
                .arg(pid)
                .status()
                .await
                .map_err(|e| failed(e.to_string()))?;
            if !status.success() {
                return Err(failed(format!("kill {pid} exited with {status}")));
            }
        }
        Ok(())
    }
}

/// Frees ports through PowerShell's `Get-NetTCPConnection`.
#[cfg(windows)]
pub struct WindowsProcessManager;

#[cfg(windows)]
#[async_trait]
impl ProcessManager for WindowsProcessManager {
    async fn free_port(&self, port: u16) -> Result<(), SupervisorError> {
        let script = format!(
            "Get-NetTCPConnection -LocalPort {port} -ErrorAction SilentlyContinue | \
             ForEach-Object {{ Stop-Process -Id $_.OwningProcess -Force }}"
        );
        let status = Command::new("powershell")
            .args(["-NoProfile", "-Command", script.as_str()])
            .status()
            .await
            .map_err(|e| SupervisorError::FreePort {
                port,
                reason: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(SupervisorError::FreePort {
                port,
                reason: format!("powershell exited with {status}"),
            })
        }
    }
}

/// The process manager for the current platform.
pub fn platform_manager() -> Arc<dyn ProcessManager> {
    #[cfg(windows)]
    {
        Arc::new(WindowsProcessManager)
    }
    #[cfg(unix)]
    {
        Arc::new(UnixProcessManager)
    }
}

/// Owns the companion process for the lifetime of the gateway.
pub struct Supervisor {
    manager: Arc<dyn ProcessManager>,
    child: Option<Child>,
}

impl Supervisor {
    pub fn new(manager: Arc<dyn ProcessManager>) -> Self {
        Supervisor {
            manager,
            child: None,
        }
    }

    /// Frees the gateway and plot service ports (if configured), then launches
    /// the plot service. Only a failed launch is an error.
    pub async fn start(&mut self, config: &Config) -> Result<(), SupervisorError> {
        if config.supervisor.free_ports {
            for port in [config.listener.port, config.plot_service.port] {
                if let Err(e) = self.manager.free_port(port).await {
                    tracing::warn!(error = %e, "could not free port");
                }
            }
        }

        let command = CompanionCommand::uvicorn(config);
        tracing::info!(program = %command.program.display(), args = ?command.args, "launching plot service");
        let child = self.manager.spawn(&command)?;
        tracing::info!(pid = ?child.id(), "plot service started");
        self.child = Some(child);
        Ok(())
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.kill().await {
            Ok(()) => tracing::info!("plot service stopped"),
            Err(e) => tracing::warn!(error = %e, "failed to stop plot service"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeManager {
        freed: Mutex<Vec<u16>>,
        program: Option<CompanionCommand>,
    }

    #[async_trait]
    impl ProcessManager for FakeManager {
        async fn free_port(&self, port: u16) -> Result<(), SupervisorError> {
            self.freed.lock().unwrap().push(port);
            if port == 8080 {
                return Err(SupervisorError::FreePort {
                    port,
                    reason: "permission denied".into(),
                });
            }
            Ok(())
        }

        fn spawn(&self, command: &CompanionCommand) -> Result<Child, SupervisorError> {
            let replacement = self.program.as_ref().unwrap_or(command);
            Command::new(&replacement.program)
                .args(&replacement.args)
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| SupervisorError::Spawn {
                    program: replacement.program.display().to_string(),
                    source,
                })
        }
    }

    #[test]
    fn test_uvicorn_command() {
        let config = test_config(8081, "http://127.0.0.1:7000");
        let command = CompanionCommand::uvicorn(&config);

        assert_eq!(command.program, PathBuf::from("python"));
        assert_eq!(
            command.args,
            vec![
                "-m",
                "uvicorn",
                "python_ds.main:app",
                "--host",
                "127.0.0.1",
                "--port",
                "8081",
                "--app-dir",
                ".."
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_frees_ports_and_stop_kills_child() {
        let mut config = test_config(8081, "http://127.0.0.1:7000");
        config.supervisor.enabled = true;

        let manager = Arc::new(FakeManager {
            freed: Mutex::default(),
            program: Some(CompanionCommand {
                program: "sleep".into(),
                args: vec!["30".into()],
            }),
        });
        let mut supervisor = Supervisor::new(manager.clone());

        // A failure to free a port is not fatal.
        supervisor.start(&config).await.unwrap();
        assert_eq!(*manager.freed.lock().unwrap(), vec![8080, 8081]);
        assert!(supervisor.is_running());

        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_missing_program_fails_start() {
        let mut config = test_config(8081, "http://127.0.0.1:7000");
        config.supervisor.free_ports = false;
        config.supervisor.python_path = "/nonexistent/python".into();

        let manager = Arc::new(FakeManager::default());
        let mut supervisor = Supervisor::new(manager.clone());

        assert!(matches!(
            supervisor.start(&config).await,
            Err(SupervisorError::Spawn { .. })
        ));
        assert!(manager.freed.lock().unwrap().is_empty());
    }
}
