//! Background daemon publishing hardware configuration over IPC.
//!
//! The daemon:
//! 1. Binds the IPC socket, falling back to the per-user socket
//! 2. Publishes the device manager and configuration interfaces
//! 3. Optionally publishes simulated hardware
//! 4. Serves requests on a dispatch thread until interrupted

use crate::config::{Config, ConfigError};
use crate::ipc::transport::{SocketClient, SocketTransport, Transport, TransportError};
use crate::ipc::{ClientRequest, IpcError, ResponseData, Server};
use crate::services::{ConfigurationService, DeviceManagerService, SimulatedHardware};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Daemon already running at {0}")]
    AlreadyRunning(PathBuf),

    #[error("Daemon not running")]
    NotRunning,

    #[error("Dispatch thread failed: {0}")]
    Dispatch(String),
}

/// Options from the command line that override the config file.
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub config_path: Option<PathBuf>,
    pub socket_path: Option<PathBuf>,
    pub simulate: bool,
}

fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(p) => Config::load_from(p),
        None => Config::load(),
    }
}

/// Bind the primary socket, or the fallback when the primary is unusable.
fn bind_transport(config: &Config) -> Result<SocketTransport, DaemonError> {
    let primary = &config.ipc.socket_path;
    match SocketTransport::bind(primary) {
        Ok(transport) => Ok(transport),
        Err(e) if is_running_at(primary) => {
            error!("{}", e);
            Err(DaemonError::AlreadyRunning(primary.clone()))
        }
        Err(e) => {
            warn!("{}; using {}", e, config.ipc.fallback_socket_path.display());
            if is_running_at(&config.ipc.fallback_socket_path) {
                return Err(DaemonError::AlreadyRunning(
                    config.ipc.fallback_socket_path.clone(),
                ));
            }
            Ok(SocketTransport::bind(&config.ipc.fallback_socket_path)?)
        }
    }
}

fn is_running_at(path: &Path) -> bool {
    SocketClient::connect(path)
        .and_then(|mut client| client.send(ClientRequest::Ping))
        .map(|response| response.ok)
        .unwrap_or(false)
}

/// Main daemon struct
pub struct Daemon {
    config: Arc<RwLock<Config>>,
    config_path: Option<PathBuf>,
    simulate: bool,
    server: Server,
}

impl Daemon {
    pub fn new(options: DaemonOptions) -> Result<Self, DaemonError> {
        let mut config = load_config(options.config_path.as_deref())?;
        if let Some(socket) = options.socket_path {
            config.ipc.socket_path = socket;
        }

        let transport: Arc<dyn Transport> = Arc::new(bind_transport(&config)?);
        let server = Server::with_poll_interval(
            transport,
            Duration::from_millis(config.ipc.poll_interval_ms),
        );

        let fallback = config.ipc.fallback_socket_path.clone();
        server.set_fallback(move || {
            let transport: Arc<dyn Transport> = Arc::new(SocketTransport::bind(&fallback)?);
            Ok(transport)
        });

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: options.config_path,
            simulate: options.simulate,
            server,
        })
    }

    /// Main daemon loop
    pub async fn run_loop(&mut self) -> Result<(), DaemonError> {
        let handle = self.server.handle();
        info!("hwconfd started on {}", handle.transport_description());

        let manager = DeviceManagerService::register(&handle)?;

        let shared = Arc::clone(&self.config);
        let config_path = self.config_path.clone();
        let _configuration = ConfigurationService::register(&handle, move || {
            let fresh = load_config(config_path.as_deref()).map_err(|e| e.to_string())?;
            let mut current = shared.write().unwrap_or_else(PoisonError::into_inner);
            if fresh.ipc != current.ipc {
                warn!("IPC settings changed; they take effect on restart");
            }
            *current = fresh;
            info!("Configuration reloaded");
            Ok(())
        })?;

        let _hardware = if self.simulate {
            Some(SimulatedHardware::register(&handle, &manager)?)
        } else {
            None
        };

        let dispatch = handle.clone();
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();
        let worker = thread::Builder::new()
            .name("ipc-dispatch".to_string())
            .spawn(move || {
                let _ = done_tx.send(dispatch.listen());
            })
            .map_err(|e| DaemonError::Dispatch(e.to_string()))?;

        let finished = tokio::select! {
            finished = &mut done_rx => Some(finished),
            _ = tokio::signal::ctrl_c() => None,
        };
        let outcome = match finished {
            Some(outcome) => outcome,
            None => {
                info!("Shutdown signal received");
                handle.stop();
                done_rx.await
            }
        };
        if worker.join().is_err() {
            error!("IPC dispatch thread panicked");
        }

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DaemonError::Ipc(e)),
            Err(_) => Err(DaemonError::Dispatch("dispatch thread exited early".to_string())),
        };

        info!("Daemon stopped");
        result
    }
}

/// Start the daemon in the foreground
pub async fn run(options: DaemonOptions) -> Result<(), DaemonError> {
    let mut daemon = Daemon::new(options)?;
    daemon.run_loop().await
}

/// Find the socket of a running daemon, primary first.
pub fn locate(config: &Config) -> Option<PathBuf> {
    [&config.ipc.socket_path, &config.ipc.fallback_socket_path]
        .into_iter()
        .find(|path| is_running_at(path))
        .cloned()
}

/// Check daemon status
pub fn status(config: &Config) -> Result<(), DaemonError> {
    let path = locate(config).ok_or(DaemonError::NotRunning)?;
    let mut client = SocketClient::connect(&path)?;
    match client.send(ClientRequest::Ping)?.data {
        Some(ResponseData::Pong { timestamp }) => {
            println!("hwconfd is running at {} (time {})", path.display(), timestamp);
        }
        _ => println!("hwconfd is running at {}", path.display()),
    }
    let objects = client.introspect(None)?;
    println!("{} objects published", objects.len());
    Ok(())
}
