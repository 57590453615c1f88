//! Remote trigger for configuration reload.

use crate::ipc::{Function, HandlerError, Interface, IpcError, ServerHandle};
use std::sync::Arc;
use tracing::info;

/// `io.hwconfd.Configuration` on the root node.
pub struct ConfigurationService {
    interface: Arc<Interface>,
}

impl ConfigurationService {
    /// Publish `reload()`, which runs `reload` on the dispatch thread.
    pub fn register<F>(server: &ServerHandle, reload: F) -> Result<Self, IpcError>
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        let interface = Interface::builder("", "Configuration")
            .function(
                "reload",
                Function::new(move |_| {
                    info!("Reloading configuration");
                    reload().map_err(HandlerError)?;
                    Ok(Vec::new())
                }),
            )
            .build();
        interface.register_interface(server)?;
        Ok(Self { interface })
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }
}

impl Drop for ConfigurationService {
    fn drop(&mut self) {
        self.interface.unregister_interface();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::transport::MemoryTransport;
    use crate::ipc::Server;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_reload_invokes_callback() {
        let (transport, _client) = MemoryTransport::new("test");
        let server = Server::new(transport);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let _service = ConfigurationService::register(&server.handle(), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let reply = server
            .call_method("/io/hwconfd", "io.hwconfd.Configuration", "reload", &[])
            .unwrap();
        assert!(reply.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reload_failure_is_internal_error() {
        let (transport, _client) = MemoryTransport::new("test");
        let server = Server::new(transport);
        let _service = ConfigurationService::register(&server.handle(), || {
            Err("config.toml: expected a table".to_string())
        })
        .unwrap();

        let err = server
            .call_method("/io/hwconfd", "io.hwconfd.Configuration", "reload", &[])
            .unwrap_err();
        assert_eq!(
            err,
            IpcError::Internal("config.toml: expected a table".to_string())
        );
    }
}
