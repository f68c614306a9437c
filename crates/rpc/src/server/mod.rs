//! RPC server: service registry, connection handling and HTTP front end.

mod debug_page;
mod dispatch;
mod http;

use crate::error::{NotFoundError, RegistrationError, Result};
use crate::registry::{MethodDescriptor, Service};
use crate::tunnel::{DEFAULT_DEBUG_PATH, DEFAULT_RPC_PATH};

use arpc_codec::MAX_FRAME_LENGTH;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Configuration for the RPC server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path accepting HTTP CONNECT tunnels.
    pub rpc_path: String,
    /// Path serving the debug page.
    pub debug_path: String,
    /// Maximum frame size.
    pub max_frame_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            debug_path: DEFAULT_DEBUG_PATH.to_string(),
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

/// RPC server.
///
/// Services can be registered while the server is running. Each accepted
/// connection is served on its own task, with one task per in-flight request.
#[derive(Debug, Default)]
pub struct Server {
    services: DashMap<String, Arc<Service>>,
    config: ServerConfig,
}

impl Server {
    /// Create a server.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            services: DashMap::new(),
            config,
        }
    }

    /// The server configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a service.
    ///
    /// # Errors
    ///
    /// Returns an error if a service with the same name is already registered.
    pub fn register(&self, service: Service) -> Result<()> {
        match self.services.entry(service.name().to_string()) {
            Entry::Occupied(entry) => {
                Err(RegistrationError::DuplicateService(entry.key().clone()).into())
            }
            Entry::Vacant(entry) => {
                info!("Registered service: {}", service.name());
                entry.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Resolve a `Service.Method` string.
    ///
    /// The string must contain exactly one `.`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is ill-formed or names an unknown
    /// service or method.
    pub fn find(&self, service_method: &str) -> Result<(Arc<Service>, Arc<MethodDescriptor>)> {
        let (service_name, method_name) = service_method
            .split_once('.')
            .filter(|(_, method_name)| !method_name.contains('.'))
            .ok_or_else(|| NotFoundError::IllFormed(service_method.to_string()))?;

        let service = self
            .services
            .get(service_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| NotFoundError::Service(service_name.to_string()))?;

        let method = service
            .method(method_name)
            .cloned()
            .ok_or_else(|| NotFoundError::Method(method_name.to_string()))?;

        Ok((service, method))
    }

    /// All registered services, sorted by name.
    #[must_use]
    pub fn services(&self) -> Vec<Arc<Service>> {
        let mut services: Vec<_> = self
            .services
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        services.sort_by(|a, b| a.name().cmp(b.name()));
        services
    }

    /// Accept raw RPC connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns the listener's error.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("rpc server: listening on {:?}", listener.local_addr());

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {}", addr);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.serve_conn(stream).await;
                        debug!("Connection from {} closed", addr);
                    });
                }
                Err(e) => {
                    error!("rpc server: accept error: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Serve one connection: handshake, then requests until the client goes
    /// away. Returns once every in-flight request has been answered.
    pub async fn serve_conn<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        dispatch::serve_conn(self, stream).await;
    }
}
