//! HTTP Listener (§4.L): the transport boundary between clients and the Forwarding
//! Engine. Built on `actix-web`, matching the teacher gateway's server layer.

pub mod builder;
mod listener;

pub use builder::run_server;

use crate::core::manager::Manager;
use actix_web::{middleware::Logger, web, App, HttpServer as ActixHttpServer};
use std::sync::Arc;
use tracing::info;

/// Owns the bound listener configuration and a handle to the [`Manager`] every request
/// is forwarded through.
pub struct HttpListener {
    manager: Arc<Manager>,
    listen_addr: String,
}

impl HttpListener {
    pub fn new(manager: Arc<Manager>, listen_addr: String) -> Self {
        Self { manager, listen_addr }
    }

    /// Bind and serve forever. Accepts any path and method; routing to the correct
    /// endpoint happens entirely inside the Forwarding Engine, not at this layer (§6:
    /// "the proxy accepts any path").
    pub async fn run(self) -> crate::utils::error::Result<()> {
        let manager = web::Data::new(self.manager);
        info!(addr = %self.listen_addr, "HTTP listener binding");

        ActixHttpServer::new(move || {
            App::new()
                .app_data(manager.clone())
                .wrap(Logger::default())
                .default_service(web::route().to(listener::forward_any))
        })
        .bind(&self.listen_addr)
        .map_err(|e| {
            crate::utils::error::ProxyError::Config(format!(
                "failed to bind {}: {e}",
                self.listen_addr
            ))
        })?
        .run()
        .await
        .map_err(|e| crate::utils::error::ProxyError::Config(format!("HTTP server error: {e}")))?;

        Ok(())
    }
}
