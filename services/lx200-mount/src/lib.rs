//! LX200 mount control daemon
//!
//! Owns a single RS-232 link to an LX200-protocol telescope mount and
//! exposes a serialized, stateful command surface over HTTP to the other
//! observatory daemons. One worker task talks to the hardware; everything
//! else goes through its queue.

pub mod api;
pub mod astro;
pub mod config;
pub mod dome;
pub mod ephemeris;
pub mod error;
pub mod io;
pub mod limits;
pub mod mock;
pub mod mount;
pub mod protocol;
pub mod serial;
pub mod store;
pub mod types;
mod worker;

pub use config::{load_config, Config};
pub use error::{MountError, Result};
pub use mount::MountDaemon;
pub use types::{CommandStatus, MountState};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::astro::Astrometry;
use crate::dome::{DomeNotifier, HttpDomeNotifier, NoopDomeNotifier};
use crate::ephemeris::MeeusAstrometry;
use crate::io::MountPortFactory;
use crate::serial::TokioMountPortFactory;

/// Builder for the mount daemon and its HTTP command surface
pub struct ServerBuilder {
    config: Config,
    port_factory: Arc<dyn MountPortFactory>,
    astrometry: Arc<dyn Astrometry>,
    dome: Option<Arc<dyn DomeNotifier>>,
}

impl ServerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            port_factory: Arc::new(TokioMountPortFactory::new()),
            astrometry: Arc::new(MeeusAstrometry::new()),
            dome: None,
        }
    }

    pub fn with_port_factory(mut self, factory: Arc<dyn MountPortFactory>) -> Self {
        self.port_factory = factory;
        self
    }

    pub fn with_astrometry(mut self, astrometry: Arc<dyn Astrometry>) -> Self {
        self.astrometry = astrometry;
        self
    }

    pub fn with_dome(mut self, dome: Arc<dyn DomeNotifier>) -> Self {
        self.dome = Some(dome);
        self
    }

    /// Spawn the worker and bind the command surface
    pub async fn build(self) -> std::result::Result<BoundServer, Box<dyn std::error::Error>> {
        let dome: Arc<dyn DomeNotifier> = match self.dome {
            Some(dome) => dome,
            None => match &self.config.dome {
                Some(dome_config) => {
                    info!("Dome notifications to {}", dome_config.url);
                    Arc::new(HttpDomeNotifier::new(dome_config))
                }
                None => Arc::new(NoopDomeNotifier),
            },
        };

        let config = Arc::new(self.config);
        let daemon = Arc::new(MountDaemon::new(
            Arc::clone(&config),
            self.astrometry,
            dome,
            self.port_factory,
        ));
        let router = api::build_router(Arc::clone(&daemon));

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await?;
        info!("Mount daemon listening on http://{}", listener.local_addr()?);

        Ok(BoundServer {
            daemon,
            router,
            listener,
        })
    }
}

/// A bound, not yet serving daemon
pub struct BoundServer {
    daemon: Arc<MountDaemon>,
    router: Router,
    listener: TcpListener,
}

impl BoundServer {
    pub fn daemon(&self) -> Arc<MountDaemon> {
        Arc::clone(&self.daemon)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the process is terminated
    pub async fn start(self) -> std::io::Result<()> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}
