use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    broadcast::Broadcaster,
    config::RelayConfig,
    registry::Registry,
    session::{self, PendingSession},
};

/// Accepts connections and hands each one to its own session task.
pub struct Server {
    listener: TcpListener,
    broadcaster: Broadcaster,
    config: RelayConfig,
}

impl Server {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self::with_registry(listener, Arc::new(Registry::new()), config)
    }

    /// Serve into an existing registry, e.g. one shared with other components.
    pub fn with_registry(
        listener: TcpListener,
        registry: Arc<Registry>,
        config: RelayConfig,
    ) -> Self {
        Self {
            listener,
            broadcaster: Broadcaster::new(registry, config.send_timeout),
            config,
        }
    }

    pub async fn bind(host: &str, port: u16, config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("failed to bind {host}:{port}"))?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.broadcaster.registry())
    }

    /// Accept until `shutdown` resolves. Sessions already running are left alone;
    /// the listener is closed when this returns.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            broadcaster,
            config,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    let (stream, peer) = accept_result.context("failed to accept connection")?;
                    spawn_session(stream, peer, &broadcaster, &config);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: &Broadcaster,
    config: &RelayConfig,
) {
    let id = broadcaster.registry().next_id();
    let (reader, writer) = stream.into_split();
    let session = PendingSession::new(
        id,
        peer,
        reader,
        writer,
        broadcaster.clone(),
        config.clone(),
    );
    tokio::spawn(session::serve(session));
}
