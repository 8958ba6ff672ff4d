//! Per-connection lifecycle: handshake, relay loop, departure.
//!
//! A connection moves through three states. [`PendingSession`] is the
//! handshake: prompt for a name and read it. [`PendingSession::join`]
//! registers the connection and returns an [`ActiveSession`], which relays
//! inbound chunks until the stream ends. Leaving happens exactly once, at
//! the end of [`ActiveSession::run`], whatever ended the loop.

use std::{io, net::SocketAddr};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::RelayConfig,
    message::{NAME_PROMPT, chat_line, joined_line, left_line, resolve_name},
    registry::{ConnectionHandle, ConnectionId, RegistryError},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection closed before a name was sent")]
    ClosedDuringHandshake,
    #[error("handshake failed")]
    Handshake(#[source] io::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A connection that has been accepted but not yet registered.
pub struct PendingSession<R, W> {
    id: ConnectionId,
    peer: SocketAddr,
    reader: R,
    writer: W,
    broadcaster: Broadcaster,
    config: RelayConfig,
}

impl<R, W> PendingSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        reader: R,
        writer: W,
        broadcaster: Broadcaster,
        config: RelayConfig,
    ) -> Self {
        Self {
            id,
            peer,
            reader,
            writer,
            broadcaster,
            config,
        }
    }

    /// Ask for a name, register the connection and announce it to everyone else.
    ///
    /// On error nothing has been registered or announced.
    pub async fn join(self) -> Result<ActiveSession<R>, SessionError> {
        let PendingSession {
            id,
            peer,
            mut reader,
            mut writer,
            broadcaster,
            config,
        } = self;

        let name = read_name(&mut reader, &mut writer, peer, config.name_buffer_size).await?;

        broadcaster
            .registry()
            .add(ConnectionHandle::new(id, name.clone(), peer, writer))
            .await?;

        let announcement = joined_line(&name);
        info!(%peer, name, "client joined");
        broadcaster.broadcast(announcement.as_bytes(), Some(id)).await;

        Ok(ActiveSession {
            id,
            peer,
            name,
            reader,
            broadcaster,
            read_buffer_size: config.read_buffer_size,
        })
    }
}

async fn read_name<R, W>(
    reader: &mut R,
    writer: &mut W,
    peer: SocketAddr,
    buffer_size: usize,
) -> Result<String, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(NAME_PROMPT.as_bytes())
        .await
        .map_err(SessionError::Handshake)?;
    writer.flush().await.map_err(SessionError::Handshake)?;

    let mut buf = vec![0; buffer_size];
    let read = reader
        .read(&mut buf)
        .await
        .map_err(SessionError::Handshake)?;
    if read == 0 {
        return Err(SessionError::ClosedDuringHandshake);
    }

    Ok(resolve_name(&buf[..read], peer.port()))
}

/// A registered connection relaying its messages to the rest of the chat.
pub struct ActiveSession<R> {
    id: ConnectionId,
    peer: SocketAddr,
    name: String,
    reader: R,
    broadcaster: Broadcaster,
    read_buffer_size: usize,
}

impl<R> ActiveSession<R>
where
    R: AsyncRead + Unpin,
{
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relay inbound chunks until the peer goes away, then leave the chat.
    pub async fn run(mut self) {
        if let Err(error) = self.relay_messages().await {
            debug!(peer = %self.peer, name = %self.name, ?error, "connection error");
        }
        self.leave().await;
    }

    async fn relay_messages(&mut self) -> io::Result<()> {
        let mut buf = vec![0; self.read_buffer_size];
        loop {
            let read = self.reader.read(&mut buf).await?;
            if read == 0 {
                return Ok(());
            }

            let line = chat_line(&self.name, &buf[..read]);
            info!("{}", line.trim_end());
            self.broadcaster
                .broadcast(line.as_bytes(), Some(self.id))
                .await;
        }
    }

    async fn leave(self) {
        let ActiveSession {
            id,
            peer,
            name,
            reader,
            broadcaster,
            ..
        } = self;

        let handle = broadcaster.registry().remove(id).await;

        let notice = left_line(&name);
        info!(%peer, name, "client left");
        broadcaster.broadcast(notice.as_bytes(), Some(id)).await;

        if let Some(handle) = handle {
            if let Err(error) = handle.close().await {
                debug!(%peer, ?error, "failed to shut down stream");
            }
        }
        drop(reader);
    }
}

/// Drive one connection from handshake to departure.
pub async fn serve<R, W>(session: PendingSession<R, W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let peer = session.peer;
    match session.join().await {
        Ok(active) => active.run().await,
        Err(SessionError::Registry(error)) => {
            warn!(%peer, %error, "failed to register client");
        }
        Err(error) => debug!(%peer, %error, "handshake abandoned"),
    }
}
