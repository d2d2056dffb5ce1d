use std::sync::Arc;
use std::time::Duration;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use crate::conn::Connection;
use crate::error::{CResult, Error};
use crate::wire::{Message, MessageCodec};

/// The storage identity handed to the mount in the `InitNotification` that
/// opens a fresh channel (spec §4.6). Out-of-scope subsystems (object
/// storage, block cache) are configured from this; this crate only
/// forwards it.
#[derive(Clone, Debug, PartialEq)]
pub struct InitInfo {
    pub storage: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub volume_name: String,
}

/// Caps the exponential reconnect backoff; doubles from 1s up to this.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Connects to `addr`, retrying with doubling backoff (1s, 2s, 4s, ... up
/// to `MAX_BACKOFF`) until a connection is accepted. Reads the leading
/// `InitNotification` off the new channel, then hands the rest of the
/// stream to a `Connection` multiplexer and sends `ReadyNotification` once
/// the caller reports the mount is live via the returned ready signal.
pub async fn connect(addr: &str) -> CResult<(Arc<Connection>, InitInfo)> {
    let stream = connect_with_backoff(addr).await;
    let mut framed = Framed::new(stream, MessageCodec::new());

    let init = match framed.next().await {
        Some(Ok(Message::InitNotification { storage, bucket, access_key, secret_key, volume_name })) => {
            InitInfo { storage, bucket, access_key, secret_key, volume_name }
        }
        Some(Ok(other)) => return Err(Error::Protocol(format!("expected InitNotification, got {other:?}"))),
        Some(Err(err)) => return Err(err),
        None => return Err(Error::ChannelClosed),
    };

    let conn = Connection::spawn_framed(framed);
    Ok((conn, init))
}

/// Sends `ReadyNotification` on `conn`, signalling the mount is live. Per
/// spec §4.6 this carries no id and the peer must never answer it.
pub fn mark_ready(conn: &Connection) -> CResult<()> {
    conn.notify(Message::ReadyNotification)
}

async fn connect_with_backoff(addr: &str) -> TcpStream {
    let mut backoff = Duration::from_secs(1);
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return stream,
            Err(err) => {
                log::warn!("connect to {addr} failed ({err}), retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
        }
    }
}
