use std::sync::Arc;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use crate::storage::engine::Engine;
use crate::store::Store;
use crate::wire::{Message, MessageCodec};

/// A server-side context bound to one connection, servicing frames in
/// arrival order as spec §3 requires of a `Session`. Holds no state of its
/// own beyond the shared `Store` — all the interesting state (versions,
/// entries) lives there, guarded by its own lock, so many sessions can run
/// concurrently against one store.
pub struct Session<E: Engine> {
    store: Arc<Store<E>>,
}

impl<E: Engine> Session<E> {
    pub fn new(store: Arc<Store<E>>) -> Self {
        Self { store }
    }

    /// Runs the request/response loop for `stream` until it closes or a
    /// malformed frame is received. A decode error, per spec §7, is fatal
    /// for the session: the connection is dropped rather than resynced.
    pub async fn serve(self, stream: TcpStream) {
        self.serve_framed(Framed::new(stream, MessageCodec::new())).await
    }

    /// Like `serve`, but over an already-framed stream. Lets a caller (e.g.
    /// `kv-server`) send the leading `InitNotification` on the fresh
    /// connection before handing the rest of it to this loop, per spec
    /// §4.6.
    pub async fn serve_framed(self, mut framed: Framed<TcpStream, MessageCodec>) {
        loop {
            let frame = match framed.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    log::warn!("session closing on protocol error: {err}");
                    return;
                }
                None => return, // clean EOF
            };

            match self.dispatch(frame) {
                Some(response) => {
                    if let Err(err) = framed.send(response).await {
                        log::warn!("session closing on write error: {err}");
                        return;
                    }
                }
                None => {} // a notification; no response is sent
            }
        }
    }

    /// Handles one frame and returns its response, or `None` for
    /// one-shot notifications that never get one.
    fn dispatch(&self, msg: Message) -> Option<Message> {
        match msg {
            Message::GetReq { id, key } => {
                let (value, ver) = match self.store.get(&key) {
                    Ok(result) => result,
                    Err(err) => {
                        log::error!("get failed: {err}");
                        (None, 0)
                    }
                };
                let found = ver > 0;
                Some(Message::GetResp { id, value, ver, found })
            }

            Message::ListReq { id, start, end, keys_only, limit } => {
                let entries = self.store.range(&start, &end, keys_only, limit).unwrap_or_else(|err| {
                    log::error!("range failed: {err}");
                    Vec::new()
                });
                Some(Message::ListResp { id, entries })
            }

            Message::CommitReq { id, reads, puts, dels } => {
                let (ok, error) = match self.store.commit(&reads, puts, dels) {
                    Ok(()) => (true, None),
                    Err(err) => (false, Some(err.to_string())),
                };
                Some(Message::CommitResp { id, ok, error })
            }

            Message::ResetReq { id } => {
                let (ok, error) = match self.store.reset() {
                    Ok(()) => (true, None),
                    Err(err) => (false, Some(err.to_string())),
                };
                Some(Message::ResetResp { id, ok, error })
            }

            Message::ReadyNotification => None,
            Message::InitNotification { .. } => None,
            Message::Put { .. } | Message::ObservedLegacy(_) => None,

            Message::GetResp { .. } | Message::ListResp { .. } | Message::CommitResp { .. } | Message::ResetResp { .. } => {
                log::warn!("session received a response-shaped frame from a client, ignoring");
                None
            }
        }
    }
}
