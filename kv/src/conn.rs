use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use crate::error::{CResult, Error};
use crate::wire::{Message, MessageCodec};

/// Multiplexes many concurrent request/response round-trips over one
/// ordered, full-duplex `TcpStream`. Every request gets a fresh id from a
/// process-wide counter; a single writer task serializes outbound frames
/// so they are never interleaved, and a single reader task demultiplexes
/// inbound frames by id back to the waiting caller.
///
/// This is the client-side half of spec §4.5: the server never needs a
/// multiplexer of its own because a `Session` only ever has one request in
/// flight for the purposes of ordering (it replies in arrival order).
pub struct Connection {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    outbound: mpsc::UnboundedSender<Message>,
    /// Fired once (by closing) when the reader or writer task observes the
    /// channel going away, so a fresh `send` fails fast instead of hanging.
    closed: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Connection {
    /// Splits `stream` into a writer task and a reader task and returns a
    /// handle multiplexing requests over both.
    pub fn spawn(stream: TcpStream) -> std::sync::Arc<Self> {
        Self::spawn_framed(Framed::new(stream, MessageCodec::new()))
    }

    /// Like `spawn`, but takes an already-constructed `Framed` stream. Lets
    /// `crate::bootstrap` read the leading `InitNotification` off the wire
    /// before handing the rest of the connection to the multiplexer.
    pub fn spawn_framed(framed: Framed<TcpStream, MessageCodec>) -> std::sync::Arc<Self> {
        let (mut sink, mut source) = framed.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (closed_tx, closed_rx) = oneshot::channel();

        let conn = std::sync::Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound: out_tx,
            closed: Mutex::new(Some(closed_rx)),
        });

        let reader_conn = conn.clone();
        tokio::spawn(async move {
            while let Some(result) = source.next().await {
                match result {
                    Ok(msg) => {
                        if let Some(id) = msg.id() {
                            if let Some(waiter) = reader_conn.pending.lock().unwrap().remove(&id) {
                                let _ = waiter.send(msg);
                            }
                        }
                    }
                    Err(err) => {
                        log::warn!("connection read failed: {err}");
                        break;
                    }
                }
            }
            reader_conn.fail_all_pending();
        });

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(err) = sink.send(msg).await {
                    log::warn!("connection write failed: {err}");
                    break;
                }
            }
            let _ = closed_tx.send(());
        });

        conn
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends a requestless, un-ided notification (e.g. `ReadyNotification`).
    pub fn notify(&self, msg: Message) -> CResult<()> {
        self.outbound.send(msg).map_err(|_| Error::ChannelClosed)
    }

    /// Sends `build(id)` and awaits the matching response by id. Returns
    /// `Error::ChannelClosed` if the channel was already gone, or if it
    /// closes while the call is in flight.
    pub async fn call(&self, build: impl FnOnce(u64) -> Message) -> CResult<Message> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        if self.outbound.send(build(id)).is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(Error::ChannelClosed);
        }

        rx.await.map_err(|_| Error::ChannelClosed)
    }

    fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().unwrap();
        for (_, waiter) in pending.drain() {
            drop(waiter); // dropping the sender fails the receiver with RecvError
        }
    }
}
