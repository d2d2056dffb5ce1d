use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use crate::conn::Connection;
use crate::error::{CResult, Error};
use crate::wire::{Entry, Message, ReadRange};

/// The immediate lexicographic successor of `key`: the smallest byte
/// string strictly greater than `key`. Used to turn a point read into the
/// `[key, successor)` range spec §4.3 validates point reads as.
fn successor(key: &[u8]) -> Vec<u8> {
    let mut end = key.to_vec();
    end.push(0x00);
    end
}

/// The end of the smallest range containing exactly the keys with `prefix`
/// as a byte-prefix, by incrementing the last non-0xff byte (the same
/// rollover `storage::engine::Engine::scan_prefix` uses server-side).
fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    match prefix.iter().rposition(|b| *b != 0xff) {
        Some(i) => prefix.iter().take(i).copied().chain(std::iter::once(prefix[i] + 1)).collect(),
        None => vec![0xff; prefix.len() + 1],
    }
}

/// One write buffered inside a transaction: `Some(value)` for a `set`,
/// `None` for a `delete`.
type Write = Option<Vec<u8>>;

/// A single attempt at a unit of work: buffered writes plus an observed
/// read-set, committed atomically at the end. Never shared across retries
/// — `run` builds a fresh one per attempt, per spec §4.4.
pub struct Transaction {
    conn: Arc<Connection>,
    writes: HashMap<Vec<u8>, Write>,
    reads: Vec<ReadRange>,
}

impl Transaction {
    fn new(conn: Arc<Connection>) -> Self {
        Self { conn, writes: HashMap::new(), reads: Vec::new() }
    }

    /// Returns the value for `key`, or `None` if absent. Served from the
    /// write buffer with no RPC if this transaction already wrote it.
    pub async fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        if let Some(write) = self.writes.get(key) {
            return Ok(write.clone());
        }

        let resp = self.conn.call(|id| Message::GetReq { id, key: key.to_vec() }).await?;
        let Message::GetResp { value, ver, found, .. } = resp else {
            return Err(Error::Protocol("expected GetResp".into()));
        };

        let observed = if found {
            vec![Entry { key: key.to_vec(), value: None, ver }]
        } else {
            vec![]
        };
        self.reads.push(ReadRange { start: key.to_vec(), end: successor(key), observed, keys_only: false, limit: 0 });

        Ok(if found { value } else { None })
    }

    /// Scans `[start, end)` ascending, calling `handler` with each entry's
    /// key and (unless `keys_only`) value. Stops early the first time
    /// `handler` returns `false`. Buffered writes in this transaction are
    /// NOT folded into the results.
    pub async fn scan(
        &mut self,
        start: &[u8],
        end: &[u8],
        keys_only: bool,
        mut handler: impl FnMut(&[u8], Option<&[u8]>) -> bool,
    ) -> CResult<()> {
        let resp = self
            .conn
            .call(|id| Message::ListReq { id, start: start.to_vec(), end: end.to_vec(), keys_only, limit: 0 })
            .await?;
        let Message::ListResp { entries } = resp else {
            return Err(Error::Protocol("expected ListResp".into()));
        };

        self.reads.push(ReadRange {
            start: start.to_vec(),
            end: end.to_vec(),
            observed: entries.clone(),
            keys_only,
            limit: 0,
        });

        for entry in &entries {
            if !handler(&entry.key, entry.value.as_deref()) {
                break;
            }
        }
        Ok(())
    }

    /// Reports whether any key has `prefix` as a byte-prefix, via a
    /// keys-only, limit-1 scan so it never depends on value contents.
    pub async fn exists(&mut self, prefix: &[u8]) -> CResult<bool> {
        let end = prefix_end(prefix);
        let resp = self
            .conn
            .call(|id| Message::ListReq { id, start: prefix.to_vec(), end: end.clone(), keys_only: true, limit: 1 })
            .await?;
        let Message::ListResp { entries } = resp else {
            return Err(Error::Protocol("expected ListResp".into()));
        };

        let found = !entries.is_empty();
        self.reads.push(ReadRange { start: prefix.to_vec(), end, observed: entries, keys_only: true, limit: 1 });
        Ok(found)
    }

    /// Buffers a write; not sent until commit.
    pub fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.writes.insert(key.to_vec(), Some(value));
    }

    /// Buffers a delete; not sent until commit.
    pub fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    /// Reads `key`, appends `bytes`, and buffers the result.
    pub async fn append(&mut self, key: &[u8], bytes: &[u8]) -> CResult<Vec<u8>> {
        let mut value = self.get(key).await?.unwrap_or_default();
        value.extend_from_slice(bytes);
        self.set(key, value.clone());
        Ok(value)
    }

    /// Reads `key` as a little-endian u64 (`0` if absent), adds `delta`,
    /// and buffers the little-endian result.
    pub async fn incr_by(&mut self, key: &[u8], delta: i64) -> CResult<u64> {
        let current = match self.get(key).await? {
            Some(bytes) if bytes.len() == 8 => u64::from_le_bytes(bytes.try_into().unwrap()),
            Some(_) => return Err(Error::Protocol("counter value is not 8 bytes".into())),
            None => 0,
        };
        let next = (current as i64 + delta) as u64;
        self.set(key, next.to_le_bytes().to_vec());
        Ok(next)
    }

    /// Deletes every key with `prefix` as a byte-prefix: scans then
    /// deletes each key, all inside this one transaction. Not a wire
    /// message of its own — purely a client-side composition of `scan` +
    /// `delete`.
    pub async fn delete_range(&mut self, prefix: &[u8]) -> CResult<u64> {
        let end = prefix_end(prefix);
        let mut keys = Vec::new();
        self.scan(prefix, &end, true, |key, _| {
            keys.push(key.to_vec());
            true
        }).await?;
        let n = keys.len() as u64;
        for key in keys {
            self.delete(&key);
        }
        Ok(n)
    }

    fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    async fn commit(&self) -> CResult<()> {
        let mut puts = Vec::new();
        let mut dels = Vec::new();
        for (key, write) in &self.writes {
            match write {
                Some(value) => puts.push((key.clone(), value.clone())),
                None => dels.push(key.clone()),
            }
        }

        let resp = self
            .conn
            .call(|id| Message::CommitReq { id, reads: self.reads.clone(), puts, dels })
            .await
            .map_err(|err| match err {
                // The channel died with the commit frame already sent: we
                // cannot tell whether the server applied it.
                Error::ChannelClosed => Error::Indeterminate,
                other => other,
            })?;

        let Message::CommitResp { ok, error, .. } = resp else {
            return Err(Error::Protocol("expected CommitResp".into()));
        };

        if ok {
            Ok(())
        } else {
            log::debug!("commit rejected: {}", error.unwrap_or_default());
            Err(Error::Conflict)
        }
    }
}

/// Runs `f` to completion, committing its writes under OCC and retrying up
/// to `max_retry` times on conflict. Read-only bodies (nothing buffered)
/// never send a commit RPC and always succeed if `f` itself succeeds.
///
/// `f`'s returned future borrows the `&mut Transaction` it was handed, so it
/// cannot be named as a plain generic type parameter (rustc has no way to
/// express the higher-ranked lifetime); it is boxed instead, the same
/// `Pin<Box<dyn Future>>` shape used wherever this corpus stores a future
/// whose lifetime is tied to a borrowed argument.
pub async fn run<F, T>(conn: Arc<Connection>, max_retry: u32, mut f: F) -> CResult<T>
where
    F: for<'a> FnMut(&'a mut Transaction) -> Pin<Box<dyn Future<Output = CResult<T>> + 'a>>,
{
    let mut attempt = 0;
    loop {
        let mut tx = Transaction::new(conn.clone());
        let result = f(&mut tx).await;

        let value = match result {
            Ok(value) => value,
            // A channel failure observed anywhere before the commit frame
            // was sent is safe to retry, per spec §7 — unlike a conflict
            // or an indeterminate commit outcome, nothing has been
            // proposed to the server yet.
            Err(Error::ChannelClosed) if attempt < max_retry => {
                attempt += 1;
                continue;
            }
            Err(err) => return Err(err),
        };

        if tx.is_read_only() {
            return Ok(value);
        }

        match tx.commit().await {
            Ok(()) => return Ok(value),
            Err(Error::Conflict) if attempt < max_retry => {
                attempt += 1;
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Session;
    use crate::storage::memory::Memory;
    use crate::store::Store;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::{TcpListener, TcpStream};

    async fn serving_connection() -> (Arc<Connection>, Arc<Store<Memory>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(Store::new(Memory::new()));

        let serving_store = store.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Session::new(serving_store).serve(stream).await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        (Connection::spawn(stream), store)
    }

    #[tokio::test]
    async fn put_then_get_in_a_fresh_transaction() -> CResult<()> {
        let (conn, _store) = serving_connection().await;

        run(conn.clone(), 3, |tx| Box::pin(async move {
            tx.set(b"key1", b"val1".to_vec());
            Ok(())
        }))
        .await?;

        let value = run(conn, 3, |tx| Box::pin(async move { tx.get(b"key1").await })).await?;
        assert_eq!(value, Some(b"val1".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn read_your_own_write_never_issues_a_get_rpc() -> CResult<()> {
        let (conn, _store) = serving_connection().await;

        let value = run(conn, 3, |tx| Box::pin(async move {
            tx.set(b"k", b"buffered".to_vec());
            tx.get(b"k").await
        }))
        .await?;

        assert_eq!(value, Some(b"buffered".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn read_only_transaction_never_commits() -> CResult<()> {
        let (conn, store) = serving_connection().await;
        store.commit(&[], vec![(b"k".to_vec(), b"v".to_vec())], vec![])?;

        let value = run(conn, 0, |tx| Box::pin(async move { tx.get(b"k").await })).await?;
        assert_eq!(value, Some(b"v".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn append_concatenates_onto_the_existing_value() -> CResult<()> {
        let (conn, _store) = serving_connection().await;

        run(conn.clone(), 3, |tx| Box::pin(async move { tx.append(b"log", b"a").await.map(|_| ()) })).await?;
        let value = run(conn, 3, |tx| Box::pin(async move { tx.append(b"log", b"b").await })).await?;

        assert_eq!(value, b"ab".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn incr_by_starts_at_zero_and_accumulates() -> CResult<()> {
        let (conn, _store) = serving_connection().await;

        let first = run(conn.clone(), 3, |tx| Box::pin(async move { tx.incr_by(b"count", 5).await })).await?;
        let second = run(conn, 3, |tx| Box::pin(async move { tx.incr_by(b"count", -2).await })).await?;

        assert_eq!(first, 5);
        assert_eq!(second, 3);
        Ok(())
    }

    #[tokio::test]
    async fn exists_reflects_a_prefix_without_reading_values() -> CResult<()> {
        let (conn, _store) = serving_connection().await;

        run(conn.clone(), 3, |tx| Box::pin(async move {
            tx.set(b"user/1", b"alice".to_vec());
            Ok(())
        }))
        .await?;

        let seen = run(conn.clone(), 3, |tx| Box::pin(async move { tx.exists(b"user/").await })).await?;
        let missing = run(conn, 3, |tx| Box::pin(async move { tx.exists(b"group/").await })).await?;

        assert!(seen);
        assert!(!missing);
        Ok(())
    }

    #[tokio::test]
    async fn delete_range_removes_every_key_under_a_prefix() -> CResult<()> {
        let (conn, store) = serving_connection().await;

        run(conn.clone(), 3, |tx| Box::pin(async move {
            tx.set(b"user/1", b"a".to_vec());
            tx.set(b"user/2", b"b".to_vec());
            tx.set(b"other", b"c".to_vec());
            Ok(())
        }))
        .await?;

        let n = run(conn, 3, |tx| Box::pin(async move { tx.delete_range(b"user/").await })).await?;
        assert_eq!(n, 2);

        let (_, ver) = store.get(b"user/1")?;
        assert_eq!(ver, 0);
        let (value, _) = store.get(b"other")?;
        assert_eq!(value, Some(b"c".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn retries_on_conflict_until_it_succeeds() -> CResult<()> {
        let (conn, store) = serving_connection().await;
        store.commit(&[], vec![(b"k".to_vec(), b"0".to_vec())], vec![])?;

        // Every attempt except the last races a concurrent commit in
        // between its read and its own commit, invalidating its read-set;
        // the runtime must retry rather than surface the conflict.
        let attempts = AtomicU32::new(0);
        let result = run(conn, 5, |tx| {
            let attempts = &attempts;
            let store = &store;
            Box::pin(async move {
                let _ = tx.get(b"k").await?;
                if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                    store.commit(&[], vec![(b"k".to_vec(), b"racing".to_vec())], vec![]).unwrap();
                }
                tx.set(b"k", b"final".to_vec());
                Ok(())
            })
        })
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        Ok(())
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_the_conflict() -> CResult<()> {
        let (conn, store) = serving_connection().await;
        store.commit(&[], vec![(b"k".to_vec(), b"0".to_vec())], vec![])?;

        let result = run(conn, 0, |tx| {
            let store = &store;
            Box::pin(async move {
                let _ = tx.get(b"k").await?;
                // A concurrent writer invalidates this read-set before our
                // own commit lands; with no retries left this must surface.
                store.commit(&[], vec![(b"k".to_vec(), b"racing".to_vec())], vec![]).unwrap();
                tx.set(b"k", b"final".to_vec());
                Ok(())
            })
        })
        .await;

        assert_eq!(result, Err(Error::Conflict));
        Ok(())
    }
}
