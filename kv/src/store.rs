use std::ops::Bound;
use std::sync::Mutex;
use serde_derive::{Deserialize, Serialize};
use crate::error::{CResult, Error};
use crate::storage::engine::Engine;
use crate::wire::{Entry, ReadRange};

/// The bincode-encoded payload stored at `key` in the underlying `Engine`.
/// The engine itself never sees a version; it is just another field in an
/// opaque value, exactly like the teacher's engines treat their values.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Versioned {
    value: Vec<u8>,
    version: u64,
}

/// The ordered, versioned key-value map described in spec §3, built over
/// any byte-level `Engine`. All reads and the commit/reset critical
/// section take the same `Mutex`, mirroring the teacher's `MVCC<E>`
/// wrapper-over-engine shape but with OCC read-range validation instead of
/// snapshot-isolated multi-versioning.
pub struct Store<E: Engine> {
    engine: Mutex<E>,
}

impl<E: Engine> Store<E> {
    pub fn new(engine: E) -> Self {
        Self { engine: Mutex::new(engine) }
    }

    /// Returns `(value, version)` for `key`, or `(None, 0)` if absent.
    pub fn get(&self, key: &[u8]) -> CResult<(Option<Vec<u8>>, u64)> {
        let mut engine = self.engine.lock().unwrap();
        match engine.get(key)? {
            Some(bytes) => {
                let entry: Versioned = bincode::deserialize(&bytes)?;
                Ok((Some(entry.value), entry.version))
            }
            None => Ok((None, 0)),
        }
    }

    /// Entries with `start <= key < end`, ascending, capped at `limit`
    /// (`0` meaning unbounded). Values are omitted when `keys_only`.
    pub fn range(
        &self,
        start: &[u8],
        end: &[u8],
        keys_only: bool,
        limit: u64,
    ) -> CResult<Vec<Entry>> {
        let mut engine = self.engine.lock().unwrap();
        Self::scan_range(&mut engine, start, end, keys_only, limit)
    }

    fn scan_range(
        engine: &mut E,
        start: &[u8],
        end: &[u8],
        keys_only: bool,
        limit: u64,
    ) -> CResult<Vec<Entry>> {
        let bounds = (Bound::Included(start.to_vec()), Bound::Excluded(end.to_vec()));
        let mut out = Vec::new();
        for item in engine.scan_dyn(bounds) {
            let (key, bytes) = item?;
            let entry: Versioned = bincode::deserialize(&bytes)?;
            out.push(Entry {
                key,
                value: if keys_only { None } else { Some(entry.value) },
                ver: entry.version,
            });
            if limit > 0 && out.len() as u64 >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Validates `reads` against the current state, and if all pass,
    /// atomically applies `puts` then `dels`. Returns `Ok(())` on success
    /// and `Err(Error::Conflict)` if any read range was invalidated; no
    /// partial apply is ever observable to a concurrent reader or
    /// committer, since the whole operation runs under one lock.
    pub fn commit(
        &self,
        reads: &[ReadRange],
        puts: Vec<(Vec<u8>, Vec<u8>)>,
        dels: Vec<Vec<u8>>,
    ) -> CResult<()> {
        for (key, _) in &puts {
            if dels.contains(key) {
                return Err(Error::ConflictingWrite(key.clone()));
            }
        }

        let mut engine = self.engine.lock().unwrap();

        for read in reads {
            let current = Self::scan_range(&mut engine, &read.start, &read.end, read.keys_only, read.limit)?;
            if !Self::read_range_still_valid(read, &current) {
                return Err(Error::Conflict);
            }
        }

        for (key, value) in puts {
            let version = match engine.get(&key)? {
                Some(bytes) => {
                    let prev: Versioned = bincode::deserialize(&bytes)?;
                    prev.version + 1
                }
                None => 1,
            };
            let encoded = bincode::serialize(&Versioned { value, version })?;
            engine.set(&key, encoded)?;
        }

        for key in dels {
            engine.delete(&key)?;
        }

        Ok(())
    }

    /// Compares a re-scan against what was observed, per spec §4.3: same
    /// keys in the same order, and (unless `keys_only`) the same versions.
    fn read_range_still_valid(read: &ReadRange, current: &[Entry]) -> bool {
        if current.len() != read.observed.len() {
            return false;
        }
        current.iter().zip(read.observed.iter()).all(|(c, o)| {
            c.key == o.key && (read.keys_only || c.ver == o.ver)
        })
    }

    /// Removes every entry. Takes the same lock as `commit`.
    pub fn reset(&self) -> CResult<()> {
        let mut engine = self.engine.lock().unwrap();
        let keys: Vec<Vec<u8>> = engine.scan(..).collect::<CResult<Vec<_>>>()?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        for key in keys {
            engine.delete(&key)?;
        }
        Ok(())
    }
}
