use serde_derive::{Deserialize, Serialize};

/// One row as observed or returned over the wire. `value` is omitted
/// (`None`) whenever the request that produced it was `keys_only`; a
/// present-but-empty value is `Some(vec![])`, never conflated with "no
/// value returned".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub ver: u64,
}

/// One read-range observation, recorded by the client at read time and
/// replayed by the server at commit time. `observed` is exactly what the
/// client's original read returned: re-scanning `[start, end)` under the
/// same `limit` and comparing against `observed` key-by-key (and, unless
/// `keys_only`, version-by-version) is the entire validation rule.
///
/// A point `get` is just a range `[key, key's immediate successor)` with
/// `limit` unset, so no separate point-read wire shape is needed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub observed: Vec<Entry>,
    pub keys_only: bool,
    pub limit: u64,
}

/// A single observed `(key, version)` pair, the flat point-only shape a
/// commit's read-set used before `ReadRange` existed. Cannot express
/// phantom protection or keys-only permissiveness; kept only so a frame
/// built by an older peer still decodes. This crate never constructs it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observed {
    pub key: Vec<u8>,
    pub ver: u64,
}

/// The tagged union carried by every frame on the wire. Variant order is
/// the bincode discriminant and MUST NOT change — append new cases at the
/// end, never reorder or remove existing ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    GetReq { id: u64, key: Vec<u8> },
    GetResp { id: u64, value: Option<Vec<u8>>, ver: u64, found: bool },

    ListReq { id: u64, start: Vec<u8>, end: Vec<u8>, keys_only: bool, limit: u64 },
    ListResp { id: u64, entries: Vec<Entry> },

    CommitReq { id: u64, reads: Vec<ReadRange>, puts: Vec<(Vec<u8>, Vec<u8>)>, dels: Vec<Vec<u8>> },
    CommitResp { id: u64, ok: bool, error: Option<String> },

    ResetReq { id: u64 },
    ResetResp { id: u64, ok: bool, error: Option<String> },

    /// Legacy alternative to `CommitReq.reads`, kept decodable only.
    Put { key: Vec<u8>, value: Vec<u8> },

    /// One of a legacy flat read-set; see `Observed`.
    ObservedLegacy(Observed),

    /// One-shot, sent by the peer on a fresh channel before any request.
    /// Carries no `id` and gets no response.
    InitNotification {
        storage: String,
        bucket: String,
        access_key: String,
        secret_key: String,
        volume_name: String,
    },

    /// One-shot, sent by the mount once it is live. Carries no `id` and
    /// MUST NOT be answered.
    ReadyNotification,
}

impl Message {
    /// The request/response id this frame carries, for messages that have
    /// one. `None` for the un-ided control notifications.
    pub fn id(&self) -> Option<u64> {
        match self {
            Message::GetReq { id, .. }
            | Message::GetResp { id, .. }
            | Message::ListReq { id, .. }
            | Message::ListResp { id, .. }
            | Message::CommitReq { id, .. }
            | Message::CommitResp { id, .. }
            | Message::ResetReq { id, .. }
            | Message::ResetResp { id, .. } => Some(*id),
            Message::Put { .. }
            | Message::ObservedLegacy(_)
            | Message::InitNotification { .. }
            | Message::ReadyNotification => None,
        }
    }
}
