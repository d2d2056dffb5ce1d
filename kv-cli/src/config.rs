use serde_derive::{Deserialize, Serialize};

/// Default address `kvcli` connects to and `kv-server` listens on when no
/// override is given on the command line or in the config file.
pub const DEFAULT_ADDR: &str = "127.0.0.1:4000";

/// Loaded via `confy`, merging the on-disk file (if any) over these
/// defaults. Both `kvcli` (as the `connect`/`max_retry` fields) and
/// `kv-server` (as `listen`/`data_dir`/the init-notification identity
/// fields) read the same file, mirroring the teacher's single
/// `ConfigLoad` shared between CLI modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLoad {
    /// Address `kvcli` connects to.
    pub connect: String,

    /// Address `kv-server` binds to.
    pub listen: String,

    /// On-disk data directory for the server's `LogCask` engine. `None`
    /// runs the server against an in-memory engine instead.
    pub data_dir: Option<String>,

    /// `log` level filter, e.g. "info", "debug".
    pub log_level: String,

    /// Transaction retry budget passed to `client::run`.
    pub max_retry: u32,

    /// Storage identity the server hands to every connection via
    /// `InitNotification` (spec §4.6). Opaque to this crate; forwarded
    /// verbatim.
    pub storage: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub volume_name: String,
}

impl Default for ConfigLoad {
    fn default() -> Self {
        ConfigLoad {
            connect: DEFAULT_ADDR.to_string(),
            listen: DEFAULT_ADDR.to_string(),
            data_dir: None,
            log_level: "info".to_string(),
            max_retry: 10,
            storage: "memory".to_string(),
            bucket: "".to_string(),
            access_key: "".to_string(),
            secret_key: "".to_string(),
            volume_name: "default".to_string(),
        }
    }
}

impl ConfigLoad {
    /// Loads `kvcli.toml` from the platform config directory via `confy`,
    /// falling back to `Default` if none exists yet.
    pub fn load() -> anyhow::Result<Self> {
        Ok(confy::load("kvcli", None)?)
    }

    /// Loads from an explicit path instead of the platform default,
    /// e.g. from `-c/--config`.
    pub fn load_path(path: &str) -> anyhow::Result<Self> {
        Ok(confy::load_path(path)?)
    }
}
