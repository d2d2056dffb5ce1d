//! Shared pieces between the `kvcli` admin CLI and the `kv-server` binary:
//! config loading and logging setup. Everything that talks the wire
//! protocol itself lives in the `metakv` crate; this crate is just the
//! two process entry points.

pub mod config;
pub mod trace;
