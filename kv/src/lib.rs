#![allow(non_camel_case_types)]

//! A small transactional key/value store.
//!
//! Values are stored under optimistic concurrency control: every key has a
//! monotonically increasing version, and a commit is validated by checking
//! that every range the transaction read is unchanged since the
//! transaction started. No value snapshots or row-version chains are kept;
//! conflicting commits are rejected rather than serialized against a
//! history.
//!
//! `storage` holds the byte-level engines (`Memory`, `LogCask`). `store`
//! layers versioned entries and commit validation on top of an `Engine`.
//! `wire` defines the request/response protocol and its framing. `conn`
//! multiplexes that protocol over one `TcpStream`. `client` is the
//! transaction runtime built on top of a `conn::Connection`, and `server`
//! dispatches incoming connections against a shared `store::Store`.

pub mod error;
pub mod storage;
pub mod store;
pub mod wire;
pub mod conn;
pub mod client;
pub mod server;
pub mod bootstrap;
