//! Datastream engine for a MarFS-style distributed, erasure-coded file system.
//!
//! This crate owns the per-file write/read/packing/striping state machine that sits between a
//! POSIX-like metadata namespace (the [`backend::MdalBackend`] trait) and an erasure-coded object
//! store (the [`backend::NeBackend`] trait). It does not implement either backend, resolve
//! topology configuration, or walk a namespace for crash recovery; it gives a resource manager
//! the pieces ([`stream::recovery_state`], [`stream::read_rebuild_tag`]) to do that itself.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod backend;
pub mod config;
pub mod error;
pub mod ftag;
pub mod recovery;
pub mod refpath;
pub mod stream;
pub mod time;

pub use config::{DataScheme, Namespace, PlacementLists, Position};
pub use error::DatastreamError;
pub use ftag::{DataState, Ftag, FtagFlags, FtagState, Protection};
pub use recovery::{RebuildTag, RecoveryFinfo, RecoveryHeader};
pub use stream::{mint_streamid, read_rebuild_tag, recovery_state, OpenKind, RecoveryState, Stream, StreamKind, Whence};
pub use time::{system_time_from_time, time_from_system_time};
