//! Plain in-memory configuration values a stream is constructed from.
//!
//! Parsing these out of topology/namespace config files is out of scope (see SPEC_FULL.md
//! §1); this module only holds the already-assembled values an operation consumes.

use crate::ftag::Protection;

/// A namespace's identity: the repo it lives under, and its path within that repo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub repo: String,
    pub path: String,
}

impl Namespace {
    /// The namespace path with `/` rewritten to `#`, as used inside a minted `streamid`.
    pub fn escaped_path(&self) -> String {
        self.path.replace('/', "#")
    }
}

/// Packing/striping and erasure parameters for a data scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataScheme {
    /// Max files sharing one object; 0 = unlimited (striping only).
    pub objfiles: u64,
    /// Max object byte size; 0 = unlimited.
    pub objsize: u64,
    pub protection: Protection,
    /// Length of the recovery header written at the start of every object.
    pub recoveryheaderlen: u64,
    /// Length of the recovery trailer (`RecoveryFinfo`) written after every file's data.
    pub recoverybytes: u64,
}

/// Already-built placement lists (pod/cap/scatter node names). Building these from topology
/// config is out of scope; a `Position` simply carries whichever lists its namespace resolved
/// to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlacementLists {
    pub pods: Vec<String>,
    pub caps: Vec<String>,
    pub scatters: Vec<String>,
    /// Reference-directory table, used by `ref_path`.
    pub refdirs: Vec<String>,
}

/// Everything a stream operation needs to resolve names and locations for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub namespace: Namespace,
    pub scheme: DataScheme,
    pub placement: PlacementLists,
}
