//! Stream state (C4): the open file list, cursor, and streamid minting.
//!
//! Grounded on `datastream.c`'s `genstream`/`allocfiles` and the streamid-minting block inside
//! `genstream`.

use crate::backend::{MdalBackend, NeBackend};
use crate::config::Namespace;
use crate::ftag::Ftag;
use crate::recovery::RebuildTag;
use crate::stream::object::ObjectHandle;

/// Starting capacity for a stream's tracked-file list.
pub(crate) const INITIAL_FILE_ALLOC: usize = 64;
/// Growth multiplier applied each time the list must grow past its capacity.
pub(crate) const FILE_ALLOC_MULT: usize = 2;

/// What a stream was opened to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Create,
    Edit,
    Read,
}

/// The mode requested of [`crate::stream::Stream::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenKind {
    Read,
    Edit,
}

/// Seek origin, mirroring `SEEK_SET`/`SEEK_CUR`/`SEEK_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// One file tracked by this stream: its reference-file handle, its FTAG, and any rebuild tag
/// attached by a degraded object close.
#[derive(Debug)]
pub(crate) struct TrackedFile<H> {
    pub(crate) userpath: String,
    pub(crate) refpath: String,
    pub(crate) handle: H,
    pub(crate) ftag: Ftag,
    pub(crate) rebuild_tag: Option<RebuildTag>,
    pub(crate) desired_atime: (i64, u32),
    pub(crate) desired_mtime: (i64, u32),
    /// File-relative read cursor, tracked explicitly so repeated near-EOF reads advance through
    /// the zero-fill tail correctly instead of re-deriving it from a growing dataset size.
    pub(crate) cursor: u64,
}

/// An in-progress datastream: the file list, the currently open object (if any), and the
/// backend handles this instance exclusively owns.
#[derive(Debug)]
pub struct Stream<M: MdalBackend, N: NeBackend> {
    pub(crate) kind: StreamKind,
    pub(crate) position: crate::config::Position,
    pub(crate) ctag: String,
    pub(crate) streamid: String,
    pub(crate) mdal: M,
    pub(crate) ne: N,
    pub(crate) ctx: M::Ctx,
    pub(crate) cur_objno: u64,
    pub(crate) cur_object: Option<ObjectHandle<N>>,
    pub(crate) cur_object_files: u64,
    pub(crate) files: Vec<TrackedFile<M::Handle>>,
    pub(crate) curfile: usize,
}

/// Next file-list capacity after a growth step, capped by `objfiles` when it is non-zero
/// (unbounded packing still doubles without a cap).
pub(crate) fn next_file_capacity(current_cap: usize, objfiles: u64) -> usize {
    let grown = if current_cap == 0 {
        INITIAL_FILE_ALLOC
    } else {
        current_cap.saturating_mul(FILE_ALLOC_MULT)
    };
    if objfiles == 0 {
        grown
    } else {
        grown.min(objfiles as usize)
    }
}

/// Mints a new, host-unique `streamid` for a CREATE stream: `<repo>|<escaped-ns-path>|sec.nsec`.
/// Takes the current time as a parameter rather than reading the wall clock internally, so the
/// engine itself stays free of hidden non-determinism — callers pass
/// `time_from_system_time(&SystemTime::now())` in production and a fixed value in tests.
pub fn mint_streamid(ns: &Namespace, now: (i64, u32)) -> String {
    format!("{}|{}|{}.{}", ns.repo, ns.escaped_path(), now.0, now.1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capacity_doubles_and_starts_at_initial_alloc() {
        assert_eq!(next_file_capacity(0, 0), INITIAL_FILE_ALLOC);
        assert_eq!(next_file_capacity(64, 0), 128);
        assert_eq!(next_file_capacity(128, 0), 256);
    }

    #[test]
    fn capacity_is_capped_by_objfiles() {
        assert_eq!(next_file_capacity(64, 3), 3);
        assert_eq!(next_file_capacity(0, 100), 64);
    }

    #[test]
    fn streamid_escapes_namespace_slashes() {
        let ns = Namespace {
            repo: "repo1".to_string(),
            path: "/proj/sub".to_string(),
        };
        let id = mint_streamid(&ns, (1_700_000_000, 42));
        assert_eq!(id, "repo1|#proj#sub|1700000000.42");
    }
}
