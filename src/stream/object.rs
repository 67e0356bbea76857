//! Object lifecycle (C5): opens objects with a recovery header, writes file trailers, closes
//! with degradation reporting, attaches rebuild tags.
//!
//! Grounded on `datastream.c`'s `open_current_obj`, `putfinfo`, and `close_current_obj` —
//! including the two bugs flagged in SPEC_FULL.md §9 (`if (errno = EEXIST)` and the undefined
//! `newstream`), both resolved here simply by not having the shapes that made them possible:
//! `Result` matching instead of errno assignment, and `&mut self`/ownership-move instead of a
//! second stream name.

use crate::backend::{NeBackend, NeCloseOutcome, NeMode};
use crate::config::Position;
use crate::error::{self, DatastreamError};
use crate::ftag::Ftag;
use crate::recovery::RecoveryHeader;
use crate::refpath::{object_location, object_name, PlacementTable};

/// A currently open erasure-coded object. Aborts on drop unless [`ObjectHandle::close`] consumed
/// it first — mirroring "`ne_abort` is invoked on any drop path when data was never intended to
/// persist."
#[derive(Debug)]
pub(crate) struct ObjectHandle<N: NeBackend> {
    ne: N,
    handle: Option<N::Handle>,
    pub(crate) objname: String,
    pub(crate) mode: NeMode,
    /// Bytes written (write mode) or consumed (read mode) so far, including the header.
    pub(crate) offset: u64,
}

impl<N: NeBackend> ObjectHandle<N> {
    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize, DatastreamError> {
        let handle = self
            .handle
            .as_mut()
            .expect("object handle used after close");
        let n = self.ne.write(handle, buf).map_err(DatastreamError::remap_spurious_stale)?;
        self.offset += n as u64;
        Ok(n)
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize, DatastreamError> {
        let handle = self
            .handle
            .as_mut()
            .expect("object handle used after close");
        let n = self.ne.read(handle, buf).map_err(DatastreamError::remap_spurious_stale)?;
        self.offset += n as u64;
        Ok(n)
    }

    pub(crate) fn seek_to(&mut self, offset: u64) -> Result<(), DatastreamError> {
        let handle = self
            .handle
            .as_mut()
            .expect("object handle used after close");
        self.ne.seek(handle, offset)?;
        self.offset = offset;
        Ok(())
    }

    /// Closes the object cleanly, reporting whether NE observed a recoverable degradation.
    pub(crate) fn close(mut self) -> Result<NeCloseOutcome, DatastreamError> {
        let handle = self.handle.take().expect("object handle used after close");
        self.ne.close(handle)
    }
}

impl<N: NeBackend> Drop for ObjectHandle<N> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.ne.abort(handle);
        }
    }
}

fn resolve_location(objname: &str, pos: &Position) -> crate::refpath::ObjectLocation {
    let pods = PlacementTable::new(&pos.placement.pods);
    let caps = PlacementTable::new(&pos.placement.caps);
    let scatters = PlacementTable::new(&pos.placement.scatters);
    object_location(objname, pos.scheme.protection, &pods, &caps, &scatters)
}

/// Opens a fresh object for writing and lays down its recovery header. `ftag` supplies the
/// `ctag`/`streamid` the object name and header are derived from; `objno` is this object's index
/// within the stream. The in-object offset passed to [`object_name`] is always the scheme's
/// `recoveryheaderlen`, so every file that ever shares this object computes the same name for it.
pub(crate) fn open_for_write<N: NeBackend>(
    ne: N,
    pos: &Position,
    ftag: &Ftag,
    objno: u64,
) -> Result<ObjectHandle<N>, DatastreamError> {
    let objname = object_name(ftag, objno, pos.scheme.recoveryheaderlen);
    let location = resolve_location(&objname, pos);
    let handle = ne.open(&objname, location, pos.scheme.protection, NeMode::Write)?;

    let mut oh = ObjectHandle {
        ne,
        handle: Some(handle),
        objname,
        mode: NeMode::Write,
        offset: 0,
    };

    let header = RecoveryHeader {
        major_version: crate::ftag::CURRENT_MAJOR_VERSION,
        minor_version: crate::ftag::CURRENT_MINOR_VERSION,
        ctag: ftag.ctag.clone(),
        streamid: ftag.streamid.clone(),
    };
    let mut header_bytes = header.serialize().into_bytes();
    let expected_len = pos.scheme.recoveryheaderlen as usize;
    if header_bytes.len() > expected_len {
        return Err(error::stale(
            "recovery header does not fit in recoveryheaderlen bytes",
        ));
    }
    header_bytes.resize(expected_len, 0);

    match oh.write(&header_bytes) {
        Ok(n) if n == expected_len => Ok(oh),
        Ok(_) => Err(error::stale("short recovery header write")),
        Err(e) => Err(e),
    }
}

/// Opens the object a file's write cursor currently targets. When `inobj_offset` is exactly
/// `recoveryheaderlen` the object has nothing written into it yet and gets a fresh header
/// (delegating to [`open_for_write`]); otherwise the object already holds this file's earlier
/// data (a resumed EDIT stream, or a packed sibling that wrote before it) and this seeks to
/// `inobj_offset` in place rather than rewriting the header and clobbering what is already there.
pub(crate) fn open_for_append<N: NeBackend>(
    ne: N,
    pos: &Position,
    ftag: &Ftag,
    objno: u64,
    inobj_offset: u64,
) -> Result<ObjectHandle<N>, DatastreamError> {
    if inobj_offset == pos.scheme.recoveryheaderlen {
        return open_for_write(ne, pos, ftag, objno);
    }
    let objname = object_name(ftag, objno, pos.scheme.recoveryheaderlen);
    let location = resolve_location(&objname, pos);
    let handle = ne.open(&objname, location, pos.scheme.protection, NeMode::Write)?;
    let mut oh = ObjectHandle {
        ne,
        handle: Some(handle),
        objname,
        mode: NeMode::Write,
        offset: 0,
    };
    oh.seek_to(inobj_offset)?;
    Ok(oh)
}

/// Opens an existing object for reading, seeking to `offset` if non-zero. No header is written.
pub(crate) fn open_for_read<N: NeBackend>(
    ne: N,
    pos: &Position,
    ftag: &Ftag,
    objno: u64,
    offset: u64,
) -> Result<ObjectHandle<N>, DatastreamError> {
    let objname = object_name(ftag, objno, pos.scheme.recoveryheaderlen);
    let location = resolve_location(&objname, pos);
    let handle = ne.open(&objname, location, pos.scheme.protection, NeMode::Read)?;
    let mut oh = ObjectHandle {
        ne,
        handle: Some(handle),
        objname,
        mode: NeMode::Read,
        offset: 0,
    };
    if offset != 0 {
        oh.seek_to(offset)?;
    }
    Ok(oh)
}

/// Writes the current file's recovery trailer into exactly `recoverybytes`, zero-padded.
/// Callers must have already checked the object has that much capacity remaining.
pub(crate) fn put_finfo<N: NeBackend>(
    oh: &mut ObjectHandle<N>,
    finfo: &crate::recovery::RecoveryFinfo,
    recoverybytes: u64,
) -> Result<(), DatastreamError> {
    let bytes = finfo.serialize(recoverybytes)?;
    let n = oh.write(&bytes)?;
    if n as u64 != recoverybytes {
        return Err(error::stale("short recovery trailer write"));
    }
    Ok(())
}
