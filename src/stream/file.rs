//! File lifecycle (C6): creates reference files, installs FTAGs, links references into the
//! user namespace, finalizes and completes files.
//!
//! Grounded on `datastream.c`'s `create_new_file`, `finfile`, `completefile`, and `linkfile`.

use log::warn;

use crate::backend::MdalBackend;
use crate::error::DatastreamError;
use crate::ftag::{DataState, Ftag, FtagFlags};

pub(crate) const FTAG_XATTR: &str = "MARFS-FTAG";
pub(crate) const RTAG_XATTR: &str = "MARFS-RTAG";

/// Creates the reference file, writes its initial FTAG, and links it into the user namespace.
/// On a reference-path collision, reports [`DatastreamError::Busy`] with nothing left behind.
pub(crate) fn create_reference_file<M: MdalBackend>(
    mdal: &M,
    ctx: &M::Ctx,
    refpath: &str,
    userpath: &str,
    mode: u32,
    ftag: &Ftag,
) -> Result<M::Handle, DatastreamError> {
    let handle = mdal.openref(ctx, refpath, true, mode)?;

    let encoded = ftag.serialize()?;
    if let Err(e) = mdal.fsetxattr(&handle, false, FTAG_XATTR, encoded.as_bytes()) {
        let _ = mdal.close(handle);
        let _ = mdal.unlinkref(ctx, refpath);
        return Err(e);
    }

    if let Err(e) = link_into_namespace(mdal, ctx, refpath, userpath) {
        let _ = mdal.close(handle);
        let _ = mdal.unlinkref(ctx, refpath);
        return Err(e);
    }

    Ok(handle)
}

/// Links `refpath` into the user namespace at `userpath`. One local retry on collision: unlink
/// the stale `userpath` entry and try again (an `ENOENT` on that unlink is treated as the race
/// having resolved itself, not a failure).
pub(crate) fn link_into_namespace<M: MdalBackend>(
    mdal: &M,
    ctx: &M::Ctx,
    refpath: &str,
    userpath: &str,
) -> Result<(), DatastreamError> {
    match mdal.linkref(ctx, refpath, userpath) {
        Ok(()) => Ok(()),
        Err(DatastreamError::Busy) => {
            let _ = mdal.unlink(ctx, userpath);
            mdal.linkref(ctx, refpath, userpath)
        }
        Err(e) => Err(e),
    }
}

/// Advances `ftag`'s data-state, refusing to move it backwards (state is monotone per invariant
/// 4 of the data model).
fn advance_data_state(ftag: &mut Ftag, target: DataState) -> Result<(), DatastreamError> {
    if target < ftag.state.data_state {
        return Err(crate::error::permission_denied(format!(
            "cannot move data-state backwards from {:?} to {target:?}",
            ftag.state.data_state
        )));
    }
    ftag.state.data_state = target;
    Ok(())
}

/// Marks a file FINALIZED: its final byte count is now known, and no further packed files will
/// share this file's own current object position. Only meaningful for CREATE streams.
pub(crate) fn finalize_file(ftag: &mut Ftag) -> Result<(), DatastreamError> {
    advance_data_state(ftag, DataState::Finalized)
}

/// Marks a file COMPLETE and READABLE, truncates the reference file to `availbytes`, and
/// persists the final FTAG plus requested timestamps.
pub(crate) fn complete_file<M: MdalBackend>(
    mdal: &M,
    handle: &M::Handle,
    ftag: &mut Ftag,
    atime: (i64, u32),
    mtime: (i64, u32),
) -> Result<(), DatastreamError> {
    advance_data_state(ftag, DataState::Complete)?;
    ftag.state.flags |= FtagFlags::READABLE;

    mdal.ftruncate(handle, ftag.availbytes)?;
    mdal.futimens(handle, atime, mtime)?;
    let encoded = ftag.serialize()?;
    mdal.fsetxattr(handle, false, FTAG_XATTR, encoded.as_bytes())?;
    Ok(())
}

/// Attaches a rebuild tag to a reference file whose data sits in a degraded object.
pub(crate) fn attach_rebuild_tag<M: MdalBackend>(
    mdal: &M,
    handle: &M::Handle,
    tag: &crate::recovery::RebuildTag,
) -> Result<(), DatastreamError> {
    warn!("attaching rebuild tag after degraded object close: {tag}");
    mdal.fsetxattr(handle, false, RTAG_XATTR, tag.serialize().as_bytes())
}

/// Crash-recovery classification of a file from its FTAG alone, per SPEC_FULL.md §7. Performs
/// no filesystem walking; the out-of-scope resource manager calls this with FTAGs it already read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Creation crashed before any data was written; safe to unlink.
    Init,
    /// A writer is in-flight, owned by the file's `ctag`/`streamid`; do not touch.
    InProgress,
    /// The writer crashed after emitting the trailer; a resource manager may complete it.
    FinalizedNotReadable,
    /// Fully durable.
    Durable,
}

pub fn recovery_state(ftag: &Ftag) -> RecoveryState {
    use DataState::*;
    match (ftag.state.data_state, ftag.state.flags.contains(FtagFlags::READABLE)) {
        (Init, _) => RecoveryState::Init,
        (Complete, true) => RecoveryState::Durable,
        (Finalized, false) | (Complete, false) => RecoveryState::FinalizedNotReadable,
        _ => RecoveryState::InProgress,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::mock::MockMdal;
    use crate::ftag::{FtagState, Protection};

    fn sample_ftag() -> Ftag {
        Ftag {
            major_version: 0,
            minor_version: 1,
            ctag: "client-a".to_string(),
            streamid: "repo#ns.1".to_string(),
            objfiles: 3,
            objsize: 65536,
            fileno: 0,
            objno: 0,
            offset: 64,
            endofstream: false,
            protection: Protection {
                n: 10,
                e: 2,
                o: 0,
                partsz: 1024,
            },
            bytes: 0,
            availbytes: 0,
            recoverybytes: 128,
            state: FtagState::new(DataState::Init, FtagFlags::WRITEABLE),
        }
    }

    #[test]
    fn create_then_collide_reports_busy_with_no_leftovers() {
        let mdal = MockMdal::new();
        let ftag = sample_ftag();
        let _h = create_reference_file(&mdal, &(), "/ref/a", "/ns/a", 0o644, &ftag).unwrap();

        let err = create_reference_file(&mdal, &(), "/ref/a", "/ns/b", 0o644, &ftag).unwrap_err();
        assert!(matches!(err, DatastreamError::Busy));
    }

    #[test]
    fn data_state_cannot_move_backwards() {
        let mut ftag = sample_ftag();
        ftag.state.data_state = DataState::Complete;
        assert!(finalize_file(&mut ftag).is_err());
    }

    #[test]
    fn complete_file_sets_complete_and_readable() {
        let mdal = MockMdal::new();
        let mut ftag = sample_ftag();
        ftag.availbytes = 1024;
        ftag.bytes = 1024;
        ftag.state.data_state = DataState::Finalized;
        let handle = create_reference_file(&mdal, &(), "/ref/b", "/ns/b", 0o644, &ftag).unwrap();

        complete_file(&mdal, &handle, &mut ftag, (1, 0), (2, 0)).unwrap();
        assert_eq!(ftag.state.data_state, DataState::Complete);
        assert!(ftag.state.flags.contains(FtagFlags::READABLE));
    }

    #[test]
    fn recovery_state_classifies_each_stage() {
        let mut ftag = sample_ftag();
        assert_eq!(recovery_state(&ftag), RecoveryState::Init);

        ftag.state.data_state = DataState::Sized;
        assert_eq!(recovery_state(&ftag), RecoveryState::InProgress);

        ftag.state.data_state = DataState::Finalized;
        assert_eq!(recovery_state(&ftag), RecoveryState::FinalizedNotReadable);

        ftag.state.data_state = DataState::Complete;
        ftag.state.flags |= FtagFlags::READABLE;
        assert_eq!(recovery_state(&ftag), RecoveryState::Durable);
    }
}
