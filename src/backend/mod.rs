//! Backend trait contracts (C5/C6's external collaborators): the erasure-coded object layer
//! (NE) and the metadata abstraction layer (MDAL). Only the contracts are defined here; real
//! plugin implementations are out of scope. [`mock`] provides a deterministic in-memory stand-in
//! for unit tests.
//!
//! Grounded on `datastream.c`'s call sites into `ms->mdal->*` and the free `ne_*` functions —
//! each trait method's signature is fixed by the shape of those call sites.

pub mod mock;

use crate::error::DatastreamError;
use crate::ftag::Protection;
use crate::recovery::RebuildTag;
use crate::refpath::ObjectLocation;

/// Whether an NE object handle was opened for reading or writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeMode {
    Read,
    Write,
}

/// Outcome of closing an NE object handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeCloseOutcome {
    /// All stripes synced with full parity.
    Clean,
    /// Synced, but with recoverable partial parity loss.
    Degraded(RebuildTag),
}

/// The erasure-coded object storage layer.
pub trait NeBackend {
    type Handle;

    fn open(
        &self,
        objname: &str,
        location: ObjectLocation,
        erasure: Protection,
        mode: NeMode,
    ) -> Result<Self::Handle, DatastreamError>;

    fn read(&self, handle: &mut Self::Handle, buf: &mut [u8]) -> Result<usize, DatastreamError>;

    fn write(&self, handle: &mut Self::Handle, buf: &[u8]) -> Result<usize, DatastreamError>;

    fn seek(&self, handle: &mut Self::Handle, offset: u64) -> Result<u64, DatastreamError>;

    fn close(&self, handle: Self::Handle) -> Result<NeCloseOutcome, DatastreamError>;

    /// Invoked on any drop path where data was never intended to persist.
    fn abort(&self, handle: Self::Handle) -> Result<(), DatastreamError>;
}

/// `fstat` results the file lifecycle needs back from the MDAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MdalStat {
    pub inode: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

/// The metadata abstraction layer: reference-tree files, xattrs, and user-namespace links.
pub trait MdalBackend {
    type Handle;
    type Ctx;

    fn openref(
        &self,
        ctx: &Self::Ctx,
        refpath: &str,
        create: bool,
        mode: u32,
    ) -> Result<Self::Handle, DatastreamError>;

    fn unlinkref(&self, ctx: &Self::Ctx, refpath: &str) -> Result<(), DatastreamError>;

    fn linkref(&self, ctx: &Self::Ctx, refpath: &str, userpath: &str) -> Result<(), DatastreamError>;

    fn unlink(&self, ctx: &Self::Ctx, userpath: &str) -> Result<(), DatastreamError>;

    fn open(&self, ctx: &Self::Ctx, userpath: &str, write: bool) -> Result<Self::Handle, DatastreamError>;

    fn close(&self, handle: Self::Handle) -> Result<(), DatastreamError>;

    fn ftruncate(&self, handle: &Self::Handle, len: u64) -> Result<(), DatastreamError>;

    fn futimens(
        &self,
        handle: &Self::Handle,
        atime: (i64, u32),
        mtime: (i64, u32),
    ) -> Result<(), DatastreamError>;

    fn fstat(&self, handle: &Self::Handle) -> Result<MdalStat, DatastreamError>;

    fn fsetxattr(
        &self,
        handle: &Self::Handle,
        create_only: bool,
        name: &str,
        value: &[u8],
    ) -> Result<(), DatastreamError>;

    fn fgetxattr(&self, handle: &Self::Handle, name: &str) -> Result<Vec<u8>, DatastreamError>;
}
