//! Deterministic in-memory `NeBackend`/`MdalBackend` implementations for tests.
//!
//! Grounded on SPEC_FULL.md §6.1: "a small, deterministic, in-process stand-in for a real
//! external system", the role `fuser-tests` plays for driving the library against a real kernel
//! mount, except here there is no kernel boundary so the mock is driven directly. Locking
//! follows the teacher's own choice of `parking_lot` for shared mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{MdalBackend, MdalStat, NeBackend, NeCloseOutcome, NeMode};
use crate::error::{self, DatastreamError};
use crate::ftag::Protection;
use crate::recovery::RebuildTag;
use crate::refpath::ObjectLocation;

/// An in-memory erasure-coded object store. Cheap to clone (shares its backing map).
#[derive(Debug, Default, Clone)]
pub struct MockNe {
    inner: Arc<Mutex<MockNeInner>>,
}

#[derive(Debug, Default)]
struct MockNeInner {
    objects: HashMap<String, Vec<u8>>,
    degraded_on_close: std::collections::HashSet<String>,
}

#[derive(Debug)]
pub struct MockNeHandle {
    objname: String,
    mode: NeMode,
    buf: Vec<u8>,
    cursor: usize,
}

impl MockNe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arranges for the next `close` of `objname` to report [`NeCloseOutcome::Degraded`].
    pub fn mark_degraded(&self, objname: &str) {
        self.inner
            .lock()
            .degraded_on_close
            .insert(objname.to_string());
    }

    /// Returns the fully committed bytes of `objname`, if it has ever been closed.
    pub fn object_bytes(&self, objname: &str) -> Option<Vec<u8>> {
        self.inner.lock().objects.get(objname).cloned()
    }
}

impl NeBackend for MockNe {
    type Handle = MockNeHandle;

    fn open(
        &self,
        objname: &str,
        _location: ObjectLocation,
        _erasure: Protection,
        mode: NeMode,
    ) -> Result<Self::Handle, DatastreamError> {
        let inner = self.inner.lock();
        let buf = match mode {
            NeMode::Read => inner
                .objects
                .get(objname)
                .cloned()
                .ok_or_else(|| error::invalid_argument(format!("no such object: {objname}")))?,
            NeMode::Write => inner.objects.get(objname).cloned().unwrap_or_default(),
        };
        Ok(MockNeHandle {
            objname: objname.to_string(),
            mode,
            buf,
            cursor: 0,
        })
    }

    fn read(&self, handle: &mut Self::Handle, buf: &mut [u8]) -> Result<usize, DatastreamError> {
        let available = handle.buf.len().saturating_sub(handle.cursor);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&handle.buf[handle.cursor..handle.cursor + n]);
        handle.cursor += n;
        Ok(n)
    }

    fn write(&self, handle: &mut Self::Handle, buf: &[u8]) -> Result<usize, DatastreamError> {
        if handle.mode != NeMode::Write {
            return Err(error::invalid_argument("object handle not opened for write"));
        }
        let end = handle.cursor + buf.len();
        if handle.buf.len() < end {
            handle.buf.resize(end, 0);
        }
        handle.buf[handle.cursor..end].copy_from_slice(buf);
        handle.cursor = end;
        Ok(buf.len())
    }

    fn seek(&self, handle: &mut Self::Handle, offset: u64) -> Result<u64, DatastreamError> {
        handle.cursor = offset as usize;
        Ok(offset)
    }

    fn close(&self, handle: Self::Handle) -> Result<NeCloseOutcome, DatastreamError> {
        let mut inner = self.inner.lock();
        if handle.mode == NeMode::Write {
            inner.objects.insert(handle.objname.clone(), handle.buf);
        }
        if inner.degraded_on_close.remove(&handle.objname) {
            Ok(NeCloseOutcome::Degraded(RebuildTag {
                degraded_stripes: vec![0],
            }))
        } else {
            Ok(NeCloseOutcome::Clean)
        }
    }

    fn abort(&self, _handle: Self::Handle) -> Result<(), DatastreamError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MdalFile {
    data: Vec<u8>,
    xattrs: HashMap<String, Vec<u8>>,
    inode: u64,
    mode: u32,
    uid: u32,
    gid: u32,
    atime: (i64, u32),
    mtime: (i64, u32),
}

/// An in-memory metadata store: reference files, xattrs, and user-namespace hard links.
#[derive(Debug, Clone)]
pub struct MockMdal {
    inner: Arc<Mutex<MockMdalInner>>,
}

#[derive(Debug, Default)]
struct MockMdalInner {
    paths: HashMap<String, Arc<Mutex<MdalFile>>>,
    next_inode: u64,
}

impl Default for MockMdal {
    fn default() -> Self {
        MockMdal {
            inner: Arc::new(Mutex::new(MockMdalInner {
                paths: HashMap::new(),
                next_inode: 1,
            })),
        }
    }
}

impl MockMdal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner.lock().paths.contains_key(path)
    }
}

#[derive(Debug)]
pub struct MockMdalHandle {
    path: String,
    file: Arc<Mutex<MdalFile>>,
}

impl MdalBackend for MockMdal {
    type Handle = MockMdalHandle;
    type Ctx = ();

    fn openref(
        &self,
        _ctx: &Self::Ctx,
        refpath: &str,
        create: bool,
        mode: u32,
    ) -> Result<Self::Handle, DatastreamError> {
        let mut inner = self.inner.lock();
        if create {
            if inner.paths.contains_key(refpath) {
                return Err(DatastreamError::Busy);
            }
            let inode = inner.next_inode;
            inner.next_inode += 1;
            let file = Arc::new(Mutex::new(MdalFile {
                mode,
                inode,
                ..Default::default()
            }));
            inner.paths.insert(refpath.to_string(), file.clone());
            Ok(MockMdalHandle {
                path: refpath.to_string(),
                file,
            })
        } else {
            let file = inner
                .paths
                .get(refpath)
                .cloned()
                .ok_or_else(|| error::invalid_argument(format!("no such reference: {refpath}")))?;
            Ok(MockMdalHandle {
                path: refpath.to_string(),
                file,
            })
        }
    }

    fn unlinkref(&self, _ctx: &Self::Ctx, refpath: &str) -> Result<(), DatastreamError> {
        self.inner.lock().paths.remove(refpath);
        Ok(())
    }

    fn linkref(&self, _ctx: &Self::Ctx, refpath: &str, userpath: &str) -> Result<(), DatastreamError> {
        let mut inner = self.inner.lock();
        let file = inner
            .paths
            .get(refpath)
            .cloned()
            .ok_or_else(|| error::invalid_argument(format!("no such reference: {refpath}")))?;
        if inner.paths.contains_key(userpath) {
            return Err(DatastreamError::Busy);
        }
        inner.paths.insert(userpath.to_string(), file);
        Ok(())
    }

    fn unlink(&self, _ctx: &Self::Ctx, userpath: &str) -> Result<(), DatastreamError> {
        self.inner.lock().paths.remove(userpath);
        Ok(())
    }

    fn open(&self, _ctx: &Self::Ctx, userpath: &str, _write: bool) -> Result<Self::Handle, DatastreamError> {
        let file = self
            .inner
            .lock()
            .paths
            .get(userpath)
            .cloned()
            .ok_or_else(|| error::invalid_argument(format!("no such path: {userpath}")))?;
        Ok(MockMdalHandle {
            path: userpath.to_string(),
            file,
        })
    }

    fn close(&self, _handle: Self::Handle) -> Result<(), DatastreamError> {
        Ok(())
    }

    fn ftruncate(&self, handle: &Self::Handle, len: u64) -> Result<(), DatastreamError> {
        handle.file.lock().data.resize(len as usize, 0);
        Ok(())
    }

    fn futimens(
        &self,
        handle: &Self::Handle,
        atime: (i64, u32),
        mtime: (i64, u32),
    ) -> Result<(), DatastreamError> {
        let mut file = handle.file.lock();
        file.atime = atime;
        file.mtime = mtime;
        Ok(())
    }

    fn fstat(&self, handle: &Self::Handle) -> Result<MdalStat, DatastreamError> {
        let file = handle.file.lock();
        Ok(MdalStat {
            inode: file.inode,
            mode: file.mode,
            uid: file.uid,
            gid: file.gid,
            size: file.data.len() as u64,
        })
    }

    fn fsetxattr(
        &self,
        handle: &Self::Handle,
        create_only: bool,
        name: &str,
        value: &[u8],
    ) -> Result<(), DatastreamError> {
        let mut file = handle.file.lock();
        if create_only && file.xattrs.contains_key(name) {
            return Err(DatastreamError::Busy);
        }
        file.xattrs.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn fgetxattr(&self, handle: &Self::Handle, name: &str) -> Result<Vec<u8>, DatastreamError> {
        handle
            .file
            .lock()
            .xattrs
            .get(name)
            .cloned()
            .ok_or_else(|| error::invalid_argument(format!("no such xattr: {name} on {}", handle.path)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::NeMode;
    use crate::refpath::ObjectLocation;

    fn loc() -> ObjectLocation {
        ObjectLocation {
            pod: 0,
            cap: 0,
            scatter: 0,
            o: 0,
        }
    }

    fn prot() -> Protection {
        Protection {
            n: 10,
            e: 2,
            o: 0,
            partsz: 1024,
        }
    }

    #[test]
    fn ne_write_then_read_round_trips() {
        let ne = MockNe::new();
        let mut h = ne.open("obj-1", loc(), prot(), NeMode::Write).unwrap();
        ne.write(&mut h, b"hello world").unwrap();
        ne.close(h).unwrap();

        let mut h = ne.open("obj-1", loc(), prot(), NeMode::Read).unwrap();
        let mut buf = [0u8; 11];
        let n = ne.read(&mut h, &mut buf).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn ne_degraded_close_is_one_shot() {
        let ne = MockNe::new();
        ne.mark_degraded("obj-1");
        let h = ne.open("obj-1", loc(), prot(), NeMode::Write).unwrap();
        let outcome = ne.close(h).unwrap();
        assert!(matches!(outcome, NeCloseOutcome::Degraded(_)));

        let h = ne.open("obj-1", loc(), prot(), NeMode::Write).unwrap();
        let outcome = ne.close(h).unwrap();
        assert!(matches!(outcome, NeCloseOutcome::Clean));
    }

    #[test]
    fn mdal_create_then_collide() {
        let mdal = MockMdal::new();
        let _h1 = mdal.openref(&(), "/ref/a", true, 0o644).unwrap();
        let err = mdal.openref(&(), "/ref/a", true, 0o644).unwrap_err();
        assert!(matches!(err, DatastreamError::Busy));
    }

    #[test]
    fn mdal_link_shares_the_same_inode() {
        let mdal = MockMdal::new();
        let h = mdal.openref(&(), "/ref/a", true, 0o644).unwrap();
        mdal.fsetxattr(&h, false, "MARFS-FTAG", b"tag-bytes").unwrap();
        mdal.linkref(&(), "/ref/a", "/ns/a").unwrap();

        let user_h = mdal.open(&(), "/ns/a", false).unwrap();
        let value = mdal.fgetxattr(&user_h, "MARFS-FTAG").unwrap();
        assert_eq!(value, b"tag-bytes");
    }
}
