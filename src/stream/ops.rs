//! Stream operations (C7): the public API surface coordinating C4-C6 and enforcing the state
//! machine.
//!
//! Grounded on `datastream.c`'s live API (`datastream_create`, `datastream_open`,
//! `datastream_release`, `datastream_close`, `datastream_read`, `gettargets`) for
//! create/open/release/close/read/seek-math. `write`/`extend`/`truncate`/`utimens`/`chunkbounds`
//! are built fresh from SPEC_FULL.md §4.7 directly: the C file's own versions of these are
//! either inside its `#if 0` dead block or, for `datastream_write`, an incomplete stub that
//! returns before doing any actual write.

use std::path::PathBuf;

use crate::backend::{MdalBackend, NeBackend, NeCloseOutcome};
use crate::config::Position;
use crate::error::{self, DatastreamError};
use crate::ftag::{DataState, Ftag, FtagFlags, FtagState};
use crate::recovery::RecoveryFinfo;
use crate::refpath::{ref_path, PlacementTable};
use crate::stream::file::{self, FTAG_XATTR, RTAG_XATTR};
use crate::stream::object;
use crate::stream::state::{mint_streamid, next_file_capacity, OpenKind, Stream, StreamKind, TrackedFile, Whence};

impl<M, N> Stream<M, N>
where
    M: MdalBackend + Clone,
    M::Ctx: Default + Clone,
    N: NeBackend + Clone,
{
    /// Begins or continues a CREATE stream. When `prior` is `Some`, this is a packing/striping
    /// continuation on the *same* stream instance: `mode`/`ctag`/`pos`/`now` are ignored (the
    /// original stream's identity governs, the same way the C original ignores fresh-stream
    /// setup arguments once `*stream` is already non-NULL) and the file that was previously
    /// current is finalized before the new one begins.
    pub fn create(
        prior: Option<Self>,
        path: &str,
        mode: u32,
        ctag: &str,
        pos: &Position,
        mdal: M,
        ne: N,
        now: (i64, u32),
    ) -> Result<Self, DatastreamError> {
        match prior {
            None => Self::create_first(path, mode, ctag, pos, mdal, ne, now),
            Some(s) => Self::create_next(s, path, mode),
        }
    }

    fn create_first(
        path: &str,
        mode: u32,
        ctag: &str,
        pos: &Position,
        mdal: M,
        ne: N,
        now: (i64, u32),
    ) -> Result<Self, DatastreamError> {
        if ctag.len() > 32 {
            return Err(error::invalid_argument("ctag exceeds 32 characters"));
        }
        let streamid = mint_streamid(&pos.namespace, now);
        let mut stream = Stream {
            kind: StreamKind::Create,
            position: pos.clone(),
            ctag: ctag.to_string(),
            streamid,
            mdal,
            ne,
            ctx: M::Ctx::default(),
            cur_objno: 0,
            cur_object: None,
            cur_object_files: 0,
            files: Vec::with_capacity(next_file_capacity(0, pos.scheme.objfiles)),
            curfile: 0,
        };
        stream.begin_file(path, mode)?;
        Ok(stream)
    }

    fn create_next(mut stream: Self, path: &str, mode: u32) -> Result<Self, DatastreamError> {
        stream.finalize_and_complete_current()?;

        let objfiles = stream.position.scheme.objfiles;
        if stream.files.len() == stream.files.capacity() {
            stream.files.reserve(next_file_capacity(stream.files.capacity(), objfiles) - stream.files.len());
        }

        let can_pack_more_files = objfiles == 0 || stream.cur_object_files < objfiles;
        let has_room = stream.remaining_in_current_object().unwrap_or(0) > stream.position.scheme.recoverybytes;
        if !(can_pack_more_files && has_room) {
            if stream.cur_object.is_some() {
                stream.close_current_object()?;
            }
            stream.cur_objno += 1;
            stream.cur_object_files = 0;
        }

        stream.begin_file(path, mode)?;
        Ok(stream)
    }

    fn begin_file(&mut self, path: &str, mode: u32) -> Result<(), DatastreamError> {
        let scheme = self.position.scheme;
        let header_and_trailer = scheme.recoveryheaderlen + scheme.recoverybytes;
        if scheme.objsize > 0 && header_and_trailer >= scheme.objsize {
            return Err(DatastreamError::NameTooLong {
                needed: header_and_trailer as usize,
                objsize: scheme.objsize,
            });
        }

        let offset = match self.cur_object.as_ref() {
            Some(oh) => oh.offset,
            None => scheme.recoveryheaderlen,
        };

        let ftag = Ftag {
            major_version: crate::ftag::CURRENT_MAJOR_VERSION,
            minor_version: crate::ftag::CURRENT_MINOR_VERSION,
            ctag: self.ctag.clone(),
            streamid: self.streamid.clone(),
            objfiles: scheme.objfiles,
            objsize: scheme.objsize,
            fileno: self.files.len() as u64,
            objno: self.cur_objno,
            offset,
            endofstream: false,
            protection: scheme.protection,
            bytes: 0,
            availbytes: 0,
            recoverybytes: scheme.recoverybytes,
            state: FtagState::new(DataState::Init, FtagFlags::WRITEABLE),
        };

        let refdir_table = PlacementTable::new(&self.position.placement.refdirs);
        let refpath = ref_path(&ftag, &refdir_table);
        let handle = file::create_reference_file(&self.mdal, &self.ctx, &refpath, path, mode, &ftag)?;

        self.files.push(TrackedFile {
            userpath: path.to_string(),
            refpath,
            handle,
            desired_atime: (0, 0),
            desired_mtime: (0, 0),
            cursor: 0,
            ftag,
        });
        self.curfile = self.files.len() - 1;
        self.cur_object_files += 1;
        Ok(())
    }

    /// Opens a file for reading or (owner-only) editing. `prior` continues a multi-file READ
    /// stream (e.g. reading the next packed sibling) the same way `create`'s `prior` continues a
    /// packing stream.
    pub fn open(
        prior: Option<Self>,
        kind: OpenKind,
        path: &str,
        pos: &Position,
        mdal: M,
        ne: N,
    ) -> Result<Self, DatastreamError> {
        match prior {
            None => Self::open_first(kind, path, pos, mdal, ne),
            Some(s) => Self::open_next(s, kind, path),
        }
    }

    fn open_first(kind: OpenKind, path: &str, pos: &Position, mdal: M, ne: N) -> Result<Self, DatastreamError> {
        let ctx = M::Ctx::default();
        let handle = mdal.open(&ctx, path, kind == OpenKind::Edit)?;
        let ftag = Self::read_ftag(&mdal, &handle)?;
        Self::check_open_permission(kind, &ftag)?;
        let stream_kind = match kind {
            OpenKind::Read => StreamKind::Read,
            OpenKind::Edit => StreamKind::Edit,
        };
        Ok(Stream {
            kind: stream_kind,
            position: pos.clone(),
            ctag: ftag.ctag.clone(),
            streamid: ftag.streamid.clone(),
            cur_objno: ftag.objno,
            cur_object: None,
            cur_object_files: 0,
            files: vec![TrackedFile {
                userpath: path.to_string(),
                refpath: String::new(),
                handle,
                desired_atime: (0, 0),
                desired_mtime: (0, 0),
                cursor: 0,
                ftag,
            }],
            curfile: 0,
            mdal,
            ne,
            ctx,
        })
    }

    fn open_next(mut stream: Self, kind: OpenKind, path: &str) -> Result<Self, DatastreamError> {
        let handle = stream.mdal.open(&stream.ctx, path, kind == OpenKind::Edit)?;
        let ftag = Self::read_ftag(&stream.mdal, &handle)?;
        Self::check_open_permission(kind, &ftag)?;
        stream.cur_object = None;
        stream.cur_objno = ftag.objno;
        stream.files.push(TrackedFile {
            userpath: path.to_string(),
            refpath: String::new(),
            handle,
            desired_atime: (0, 0),
            desired_mtime: (0, 0),
            cursor: 0,
            ftag,
        });
        stream.curfile = stream.files.len() - 1;
        Ok(stream)
    }

    fn read_ftag(mdal: &M, handle: &M::Handle) -> Result<Ftag, DatastreamError> {
        let bytes = mdal.fgetxattr(handle, FTAG_XATTR)?;
        let s = std::str::from_utf8(&bytes).map_err(|_| DatastreamError::Codec("FTAG xattr is not utf8".to_string()))?;
        Ftag::parse(s)
    }

    fn check_open_permission(kind: OpenKind, ftag: &Ftag) -> Result<(), DatastreamError> {
        match kind {
            OpenKind::Read => {
                if !ftag.state.flags.contains(FtagFlags::READABLE) {
                    return Err(DatastreamError::NotReadable);
                }
                Ok(())
            }
            OpenKind::Edit => {
                let owner_can_resume =
                    ftag.state.flags.contains(FtagFlags::WRITEABLE) && ftag.state.data_state >= DataState::Sized;
                let complete_for_whole_chunk_edit = ftag.state.data_state == DataState::Complete;
                if owner_can_resume || complete_for_whole_chunk_edit {
                    Ok(())
                } else {
                    Err(error::permission_denied("file is not open-for-edit eligible"))
                }
            }
        }
    }

    fn current_file(&self) -> Result<&TrackedFile<M::Handle>, DatastreamError> {
        self.files
            .get(self.curfile)
            .ok_or_else(|| error::invalid_argument("stream has no current file"))
    }

    fn current_file_mut(&mut self) -> Result<&mut TrackedFile<M::Handle>, DatastreamError> {
        self.files
            .get_mut(self.curfile)
            .ok_or_else(|| error::invalid_argument("stream has no current file"))
    }

    fn data_per_object(&self) -> Option<u64> {
        let scheme = self.position.scheme;
        if scheme.objsize == 0 {
            None
        } else {
            Some(scheme.objsize - scheme.recoveryheaderlen - scheme.recoverybytes)
        }
    }

    /// Bytes of this file's data that may still be written into the currently targeted object
    /// before a rollover is required. `None`-`dataperobj` schemes (unbounded objects) report
    /// `u64::MAX`. Ground truth is the real open object handle's offset when one is open; when
    /// none is open, a just-rolled-over file faces a fresh object (full `dataperobj` available),
    /// while a file that has not written anything yet starts at its own packed `ftag.offset`.
    fn remaining_in_current_object(&self) -> Result<u64, DatastreamError> {
        let dataperobj = match self.data_per_object() {
            None => return Ok(u64::MAX),
            Some(d) => d,
        };
        let recoveryheaderlen = self.position.scheme.recoveryheaderlen;
        let used = match &self.cur_object {
            Some(oh) => oh.offset.saturating_sub(recoveryheaderlen),
            None => {
                let file = self.current_file()?;
                if file.cursor == 0 {
                    file.ftag.offset.saturating_sub(recoveryheaderlen)
                } else {
                    0
                }
            }
        };
        Ok(dataperobj.saturating_sub(used))
    }

    /// Opens whatever object the current file's write cursor targets, resuming an
    /// already-started object in place (via [`object::open_for_append`]) rather than always
    /// treating the target as a brand new object — otherwise a resumed EDIT stream's first write
    /// after reopening would clobber the data it is supposed to continue.
    fn ensure_object_open_for_write(&mut self) -> Result<(), DatastreamError> {
        if self.cur_object.is_some() {
            return Ok(());
        }
        let (ftag, cursor) = {
            let file = self.current_file()?;
            (file.ftag.clone(), file.cursor)
        };
        let (objno, inobj_offset) = self.locate(&ftag, cursor);
        self.cur_objno = objno;
        let oh = object::open_for_append(self.ne.clone(), &self.position, &ftag, objno, inobj_offset)?;
        self.cur_object = Some(oh);
        Ok(())
    }

    fn ensure_object_open_for_read(&mut self, objno: u64, inobj_offset: u64) -> Result<(), DatastreamError> {
        let needs_reopen = match &self.cur_object {
            Some(oh) => oh.objname != crate::refpath::object_name(&self.current_file()?.ftag, objno, self.position.scheme.recoveryheaderlen),
            None => true,
        };
        if needs_reopen {
            let ftag = self.current_file()?.ftag.clone();
            let oh = object::open_for_read(self.ne.clone(), &self.position, &ftag, objno, inobj_offset)?;
            self.cur_object = Some(oh);
        } else if let Some(oh) = self.cur_object.as_mut() {
            if oh.offset != inobj_offset {
                oh.seek_to(inobj_offset)?;
            }
        }
        Ok(())
    }

    /// Resolves a file-relative data offset to `(objno, in-object offset)`.
    fn locate(&self, ftag: &Ftag, file_relative: u64) -> (u64, u64) {
        match self.data_per_object() {
            None => (ftag.objno, ftag.offset + file_relative),
            Some(dataperobj) => {
                let first_obj_room = dataperobj - (ftag.offset - self.position.scheme.recoveryheaderlen);
                if file_relative < first_obj_room {
                    (ftag.objno, ftag.offset + file_relative)
                } else {
                    let rest = file_relative - first_obj_room;
                    let objno = ftag.objno + 1 + rest / dataperobj;
                    let inobj = self.position.scheme.recoveryheaderlen + rest % dataperobj;
                    (objno, inobj)
                }
            }
        }
    }

    fn write_trailer_for_current_file(&mut self, eof: bool) -> Result<(), DatastreamError> {
        self.ensure_object_open_for_write()?;
        let stat = {
            let file = self.current_file()?;
            self.mdal.fstat(&file.handle)?
        };
        let file = self.current_file()?;
        let finfo = RecoveryFinfo {
            inode: stat.inode,
            mode: stat.mode,
            uid: stat.uid,
            gid: stat.gid,
            size: file.cursor,
            mtime: file.desired_mtime,
            eof,
            path: PathBuf::from(&file.userpath),
        };
        let recoverybytes = file.ftag.recoverybytes;
        let oh = self.cur_object.as_mut().expect("just ensured open");
        object::put_finfo(oh, &finfo, recoverybytes)
    }

    fn close_current_object(&mut self) -> Result<(), DatastreamError> {
        let Some(oh) = self.cur_object.take() else {
            return Ok(());
        };
        match oh.close()? {
            NeCloseOutcome::Clean => {}
            NeCloseOutcome::Degraded(tag) => {
                let file = self.current_file()?;
                file::attach_rebuild_tag(&self.mdal, &file.handle, &tag)?;
                self.current_file_mut()?.rebuild_tag = Some(tag);
            }
        }
        self.cur_object_files = 0;
        Ok(())
    }

    /// Finalizes and, if the file's promised size has been fully written, completes the
    /// currently tracked file. A file that was only `extend`-ed (promised size not yet reached)
    /// stays `SIZED`+`WRITEABLE`, resumable later via `Stream::open` with `OpenKind::Edit`.
    fn finalize_and_complete_current(&mut self) -> Result<(), DatastreamError> {
        if self.files.is_empty() {
            return Ok(());
        }
        let already_terminal = {
            let f = &self.current_file()?.ftag;
            f.state.data_state == DataState::Complete && f.state.flags.contains(FtagFlags::READABLE)
        };
        if already_terminal {
            return Ok(());
        }

        let fully_written = {
            let file = self.current_file()?;
            file.cursor >= file.ftag.availbytes
        };

        if fully_written {
            self.write_trailer_for_current_file(true)?;
            let idx = self.curfile;
            let tf = self.files.get_mut(idx).ok_or_else(|| error::invalid_argument("stream has no current file"))?;
            file::finalize_file(&mut tf.ftag)?;
            file::complete_file(&self.mdal, &tf.handle, &mut tf.ftag, tf.desired_atime, tf.desired_mtime)?;
            tf.ftag.state.flags.remove(FtagFlags::WRITEABLE);
        } else {
            let idx = self.curfile;
            let tf = self.files.get_mut(idx).ok_or_else(|| error::invalid_argument("stream has no current file"))?;
            if tf.ftag.state.data_state < DataState::Sized {
                tf.ftag.state.data_state = DataState::Sized;
            }
            let encoded = tf.ftag.serialize()?;
            self.mdal.fsetxattr(&tf.handle, false, FTAG_XATTR, encoded.as_bytes())?;
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes from the current file, capped at the caller-visible
    /// `availbytes`. A file only becomes readable once fully written up to `availbytes`, so every
    /// byte in range is real object data; the file-relative cursor is tracked explicitly so
    /// repeated near-EOF reads still land on the right offset.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, DatastreamError> {
        if self.kind == StreamKind::Create {
            return Err(error::invalid_argument("cannot read a create stream"));
        }
        {
            let file = self.current_file()?;
            if !file.ftag.state.flags.contains(FtagFlags::READABLE) {
                return Err(DatastreamError::NotReadable);
            }
        }

        let (availbytes, bytes, cursor) = {
            let f = &self.current_file()?.ftag;
            let file = self.current_file()?;
            (f.availbytes, f.bytes, file.cursor)
        };
        if cursor >= availbytes {
            return Ok(0);
        }

        let requested = (availbytes - cursor).min(buf.len() as u64) as usize;
        let data_len = if cursor < bytes {
            ((bytes - cursor).min(requested as u64)) as usize
        } else {
            0
        };

        if data_len > 0 {
            let ftag = self.current_file()?.ftag.clone();
            let (objno, inobj) = self.locate(&ftag, cursor);
            self.ensure_object_open_for_read(objno, inobj)?;
            let oh = self.cur_object.as_mut().expect("just ensured open");
            let mut remaining = data_len;
            let mut done = 0;
            while remaining > 0 {
                let n = oh.read(&mut buf[done..done + remaining])?;
                if n == 0 {
                    break;
                }
                done += n;
                remaining -= n;
            }
            if done < data_len {
                return Err(error::stale("object ended before expected data length"));
            }
        }
        for b in &mut buf[data_len..requested] {
            *b = 0;
        }

        self.current_file_mut()?.cursor += requested as u64;
        Ok(requested)
    }

    /// Writes `buf` to the current file, rolling over to a new object whenever the scheme's
    /// `objsize` is reached, with no byte lost across the boundary.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, DatastreamError> {
        if self.kind == StreamKind::Read {
            return Err(error::invalid_argument("cannot write a read stream"));
        }
        {
            let file = self.current_file()?;
            if !file.ftag.state.flags.contains(FtagFlags::WRITEABLE) {
                return Err(error::permission_denied("file is not writeable"));
            }
        }

        let mut written = 0usize;
        while written < buf.len() {
            let remaining = self.remaining_in_current_object()?;
            if remaining == 0 {
                self.write_trailer_for_current_file(false)?;
                self.close_current_object()?;
                self.cur_objno += 1;
                continue;
            }
            self.ensure_object_open_for_write()?;
            let chunk_len = remaining.min((buf.len() - written) as u64) as usize;
            let oh = self.cur_object.as_mut().expect("just ensured open");
            let n = oh.write(&buf[written..written + chunk_len])?;
            written += n;

            let file = self.current_file_mut()?;
            file.cursor += n as u64;
            file.ftag.bytes = file.ftag.bytes.max(file.cursor);
            file.ftag.availbytes = file.ftag.availbytes.max(file.cursor);
            if n < chunk_len {
                break;
            }
        }
        Ok(written)
    }

    /// Repositions the file-relative cursor. READ streams may not seek past EOF; write-mode
    /// streams may only seek to an object-chunk boundary (a non-boundary offset is caller
    /// misuse, since mid-chunk writes cannot be resumed without re-deriving object layout).
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, DatastreamError> {
        let (cursor, availbytes) = {
            let file = self.current_file()?;
            (file.cursor as i64, file.ftag.availbytes as i64)
        };
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => cursor,
            Whence::End => availbytes,
        };
        let target = base
            .checked_add(offset)
            .ok_or_else(|| error::invalid_argument("seek offset overflows"))?;
        if target < 0 {
            return Err(error::invalid_argument("seek before start of file"));
        }
        let target = target as u64;

        if self.kind == StreamKind::Read {
            if target > self.current_file()?.ftag.availbytes {
                return Err(error::invalid_argument("seek past EOF on a read stream"));
            }
        } else if let Some(dataperobj) = self.data_per_object() {
            if target % dataperobj != 0 {
                return Err(error::invalid_argument("seek on write stream must land on an object boundary"));
            }
        }

        self.cur_object = None;
        self.current_file_mut()?.cursor = target;
        Ok(target)
    }

    /// Grows the file's reserved size by `length`: both `bytes` (the reserved lower bound) and
    /// `availbytes` (the caller-visible size) advance by the same amount, ahead of any of that
    /// data actually being written. Only legal before any data has been written (data-state
    /// `Init`).
    pub fn extend(&mut self, length: u64) -> Result<(), DatastreamError> {
        let file = self.current_file_mut()?;
        if file.ftag.state.data_state != DataState::Init {
            return Err(error::permission_denied("extend is only legal before any data is written"));
        }
        file.ftag.bytes += length;
        file.ftag.availbytes += length;
        Ok(())
    }

    /// Shrinks a COMPLETE file's caller-visible size. Underlying object data is left untouched;
    /// only `availbytes` and the reference file's own size move. `bytes`, the reserved lower
    /// bound, is never reduced by a truncate.
    pub fn truncate(&mut self, length: u64) -> Result<(), DatastreamError> {
        let idx = self.curfile;
        let tf = self.files.get_mut(idx).ok_or_else(|| error::invalid_argument("stream has no current file"))?;
        if tf.ftag.state.data_state != DataState::Complete {
            return Err(error::permission_denied("truncate requires a complete file"));
        }
        if length > tf.ftag.availbytes {
            return Err(error::invalid_argument("truncate does not support growing a file"));
        }
        tf.ftag.availbytes = length;
        if tf.cursor > length {
            tf.cursor = length;
        }
        let encoded = tf.ftag.serialize()?;
        self.mdal.ftruncate(&tf.handle, length)?;
        self.mdal.fsetxattr(&tf.handle, false, FTAG_XATTR, encoded.as_bytes())?;
        Ok(())
    }

    /// Stages the requested atime/mtime, applied when the file reaches COMPLETE (or
    /// immediately, if it already has).
    pub fn utimens(&mut self, atime: (i64, u32), mtime: (i64, u32)) -> Result<(), DatastreamError> {
        let idx = self.curfile;
        let tf = self.files.get_mut(idx).ok_or_else(|| error::invalid_argument("stream has no current file"))?;
        tf.desired_atime = atime;
        tf.desired_mtime = mtime;
        let is_complete = tf.ftag.state.data_state == DataState::Complete;
        if is_complete {
            self.mdal.futimens(&self.files[idx].handle, atime, mtime)?;
        }
        Ok(())
    }

    /// Changes the recovery path recorded for the current file's trailer. CREATE streams may
    /// only do this before any data is written; EDIT streams may only shrink or hold steady the
    /// encoded length (it must still fit the already-committed `recoverybytes`).
    pub fn set_recovery_path(&mut self, path: &str) -> Result<(), DatastreamError> {
        let kind = self.kind;
        match kind {
            StreamKind::Create => {
                let file = self.current_file_mut()?;
                if file.ftag.state.data_state != DataState::Init {
                    return Err(error::permission_denied("recovery path can only change before any data is written"));
                }
                file.userpath = path.to_string();
                Ok(())
            }
            StreamKind::Edit => {
                let stat = {
                    let file = self.current_file()?;
                    self.mdal.fstat(&file.handle)?
                };
                let file = self.current_file_mut()?;
                let probe = RecoveryFinfo {
                    inode: stat.inode,
                    mode: stat.mode,
                    uid: stat.uid,
                    gid: stat.gid,
                    size: file.ftag.bytes,
                    mtime: file.desired_mtime,
                    eof: true,
                    path: PathBuf::from(path),
                };
                probe.serialize(file.ftag.recoverybytes)?;
                file.userpath = path.to_string();
                Ok(())
            }
            StreamKind::Read => Err(error::invalid_argument("cannot set a recovery path on a read stream")),
        }
    }

    /// Returns the `[start, end)` byte range of the current file's data occupying its `n`th
    /// object. Only meaningful for schemes with a bounded `objsize`.
    pub fn chunkbounds(&self, n: usize) -> Result<(u64, u64), DatastreamError> {
        let dataperobj = self
            .data_per_object()
            .ok_or_else(|| error::invalid_argument("chunkbounds requires a bounded objsize"))?;
        let file = self.current_file()?;
        let start = n as u64 * dataperobj;
        if start >= file.ftag.availbytes {
            return Err(error::invalid_argument("chunk index out of range"));
        }
        let end = (start + dataperobj).min(file.ftag.availbytes);
        Ok((start, end))
    }

    /// Ends this stream's interest in its current file (finalizing it, or leaving it `SIZED` and
    /// resumable if it was only `extend`-ed) and tears down every backend handle this stream
    /// holds.
    pub fn release(self) -> Result<(), DatastreamError> {
        self.teardown()
    }

    /// Ends the whole stream. In this engine `release` and `close` perform the same teardown —
    /// packing/striping continuation happens by chaining `create`/`open` with `prior: Some(_)`
    /// on the same `Stream` value rather than by reopening after a lightweight `release`, so
    /// there is no intermediate state for `release` to preserve that `close` would not also
    /// need to finalize.
    pub fn close(self) -> Result<(), DatastreamError> {
        self.teardown()
    }

    fn teardown(mut self) -> Result<(), DatastreamError> {
        if self.kind != StreamKind::Read {
            self.finalize_and_complete_current()?;
            self.close_current_object()?;
        }
        for file in self.files.drain(..) {
            let _ = self.mdal.close(file.handle);
        }
        Ok(())
    }
}

/// A reference file's optional rebuild-tag xattr, read independently of an open stream (e.g. by
/// the out-of-scope resource manager after a crash).
pub fn read_rebuild_tag<M: MdalBackend>(mdal: &M, handle: &M::Handle) -> Result<Option<crate::recovery::RebuildTag>, DatastreamError> {
    match mdal.fgetxattr(handle, RTAG_XATTR) {
        Ok(bytes) => {
            let s = std::str::from_utf8(&bytes).map_err(|_| DatastreamError::Codec("RTAG xattr is not utf8".to_string()))?;
            Ok(Some(crate::recovery::RebuildTag::parse(s)?))
        }
        Err(_) => Ok(None),
    }
}
