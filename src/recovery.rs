//! Recovery codec (C2): the per-object header and per-file trailer embedded in object data,
//! plus the rebuild tag produced by a degraded object close.
//!
//! Grounded on `tagging.h`'s recovery structures and `datastream.c`'s `genrecoveryinfo`/
//! `putfinfo`/`close_current_obj`.

use std::path::PathBuf;

use crate::error::DatastreamError;

/// The fixed-format header written as the first bytes of every object: `(major, minor, ctag,
/// streamid)`. Its length is a pure function of `ctag`/`streamid`, so callers can size a buffer
/// before ever calling [`RecoveryHeader::serialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryHeader {
    pub major_version: u32,
    pub minor_version: u32,
    pub ctag: String,
    pub streamid: String,
}

impl RecoveryHeader {
    /// Encoded length of this header, without actually encoding it.
    pub fn header_len(ctag: &str, streamid: &str) -> usize {
        // "major|minor|(ctag)|(streamid)" -- two numbers rendered generously, two delimiters,
        // four parens, two pipes. Callers size a buffer off this before the values are final, so
        // round the numeric fields up to their widest plausible rendering instead of calling
        // `to_string` on placeholder values.
        10 + 10 + ctag.len() + streamid.len() + 2 + 4 + 2
    }

    pub fn serialize(&self) -> String {
        format!(
            "{}|{}|({})|({})",
            self.major_version, self.minor_version, self.ctag, self.streamid
        )
    }

    pub fn parse(s: &str) -> Result<Self, DatastreamError> {
        let mut parts = s.splitn(4, '|');
        let mut next = || {
            parts
                .next()
                .ok_or_else(|| DatastreamError::Codec("truncated recovery header".to_string()))
        };
        let major_version: u32 = next()?
            .parse()
            .map_err(|_| DatastreamError::Codec("bad recovery header major version".to_string()))?;
        let minor_version: u32 = next()?
            .parse()
            .map_err(|_| DatastreamError::Codec("bad recovery header minor version".to_string()))?;
        let ctag = unwrap_paren(next()?)?;
        let streamid = unwrap_paren(next()?)?;
        Ok(RecoveryHeader {
            major_version,
            minor_version,
            ctag,
            streamid,
        })
    }
}

/// The per-file trailer written at the end of each object a file occupies: `(inode, mode, uid,
/// gid, size, mtime, eof, path)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryFinfo {
    pub inode: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: (i64, u32),
    pub eof: bool,
    pub path: PathBuf,
}

impl RecoveryFinfo {
    /// Encodes this trailer with no padding applied yet.
    fn encode_unpadded(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{},{}|{}|({})",
            self.inode,
            self.mode,
            self.uid,
            self.gid,
            self.size,
            self.mtime.0,
            self.mtime.1,
            if self.eof { 1 } else { 0 },
            self.path.display(),
        )
    }

    /// Serializes into exactly `recoverybytes` bytes, zero-padding if the natural encoding is
    /// shorter. Errors with [`DatastreamError::NameTooLong`] if it does not fit.
    pub fn serialize(&self, recoverybytes: u64) -> Result<Vec<u8>, DatastreamError> {
        let encoded = self.encode_unpadded();
        let needed = encoded.len();
        if needed as u64 > recoverybytes {
            return Err(DatastreamError::NameTooLong {
                needed,
                objsize: recoverybytes,
            });
        }
        let mut buf = encoded.into_bytes();
        buf.resize(recoverybytes as usize, 0);
        Ok(buf)
    }

    /// Parses a trailer back out of its (possibly zero-padded) encoded bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, DatastreamError> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let s = std::str::from_utf8(&bytes[..end])
            .map_err(|_| DatastreamError::Codec("recovery finfo is not utf8".to_string()))?;

        let mut parts = s.splitn(8, '|');
        let mut next = || {
            parts
                .next()
                .ok_or_else(|| DatastreamError::Codec("truncated recovery finfo".to_string()))
        };
        let inode: u64 = next()?
            .parse()
            .map_err(|_| DatastreamError::Codec("bad finfo inode".to_string()))?;
        let mode: u32 = next()?
            .parse()
            .map_err(|_| DatastreamError::Codec("bad finfo mode".to_string()))?;
        let uid: u32 = next()?
            .parse()
            .map_err(|_| DatastreamError::Codec("bad finfo uid".to_string()))?;
        let gid: u32 = next()?
            .parse()
            .map_err(|_| DatastreamError::Codec("bad finfo gid".to_string()))?;
        let size: u64 = next()?
            .parse()
            .map_err(|_| DatastreamError::Codec("bad finfo size".to_string()))?;
        let mtime_field = next()?;
        let mut mtime_parts = mtime_field.splitn(2, ',');
        let mtime_sec: i64 = mtime_parts
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| DatastreamError::Codec("bad finfo mtime seconds".to_string()))?;
        let mtime_nsec: u32 = mtime_parts
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| DatastreamError::Codec("bad finfo mtime nanoseconds".to_string()))?;
        let eof = match next()? {
            "0" => false,
            "1" => true,
            other => return Err(DatastreamError::Codec(format!("bad finfo eof flag: {other}"))),
        };
        let path = unwrap_paren(next()?)?;

        Ok(RecoveryFinfo {
            inode,
            mode,
            uid,
            gid,
            size,
            mtime: (mtime_sec, mtime_nsec),
            eof,
            path: PathBuf::from(path),
        })
    }
}

/// Degraded-object marker: produced when an NE close reports lost parity that the stream can
/// still recover from. Opaque to callers beyond its round-trip; `reported_at` is left to the
/// caller rather than minted here, so this codec never reads the wall clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildTag {
    pub degraded_stripes: Vec<u32>,
}

impl RebuildTag {
    pub fn serialize(&self) -> String {
        self.degraded_stripes
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn parse(s: &str) -> Result<Self, DatastreamError> {
        if s.is_empty() {
            return Ok(RebuildTag {
                degraded_stripes: Vec::new(),
            });
        }
        let degraded_stripes = s
            .split('|')
            .map(|f| {
                f.parse()
                    .map_err(|_| DatastreamError::Codec(format!("bad rebuild tag stripe: {f}")))
            })
            .collect::<Result<Vec<u32>, DatastreamError>>()?;
        Ok(RebuildTag { degraded_stripes })
    }
}

impl std::fmt::Display for RebuildTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn unwrap_paren(field: &str) -> Result<String, DatastreamError> {
    let field = field
        .strip_prefix('(')
        .and_then(|f| f.strip_suffix(')'))
        .ok_or_else(|| DatastreamError::Codec(format!("expected parenthesized field: {field}")))?;
    Ok(field.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = RecoveryHeader {
            major_version: 0,
            minor_version: 1,
            ctag: "client-a".to_string(),
            streamid: "repo#ns.123".to_string(),
        };
        let s = header.serialize();
        assert_eq!(RecoveryHeader::parse(&s).unwrap(), header);
    }

    #[test]
    fn header_len_is_an_upper_bound() {
        let ctag = "client-a";
        let streamid = "repo#ns.123";
        let header = RecoveryHeader {
            major_version: 0,
            minor_version: 1,
            ctag: ctag.to_string(),
            streamid: streamid.to_string(),
        };
        let bound = RecoveryHeader::header_len(ctag, streamid);
        assert!(header.serialize().len() <= bound);
    }

    fn sample_finfo() -> RecoveryFinfo {
        RecoveryFinfo {
            inode: 42,
            mode: 0o100644,
            uid: 1000,
            gid: 1000,
            size: 4096,
            mtime: (1_700_000_000, 500),
            eof: true,
            path: PathBuf::from("/ns/a/b.txt"),
        }
    }

    #[test]
    fn finfo_round_trips_with_padding() {
        let finfo = sample_finfo();
        let unpadded_len = finfo.encode_unpadded().len();
        let buf = finfo.serialize(unpadded_len as u64 + 16).unwrap();
        assert_eq!(buf.len(), unpadded_len + 16);
        assert!(buf[unpadded_len..].iter().all(|&b| b == 0));
        let parsed = RecoveryFinfo::parse(&buf).unwrap();
        assert_eq!(parsed, finfo);
    }

    #[test]
    fn finfo_reports_needed_size_when_too_small() {
        let finfo = sample_finfo();
        let unpadded_len = finfo.encode_unpadded().len();
        let err = finfo.serialize((unpadded_len - 1) as u64).unwrap_err();
        match err {
            DatastreamError::NameTooLong { needed, objsize } => {
                assert_eq!(needed, unpadded_len);
                assert_eq!(objsize, (unpadded_len - 1) as u64);
            }
            other => panic!("expected NameTooLong, got {other:?}"),
        }
    }

    #[test]
    fn rebuild_tag_round_trips_empty_and_nonempty() {
        let empty = RebuildTag {
            degraded_stripes: Vec::new(),
        };
        assert_eq!(RebuildTag::parse(&empty.serialize()).unwrap(), empty);

        let some = RebuildTag {
            degraded_stripes: vec![0, 3, 7],
        };
        assert_eq!(RebuildTag::parse(&some.serialize()).unwrap(), some);
    }
}
