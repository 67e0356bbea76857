//! FTAG codec (C1): the per-file position-and-state tag stored as the `MARFS-FTAG` xattr.
//!
//! Grounded on `tagging.h`'s `FTAG_STATE`/`ftag_struct` and `datastream.c`'s `putftag`/`getftag`.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::error::DatastreamError;

/// Characters forbidden in `ctag`, since they are the field/group delimiters of the wire grammar
/// (`FTAG_RESERVED_CHARS` in the original).
pub const RESERVED_CHARS: &[char] = &['(', ')', '|'];

/// Characters forbidden in `streamid`. Unlike `ctag`, `streamid` is internally minted (never
/// user-supplied) as `<repo>|<escaped-ns>|<sec>.<nsec>` and is expected to contain `|`; only the
/// paren delimiters that bound the field itself remain forbidden.
const STREAMID_RESERVED_CHARS: &[char] = &['(', ')'];

pub const CURRENT_MAJOR_VERSION: u32 = 0;
pub const CURRENT_MINOR_VERSION: u32 = 1;

/// The data-state component of [`FtagState`]. Ordered so that `DataState::Init < ... <
/// DataState::Complete` gives the monotone-increase comparison the invariants require directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataState {
    /// No file data exists yet.
    Init = 0,
    /// Known lower bound on file size (may be up to `objsize` bytes larger).
    Sized = 1,
    /// Known total file size.
    Finalized = 2,
    /// All data written (not necessarily synced).
    Complete = 3,
}

impl DataState {
    fn from_u8(v: u8) -> Result<Self, DatastreamError> {
        match v {
            0 => Ok(DataState::Init),
            1 => Ok(DataState::Sized),
            2 => Ok(DataState::Finalized),
            3 => Ok(DataState::Complete),
            other => Err(DatastreamError::Codec(format!(
                "unrecognized FTAG data-state value {other}"
            ))),
        }
    }
}

bitflags! {
    /// The flag component of [`FtagState`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FtagFlags: u8 {
        /// File's data is writable by arbitrary procs (an extended, not-yet-finalized file).
        const WRITEABLE = 1 << 2;
        /// File's data is readable by arbitrary procs.
        const READABLE  = 1 << 3;
    }
}

/// The two orthogonal parts of an FTAG's `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtagState {
    pub data_state: DataState,
    pub flags: FtagFlags,
}

impl FtagState {
    pub fn new(data_state: DataState, flags: FtagFlags) -> Self {
        FtagState { data_state, flags }
    }

    fn to_byte(self) -> u8 {
        self.data_state as u8 | self.flags.bits()
    }

    fn from_byte(b: u8) -> Result<Self, DatastreamError> {
        let data_state = DataState::from_u8(b & 0b011)?;
        let flags = FtagFlags::from_bits_truncate(b & !0b011);
        Ok(FtagState { data_state, flags })
    }
}

/// Erasure protection parameters: `(N, E, O, partsz)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    pub n: u32,
    pub e: u32,
    pub o: u32,
    pub partsz: u64,
}

/// The per-file extended attribute: the authoritative state record for one logical file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ftag {
    pub major_version: u32,
    pub minor_version: u32,
    pub ctag: String,
    pub streamid: String,
    pub objfiles: u64,
    pub objsize: u64,
    pub fileno: u64,
    pub objno: u64,
    pub offset: u64,
    pub endofstream: bool,
    pub protection: Protection,
    pub bytes: u64,
    pub availbytes: u64,
    pub recoverybytes: u64,
    pub state: FtagState,
}

fn check_reserved(field: &str, name: &str) -> Result<(), DatastreamError> {
    if field.chars().any(|c| RESERVED_CHARS.contains(&c)) {
        return Err(DatastreamError::Codec(format!(
            "{name} contains a reserved character ({RESERVED_CHARS:?})"
        )));
    }
    Ok(())
}

fn check_streamid_reserved(field: &str) -> Result<(), DatastreamError> {
    if field.chars().any(|c| STREAMID_RESERVED_CHARS.contains(&c)) {
        return Err(DatastreamError::Codec(format!(
            "streamid contains a reserved character ({STREAMID_RESERVED_CHARS:?})"
        )));
    }
    Ok(())
}

impl Ftag {
    /// Serializes this FTAG to its wire string. `parse(serialize(x)) == x` for all valid `x`.
    pub fn serialize(&self) -> Result<String, DatastreamError> {
        check_reserved(&self.ctag, "ctag")?;
        check_streamid_reserved(&self.streamid)?;
        if self.ctag.len() > 32 {
            return Err(DatastreamError::Codec(
                "ctag exceeds 32 characters".to_string(),
            ));
        }
        Ok(format!(
            "{maj}|{min}|({ctag})|({streamid})|{objfiles}|{objsize}|{fileno}|{objno}|{offset}|{eos}|{n},{e},{o},{partsz}|{bytes}|{availbytes}|{recoverybytes}|{state}",
            maj = self.major_version,
            min = self.minor_version,
            ctag = self.ctag,
            streamid = self.streamid,
            objfiles = self.objfiles,
            objsize = self.objsize,
            fileno = self.fileno,
            objno = self.objno,
            offset = self.offset,
            eos = if self.endofstream { 1 } else { 0 },
            n = self.protection.n,
            e = self.protection.e,
            o = self.protection.o,
            partsz = self.protection.partsz,
            bytes = self.bytes,
            availbytes = self.availbytes,
            recoverybytes = self.recoverybytes,
            state = self.state.to_byte(),
        ))
    }

    /// Parses an FTAG back out of its wire string. `ctag`/`streamid` are each delimited by a
    /// matching pair of parens rather than split out with the rest of the fields on `|`, since
    /// `streamid` (internally minted) legitimately contains `|`.
    pub fn parse(s: &str) -> Result<Self, DatastreamError> {
        let mut rest = s;

        let major_version: u32 = take_field(&mut rest, "major version")?
            .parse()
            .map_err(|_| DatastreamError::Codec("bad major version".to_string()))?;
        if major_version > CURRENT_MAJOR_VERSION {
            return Err(DatastreamError::Codec(format!(
                "FTAG major version {major_version} is newer than supported ({CURRENT_MAJOR_VERSION})"
            )));
        }
        let minor_version: u32 = take_field(&mut rest, "minor version")?
            .parse()
            .map_err(|_| DatastreamError::Codec("bad minor version".to_string()))?;

        let ctag = take_paren_field(&mut rest, "ctag")?;
        let streamid = take_paren_field(&mut rest, "streamid")?;

        let objfiles = parse_u64(take_field(&mut rest, "objfiles")?, "objfiles")?;
        let objsize = parse_u64(take_field(&mut rest, "objsize")?, "objsize")?;
        let fileno = parse_u64(take_field(&mut rest, "fileno")?, "fileno")?;
        let objno = parse_u64(take_field(&mut rest, "objno")?, "objno")?;
        let offset = parse_u64(take_field(&mut rest, "offset")?, "offset")?;
        let endofstream = match take_field(&mut rest, "endofstream")? {
            "0" => false,
            "1" => true,
            other => {
                return Err(DatastreamError::Codec(format!(
                    "bad endofstream flag: {other}"
                )));
            }
        };

        let protection = parse_protection(take_field(&mut rest, "protection")?)?;
        let bytes = parse_u64(take_field(&mut rest, "bytes")?, "bytes")?;
        let availbytes = parse_u64(take_field(&mut rest, "availbytes")?, "availbytes")?;
        let recoverybytes = parse_u64(take_field(&mut rest, "recoverybytes")?, "recoverybytes")?;
        // state is the final field: whatever is left of `rest`, with no trailing '|'.
        let state_byte: u8 = rest
            .parse()
            .map_err(|_| DatastreamError::Codec("bad state byte".to_string()))?;
        let state = FtagState::from_byte(state_byte)?;

        if availbytes > bytes {
            return Err(DatastreamError::Codec(
                "availbytes exceeds bytes".to_string(),
            ));
        }

        Ok(Ftag {
            major_version,
            minor_version,
            ctag,
            streamid,
            objfiles,
            objsize,
            fileno,
            objno,
            offset,
            endofstream,
            protection,
            bytes,
            availbytes,
            recoverybytes,
            state,
        })
    }
}

/// Consumes a leading `field|` from `*rest`, returning `field`.
fn take_field<'a>(rest: &mut &'a str, name: &'static str) -> Result<&'a str, DatastreamError> {
    let (field, remainder) = rest
        .split_once('|')
        .ok_or_else(|| DatastreamError::Codec(format!("truncated FTAG string: missing {name}")))?;
    *rest = remainder;
    Ok(field)
}

/// Consumes a leading `(value)|` from `*rest`, returning `value`. Scans to the matching `)`
/// rather than splitting on `|`, since the value (a `streamid`) may itself contain `|`.
fn take_paren_field(rest: &mut &str, name: &'static str) -> Result<String, DatastreamError> {
    let inner = rest
        .strip_prefix('(')
        .ok_or_else(|| DatastreamError::Codec(format!("expected parenthesized {name}")))?;
    let close = inner
        .find(')')
        .ok_or_else(|| DatastreamError::Codec(format!("unterminated parenthesized {name}")))?;
    let value = &inner[..close];
    let after = inner[close + 1..]
        .strip_prefix('|')
        .ok_or_else(|| DatastreamError::Codec(format!("expected '|' after {name}")))?;
    *rest = after;
    Ok(value.to_string())
}

fn parse_u64(field: &str, name: &str) -> Result<u64, DatastreamError> {
    field
        .parse()
        .map_err(|_| DatastreamError::Codec(format!("bad {name} value: {field}")))
}

fn parse_protection(field: &str) -> Result<Protection, DatastreamError> {
    let mut parts = field.split(',');
    let mut next = |name: &str| -> Result<&str, DatastreamError> {
        parts
            .next()
            .ok_or_else(|| DatastreamError::Codec(format!("missing protection field {name}")))
    };
    let n: u32 = next("N")?
        .parse()
        .map_err(|_| DatastreamError::Codec("bad protection N".to_string()))?;
    let e: u32 = next("E")?
        .parse()
        .map_err(|_| DatastreamError::Codec("bad protection E".to_string()))?;
    let o: u32 = next("O")?
        .parse()
        .map_err(|_| DatastreamError::Codec("bad protection O".to_string()))?;
    let partsz: u64 = next("partsz")?
        .parse()
        .map_err(|_| DatastreamError::Codec("bad protection partsz".to_string()))?;
    Ok(Protection { n, e, o, partsz })
}

impl fmt::Display for Ftag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.serialize() {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<invalid ftag>"),
        }
    }
}

impl FromStr for Ftag {
    type Err = DatastreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ftag::parse(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Ftag {
        Ftag {
            major_version: CURRENT_MAJOR_VERSION,
            minor_version: CURRENT_MINOR_VERSION,
            ctag: "client-a".to_string(),
            streamid: "repo#ns.1234.5678".to_string(),
            objfiles: 3,
            objsize: 65536,
            fileno: 2,
            objno: 1,
            offset: 192,
            endofstream: false,
            protection: Protection {
                n: 10,
                e: 2,
                o: 3,
                partsz: 1024,
            },
            bytes: 1024,
            availbytes: 1024,
            recoverybytes: 128,
            state: FtagState::new(DataState::Finalized, FtagFlags::empty()),
        }
    }

    #[test]
    fn round_trips() {
        let ftag = sample();
        let s = ftag.serialize().unwrap();
        let parsed = Ftag::parse(&s).unwrap();
        assert_eq!(ftag, parsed);
    }

    #[test]
    fn rejects_reserved_characters() {
        let mut ftag = sample();
        ftag.ctag = "bad|tag".to_string();
        assert!(ftag.serialize().is_err());
    }

    #[test]
    fn rejects_future_major_version() {
        let mut ftag = sample();
        ftag.major_version = CURRENT_MAJOR_VERSION + 1;
        let s = format!(
            "{}|{}|(x)|(y)|0|0|0|0|0|0|1,0,0,1|0|0|0|0",
            ftag.major_version, ftag.minor_version
        );
        assert!(Ftag::parse(&s).is_err());
    }

    #[test]
    fn state_byte_round_trips_all_combinations() {
        for ds in [
            DataState::Init,
            DataState::Sized,
            DataState::Finalized,
            DataState::Complete,
        ] {
            for flags in [
                FtagFlags::empty(),
                FtagFlags::WRITEABLE,
                FtagFlags::READABLE,
                FtagFlags::WRITEABLE | FtagFlags::READABLE,
            ] {
                let state = FtagState::new(ds, flags);
                let byte = state.to_byte();
                let back = FtagState::from_byte(byte).unwrap();
                assert_eq!(state, back);
            }
        }
    }

    #[test]
    fn accepts_unknown_minor_version() {
        let mut ftag = sample();
        ftag.minor_version = CURRENT_MINOR_VERSION + 50;
        let s = ftag.serialize().unwrap();
        let parsed = Ftag::parse(&s).unwrap();
        assert_eq!(parsed.minor_version, ftag.minor_version);
    }

    #[test]
    fn streamid_containing_pipes_round_trips() {
        let mut ftag = sample();
        ftag.streamid = "repo1|#proj#sub|1700000000.42".to_string();
        let s = ftag.serialize().unwrap();
        let parsed = Ftag::parse(&s).unwrap();
        assert_eq!(parsed.streamid, ftag.streamid);
        assert_eq!(ftag, parsed);
    }

    #[test]
    fn rejects_availbytes_exceeding_bytes() {
        let mut ftag = sample();
        ftag.bytes = 10;
        ftag.availbytes = 20;
        let s = ftag.serialize().unwrap();
        assert!(Ftag::parse(&s).is_err());
    }
}
