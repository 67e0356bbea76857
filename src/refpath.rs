//! Reference-path resolver (C3): derives reference-tree paths, object names, and placement
//! locations, all as pure deterministic functions of FTAG fields and placement tables.
//!
//! Grounded on `datastream.c`'s `genrpath` and `open_current_obj` (the pod/cap/scatter hash
//! lookups plus `hash_rangevalue` for the erasure offset `O`).

use siphasher::sip::SipHasher13;
use std::hash::{Hash, Hasher};

use crate::ftag::{Ftag, Protection};

/// A read-only view over an already-built placement list (pod, cap, or scatter node names).
/// Building the list from topology configuration is out of scope; this type only resolves a
/// name to a position within it.
#[derive(Debug, Clone, Copy)]
pub struct PlacementTable<'a> {
    names: &'a [String],
}

impl<'a> PlacementTable<'a> {
    pub fn new(names: &'a [String]) -> Self {
        PlacementTable { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Deterministically resolves `name` to an index into this table.
    pub fn hash_lookup(&self, name: &str) -> usize {
        hash_lookup(self.names, name)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }
}

/// Deterministic index of `name` into `table`, stable across processes (no `RandomState`/ASLR
/// dependence, unlike `std::hash::Hash` with the default hasher).
pub fn hash_lookup(table: &[String], name: &str) -> usize {
    assert!(!table.is_empty(), "placement table must not be empty");
    (stable_hash(name) % table.len() as u64) as usize
}

/// Deterministic value in `[0, n)` derived from `name`, used for the erasure offset `O`.
pub fn rangehash(name: &str, n: u32) -> u32 {
    assert!(n > 0, "rangehash modulus must be positive");
    (stable_hash(name) % n as u64) as u32
}

fn stable_hash(s: &str) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    s.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic reference-tree path for the file described by `ftag`, resolved through
/// `refdir_table` (a name → directory mapping, already built).
pub fn ref_path(ftag: &Ftag, refdir_table: &PlacementTable<'_>) -> String {
    let name = ref_name(ftag);
    let idx = refdir_table.hash_lookup(&name);
    let dir = refdir_table
        .get(idx)
        .expect("hash_lookup index is always within bounds");
    format!("{dir}/{name}")
}

/// The bare reference-file name (not yet joined to a directory), deterministic in
/// `(ctag, streamid, fileno)`.
pub fn ref_name(ftag: &Ftag) -> String {
    format!("{}.{}.{}", ftag.ctag, ftag.streamid, ftag.fileno)
}

/// Deterministic object name for the object starting at `(objno, offset)` within the stream
/// identified by `ftag`.
pub fn object_name(ftag: &Ftag, objno: u64, offset: u64) -> String {
    format!("{}.{}.{}.{}", ftag.ctag, ftag.streamid, objno, offset)
}

/// Resolved placement location for an object: pod/cap/scatter indices plus the erasure offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLocation {
    pub pod: usize,
    pub cap: usize,
    pub scatter: usize,
    pub o: u32,
}

/// Resolves `objname` to a placement location via three independent table hashes plus a range
/// hash for `O`. Deterministic: the same object name always resolves to the same location,
/// which is what makes a post-crash rebuild-from-objects-alone (no surviving metadata) possible.
pub fn object_location(
    objname: &str,
    protection: Protection,
    pods: &PlacementTable<'_>,
    caps: &PlacementTable<'_>,
    scatters: &PlacementTable<'_>,
) -> ObjectLocation {
    ObjectLocation {
        pod: pods.hash_lookup(objname),
        cap: caps.hash_lookup(objname),
        scatter: scatters.hash_lookup(objname),
        o: rangehash(objname, protection.n + protection.e),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ftag::{DataState, FtagFlags, FtagState};

    fn sample_ftag() -> Ftag {
        Ftag {
            major_version: 0,
            minor_version: 1,
            ctag: "client-a".to_string(),
            streamid: "repo#ns.1234".to_string(),
            objfiles: 3,
            objsize: 65536,
            fileno: 5,
            objno: 1,
            offset: 0,
            endofstream: false,
            protection: Protection {
                n: 10,
                e: 2,
                o: 0,
                partsz: 1024,
            },
            bytes: 0,
            availbytes: 0,
            recoverybytes: 0,
            state: FtagState::new(DataState::Init, FtagFlags::empty()),
        }
    }

    #[test]
    fn ref_path_is_deterministic() {
        let ftag = sample_ftag();
        let dirs = vec!["d0".to_string(), "d1".to_string(), "d2".to_string()];
        let table = PlacementTable::new(&dirs);
        let a = ref_path(&ftag, &table);
        let b = ref_path(&ftag, &table);
        assert_eq!(a, b);
        assert!(dirs.iter().any(|d| a.starts_with(d.as_str())));
    }

    #[test]
    fn ref_path_differs_by_fileno() {
        let mut ftag = sample_ftag();
        let dirs = vec!["d0".to_string(), "d1".to_string(), "d2".to_string(), "d3".to_string()];
        let table = PlacementTable::new(&dirs);
        let a = ref_path(&ftag, &table);
        ftag.fileno += 1;
        let b = ref_path(&ftag, &table);
        assert_ne!(a, b);
    }

    #[test]
    fn object_location_is_deterministic_and_in_range() {
        let ftag = sample_ftag();
        let name = object_name(&ftag, ftag.objno, ftag.offset);
        let pods = vec!["p0".to_string(), "p1".to_string()];
        let caps = vec!["c0".to_string(), "c1".to_string(), "c2".to_string()];
        let scatters = vec!["s0".to_string()];
        let pod_table = PlacementTable::new(&pods);
        let cap_table = PlacementTable::new(&caps);
        let scatter_table = PlacementTable::new(&scatters);

        let a = object_location(&name, ftag.protection, &pod_table, &cap_table, &scatter_table);
        let b = object_location(&name, ftag.protection, &pod_table, &cap_table, &scatter_table);
        assert_eq!(a, b);
        assert!(a.pod < pods.len());
        assert!(a.cap < caps.len());
        assert!(a.scatter < scatters.len());
        assert!(a.o < ftag.protection.n + ftag.protection.e);
    }

    #[test]
    fn rangehash_stays_within_bounds_for_many_names() {
        for i in 0..100u32 {
            let name = format!("obj-{i}");
            let v = rangehash(&name, 12);
            assert!(v < 12);
        }
    }
}
