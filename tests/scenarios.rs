//! End-to-end scenarios driven against the in-memory mock backends, covering packing,
//! striping, extend-then-resume, degraded close, reference collisions, and truncate.

use marfs_datastream::backend::mock::{MockMdal, MockNe};
use marfs_datastream::{
    mint_streamid, read_rebuild_tag, recovery_state, DataScheme, Namespace, OpenKind,
    PlacementLists, Position, Protection, RecoveryState, Stream, Whence,
};

fn namespace() -> Namespace {
    Namespace {
        repo: "repo1".to_string(),
        path: "/proj".to_string(),
    }
}

fn placement() -> PlacementLists {
    PlacementLists {
        pods: vec!["pod0".to_string()],
        caps: vec!["cap0".to_string()],
        scatters: vec!["scatter0".to_string()],
        refdirs: vec!["refdir0".to_string(), "refdir1".to_string()],
    }
}

fn protection() -> Protection {
    Protection {
        n: 10,
        e: 2,
        o: 0,
        partsz: 1024,
    }
}

fn packing_scheme() -> DataScheme {
    DataScheme {
        objfiles: 3,
        objsize: 0,
        protection: protection(),
        recoveryheaderlen: 16,
        recoverybytes: 32,
    }
}

fn striping_scheme(dataperobj: u64) -> DataScheme {
    DataScheme {
        objfiles: 0,
        objsize: 16 + 32 + dataperobj,
        protection: protection(),
        recoveryheaderlen: 16,
        recoverybytes: 32,
    }
}

fn position(scheme: DataScheme) -> Position {
    Position {
        namespace: namespace(),
        scheme,
        placement: placement(),
    }
}

fn read_ftag(mdal: &MockMdal, path: &str) -> marfs_datastream::Ftag {
    let h = mdal.open(&(), path, false).unwrap();
    let bytes = mdal.fgetxattr(&h, "MARFS-FTAG").unwrap();
    marfs_datastream::Ftag::parse(std::str::from_utf8(&bytes).unwrap()).unwrap()
}

const NOW: (i64, u32) = (1_700_000_000, 0);

#[test]
fn packs_three_small_files_into_one_object() {
    let mdal = MockMdal::new();
    let ne = MockNe::new();
    let pos = position(packing_scheme());

    let mut stream = Stream::create(None, "/proj/a", 0o644, "client-a", &pos, mdal.clone(), ne.clone(), NOW).unwrap();
    assert_eq!(stream.write(b"hello").unwrap(), 5);

    let mut stream = Stream::create(Some(stream), "/proj/b", 0o644, "client-a", &pos, mdal.clone(), ne.clone(), NOW).unwrap();
    assert_eq!(stream.write(b"world!!").unwrap(), 7);

    let mut stream = Stream::create(Some(stream), "/proj/c", 0o644, "client-a", &pos, mdal.clone(), ne.clone(), NOW).unwrap();
    assert_eq!(stream.write(b"abc").unwrap(), 3);

    stream.close().unwrap();

    let fa = read_ftag(&mdal, "/proj/a");
    let fb = read_ftag(&mdal, "/proj/b");
    let fc = read_ftag(&mdal, "/proj/c");
    assert_eq!(fa.objno, 0);
    assert_eq!(fb.objno, 0);
    assert_eq!(fc.objno, 0);
    assert_eq!(fa.streamid, fb.streamid);
    assert_eq!(fb.streamid, fc.streamid);
    // Each packed sibling is fully written the moment the stream moves past it, so all three
    // reach COMPLETE even though only the last is finalized by `close` itself.
    for ftag in [&fa, &fb, &fc] {
        assert_eq!(ftag.state.data_state, marfs_datastream::DataState::Complete);
        assert!(ftag.state.flags.contains(marfs_datastream::FtagFlags::READABLE));
    }

    let streamid = mint_streamid(&namespace(), NOW);
    let objname = format!("client-a.{streamid}.0.16");
    let bytes = ne.object_bytes(&objname).expect("packed object exists");
    // header(16) + 5 + trailer(32) + 7 + trailer(32) + 3 + trailer(32)
    assert_eq!(bytes.len(), 16 + 5 + 32 + 7 + 32 + 3 + 32);
}

#[test]
fn stripes_one_large_file_across_three_objects() {
    let mdal = MockMdal::new();
    let ne = MockNe::new();
    let dataperobj = 8000u64;
    let pos = position(striping_scheme(dataperobj));

    let mut stream = Stream::create(None, "/proj/big", 0o644, "client-a", &pos, mdal.clone(), ne.clone(), NOW).unwrap();
    let payload = vec![7u8; 20000];
    assert_eq!(stream.write(&payload).unwrap(), 20000);
    stream.close().unwrap();

    let streamid = mint_streamid(&namespace(), NOW);
    let obj0 = format!("client-a.{streamid}.0.16");
    let obj1 = format!("client-a.{streamid}.1.16");
    let obj2 = format!("client-a.{streamid}.2.16");

    let b0 = ne.object_bytes(&obj0).expect("object 0 exists");
    let b1 = ne.object_bytes(&obj1).expect("object 1 exists");
    let b2 = ne.object_bytes(&obj2).expect("object 2 exists");
    assert_eq!(b0.len(), (16 + dataperobj + 32) as usize);
    assert_eq!(b1.len(), (16 + dataperobj + 32) as usize);
    assert_eq!(b2.len(), 16 + 4000 + 32);

    let ftag = read_ftag(&mdal, "/proj/big");
    assert_eq!(ftag.bytes, 20000);
    assert_eq!(ftag.availbytes, 20000);
    assert_eq!(ftag.state.data_state, marfs_datastream::DataState::Complete);
}

#[test]
fn extends_then_resumes_a_partial_write() {
    let mdal = MockMdal::new();
    let ne = MockNe::new();
    let pos = position(packing_scheme());

    let mut stream = Stream::create(None, "/proj/partial", 0o644, "client-a", &pos, mdal.clone(), ne.clone(), NOW).unwrap();
    stream.extend(100).unwrap();
    assert_eq!(stream.write(&[1u8; 40]).unwrap(), 40);
    stream.release().unwrap();

    let after_release = read_ftag(&mdal, "/proj/partial");
    assert_eq!(after_release.state.data_state, marfs_datastream::DataState::Sized);
    assert!(after_release.state.flags.contains(marfs_datastream::FtagFlags::WRITEABLE));
    assert_eq!(after_release.bytes, 100);
    assert_eq!(after_release.availbytes, 100);

    let mut stream = Stream::open(None, OpenKind::Edit, "/proj/partial", &pos, mdal.clone(), ne.clone()).unwrap();
    stream.seek(40, Whence::Start).unwrap();
    assert_eq!(stream.write(&[2u8; 60]).unwrap(), 60);
    stream.close().unwrap();

    let final_ftag = read_ftag(&mdal, "/proj/partial");
    assert_eq!(final_ftag.bytes, 100);
    assert_eq!(final_ftag.availbytes, 100);
    assert_eq!(final_ftag.state.data_state, marfs_datastream::DataState::Complete);
    assert!(final_ftag.state.flags.contains(marfs_datastream::FtagFlags::READABLE));
    assert_eq!(recovery_state(&final_ftag), RecoveryState::Durable);

    // Read back the full 100 bytes and confirm both halves survived intact.
    let mut read_stream = Stream::open(None, OpenKind::Read, "/proj/partial", &pos, mdal.clone(), ne.clone()).unwrap();
    let mut buf = vec![0u8; 100];
    let mut total = 0;
    while total < buf.len() {
        let n = read_stream.read(&mut buf[total..]).unwrap();
        if n == 0 {
            break;
        }
        total += n;
    }
    assert_eq!(total, 100);
    assert!(buf[..40].iter().all(|&b| b == 1));
    assert!(buf[40..].iter().all(|&b| b == 2));
    read_stream.release().unwrap();
}

#[test]
fn degraded_close_attaches_a_rebuild_tag() {
    let mdal = MockMdal::new();
    let ne = MockNe::new();
    let pos = position(packing_scheme());

    let streamid = mint_streamid(&namespace(), NOW);
    let objname = format!("client-a.{streamid}.0.16");
    ne.mark_degraded(&objname);

    let mut stream = Stream::create(None, "/proj/degraded", 0o644, "client-a", &pos, mdal.clone(), ne.clone(), NOW).unwrap();
    stream.write(b"some data").unwrap();
    stream.close().unwrap();

    let handle = mdal.open(&(), "/proj/degraded", false).unwrap();
    let tag = read_rebuild_tag(&mdal, &handle).unwrap().expect("rebuild tag attached");
    assert_eq!(tag.degraded_stripes, vec![0]);
}

#[test]
fn reference_collision_on_create_reports_busy_with_nothing_orphaned() {
    let mdal = MockMdal::new();
    let ne = MockNe::new();
    let pos = position(packing_scheme());

    // Same ctag/namespace/time mints an identical streamid, so both streams' first file
    // collides on the very same deterministic reference path.
    let _first = Stream::create(None, "/proj/x", 0o644, "client-a", &pos, mdal.clone(), ne.clone(), NOW).unwrap();
    let err = Stream::create(None, "/proj/y", 0o644, "client-a", &pos, mdal.clone(), ne.clone(), NOW).unwrap_err();
    assert!(matches!(err, marfs_datastream::DatastreamError::Busy));
    assert!(!mdal.exists("/proj/y"));
}

#[test]
fn truncate_shrinks_a_completed_file_reopened_for_edit() {
    let mdal = MockMdal::new();
    let ne = MockNe::new();
    let pos = position(packing_scheme());

    let mut stream = Stream::create(None, "/proj/shrink", 0o644, "client-a", &pos, mdal.clone(), ne.clone(), NOW).unwrap();
    stream.write(b"0123456789").unwrap();
    stream.close().unwrap();

    let mut stream = Stream::open(None, OpenKind::Edit, "/proj/shrink", &pos, mdal.clone(), ne.clone()).unwrap();
    stream.truncate(4).unwrap();
    stream.release().unwrap();

    let ftag = read_ftag(&mdal, "/proj/shrink");
    assert_eq!(ftag.bytes, 10);
    assert_eq!(ftag.availbytes, 4);
    assert_eq!(ftag.state.data_state, marfs_datastream::DataState::Complete);
}
