//! Session-level behavior: cascades, exchange, listings, typed dispatch.

mod common;

use stratum::{
    dispatch, BackendSet, ListOrder, ObjectFileParser, Perm, Rendering, Request, Response,
    Session, StratumError,
};

#[test]
fn test_close_cascade_is_scoped_to_one_descriptor() {
    let mut s = common::session();
    let a = s.open("malloc://128", Perm::rw(), 0).unwrap();
    let b = s.open("malloc://128", Perm::rw(), 0).unwrap();
    s.maps.add(&s.descs, a, Perm::rw(), 0, 0x0, 128).unwrap();
    let keep = s.maps.add(&s.descs, b, Perm::rw(), 0, 0x1000, 128).unwrap();
    s.load(a, 0).unwrap();
    let kept_obj = s.load(b, 0).unwrap();

    let report = s.close(a).unwrap();
    assert_eq!(report.maps_removed, 1);
    assert_eq!(report.objects_removed, 1);
    // a was the current fd, so the selection clears and is surfaced
    assert!(report.selection_cleared);
    assert_eq!(s.current_fd(), None);

    assert_eq!(s.maps.len(), 1);
    assert_eq!(s.maps.resolve(0x1000).unwrap().id, keep);
    assert!(s.maps.resolve(0x10).is_err());
    assert_eq!(s.objects.current_id(), Some(kept_obj));
    assert!(s.descs.get(a).is_err());
    assert!(s.files().iter().all(|f| f.fd != a));
}

#[test]
fn test_exchange_preserves_map_bindings_transparently() {
    let mut s = common::session();
    let a = s.open("malloc://64", Perm::rw(), 0).unwrap();
    let b = s.open("malloc://64", Perm::rw(), 0).unwrap();
    s.descs.get_mut(a).unwrap().write_at(0, b"from-a").unwrap();
    s.descs.get_mut(b).unwrap().write_at(0, b"from-b").unwrap();
    let map_a = s.maps.add(&s.descs, a, Perm::rw(), 0, 0x1000, 64).unwrap();

    s.exchange(a, b).unwrap();
    // the map still stores fd a but now observes b's former content
    let m = s.maps.resolve_by_id(map_a).unwrap();
    assert_eq!(m.fd, a);
    let mut buf = [0u8; 6];
    s.descs.get_mut(a).unwrap().read_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"from-b");

    s.exchange(a, b).unwrap();
    s.descs.get_mut(a).unwrap().read_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"from-a");
}

#[test]
fn test_last_object_guard_through_dispatch() {
    let mut s = common::session();
    let fd = s.open("malloc://64", Perm::rw(), 0).unwrap();
    s.load(fd, 0).unwrap();
    let err = dispatch(
        &mut s,
        Request::ObjDelete {
            fd: None,
            id: None,
        },
    )
    .unwrap_err();
    assert!(matches!(err, StratumError::LastObjectGuard));
    assert_eq!(s.objects.len(), 1);
}

#[test]
fn test_script_listing_reconstructs_the_map_set() {
    let mut s = common::session();
    let fd = s.open("malloc://256", Perm::rw(), 0).unwrap();
    s.maps.add(&s.descs, fd, Perm::rw(), 0x10, 0x1000, 0x80).unwrap();
    s.maps.add(&s.descs, fd, Perm::rw(), 0x0, 0x1040, 0x80).unwrap();

    let Response::Rendered(script) = dispatch(
        &mut s,
        Request::ListFiles {
            rendering: Rendering::Script,
        },
    )
    .unwrap() else {
        panic!("expected rendered script");
    };

    // replay against a fresh session
    let mut replay = common::session();
    for line in script.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["o+", uri, "#", "fd", _] => {
                replay.open(uri, Perm::rw(), 0).unwrap();
            }
            ["om", fd, from, size, delta] => {
                let parse = |s: &str| u64::from_str_radix(s.trim_start_matches("0x"), 16).unwrap();
                let fd: u32 = fd.parse().unwrap();
                replay
                    .maps
                    .add(&replay.descs, fd, Perm::rw(), parse(delta), parse(from), parse(size))
                    .unwrap();
            }
            other => panic!("unexpected script line: {other:?}"),
        }
    }
    // same ranges, same priority order
    let original: Vec<(u64, u64, u64)> = s
        .maps
        .list(ListOrder::ByPriority)
        .iter()
        .map(|m| (m.from, m.to, m.delta))
        .collect();
    let replayed: Vec<(u64, u64, u64)> = replay
        .maps
        .list(ListOrder::ByPriority)
        .iter()
        .map(|m| (m.from, m.to, m.delta))
        .collect();
    assert_eq!(original, replayed);
    assert_eq!(
        s.maps.resolve(0x1060).unwrap().delta,
        replay.maps.resolve(0x1060).unwrap().delta
    );
}

#[test]
fn test_load_wraps_parser_failures() {
    let mut s = Session::new(BackendSet::with_defaults(), Box::new(ObjectFileParser));
    let fd = s.open("malloc://64", Perm::rw(), 0).unwrap();
    // 64 zero bytes are not a recognizable object file
    let err = s.load(fd, 0).unwrap_err();
    assert!(matches!(err, StratumError::Load { .. }));
    assert!(s.objects.is_empty());
}

#[test]
fn test_no_current_state_is_valid_and_recoverable() {
    let mut s = common::session();
    let a = s.open("malloc://64", Perm::rw(), 0).unwrap();
    let b = s.open("malloc://64", Perm::rw(), 0).unwrap();
    s.load(b, 0).unwrap();
    s.select(a).unwrap();

    let report = s.close(a).unwrap();
    assert!(report.selection_cleared);
    assert_eq!(s.current_fd(), None);

    // re-select and continue
    s.select(b).unwrap();
    assert_eq!(s.current_fd(), Some(b));
    assert!(s.objects.current().is_some());
}
