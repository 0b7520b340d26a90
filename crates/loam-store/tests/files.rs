use std::fs::{self, OpenOptions};
use std::io::Write;

use loam_store::{FrameLog, SnapshotFile};

#[test]
fn snapshot_missing_then_written() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = SnapshotFile::new(dir.path().join("db.bson"));
    assert_eq!(snapshot.read().unwrap(), None);
    snapshot.write(b"catalog").unwrap();
    assert_eq!(snapshot.read().unwrap(), Some(b"catalog".to_vec()));
}

#[test]
fn log_replays_appended_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.log");
    {
        let (mut log, frames) = FrameLog::open(&path).unwrap();
        assert!(frames.is_empty());
        log.append(b"one").unwrap();
        log.append(b"two").unwrap();
        assert_eq!(log.frames(), 2);
    }
    let (log, frames) = FrameLog::open(&path).unwrap();
    assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    assert_eq!(log.frames(), 2);
}

#[test]
fn torn_tail_is_truncated_and_appends_continue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.log");
    {
        let (mut log, _) = FrameLog::open(&path).unwrap();
        log.append(b"kept").unwrap();
    }
    let intact = fs::metadata(&path).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[9, 0, 0, 0, 1, 2]).unwrap();
    }

    let (mut log, frames) = FrameLog::open(&path).unwrap();
    assert_eq!(frames, vec![b"kept".to_vec()]);
    assert_eq!(fs::metadata(&path).unwrap().len(), intact);
    log.append(b"next").unwrap();
    drop(log);

    let (_, frames) = FrameLog::open(&path).unwrap();
    assert_eq!(frames, vec![b"kept".to_vec(), b"next".to_vec()]);
}

#[test]
fn rewrite_compacts_to_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.log");
    let (mut log, _) = FrameLog::open(&path).unwrap();
    for i in 0..5u8 {
        log.append(&[i]).unwrap();
    }
    log.rewrite(b"full").unwrap();
    assert_eq!(log.frames(), 1);
    log.append(b"delta").unwrap();
    drop(log);

    let (_, frames) = FrameLog::open(&path).unwrap();
    assert_eq!(frames, vec![b"full".to_vec(), b"delta".to_vec()]);
}

#[test]
fn stray_bytes_on_open_log_are_cut_before_append() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.log");
    let (mut log, _) = FrameLog::open(&path).unwrap();
    log.append(b"first").unwrap();

    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xde, 0xad, 0xbe]).unwrap();
    }
    log.append(b"second").unwrap();
    assert_eq!(log.frames(), 2);
    drop(log);

    let (_, frames) = FrameLog::open(&path).unwrap();
    assert_eq!(frames, vec![b"first".to_vec(), b"second".to_vec()]);
}

#[test]
fn shrunken_log_refuses_append() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.log");
    let (mut log, _) = FrameLog::open(&path).unwrap();
    log.append(b"first").unwrap();

    OpenOptions::new().write(true).open(&path).unwrap().set_len(3).unwrap();
    assert!(matches!(log.append(b"second"), Err(loam_store::StoreError::Corrupt(_))));
    assert_eq!(log.frames(), 1);
}
