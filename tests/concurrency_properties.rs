//! Multi-threaded properties: per-key locking plus transaction retry must
//! make read-modify-write sequences linearizable per key.

use quartzdb::{Database, Lists, Strings};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn open() -> (TempDir, Arc<Database>) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("db")).unwrap();
    (dir, db)
}

#[test]
fn concurrent_incr_loses_no_updates() {
    let (_dir, db) = open();
    let threads = 8;
    let per_thread = 25;
    let barrier = Arc::new(Barrier::new(threads));
    let mut handles = Vec::new();
    for _ in 0..threads {
        let strings = Strings::new(db.clone());
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..per_thread {
                strings.incr_by(b"counter", 1).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    let strings = Strings::new(db);
    assert_eq!(
        strings.get(b"counter").unwrap(),
        Some((threads * per_thread).to_string().into_bytes())
    );
}

#[test]
fn concurrent_lpush_keeps_every_value() {
    let (_dir, db) = open();
    let threads = 6;
    let per_thread = 20;
    let barrier = Arc::new(Barrier::new(threads));
    let mut handles = Vec::new();
    for t in 0..threads {
        let lists = Lists::new(db.clone());
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..per_thread {
                let value = format!("{}-{}", t, i).into_bytes();
                lists.lpush(b"L", &[value]).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    let lists = Lists::new(db);
    assert_eq!(lists.llen(b"L").unwrap(), (threads * per_thread) as u64);
    let values: BTreeSet<Vec<u8>> = lists.lrange(b"L", 0, -1).unwrap().into_iter().collect();
    assert_eq!(values.len(), threads * per_thread);
    for t in 0..threads {
        for i in 0..per_thread {
            assert!(values.contains(format!("{}-{}", t, i).as_bytes()));
        }
    }
}

#[test]
fn concurrent_mixed_keys_do_not_interfere() {
    let (_dir, db) = open();
    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let mut handles = Vec::new();
    for t in 0..threads {
        let strings = Strings::new(db.clone());
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let key = format!("counter-{}", t).into_bytes();
            for _ in 0..50 {
                strings.incr_by(&key, 1).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    let strings = Strings::new(db);
    for t in 0..threads {
        let key = format!("counter-{}", t).into_bytes();
        assert_eq!(strings.get(&key).unwrap(), Some(b"50".to_vec()));
    }
}
