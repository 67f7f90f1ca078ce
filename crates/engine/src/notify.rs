//! Wakeup channels for blocked readers.
//!
//! XREAD BLOCK and the blocking list pops share one registry: a map from
//! notification key to the senders of currently blocked readers. A reader
//! registers *before* its non-blocking scan, waits on its receiver with a
//! deadline, and is deregistered implicitly when the receiver drops (dead
//! senders are pruned on the next notify or register).
//!
//! Mutators notify after commit, so a woken reader's re-scan observes the
//! new data. Channels have capacity 1 and sends never block: a full
//! channel already carries a pending wakeup.

use dashmap::DashMap;
use quartz_core::error::Result;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::time::{Duration, Instant};

/// Registry of blocked readers.
#[derive(Default)]
pub struct Notifier {
    channels: DashMap<Vec<u8>, Vec<SyncSender<()>>>,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier::default()
    }

    /// Register one receiver across several notification keys.
    pub fn register(&self, keys: &[Vec<u8>]) -> Receiver<()> {
        let (tx, rx) = sync_channel(1);
        for key in keys {
            let mut entry = self.channels.entry(key.clone()).or_default();
            entry.retain(|sender: &SyncSender<()>| {
                !matches!(sender.try_send(()), Err(TrySendError::Disconnected(_)))
            });
            // The retain pass above also re-arms live waiters; that is an
            // extra wakeup, which the contract permits.
            entry.push(tx.clone());
        }
        rx
    }

    /// Wake every reader currently registered for a key.
    pub fn notify(&self, key: &[u8]) {
        if let Some(mut entry) = self.channels.get_mut(key) {
            entry.retain(
                |sender| !matches!(sender.try_send(()), Err(TrySendError::Disconnected(_))),
            );
            if entry.is_empty() {
                drop(entry);
                self.channels.remove_if(key, |_, v| v.is_empty());
            }
        }
    }

    /// Number of keys with registered readers (for tests).
    pub fn watched_keys(&self) -> usize {
        self.channels.iter().filter(|e| !e.value().is_empty()).count()
    }
}

/// Poll-and-wait loop shared by all blocking reads.
///
/// `timeout_ms == 0` waits indefinitely. Returns `None` when the deadline
/// passes without `poll` producing a value.
pub fn block_on<T>(
    notifier: &Notifier,
    keys: &[Vec<u8>],
    timeout_ms: u64,
    mut poll: impl FnMut() -> Result<Option<T>>,
) -> Result<Option<T>> {
    let deadline = if timeout_ms == 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(timeout_ms))
    };
    // Register first: a wakeup for data committed between the scan and the
    // wait must not be lost.
    let rx = notifier.register(keys);
    loop {
        if let Some(found) = poll()? {
            return Ok(Some(found));
        }
        match deadline {
            None => {
                if rx.recv().is_err() {
                    return Ok(None);
                }
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                match rx.recv_timeout(deadline - now) {
                    Ok(()) => {}
                    Err(_) => return Ok(None),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_notify_wakes_registered_reader() {
        let notifier = Arc::new(Notifier::new());
        let n2 = Arc::clone(&notifier);
        let handle = thread::spawn(move || {
            let mut polls = 0;
            block_on(&n2, &[b"k".to_vec()], 2_000, || {
                polls += 1;
                if polls >= 2 {
                    Ok(Some(polls))
                } else {
                    Ok(None)
                }
            })
        });
        thread::sleep(Duration::from_millis(50));
        notifier.notify(b"k");
        let out = handle.join().unwrap().unwrap();
        assert_eq!(out, Some(2));
    }

    #[test]
    fn test_timeout_returns_none() {
        let notifier = Notifier::new();
        let start = Instant::now();
        let out: Option<()> = block_on(&notifier, &[b"k".to_vec()], 80, || Ok(None)).unwrap();
        assert!(out.is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(80));
        assert!(elapsed < Duration::from_millis(1_000));
    }

    #[test]
    fn test_immediate_data_skips_waiting() {
        let notifier = Notifier::new();
        let start = Instant::now();
        let out = block_on(&notifier, &[b"k".to_vec()], 5_000, || Ok(Some(7))).unwrap();
        assert_eq!(out, Some(7));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_dead_readers_pruned() {
        let notifier = Notifier::new();
        {
            let _rx = notifier.register(&[b"k".to_vec()]);
        }
        notifier.notify(b"k");
        assert_eq!(notifier.watched_keys(), 0);
    }

    #[test]
    fn test_multi_key_registration() {
        let notifier = Arc::new(Notifier::new());
        let n2 = Arc::clone(&notifier);
        let handle = thread::spawn(move || {
            let mut woken = false;
            block_on(
                &n2,
                &[b"a".to_vec(), b"b".to_vec()],
                2_000,
                move || {
                    if woken {
                        Ok(Some(()))
                    } else {
                        woken = true;
                        Ok(None)
                    }
                },
            )
        });
        thread::sleep(Duration::from_millis(50));
        notifier.notify(b"b");
        assert_eq!(handle.join().unwrap().unwrap(), Some(()));
    }
}
