use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::Hasher;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A pool of latches hashed by key, used by the dispatcher to make each
/// command atomic over its key set. Keys map to slots; a command latches
/// every slot its keys land in (write mode if any of those keys is
/// written, read mode otherwise), always in ascending slot order, which
/// makes concurrent multi-key commands deadlock-free.
pub struct Locker {
    slots: Vec<RwLock<()>>,
    mask: usize,
}

/// Latches held for one command. Dropping releases everything.
pub struct KeyGuards<'a> {
    #[allow(dead_code)]
    guards: Vec<SlotGuard<'a>>,
}

enum SlotGuard<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

impl Locker {
    pub fn new(slot_count: usize) -> Self {
        let count = slot_count.next_power_of_two().max(1);
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(RwLock::new(()));
        }
        Locker {
            slots,
            mask: count - 1,
        }
    }

    fn slot(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write(key);
        hasher.finish() as usize & self.mask
    }

    /// Latch the union of `write_keys` and `read_keys`. A slot claimed by
    /// both sets is taken in write mode.
    pub async fn lock(&self, write_keys: &[Vec<u8>], read_keys: &[Vec<u8>]) -> KeyGuards<'_> {
        // slot -> needs write. BTreeMap gives the deduped ascending order.
        let mut wanted: BTreeMap<usize, bool> = BTreeMap::new();
        for key in read_keys {
            wanted.entry(self.slot(key)).or_insert(false);
        }
        for key in write_keys {
            wanted.insert(self.slot(key), true);
        }

        let mut guards = Vec::with_capacity(wanted.len());
        for (slot, write) in wanted {
            if write {
                guards.push(SlotGuard::Write(self.slots[slot].write().await));
            } else {
                guards.push(SlotGuard::Read(self.slots[slot].read().await));
            }
        }
        KeyGuards { guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn same_key_in_both_sets_is_latched_once() {
        let locker = Locker::new(16);
        // Would deadlock if the slot were latched twice.
        let _guards = locker
            .lock(&[b"k".to_vec()], &[b"k".to_vec(), b"k".to_vec()])
            .await;
    }

    #[tokio::test]
    async fn readers_do_not_exclude_each_other() {
        let locker = Arc::new(Locker::new(16));
        let _first = locker.lock(&[], &[b"k".to_vec()]).await;
        let second = Arc::clone(&locker);
        let acquired = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            async move {
                let _guards = second.lock(&[], &[b"k".to_vec()]).await;
            },
        )
        .await;
        assert!(acquired.is_ok(), "concurrent readers must not block");
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let locker = Arc::new(Locker::new(16));
        let held = locker.lock(&[b"k".to_vec()], &[]).await;
        let contender = Arc::clone(&locker);
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            async move {
                let _guards = contender.lock(&[], &[b"k".to_vec()]).await;
            },
        )
        .await;
        assert!(blocked.is_err(), "reader must wait for the writer");
        drop(held);
    }

    #[tokio::test]
    async fn interleaved_multi_key_commands_make_progress() {
        // Two tasks latching the same pair of keys in opposite argument
        // order; canonical slot ordering prevents deadlock.
        let locker = Arc::new(Locker::new(16));
        let a = Arc::clone(&locker);
        let b = Arc::clone(&locker);
        let t1 = tokio::spawn(async move {
            for _ in 0..100 {
                let _g = a.lock(&[b"x".to_vec(), b"y".to_vec()], &[]).await;
            }
        });
        let t2 = tokio::spawn(async move {
            for _ in 0..100 {
                let _g = b.lock(&[b"y".to_vec(), b"x".to_vec()], &[]).await;
            }
        });
        let done = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            t1.await.unwrap();
            t2.await.unwrap();
        })
        .await;
        assert!(done.is_ok(), "lock ordering must prevent deadlock");
    }
}
