use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::IteratorRandom;

use crate::entity::Entity;

/// Default shard count. Must be a power of two.
pub const DEFAULT_SHARDS: usize = 16;

/// One keyspace partition: the entity map and its companion TTL map,
/// guarded together so a TTL entry can never outlive its key.
#[derive(Default)]
struct Shard {
    data: HashMap<Vec<u8>, Entity>,
    /// Absolute expiration, milliseconds since the Unix epoch.
    ttl: HashMap<Vec<u8>, u64>,
}

impl Shard {
    fn is_expired(&self, key: &[u8], now: u64) -> bool {
        self.ttl.get(key).is_some_and(|&at| at <= now)
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        self.ttl.remove(key);
        self.data.remove(key).is_some()
    }
}

/// A concurrent mapping of binary-safe key to typed entity, with lazy
/// expiration. Keys hash to a fixed set of shards; every operation holds
/// only the locks of the shards it touches, multi-shard operations
/// acquire them in ascending index order.
pub struct Keyspace {
    shards: Vec<RwLock<Shard>>,
    mask: usize,
}

impl Keyspace {
    pub fn new(shard_count: usize) -> Self {
        let count = shard_count.next_power_of_two().max(1);
        let mut shards = Vec::with_capacity(count);
        for _ in 0..count {
            shards.push(RwLock::new(Shard::default()));
        }
        Keyspace {
            shards,
            mask: count - 1,
        }
    }

    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write(key);
        hasher.finish() as usize & self.mask
    }

    fn shard(&self, key: &[u8]) -> &RwLock<Shard> {
        &self.shards[self.shard_index(key)]
    }

    /// Fetch a clone of the entity at `key`, honoring lazy expiration:
    /// a key past its deadline is removed and reported absent.
    pub fn get(&self, key: &[u8]) -> Option<Entity> {
        let now = now_millis();
        {
            let shard = self.shard(key).read().unwrap();
            if !shard.is_expired(key, now) {
                return shard.data.get(key).cloned();
            }
        }
        // Expired: upgrade to a write guard and collect it.
        let mut shard = self.shard(key).write().unwrap();
        if shard.is_expired(key, now) {
            shard.remove(key);
        }
        None
    }

    /// Like `get`, without cloning the payload.
    pub fn contains(&self, key: &[u8]) -> bool {
        let now = now_millis();
        {
            let shard = self.shard(key).read().unwrap();
            if !shard.is_expired(key, now) {
                return shard.data.contains_key(key);
            }
        }
        let mut shard = self.shard(key).write().unwrap();
        if shard.is_expired(key, now) {
            shard.remove(key);
        }
        false
    }

    /// The discriminator of the entity at `key`, if present.
    pub fn type_name(&self, key: &[u8]) -> Option<&'static str> {
        let now = now_millis();
        {
            let shard = self.shard(key).read().unwrap();
            if !shard.is_expired(key, now) {
                return shard.data.get(key).map(Entity::type_name);
            }
        }
        let mut shard = self.shard(key).write().unwrap();
        if shard.is_expired(key, now) {
            shard.remove(key);
        }
        None
    }

    /// Insert or overwrite. Any TTL already on `key` is left untouched;
    /// callers that semantically reset the key call [`Keyspace::persist`]
    /// first.
    pub fn put(&self, key: Vec<u8>, entity: Entity) {
        let mut shard = self.shard(&key).write().unwrap();
        shard.data.insert(key, entity);
    }

    /// Remove the entity and any TTL entry. Returns whether a key existed.
    pub fn remove(&self, key: &[u8]) -> bool {
        let now = now_millis();
        let mut shard = self.shard(key).write().unwrap();
        if shard.is_expired(key, now) {
            shard.remove(key);
            return false;
        }
        shard.remove(key)
    }

    /// Atomic batch removal: all touched shard locks are held (in
    /// ascending index order) for the duration. Returns the number of
    /// keys actually removed.
    pub fn remove_many(&self, keys: &[Vec<u8>]) -> usize {
        let now = now_millis();
        let mut by_shard: Vec<Vec<&[u8]>> = vec![Vec::new(); self.shards.len()];
        for key in keys {
            by_shard[self.shard_index(key)].push(key);
        }

        let mut guards = Vec::new();
        for (index, shard_keys) in by_shard.iter().enumerate() {
            if !shard_keys.is_empty() {
                guards.push((index, self.shards[index].write().unwrap()));
            }
        }

        let mut removed = 0;
        for (index, guard) in &mut guards {
            for key in &by_shard[*index] {
                if guard.is_expired(key, now) {
                    guard.remove(key);
                } else if guard.remove(key) {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Set the absolute expiration for `key`. Returns false (and stores
    /// nothing) if the key does not exist; TTL entries never dangle.
    pub fn expire(&self, key: &[u8], at_millis: u64) -> bool {
        let mut shard = self.shard(key).write().unwrap();
        if !shard.data.contains_key(key) {
            return false;
        }
        shard.ttl.insert(key.to_vec(), at_millis);
        true
    }

    /// Drop any TTL on `key`. Returns whether one was present.
    pub fn persist(&self, key: &[u8]) -> bool {
        let mut shard = self.shard(key).write().unwrap();
        shard.ttl.remove(key).is_some()
    }

    /// The raw expiration instant for `key`, if one is set.
    pub fn ttl(&self, key: &[u8]) -> Option<u64> {
        self.shard(key).read().unwrap().ttl.get(key).copied()
    }

    /// Snapshot iteration. `visit` returns false to stop early. Entries
    /// created or removed concurrently may or may not be seen; expired
    /// entries are skipped but not collected here.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&[u8], &Entity) -> bool,
    {
        let now = now_millis();
        for lock in &self.shards {
            let shard = lock.read().unwrap();
            for (key, entity) in &shard.data {
                if shard.is_expired(key, now) {
                    continue;
                }
                if !visit(key, entity) {
                    return;
                }
            }
        }
    }

    /// Clear every shard. Locks are taken in ascending order and all held
    /// until the wipe completes, so no reader observes a partial flush.
    pub fn flush(&self) {
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.write().unwrap()).collect();
        for shard in &mut guards {
            shard.data.clear();
            shard.ttl.clear();
        }
    }

    /// Number of stored keys, counting entries not yet lazily collected.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One active-expiration tick: sample up to `samples` TTL-bearing
    /// keys per shard and evict those past due. Work is bounded per call.
    pub fn active_expire(&self, samples: usize) -> usize {
        let now = now_millis();
        let mut rng = rand::thread_rng();
        let mut evicted = 0;
        for lock in &self.shards {
            let mut shard = lock.write().unwrap();
            let due: Vec<Vec<u8>> = shard
                .ttl
                .iter()
                .choose_multiple(&mut rng, samples)
                .into_iter()
                .filter(|(_, at)| **at <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in due {
                shard.remove(&key);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the Unix epoch")
        .as_millis() as u64
}
