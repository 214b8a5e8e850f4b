use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// 32-bit key hash driving header, directory and bucket addressing.
pub trait HashFunction<K>: Send + Sync {
    fn hash_key(&self, key: &K) -> u32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHashFunction;

impl<K: Hash> HashFunction<K> for DefaultHashFunction {
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}

/// Uses integer keys as their own hash. Deterministic bucket placement for
/// tests that reason about directory indices bit by bit.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHashFunction;

impl HashFunction<u32> for IdentityHashFunction {
    fn hash_key(&self, key: &u32) -> u32 {
        *key
    }
}

impl HashFunction<u64> for IdentityHashFunction {
    fn hash_key(&self, key: &u64) -> u32 {
        *key as u32
    }
}

impl HashFunction<i32> for IdentityHashFunction {
    fn hash_key(&self, key: &i32) -> u32 {
        *key as u32
    }
}

impl HashFunction<i64> for IdentityHashFunction {
    fn hash_key(&self, key: &i64) -> u32 {
        *key as u32
    }
}
