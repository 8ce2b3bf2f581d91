use std::{collections::HashSet, hash::Hash, sync::Mutex};

use super::lock;

/// Keys observed by one `distinct` subscription. Grows without bound for the life of the subscription.
pub struct SeenSet<K: Hash + Eq>(Mutex<HashSet<K>>);

impl<K: Hash + Eq> SeenSet<K> {
    pub fn new() -> Self { Self(Mutex::new(HashSet::new())) }

    /// True the first time `key` is offered
    pub fn first_sighting(&self, key: K) -> bool { lock(&self.0).insert(key) }

    pub fn len(&self) -> usize { lock(&self.0).len() }

    pub fn is_empty(&self) -> bool { lock(&self.0).is_empty() }

    pub fn clear(&self) { lock(&self.0).clear() }
}

impl<K: Hash + Eq> Default for SeenSet<K> {
    fn default() -> Self { Self::new() }
}

impl<K: Hash + Eq + std::fmt::Debug> std::fmt::Debug for SeenSet<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "SeenSet {{ {:?} }}", lock(&self.0)) }
}
