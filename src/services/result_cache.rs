use std::collections::{HashMap, VecDeque};

/// Bounded key/value store: values live in an arena of slots, keys map to
/// slot indices, and the oldest insertion is evicted once full.
#[derive(Debug)]
pub(crate) struct ResultCache<V> {
    capacity: usize,
    slots: Vec<Option<(String, V)>>,
    index: HashMap<String, usize>,
    order: VecDeque<usize>,
    free: Vec<usize>,
}

impl<V: Clone> ResultCache<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn get(&self, key: &str) -> Option<V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|(_, value)| value.clone())
    }

    /// Returns the evicted key, if any.
    pub(crate) fn insert(&mut self, key: &str, value: V) -> Option<String> {
        if let Some(&slot) = self.index.get(key) {
            self.slots[slot] = Some((key.to_string(), value));
            self.order.retain(|candidate| *candidate != slot);
            self.order.push_back(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity { self.evict_oldest() } else { None };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some((key.to_string(), value));
                slot
            }
            None => {
                self.slots.push(Some((key.to_string(), value)));
                self.slots.len() - 1
            }
        };
        self.index.insert(key.to_string(), slot);
        self.order.push_back(slot);
        evicted
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.order.retain(|candidate| *candidate != slot);
        self.free.push(slot);
        self.slots[slot].take().map(|(_, value)| value)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.order.clear();
        self.free.clear();
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let slot = self.order.pop_front()?;
        let (key, _) = self.slots[slot].take()?;
        self.index.remove(&key);
        self.free.push(slot);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut cache = ResultCache::new(2);
        assert_eq!(cache.insert("a", 1), None);
        assert_eq!(cache.insert("b", 2), None);
        assert_eq!(cache.insert("c", 3), Some("a".to_string()));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overwrite_refreshes_position() {
        let mut cache = ResultCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.insert("c", 3), Some("b".to_string()));
        assert_eq!(cache.get("a"), Some(10));
    }

    #[test]
    fn removed_slots_are_reused() {
        let mut cache = ResultCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.remove("a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.slots.len(), 2);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = ResultCache::new(3);
        cache.insert("a", 1);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get("a"), None);
        cache.insert("b", 2);
        assert_eq!(cache.get("b"), Some(2));
    }
}
