//! Keyed node registry
//!
//! One factory per node kind, owned by the bundle. The registry is the
//! only place nodes are constructed, which gives the identity guarantee
//! the validation engine relies on: two `get_or_add` calls with the same
//! path always return the same node, so dependency sets compare by
//! identity rather than by value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Builder<T> = Box<dyn Fn(String) -> Arc<T> + Send + Sync>;
type Canonicalize = Box<dyn Fn(&str) -> String + Send + Sync>;

pub struct Factory<T> {
    nodes: Mutex<HashMap<String, Arc<T>>>,
    builder: Builder<T>,
    canonicalize: Canonicalize,
}

impl<T> Factory<T> {
    pub fn new(builder: Builder<T>, canonicalize: Canonicalize) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            builder,
            canonicalize,
        }
    }

    /// Existence check without creation
    pub fn get(&self, abs_path: &str) -> Option<Arc<T>> {
        let key = (self.canonicalize)(abs_path);
        self.nodes.lock().unwrap().get(&key).cloned()
    }

    /// Return the node for this path, constructing it first if needed.
    /// Construction never loads; a fresh node starts `Unloaded`.
    pub fn get_or_add(&self, abs_path: &str) -> Arc<T> {
        let key = (self.canonicalize)(abs_path);
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(existing) = nodes.get(&key) {
            return Arc::clone(existing);
        }
        let node = (self.builder)(key.clone());
        nodes.insert(key, Arc::clone(&node));
        node
    }

    /// Remove and return the node at exactly this path
    pub fn remove(&self, abs_path: &str) -> Option<Arc<T>> {
        let key = (self.canonicalize)(abs_path);
        self.nodes.lock().unwrap().remove(&key)
    }

    /// Remove every node whose path starts with `prefix` (directory
    /// deletion). Returns the removed set so the caller can mark them
    /// absent instead of leaving dangling references in dependents.
    pub fn remove_by_key_prefix(&self, prefix: &str) -> Vec<Arc<T>> {
        let mut nodes = self.nodes.lock().unwrap();
        let keys: Vec<String> = nodes
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| nodes.remove(&k))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().unwrap().is_empty()
    }

    /// Snapshot of all registered nodes
    pub fn all(&self) -> Vec<Arc<T>> {
        self.nodes.lock().unwrap().values().cloned().collect()
    }
}
