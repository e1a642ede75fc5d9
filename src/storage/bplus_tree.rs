use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::storage::tuple::IndexKey;

/// Maximum entries per leaf and children per internal node.
pub const BTREE_FANOUT: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone)]
enum Node<V> {
    Internal {
        /// `keys.len() + 1 == children.len()`; child `i` routes keys
        /// below `keys[i]`, equal keys route right on insert so that
        /// duplicates keep arriving after their predecessors.
        keys: Vec<IndexKey>,
        children: Vec<usize>,
    },
    Leaf {
        entries: Vec<(IndexKey, V)>,
        /// Arena index of the right sibling; leaves form a chain in key
        /// order.
        next: Option<usize>,
    },
}

/// A disk-persistable ordered multimap from composite keys to values.
/// Nodes live in an arena (`Vec`), which keeps the whole tree trivially
/// serializable as one file. Deletion does not rebalance; empty leaves
/// and stale separators only ever route searches, so the tree stays
/// ordered and searchable.
#[derive(Serialize, Deserialize, Debug)]
pub struct BPlusTree<V> {
    nodes: Vec<Node<V>>,
    root: usize,
}

impl<V: Clone + Serialize + DeserializeOwned> BPlusTree<V> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::Leaf {
                entries: Vec::new(),
                next: None,
            }],
            root: 0,
        }
    }

    /// Leaf holding the first entry that could equal `key`.
    fn find_leaf_lower(&self, key: &IndexKey) -> usize {
        let mut idx = self.root;
        loop {
            match &self.nodes[idx] {
                Node::Internal { keys, children } => {
                    let pos = keys.partition_point(|k| k < key);
                    idx = children[pos];
                }
                Node::Leaf { .. } => return idx,
            }
        }
    }

    fn leftmost_leaf(&self) -> usize {
        let mut idx = self.root;
        loop {
            match &self.nodes[idx] {
                Node::Internal { children, .. } => idx = children[0],
                Node::Leaf { .. } => return idx,
            }
        }
    }

    /// Duplicates are allowed and retained in insertion order.
    pub fn insert(&mut self, key: IndexKey, value: V) {
        let mut path = Vec::new();
        let mut idx = self.root;
        loop {
            match &self.nodes[idx] {
                Node::Internal { keys, children } => {
                    let pos = keys.partition_point(|k| k <= &key);
                    path.push((idx, pos));
                    idx = children[pos];
                }
                Node::Leaf { .. } => break,
            }
        }
        if let Node::Leaf { entries, .. } = &mut self.nodes[idx] {
            let pos = entries.partition_point(|(k, _)| k <= &key);
            entries.insert(pos, (key, value));
        }

        // split back up along the descent path
        let mut child = idx;
        while let Some((separator, new_node)) = self.split_if_needed(child) {
            match path.pop() {
                Some((parent, pos)) => {
                    if let Node::Internal { keys, children } = &mut self.nodes[parent] {
                        keys.insert(pos, separator);
                        children.insert(pos + 1, new_node);
                    }
                    child = parent;
                }
                None => {
                    self.nodes.push(Node::Internal {
                        keys: vec![separator],
                        children: vec![child, new_node],
                    });
                    self.root = self.nodes.len() - 1;
                    break;
                }
            }
        }
    }

    fn split_if_needed(&mut self, idx: usize) -> Option<(IndexKey, usize)> {
        let new_idx = self.nodes.len();
        match &mut self.nodes[idx] {
            Node::Leaf { entries, next } => {
                if entries.len() <= BTREE_FANOUT {
                    return None;
                }
                let right_entries = entries.split_off(entries.len() / 2);
                let separator = right_entries[0].0.clone();
                let right = Node::Leaf {
                    entries: right_entries,
                    next: *next,
                };
                *next = Some(new_idx);
                self.nodes.push(right);
                Some((separator, new_idx))
            }
            Node::Internal { keys, children } => {
                if children.len() <= BTREE_FANOUT {
                    return None;
                }
                let mid = keys.len() / 2;
                let separator = keys[mid].clone();
                let right_keys = keys.split_off(mid + 1);
                keys.pop();
                let right_children = children.split_off(mid + 1);
                self.nodes.push(Node::Internal {
                    keys: right_keys,
                    children: right_children,
                });
                Some((separator, new_idx))
            }
        }
    }

    /// All values stored under `key`, in insertion order.
    pub fn find(&self, key: &IndexKey) -> Vec<V> {
        let mut results = Vec::new();
        let mut idx = self.find_leaf_lower(key);
        loop {
            let next = match &self.nodes[idx] {
                Node::Leaf { entries, next } => {
                    for (k, v) in entries {
                        if k == key {
                            results.push(v.clone());
                        } else if k > key {
                            return results;
                        }
                    }
                    *next
                }
                Node::Internal { .. } => return results,
            };
            match next {
                Some(n) => idx = n,
                None => return results,
            }
        }
    }

    /// Entries with `start <= key < end`, in key order; `None` bounds
    /// mean minus/plus infinity.
    pub fn find_range_entries(
        &self,
        start: Option<&IndexKey>,
        end: Option<&IndexKey>,
    ) -> Vec<(IndexKey, V)> {
        let mut results = Vec::new();
        let mut idx = match start {
            Some(key) => self.find_leaf_lower(key),
            None => self.leftmost_leaf(),
        };
        loop {
            let next = match &self.nodes[idx] {
                Node::Leaf { entries, next } => {
                    for (k, v) in entries {
                        if let Some(s) = start {
                            if k < s {
                                continue;
                            }
                        }
                        if let Some(e) = end {
                            if k >= e {
                                return results;
                            }
                        }
                        results.push((k.clone(), v.clone()));
                    }
                    *next
                }
                Node::Internal { .. } => return results,
            };
            match next {
                Some(n) => idx = n,
                None => return results,
            }
        }
    }

    pub fn find_range(&self, start: Option<&IndexKey>, end: Option<&IndexKey>) -> Vec<V> {
        self.find_range_entries(start, end)
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    /// Removes every entry stored under `key`.
    pub fn delete(&mut self, key: &IndexKey) {
        let mut idx = self.find_leaf_lower(key);
        loop {
            let (past_key, next) = match &mut self.nodes[idx] {
                Node::Leaf { entries, next } => {
                    entries.retain(|(k, _)| k != key);
                    (entries.iter().any(|(k, _)| k > key), *next)
                }
                Node::Internal { .. } => return,
            };
            if past_key {
                return;
            }
            match next {
                Some(n) => idx = n,
                None => return,
            }
        }
    }
}

impl<V: Clone + PartialEq + Serialize + DeserializeOwned> BPlusTree<V> {
    /// Removes one `(key, value)` entry. Returns whether one was found.
    pub fn delete_entry(&mut self, key: &IndexKey, value: &V) -> bool {
        let mut idx = self.find_leaf_lower(key);
        loop {
            let (done, next) = match &mut self.nodes[idx] {
                Node::Leaf { entries, next } => {
                    if let Some(pos) = entries.iter().position(|(k, v)| k == key && v == value) {
                        entries.remove(pos);
                        return true;
                    }
                    (entries.iter().any(|(k, _)| k > key), *next)
                }
                Node::Internal { .. } => return false,
            };
            if done {
                return false;
            }
            match next {
                Some(n) => idx = n,
                None => return false,
            }
        }
    }

    /// Removes every entry whose value equals `value`, whatever its key,
    /// returning the removed pairs. Index updates use this because the
    /// old index key of a relocated tuple is not known to the caller.
    pub fn remove_by_value(&mut self, value: &V) -> Vec<(IndexKey, V)> {
        let mut removed = Vec::new();
        let mut idx = self.leftmost_leaf();
        loop {
            let next = match &mut self.nodes[idx] {
                Node::Leaf { entries, next } => {
                    let mut kept = Vec::with_capacity(entries.len());
                    for entry in entries.drain(..) {
                        if &entry.1 == value {
                            removed.push(entry);
                        } else {
                            kept.push(entry);
                        }
                    }
                    *entries = kept;
                    *next
                }
                Node::Internal { .. } => break,
            };
            match next {
                Some(n) => idx = n,
                None => break,
            }
        }
        removed
    }
}

impl<V: Clone + Serialize + DeserializeOwned> BPlusTree<V> {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> DbResult<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| DbError::BPlusTree(format!("cannot serialize tree: {}", e)))?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        let tree: Self = bincode::deserialize(&bytes)
            .map_err(|e| DbError::BPlusTree(format!("corrupted tree file: {}", e)))?;
        if tree.root >= tree.nodes.len() {
            return Err(DbError::BPlusTree("root out of bounds".to_string()));
        }
        Ok(tree)
    }
}
