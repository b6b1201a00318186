//! Provider-side table of open files.
//!
//! Providers that don't want to invent their own handle encoding can
//! keep their nodes and open descriptors in a [ContextArena], which
//! assigns the two identities of a [FileContext].

use crate::error::{FsError, FsResult};
use multimap::MultiMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use userfs_types::{DescriptorHandle, FileContext, NodeHandle};

/// Keeps track of nodes and of the descriptors open on them.
pub struct ContextArena<N, D> {
    state: Mutex<ArenaState<N, D>>,
}

struct ArenaState<N, D> {
    nodes: BTreeMap<u64, Arc<N>>,
    descriptors: BTreeMap<u64, (NodeHandle, Arc<D>)>,
    by_node: MultiMap<NodeHandle, u64>,
}

impl<N, D> Default for ContextArena<N, D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Next free key. Keys start at 1, so that no context is null.
fn next_key<V>(map: &BTreeMap<u64, V>) -> u64 {
    map.last_key_value().map(|(k, _)| *k + 1).unwrap_or(1)
}

impl<N, D> ContextArena<N, D> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ArenaState {
                nodes: BTreeMap::new(),
                descriptors: BTreeMap::new(),
                by_node: MultiMap::new(),
            }),
        }
    }

    /// Add a node, returning its handle.
    pub fn add_node(&self, node: N) -> NodeHandle {
        let mut this = self.state.lock();
        let key = next_key(&this.nodes);
        this.nodes.insert(key, Arc::new(node));

        NodeHandle(key)
    }

    pub fn node(&self, node: NodeHandle) -> Option<Arc<N>> {
        self.state.lock().nodes.get(&node.0).map(Arc::clone)
    }

    /// Open a descriptor on `node`, returning the context to give to
    /// the host.
    pub fn open(&self, node: NodeHandle, descriptor: D) -> FsResult<FileContext> {
        let mut this = self.state.lock();
        if !this.nodes.contains_key(&node.0) {
            return Err(FsError::InvalidHandle);
        }
        let key = next_key(&this.descriptors);
        this.descriptors.insert(key, (node, Arc::new(descriptor)));
        this.by_node.insert(node, key);

        Ok(FileContext {
            node,
            descriptor: DescriptorHandle(key),
        })
    }

    /// Get the node and descriptor of a context.
    ///
    /// Fails with [FsError::InvalidHandle] if the descriptor is
    /// unknown or doesn't belong to the node.
    pub fn get(&self, context: FileContext) -> FsResult<(Arc<N>, Arc<D>)> {
        let this = self.state.lock();
        let (node, descriptor) = this
            .descriptors
            .get(&context.descriptor.0)
            .ok_or(FsError::InvalidHandle)?;
        if *node != context.node {
            return Err(FsError::InvalidHandle);
        }
        let node = this.nodes.get(&node.0).ok_or(FsError::InvalidHandle)?;

        Ok((Arc::clone(node), Arc::clone(descriptor)))
    }

    /// Gets all descriptors open on the given node.
    pub fn descriptors_of(&self, node: NodeHandle) -> Vec<Arc<D>> {
        let this = self.state.lock();

        this.by_node
            .get_vec(&node)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .flat_map(|key| this.descriptors.get(&key).map(|(_, d)| Arc::clone(d)))
            .collect()
    }

    /// Remove the descriptor of `context`.
    pub fn close(&self, context: FileContext) -> Option<Arc<D>> {
        let mut this = self.state.lock();
        let (node, descriptor) = this.descriptors.remove(&context.descriptor.0)?;
        if let Some(vec) = this.by_node.get_vec_mut(&node) {
            vec.retain(|k| *k != context.descriptor.0);
            if vec.is_empty() {
                this.by_node.remove(&node);
            }
        }

        Some(descriptor)
    }

    /// Remove a node that has no open descriptor.
    ///
    /// Returns `None` if the node is unknown or still open.
    pub fn remove_node(&self, node: NodeHandle) -> Option<Arc<N>> {
        let mut this = self.state.lock();
        if this.by_node.contains_key(&node) {
            return None;
        }

        this.nodes.remove(&node.0)
    }

    /// Number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.state.lock().descriptors.len()
    }
}
