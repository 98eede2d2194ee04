// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use ahash::HashMap;
use blocks::{Tipset, TipsetKeys};
use cid::Cid;
use fvm_shared::clock::ChainEpoch;
use parking_lot::RwLock;

use super::Error;

/// TipsetMetadata is the type stored as the value in the TipIndex. It
/// contains a tipset pointing to blocks, the root cid of the chain's state
/// after applying the messages in this tipset to its parent state, and the
/// cid of the receipts for these messages.
#[derive(Clone, PartialEq, Debug)]
pub struct TipsetMetadata {
    /// Root of aggregate state after applying tipset
    pub tipset_state_root: Cid,

    /// The set of blocks that forms the tip set
    pub tipset: Arc<Tipset>,

    /// Receipts from all messages contained within this tipset
    pub tipset_receipts_root: Cid,
}

#[derive(Default)]
struct Inner {
    /// Unique lookup by tipset key.
    by_key: HashMap<TipsetKeys, TipsetMetadata>,
    /// One parent set can have multiple child tipsets across forks.
    by_parents_height: HashMap<(TipsetKeys, ChainEpoch), Vec<TipsetMetadata>>,
}

/// Tracks tipsets and their states by tipset key and by parent set and
/// height, for use by expected consensus. The index is ephemeral: it is
/// rebuilt from the datastore by `load`.
#[derive(Default)]
pub struct TipIndex {
    inner: RwLock<Inner>,
}

impl TipIndex {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds an entry to both maps. After this call the metadata can be
    /// looked up by the tipset key or by the tipset's parents and height.
    /// A second put with the same key replaces the previous entry.
    pub fn put(&self, meta: &TipsetMetadata) {
        let mut inner = self.inner.write();
        inner
            .by_key
            .insert(meta.tipset.key().clone(), meta.clone());

        let parent_key = (meta.tipset.parents().clone(), meta.tipset.epoch());
        let entries = inner.by_parents_height.entry(parent_key).or_default();
        match entries
            .iter_mut()
            .find(|m| m.tipset.key() == meta.tipset.key())
        {
            Some(existing) => *existing = meta.clone(),
            None => entries.push(meta.clone()),
        }
    }

    /// Removes the given tipset from both maps.
    pub fn del(&self, ts: &Tipset) {
        let mut inner = self.inner.write();
        inner.by_key.remove(ts.key());

        let parent_key = (ts.parents().clone(), ts.epoch());
        if let Some(entries) = inner.by_parents_height.get_mut(&parent_key) {
            entries.retain(|m| m.tipset.key() != ts.key());
            if entries.is_empty() {
                inner.by_parents_height.remove(&parent_key);
            }
        }
    }

    /// Drops every entry; used when rebuilding the index from disk.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_key.clear();
        inner.by_parents_height.clear();
    }

    fn get(&self, key: &TipsetKeys) -> Result<TipsetMetadata, Error> {
        self.inner
            .read()
            .by_key
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotIndexed(key.to_string()))
    }

    /// Returns true iff the index is tracking the tipset identified by `key`.
    pub fn has(&self, key: &TipsetKeys) -> bool {
        self.inner.read().by_key.contains_key(key)
    }

    /// Returns the tipset tracked under `key`.
    pub fn get_tipset(&self, key: &TipsetKeys) -> Result<Arc<Tipset>, Error> {
        Ok(self.get(key)?.tipset)
    }

    /// Returns the aggregate state root of the tipset identified by `key`.
    pub fn get_tipset_state_root(&self, key: &TipsetKeys) -> Result<Cid, Error> {
        Ok(self.get(key)?.tipset_state_root)
    }

    /// Returns the receipts root of the tipset identified by `key`.
    pub fn get_tipset_receipts_root(&self, key: &TipsetKeys) -> Result<Cid, Error> {
        Ok(self.get(key)?.tipset_receipts_root)
    }

    /// Returns every tracked tipset whose parents are `parent_key` at the
    /// given height.
    pub fn get_by_parents_and_height(
        &self,
        parent_key: &TipsetKeys,
        h: ChainEpoch,
    ) -> Result<Vec<TipsetMetadata>, Error> {
        self.inner
            .read()
            .by_parents_height
            .get(&(parent_key.clone(), h))
            .cloned()
            .ok_or_else(|| Error::NotIndexed(format!("{parent_key} at {h}")))
    }

    /// Returns true if any tracked tipset has parents `parent_key` at the
    /// given height.
    pub fn has_by_parents_and_height(&self, parent_key: &TipsetKeys, h: ChainEpoch) -> bool {
        self.inner
            .read()
            .by_parents_height
            .contains_key(&(parent_key.clone(), h))
    }
}
