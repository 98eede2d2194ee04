// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use blocks::{Tipset, TipsetKeys};
use fvm_shared::clock::ChainEpoch;
use lru::LruCache;
use parking_lot::Mutex;

use super::{Error, TipsetLoader};

/// Spacing, in epochs, between the skip pointers kept by the cache.
const SKIP_LENGTH: ChainEpoch = 20;

/// Number of skip entries kept in memory.
const DEFAULT_CHAIN_INDEX_CACHE_SIZE: usize = 8 << 10;

/// A cached skip pointer: from `tipset` the walk can jump straight to the
/// ancestor identified by `target` at `target_height`.
struct LookbackEntry {
    tipset: Arc<Tipset>,
    target_height: ChainEpoch,
    target: TipsetKeys,
}

/// Accelerates ancestor-at-height queries with a sparse cache of skip
/// pointers spaced geometrically along the chain. The linear walk along
/// `parents` remains the correctness contract; callers fall back to
/// [`ChainIndex::get_tipset_by_height_without_cache`] whenever a cached
/// answer disagrees with the requested height.
pub struct ChainIndex<L> {
    /// Cache of look-back entries to speed up lookup.
    skip_cache: Mutex<LruCache<TipsetKeys, Arc<LookbackEntry>>>,

    /// Resolves tipsets by key, straight from the block space.
    loader: L,
}

impl<L> ChainIndex<L>
where
    L: TipsetLoader,
{
    pub fn new(loader: L) -> Self {
        Self {
            skip_cache: Mutex::new(LruCache::new(DEFAULT_CHAIN_INDEX_CACHE_SIZE)),
            loader,
        }
    }

    /// Returns the ancestor of `from` at height `to`. When null rounds leave
    /// no tipset exactly at `to`, the first tipset above it is returned.
    /// Fails when `to` is greater than the height of `from`.
    pub fn get_tipset_by_height(
        &self,
        from: Arc<Tipset>,
        to: ChainEpoch,
    ) -> Result<Arc<Tipset>, Error> {
        if from.epoch() - to <= SKIP_LENGTH {
            return self.walk_back(from, to);
        }

        let rounded = self.round_down(from)?;
        let mut cur = rounded.key().clone();
        loop {
            let cached = self.skip_cache.lock().get(&cur).cloned();
            let entry = match cached {
                Some(entry) => entry,
                None => self.fill_cache(cur)?,
            };

            if entry.target_height == to {
                return self.loader.load_tipset(&entry.target);
            } else if to > entry.target_height {
                return self.walk_back(entry.tipset.clone(), to);
            }
            cur = entry.target.clone();
        }
    }

    /// The uncached linear walk. Used directly as the slow path when the
    /// cache answer lands below the requested height.
    pub fn get_tipset_by_height_without_cache(
        &self,
        from: Arc<Tipset>,
        to: ChainEpoch,
    ) -> Result<Arc<Tipset>, Error> {
        self.walk_back(from, to)
    }

    /// Loads the tipset for `key` and records a skip pointer to its ancestor
    /// one skip interval down the chain.
    fn fill_cache(&self, key: TipsetKeys) -> Result<Arc<LookbackEntry>, Error> {
        let tipset = self.loader.load_tipset(&key)?;
        if tipset.epoch() == 0 {
            return Err(Error::Other(
                "cannot fill chain index cache with genesis".to_string(),
            ));
        }

        let parent = self.loader.load_tipset(tipset.parents())?;
        let r_height = self.round_height(tipset.epoch()) - SKIP_LENGTH;

        // Null rounds can drop the parent below the rounded target already.
        let skip_target = if parent.epoch() < r_height {
            parent
        } else {
            self.walk_back(parent, r_height)?
        };

        let entry = Arc::new(LookbackEntry {
            tipset,
            target_height: skip_target.epoch(),
            target: skip_target.key().clone(),
        });
        self.skip_cache.lock().put(key, entry.clone());
        Ok(entry)
    }

    fn round_height(&self, height: ChainEpoch) -> ChainEpoch {
        (height / SKIP_LENGTH) * SKIP_LENGTH
    }

    /// Walks `from` down to the nearest multiple of the skip interval.
    fn round_down(&self, from: Arc<Tipset>) -> Result<Arc<Tipset>, Error> {
        let target = self.round_height(from.epoch());
        self.walk_back(from, target)
    }

    fn walk_back(&self, from: Arc<Tipset>, to: ChainEpoch) -> Result<Arc<Tipset>, Error> {
        if to > from.epoch() {
            return Err(Error::Other(
                "looking for tipset with height greater than start point".to_string(),
            ));
        }
        if to == from.epoch() {
            return Ok(from);
        }

        let mut ts = from;
        loop {
            let pts = self.loader.load_tipset(ts.parents())?;
            if to > pts.epoch() {
                // A null round left no tipset at the requested height;
                // return the tipset above it.
                return Ok(ts);
            }
            if to == pts.epoch() {
                return Ok(pts);
            }
            ts = pts;
        }
    }
}
