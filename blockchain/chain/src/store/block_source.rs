// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use blocks::{Block, Tipset, TipsetKeys};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;

use super::Error;

/// Seam trait for resolving a tipset from its key. The chain index walks
/// ancestors through this trait rather than a concrete store so the walk can
/// be exercised against any block space.
pub trait TipsetLoader {
    fn load_tipset(&self, keys: &TipsetKeys) -> Result<Arc<Tipset>, Error>;
}

impl<L: TipsetLoader> TipsetLoader for Arc<L> {
    fn load_tipset(&self, keys: &TipsetKeys) -> Result<Arc<Tipset>, Error> {
        TipsetLoader::load_tipset(self.as_ref(), keys)
    }
}

/// Read-only facade over the content-addressed block space. It is used for
/// reading block and tipset structures kept by the node; all writes to the
/// block space happen elsewhere.
pub struct BlockSource<DB> {
    db: Arc<DB>,
}

impl<DB> Clone for BlockSource<DB> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

impl<DB> BlockSource<DB>
where
    DB: Blockstore,
{
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    /// Retrieves a block by cid from the blockstore.
    pub fn get_block(&self, cid: &Cid) -> Result<Block, Error> {
        Block::load(self.db.as_ref(), *cid)?
            .ok_or_else(|| Error::NotFound(format!("block {cid}")))
    }
}

impl<DB> TipsetLoader for BlockSource<DB>
where
    DB: Blockstore,
{
    /// Fetches every member block of `keys` and assembles the tipset. Fails
    /// if any member is missing or if the members disagree on height or
    /// parents.
    fn load_tipset(&self, keys: &TipsetKeys) -> Result<Arc<Tipset>, Error> {
        let blocks = keys
            .cids()
            .iter()
            .map(|cid| self.get_block(cid))
            .collect::<Result<Vec<_>, _>>()?;

        let ts = Tipset::new(blocks)?;
        Ok(Arc::new(ts))
    }
}
