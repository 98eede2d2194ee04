// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use blocks::{Tipset, TipsetKeys};
use cid::Cid;
use db::Store;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Error;

/// Key at which the head tipset cids are written in the datastore.
pub const HEAD_KEY: &str = "/chain/heaviestTipSet";
/// Key at which the checkpoint is written in the datastore.
pub const CHECKPOINT_KEY: &str = "/chain/checkPoint";
/// Key at which the genesis cid is written in the datastore.
pub const GENESIS_KEY: &str = "/consensus/genesisCid";

/// On-disk record mapping a tipset to its aggregated state and receipts
/// roots. The map labels are a wire-format constant shared with other
/// implementations; the receipts label keeps its historical spelling.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct TsState {
    #[serde(rename = "StateRoot")]
    state_root: Cid,
    #[serde(rename = "Reciepts")]
    receipts: Cid,
}

/// Typed access to the chain's private metadata in the key-value datastore:
/// the head pointer, the checkpoint, the genesis cid and the per-tipset
/// state root mapping. All operations are single-key and atomic.
pub struct MetadataStore<DS> {
    ds: Arc<DS>,
}

impl<DS> MetadataStore<DS>
where
    DS: Store,
{
    pub fn new(ds: Arc<DS>) -> Self {
        Self { ds }
    }

    /// Key layout for the per-tipset slot. The canonical tipset string and
    /// the decimal height must stay bit-exact to remain compatible with
    /// state written by other implementations.
    fn metadata_key(ts: &Tipset) -> String {
        format!("{}-{}", ts, ts.epoch())
    }

    /// Writes the given cid set as head to disk.
    pub fn write_head(&self, keys: &TipsetKeys) -> Result<(), Error> {
        debug!("WriteHead {}", keys);
        let val = fvm_ipld_encoding::to_vec(keys)?;
        self.ds.write(HEAD_KEY, val)?;
        Ok(())
    }

    /// Loads the latest known head key from disk. `None` on first boot.
    pub fn load_head(&self) -> Result<Option<TipsetKeys>, Error> {
        match self.ds.read(HEAD_KEY)? {
            Some(bz) => Ok(Some(fvm_ipld_encoding::from_slice(&bz)?)),
            None => Ok(None),
        }
    }

    /// Writes the given cid set as the checkpoint to disk.
    pub fn write_checkpoint(&self, keys: &TipsetKeys) -> Result<(), Error> {
        let val = fvm_ipld_encoding::to_vec(keys)?;
        self.ds.write(CHECKPOINT_KEY, val)?;
        Ok(())
    }

    /// Loads the checkpoint key from disk, if one was ever written.
    pub fn load_checkpoint(&self) -> Result<Option<TipsetKeys>, Error> {
        match self.ds.read(CHECKPOINT_KEY)? {
            Some(bz) => Ok(Some(fvm_ipld_encoding::from_slice(&bz)?)),
            None => Ok(None),
        }
    }

    /// Persists the genesis cid.
    pub fn write_genesis(&self, genesis: &Cid) -> Result<(), Error> {
        let val = fvm_ipld_encoding::to_vec(genesis)?;
        self.ds.write(GENESIS_KEY, val)?;
        Ok(())
    }

    /// Loads the genesis cid written at first start.
    pub fn load_genesis(&self) -> Result<Option<Cid>, Error> {
        match self.ds.read(GENESIS_KEY)? {
            Some(bz) => Ok(Some(fvm_ipld_encoding::from_slice(&bz)?)),
            None => Ok(None),
        }
    }

    /// Writes the tipset key and the aggregated roots to the datastore.
    /// Both roots must be defined.
    pub fn write_tipset_metadata(
        &self,
        ts: &Tipset,
        state_root: &Cid,
        receipts: &Cid,
    ) -> Result<(), Error> {
        if *state_root == Cid::default() {
            return Err(Error::UndefinedCid("state root".to_string()));
        }
        if *receipts == Cid::default() {
            return Err(Error::UndefinedCid("receipts root".to_string()));
        }

        let metadata = TsState {
            state_root: *state_root,
            receipts: *receipts,
        };
        let val = fvm_ipld_encoding::to_vec(&metadata)?;
        self.ds.write(Self::metadata_key(ts), val)?;
        Ok(())
    }

    /// Loads the aggregated `(state root, receipts root)` pair persisted for
    /// the given tipset.
    pub fn load_tipset_metadata(&self, ts: &Tipset) -> Result<(Cid, Cid), Error> {
        let key = Self::metadata_key(ts);
        let bz = self
            .ds
            .read(&key)?
            .ok_or_else(|| Error::NotFound(format!("tipset metadata {key}")))?;
        let metadata: TsState = fvm_ipld_encoding::from_slice(&bz)?;
        Ok((metadata.state_root, metadata.receipts))
    }

    /// Deletes the state root mapping for the given tipset.
    pub fn delete_tipset_metadata(&self, ts: &Tipset) -> Result<(), Error> {
        self.ds.delete(Self::metadata_key(ts))?;
        Ok(())
    }
}
