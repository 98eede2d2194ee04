// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use cid::Cid;
use derive_builder::Builder;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::{CborStore, DAG_CBOR};
use fvm_shared::bigint::{
    bigint_ser::{BigIntDe, BigIntSer},
    BigInt,
};
use fvm_shared::clock::ChainEpoch;
use multihash_codetable::{Code::Blake2b256, MultihashDigest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{BeaconEntry, Error, TipsetKeys};

/// A block in the chain DAG.
///
/// Blocks are content-addressed: the identity of a block is the blake2b-256
/// CID of its DAG-CBOR encoding, computed once at construction time and
/// cached alongside the raw bytes.
///
/// Usage:
/// ```
/// use blocks::Block;
///
/// Block::builder()
///     .miner(0) // required
///     .build_and_validate()
///     .unwrap();
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Builder)]
#[builder(name = "BlockBuilder")]
pub struct Block {
    // CHAIN LINKING
    /// The set of parents this block was based on. Typically one, but can be
    /// several when there were multiple winning ticket-holders for an epoch.
    #[builder(default)]
    parents: TipsetKeys,

    /// The aggregate chain weight of the parent set.
    #[builder(default)]
    weight: BigInt,

    /// The period in which the block was generated.
    #[builder(default)]
    epoch: ChainEpoch,

    /// The verifiable oracle randomness used to elect this block's author.
    #[builder(default)]
    beacon_entries: Vec<BeaconEntry>,

    // MINER INFO
    /// Actor id of the miner that produced this block.
    miner: u64,

    // STATE
    /// The aggregate state root after applying the parent tipset.
    #[builder(default)]
    state_root: Cid,

    /// The root of the receipts of the messages in the parent tipset.
    #[builder(default)]
    message_receipts: Cid,

    /// The root of the messages carried by this block.
    #[builder(default)]
    messages: Cid,

    /// Block creation time, in seconds since the Unix epoch.
    #[builder(default)]
    timestamp: u64,

    // CACHE
    /// Stores the cid for the block after construction
    #[builder(default)]
    cached_cid: Cid,

    /// Stores the encoded bytes of the block
    #[builder(default)]
    cached_bytes: Vec<u8>,
}

impl Serialize for Block {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (
            &self.miner,
            &self.beacon_entries,
            &self.parents,
            BigIntSer(&self.weight),
            &self.epoch,
            &self.state_root,
            &self.message_receipts,
            &self.messages,
            &self.timestamp,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D>(deserializer: D) -> Result<Self, <D as Deserializer<'de>>::Error>
    where
        D: Deserializer<'de>,
    {
        let (
            miner,
            beacon_entries,
            parents,
            BigIntDe(weight),
            epoch,
            state_root,
            message_receipts,
            messages,
            timestamp,
        ) = Deserialize::deserialize(deserializer)?;

        Block::builder()
            .miner(miner)
            .beacon_entries(beacon_entries)
            .parents(parents)
            .weight(weight)
            .epoch(epoch)
            .state_root(state_root)
            .message_receipts(message_receipts)
            .messages(messages)
            .timestamp(timestamp)
            .build_and_validate()
            .map_err(serde::de::Error::custom)
    }
}

impl Block {
    /// Generates a [`Block`] builder as a constructor.
    pub fn builder() -> BlockBuilder {
        BlockBuilder::default()
    }

    /// Getter for the block parent set.
    pub fn parents(&self) -> &TipsetKeys {
        &self.parents
    }

    /// Getter for the aggregate parent weight.
    pub fn weight(&self) -> &BigInt {
        &self.weight
    }

    /// Getter for the block epoch.
    pub fn epoch(&self) -> ChainEpoch {
        self.epoch
    }

    /// Getter for the drand entries carried by the block.
    pub fn beacon_entries(&self) -> &[BeaconEntry] {
        &self.beacon_entries
    }

    /// Getter for the producing miner's actor id.
    pub fn miner(&self) -> u64 {
        self.miner
    }

    /// Getter for the parent state root.
    pub fn state_root(&self) -> &Cid {
        &self.state_root
    }

    /// Getter for the parent message receipts root.
    pub fn message_receipts(&self) -> &Cid {
        &self.message_receipts
    }

    /// Getter for the message root.
    pub fn messages(&self) -> &Cid {
        &self.messages
    }

    /// Getter for the block timestamp.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Getter for the block CID. The cache is initialized by
    /// `build_and_validate`, so this never recomputes.
    pub fn cid(&self) -> &Cid {
        &self.cached_cid
    }

    /// The raw DAG-CBOR encoding of this block.
    pub fn raw_data(&self) -> &[u8] {
        &self.cached_bytes
    }

    /// Loads a block from the blockstore. Returns `None` if the store does
    /// not contain the CID.
    pub fn load(store: &impl Blockstore, cid: Cid) -> anyhow::Result<Option<Block>> {
        store.get_cbor::<Block>(&cid)
    }

    /// Writes the encoded block to the blockstore under its own CID.
    pub fn persist(&self, store: &impl Blockstore) -> anyhow::Result<()> {
        store.put_keyed(self.cid(), self.raw_data())
    }

    /// Fills the cid/bytes cache with the encoded form of the block.
    fn update_cache(&mut self) -> Result<(), Error> {
        self.cached_bytes = fvm_ipld_encoding::to_vec(self)?;
        self.cached_cid = Cid::new_v1(DAG_CBOR, Blake2b256.digest(&self.cached_bytes));
        Ok(())
    }
}

impl BlockBuilder {
    pub fn build_and_validate(&self) -> Result<Block, Error> {
        let mut block = self
            .build()
            .map_err(|e| Error::InvalidTipset(e.to_string()))?;

        block.update_cache()?;
        Ok(block)
    }
}

/// Human-readable string representation of a block CID.
impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Block: {:?}", self.cid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_block_encoding() {
        let block = Block::builder()
            .miner(12)
            .epoch(3)
            .weight(BigInt::from(97u8))
            .timestamp(1_600_000_000)
            .build_and_validate()
            .unwrap();

        let bz = fvm_ipld_encoding::to_vec(&block).unwrap();
        let decoded: Block = fvm_ipld_encoding::from_slice(&bz).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.cid(), block.cid());
        assert_eq!(hex::encode(decoded.raw_data()), hex::encode(bz));
    }

    #[test]
    fn cid_changes_with_content() {
        let a = Block::builder().miner(1).build_and_validate().unwrap();
        let b = Block::builder().miner(2).build_and_validate().unwrap();
        assert_ne!(a.cid(), b.cid());
    }

    #[test]
    fn blockstore_round_trip() {
        let store = fvm_ipld_blockstore::MemoryBlockstore::default();
        let block = Block::builder()
            .miner(7)
            .epoch(42)
            .build_and_validate()
            .unwrap();
        block.persist(&store).unwrap();

        let loaded = Block::load(&store, *block.cid()).unwrap().unwrap();
        assert_eq!(loaded, block);
    }
}
