// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use cid::Cid;
use fvm_shared::bigint::BigInt;
use fvm_shared::clock::ChainEpoch;
use serde::{de::Deserializer, ser::Serializer, Deserialize, Serialize};

use crate::{Block, Error};

/// A set of CIDs forming a unique key for a Tipset.
///
/// The CIDs are kept sorted lexicographically by their byte representation,
/// so equal sets compare equal and render to the same canonical string. The
/// canonical string (`{cid1,cid2,...}`) doubles as part of the on-disk
/// metadata key and must stay stable across implementations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Ord, PartialOrd)]
pub struct TipsetKeys {
    cids: Vec<Cid>,
}

impl TipsetKeys {
    pub fn new(mut cids: Vec<Cid>) -> Self {
        cids.sort_unstable_by_key(|c| c.to_bytes());
        cids.dedup();
        Self { cids }
    }

    /// Returns the member block cids.
    pub fn cids(&self) -> &[Cid] {
        &self.cids
    }

    /// Returns true if this is the key of the undefined tipset.
    pub fn is_empty(&self) -> bool {
        self.cids.is_empty()
    }
}

/// Canonical string form, e.g. `{bafy...a,bafy...b}`.
impl fmt::Display for TipsetKeys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, cid) in self.cids.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{cid}")?;
        }
        write!(f, "}}")
    }
}

impl Serialize for TipsetKeys {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.cids.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TipsetKeys {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let cids: Vec<Cid> = Deserialize::deserialize(deserializer)?;
        // Re-canonicalize: persisted keys from other implementations may
        // carry the cids in block order.
        Ok(TipsetKeys::new(cids))
    }
}

/// An immutable set of blocks at the same height with the same parent set.
/// Blocks in a tipset are canonically ordered by CID.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Tipset {
    blocks: Vec<Block>,
    key: TipsetKeys,
}

#[allow(clippy::len_without_is_empty)]
impl Tipset {
    /// Builds a new Tipset from a collection of blocks.
    ///
    /// A valid tipset contains a non-empty collection of blocks with
    /// distinct CIDs that all specify identical epoch and parent set.
    pub fn new(blocks: Vec<Block>) -> Result<Self, Error> {
        if blocks.is_empty() {
            return Err(Error::NoBlocks);
        }

        let mut sorted_blocks = blocks;
        for block in &sorted_blocks[1..] {
            if block.parents() != sorted_blocks[0].parents() {
                return Err(Error::InvalidTipset("parent cids are not equal".to_string()));
            }
            if block.epoch() != sorted_blocks[0].epoch() {
                return Err(Error::InvalidTipset("epochs are not equal".to_string()));
            }
        }

        sorted_blocks.sort_unstable_by_key(|block| block.cid().to_bytes());
        for pair in sorted_blocks.windows(2) {
            if pair[0].cid() == pair[1].cid() {
                return Err(Error::InvalidTipset("duplicate block cids".to_string()));
            }
        }

        let key = TipsetKeys::new(sorted_blocks.iter().map(|b| *b.cid()).collect());
        Ok(Self {
            blocks: sorted_blocks,
            key,
        })
    }

    /// Returns the epoch of the tipset.
    pub fn epoch(&self) -> ChainEpoch {
        self.blocks[0].epoch()
    }

    /// Returns all blocks in the tipset.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Consumes the tipset, returning its blocks.
    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    /// Returns the number of blocks in the tipset.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the smallest timestamp of all blocks in the tipset.
    pub fn min_timestamp(&self) -> u64 {
        self.blocks.iter().map(Block::timestamp).min().unwrap_or(0)
    }

    /// Returns the key identifying the tipset.
    pub fn key(&self) -> &TipsetKeys {
        &self.key
    }

    /// Returns the slice of member block cids.
    pub fn cids(&self) -> &[Cid] {
        self.key.cids()
    }

    /// Returns the CIDs of the parents of the blocks in the tipset.
    pub fn parents(&self) -> &TipsetKeys {
        self.blocks[0].parents()
    }

    /// Returns the state root of the tipset's parent.
    pub fn parent_state(&self) -> &Cid {
        self.blocks[0].state_root()
    }

    /// Returns the receipts root of the tipset's parent.
    pub fn parent_receipts(&self) -> &Cid {
        self.blocks[0].message_receipts()
    }

    /// Returns the tipset's calculated weight.
    pub fn weight(&self) -> &BigInt {
        self.blocks[0].weight()
    }
}

impl From<&Block> for Tipset {
    fn from(block: &Block) -> Self {
        // A single block is always a well-formed tipset.
        Self {
            key: TipsetKeys::new(vec![*block.cid()]),
            blocks: vec![block.clone()],
        }
    }
}

/// Tipsets are rendered by their canonical key string.
impl fmt::Display for Tipset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.key.fmt(f)
    }
}
