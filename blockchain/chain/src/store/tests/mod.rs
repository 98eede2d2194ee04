// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Deterministic chain fixtures shared by the store tests.

use std::sync::Arc;

use blocks::{BeaconEntry, Block, Tipset, TipsetKeys};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::DAG_CBOR;
use fvm_shared::bigint::BigInt;
use fvm_shared::clock::ChainEpoch;
use multihash_codetable::{Code::Blake2b256, MultihashDigest};

use super::TipsetMetadata;

pub(crate) fn template_cid(data: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Blake2b256.digest(data))
}

fn build_block(
    db: &impl Blockstore,
    parents: &TipsetKeys,
    epoch: ChainEpoch,
    miner: u64,
    beacon_entries: Vec<BeaconEntry>,
) -> Block {
    // All blocks of one tipset share parent-derived roots, as the real
    // chain would.
    let state_root = template_cid(format!("state-{parents}-{epoch}").as_bytes());
    let receipts_root = template_cid(format!("receipts-{parents}-{epoch}").as_bytes());
    let block = Block::builder()
        .miner(miner)
        .epoch(epoch)
        .parents(parents.clone())
        .weight(BigInt::from(epoch))
        .state_root(state_root)
        .message_receipts(receipts_root)
        .beacon_entries(beacon_entries)
        .build_and_validate()
        .unwrap();
    block.persist(db).unwrap();
    block
}

/// A single-block genesis tipset, persisted to the blockstore.
pub(crate) fn genesis_tipset(db: &impl Blockstore) -> Arc<Tipset> {
    genesis_with_miner(db, 0)
}

/// A distinct genesis: different miner, different cid, no shared history.
pub(crate) fn genesis_with_miner(db: &impl Blockstore, miner: u64) -> Arc<Tipset> {
    let block = build_block(db, &TipsetKeys::default(), 0, miner, vec![]);
    Arc::new(Tipset::from(&block))
}

/// A child tipset of `parent` at the given epoch, one block per miner id.
pub(crate) fn child_tipset(
    db: &impl Blockstore,
    parent: &Tipset,
    epoch: ChainEpoch,
    miners: &[u64],
) -> Arc<Tipset> {
    child_tipset_with_beacon(db, parent, epoch, miners, vec![])
}

/// Like [`child_tipset`], carrying the given beacon entries in every block.
pub(crate) fn child_tipset_with_beacon(
    db: &impl Blockstore,
    parent: &Tipset,
    epoch: ChainEpoch,
    miners: &[u64],
    beacon_entries: Vec<BeaconEntry>,
) -> Arc<Tipset> {
    let blocks = miners
        .iter()
        .map(|m| build_block(db, parent.key(), epoch, *m, beacon_entries.clone()))
        .collect();
    Arc::new(Tipset::new(blocks).unwrap())
}

/// Extends `from` by `n` single-block tipsets at consecutive epochs.
/// Returns the new tipsets oldest-first.
pub(crate) fn linear_chain(
    db: &impl Blockstore,
    from: &Arc<Tipset>,
    n: ChainEpoch,
) -> Vec<Arc<Tipset>> {
    let mut chain = Vec::new();
    let mut parent = from.clone();
    for epoch in (from.epoch() + 1)..=(from.epoch() + n) {
        let ts = child_tipset(db, &parent, epoch, &[1]);
        chain.push(ts.clone());
        parent = ts;
    }
    chain
}

/// Extends `from` by single-block tipsets at exactly the given epochs,
/// leaving null rounds in between. Returns the new tipsets oldest-first.
pub(crate) fn chain_with_gaps(
    db: &impl Blockstore,
    from: &Arc<Tipset>,
    epochs: &[ChainEpoch],
) -> Vec<Arc<Tipset>> {
    let mut chain = Vec::new();
    let mut parent = from.clone();
    for &epoch in epochs {
        let ts = child_tipset(db, &parent, epoch, &[1]);
        chain.push(ts.clone());
        parent = ts;
    }
    chain
}

/// Metadata entry for a tipset, with roots derived from the tipset key.
pub(crate) fn meta_for(ts: &Arc<Tipset>) -> TipsetMetadata {
    TipsetMetadata {
        tipset_state_root: template_cid(format!("meta-state-{}", ts.key()).as_bytes()),
        tipset: ts.clone(),
        tipset_receipts_root: template_cid(format!("meta-receipts-{}", ts.key()).as_bytes()),
    }
}

/// Key projection used in walk assertions.
pub(crate) fn keys_of(tipsets: &[Arc<Tipset>]) -> Vec<TipsetKeys> {
    tipsets.iter().map(|ts| ts.key().clone()).collect()
}
