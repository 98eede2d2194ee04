// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use blocks::{BeaconEntry, Block, Tipset, TipsetKeys};
use cid::Cid;
use db::Store;
use futures::AsyncRead;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_car::load_car;
use fvm_shared::clock::ChainEpoch;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::{
    collect_tipsets_to_common_ancestor, BlockSource, ChainIndex, Error, HeadChange,
    HeadChangePublisher, MetadataStore, Reorg, ReorgNotifee, TipIndex, TipsetLoader,
    TipsetMetadata,
};

/// Capacity of the internal queue feeding the reorg notification task.
const REORG_CHANNEL_SIZE: usize = 32;

/// Number of parent tipsets indexed behind a snapshot's root on import.
/// Policy constant preserved verbatim for compatibility with existing
/// snapshots.
pub const IMPORT_LOOKBACK: usize = 900;

/// Epochs below the checkpoint that `load` keeps indexing before stopping.
const CHECKPOINT_LOOKBACK: ChainEpoch = 10;

/// Number of ancestors searched for a beacon entry before giving up.
const BEACON_LOOKBACK: usize = 20;

/// Environment switch letting dev and test networks run without a drand
/// beacon: when set to `_yes_`, a fixed entry substitutes for a missing
/// one. Production deployments leave it unset and fail closed.
const IGNORE_DRAND_VAR: &str = "VENUS_IGNORE_DRAND";

/// The chain store tracks the node's view of the block DAG: the heaviest
/// tipset, the in-memory tipset index rebuilt on startup, the per-tipset
/// metadata persisted in the datastore, and the subscribers that follow
/// head changes.
///
/// The store trusts that any tipset handed to it was validated by the
/// caller; it performs no state-transition checks of its own.
pub struct ChainStore<DB> {
    /// Wrapper around the blockstore, used for reading the block and tipset
    /// structures kept by the node.
    block_source: BlockSource<DB>,

    /// Raw store handle, used by snapshot import to bulk-load blocks.
    db: Arc<DB>,

    /// Typed access to the chain's private metadata: the tipset key to
    /// state root mapping, the heaviest tipset key and the checkpoint.
    metadata: MetadataStore<DB>,

    /// CID of the genesis block.
    genesis: Cid,

    /// The tipset at the head of the best known chain. Readers clone the
    /// snapshot; the write half is held across the head persist so the
    /// disk and memory views cannot diverge.
    head: RwLock<Option<Arc<Tipset>>>,

    /// Tipset key below which `load` will not rewind. Only ever moved by
    /// the caller.
    checkpoint: RwLock<TipsetKeys>,

    /// Tracks tipsets by key and by parent set and height.
    tip_index: TipIndex,

    /// Skip-cached ancestor-at-height lookups.
    chain_index: ChainIndex<BlockSource<DB>>,

    /// Fan-out for head-change notifications.
    publisher: Arc<HeadChangePublisher>,

    /// Producer half of the reorg queue consumed by the notification task.
    reorg_tx: flume::Sender<Reorg>,
}

impl<DB> ChainStore<DB>
where
    DB: Blockstore + Store + Send + Sync + 'static,
{
    /// Constructs a new store over the given block and metadata stores and
    /// spawns its reorg notification task. The checkpoint defaults to the
    /// genesis key when none was ever persisted.
    pub fn new(db: Arc<DB>, genesis: Cid) -> Result<Self, Error> {
        let block_source = BlockSource::new(db.clone());
        let metadata = MetadataStore::new(db.clone());

        let checkpoint = match metadata.load_checkpoint()? {
            Some(keys) => keys,
            None => TipsetKeys::new(vec![genesis]),
        };
        info!("check point value: {}", checkpoint);
        metadata.write_genesis(&genesis)?;

        let publisher = Arc::new(HeadChangePublisher::new());
        let (reorg_tx, reorg_rx) = flume::bounded(REORG_CHANNEL_SIZE);
        tokio::spawn(reorg_worker(publisher.clone(), reorg_rx));

        Ok(Self {
            block_source: block_source.clone(),
            db,
            metadata,
            genesis,
            head: RwLock::new(None),
            checkpoint: RwLock::new(checkpoint),
            tip_index: TipIndex::new(),
            chain_index: ChainIndex::new(block_source),
            publisher,
            reorg_tx,
        })
    }

    /// Sets the passed in tipset as the new head of this chain.
    ///
    /// The head pointer on disk is updated before the in-memory commit;
    /// failure to persist leaves the previous head intact. After the commit
    /// a single reorg is queued for the notification task, with the revert
    /// and apply walks each ordered oldest-first.
    pub async fn set_head(&self, new_ts: Arc<Tipset>) -> Result<(), Error> {
        info!("SetHead {}", new_ts);

        let reorg = {
            let mut head = self.head.write();
            match head.clone() {
                Some(old_head) if old_head.key() == new_ts.key() => None,
                Some(old_head) => {
                    let reorg = collect_tipsets_to_common_ancestor(
                        &self.block_source,
                        old_head,
                        new_ts.clone(),
                    )?;
                    self.metadata.write_head(new_ts.key())?;
                    *head = Some(new_ts);
                    Some(reorg)
                }
                None => {
                    self.metadata.write_head(new_ts.key())?;
                    *head = Some(new_ts.clone());
                    Some(Reorg {
                        dropped: vec![],
                        added: vec![new_ts],
                    })
                }
            }
        };

        if let Some(mut reorg) = reorg {
            reorg.dropped.reverse();
            reorg.added.reverse();
            self.reorg_tx.send_async(reorg).await?;
        }
        Ok(())
    }

    /// Rebuilds the store's caches by traversing backwards from the most
    /// recent best head as stored in its datastore. Because the backing
    /// store is content addressed, parent links resolve to exactly the
    /// blocks that were persisted; `load` does NOT validate state
    /// transitions, it assumes tipsets were only put to the store after
    /// checking for valid transitions.
    ///
    /// The walk stops once it reaches ten epochs below the checkpoint (or
    /// genesis). Any missing block, missing per-tipset metadata or decode
    /// error aborts the load; the chain should then be considered unusable.
    pub async fn load(&self) -> Result<(), Error> {
        self.tip_index.clear();

        let head_key = self
            .metadata
            .load_head()?
            .ok_or_else(|| Error::NotFound("head datastore key".to_string()))?;
        let head_ts = self.block_source.load_tipset(&head_key)?;

        let mut stop_at: ChainEpoch = 0;
        let checkpoint = self.checkpoint();
        if !checkpoint.is_empty() {
            let checkpoint_ts = self.block_source.load_tipset(&checkpoint)?;
            stop_at = (checkpoint_ts.epoch() - CHECKPOINT_LOOKBACK).max(0);
        }

        let start_height = head_ts.epoch();
        info!(
            "start loading chain at tipset: {}, height: {}",
            head_key, start_height
        );
        // Ensure we only produce 10 log messages regardless of the chain
        // height.
        let log_status_every = start_height / 10;

        let mut cursor = head_ts.clone();
        loop {
            if log_status_every != 0 && cursor.epoch() % log_status_every == 0 {
                info!("load tipset: {}, height: {}", cursor, cursor.epoch());
            }

            let (state_root, receipts) = self.metadata.load_tipset_metadata(&cursor)?;
            self.tip_index.put(&TipsetMetadata {
                tipset_state_root: state_root,
                tipset: cursor.clone(),
                tipset_receipts_root: receipts,
            });

            if cursor.epoch() <= stop_at {
                break;
            }
            cursor = self.block_source.load_tipset(cursor.parents())?;
        }
        info!("finished loading {} tipsets from {}", start_height, head_ts);

        self.set_head(head_ts).await
    }

    /// Ingests a CAR snapshot: bulk-loads the archive into the blockstore,
    /// then persists metadata for the root's parent chain, walking at most
    /// [`IMPORT_LOOKBACK`] steps or until genesis. Each tipset inherits the
    /// aggregates carried by its child's blocks. Returns the root's parent
    /// tipset.
    pub async fn import<R>(&self, reader: R) -> Result<Arc<Tipset>, Error>
    where
        R: AsyncRead + Send + Unpin,
    {
        let roots = load_car(self.db.as_ref(), reader)
            .await
            .map_err(|e| Error::Other(format!("loadcar failed: {e}")))?;

        let root = self.block_source.load_tipset(&TipsetKeys::new(roots))?;
        info!(
            "import height: {}, root: {}, parents: {}",
            root.epoch(),
            root.parent_state(),
            root.parents()
        );

        let parent_tipset = self.block_source.load_tipset(root.parents())?;
        self.put_tipset_metadata(&TipsetMetadata {
            tipset_state_root: *root.parent_state(),
            tipset: parent_tipset.clone(),
            tipset_receipts_root: *root.parent_receipts(),
        })?;

        let mut cur_tipset = parent_tipset.clone();
        for _ in 0..IMPORT_LOOKBACK {
            let cur_parent = self.block_source.load_tipset(cur_tipset.parents())?;
            if cur_parent.epoch() == 0 {
                break;
            }
            self.put_tipset_metadata(&TipsetMetadata {
                tipset_state_root: *cur_tipset.parent_state(),
                tipset: cur_parent.clone(),
                tipset_receipts_root: *cur_tipset.parent_receipts(),
            })?;
            cur_tipset = cur_parent;
        }
        Ok(parent_tipset)
    }

    /// Returns a bounded channel that immediately yields one
    /// `[Current(head)]` batch (when a head is set) and every subsequent
    /// reorg batch in commit order. Slow consumers are warned about; their
    /// channel is only dropped once the receiver is gone.
    pub fn sub_head_changes(&self) -> flume::Receiver<Vec<HeadChange>> {
        let snapshot = self
            .heaviest_tipset()
            .map(|head| vec![HeadChange::Current(head)])
            .unwrap_or_default();
        self.publisher.subscribe(snapshot)
    }

    /// Registers a callback invoked sequentially on every reorg. Returning
    /// [`Error::NotifeeDone`] deregisters it.
    pub fn subscribe_head_changes(&self, notifee: ReorgNotifee) {
        self.publisher.register_notifee(notifee);
    }

    /// Returns the tipset identified by `keys`, loading each member block
    /// from the blockstore.
    pub fn tipset_from_keys(&self, keys: &TipsetKeys) -> Result<Arc<Tipset>, Error> {
        self.block_source.load_tipset(keys)
    }

    /// Returns the ancestor of `ts` (or of the current head) at height `h`.
    /// When null rounds leave no tipset exactly at `h`, the first tipset
    /// above it is returned, or with `prev` its parent tipset below.
    pub fn tipset_by_height(
        &self,
        ts: Option<Arc<Tipset>>,
        h: ChainEpoch,
        prev: bool,
    ) -> Result<Arc<Tipset>, Error> {
        let ts = match ts {
            Some(ts) => ts,
            None => self
                .heaviest_tipset()
                .ok_or_else(|| Error::NotFound("heaviest tipset".to_string()))?,
        };

        if h > ts.epoch() {
            return Err(Error::Other(
                "looking for tipset with height greater than start point".to_string(),
            ));
        }
        if h == ts.epoch() {
            return Ok(ts);
        }

        let mut lbts = self.chain_index.get_tipset_by_height(ts.clone(), h)?;
        if lbts.epoch() < h {
            warn!(
                "chain index returned the wrong tipset at height {}, using slow retrieval",
                h
            );
            lbts = self.chain_index.get_tipset_by_height_without_cache(ts, h)?;
        }

        if lbts.epoch() == h || !prev {
            Ok(lbts)
        } else {
            self.block_source.load_tipset(lbts.parents())
        }
    }

    /// Persists the aggregated roots of a tipset and indexes it. Both roots
    /// must be defined; nothing is indexed otherwise.
    pub fn put_tipset_metadata(&self, tsm: &TipsetMetadata) -> Result<(), Error> {
        self.metadata.write_tipset_metadata(
            &tsm.tipset,
            &tsm.tipset_state_root,
            &tsm.tipset_receipts_root,
        )?;
        self.tip_index.put(tsm);
        Ok(())
    }

    /// Removes a tipset from the index and deletes its persisted metadata.
    pub fn del_tipset_metadata(&self, ts: &Tipset) -> Result<(), Error> {
        self.tip_index.del(ts);
        self.metadata.delete_tipset_metadata(ts)?;
        Ok(())
    }

    /// Returns true iff the store's index is tracking the tipset
    /// identified by `key`.
    pub fn has_tipset_metadata(&self, key: &TipsetKeys) -> bool {
        self.tip_index.has(key)
    }

    /// Returns the aggregate state root of the tipset identified by `key`.
    pub fn tipset_state_root(&self, key: &TipsetKeys) -> Result<Cid, Error> {
        self.tip_index.get_tipset_state_root(key)
    }

    /// Returns the receipts root of the tipset identified by `key`.
    pub fn tipset_receipts_root(&self, key: &TipsetKeys) -> Result<Cid, Error> {
        self.tip_index.get_tipset_receipts_root(key)
    }

    /// Returns the indexed tipsets with parents `parent_key` at height `h`.
    pub fn tipsets_by_parents_and_height(
        &self,
        parent_key: &TipsetKeys,
        h: ChainEpoch,
    ) -> Result<Vec<TipsetMetadata>, Error> {
        self.tip_index.get_by_parents_and_height(parent_key, h)
    }

    /// Returns true if the index tracks any tipset with parents
    /// `parent_key` at height `h`.
    pub fn has_tipsets_by_parents_and_height(
        &self,
        parent_key: &TipsetKeys,
        h: ChainEpoch,
    ) -> bool {
        self.tip_index.has_by_parents_and_height(parent_key, h)
    }

    /// Returns the most recent beacon entry carried by the blocks of `ts`
    /// or its recent ancestors.
    ///
    /// Walks at most [`BEACON_LOOKBACK`] tipsets. Reaching genesis fails;
    /// exhausting the walk fails too unless `VENUS_IGNORE_DRAND=_yes_`, in
    /// which case a fixed entry is substituted.
    pub fn latest_beacon_entry(&self, ts: &Arc<Tipset>) -> Result<BeaconEntry, Error> {
        let mut cur = ts.clone();
        for _ in 0..BEACON_LOOKBACK {
            if let Some(entry) = cur.blocks()[0].beacon_entries().last() {
                return Ok(entry.clone());
            }
            if cur.epoch() == 0 {
                return Err(Error::Other(
                    "made it back to genesis block without finding beacon entry".to_string(),
                ));
            }
            cur = self.block_source.load_tipset(cur.parents())?;
        }

        if std::env::var(IGNORE_DRAND_VAR).map_or(false, |v| v == "_yes_") {
            return Ok(BeaconEntry::new(0, vec![9; 16]));
        }

        Err(Error::Other(format!(
            "found NO beacon entries in the {BEACON_LOOKBACK} blocks prior to given tipset"
        )))
    }

    /// Returns the current head tipset, or `None` before the first
    /// `set_head`.
    pub fn heaviest_tipset(&self) -> Option<Arc<Tipset>> {
        self.head.read().clone()
    }

    /// Returns the current head tipset key; empty while the head is unset.
    pub fn head_key(&self) -> TipsetKeys {
        self.head
            .read()
            .as_ref()
            .map(|ts| ts.key().clone())
            .unwrap_or_default()
    }

    /// Returns the genesis cid of the chain tracked by the store.
    pub fn genesis_cid(&self) -> Cid {
        self.genesis
    }

    /// Returns the genesis block held by the store.
    pub fn genesis_block(&self) -> Result<Block, Error> {
        self.block_source.get_block(&self.genesis)
    }

    /// Returns the current checkpoint key.
    pub fn checkpoint(&self) -> TipsetKeys {
        self.checkpoint.read().clone()
    }

    /// Moves the in-memory checkpoint. The store never moves the
    /// checkpoint on its own.
    pub fn set_checkpoint(&self, keys: TipsetKeys) {
        *self.checkpoint.write() = keys;
    }

    /// Persists the given cids as the checkpoint.
    pub fn write_checkpoint(&self, keys: &TipsetKeys) -> Result<(), Error> {
        info!("WriteCheckPoint {}", keys);
        self.metadata.write_checkpoint(keys)
    }

    /// Access to the underlying block and metadata store.
    pub fn blockstore(&self) -> &DB {
        &self.db
    }

    /// Stops all notification activity: subscriber channels close and
    /// drain, notifees are dropped. Already-committed heads are unaffected.
    pub fn stop(&self) {
        self.publisher.shutdown();
    }
}

/// Long-lived task fanning queued reorgs out to the publisher. Exits once
/// every producer handle is gone.
async fn reorg_worker(publisher: Arc<HeadChangePublisher>, reorg_rx: flume::Receiver<Reorg>) {
    while let Ok(reorg) = reorg_rx.recv_async().await {
        publisher.publish(&reorg.dropped, &reorg.added).await;
    }
    warn!("reorg worker quit");
}
