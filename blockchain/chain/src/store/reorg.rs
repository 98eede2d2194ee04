// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp::Ordering;
use std::sync::Arc;

use blocks::Tipset;

use super::{Error, TipsetLoader};

/// A head transition: the tipsets dropped from the old branch and the
/// tipsets added along the new branch. Straight out of the walk both lists
/// are newest-first; the store reverses them before publishing so
/// subscribers observe each sequence oldest-first.
#[derive(Debug, Default)]
pub struct Reorg {
    pub dropped: Vec<Arc<Tipset>>,
    pub added: Vec<Arc<Tipset>>,
}

/// Walks both heads toward lower heights until they reference the same
/// tipset key, collecting dropped and added tipsets along the way. The side
/// whose cursor is higher advances; on equal heights both advance. The
/// common ancestor itself lands in neither list.
///
/// Fails with [`Error::NoCommonAncestor`] when both walks reach genesis
/// height without meeting.
pub fn collect_tipsets_to_common_ancestor<L>(
    loader: &L,
    old: Arc<Tipset>,
    new: Arc<Tipset>,
) -> Result<Reorg, Error>
where
    L: TipsetLoader,
{
    let mut reorg = Reorg::default();
    let mut old_cursor = old;
    let mut new_cursor = new;

    while old_cursor.key() != new_cursor.key() {
        match old_cursor.epoch().cmp(&new_cursor.epoch()) {
            Ordering::Greater => {
                reorg.dropped.push(old_cursor.clone());
                old_cursor = loader.load_tipset(old_cursor.parents())?;
            }
            Ordering::Less => {
                reorg.added.push(new_cursor.clone());
                new_cursor = loader.load_tipset(new_cursor.parents())?;
            }
            Ordering::Equal => {
                if old_cursor.epoch() == 0 {
                    // Distinct chains all the way down.
                    return Err(Error::NoCommonAncestor);
                }
                reorg.dropped.push(old_cursor.clone());
                reorg.added.push(new_cursor.clone());
                old_cursor = loader.load_tipset(old_cursor.parents())?;
                new_cursor = loader.load_tipset(new_cursor.parents())?;
            }
        }
    }

    Ok(reorg)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::tests::{child_tipset, genesis_tipset, genesis_with_miner, keys_of, linear_chain};
    use crate::store::BlockSource;
    use db::MemoryDB;

    fn source(db: &Arc<MemoryDB>) -> BlockSource<MemoryDB> {
        BlockSource::new(db.clone())
    }

    #[test]
    fn noop_walk() {
        let db = Arc::new(MemoryDB::default());
        let gen = genesis_tipset(db.as_ref());
        let reorg =
            collect_tipsets_to_common_ancestor(&source(&db), gen.clone(), gen.clone()).unwrap();
        assert!(reorg.dropped.is_empty());
        assert!(reorg.added.is_empty());
    }

    #[test]
    fn revert_to_ancestor_linear() {
        let db = Arc::new(MemoryDB::default());
        let gen = genesis_tipset(db.as_ref());
        let chain = linear_chain(db.as_ref(), &gen, 3);
        let (a, b, c) = (chain[0].clone(), chain[1].clone(), chain[2].clone());

        let reorg = collect_tipsets_to_common_ancestor(&source(&db), c.clone(), a).unwrap();
        assert_eq!(keys_of(&reorg.dropped), keys_of(&[c, b]));
        assert!(reorg.added.is_empty());
    }

    #[test]
    fn apply_to_descendant_linear() {
        let db = Arc::new(MemoryDB::default());
        let gen = genesis_tipset(db.as_ref());
        let chain = linear_chain(db.as_ref(), &gen, 3);
        let (a, b, c) = (chain[0].clone(), chain[1].clone(), chain[2].clone());

        let reorg = collect_tipsets_to_common_ancestor(&source(&db), a, c.clone()).unwrap();
        assert!(reorg.dropped.is_empty());
        assert_eq!(keys_of(&reorg.added), keys_of(&[c, b]));
    }

    #[test]
    fn cross_fork() {
        let db = Arc::new(MemoryDB::default());
        let gen = genesis_tipset(db.as_ref());
        let a = child_tipset(db.as_ref(), &gen, 1, &[1]);
        let b1 = child_tipset(db.as_ref(), &a, 2, &[1]);
        let c1 = child_tipset(db.as_ref(), &b1, 3, &[1]);
        let b2 = child_tipset(db.as_ref(), &a, 2, &[2]);
        let c2 = child_tipset(db.as_ref(), &b2, 3, &[2]);

        // Same height on both sides.
        let reorg =
            collect_tipsets_to_common_ancestor(&source(&db), b1.clone(), b2.clone()).unwrap();
        assert_eq!(keys_of(&reorg.dropped), keys_of(&[b1.clone()]));
        assert_eq!(keys_of(&reorg.added), keys_of(&[b2.clone()]));

        let reorg =
            collect_tipsets_to_common_ancestor(&source(&db), c1.clone(), c2.clone()).unwrap();
        assert_eq!(keys_of(&reorg.dropped), keys_of(&[c1.clone(), b1.clone()]));
        assert_eq!(keys_of(&reorg.added), keys_of(&[c2.clone(), b2.clone()]));

        // Jagged heights.
        let reorg =
            collect_tipsets_to_common_ancestor(&source(&db), b1.clone(), c2.clone()).unwrap();
        assert_eq!(keys_of(&reorg.dropped), keys_of(&[b1.clone()]));
        assert_eq!(keys_of(&reorg.added), keys_of(&[c2, b2.clone()]));

        let reorg = collect_tipsets_to_common_ancestor(&source(&db), c1.clone(), b2.clone()).unwrap();
        assert_eq!(keys_of(&reorg.dropped), keys_of(&[c1, b1]));
        assert_eq!(keys_of(&reorg.added), keys_of(&[b2]));
    }

    #[test]
    fn disjoint_chains_have_no_common_ancestor() {
        let db = Arc::new(MemoryDB::default());
        let gen1 = genesis_tipset(db.as_ref());
        let gen2 = genesis_with_miner(db.as_ref(), 99);
        let a1 = child_tipset(db.as_ref(), &gen1, 1, &[1]);
        let a2 = child_tipset(db.as_ref(), &gen2, 1, &[2]);

        assert!(matches!(
            collect_tipsets_to_common_ancestor(&source(&db), gen1.clone(), gen2.clone())
                .unwrap_err(),
            Error::NoCommonAncestor
        ));
        assert!(matches!(
            collect_tipsets_to_common_ancestor(&source(&db), a1, a2).unwrap_err(),
            Error::NoCommonAncestor
        ));
    }
}
