// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Chain error
#[derive(Debug, Error)]
pub enum Error {
    /// Tipset is not tracked by the in-memory index
    #[error("Tipset not indexed: {0}")]
    NotIndexed(String),
    /// Key not found in the blockstore or datastore
    #[error("{0} not found")]
    NotFound(String),
    /// Error originating from constructing blockchain structures
    #[error(transparent)]
    Blockchain(#[from] blocks::Error),
    /// Error originating from encoding or decoding persisted data
    #[error("{0}")]
    Encoding(String),
    /// Attempted to persist tipset metadata with an undefined root
    #[error("Attempting to write undefined cid for {0}")]
    UndefinedCid(String),
    /// Walking two heads toward lower heights reached genesis without the
    /// walks meeting
    #[error("No common ancestor between tipsets")]
    NoCommonAncestor,
    /// Sentinel returned by a reorg notifee that should be deregistered
    #[error("Notifee is done and should be removed")]
    NotifeeDone,
    /// Error originating from the key-value store
    #[error(transparent)]
    KeyValueStore(#[from] db::Error),
    /// Other chain error
    #[error("{0}")]
    Other(String),
}

impl From<fvm_ipld_encoding::Error> for Error {
    fn from(e: fvm_ipld_encoding::Error) -> Error {
        Error::Encoding(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(e: flume::SendError<T>) -> Self {
        Error::Other(e.to_string())
    }
}
