// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::tuple::*;

/// The result from getting an entry from the drand beacon chain. Entries are
/// carried in block headers and traversed when a caller asks for the latest
/// randomness seen by the chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize_tuple, Deserialize_tuple)]
pub struct BeaconEntry {
    round: u64,
    data: Vec<u8>,
}

impl BeaconEntry {
    pub fn new(round: u64, data: Vec<u8>) -> Self {
        Self { round, data }
    }

    /// Returns the beacon round of this entry.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Returns the opaque signature bytes of this entry.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
