//! Provider ask state: one signed ask per local miner, cached read-mostly
//! and persisted on every update.

use std::sync::{Arc, RwLock};

use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::piece::PaddedPieceSize;

use crate::domain::ask::{SignedStorageAsk, StorageAsk};
use crate::foundation::Result;
use crate::infrastructure::storage::AskStore;

pub struct AskManager {
    store: Arc<dyn AskStore>,
    actor: Address,
    current: RwLock<Option<SignedStorageAsk>>,
}

impl AskManager {
    pub fn new(store: Arc<dyn AskStore>, actor: Address) -> Self {
        Self { store, actor, current: RwLock::new(None) }
    }

    /// Reloads the persisted ask into the cache; called on engine start.
    pub fn load(&self) -> Result<()> {
        let stored = self.store.get_ask(&self.actor)?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = stored;
        Ok(())
    }

    pub fn current(&self) -> Option<SignedStorageAsk> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Policy snapshot handed to validation. Before any ask has been
    /// published everything is priced at zero and unconstrained.
    pub fn policy(&self) -> StorageAsk {
        self.current().map(|signed| signed.ask).unwrap_or_else(|| StorageAsk {
            price: TokenAmount::from_atto(0),
            min_piece_size: PaddedPieceSize(0),
            max_piece_size: PaddedPieceSize(u64::MAX),
            miner: self.actor,
            timestamp: 0,
            expiry: 0,
            seq_no: 0,
        })
    }

    pub fn next_seq_no(&self) -> u64 {
        self.current().map(|signed| signed.ask.seq_no + 1).unwrap_or(0)
    }

    /// Updates take exclusive access; the sequence number must have been
    /// bumped by the caller.
    pub fn set(&self, signed: SignedStorageAsk) -> Result<()> {
        self.store.put_ask(&signed)?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(signed);
        Ok(())
    }

    pub fn list(&self, addr: &Address) -> Vec<SignedStorageAsk> {
        if *addr == self.actor {
            self.current().into_iter().collect()
        } else {
            Vec::new()
        }
    }
}
