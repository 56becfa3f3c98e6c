use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use cid::Cid;
use fvm_shared::address::Address;
use tokio::sync::broadcast;

use crate::domain::ask::SignedStorageAsk;
use crate::domain::deal::DealRecord;
use crate::foundation::Result;
use crate::infrastructure::storage::{AskStore, DealStore};

const WATCH_BUFFER: usize = 256;

/// In-memory deal store for tests and ephemeral engines.
pub struct MemoryDealStore<D> {
    deals: Mutex<HashMap<Cid, D>>,
    watch_tx: broadcast::Sender<D>,
}

impl<D: DealRecord> MemoryDealStore<D> {
    pub fn new() -> Self {
        let (watch_tx, _) = broadcast::channel(WATCH_BUFFER);
        Self { deals: Mutex::new(HashMap::new()), watch_tx }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Cid, D>> {
        self.deals.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<D: DealRecord> Default for MemoryDealStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DealRecord> DealStore<D> for MemoryDealStore<D> {
    fn put(&self, deal: &D) -> Result<()> {
        self.lock().insert(deal.proposal_cid(), deal.clone());
        let _ = self.watch_tx.send(deal.clone());
        Ok(())
    }

    fn get(&self, proposal: &Cid) -> Result<Option<D>> {
        Ok(self.lock().get(proposal).cloned())
    }

    fn list(&self) -> Result<Vec<D>> {
        Ok(self.lock().values().cloned().collect())
    }

    fn watch(&self) -> broadcast::Receiver<D> {
        self.watch_tx.subscribe()
    }
}

/// In-memory ask store.
#[derive(Default)]
pub struct MemoryAskStore {
    asks: Mutex<HashMap<Address, SignedStorageAsk>>,
}

impl MemoryAskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AskStore for MemoryAskStore {
    fn put_ask(&self, ask: &SignedStorageAsk) -> Result<()> {
        self.asks.lock().unwrap_or_else(|e| e.into_inner()).insert(ask.ask.miner, ask.clone());
        Ok(())
    }

    fn get_ask(&self, miner: &Address) -> Result<Option<SignedStorageAsk>> {
        Ok(self.asks.lock().unwrap_or_else(|e| e.into_inner()).get(miner).cloned())
    }
}
