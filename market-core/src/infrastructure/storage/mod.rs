//! Durable deal and ask stores. The event processor is the only writer of
//! deal records; everything else reads snapshots or follows the change
//! feed.

pub mod memory;
pub mod rocks;

use cid::Cid;
use fvm_shared::address::Address;
use tokio::sync::broadcast;

use crate::domain::ask::SignedStorageAsk;
use crate::domain::deal::DealRecord;
use crate::foundation::Result;

/// Durable mapping from proposal identifier to deal record.
pub trait DealStore<D: DealRecord>: Send + Sync {
    /// Write-through; the record is durable before this returns.
    fn put(&self, deal: &D) -> Result<()>;

    fn get(&self, proposal: &Cid) -> Result<Option<D>>;

    fn list(&self) -> Result<Vec<D>>;

    /// Change feed of updated records; every successful `put` is published.
    fn watch(&self) -> broadcast::Receiver<D>;
}

/// Storage for the provider's signed ask, keyed by miner address.
pub trait AskStore: Send + Sync {
    fn put_ask(&self, ask: &SignedStorageAsk) -> Result<()>;

    fn get_ask(&self, miner: &Address) -> Result<Option<SignedStorageAsk>>;
}
