//! RocksDB-backed stores. One database holds both roles' deal records and
//! the provider ask, each in its own column family; values are the
//! canonical CBOR encodings of the records.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use cid::Cid;
use fvm_ipld_encoding::{from_slice, to_vec};
use fvm_shared::address::Address;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::ask::SignedStorageAsk;
use crate::domain::deal::DealRecord;
use crate::foundation::{MarketError, Result};
use crate::infrastructure::storage::{AskStore, DealStore};

pub const CF_PROVIDER_DEALS: &str = "provider_deals";
pub const CF_CLIENT_DEALS: &str = "client_deals";
pub const CF_ASKS: &str = "asks";

const WATCH_BUFFER: usize = 256;

/// Shared database handle; individual stores borrow a column family.
pub struct RocksMarketDb {
    db: Arc<DB>,
}

impl RocksMarketDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let cfs = [CF_PROVIDER_DEALS, CF_CLIENT_DEALS, CF_ASKS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn provider_deals<D>(&self) -> RocksDealStore<D>
    where
        D: DealRecord + Serialize + DeserializeOwned,
    {
        RocksDealStore::new(Arc::clone(&self.db), CF_PROVIDER_DEALS)
    }

    pub fn client_deals<D>(&self) -> RocksDealStore<D>
    where
        D: DealRecord + Serialize + DeserializeOwned,
    {
        RocksDealStore::new(Arc::clone(&self.db), CF_CLIENT_DEALS)
    }

    pub fn asks(&self) -> RocksAskStore {
        RocksAskStore { db: Arc::clone(&self.db) }
    }
}

pub struct RocksDealStore<D> {
    db: Arc<DB>,
    cf: &'static str,
    watch_tx: broadcast::Sender<D>,
    _record: PhantomData<fn() -> D>,
}

impl<D: DealRecord> RocksDealStore<D> {
    fn new(db: Arc<DB>, cf: &'static str) -> Self {
        let (watch_tx, _) = broadcast::channel(WATCH_BUFFER);
        Self { db, cf, watch_tx, _record: PhantomData }
    }

    fn cf_handle(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(self.cf)
            .ok_or_else(|| MarketError::storage("cf_handle", format!("missing column family {}", self.cf)))
    }
}

impl<D> DealStore<D> for RocksDealStore<D>
where
    D: DealRecord + Serialize + DeserializeOwned,
{
    fn put(&self, deal: &D) -> Result<()> {
        let key = deal.proposal_cid().to_bytes();
        let value = to_vec(deal)?;
        self.db.put_cf(self.cf_handle()?, key, value)?;
        let _ = self.watch_tx.send(deal.clone());
        Ok(())
    }

    fn get(&self, proposal: &Cid) -> Result<Option<D>> {
        match self.db.get_cf(self.cf_handle()?, proposal.to_bytes())? {
            Some(bytes) => Ok(Some(from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<D>> {
        let mut deals = Vec::new();
        for entry in self.db.iterator_cf(self.cf_handle()?, rocksdb::IteratorMode::Start) {
            let (_, value) = entry?;
            deals.push(from_slice(&value)?);
        }
        Ok(deals)
    }

    fn watch(&self) -> broadcast::Receiver<D> {
        self.watch_tx.subscribe()
    }
}

pub struct RocksAskStore {
    db: Arc<DB>,
}

impl RocksAskStore {
    fn cf_handle(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_ASKS)
            .ok_or_else(|| MarketError::storage("cf_handle", format!("missing column family {CF_ASKS}")))
    }
}

impl AskStore for RocksAskStore {
    fn put_ask(&self, ask: &SignedStorageAsk) -> Result<()> {
        let value = to_vec(ask)?;
        self.db.put_cf(self.cf_handle()?, ask.ask.miner.to_bytes(), value)?;
        Ok(())
    }

    fn get_ask(&self, miner: &Address) -> Result<Option<SignedStorageAsk>> {
        match self.db.get_cf(self.cf_handle()?, miner.to_bytes())? {
            Some(bytes) => Ok(Some(from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
