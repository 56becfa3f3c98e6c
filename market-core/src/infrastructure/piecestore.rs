//! Piece store interface: the retrieval-side index mapping pieces to the
//! deals and sectors that hold them, and payload blocks to their offsets
//! within a piece.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use cid::Cid;
use fvm_ipld_encoding::from_slice;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::deal::DealID;

use crate::foundation::{MarketError, Result};

/// Where a payload block sits inside a piece.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct BlockLocation {
    pub rel_offset: u64,
    pub block_size: u64,
}

/// One record in the block-location metadata file written while the piece
/// was generated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct BlockRecord {
    pub block: Cid,
    pub location: BlockLocation,
}

/// Decodes the metadata file produced alongside a piece.
pub fn read_block_records(bytes: &[u8]) -> Result<Vec<BlockRecord>> {
    Ok(from_slice(bytes)?)
}

/// Association between a piece and a published deal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DealInfo {
    pub deal_id: DealID,
    pub sector_id: u64,
    pub offset: u64,
    pub length: u64,
}

pub trait PieceStore: Send + Sync {
    fn add_deal_for_piece(&self, piece_cid: &Cid, info: DealInfo) -> Result<()>;

    fn add_piece_block_locations(&self, piece_cid: &Cid, locations: &[BlockRecord]) -> Result<()>;

    fn deals_for_piece(&self, piece_cid: &Cid) -> Result<Vec<DealInfo>>;
}

#[derive(Default)]
struct MemoryPieceStoreInner {
    deals: HashMap<Cid, Vec<DealInfo>>,
    locations: HashMap<Cid, Vec<BlockRecord>>,
}

/// Memory-backed piece store with injectable failures for tests.
#[derive(Default)]
pub struct MemoryPieceStore {
    inner: Mutex<MemoryPieceStoreInner>,
    pub add_deal_error: Option<String>,
    pub add_locations_error: Option<String>,
}

impl MemoryPieceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_errors(add_deal_error: Option<String>, add_locations_error: Option<String>) -> Self {
        Self { add_deal_error, add_locations_error, ..Self::default() }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryPieceStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn block_locations(&self, piece_cid: &Cid) -> Vec<BlockRecord> {
        self.lock().locations.get(piece_cid).cloned().unwrap_or_default()
    }
}

impl PieceStore for MemoryPieceStore {
    fn add_deal_for_piece(&self, piece_cid: &Cid, info: DealInfo) -> Result<()> {
        if let Some(err) = &self.add_deal_error {
            return Err(MarketError::msg(err.clone()));
        }
        self.lock().deals.entry(*piece_cid).or_default().push(info);
        Ok(())
    }

    fn add_piece_block_locations(&self, piece_cid: &Cid, locations: &[BlockRecord]) -> Result<()> {
        if let Some(err) = &self.add_locations_error {
            return Err(MarketError::msg(err.clone()));
        }
        self.lock().locations.entry(*piece_cid).or_default().extend_from_slice(locations);
        Ok(())
    }

    fn deals_for_piece(&self, piece_cid: &Cid) -> Result<Vec<DealInfo>> {
        Ok(self.lock().deals.get(piece_cid).cloned().unwrap_or_default())
    }
}
