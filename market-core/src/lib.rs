//! Two-sided storage-deal negotiation engine for a content-addressed,
//! blockchain-anchored marketplace.
//!
//! Each side of a deal (client and provider) holds a persistent record per
//! proposal and advances it through a fixed lifecycle driven by external
//! stimuli: peer messages, on-chain confirmations, data-transfer progress,
//! and local I/O outcomes. The engine provides the paired state machines,
//! their persistence and restart model, and the subscription feed; the
//! chain node, peer transport, bulk transfer, and piece commitment
//! arithmetic are consumed through traits.

pub mod application;
pub mod domain;
pub mod foundation;
pub mod infrastructure;

pub use application::{StorageClient, StorageProvider};
pub use domain::deal::{DealRecord, DealStatus};
pub use foundation::{MarketError, Result};
