pub mod ask;
pub mod deal;
pub mod message;

pub use ask::{AskOptions, SignedStorageAsk, StorageAsk};
pub use deal::client::{ClientDeal, ClientEvent};
pub use deal::proposal::{ClientDealProposal, DealProposal};
pub use deal::provider::{ProviderDeal, ProviderEvent};
pub use deal::{ChainDealState, DataRef, DealRecord, DealStatus, Rule, StorageDeal};
pub use message::{DealResponse, ProposalMessage, SignedResponse, TransferSelector, TransferVoucher};
