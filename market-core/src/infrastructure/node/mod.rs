//! Chain-node adapter contract. The node itself (message pool, state
//! queries, signing) lives outside this crate; the engine only consumes
//! these traits and converts their outcomes into deal events.

pub mod fake;
pub mod waiter;

use std::io::Read;

use async_trait::async_trait;
use cid::Cid;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::piece::UnpaddedPieceSize;

use crate::domain::deal::client::ClientDeal;
use crate::domain::deal::proposal::DealProposal;
use crate::domain::deal::provider::ProviderDeal;
use crate::domain::deal::StorageDeal;
use crate::domain::ask::SignedStorageAsk;
use crate::foundation::{PeerId, Result};

/// Opaque identifier of a chain head snapshot; scopes consistent queries.
pub type TipSetToken = Vec<u8>;

/// Escrow position of a market participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Balance {
    pub locked: TokenAmount,
    pub available: TokenAmount,
}

impl Balance {
    pub fn zero() -> Self {
        Self { locked: TokenAmount::from_atto(0), available: TokenAmount::from_atto(0) }
    }
}

/// Outcome of an on-chain message the engine waited for.
#[derive(Clone, Debug)]
pub struct MessageReceipt {
    pub exit_code: ExitCode,
    pub return_data: Vec<u8>,
}

/// Information about a storage provider as registered on chain.
#[derive(Clone, Debug)]
pub struct StorageProviderInfo {
    /// Actor address of the miner.
    pub address: Address,
    pub owner: Address,
    /// Address the miner signs messages with.
    pub worker: Address,
    pub sector_size: u64,
    pub peer_id: PeerId,
}

/// Where a piece landed after sealing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PieceLocation {
    pub sector_id: u64,
    pub offset: u64,
    pub length: u64,
}

/// Renders an exit code with the legacy runtime name used in user-facing
/// diagnostics, e.g. `SysErrForbidden(8)`. Unknown codes fall back to
/// `ExitCode(n)`.
pub fn exit_code_label(code: ExitCode) -> String {
    let value = code.value();
    let name = match value {
        0 => "Ok",
        1 => "SysErrSenderInvalid",
        2 => "SysErrSenderStateInvalid",
        3 => "SysErrInvalidMethod",
        4 => "SysErrReserved1",
        5 => "SysErrInvalidReceiver",
        6 => "SysErrInsufficientFunds",
        7 => "SysErrOutOfGas",
        8 => "SysErrForbidden",
        9 => "SysErrorIllegalActor",
        10 => "SysErrorIllegalArgument",
        16 => "ErrIllegalArgument",
        17 => "ErrNotFound",
        18 => "ErrForbidden",
        19 => "ErrInsufficientFunds",
        20 => "ErrIllegalState",
        21 => "ErrSerialization",
        _ => return format!("ExitCode({value})"),
    };
    format!("{name}({value})")
}

/// Funds operations shared by both negotiation roles.
#[async_trait]
pub trait StorageFunds: Send + Sync {
    /// Deposits `amount` into the market escrow of `addr`; returns the
    /// message identifier without waiting for it to land.
    async fn add_funds(&self, addr: Address, amount: TokenAmount) -> Result<Cid>;

    /// Tops up `addr` from `wallet` until at least `amount` is available.
    /// Returns `None` when the balance already suffices.
    async fn ensure_funds(
        &self,
        addr: Address,
        wallet: Address,
        amount: TokenAmount,
        tok: &TipSetToken,
    ) -> Result<Option<Cid>>;

    async fn get_balance(&self, addr: Address, tok: &TipSetToken) -> Result<Balance>;

    async fn verify_signature(
        &self,
        signature: &Signature,
        signer: Address,
        plaintext: &[u8],
        tok: &TipSetToken,
    ) -> Result<bool>;

    /// Resolves once the message lands on chain.
    async fn wait_for_message(&self, mcid: Cid) -> Result<MessageReceipt>;

    async fn get_chain_head(&self) -> Result<(TipSetToken, ChainEpoch)>;
}

/// Node dependencies of the provider engine.
#[async_trait]
pub trait StorageProviderNode: StorageFunds {
    /// Submits the deal to the chain; returns the publish message
    /// identifier without waiting for it to land.
    async fn publish_deals(&self, deal: &ProviderDeal) -> Result<Cid>;

    async fn list_provider_deals(&self, addr: Address, tok: &TipSetToken) -> Result<Vec<StorageDeal>>;

    /// Hands the verified piece to the sealing pipeline.
    async fn on_deal_complete(
        &self,
        deal: &ProviderDeal,
        piece_size: UnpaddedPieceSize,
        piece: Box<dyn Read + Send>,
    ) -> Result<()>;

    async fn get_miner_worker_address(&self, miner: Address, tok: &TipSetToken) -> Result<Address>;

    async fn sign_bytes(&self, signer: Address, data: &[u8]) -> Result<Signature>;

    /// Resolves once the sector holding the deal is committed on chain.
    async fn on_deal_sector_committed(&self, provider: Address, deal_id: DealID) -> Result<()>;

    async fn locate_piece_for_deal_within_sector(&self, deal_id: DealID, tok: &TipSetToken) -> Result<PieceLocation>;
}

/// Node dependencies of the client engine.
#[async_trait]
pub trait StorageClientNode: StorageFunds {
    async fn list_client_deals(&self, addr: Address, tok: &TipSetToken) -> Result<Vec<StorageDeal>>;

    async fn list_storage_providers(&self, tok: &TipSetToken) -> Result<Vec<StorageProviderInfo>>;

    /// Confirms the provider's publish message and returns the deal id the
    /// market actor assigned.
    async fn validate_published_deal(&self, deal: &ClientDeal) -> Result<DealID>;

    async fn sign_proposal(&self, signer: Address, proposal: DealProposal) -> Result<crate::domain::deal::proposal::ClientDealProposal>;

    async fn get_default_wallet_address(&self) -> Result<Address>;

    /// Resolves once the sector holding the deal is committed on chain.
    async fn on_deal_sector_committed(&self, provider: Address, deal_id: DealID) -> Result<()>;

    async fn validate_ask_signature(&self, ask: &SignedStorageAsk, tok: &TipSetToken) -> Result<bool>;
}
