//! Fake chain nodes over an inspectable market state. Shipped in-crate so
//! handler and integration tests (here and downstream) can drive the
//! engine without a node.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Mutex;

use async_trait::async_trait;
use cid::Cid;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::deal::DealID;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::piece::UnpaddedPieceSize;

use crate::domain::ask::SignedStorageAsk;
use crate::domain::deal::client::ClientDeal;
use crate::domain::deal::proposal::{ClientDealProposal, DealProposal};
use crate::domain::deal::provider::ProviderDeal;
use crate::domain::deal::{ChainDealState, StorageDeal};
use crate::foundation::{MarketError, Result};
use crate::infrastructure::node::{
    Balance, MessageReceipt, PieceLocation, StorageClientNode, StorageFunds, StorageProviderInfo, StorageProviderNode,
    TipSetToken,
};

/// Mutable picture of the market a fake node answers queries from.
#[derive(Debug, Default)]
pub struct StorageMarketState {
    pub tipset_token: TipSetToken,
    pub epoch: ChainEpoch,
    pub balances: HashMap<Address, TokenAmount>,
    pub deals: HashMap<Address, Vec<StorageDeal>>,
    pub providers: Vec<StorageProviderInfo>,
}

impl StorageMarketState {
    pub fn add_funds(&mut self, addr: Address, amount: TokenAmount) {
        let entry = self.balances.entry(addr).or_insert_with(|| TokenAmount::from_atto(0));
        *entry += amount;
    }

    pub fn balance(&self, addr: &Address) -> Balance {
        Balance {
            locked: TokenAmount::from_atto(0),
            available: self.balances.get(addr).cloned().unwrap_or_else(|| TokenAmount::from_atto(0)),
        }
    }

    pub fn add_deal(&mut self, deal: StorageDeal) -> (TipSetToken, ChainEpoch) {
        for addr in [deal.proposal.client, deal.proposal.provider] {
            self.deals.entry(addr).or_default().push(deal.clone());
        }
        (self.tipset_token.clone(), self.epoch)
    }
}

/// Knobs shared by both fake node roles. Every error slot is a rendered
/// message; `None` means the operation succeeds.
pub struct FakeCommonNode {
    pub state: Mutex<StorageMarketState>,
    pub add_funds_cid: Option<Cid>,
    pub ensure_funds_error: Option<String>,
    pub get_balance_error: Option<String>,
    pub get_chain_head_error: Option<String>,
    pub verify_signature_fails: bool,
    pub wait_for_message_error: Option<String>,
    pub wait_for_message_exit_code: ExitCode,
    pub wait_for_message_return: Vec<u8>,
    /// Leaves callers suspended, simulating a message that never lands.
    pub wait_for_message_blocks: bool,
    pub wait_for_message_calls: Mutex<Vec<Cid>>,
}

impl Default for FakeCommonNode {
    fn default() -> Self {
        Self {
            state: Mutex::new(StorageMarketState::default()),
            add_funds_cid: None,
            ensure_funds_error: None,
            get_balance_error: None,
            get_chain_head_error: None,
            verify_signature_fails: false,
            wait_for_message_error: None,
            wait_for_message_exit_code: ExitCode::OK,
            wait_for_message_return: Vec::new(),
            wait_for_message_blocks: false,
            wait_for_message_calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeCommonNode {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, StorageMarketState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn add_funds(&self, addr: Address, amount: TokenAmount) -> Result<Cid> {
        self.lock_state().add_funds(addr, amount);
        self.add_funds_cid.ok_or_else(|| MarketError::msg("fake node has no add_funds_cid configured"))
    }

    async fn ensure_funds(&self, addr: Address, amount: TokenAmount) -> Result<Option<Cid>> {
        if let Some(err) = &self.ensure_funds_error {
            return Err(MarketError::msg(err.clone()));
        }
        let balance = self.lock_state().balance(&addr);
        if balance.available < amount {
            if self.add_funds_cid.is_none() {
                return Ok(None);
            }
            let shortfall = amount - balance.available;
            return Ok(Some(self.add_funds(addr, shortfall).await?));
        }
        Ok(None)
    }

    async fn get_balance(&self, addr: Address) -> Result<Balance> {
        if let Some(err) = &self.get_balance_error {
            return Err(MarketError::msg(err.clone()));
        }
        Ok(self.lock_state().balance(&addr))
    }

    async fn verify_signature(&self) -> Result<bool> {
        Ok(!self.verify_signature_fails)
    }

    async fn wait_for_message(&self, mcid: Cid) -> Result<MessageReceipt> {
        self.wait_for_message_calls.lock().unwrap_or_else(|e| e.into_inner()).push(mcid);
        if let Some(err) = &self.wait_for_message_error {
            return Err(MarketError::msg(err.clone()));
        }
        if self.wait_for_message_blocks {
            std::future::pending::<()>().await;
        }
        Ok(MessageReceipt {
            exit_code: self.wait_for_message_exit_code,
            return_data: self.wait_for_message_return.clone(),
        })
    }

    async fn get_chain_head(&self) -> Result<(TipSetToken, ChainEpoch)> {
        if let Some(err) = &self.get_chain_head_error {
            return Err(MarketError::msg(err.clone()));
        }
        let state = self.lock_state();
        Ok((state.tipset_token.clone(), state.epoch))
    }
}

/// Fake implementation of the provider's node dependencies.
pub struct FakeProviderNode {
    pub common: FakeCommonNode,
    pub miner_worker: Address,
    pub miner_worker_error: Option<String>,
    pub publish_cid: Option<Cid>,
    pub publish_deals_error: Option<String>,
    pub on_deal_complete_error: Option<String>,
    pub piece_sector_id: u64,
    pub piece_length: u64,
    pub locate_piece_error: Option<String>,
    pub deal_committed_sync_error: Option<String>,
    pub deal_committed_async_error: Option<String>,
    pub sign_bytes_error: Option<String>,
}

impl Default for FakeProviderNode {
    fn default() -> Self {
        Self {
            common: FakeCommonNode::default(),
            miner_worker: Address::new_id(0),
            miner_worker_error: None,
            publish_cid: None,
            publish_deals_error: None,
            on_deal_complete_error: None,
            piece_sector_id: 0,
            piece_length: 0,
            locate_piece_error: None,
            deal_committed_sync_error: None,
            deal_committed_async_error: None,
            sign_bytes_error: None,
        }
    }
}

#[async_trait]
impl StorageFunds for FakeProviderNode {
    async fn add_funds(&self, addr: Address, amount: TokenAmount) -> Result<Cid> {
        self.common.add_funds(addr, amount).await
    }

    async fn ensure_funds(
        &self,
        addr: Address,
        _wallet: Address,
        amount: TokenAmount,
        _tok: &TipSetToken,
    ) -> Result<Option<Cid>> {
        self.common.ensure_funds(addr, amount).await
    }

    async fn get_balance(&self, addr: Address, _tok: &TipSetToken) -> Result<Balance> {
        self.common.get_balance(addr).await
    }

    async fn verify_signature(
        &self,
        _signature: &Signature,
        _signer: Address,
        _plaintext: &[u8],
        _tok: &TipSetToken,
    ) -> Result<bool> {
        self.common.verify_signature().await
    }

    async fn wait_for_message(&self, mcid: Cid) -> Result<MessageReceipt> {
        self.common.wait_for_message(mcid).await
    }

    async fn get_chain_head(&self) -> Result<(TipSetToken, ChainEpoch)> {
        self.common.get_chain_head().await
    }
}

#[async_trait]
impl StorageProviderNode for FakeProviderNode {
    async fn publish_deals(&self, deal: &ProviderDeal) -> Result<Cid> {
        if let Some(err) = &self.publish_deals_error {
            return Err(MarketError::msg(err.clone()));
        }
        self.common.lock_state().add_deal(StorageDeal {
            proposal: deal.proposal.proposal.clone(),
            state: ChainDealState { sector_start_epoch: -1, last_updated_epoch: -1, slash_epoch: -1 },
        });
        self.publish_cid.ok_or_else(|| MarketError::msg("fake node has no publish_cid configured"))
    }

    async fn list_provider_deals(&self, addr: Address, _tok: &TipSetToken) -> Result<Vec<StorageDeal>> {
        Ok(self.common.lock_state().deals.get(&addr).cloned().unwrap_or_default())
    }

    async fn on_deal_complete(
        &self,
        _deal: &ProviderDeal,
        _piece_size: UnpaddedPieceSize,
        _piece: Box<dyn Read + Send>,
    ) -> Result<()> {
        match &self.on_deal_complete_error {
            Some(err) => Err(MarketError::msg(err.clone())),
            None => Ok(()),
        }
    }

    async fn get_miner_worker_address(&self, _miner: Address, _tok: &TipSetToken) -> Result<Address> {
        match &self.miner_worker_error {
            Some(err) => Err(MarketError::msg(err.clone())),
            None => Ok(self.miner_worker),
        }
    }

    async fn sign_bytes(&self, _signer: Address, _data: &[u8]) -> Result<Signature> {
        match &self.sign_bytes_error {
            Some(err) => Err(MarketError::msg(err.clone())),
            None => Ok(Signature::new_bls(vec![0xaa; 8])),
        }
    }

    async fn on_deal_sector_committed(&self, _provider: Address, _deal_id: DealID) -> Result<()> {
        if let Some(err) = &self.deal_committed_sync_error {
            return Err(MarketError::msg(err.clone()));
        }
        if let Some(err) = &self.deal_committed_async_error {
            tokio::task::yield_now().await;
            return Err(MarketError::msg(err.clone()));
        }
        Ok(())
    }

    async fn locate_piece_for_deal_within_sector(&self, _deal_id: DealID, _tok: &TipSetToken) -> Result<PieceLocation> {
        match &self.locate_piece_error {
            Some(err) => Err(MarketError::msg(err.clone())),
            None => Ok(PieceLocation { sector_id: self.piece_sector_id, offset: 0, length: self.piece_length }),
        }
    }
}

/// Fake implementation of the client's node dependencies.
pub struct FakeClientNode {
    pub common: FakeCommonNode,
    pub client_addr: Address,
    pub validate_published_deal_id: DealID,
    pub validate_published_error: Option<String>,
    pub deal_committed_sync_error: Option<String>,
    pub deal_committed_async_error: Option<String>,
    pub ask_validation_error: Option<String>,
}

impl Default for FakeClientNode {
    fn default() -> Self {
        Self {
            common: FakeCommonNode::default(),
            client_addr: Address::new_id(0),
            validate_published_deal_id: 0,
            validate_published_error: None,
            deal_committed_sync_error: None,
            deal_committed_async_error: None,
            ask_validation_error: None,
        }
    }
}

#[async_trait]
impl StorageFunds for FakeClientNode {
    async fn add_funds(&self, addr: Address, amount: TokenAmount) -> Result<Cid> {
        self.common.add_funds(addr, amount).await
    }

    async fn ensure_funds(
        &self,
        addr: Address,
        _wallet: Address,
        amount: TokenAmount,
        _tok: &TipSetToken,
    ) -> Result<Option<Cid>> {
        self.common.ensure_funds(addr, amount).await
    }

    async fn get_balance(&self, addr: Address, _tok: &TipSetToken) -> Result<Balance> {
        self.common.get_balance(addr).await
    }

    async fn verify_signature(
        &self,
        _signature: &Signature,
        _signer: Address,
        _plaintext: &[u8],
        _tok: &TipSetToken,
    ) -> Result<bool> {
        self.common.verify_signature().await
    }

    async fn wait_for_message(&self, mcid: Cid) -> Result<MessageReceipt> {
        self.common.wait_for_message(mcid).await
    }

    async fn get_chain_head(&self) -> Result<(TipSetToken, ChainEpoch)> {
        self.common.get_chain_head().await
    }
}

#[async_trait]
impl StorageClientNode for FakeClientNode {
    async fn list_client_deals(&self, addr: Address, _tok: &TipSetToken) -> Result<Vec<StorageDeal>> {
        Ok(self.common.lock_state().deals.get(&addr).cloned().unwrap_or_default())
    }

    async fn list_storage_providers(&self, _tok: &TipSetToken) -> Result<Vec<StorageProviderInfo>> {
        Ok(self.common.lock_state().providers.clone())
    }

    async fn validate_published_deal(&self, _deal: &ClientDeal) -> Result<DealID> {
        match &self.validate_published_error {
            Some(err) => Err(MarketError::msg(err.clone())),
            None => Ok(self.validate_published_deal_id),
        }
    }

    async fn sign_proposal(&self, _signer: Address, proposal: DealProposal) -> Result<ClientDealProposal> {
        Ok(ClientDealProposal { proposal, client_signature: Signature::new_bls(vec![0xbb; 8]) })
    }

    async fn get_default_wallet_address(&self) -> Result<Address> {
        Ok(self.client_addr)
    }

    async fn on_deal_sector_committed(&self, _provider: Address, _deal_id: DealID) -> Result<()> {
        if let Some(err) = &self.deal_committed_sync_error {
            return Err(MarketError::msg(err.clone()));
        }
        if let Some(err) = &self.deal_committed_async_error {
            tokio::task::yield_now().await;
            return Err(MarketError::msg(err.clone()));
        }
        Ok(())
    }

    async fn validate_ask_signature(&self, _ask: &SignedStorageAsk, _tok: &TipSetToken) -> Result<bool> {
        Ok(self.ask_validation_error.is_none())
    }
}
