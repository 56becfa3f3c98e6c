//! Provider front: wires the lifecycle engine to the infrastructure
//! traits and exposes the programmatic operations of the provider role.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_encoding::to_vec;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::piece::PaddedPieceSize;
use tracing::info;

use crate::application::ask::AskManager;
use crate::application::environment::{ProviderDealEnvironment, ProviderEnvironment};
use crate::application::machine::{DealLifecycle, DealMachine, EventSink};
use crate::application::provider_states as states;
use crate::application::provider_states::ProviderCtx;
use crate::application::subscribers::SubscriptionId;
use crate::domain::ask::{AskOptions, SignedStorageAsk, StorageAsk};
use crate::domain::deal::provider::{self as provider_fsm, ProviderDeal, ProviderEvent};
use crate::domain::deal::{DealStatus, Rule, StorageDeal};
use crate::domain::message::{ProposalMessage, TransferSelector};
use crate::foundation::{MarketError, PeerId, Result};
use crate::infrastructure::commp::PieceCommitmentGenerator;
use crate::infrastructure::config::ProviderConfig;
use crate::infrastructure::filestore::FileStore;
use crate::infrastructure::network::ProviderNetwork;
use crate::infrastructure::node::waiter::MessageWaiter;
use crate::infrastructure::node::{exit_code_label, Balance, StorageProviderNode};
use crate::infrastructure::piecestore::PieceStore;
use crate::infrastructure::storage::{AskStore, DealStore};
use crate::infrastructure::transfer::TransferLauncher;

/// Glue between the generic engine and the provider tables and handlers.
pub struct ProviderLifecycle {
    env: Arc<dyn ProviderEnvironment>,
    waiter: Arc<MessageWaiter>,
}

impl ProviderLifecycle {
    pub fn new(env: Arc<dyn ProviderEnvironment>, waiter: Arc<MessageWaiter>) -> Self {
        Self { env, waiter }
    }
}

#[async_trait]
impl DealLifecycle for ProviderLifecycle {
    type Deal = ProviderDeal;
    type Event = ProviderEvent;

    fn event_name(event: &ProviderEvent) -> &'static str {
        event.name()
    }

    fn transition(status: DealStatus, event: &ProviderEvent) -> Rule {
        provider_fsm::transition(status, event)
    }

    fn apply(deal: &mut ProviderDeal, event: &ProviderEvent) {
        provider_fsm::apply(deal, event)
    }

    fn restart_event() -> ProviderEvent {
        ProviderEvent::Restart
    }

    async fn on_entered(&self, deal: ProviderDeal, events: EventSink<ProviderEvent>) {
        let ctx = ProviderCtx { env: Arc::clone(&self.env), waiter: Arc::clone(&self.waiter), events };
        match deal.state {
            DealStatus::Validating => states::validate_deal_proposal(&ctx, deal).await,
            DealStatus::ProposalAccepted => states::transfer_data(&ctx, deal).await,
            DealStatus::VerifyData => states::verify_data(&ctx, deal).await,
            DealStatus::EnsureProviderFunds => states::ensure_provider_funds(&ctx, deal).await,
            DealStatus::ProviderFunding => states::wait_for_funding(&ctx, deal).await,
            DealStatus::Publish => states::publish_deal(&ctx, deal).await,
            DealStatus::Publishing => states::wait_for_publish(&ctx, deal).await,
            DealStatus::Staged => states::handoff_deal(&ctx, deal).await,
            DealStatus::Sealing => states::verify_deal_activated(&ctx, deal).await,
            DealStatus::Active => states::record_piece_info(&ctx, deal).await,
            DealStatus::Failing => states::fail_deal(&ctx, deal).await,
            _ => {}
        }
    }
}

/// The storage provider engine.
pub struct StorageProvider {
    machine: DealMachine<ProviderLifecycle>,
    store: Arc<dyn DealStore<ProviderDeal>>,
    node: Arc<dyn StorageProviderNode>,
    env: Arc<dyn ProviderEnvironment>,
    asks: Arc<AskManager>,
    waiter: Arc<MessageWaiter>,
    actor: Address,
    peer_id: PeerId,
    config: ProviderConfig,
}

impl StorageProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProviderConfig,
        actor: Address,
        peer_id: PeerId,
        node: Arc<dyn StorageProviderNode>,
        store: Arc<dyn DealStore<ProviderDeal>>,
        ask_store: Arc<dyn AskStore>,
        file_store: Arc<dyn FileStore>,
        piece_store: Arc<dyn PieceStore>,
        commp: Arc<dyn PieceCommitmentGenerator>,
        transfer: Arc<dyn TransferLauncher>,
        network: Arc<dyn ProviderNetwork>,
    ) -> Self {
        let asks = Arc::new(AskManager::new(ask_store, actor));
        let waiter = MessageWaiter::new();
        let env: Arc<dyn ProviderEnvironment> = Arc::new(ProviderDealEnvironment {
            actor,
            node: Arc::clone(&node),
            asks: Arc::clone(&asks),
            file_store,
            piece_store,
            commp,
            transfer,
            network,
            acceptance_buffer: config.deal_acceptance_buffer,
        });
        let machine = DealMachine::new(
            ProviderLifecycle { env: Arc::clone(&env), waiter: Arc::clone(&waiter) },
            Arc::clone(&store),
        );
        Self { machine, store, node, env, asks, waiter, actor, peer_id, config }
    }

    /// Loads the persisted ask and resumes every in-flight deal.
    pub fn start(&self) -> Result<()> {
        self.asks.load()?;
        self.machine.restart()?;
        info!(actor = %self.actor, "storage provider started");
        Ok(())
    }

    pub fn stop(&self) {
        self.machine.stop();
        info!(actor = %self.actor, "storage provider stopped");
    }

    /// Intake for an inbound proposal from the deal stream: creates the
    /// record and opens the lifecycle.
    pub fn receive_proposal(&self, message: ProposalMessage, from: PeerId) -> Result<Cid> {
        let proposal_cid = message.deal_proposal.cid()?;
        let deal = ProviderDeal::new(message.deal_proposal, proposal_cid, message.piece, from, self.peer_id.clone());
        self.machine.begin(deal)?;
        self.machine.fire(proposal_cid, ProviderEvent::Open)?;
        Ok(proposal_cid)
    }

    /// Publishes a new ask at the current chain height, signed by the
    /// miner worker.
    pub async fn add_ask(&self, price: TokenAmount, duration: ChainEpoch, options: AskOptions) -> Result<()> {
        let (tok, epoch) = self.node.get_chain_head().await?;
        let worker = self.node.get_miner_worker_address(self.actor, &tok).await?;
        let ask = StorageAsk {
            price,
            min_piece_size: options.min_piece_size.unwrap_or(PaddedPieceSize(self.config.default_min_piece_size)),
            max_piece_size: options.max_piece_size.unwrap_or(PaddedPieceSize(self.config.default_max_piece_size)),
            miner: self.actor,
            timestamp: epoch,
            expiry: epoch + duration,
            seq_no: self.asks.next_seq_no(),
        };
        let plaintext = to_vec(&ask)?;
        let signature = self.node.sign_bytes(worker, &plaintext).await?;
        self.asks.set(SignedStorageAsk { ask, signature })
    }

    pub fn list_asks(&self, addr: &Address) -> Vec<SignedStorageAsk> {
        self.asks.list(addr)
    }

    /// Deals processed by this engine, terminal ones included.
    pub fn list_local_deals(&self) -> Result<Vec<ProviderDeal>> {
        self.store.list()
    }

    pub fn get_local_deal(&self, proposal: &Cid) -> Result<Option<ProviderDeal>> {
        self.store.get(proposal)
    }

    /// On-chain deals associated with this provider.
    pub async fn list_deals(&self) -> Result<Vec<StorageDeal>> {
        let (tok, _) = self.node.get_chain_head().await?;
        self.node.list_provider_deals(self.actor, &tok).await
    }

    /// Accepts out-of-band data for an offline deal waiting in
    /// `WaitingForData`, verifies the commitment, and resumes the flow.
    pub fn import_data_for_deal(&self, proposal: Cid, data: &mut dyn Read) -> Result<()> {
        let deal = self.store.get(&proposal)?.ok_or(MarketError::DealNotFound(proposal))?;
        if deal.state != DealStatus::WaitingForData {
            return Err(MarketError::UnexpectedDealStatus {
                proposal,
                status: deal.state.to_string(),
                expected: DealStatus::WaitingForData.to_string(),
            });
        }
        self.env.file_store().create(&proposal.to_string(), data)?;
        let commitment = self.env.generate_piece_commitment_to_file(&deal.data_ref.root, &TransferSelector::all_blocks())?;
        if commitment.piece_cid != deal.proposal.proposal.piece_cid {
            return Err(MarketError::msg("proposal CommP doesn't match calculated CommP"));
        }
        self.machine.fire(
            proposal,
            ProviderEvent::VerifiedData {
                piece_path: commitment.piece_path,
                metadata_path: commitment.metadata_path,
            },
        )
    }

    /// Intake for the bulk-transfer subsystem.
    pub fn on_data_transfer_completed(&self, proposal: Cid) -> Result<()> {
        self.machine.fire(proposal, ProviderEvent::DataTransferCompleted)
    }

    pub fn on_data_transfer_failed(&self, proposal: Cid, error: impl ToString) -> Result<()> {
        self.machine.fire(proposal, ProviderEvent::DataTransferFailed { error: error.to_string() })
    }

    pub async fn add_storage_collateral(&self, amount: TokenAmount) -> Result<()> {
        let mcid = self.node.add_funds(self.actor, amount).await?;
        let node = Arc::clone(&self.node);
        let receipt = self.waiter.wait(mcid, async move { node.wait_for_message(mcid).await }).await?;
        if receipt.exit_code.is_success() {
            Ok(())
        } else {
            Err(MarketError::NodeError(format!("AddFunds exit code: {}", exit_code_label(receipt.exit_code))))
        }
    }

    pub async fn get_storage_collateral(&self) -> Result<Balance> {
        let (tok, _) = self.node.get_chain_head().await?;
        self.node.get_balance(self.actor, &tok).await
    }

    pub fn subscribe_to_events(
        &self,
        callback: impl Fn(&ProviderEvent, &ProviderDeal) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.machine.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.machine.unsubscribe(id);
    }

    pub fn is_terminated(&self, deal: &ProviderDeal) -> bool {
        self.machine.is_terminated(deal)
    }
}
