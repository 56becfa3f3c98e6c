//! Client front: drives deals from proposal to activation against a
//! chosen provider.

use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::RegisteredSealProof;
use tracing::info;

use crate::application::client_states as states;
use crate::application::client_states::ClientCtx;
use crate::application::environment::{ClientDealEnvironment, ClientEnvironment};
use crate::application::machine::{DealLifecycle, DealMachine, EventSink};
use crate::application::subscribers::SubscriptionId;
use crate::domain::deal::client::{self as client_fsm, ClientDeal, ClientEvent};
use crate::domain::deal::proposal::DealProposal;
use crate::domain::deal::{DataRef, DealStatus, Rule, StorageDeal};
use crate::foundation::{MarketError, Result};
use crate::infrastructure::commp::PieceCommitmentGenerator;
use crate::infrastructure::network::ClientNetwork;
use crate::infrastructure::node::waiter::MessageWaiter;
use crate::infrastructure::node::{exit_code_label, Balance, StorageClientNode, StorageProviderInfo};
use crate::infrastructure::storage::DealStore;

/// Glue between the generic engine and the client tables and handlers.
pub struct ClientLifecycle {
    env: Arc<dyn ClientEnvironment>,
    waiter: Arc<MessageWaiter>,
}

impl ClientLifecycle {
    pub fn new(env: Arc<dyn ClientEnvironment>, waiter: Arc<MessageWaiter>) -> Self {
        Self { env, waiter }
    }
}

#[async_trait]
impl DealLifecycle for ClientLifecycle {
    type Deal = ClientDeal;
    type Event = ClientEvent;

    fn event_name(event: &ClientEvent) -> &'static str {
        event.name()
    }

    fn transition(status: DealStatus, event: &ClientEvent) -> Rule {
        client_fsm::transition(status, event)
    }

    fn apply(deal: &mut ClientDeal, event: &ClientEvent) {
        client_fsm::apply(deal, event)
    }

    fn restart_event() -> ClientEvent {
        ClientEvent::Restart
    }

    async fn on_entered(&self, deal: ClientDeal, events: EventSink<ClientEvent>) {
        let ctx = ClientCtx { env: Arc::clone(&self.env), waiter: Arc::clone(&self.waiter), events };
        match deal.state {
            DealStatus::EnsureClientFunds => states::ensure_client_funds(&ctx, deal).await,
            DealStatus::ClientFunding => states::wait_for_funding(&ctx, deal).await,
            DealStatus::FundsEnsured => states::propose_deal(&ctx, deal).await,
            DealStatus::Validating => states::verify_response(&ctx, deal).await,
            DealStatus::ProposalAccepted => states::validate_deal_published(&ctx, deal).await,
            DealStatus::Sealing => states::verify_deal_activated(&ctx, deal).await,
            DealStatus::Active => states::complete_deal(&ctx, deal).await,
            DealStatus::Failing => states::fail_deal(&ctx, deal).await,
            _ => {}
        }
    }
}

/// Outcome of a propose call: the identifier both sides will use for the
/// deal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProposeDealResult {
    pub proposal_cid: Cid,
}

/// The storage client engine.
pub struct StorageClient {
    machine: DealMachine<ClientLifecycle>,
    store: Arc<dyn DealStore<ClientDeal>>,
    node: Arc<dyn StorageClientNode>,
    commp: Arc<dyn PieceCommitmentGenerator>,
    waiter: Arc<MessageWaiter>,
}

impl StorageClient {
    pub fn new(
        node: Arc<dyn StorageClientNode>,
        store: Arc<dyn DealStore<ClientDeal>>,
        network: Arc<dyn ClientNetwork>,
        commp: Arc<dyn PieceCommitmentGenerator>,
    ) -> Self {
        let waiter = MessageWaiter::new();
        let env: Arc<dyn ClientEnvironment> =
            Arc::new(ClientDealEnvironment { node: Arc::clone(&node), network });
        let machine = DealMachine::new(
            ClientLifecycle { env, waiter: Arc::clone(&waiter) },
            Arc::clone(&store),
        );
        Self { machine, store, node, commp, waiter }
    }

    /// Resumes every in-flight deal.
    pub fn start(&self) -> Result<()> {
        self.machine.restart()?;
        info!("storage client started");
        Ok(())
    }

    pub fn stop(&self) {
        self.machine.stop();
        info!("storage client stopped");
    }

    /// Initiates negotiation with a provider: builds and signs the
    /// proposal, persists the record, and opens the lifecycle.
    #[allow(clippy::too_many_arguments)]
    pub async fn propose_storage_deal(
        &self,
        addr: Address,
        info: &StorageProviderInfo,
        data: DataRef,
        start_epoch: ChainEpoch,
        end_epoch: ChainEpoch,
        price: TokenAmount,
        collateral: TokenAmount,
        proof: RegisteredSealProof,
    ) -> Result<ProposeDealResult> {
        let (piece_cid, piece_size) = if data.is_manual() {
            let piece_cid = data
                .piece_cid
                .ok_or_else(|| MarketError::msg("manual transfer requires a piece commitment in the data ref"))?;
            (piece_cid, data.piece_size)
        } else {
            self.commp.commitment_for_data(&data.root, proof)?
        };

        let proposal = DealProposal {
            piece_cid,
            piece_size: piece_size.padded(),
            client: addr,
            provider: info.address,
            start_epoch,
            end_epoch,
            storage_price_per_epoch: price,
            provider_collateral: collateral,
            client_collateral: TokenAmount::from_atto(0),
        };
        let signed = self.node.sign_proposal(addr, proposal).await?;
        let proposal_cid = signed.cid()?;
        let deal = ClientDeal::new(signed, proposal_cid, data, info.peer_id.clone(), info.worker);
        self.machine.begin(deal)?;
        self.machine.fire(proposal_cid, ClientEvent::Open)?;
        Ok(ProposeDealResult { proposal_cid })
    }

    /// Active storage providers known to the chain.
    pub async fn list_providers(&self) -> Result<Vec<StorageProviderInfo>> {
        let (tok, _) = self.node.get_chain_head().await?;
        self.node.list_storage_providers(&tok).await
    }

    /// On-chain deals associated with `addr`.
    pub async fn list_deals(&self, addr: Address) -> Result<Vec<StorageDeal>> {
        let (tok, _) = self.node.get_chain_head().await?;
        self.node.list_client_deals(addr, &tok).await
    }

    /// Deals initiated by this engine, terminal ones included.
    pub fn list_local_deals(&self) -> Result<Vec<ClientDeal>> {
        self.store.list()
    }

    pub fn get_local_deal(&self, proposal: &Cid) -> Result<ClientDeal> {
        self.store.get(proposal)?.ok_or(MarketError::DealNotFound(*proposal))
    }

    pub async fn get_payment_escrow(&self, addr: Address) -> Result<Balance> {
        let (tok, _) = self.node.get_chain_head().await?;
        self.node.get_balance(addr, &tok).await
    }

    pub async fn add_payment_escrow(&self, addr: Address, amount: TokenAmount) -> Result<()> {
        let mcid = self.node.add_funds(addr, amount).await?;
        let node = Arc::clone(&self.node);
        let receipt = self.waiter.wait(mcid, async move { node.wait_for_message(mcid).await }).await?;
        if receipt.exit_code.is_success() {
            Ok(())
        } else {
            Err(MarketError::NodeError(format!("AddFunds exit code: {}", exit_code_label(receipt.exit_code))))
        }
    }

    pub fn subscribe_to_events(
        &self,
        callback: impl Fn(&ClientEvent, &ClientDeal) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.machine.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.machine.unsubscribe(id);
    }

    pub fn is_terminated(&self, deal: &ClientDeal) -> bool {
        self.machine.is_terminated(deal)
    }
}
