//! Capability bundles handed to state handlers. Tests swap these for
//! recording fakes; production engines assemble them from the
//! infrastructure traits.

use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_encoding::to_vec;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;

use crate::application::ask::AskManager;
use crate::domain::ask::StorageAsk;
use crate::domain::deal::client::ClientDeal;
use crate::domain::message::{DealResponse, ProposalMessage, SignedResponse, TransferSelector, TransferVoucher};
use crate::foundation::{PeerId, Result};
use crate::infrastructure::commp::{PieceCommitment, PieceCommitmentGenerator};
use crate::infrastructure::filestore::FileStore;
use crate::infrastructure::network::{ClientNetwork, ProviderNetwork};
use crate::infrastructure::node::{StorageClientNode, StorageProviderNode};
use crate::infrastructure::piecestore::PieceStore;
use crate::infrastructure::transfer::TransferLauncher;

/// Capability surface a provider state handler consumes.
#[async_trait]
pub trait ProviderEnvironment: Send + Sync + 'static {
    /// Local provider actor address.
    fn address(&self) -> Address;

    /// Current ask policy snapshot.
    fn ask(&self) -> StorageAsk;

    fn node(&self) -> Arc<dyn StorageProviderNode>;

    fn file_store(&self) -> Arc<dyn FileStore>;

    fn piece_store(&self) -> Arc<dyn PieceStore>;

    fn deal_acceptance_buffer(&self) -> ChainEpoch;

    async fn start_data_transfer(
        &self,
        to: &PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        selector: TransferSelector,
    ) -> Result<()>;

    fn generate_piece_commitment_to_file(&self, payload: &Cid, selector: &TransferSelector) -> Result<PieceCommitment>;

    /// Signs the response with the miner worker key and sends it on the
    /// tagged connection.
    async fn send_signed_response(&self, response: DealResponse) -> Result<()>;

    fn tag_connection(&self, proposal: &Cid) -> Result<()>;

    fn disconnect(&self, proposal: &Cid) -> Result<()>;
}

/// Production provider environment assembled from the infrastructure
/// traits.
pub struct ProviderDealEnvironment {
    pub(crate) actor: Address,
    pub(crate) node: Arc<dyn StorageProviderNode>,
    pub(crate) asks: Arc<AskManager>,
    pub(crate) file_store: Arc<dyn FileStore>,
    pub(crate) piece_store: Arc<dyn PieceStore>,
    pub(crate) commp: Arc<dyn PieceCommitmentGenerator>,
    pub(crate) transfer: Arc<dyn TransferLauncher>,
    pub(crate) network: Arc<dyn ProviderNetwork>,
    pub(crate) acceptance_buffer: ChainEpoch,
}

#[async_trait]
impl ProviderEnvironment for ProviderDealEnvironment {
    fn address(&self) -> Address {
        self.actor
    }

    fn ask(&self) -> StorageAsk {
        self.asks.policy()
    }

    fn node(&self) -> Arc<dyn StorageProviderNode> {
        Arc::clone(&self.node)
    }

    fn file_store(&self) -> Arc<dyn FileStore> {
        Arc::clone(&self.file_store)
    }

    fn piece_store(&self) -> Arc<dyn PieceStore> {
        Arc::clone(&self.piece_store)
    }

    fn deal_acceptance_buffer(&self) -> ChainEpoch {
        self.acceptance_buffer
    }

    async fn start_data_transfer(
        &self,
        to: &PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        selector: TransferSelector,
    ) -> Result<()> {
        self.transfer.open_pull_channel(to, &voucher, &base_cid, &selector).await
    }

    fn generate_piece_commitment_to_file(&self, payload: &Cid, selector: &TransferSelector) -> Result<PieceCommitment> {
        self.commp.commitment_to_file(payload, selector)
    }

    async fn send_signed_response(&self, response: DealResponse) -> Result<()> {
        let (tok, _) = self.node.get_chain_head().await?;
        let worker = self.node.get_miner_worker_address(self.actor, &tok).await?;
        let plaintext = to_vec(&response)?;
        let signature = self.node.sign_bytes(worker, &plaintext).await?;
        let proposal = response.proposal;
        self.network.send_response(&proposal, &SignedResponse { response, signature }).await
    }

    fn tag_connection(&self, proposal: &Cid) -> Result<()> {
        self.network.tag_connection(proposal)
    }

    fn disconnect(&self, proposal: &Cid) -> Result<()> {
        self.network.disconnect(proposal)
    }
}

/// Capability surface a client state handler consumes.
#[async_trait]
pub trait ClientEnvironment: Send + Sync + 'static {
    fn node(&self) -> Arc<dyn StorageClientNode>;

    /// Opens (or reuses) the deal stream to the provider and writes the
    /// signed proposal.
    async fn write_proposal(&self, deal: &ClientDeal) -> Result<()>;

    async fn read_response(&self, proposal: &Cid) -> Result<SignedResponse>;

    async fn close_stream(&self, proposal: &Cid) -> Result<()>;
}

/// Production client environment assembled from the infrastructure traits.
pub struct ClientDealEnvironment {
    pub(crate) node: Arc<dyn StorageClientNode>,
    pub(crate) network: Arc<dyn ClientNetwork>,
}

#[async_trait]
impl ClientEnvironment for ClientDealEnvironment {
    fn node(&self) -> Arc<dyn StorageClientNode> {
        Arc::clone(&self.node)
    }

    async fn write_proposal(&self, deal: &ClientDeal) -> Result<()> {
        let message = ProposalMessage { deal_proposal: deal.proposal.clone(), piece: deal.data_ref.clone() };
        self.network.write_proposal(&deal.miner, &message).await
    }

    async fn read_response(&self, proposal: &Cid) -> Result<SignedResponse> {
        self.network.read_response(proposal).await
    }

    async fn close_stream(&self, proposal: &Cid) -> Result<()> {
        self.network.close_stream(proposal).await
    }
}
