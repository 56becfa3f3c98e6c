#![allow(dead_code)]

//! Shared builders and recording fakes for the engine integration tests.
//! Defaults are aligned so a deal can walk every provider handler without
//! errors; individual tests override single knobs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cid::Cid;
use multihash::{Code, MultihashDigest};
use fvm_ipld_encoding::{to_vec, DAG_CBOR};
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::econ::TokenAmount;
use fvm_shared::piece::{PaddedPieceSize, UnpaddedPieceSize};

use market_core::application::environment::{ClientEnvironment, ProviderEnvironment};
use market_core::application::machine::{DealLifecycle, DealMachine};
use market_core::domain::ask::StorageAsk;
use market_core::domain::deal::client::ClientDeal;
use market_core::domain::deal::proposal::{ClientDealProposal, DealProposal};
use market_core::domain::deal::provider::ProviderDeal;
use market_core::domain::deal::{transfer_type, DataRef, DealRecord, DealStatus};
use market_core::domain::message::{
    DealResponse, SignedResponse, TransferSelector, TransferVoucher,
};
use market_core::foundation::{FilePath, MarketError, PeerId, Result};
use market_core::infrastructure::commp::PieceCommitment;
use market_core::infrastructure::filestore::{FileStore, MemoryFileStore};
use market_core::infrastructure::node::fake::{FakeClientNode, FakeProviderNode};
use market_core::infrastructure::node::{StorageClientNode, StorageProviderNode};
use market_core::infrastructure::piecestore::{BlockLocation, BlockRecord, MemoryPieceStore, PieceStore};
use market_core::infrastructure::storage::memory::MemoryDealStore;
use market_core::infrastructure::storage::DealStore;

pub const DEFAULT_HEIGHT: ChainEpoch = 50;
pub const DEFAULT_TIPSET_TOKEN: &[u8] = &[1, 2, 3];
pub const DEFAULT_START_EPOCH: ChainEpoch = 200;
pub const DEFAULT_END_EPOCH: ChainEpoch = 400;
pub const DEFAULT_PIECE_SIZE: u64 = 1 << 20;
pub const DEFAULT_CLIENT_BALANCE: i64 = 200 * 10_000;

pub fn cid_of(data: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(data))
}

pub fn client_address() -> Address {
    Address::new_id(100)
}

pub fn provider_address() -> Address {
    Address::new_id(200)
}

pub fn worker_address() -> Address {
    Address::new_id(201)
}

pub fn default_piece_cid() -> Cid {
    cid_of(b"default-piece")
}

pub fn default_payload_cid() -> Cid {
    cid_of(b"default-payload")
}

pub fn piece_path() -> FilePath {
    FilePath::new("file.txt")
}

pub fn metadata_path() -> FilePath {
    FilePath::new("metadataPath.txt")
}

pub fn default_ask() -> StorageAsk {
    StorageAsk {
        price: TokenAmount::from_atto(10_000_000),
        min_piece_size: PaddedPieceSize(256),
        max_piece_size: PaddedPieceSize(1 << 20),
        miner: provider_address(),
        timestamp: 0,
        expiry: 1_000,
        seq_no: 0,
    }
}

pub fn default_proposal() -> DealProposal {
    DealProposal {
        piece_cid: default_piece_cid(),
        piece_size: PaddedPieceSize(DEFAULT_PIECE_SIZE),
        client: client_address(),
        provider: provider_address(),
        start_epoch: DEFAULT_START_EPOCH,
        end_epoch: DEFAULT_END_EPOCH,
        storage_price_per_epoch: TokenAmount::from_atto(10_000),
        provider_collateral: TokenAmount::from_atto(0),
        client_collateral: TokenAmount::from_atto(0),
    }
}

pub fn signed_proposal(proposal: DealProposal) -> ClientDealProposal {
    ClientDealProposal { proposal, client_signature: Signature::new_bls(vec![7; 8]) }
}

pub fn graphsync_data_ref() -> DataRef {
    DataRef {
        transfer_type: transfer_type::GRAPHSYNC.to_string(),
        root: default_payload_cid(),
        piece_cid: None,
        piece_size: UnpaddedPieceSize(0),
    }
}

pub fn manual_data_ref() -> DataRef {
    DataRef {
        transfer_type: transfer_type::MANUAL.to_string(),
        root: default_payload_cid(),
        piece_cid: Some(default_piece_cid()),
        piece_size: UnpaddedPieceSize(1_016_000),
    }
}

pub fn provider_deal_in(status: DealStatus, proposal: DealProposal, data_ref: DataRef) -> ProviderDeal {
    let signed = signed_proposal(proposal);
    let proposal_cid = signed.cid().unwrap();
    let mut deal =
        ProviderDeal::new(signed, proposal_cid, data_ref, PeerId::new("client-peer"), PeerId::new("miner-peer"));
    deal.state = status;
    deal
}

pub fn client_deal_in(status: DealStatus, proposal: DealProposal, data_ref: DataRef) -> ClientDeal {
    let signed = signed_proposal(proposal);
    let proposal_cid = signed.cid().unwrap();
    let mut deal = ClientDeal::new(signed, proposal_cid, data_ref, PeerId::new("miner-peer"), worker_address());
    deal.state = status;
    deal
}

pub fn block_records() -> Vec<BlockRecord> {
    vec![
        BlockRecord { block: cid_of(b"block-0"), location: BlockLocation { rel_offset: 0, block_size: 400 } },
        BlockRecord { block: cid_of(b"block-1"), location: BlockLocation { rel_offset: 400, block_size: 112 } },
    ]
}

pub fn metadata_bytes() -> Vec<u8> {
    to_vec(&block_records()).unwrap()
}

/// Provider node wired with the default market picture: head at epoch 50
/// and the client balance covering the default deal.
pub fn default_provider_node() -> FakeProviderNode {
    let node = FakeProviderNode { miner_worker: worker_address(), ..Default::default() };
    {
        let mut state = node.common.state.lock().unwrap();
        state.epoch = DEFAULT_HEIGHT;
        state.tipset_token = DEFAULT_TIPSET_TOKEN.to_vec();
        state.add_funds(client_address(), TokenAmount::from_atto(DEFAULT_CLIENT_BALANCE));
    }
    node
}

/// Recording fake of the provider environment, mirroring the shape the
/// production environment exposes to handlers.
pub struct FakeProviderEnv {
    pub node: Arc<FakeProviderNode>,
    pub file_store: Arc<MemoryFileStore>,
    pub piece_store: Arc<MemoryPieceStore>,
    pub address: Address,
    pub ask: StorageAsk,
    pub acceptance_buffer: ChainEpoch,
    pub data_transfer_error: Option<String>,
    pub commp_piece_cid: Cid,
    pub commp_piece_path: FilePath,
    pub commp_metadata_path: FilePath,
    pub generate_commp_error: Option<String>,
    pub send_response_error: Option<String>,
    pub disconnect_error: Option<String>,
    pub tagged: Mutex<Vec<Cid>>,
    pub transfers: Mutex<Vec<(PeerId, TransferVoucher, Cid)>>,
    pub responses: Mutex<Vec<DealResponse>>,
}

impl Default for FakeProviderEnv {
    fn default() -> Self {
        Self {
            node: Arc::new(default_provider_node()),
            file_store: Arc::new(MemoryFileStore::new()),
            piece_store: Arc::new(MemoryPieceStore::new()),
            address: provider_address(),
            ask: default_ask(),
            acceptance_buffer: 0,
            data_transfer_error: None,
            commp_piece_cid: default_piece_cid(),
            commp_piece_path: piece_path(),
            commp_metadata_path: metadata_path(),
            generate_commp_error: None,
            send_response_error: None,
            disconnect_error: None,
            tagged: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProviderEnv {
    pub fn tagged_proposals(&self) -> Vec<Cid> {
        self.tagged.lock().unwrap().clone()
    }

    pub fn sent_responses(&self) -> Vec<DealResponse> {
        self.responses.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderEnvironment for FakeProviderEnv {
    fn address(&self) -> Address {
        self.address
    }

    fn ask(&self) -> StorageAsk {
        self.ask.clone()
    }

    fn node(&self) -> Arc<dyn StorageProviderNode> {
        self.node.clone()
    }

    fn file_store(&self) -> Arc<dyn FileStore> {
        self.file_store.clone()
    }

    fn piece_store(&self) -> Arc<dyn PieceStore> {
        self.piece_store.clone()
    }

    fn deal_acceptance_buffer(&self) -> ChainEpoch {
        self.acceptance_buffer
    }

    async fn start_data_transfer(
        &self,
        to: &PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        _selector: TransferSelector,
    ) -> Result<()> {
        if let Some(err) = &self.data_transfer_error {
            return Err(MarketError::msg(err.clone()));
        }
        self.transfers.lock().unwrap().push((to.clone(), voucher, base_cid));
        Ok(())
    }

    fn generate_piece_commitment_to_file(&self, _payload: &Cid, _selector: &TransferSelector) -> Result<PieceCommitment> {
        if let Some(err) = &self.generate_commp_error {
            return Err(MarketError::msg(err.clone()));
        }
        Ok(PieceCommitment {
            piece_cid: self.commp_piece_cid,
            piece_path: self.commp_piece_path.clone(),
            metadata_path: self.commp_metadata_path.clone(),
        })
    }

    async fn send_signed_response(&self, response: DealResponse) -> Result<()> {
        if let Some(err) = &self.send_response_error {
            return Err(MarketError::msg(err.clone()));
        }
        self.responses.lock().unwrap().push(response);
        Ok(())
    }

    fn tag_connection(&self, proposal: &Cid) -> Result<()> {
        self.tagged.lock().unwrap().push(*proposal);
        Ok(())
    }

    fn disconnect(&self, proposal: &Cid) -> Result<()> {
        let _ = proposal;
        match &self.disconnect_error {
            Some(err) => Err(MarketError::msg(err.clone())),
            None => Ok(()),
        }
    }
}

/// Recording fake of the client environment. Responses echo the requested
/// proposal identifier unless `respond_proposal_override` is set.
pub struct FakeClientEnv {
    pub node: Arc<FakeClientNode>,
    pub write_proposal_error: Option<String>,
    pub read_response_error: Option<String>,
    pub close_stream_error: Option<String>,
    pub respond_state: DealStatus,
    pub respond_message: String,
    pub respond_publish_message: Option<Cid>,
    pub respond_proposal_override: Option<Cid>,
    pub written: Mutex<Vec<Cid>>,
    pub closed: Mutex<Vec<Cid>>,
}

impl Default for FakeClientEnv {
    fn default() -> Self {
        let node = FakeClientNode { client_addr: client_address(), ..Default::default() };
        {
            let mut state = node.common.state.lock().unwrap();
            state.epoch = DEFAULT_HEIGHT;
            state.tipset_token = DEFAULT_TIPSET_TOKEN.to_vec();
            state.add_funds(client_address(), TokenAmount::from_atto(DEFAULT_CLIENT_BALANCE));
        }
        Self {
            node: Arc::new(node),
            write_proposal_error: None,
            read_response_error: None,
            close_stream_error: None,
            respond_state: DealStatus::ProposalAccepted,
            respond_message: String::new(),
            respond_publish_message: Some(cid_of(b"publish-message")),
            respond_proposal_override: None,
            written: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ClientEnvironment for FakeClientEnv {
    fn node(&self) -> Arc<dyn StorageClientNode> {
        self.node.clone()
    }

    async fn write_proposal(&self, deal: &ClientDeal) -> Result<()> {
        if let Some(err) = &self.write_proposal_error {
            return Err(MarketError::msg(err.clone()));
        }
        self.written.lock().unwrap().push(deal.proposal_cid);
        Ok(())
    }

    async fn read_response(&self, proposal: &Cid) -> Result<SignedResponse> {
        if let Some(err) = &self.read_response_error {
            return Err(MarketError::msg(err.clone()));
        }
        let response = DealResponse {
            state: self.respond_state,
            message: self.respond_message.clone(),
            proposal: self.respond_proposal_override.unwrap_or(*proposal),
            publish_message: self.respond_publish_message,
        };
        Ok(SignedResponse { response, signature: Signature::new_bls(vec![9; 8]) })
    }

    async fn close_stream(&self, proposal: &Cid) -> Result<()> {
        if let Some(err) = &self.close_stream_error {
            return Err(MarketError::msg(err.clone()));
        }
        self.closed.lock().unwrap().push(*proposal);
        Ok(())
    }
}

/// Event trail recorded by a subscriber: event name plus the record
/// snapshot observed with it.
pub type Trail<D> = Arc<Mutex<Vec<(String, D)>>>;

pub fn record_trail<L>(machine: &DealMachine<L>) -> Trail<L::Deal>
where
    L: DealLifecycle,
{
    let trail: Trail<L::Deal> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&trail);
    machine.subscribe(move |event, deal| {
        sink.lock().unwrap().push((L::event_name(event).to_string(), deal.clone()));
    });
    trail
}

/// Polls the trail until an event with `name` shows up and returns the
/// snapshot observed with it; panics after two seconds.
pub async fn wait_for_event<D: Clone>(trail: &Trail<D>, name: &str) -> D {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Some((_, deal)) = trail.lock().unwrap().iter().find(|(event, _)| event == name) {
            return deal.clone();
        }
        if tokio::time::Instant::now() > deadline {
            let seen: Vec<String> = trail.lock().unwrap().iter().map(|(event, _)| event.clone()).collect();
            panic!("event {name} never observed, saw {seen:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn trail_names<D>(trail: &Trail<D>) -> Vec<String> {
    trail.lock().unwrap().iter().map(|(event, _)| event.clone()).collect()
}

/// Polls the store until the record satisfies `pred`; panics after two
/// seconds with the state it last saw.
pub async fn settle<D, F>(store: &Arc<dyn DealStore<D>>, proposal: Cid, pred: F) -> D
where
    D: DealRecord,
    F: Fn(&D) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(deal) = store.get(&proposal).unwrap() {
            if pred(&deal) {
                return deal;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("deal {} did not settle, state {}", proposal, deal.status());
            }
        } else if tokio::time::Instant::now() > deadline {
            panic!("deal {} never appeared in the store", proposal);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn memory_store<D: DealRecord>() -> Arc<dyn DealStore<D>> {
    Arc::new(MemoryDealStore::new())
}

/// Commitment generator answering with fixed values.
pub struct FakeCommp {
    pub piece_cid: Cid,
    pub piece_size: UnpaddedPieceSize,
    pub piece_path: FilePath,
    pub metadata_path: FilePath,
}

impl Default for FakeCommp {
    fn default() -> Self {
        Self {
            piece_cid: default_piece_cid(),
            piece_size: UnpaddedPieceSize(1_016_000),
            piece_path: piece_path(),
            metadata_path: metadata_path(),
        }
    }
}

impl market_core::infrastructure::commp::PieceCommitmentGenerator for FakeCommp {
    fn commitment_for_data(
        &self,
        _payload: &Cid,
        _proof: fvm_shared::sector::RegisteredSealProof,
    ) -> Result<(Cid, UnpaddedPieceSize)> {
        Ok((self.piece_cid, self.piece_size))
    }

    fn commitment_to_file(&self, _payload: &Cid, _selector: &TransferSelector) -> Result<PieceCommitment> {
        Ok(PieceCommitment {
            piece_cid: self.piece_cid,
            piece_path: self.piece_path.clone(),
            metadata_path: self.metadata_path.clone(),
        })
    }
}

/// Transfer launcher recording every opened channel.
#[derive(Default)]
pub struct FakeTransferLauncher {
    pub channels: Mutex<Vec<(PeerId, Cid)>>,
}

#[async_trait]
impl market_core::infrastructure::transfer::TransferLauncher for FakeTransferLauncher {
    async fn open_pull_channel(
        &self,
        to: &PeerId,
        _voucher: &TransferVoucher,
        base_cid: &Cid,
        _selector: &TransferSelector,
    ) -> Result<()> {
        self.channels.lock().unwrap().push((to.clone(), *base_cid));
        Ok(())
    }
}

/// Provider network recording sent responses and connection tags.
#[derive(Default)]
pub struct FakeProviderNetwork {
    pub responses: Mutex<Vec<SignedResponse>>,
    pub tagged: Mutex<Vec<Cid>>,
}

#[async_trait]
impl market_core::infrastructure::network::ProviderNetwork for FakeProviderNetwork {
    async fn send_response(&self, _proposal: &Cid, response: &SignedResponse) -> Result<()> {
        self.responses.lock().unwrap().push(response.clone());
        Ok(())
    }

    fn tag_connection(&self, proposal: &Cid) -> Result<()> {
        self.tagged.lock().unwrap().push(*proposal);
        Ok(())
    }

    fn disconnect(&self, _proposal: &Cid) -> Result<()> {
        Ok(())
    }
}

/// Client network echoing an acceptance for whatever proposal is asked.
#[derive(Default)]
pub struct FakeClientNetwork {
    pub written: Mutex<Vec<Cid>>,
    pub publish_message: Option<Cid>,
}

#[async_trait]
impl market_core::infrastructure::network::ClientNetwork for FakeClientNetwork {
    async fn write_proposal(
        &self,
        _provider: &PeerId,
        message: &market_core::domain::message::ProposalMessage,
    ) -> Result<()> {
        self.written.lock().unwrap().push(message.deal_proposal.cid().unwrap());
        Ok(())
    }

    async fn read_response(&self, proposal: &Cid) -> Result<SignedResponse> {
        let response = DealResponse {
            state: DealStatus::ProposalAccepted,
            message: String::new(),
            proposal: *proposal,
            publish_message: self.publish_message,
        };
        Ok(SignedResponse { response, signature: Signature::new_bls(vec![9; 8]) })
    }

    async fn close_stream(&self, _proposal: &Cid) -> Result<()> {
        Ok(())
    }
}
