//! Provider-side deal record, event set, and transition table.
//!
//! The table is the single source of truth for which events are legal in
//! which state and which fields an accepted event stamps onto the record.
//! Event actions are pure; all I/O lives in the state handlers.

use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::deal::DealID;

use crate::domain::deal::proposal::ClientDealProposal;
use crate::domain::deal::{declared_from, DataRef, DealRecord, DealStatus, Rule};
use crate::foundation::{FilePath, PeerId};

/// Durable record of a deal as seen by the storage provider.
#[derive(Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct ProviderDeal {
    pub proposal: ClientDealProposal,
    pub proposal_cid: Cid,
    pub add_funds_cid: Option<Cid>,
    pub publish_cid: Option<Cid>,
    /// Peer that sent the proposal.
    pub client: PeerId,
    /// Local peer identity the proposal arrived on.
    pub miner: PeerId,
    pub state: DealStatus,
    pub piece_path: FilePath,
    pub metadata_path: FilePath,
    /// Once true, no further signed responses are sent for this deal.
    pub connection_closed: bool,
    /// User-visible failure diagnostic; empty unless the deal is failing.
    pub message: String,
    pub data_ref: DataRef,
    pub deal_id: DealID,
}

impl ProviderDeal {
    pub fn new(proposal: ClientDealProposal, proposal_cid: Cid, data_ref: DataRef, client: PeerId, miner: PeerId) -> Self {
        Self {
            proposal,
            proposal_cid,
            add_funds_cid: None,
            publish_cid: None,
            client,
            miner,
            state: DealStatus::Unknown,
            piece_path: FilePath::default(),
            metadata_path: FilePath::default(),
            connection_closed: false,
            message: String::new(),
            data_ref,
            deal_id: 0,
        }
    }
}

impl DealRecord for ProviderDeal {
    fn proposal_cid(&self) -> Cid {
        self.proposal_cid
    }

    fn status(&self) -> DealStatus {
        self.state
    }

    fn set_status(&mut self, status: DealStatus) {
        self.state = status;
    }
}

/// Stimuli the provider state machine reacts to.
#[derive(Clone, Debug)]
pub enum ProviderEvent {
    /// A new deal proposal was accepted into the engine.
    Open,
    /// Talking to the chain node failed; applies from any state.
    NodeErrored { error: String },
    /// The proposal failed a validation policy.
    DealRejected { reason: String },
    DealAccepted,
    /// Offline deal accepted; data arrives out of band.
    WaitingForManualData,
    DataTransferFailed { error: String },
    DataTransferInitiated,
    DataTransferCompleted,
    GeneratePieceCidFailed { error: String },
    /// Received data matches the proposal piece commitment.
    VerifiedData { piece_path: FilePath, metadata_path: FilePath },
    /// Provider collateral top-up has been submitted on chain.
    FundingInitiated { message_cid: Cid },
    Funded,
    /// The publish message has been submitted on chain.
    PublishInitiated { message_cid: Cid },
    PublishError { error: String },
    SendResponseFailed { error: String },
    /// The deal appeared on chain under the given id.
    Published { deal_id: DealID },
    FileStoreErrored { error: String },
    HandoffFailed { error: String },
    HandedOff,
    ActivationFailed { error: String },
    Activated,
    PieceStoreErrored { error: String },
    ReadMetadataErrored { error: String },
    UnableToLocatePiece { deal_id: DealID, error: String },
    Completed,
    Failed,
    /// Synthetic event fired per record when the engine restarts.
    Restart,
}

impl ProviderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderEvent::Open => "ProviderEventOpen",
            ProviderEvent::NodeErrored { .. } => "ProviderEventNodeErrored",
            ProviderEvent::DealRejected { .. } => "ProviderEventDealRejected",
            ProviderEvent::DealAccepted => "ProviderEventDealAccepted",
            ProviderEvent::WaitingForManualData => "ProviderEventWaitingForManualData",
            ProviderEvent::DataTransferFailed { .. } => "ProviderEventDataTransferFailed",
            ProviderEvent::DataTransferInitiated => "ProviderEventDataTransferInitiated",
            ProviderEvent::DataTransferCompleted => "ProviderEventDataTransferCompleted",
            ProviderEvent::GeneratePieceCidFailed { .. } => "ProviderEventGeneratePieceCIDFailed",
            ProviderEvent::VerifiedData { .. } => "ProviderEventVerifiedData",
            ProviderEvent::FundingInitiated { .. } => "ProviderEventFundingInitiated",
            ProviderEvent::Funded => "ProviderEventFunded",
            ProviderEvent::PublishInitiated { .. } => "ProviderEventDealPublishInitiated",
            ProviderEvent::PublishError { .. } => "ProviderEventDealPublishError",
            ProviderEvent::SendResponseFailed { .. } => "ProviderEventSendResponseFailed",
            ProviderEvent::Published { .. } => "ProviderEventDealPublished",
            ProviderEvent::FileStoreErrored { .. } => "ProviderEventFileStoreErrored",
            ProviderEvent::HandoffFailed { .. } => "ProviderEventDealHandoffFailed",
            ProviderEvent::HandedOff => "ProviderEventDealHandedOff",
            ProviderEvent::ActivationFailed { .. } => "ProviderEventDealActivationFailed",
            ProviderEvent::Activated => "ProviderEventDealActivated",
            ProviderEvent::PieceStoreErrored { .. } => "ProviderEventPieceStoreErrored",
            ProviderEvent::ReadMetadataErrored { .. } => "ProviderEventReadMetadataErrored",
            ProviderEvent::UnableToLocatePiece { .. } => "ProviderEventUnableToLocatePiece",
            ProviderEvent::Completed => "ProviderEventDealCompleted",
            ProviderEvent::Failed => "ProviderEventFailed",
            ProviderEvent::Restart => "ProviderEventRestart",
        }
    }
}

/// Transition-table lookup: which states declare `event`, and where it
/// leads. Terminality is checked by the engine before consulting this.
pub fn transition(status: DealStatus, event: &ProviderEvent) -> Rule {
    use DealStatus as S;
    use ProviderEvent as E;
    match event {
        E::Open => declared_from(status, &[S::Unknown], S::Validating),
        E::NodeErrored { .. } => Rule::Goto(S::Failing),
        E::DealRejected { .. } => declared_from(status, &[S::Validating, S::VerifyData], S::Failing),
        E::DealAccepted => declared_from(status, &[S::Validating], S::ProposalAccepted),
        E::WaitingForManualData => declared_from(status, &[S::ProposalAccepted], S::WaitingForData),
        E::DataTransferFailed { .. } => declared_from(status, &[S::ProposalAccepted, S::Transferring], S::Failing),
        E::DataTransferInitiated => declared_from(status, &[S::ProposalAccepted], S::Transferring),
        E::DataTransferCompleted => declared_from(status, &[S::Transferring], S::VerifyData),
        E::GeneratePieceCidFailed { .. } => declared_from(status, &[S::VerifyData], S::Failing),
        E::VerifiedData { .. } => declared_from(status, &[S::VerifyData, S::WaitingForData], S::EnsureProviderFunds),
        E::FundingInitiated { .. } => declared_from(status, &[S::EnsureProviderFunds], S::ProviderFunding),
        E::Funded => declared_from(status, &[S::ProviderFunding, S::EnsureProviderFunds], S::Publish),
        E::PublishInitiated { .. } => declared_from(status, &[S::Publish], S::Publishing),
        E::PublishError { .. } => declared_from(status, &[S::Publishing], S::Failing),
        E::SendResponseFailed { .. } => declared_from(status, &[S::Publishing, S::Failing], S::Error),
        E::Published { .. } => declared_from(status, &[S::Publishing], S::Staged),
        E::FileStoreErrored { .. } => declared_from(status, &[S::Staged, S::Sealing, S::Active], S::Failing),
        E::HandoffFailed { .. } => declared_from(status, &[S::Staged], S::Failing),
        E::HandedOff => declared_from(status, &[S::Staged], S::Sealing),
        E::ActivationFailed { .. } => declared_from(status, &[S::Sealing], S::Failing),
        E::Activated => declared_from(status, &[S::Sealing], S::Active),
        E::PieceStoreErrored { .. } => declared_from(status, &[S::Active], S::Failing),
        E::ReadMetadataErrored { .. } => declared_from(status, &[S::Active], S::Failing),
        E::UnableToLocatePiece { .. } => declared_from(status, &[S::Active], S::Failing),
        E::Completed => declared_from(status, &[S::Active], S::Completed),
        E::Failed => declared_from(status, &[S::Failing], S::Error),
        E::Restart => Rule::Reenter,
    }
}

/// Pure record mutation attached to an accepted event.
pub fn apply(deal: &mut ProviderDeal, event: &ProviderEvent) {
    use ProviderEvent as E;
    match event {
        E::NodeErrored { error } => deal.message = format!("error calling node: {error}"),
        E::DealRejected { reason } => deal.message = format!("deal rejected: {reason}"),
        E::DataTransferFailed { error } => deal.message = format!("error transferring data: {error}"),
        E::GeneratePieceCidFailed { error } => deal.message = format!("generating piece committment: {error}"),
        E::VerifiedData { piece_path, metadata_path } => {
            deal.piece_path = piece_path.clone();
            deal.metadata_path = metadata_path.clone();
        }
        E::FundingInitiated { message_cid } => {
            // Once set, the funds message identifier is never overwritten.
            if deal.add_funds_cid.is_none() {
                deal.add_funds_cid = Some(*message_cid);
            }
        }
        E::PublishInitiated { message_cid } => {
            if deal.publish_cid.is_none() {
                deal.publish_cid = Some(*message_cid);
            }
        }
        E::PublishError { error } => deal.message = format!("PublishStorageDeal error: {error}"),
        E::SendResponseFailed { error } => deal.message = format!("sending response to deal: {error}"),
        E::Published { deal_id } => {
            deal.connection_closed = true;
            deal.deal_id = *deal_id;
        }
        E::FileStoreErrored { error } => deal.message = format!("accessing file store: {error}"),
        E::HandoffFailed { error } => deal.message = format!("handing off deal to node: {error}"),
        E::ActivationFailed { error } => deal.message = format!("error activating deal: {error}"),
        E::PieceStoreErrored { error } => deal.message = format!("accessing piece store: {error}"),
        E::ReadMetadataErrored { error } => deal.message = format!("error reading piece metadata: {error}"),
        E::UnableToLocatePiece { deal_id, error } => {
            deal.message = format!("locating piece for deal ID {deal_id} in sector: {error}")
        }
        _ => {}
    }
}
