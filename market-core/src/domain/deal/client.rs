//! Client-side deal record, event set, and transition table.

use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::deal::DealID;

use crate::domain::deal::proposal::ClientDealProposal;
use crate::domain::deal::{declared_from, DataRef, DealRecord, DealStatus, Rule};
use crate::foundation::PeerId;

/// Durable record of a deal as seen by the storage client.
#[derive(Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct ClientDeal {
    pub proposal: ClientDealProposal,
    pub proposal_cid: Cid,
    pub add_funds_cid: Option<Cid>,
    /// Publish message reported by the provider in its response.
    pub publish_message: Option<Cid>,
    /// Peer identity of the provider.
    pub miner: PeerId,
    /// On-chain identity the provider signs responses with.
    pub miner_worker: Address,
    pub state: DealStatus,
    pub data_ref: DataRef,
    pub connection_closed: bool,
    pub message: String,
    pub deal_id: DealID,
}

impl ClientDeal {
    pub fn new(
        proposal: ClientDealProposal,
        proposal_cid: Cid,
        data_ref: DataRef,
        miner: PeerId,
        miner_worker: Address,
    ) -> Self {
        Self {
            proposal,
            proposal_cid,
            add_funds_cid: None,
            publish_message: None,
            miner,
            miner_worker,
            state: DealStatus::Unknown,
            data_ref,
            connection_closed: false,
            message: String::new(),
            deal_id: 0,
        }
    }
}

impl DealRecord for ClientDeal {
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

/// Stimuli the client state machine reacts to.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// A local propose call created the deal.
    Open,
    /// Market escrow top-up has been submitted on chain.
    FundingInitiated { message_cid: Cid },
    EnsureFundsFailed { error: String },
    FundsEnsured,
    WriteProposalFailed { error: String },
    /// The signed proposal went out to the provider.
    DealProposed,
    ReadResponseFailed { error: String },
    ResponseVerificationFailed,
    /// The provider answered for a different proposal.
    ResponseDealDidNotMatch { received: Cid, expected: Cid },
    /// The provider declined the deal.
    DealRejected { state: DealStatus, reason: String },
    DealAccepted { publish_message: Option<Cid> },
    StreamCloseError { error: String },
    /// The published deal was confirmed against the chain.
    DealPublished { deal_id: DealID },
    DealPublishFailed { error: String },
    ActivationFailed { error: String },
    Activated,
    Completed,
    /// Terminal failure path; applies from any non-terminal state.
    Failed { error: Option<String> },
    /// Synthetic event fired per record when the engine restarts.
    Restart,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Open => "ClientEventOpen",
            ClientEvent::FundingInitiated { .. } => "ClientEventFundingInitiated",
            ClientEvent::EnsureFundsFailed { .. } => "ClientEventEnsureFundsFailed",
            ClientEvent::FundsEnsured => "ClientEventFundsEnsured",
            ClientEvent::WriteProposalFailed { .. } => "ClientEventWriteProposalFailed",
            ClientEvent::DealProposed => "ClientEventDealProposed",
            ClientEvent::ReadResponseFailed { .. } => "ClientEventReadResponseFailed",
            ClientEvent::ResponseVerificationFailed => "ClientEventResponseVerificationFailed",
            ClientEvent::ResponseDealDidNotMatch { .. } => "ClientEventResponseDealDidNotMatch",
            ClientEvent::DealRejected { .. } => "ClientEventDealRejected",
            ClientEvent::DealAccepted { .. } => "ClientEventDealAccepted",
            ClientEvent::StreamCloseError { .. } => "ClientEventStreamCloseError",
            ClientEvent::DealPublished { .. } => "ClientEventDealPublished",
            ClientEvent::DealPublishFailed { .. } => "ClientEventDealPublishFailed",
            ClientEvent::ActivationFailed { .. } => "ClientEventDealActivationFailed",
            ClientEvent::Activated => "ClientEventDealActivated",
            ClientEvent::Completed => "ClientEventDealCompleted",
            ClientEvent::Failed { .. } => "ClientEventFailed",
            ClientEvent::Restart => "ClientEventRestart",
        }
    }
}

/// Transition-table lookup for the client machine.
pub fn transition(status: DealStatus, event: &ClientEvent) -> Rule {
    use ClientEvent as E;
    use DealStatus as S;
    match event {
        E::Open => declared_from(status, &[S::Unknown], S::EnsureClientFunds),
        E::FundingInitiated { .. } => declared_from(status, &[S::EnsureClientFunds], S::ClientFunding),
        E::EnsureFundsFailed { .. } => declared_from(status, &[S::EnsureClientFunds, S::ClientFunding], S::Failing),
        E::FundsEnsured => declared_from(status, &[S::EnsureClientFunds, S::ClientFunding], S::FundsEnsured),
        E::WriteProposalFailed { .. } => declared_from(status, &[S::FundsEnsured], S::Failing),
        E::DealProposed => declared_from(status, &[S::FundsEnsured], S::Validating),
        E::ReadResponseFailed { .. } => declared_from(status, &[S::Validating], S::Failing),
        E::ResponseVerificationFailed => declared_from(status, &[S::Validating], S::Failing),
        E::ResponseDealDidNotMatch { .. } => declared_from(status, &[S::Validating], S::Failing),
        E::DealRejected { .. } => declared_from(status, &[S::Validating], S::Failing),
        E::DealAccepted { .. } => declared_from(status, &[S::Validating], S::ProposalAccepted),
        E::StreamCloseError { .. } => declared_from(status, &[S::Validating], S::Failing),
        E::DealPublished { .. } => declared_from(status, &[S::ProposalAccepted], S::Sealing),
        E::DealPublishFailed { .. } => declared_from(status, &[S::ProposalAccepted], S::Failing),
        E::ActivationFailed { .. } => declared_from(status, &[S::Sealing], S::Failing),
        E::Activated => declared_from(status, &[S::Sealing], S::Active),
        E::Completed => declared_from(status, &[S::Active], S::Completed),
        // From the failing state the event finishes the deal; from anywhere
        // else it routes through failing so cleanup runs first.
        E::Failed { .. } => {
            if status == S::Failing {
                Rule::Goto(S::Error)
            } else {
                Rule::Goto(S::Failing)
            }
        }
        E::Restart => Rule::Reenter,
    }
}

/// Pure record mutation attached to an accepted event.
pub fn apply(deal: &mut ClientDeal, event: &ClientEvent) {
    use ClientEvent as E;
    match event {
        E::FundingInitiated { message_cid } => {
            if deal.add_funds_cid.is_none() {
                deal.add_funds_cid = Some(*message_cid);
            }
        }
        E::EnsureFundsFailed { error } => deal.message = format!("adding market funds failed: {error}"),
        E::WriteProposalFailed { error } => {
            deal.message = format!("sending proposal to storage provider failed: {error}")
        }
        E::ReadResponseFailed { error } => deal.message = format!("error reading Response message: {error}"),
        E::ResponseVerificationFailed => {
            deal.message = "unable to verify signature on deal response".to_string()
        }
        E::ResponseDealDidNotMatch { received, expected } => {
            deal.message = format!("miner responded to a wrong proposal: {received} != {expected}")
        }
        E::DealRejected { state, reason } => {
            deal.message = format!("deal failed: (State={}) {}", *state as u64, reason);
            deal.connection_closed = true;
        }
        E::DealAccepted { publish_message } => {
            if deal.publish_message.is_none() {
                deal.publish_message = *publish_message;
            }
            deal.connection_closed = true;
        }
        E::StreamCloseError { error } => deal.message = format!("error attempting to close stream: {error}"),
        E::DealPublished { deal_id } => deal.deal_id = *deal_id,
        E::DealPublishFailed { error } => deal.message = format!("error validating deal published: {error}"),
        E::ActivationFailed { error } => deal.message = format!("error in deal activation: {error}"),
        E::Failed { error } => {
            if let Some(error) = error {
                deal.message = error.clone();
            }
        }
        _ => {}
    }
}
