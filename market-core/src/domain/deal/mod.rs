//! Deal lifecycle vocabulary shared by both negotiation roles: the status
//! enum, the transition-rule shape, and the record contract the engine
//! requires of a persisted deal.

pub mod client;
pub mod proposal;
pub mod provider;

use std::fmt;

use cid::Cid;
use fvm_ipld_encoding::repr::{Deserialize_repr, Serialize_repr};
use fvm_ipld_encoding::tuple::*;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::piece::UnpaddedPieceSize;

use self::proposal::DealProposal;

/// Lifecycle status of a storage deal. Ordinals are stable; they appear in
/// persisted records, logs, and wire responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u64)]
pub enum DealStatus {
    Unknown = 0,
    ProposalNotFound = 1,
    ProposalRejected = 2,
    ProposalAccepted = 3,
    Staged = 4,
    Sealing = 5,
    Active = 6,
    Failing = 7,
    NotFound = 8,
    FundsEnsured = 9,
    Validating = 10,
    Transferring = 11,
    WaitingForData = 12,
    VerifyData = 13,
    EnsureProviderFunds = 14,
    EnsureClientFunds = 15,
    ProviderFunding = 16,
    ClientFunding = 17,
    Publish = 18,
    Publishing = 19,
    Error = 20,
    Completed = 21,
}

impl DealStatus {
    /// True for the states from which no further transition is accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, DealStatus::Completed | DealStatus::Error)
    }

    pub fn name(self) -> &'static str {
        match self {
            DealStatus::Unknown => "StorageDealUnknown",
            DealStatus::ProposalNotFound => "StorageDealProposalNotFound",
            DealStatus::ProposalRejected => "StorageDealProposalRejected",
            DealStatus::ProposalAccepted => "StorageDealProposalAccepted",
            DealStatus::Staged => "StorageDealStaged",
            DealStatus::Sealing => "StorageDealSealing",
            DealStatus::Active => "StorageDealActive",
            DealStatus::Failing => "StorageDealFailing",
            DealStatus::NotFound => "StorageDealNotFound",
            DealStatus::FundsEnsured => "StorageDealFundsEnsured",
            DealStatus::Validating => "StorageDealValidating",
            DealStatus::Transferring => "StorageDealTransferring",
            DealStatus::WaitingForData => "StorageDealWaitingForData",
            DealStatus::VerifyData => "StorageDealVerifyData",
            DealStatus::EnsureProviderFunds => "StorageDealEnsureProviderFunds",
            DealStatus::EnsureClientFunds => "StorageDealEnsureClientFunds",
            DealStatus::ProviderFunding => "StorageDealProviderFunding",
            DealStatus::ClientFunding => "StorageDealClientFunding",
            DealStatus::Publish => "StorageDealPublish",
            DealStatus::Publishing => "StorageDealPublishing",
            DealStatus::Error => "StorageDealError",
            DealStatus::Completed => "StorageDealCompleted",
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a transition-table lookup for `(status, event)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rule {
    /// The event is declared for the current status and moves the deal here.
    Goto(DealStatus),
    /// Synthetic restart: re-enter the current status and re-run its handler.
    Reenter,
    /// The event is not declared for the current status.
    Invalid,
}

pub(crate) fn declared_from(status: DealStatus, allowed: &[DealStatus], to: DealStatus) -> Rule {
    if allowed.contains(&status) {
        Rule::Goto(to)
    } else {
        Rule::Invalid
    }
}

/// Contract a persisted deal record offers the engine and the stores.
pub trait DealRecord: Clone + Send + Sync + 'static {
    /// Content identifier of the canonical signed proposal; primary key.
    fn proposal_cid(&self) -> Cid;

    fn status(&self) -> DealStatus;

    fn set_status(&mut self, status: DealStatus);
}

pub mod transfer_type {
    /// Automatic pull-mode bulk transfer from the client peer.
    pub const GRAPHSYNC: &str = "graphsync";
    /// The client delivers the data out of band; the provider waits.
    pub const MANUAL: &str = "manual";
}

/// Reference to the payload a deal covers and how it travels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DataRef {
    pub transfer_type: String,
    pub root: Cid,
    /// Known piece commitment, required for manual transfers.
    pub piece_cid: Option<Cid>,
    /// Known piece size; zero when it will be recomputed from the data.
    pub piece_size: UnpaddedPieceSize,
}

impl DataRef {
    pub fn is_manual(&self) -> bool {
        self.transfer_type == transfer_type::MANUAL
    }
}

/// On-chain view of a published deal, as reported by the chain node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ChainDealState {
    pub sector_start_epoch: ChainEpoch,
    pub last_updated_epoch: ChainEpoch,
    pub slash_epoch: ChainEpoch,
}

/// A proposal joined with its current on-chain state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct StorageDeal {
    pub proposal: DealProposal,
    pub state: ChainDealState,
}
