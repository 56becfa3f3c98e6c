//! On-wire structures exchanged over the deal protocol. The engine treats
//! them as opaque signed records; only construction and the fields the
//! state machines read are defined here.

use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::deal::DealID;

use crate::domain::deal::proposal::ClientDealProposal;
use crate::domain::deal::{DataRef, DealStatus};

/// Stream protocol carrying proposals and responses.
pub const DEAL_PROTOCOL_ID: &str = "/fil/storage/mk/1.0.1";
/// Stream protocol carrying ask queries.
pub const ASK_PROTOCOL_ID: &str = "/fil/storage/ask/1.0.1";

/// Client to provider: a signed proposal plus the payload reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ProposalMessage {
    pub deal_proposal: ClientDealProposal,
    pub piece: DataRef,
}

/// Provider to client: the fate of a proposal. `publish_message` is set
/// once the provider has submitted the deal on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealResponse {
    pub state: DealStatus,
    pub message: String,
    pub proposal: Cid,
    pub publish_message: Option<Cid>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct SignedResponse {
    pub response: DealResponse,
    pub signature: Signature,
}

/// Return value of the market actor's publish operation, decoded from the
/// wait-for-message receipt: the deal ids assigned on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PublishStorageDealsReturn {
    pub ids: Vec<DealID>,
}

/// Authorization blob handed to the bulk data-transfer subsystem so the
/// provider's pull request can be matched to the deal it serves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct TransferVoucher {
    pub proposal: Cid,
}

/// Opaque traversal description for the data-transfer subsystem. The
/// default selects the entire DAG under the payload root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferSelector(pub Vec<u8>);

impl TransferSelector {
    pub fn all_blocks() -> Self {
        Self::default()
    }
}
