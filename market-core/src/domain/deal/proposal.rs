use cid::Cid;
use multihash::{Code, MultihashDigest};
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{to_vec, DAG_CBOR};
use fvm_shared::address::Address;
use fvm_shared::bigint::BigInt;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::econ::TokenAmount;
use fvm_shared::piece::PaddedPieceSize;

use crate::foundation::Result;

/// Terms of a storage agreement as they will appear on chain. Treated as
/// an opaque structure by the engine except for the fields validation
/// reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealProposal {
    pub piece_cid: Cid,
    pub piece_size: PaddedPieceSize,
    pub client: Address,
    pub provider: Address,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
    pub storage_price_per_epoch: TokenAmount,
    pub provider_collateral: TokenAmount,
    pub client_collateral: TokenAmount,
}

impl DealProposal {
    pub fn duration(&self) -> ChainEpoch {
        self.end_epoch - self.start_epoch
    }

    /// Total storage fee over the deal lifetime; the client must hold at
    /// least this much available market balance at proposal time.
    pub fn total_storage_fee(&self) -> TokenAmount {
        TokenAmount::from_atto(self.storage_price_per_epoch.atto() * BigInt::from(self.duration()))
    }

    /// Everything the client must have escrowed for the deal to be viable.
    pub fn client_funds_requirement(&self) -> TokenAmount {
        self.total_storage_fee() + self.client_collateral.clone()
    }
}

/// A proposal together with the client signature covering its canonical
/// encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ClientDealProposal {
    pub proposal: DealProposal,
    pub client_signature: Signature,
}

impl ClientDealProposal {
    /// Content identifier of the signed proposal: CIDv1 over the canonical
    /// CBOR encoding, Blake2b-256. Both roles derive the same identifier
    /// for the same deal.
    pub fn cid(&self) -> Result<Cid> {
        let bytes = to_vec(self)?;
        Ok(Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(&bytes)))
    }
}
