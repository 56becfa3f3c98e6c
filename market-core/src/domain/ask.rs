//! Signed price quotes published by a provider.

use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::bigint::BigInt;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::econ::TokenAmount;
use fvm_shared::piece::PaddedPieceSize;

use crate::foundation::GIB;

/// A provider's standing offer: price per GiB and epoch plus the accepted
/// piece-size range, valid until `expiry`. `seq_no` increases with every
/// update so stale asks can be discarded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct StorageAsk {
    /// Price per GiB per epoch.
    pub price: TokenAmount,
    pub min_piece_size: PaddedPieceSize,
    pub max_piece_size: PaddedPieceSize,
    pub miner: Address,
    pub timestamp: ChainEpoch,
    pub expiry: ChainEpoch,
    pub seq_no: u64,
}

impl StorageAsk {
    /// Minimum storage price per epoch this ask implies for a piece of the
    /// given padded size (floor division, matching on-chain arithmetic).
    pub fn min_price_per_epoch(&self, piece_size: PaddedPieceSize) -> TokenAmount {
        TokenAmount::from_atto(self.price.atto() * BigInt::from(piece_size.0) / BigInt::from(GIB))
    }
}

/// An ask wrapped with a signature by the provider's worker key covering
/// the canonical encoding of the ask payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct SignedStorageAsk {
    pub ask: StorageAsk,
    pub signature: Signature,
}

/// Optional overrides for `add_ask`; unset bounds fall back to the
/// configured defaults.
#[derive(Clone, Copy, Debug, Default)]
pub struct AskOptions {
    pub min_piece_size: Option<PaddedPieceSize>,
    pub max_piece_size: Option<PaddedPieceSize>,
}

impl AskOptions {
    pub fn min_piece_size(mut self, size: PaddedPieceSize) -> Self {
        self.min_piece_size = Some(size);
        self
    }

    pub fn max_piece_size(mut self, size: PaddedPieceSize) -> Self {
        self.max_piece_size = Some(size);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_price_scales_with_piece_size() {
        let ask = StorageAsk {
            price: TokenAmount::from_atto(10_000_000),
            min_piece_size: PaddedPieceSize(256),
            max_piece_size: PaddedPieceSize(1 << 20),
            miner: Address::new_id(200),
            timestamp: 0,
            expiry: 100,
            seq_no: 0,
        };
        // 10_000_000 per GiB-epoch over a 1 MiB piece, floored.
        assert_eq!(ask.min_price_per_epoch(PaddedPieceSize(1 << 20)), TokenAmount::from_atto(9765));
    }
}
