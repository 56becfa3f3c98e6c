//! Piece-commitment generation interface. CAR encoding and the CommP
//! arithmetic live outside this crate.

use cid::Cid;
use fvm_shared::piece::UnpaddedPieceSize;
use fvm_shared::sector::RegisteredSealProof;

use crate::domain::message::TransferSelector;
use crate::foundation::{FilePath, Result};

/// Outcome of generating a piece into the file store: the commitment, the
/// staged piece file, and the block-location metadata written beside it.
#[derive(Clone, Debug)]
pub struct PieceCommitment {
    pub piece_cid: Cid,
    pub piece_path: FilePath,
    pub metadata_path: FilePath,
}

pub trait PieceCommitmentGenerator: Send + Sync {
    /// Computes the commitment for already-referenced payload data without
    /// staging files; used by the client at proposal time.
    fn commitment_for_data(&self, payload: &Cid, proof: RegisteredSealProof) -> Result<(Cid, UnpaddedPieceSize)>;

    /// Walks the local payload DAG, writes the CAR piece and its
    /// block-location metadata into the file store, and returns both paths
    /// with the computed commitment.
    fn commitment_to_file(&self, payload: &Cid, selector: &TransferSelector) -> Result<PieceCommitment>;
}
