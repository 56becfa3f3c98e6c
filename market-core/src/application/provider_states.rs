//! Provider state-entry handlers. Each runs after its state is entered
//! and persisted, receives an owned record snapshot, and reports back only
//! by firing events. Handlers are idempotent under restart: before a
//! single-shot side effect they check whether its result is already on
//! the record and skip straight to the awaiting step.

use std::sync::Arc;

use fvm_ipld_encoding::{from_slice, to_vec};
use fvm_shared::piece::UnpaddedPieceSize;
use tracing::{debug, warn};

use crate::application::environment::ProviderEnvironment;
use crate::application::machine::EventSink;
use crate::domain::deal::provider::{ProviderDeal, ProviderEvent};
use crate::domain::deal::DealStatus;
use crate::domain::message::{DealResponse, PublishStorageDealsReturn, TransferSelector, TransferVoucher};
use crate::infrastructure::node::waiter::MessageWaiter;
use crate::infrastructure::node::exit_code_label;
use crate::infrastructure::piecestore::{read_block_records, DealInfo};

/// Everything a provider handler can reach.
pub struct ProviderCtx {
    pub env: Arc<dyn ProviderEnvironment>,
    pub waiter: Arc<MessageWaiter>,
    pub events: EventSink<ProviderEvent>,
}

/// Entered on `Validating`: checks the proposal against chain state and
/// the ask policy, then accepts or rejects.
pub async fn validate_deal_proposal(ctx: &ProviderCtx, deal: ProviderDeal) {
    let node = ctx.env.node();
    let (tok, height) = match node.get_chain_head().await {
        Ok(head) => head,
        Err(err) => {
            ctx.events.fire(ProviderEvent::NodeErrored { error: format!("getting most recent state id: {err}") });
            return;
        }
    };

    let proposal = &deal.proposal.proposal;
    let verified = match to_vec(proposal) {
        Ok(plaintext) => node
            .verify_signature(&deal.proposal.client_signature, proposal.client, &plaintext, &tok)
            .await
            .unwrap_or(false),
        Err(_) => false,
    };
    if !verified {
        ctx.events.fire(ProviderEvent::DealRejected {
            reason: "verifying StorageDealProposal: could not verify signature".to_string(),
        });
        return;
    }

    if proposal.provider != ctx.env.address() {
        ctx.events.fire(ProviderEvent::DealRejected { reason: "incorrect provider for deal".to_string() });
        return;
    }

    if height > proposal.start_epoch - ctx.env.deal_acceptance_buffer() {
        ctx.events.fire(ProviderEvent::DealRejected {
            reason: "deal start epoch is too soon or deal already expired".to_string(),
        });
        return;
    }

    let ask = ctx.env.ask();
    let min_price = ask.min_price_per_epoch(proposal.piece_size);
    if proposal.storage_price_per_epoch < min_price {
        ctx.events.fire(ProviderEvent::DealRejected {
            reason: format!(
                "storage price per epoch less than asking price: {} < {}",
                proposal.storage_price_per_epoch.atto(),
                min_price.atto()
            ),
        });
        return;
    }

    if proposal.piece_size.0 < ask.min_piece_size.0 {
        ctx.events.fire(ProviderEvent::DealRejected {
            reason: format!(
                "piece size less than minimum required size: {} < {}",
                proposal.piece_size.0, ask.min_piece_size.0
            ),
        });
        return;
    }

    if proposal.piece_size.0 > ask.max_piece_size.0 {
        ctx.events.fire(ProviderEvent::DealRejected {
            reason: format!(
                "piece size more than maximum allowed size: {} > {}",
                proposal.piece_size.0, ask.max_piece_size.0
            ),
        });
        return;
    }

    let balance = match node.get_balance(proposal.client, &tok).await {
        Ok(balance) => balance,
        Err(err) => {
            ctx.events.fire(ProviderEvent::NodeErrored { error: format!("getting client market balance failed: {err}") });
            return;
        }
    };
    if balance.available < proposal.client_funds_requirement() {
        ctx.events.fire(ProviderEvent::DealRejected { reason: "clientMarketBalance.Available too small".to_string() });
        return;
    }

    if let Err(err) = ctx.env.tag_connection(&deal.proposal_cid) {
        warn!(proposal = %deal.proposal_cid, error = %err, "tagging proposal connection failed");
    }
    ctx.events.fire(ProviderEvent::DealAccepted);
}

/// Entered on `ProposalAccepted`: waits for manual data or opens a
/// pull-mode transfer channel to the client.
pub async fn transfer_data(ctx: &ProviderCtx, deal: ProviderDeal) {
    if deal.data_ref.is_manual() {
        ctx.events.fire(ProviderEvent::WaitingForManualData);
        return;
    }
    let voucher = TransferVoucher { proposal: deal.proposal_cid };
    match ctx
        .env
        .start_data_transfer(&deal.client, voucher, deal.data_ref.root, TransferSelector::all_blocks())
        .await
    {
        Ok(()) => ctx.events.fire(ProviderEvent::DataTransferInitiated),
        Err(err) => ctx.events.fire(ProviderEvent::DataTransferFailed {
            error: format!("failed to open pull data channel: {err}"),
        }),
    }
}

/// Entered on `VerifyData`: recomputes the piece commitment from the
/// received payload and compares it with the proposal's.
pub async fn verify_data(ctx: &ProviderCtx, deal: ProviderDeal) {
    let commitment = match ctx
        .env
        .generate_piece_commitment_to_file(&deal.data_ref.root, &TransferSelector::all_blocks())
    {
        Ok(commitment) => commitment,
        Err(err) => {
            ctx.events.fire(ProviderEvent::GeneratePieceCidFailed { error: err.to_string() });
            return;
        }
    };
    if commitment.piece_cid != deal.proposal.proposal.piece_cid {
        ctx.events.fire(ProviderEvent::DealRejected {
            reason: "proposal CommP doesn't match calculated CommP".to_string(),
        });
        return;
    }
    ctx.events.fire(ProviderEvent::VerifiedData {
        piece_path: commitment.piece_path,
        metadata_path: commitment.metadata_path,
    });
}

/// Entered on `EnsureProviderFunds`: tops up provider collateral through
/// the miner worker.
pub async fn ensure_provider_funds(ctx: &ProviderCtx, deal: ProviderDeal) {
    // Re-entry after a crash between submitting and observing the funds
    // message: the identifier is already on the record.
    if let Some(mcid) = deal.add_funds_cid {
        ctx.events.fire(ProviderEvent::FundingInitiated { message_cid: mcid });
        return;
    }

    let node = ctx.env.node();
    let (tok, _) = match node.get_chain_head().await {
        Ok(head) => head,
        Err(err) => {
            ctx.events.fire(ProviderEvent::NodeErrored { error: format!("getting most recent state id: {err}") });
            return;
        }
    };
    let proposal = &deal.proposal.proposal;
    let worker = match node.get_miner_worker_address(proposal.provider, &tok).await {
        Ok(worker) => worker,
        Err(err) => {
            ctx.events.fire(ProviderEvent::NodeErrored { error: format!("looking up miner worker: {err}") });
            return;
        }
    };
    match node.ensure_funds(proposal.provider, worker, proposal.provider_collateral.clone(), &tok).await {
        Err(err) => ctx.events.fire(ProviderEvent::NodeErrored { error: format!("ensuring funds: {err}") }),
        Ok(Some(mcid)) => ctx.events.fire(ProviderEvent::FundingInitiated { message_cid: mcid }),
        Ok(None) => ctx.events.fire(ProviderEvent::Funded),
    }
}

/// Entered on `ProviderFunding`: awaits the funds message on chain.
pub async fn wait_for_funding(ctx: &ProviderCtx, deal: ProviderDeal) {
    let Some(mcid) = deal.add_funds_cid else {
        ctx.events.fire(ProviderEvent::NodeErrored { error: "no funds message recorded for deal".to_string() });
        return;
    };
    let node = ctx.env.node();
    match ctx.waiter.wait(mcid, async move { node.wait_for_message(mcid).await }).await {
        Err(err) => ctx.events.fire(ProviderEvent::NodeErrored { error: err.to_string() }),
        Ok(receipt) if receipt.exit_code.is_success() => ctx.events.fire(ProviderEvent::Funded),
        Ok(receipt) => ctx.events.fire(ProviderEvent::NodeErrored {
            error: format!("AddFunds exit code: {}", exit_code_label(receipt.exit_code)),
        }),
    }
}

/// Entered on `Publish`: submits the deal to the chain.
pub async fn publish_deal(ctx: &ProviderCtx, deal: ProviderDeal) {
    if let Some(mcid) = deal.publish_cid {
        ctx.events.fire(ProviderEvent::PublishInitiated { message_cid: mcid });
        return;
    }
    match ctx.env.node().publish_deals(&deal).await {
        Ok(mcid) => ctx.events.fire(ProviderEvent::PublishInitiated { message_cid: mcid }),
        Err(err) => ctx.events.fire(ProviderEvent::NodeErrored { error: format!("publishing deal: {err}") }),
    }
}

/// Entered on `Publishing`: awaits the publish message, decodes the deal
/// id, and answers the client with a signed acceptance.
pub async fn wait_for_publish(ctx: &ProviderCtx, deal: ProviderDeal) {
    let Some(mcid) = deal.publish_cid else {
        ctx.events.fire(ProviderEvent::NodeErrored { error: "no publish message recorded for deal".to_string() });
        return;
    };
    let node = ctx.env.node();
    let receipt = match ctx.waiter.wait(mcid, async move { node.wait_for_message(mcid).await }).await {
        Ok(receipt) => receipt,
        Err(err) => {
            ctx.events.fire(ProviderEvent::NodeErrored { error: err.to_string() });
            return;
        }
    };
    if !receipt.exit_code.is_success() {
        ctx.events.fire(ProviderEvent::PublishError {
            error: format!("PublishStorageDeals exit code: {}", exit_code_label(receipt.exit_code)),
        });
        return;
    }
    let decoded: PublishStorageDealsReturn = match from_slice(&receipt.return_data) {
        Ok(decoded) => decoded,
        Err(err) => {
            ctx.events.fire(ProviderEvent::PublishError { error: format!("decoding PublishStorageDeals return: {err}") });
            return;
        }
    };
    let Some(deal_id) = decoded.ids.first().copied() else {
        ctx.events.fire(ProviderEvent::PublishError { error: "PublishStorageDeals returned no deal ids".to_string() });
        return;
    };

    let response = DealResponse {
        state: DealStatus::ProposalAccepted,
        message: String::new(),
        proposal: deal.proposal_cid,
        publish_message: Some(mcid),
    };
    if let Err(err) = ctx.env.send_signed_response(response).await {
        ctx.events.fire(ProviderEvent::SendResponseFailed { error: err.to_string() });
        return;
    }
    if let Err(err) = ctx.env.disconnect(&deal.proposal_cid) {
        warn!(proposal = %deal.proposal_cid, error = %err, "disconnecting deal stream failed");
    }
    ctx.events.fire(ProviderEvent::Published { deal_id });
}

/// Entered on `Staged`: opens the piece and hands it to the sealing
/// pipeline.
pub async fn handoff_deal(ctx: &ProviderCtx, deal: ProviderDeal) {
    let file = match ctx.env.file_store().open(&deal.piece_path) {
        Ok(file) => file,
        Err(err) => {
            ctx.events.fire(ProviderEvent::FileStoreErrored {
                error: format!("reading piece at path {}: {}", deal.piece_path, err),
            });
            return;
        }
    };
    let piece_size = UnpaddedPieceSize(file.size);
    match ctx.env.node().on_deal_complete(&deal, piece_size, file.reader()).await {
        Ok(()) => ctx.events.fire(ProviderEvent::HandedOff),
        Err(err) => ctx.events.fire(ProviderEvent::HandoffFailed { error: err.to_string() }),
    }
}

/// Entered on `Sealing`: waits for the sector holding the deal to be
/// committed on chain.
pub async fn verify_deal_activated(ctx: &ProviderCtx, deal: ProviderDeal) {
    let provider = deal.proposal.proposal.provider;
    match ctx.env.node().on_deal_sector_committed(provider, deal.deal_id).await {
        Ok(()) => ctx.events.fire(ProviderEvent::Activated),
        Err(err) => ctx.events.fire(ProviderEvent::ActivationFailed { error: err.to_string() }),
    }
}

/// Entered on `Active`: registers retrieval metadata with the piece store
/// and removes the staged files.
pub async fn record_piece_info(ctx: &ProviderCtx, deal: ProviderDeal) {
    let mut locations = Vec::new();
    if !deal.metadata_path.is_empty() {
        let file = match ctx.env.file_store().open(&deal.metadata_path) {
            Ok(file) => file,
            Err(err) => {
                ctx.events.fire(ProviderEvent::ReadMetadataErrored { error: err.to_string() });
                return;
            }
        };
        locations = match read_block_records(file.bytes()) {
            Ok(locations) => locations,
            Err(err) => {
                ctx.events.fire(ProviderEvent::ReadMetadataErrored { error: err.to_string() });
                return;
            }
        };
    }

    let node = ctx.env.node();
    let (tok, _) = match node.get_chain_head().await {
        Ok(head) => head,
        Err(err) => {
            ctx.events.fire(ProviderEvent::NodeErrored { error: format!("getting most recent state id: {err}") });
            return;
        }
    };
    let location = match node.locate_piece_for_deal_within_sector(deal.deal_id, &tok).await {
        Ok(location) => location,
        Err(err) => {
            ctx.events.fire(ProviderEvent::UnableToLocatePiece { deal_id: deal.deal_id, error: err.to_string() });
            return;
        }
    };

    let piece_cid = deal.proposal.proposal.piece_cid;
    if let Err(err) = ctx.env.piece_store().add_piece_block_locations(&piece_cid, &locations) {
        ctx.events.fire(ProviderEvent::PieceStoreErrored { error: format!("adding piece block locations: {err}") });
        return;
    }
    let info = DealInfo {
        deal_id: deal.deal_id,
        sector_id: location.sector_id,
        offset: location.offset,
        length: location.length,
    };
    if let Err(err) = ctx.env.piece_store().add_deal_for_piece(&piece_cid, info) {
        ctx.events.fire(ProviderEvent::PieceStoreErrored { error: format!("adding deal info for piece: {err}") });
        return;
    }

    if !deal.metadata_path.is_empty() {
        if let Err(err) = ctx.env.file_store().delete(&deal.metadata_path) {
            warn!(path = %deal.metadata_path, error = %err, "deleting piece metadata failed");
        }
    }
    if !deal.piece_path.is_empty() {
        if let Err(err) = ctx.env.file_store().delete(&deal.piece_path) {
            warn!(path = %deal.piece_path, error = %err, "deleting staged piece failed");
        }
    }
    ctx.events.fire(ProviderEvent::Completed);
}

/// Entered on `Failing`: tells the client (if the connection is still
/// open), removes staged files, and finishes the deal.
pub async fn fail_deal(ctx: &ProviderCtx, deal: ProviderDeal) {
    if !deal.connection_closed {
        let response = DealResponse {
            state: DealStatus::Failing,
            message: deal.message.clone(),
            proposal: deal.proposal_cid,
            publish_message: None,
        };
        if let Err(err) = ctx.env.send_signed_response(response).await {
            ctx.events.fire(ProviderEvent::SendResponseFailed { error: err.to_string() });
            return;
        }
        if let Err(err) = ctx.env.disconnect(&deal.proposal_cid) {
            warn!(proposal = %deal.proposal_cid, error = %err, "disconnecting deal stream failed");
        }
    } else {
        debug!(proposal = %deal.proposal_cid, "connection already closed, skipping failure response");
    }

    for path in [&deal.piece_path, &deal.metadata_path] {
        if !path.is_empty() {
            if let Err(err) = ctx.env.file_store().delete(path) {
                warn!(path = %path, error = %err, "deleting staged file failed");
            }
        }
    }
    ctx.events.fire(ProviderEvent::Failed);
}
