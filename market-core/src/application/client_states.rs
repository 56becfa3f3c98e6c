//! Client state-entry handlers, mirroring the provider set: ensure funds,
//! propose, validate the response, confirm publication, await activation,
//! complete.

use std::sync::Arc;

use fvm_ipld_encoding::to_vec;
use tracing::warn;

use crate::application::environment::ClientEnvironment;
use crate::application::machine::EventSink;
use crate::domain::deal::client::{ClientDeal, ClientEvent};
use crate::domain::deal::DealStatus;
use crate::infrastructure::node::exit_code_label;
use crate::infrastructure::node::waiter::MessageWaiter;

/// Everything a client handler can reach.
pub struct ClientCtx {
    pub env: Arc<dyn ClientEnvironment>,
    pub waiter: Arc<MessageWaiter>,
    pub events: EventSink<ClientEvent>,
}

/// Entered on `EnsureClientFunds`: escrows the storage fee plus collateral.
pub async fn ensure_client_funds(ctx: &ClientCtx, deal: ClientDeal) {
    if let Some(mcid) = deal.add_funds_cid {
        ctx.events.fire(ClientEvent::FundingInitiated { message_cid: mcid });
        return;
    }

    let node = ctx.env.node();
    let (tok, _) = match node.get_chain_head().await {
        Ok(head) => head,
        Err(err) => {
            ctx.events.fire(ClientEvent::EnsureFundsFailed { error: err.to_string() });
            return;
        }
    };
    let proposal = &deal.proposal.proposal;
    match node.ensure_funds(proposal.client, proposal.client, proposal.client_funds_requirement(), &tok).await {
        Err(err) => ctx.events.fire(ClientEvent::EnsureFundsFailed { error: err.to_string() }),
        Ok(Some(mcid)) => ctx.events.fire(ClientEvent::FundingInitiated { message_cid: mcid }),
        Ok(None) => ctx.events.fire(ClientEvent::FundsEnsured),
    }
}

/// Entered on `ClientFunding`: awaits the escrow message on chain.
pub async fn wait_for_funding(ctx: &ClientCtx, deal: ClientDeal) {
    let Some(mcid) = deal.add_funds_cid else {
        ctx.events.fire(ClientEvent::EnsureFundsFailed { error: "no funds message recorded for deal".to_string() });
        return;
    };
    let node = ctx.env.node();
    match ctx.waiter.wait(mcid, async move { node.wait_for_message(mcid).await }).await {
        Err(err) => ctx.events.fire(ClientEvent::EnsureFundsFailed { error: err.to_string() }),
        Ok(receipt) if receipt.exit_code.is_success() => ctx.events.fire(ClientEvent::FundsEnsured),
        Ok(receipt) => ctx.events.fire(ClientEvent::EnsureFundsFailed {
            error: format!("AddFunds exit code: {}", exit_code_label(receipt.exit_code)),
        }),
    }
}

/// Entered on `FundsEnsured`: sends the signed proposal to the provider.
pub async fn propose_deal(ctx: &ClientCtx, deal: ClientDeal) {
    match ctx.env.write_proposal(&deal).await {
        Ok(()) => ctx.events.fire(ClientEvent::DealProposed),
        Err(err) => ctx.events.fire(ClientEvent::WriteProposalFailed { error: err.to_string() }),
    }
}

/// Entered on `Validating`: reads the provider's signed response, checks
/// it covers this proposal, and records acceptance or rejection.
pub async fn verify_response(ctx: &ClientCtx, deal: ClientDeal) {
    let signed = match ctx.env.read_response(&deal.proposal_cid).await {
        Ok(signed) => signed,
        Err(err) => {
            ctx.events.fire(ClientEvent::ReadResponseFailed { error: err.to_string() });
            return;
        }
    };

    let node = ctx.env.node();
    let verified = match node.get_chain_head().await {
        Ok((tok, _)) => match to_vec(&signed.response) {
            Ok(plaintext) => node
                .verify_signature(&signed.signature, deal.miner_worker, &plaintext, &tok)
                .await
                .unwrap_or(false),
            Err(_) => false,
        },
        Err(_) => false,
    };
    if !verified {
        ctx.events.fire(ClientEvent::ResponseVerificationFailed);
        return;
    }

    if signed.response.proposal != deal.proposal_cid {
        ctx.events.fire(ClientEvent::ResponseDealDidNotMatch {
            received: signed.response.proposal,
            expected: deal.proposal_cid,
        });
        return;
    }

    if signed.response.state != DealStatus::ProposalAccepted {
        ctx.events.fire(ClientEvent::DealRejected {
            state: signed.response.state,
            reason: signed.response.message.clone(),
        });
    } else {
        ctx.events.fire(ClientEvent::DealAccepted { publish_message: signed.response.publish_message });
    }

    if let Err(err) = ctx.env.close_stream(&deal.proposal_cid).await {
        ctx.events.fire(ClientEvent::StreamCloseError { error: err.to_string() });
    }
}

/// Entered on `ProposalAccepted`: confirms the publish message against the
/// chain and learns the on-chain deal id.
pub async fn validate_deal_published(ctx: &ClientCtx, deal: ClientDeal) {
    match ctx.env.node().validate_published_deal(&deal).await {
        Ok(deal_id) => ctx.events.fire(ClientEvent::DealPublished { deal_id }),
        Err(err) => ctx.events.fire(ClientEvent::DealPublishFailed { error: err.to_string() }),
    }
}

/// Entered on `Sealing`: waits for the deal's sector to be committed.
pub async fn verify_deal_activated(ctx: &ClientCtx, deal: ClientDeal) {
    let provider = deal.proposal.proposal.provider;
    match ctx.env.node().on_deal_sector_committed(provider, deal.deal_id).await {
        Ok(()) => ctx.events.fire(ClientEvent::Activated),
        Err(err) => ctx.events.fire(ClientEvent::ActivationFailed { error: err.to_string() }),
    }
}

/// Entered on `Active`: nothing left to watch on the client side.
pub async fn complete_deal(ctx: &ClientCtx, _deal: ClientDeal) {
    ctx.events.fire(ClientEvent::Completed);
}

/// Entered on `Failing`: closes the stream if still open and finishes the
/// deal.
pub async fn fail_deal(ctx: &ClientCtx, deal: ClientDeal) {
    if !deal.connection_closed {
        if let Err(err) = ctx.env.close_stream(&deal.proposal_cid).await {
            warn!(proposal = %deal.proposal_cid, error = %err, "closing deal stream failed");
        }
    }
    ctx.events.fire(ClientEvent::Failed { error: None });
}
