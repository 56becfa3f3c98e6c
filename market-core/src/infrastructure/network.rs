//! Deal-stream interface. Stream transport and message framing live
//! outside this crate.

use async_trait::async_trait;
use cid::Cid;

use crate::domain::message::{ProposalMessage, SignedResponse};
use crate::foundation::{PeerId, Result};

/// Provider-side view of the deal streams.
#[async_trait]
pub trait ProviderNetwork: Send + Sync {
    async fn send_response(&self, proposal: &Cid, response: &SignedResponse) -> Result<()>;

    /// Pins the connection that delivered the proposal so the response can
    /// be sent on it later.
    fn tag_connection(&self, proposal: &Cid) -> Result<()>;

    fn disconnect(&self, proposal: &Cid) -> Result<()>;
}

/// Client-side view of the deal streams.
#[async_trait]
pub trait ClientNetwork: Send + Sync {
    async fn write_proposal(&self, provider: &PeerId, message: &ProposalMessage) -> Result<()>;

    async fn read_response(&self, proposal: &Cid) -> Result<SignedResponse>;

    async fn close_stream(&self, proposal: &Cid) -> Result<()>;
}
