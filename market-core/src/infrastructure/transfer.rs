//! Bulk data-transfer interface. The replication protocol itself lives
//! outside this crate; completion and failure flow back into the engine
//! through the provider front.

use async_trait::async_trait;
use cid::Cid;

use crate::domain::message::{TransferSelector, TransferVoucher};
use crate::foundation::{PeerId, Result};

#[async_trait]
pub trait TransferLauncher: Send + Sync {
    /// Opens a pull-mode channel asking `to` to push the DAG under
    /// `base_cid`. Returns once the channel is open, not when the data has
    /// arrived.
    async fn open_pull_channel(
        &self,
        to: &PeerId,
        voucher: &TransferVoucher,
        base_cid: &Cid,
        selector: &TransferSelector,
    ) -> Result<()>;
}
