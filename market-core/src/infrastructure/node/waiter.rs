//! De-duplicated message waiting. Two waits on the same message CID fold
//! into one underlying node subscription, so a restart that re-enters a
//! waiting state does not leak a second waiter.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use cid::Cid;
use tokio::sync::broadcast;

use crate::foundation::{MarketError, Result};
use crate::infrastructure::node::MessageReceipt;

type WaitOutcome = std::result::Result<MessageReceipt, String>;

pub struct MessageWaiter {
    inflight: Mutex<HashMap<Cid, broadcast::Sender<WaitOutcome>>>,
}

impl MessageWaiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inflight: Mutex::new(HashMap::new()) })
    }

    /// Awaits the outcome for `mcid`. The first caller drives `fetch`; any
    /// concurrent caller for the same CID subscribes to the same outcome
    /// and `fetch` is dropped unused.
    pub async fn wait<F>(self: &Arc<Self>, mcid: Cid, fetch: F) -> Result<MessageReceipt>
    where
        F: Future<Output = Result<MessageReceipt>> + Send + 'static,
    {
        let mut rx = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.get(&mcid) {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    inflight.insert(mcid, tx.clone());
                    let waiter = Arc::clone(self);
                    tokio::spawn(async move {
                        let outcome = fetch.await.map_err(|err| err.to_string());
                        waiter.inflight.lock().unwrap_or_else(|e| e.into_inner()).remove(&mcid);
                        let _ = tx.send(outcome);
                    });
                    rx
                }
            }
        };

        match rx.recv().await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(details)) => Err(MarketError::NodeError(details)),
            Err(_) => Err(MarketError::EngineStopped),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use fvm_shared::error::ExitCode;

    use super::*;
    use crate::domain::deal::provider::tests_support::cid_of;

    #[tokio::test]
    async fn concurrent_waits_share_one_fetch() {
        let waiter = MessageWaiter::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let mcid = cid_of(b"mcid");

        let gate = Arc::new(tokio::sync::Notify::new());
        let mut handles = Vec::new();
        for _ in 0..3 {
            let waiter = Arc::clone(&waiter);
            let fetches = Arc::clone(&fetches);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                waiter
                    .wait(mcid, async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(MessageReceipt { exit_code: ExitCode::OK, return_data: Vec::new() })
                    })
                    .await
            }));
        }

        tokio::task::yield_now().await;
        gate.notify_one();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_errors_reach_every_waiter() {
        let waiter = MessageWaiter::new();
        let mcid = cid_of(b"failing");
        let err = waiter
            .wait(mcid, async move { Err::<MessageReceipt, _>(MarketError::NodeError("timed out".into())) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "timed out");
    }
}
