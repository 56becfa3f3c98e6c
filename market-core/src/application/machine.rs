//! The deal-lifecycle engine shared by both roles: a per-record event
//! processor over a declared transition table, with write-through
//! persistence, state-entry handler dispatch, and subscriber fan-out.
//!
//! Events for one record apply strictly in acceptance order; distinct
//! records advance independently. Each application is atomic with respect
//! to persistence: the action runs, the new state is assigned, the record
//! is written through the store, and only then is the entry handler
//! dispatched.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cid::Cid;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::application::subscribers::{SubscriberHub, SubscriptionId};
use crate::domain::deal::{DealRecord, DealStatus, Rule};
use crate::foundation::{MarketError, Result};
use crate::infrastructure::storage::DealStore;

/// Role-specific half of the engine: record and event types, the
/// transition table, and handler dispatch for entered states.
#[async_trait]
pub trait DealLifecycle: Send + Sync + 'static {
    type Deal: DealRecord;
    type Event: Send + Sync + fmt::Debug + 'static;

    fn event_name(event: &Self::Event) -> &'static str;

    fn transition(status: DealStatus, event: &Self::Event) -> Rule;

    /// Pure field mutation for an accepted event.
    fn apply(deal: &mut Self::Deal, event: &Self::Event);

    /// The synthetic event fired per record on engine restart.
    fn restart_event() -> Self::Event;

    /// Runs the handler registered for the record's (new) state. Handlers
    /// receive an owned snapshot and report back only through the sink.
    async fn on_entered(&self, deal: Self::Deal, events: EventSink<Self::Event>);
}

/// Handle a handler uses to feed follow-up events for its own record back
/// into the engine queue.
pub struct EventSink<E> {
    proposal: Cid,
    tx: mpsc::UnboundedSender<E>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self { proposal: self.proposal, tx: self.tx.clone() }
    }
}

impl<E: fmt::Debug> EventSink<E> {
    pub fn proposal(&self) -> Cid {
        self.proposal
    }

    pub fn fire(&self, event: E) {
        if self.tx.send(event).is_err() {
            debug!(proposal = %self.proposal, "event dropped, engine stopped");
        }
    }
}

struct MachineCore<L: DealLifecycle> {
    lifecycle: L,
    store: Arc<dyn DealStore<L::Deal>>,
    workers: Mutex<HashMap<Cid, mpsc::UnboundedSender<L::Event>>>,
    hub: SubscriberHub<L::Event, L::Deal>,
    shutdown_tx: watch::Sender<bool>,
}

/// Cheaply cloneable engine handle.
pub struct DealMachine<L: DealLifecycle> {
    core: Arc<MachineCore<L>>,
}

impl<L: DealLifecycle> Clone for DealMachine<L> {
    fn clone(&self) -> Self {
        Self { core: Arc::clone(&self.core) }
    }
}

impl<L: DealLifecycle> DealMachine<L> {
    pub fn new(lifecycle: L, store: Arc<dyn DealStore<L::Deal>>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            core: Arc::new(MachineCore {
                lifecycle,
                store,
                workers: Mutex::new(HashMap::new()),
                hub: SubscriberHub::new(),
                shutdown_tx,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DealStore<L::Deal>> {
        &self.core.store
    }

    /// Persists a freshly created record so the opening event can be
    /// fired. Refuses a proposal identifier that is already tracked.
    pub fn begin(&self, deal: L::Deal) -> Result<()> {
        if *self.core.shutdown_tx.borrow() {
            return Err(MarketError::EngineStopped);
        }
        let proposal = deal.proposal_cid();
        if self.core.store.get(&proposal)?.is_some() {
            return Err(MarketError::DealExists(proposal));
        }
        self.core.store.put(&deal)
    }

    /// Queues an event for a record. Non-blocking; application happens on
    /// the record's worker in acceptance order.
    pub fn fire(&self, proposal: Cid, event: L::Event) -> Result<()> {
        if *self.core.shutdown_tx.borrow() {
            return Err(MarketError::EngineStopped);
        }
        let mut workers = self.core.workers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = workers.get(&proposal) {
            if tx.send(event).is_ok() {
                return Ok(());
            }
            // Worker exited; replace it below.
            let _ = workers.remove(&proposal);
            return Err(MarketError::EngineStopped);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(event).map_err(|_| MarketError::EngineStopped)?;
        workers.insert(proposal, tx.clone());
        let core = Arc::clone(&self.core);
        tokio::spawn(worker(core, proposal, tx, rx));
        Ok(())
    }

    /// Re-enters every non-terminal record by firing the synthetic restart
    /// event, re-running the handler for the persisted state.
    pub fn restart(&self) -> Result<()> {
        for deal in self.core.store.list()? {
            if !deal.status().is_terminal() {
                self.fire(deal.proposal_cid(), L::restart_event())?;
            }
        }
        Ok(())
    }

    pub fn subscribe(&self, callback: impl Fn(&L::Event, &L::Deal) + Send + Sync + 'static) -> SubscriptionId {
        self.core.hub.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.core.hub.unsubscribe(id);
    }

    pub fn is_terminated(&self, deal: &L::Deal) -> bool {
        deal.status().is_terminal()
    }

    /// Cooperative shutdown: pending queues are dropped, in-flight
    /// handlers are cancelled at their next suspension point, and further
    /// `fire` calls fail.
    pub fn stop(&self) {
        let _ = self.core.shutdown_tx.send(true);
        self.core.workers.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

async fn worker<L: DealLifecycle>(
    core: Arc<MachineCore<L>>,
    proposal: Cid,
    tx: mpsc::UnboundedSender<L::Event>,
    mut rx: mpsc::UnboundedReceiver<L::Event>,
) {
    let mut shutdown_rx = core.shutdown_tx.subscribe();
    loop {
        let event = tokio::select! {
            () = shutdown_signalled(&mut shutdown_rx) => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        step(&core, proposal, &tx, &mut shutdown_rx, event).await;
    }
    debug!(proposal = %proposal, "deal worker stopped");
}

async fn step<L: DealLifecycle>(
    core: &Arc<MachineCore<L>>,
    proposal: Cid,
    tx: &mpsc::UnboundedSender<L::Event>,
    shutdown_rx: &mut watch::Receiver<bool>,
    event: L::Event,
) {
    let deal = match core.store.get(&proposal) {
        Ok(Some(deal)) => deal,
        Ok(None) => {
            warn!(proposal = %proposal, event = L::event_name(&event), "event for unknown deal dropped");
            return;
        }
        Err(err) => {
            warn!(proposal = %proposal, error = %err, "reading deal record failed, event dropped");
            return;
        }
    };

    let from = deal.status();
    if from.is_terminal() {
        warn!(
            proposal = %proposal,
            status = %from,
            event = L::event_name(&event),
            "invalid transition: deal already terminated"
        );
        return;
    }
    let to = match L::transition(from, &event) {
        Rule::Goto(to) => to,
        Rule::Reenter => from,
        Rule::Invalid => {
            warn!(
                proposal = %proposal,
                status = %from,
                event = L::event_name(&event),
                "invalid transition: event not declared for state"
            );
            return;
        }
    };

    let mut deal = deal;
    L::apply(&mut deal, &event);
    deal.set_status(to);
    if let Err(err) = core.store.put(&deal) {
        warn!(proposal = %proposal, error = %err, "persisting deal record failed, event dropped");
        return;
    }
    info!(
        proposal = %proposal,
        event = L::event_name(&event),
        from = %from,
        to = %to,
        "deal state transition"
    );
    core.hub.publish(&event, &deal);

    let sink = EventSink { proposal, tx: tx.clone() };
    tokio::select! {
        () = core.lifecycle.on_entered(deal, sink) => {}
        () = shutdown_signalled(shutdown_rx) => {
            debug!(proposal = %proposal, status = %to, "state handler cancelled by shutdown");
        }
    }
}

async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
