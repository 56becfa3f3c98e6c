//! Engine-level tests: the provider front wired end to end over fakes,
//! restart resumption, terminality, and event-queue discipline.

mod fixtures;

use std::sync::Arc;

use fvm_ipld_encoding::to_vec;
use fvm_shared::econ::TokenAmount;

use fixtures::*;
use market_core::application::machine::DealMachine;
use market_core::application::provider::{ProviderLifecycle, StorageProvider};
use market_core::domain::ask::AskOptions;
use market_core::domain::deal::provider::{ProviderDeal, ProviderEvent};
use market_core::domain::deal::DealStatus;
use market_core::domain::message::{ProposalMessage, PublishStorageDealsReturn};
use market_core::foundation::{MarketError, PeerId};
use market_core::infrastructure::config::ProviderConfig;
use market_core::infrastructure::filestore::MemoryFileStore;
use market_core::infrastructure::node::fake::FakeProviderNode;
use market_core::infrastructure::node::waiter::MessageWaiter;
use market_core::infrastructure::piecestore::MemoryPieceStore;
use market_core::infrastructure::storage::memory::{MemoryAskStore, MemoryDealStore};
use market_core::infrastructure::storage::DealStore;

fn publish_ready_node(deal_id: u64) -> FakeProviderNode {
    let mut node = default_provider_node();
    node.publish_cid = Some(cid_of(b"publish-message"));
    node.common.wait_for_message_return = to_vec(&PublishStorageDealsReturn { ids: vec![deal_id] }).unwrap();
    node
}

fn provider_over(node: FakeProviderNode, file_store: Arc<MemoryFileStore>) -> (StorageProvider, Arc<FakeProviderNetwork>) {
    let network = Arc::new(FakeProviderNetwork::default());
    let provider = StorageProvider::new(
        ProviderConfig::default(),
        provider_address(),
        PeerId::new("miner-peer"),
        Arc::new(node),
        Arc::new(MemoryDealStore::new()),
        Arc::new(MemoryAskStore::new()),
        file_store,
        Arc::new(MemoryPieceStore::new()),
        Arc::new(FakeCommp::default()),
        Arc::new(FakeTransferLauncher::default()),
        Arc::clone(&network) as Arc<dyn market_core::infrastructure::network::ProviderNetwork>,
    );
    (provider, network)
}

#[tokio::test]
async fn provider_walks_a_deal_from_proposal_to_completion() {
    let file_store = Arc::new(MemoryFileStore::with_files([
        (piece_path(), vec![1u8; 400]),
        (metadata_path(), metadata_bytes()),
    ]));
    let (provider, network) = provider_over(publish_ready_node(42), file_store);
    provider.start().unwrap();

    // Publish an ask matching the default proposal terms.
    provider
        .add_ask(TokenAmount::from_atto(10_000_000), 1_000, AskOptions::default())
        .await
        .unwrap();
    let asks = provider.list_asks(&provider_address());
    assert_eq!(asks.len(), 1);
    assert_eq!(asks[0].ask.seq_no, 0);
    assert_eq!(asks[0].ask.timestamp, DEFAULT_HEIGHT);

    let message = ProposalMessage { deal_proposal: signed_proposal(default_proposal()), piece: graphsync_data_ref() };
    let proposal_cid = provider.receive_proposal(message, PeerId::new("client-peer")).unwrap();

    // The engine validates, accepts, and opens the pull channel; the
    // transfer subsystem reports completion out of band.
    wait_until(&provider, proposal_cid, DealStatus::Transferring).await;
    provider.on_data_transfer_completed(proposal_cid).unwrap();

    let done = wait_until(&provider, proposal_cid, DealStatus::Completed).await;
    assert_eq!(done.message, "");
    assert_eq!(done.deal_id, 42);
    assert!(done.connection_closed);

    // The acceptance went back to the client with the publish message.
    let responses = network.responses.lock().unwrap().clone();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].response.state, DealStatus::ProposalAccepted);
    assert_eq!(responses[0].response.publish_message, Some(cid_of(b"publish-message")));

    provider.stop();
}

#[tokio::test]
async fn duplicate_proposals_are_refused() {
    let (provider, _network) = provider_over(default_provider_node(), Arc::new(MemoryFileStore::new()));
    provider.start().unwrap();

    let message = ProposalMessage { deal_proposal: signed_proposal(default_proposal()), piece: graphsync_data_ref() };
    provider.receive_proposal(message.clone(), PeerId::new("client-peer")).unwrap();
    let err = provider.receive_proposal(message, PeerId::new("client-peer")).unwrap_err();
    assert!(matches!(err, MarketError::DealExists(_)));
}

#[tokio::test]
async fn import_data_resumes_an_offline_deal() {
    let file_store = Arc::new(MemoryFileStore::with_files([(piece_path(), vec![1u8; 400])]));
    let (provider, _network) = provider_over(publish_ready_node(7), file_store);
    provider.start().unwrap();

    let message = ProposalMessage { deal_proposal: signed_proposal(default_proposal()), piece: manual_data_ref() };
    let proposal_cid = provider.receive_proposal(message, PeerId::new("client-peer")).unwrap();

    wait_until(&provider, proposal_cid, DealStatus::WaitingForData).await;
    provider.import_data_for_deal(proposal_cid, &mut &b"the deal payload"[..]).unwrap();
    let done = wait_until(&provider, proposal_cid, DealStatus::Completed).await;
    assert_eq!(done.deal_id, 7);
}

#[tokio::test]
async fn import_data_is_rejected_outside_waiting_for_data() {
    let (provider, _network) = provider_over(default_provider_node(), Arc::new(MemoryFileStore::new()));
    provider.start().unwrap();

    let message = ProposalMessage { deal_proposal: signed_proposal(default_proposal()), piece: graphsync_data_ref() };
    let proposal_cid = provider.receive_proposal(message, PeerId::new("client-peer")).unwrap();
    wait_until(&provider, proposal_cid, DealStatus::Transferring).await;

    let err = provider.import_data_for_deal(proposal_cid, &mut &b"data"[..]).unwrap_err();
    assert!(matches!(err, MarketError::UnexpectedDealStatus { .. }));
}

/// Polls the provider's local-deal listing until the deal reaches the
/// wanted state.
async fn wait_until(provider: &StorageProvider, proposal: cid::Cid, status: DealStatus) -> ProviderDeal {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        match provider.get_local_deal(&proposal).unwrap() {
            Some(deal) if deal.state == status => return deal,
            Some(deal) if tokio::time::Instant::now() > deadline => {
                panic!("deal {} stuck in {}", proposal, deal.state)
            }
            None if tokio::time::Instant::now() > deadline => {
                panic!("deal {} never appeared", proposal)
            }
            _ => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
        }
    }
}

#[tokio::test]
async fn restart_resumes_a_publishing_deal() {
    // A deal that crashed while awaiting its publish message: the restart
    // event re-enters `Publishing` and the wait resumes with the recorded
    // message identifier.
    let env = {
        let mut env = FakeProviderEnv::default();
        env.node = Arc::new(publish_ready_node(9));
        env.file_store = Arc::new(MemoryFileStore::with_files([(piece_path(), vec![1u8; 400])]));
        Arc::new(env)
    };
    let store = memory_store::<ProviderDeal>();
    let machine = DealMachine::new(ProviderLifecycle::new(env.clone(), MessageWaiter::new()), Arc::clone(&store));

    let mut deal = provider_deal_in(DealStatus::Publishing, default_proposal(), graphsync_data_ref());
    deal.publish_cid = Some(cid_of(b"publish-message"));
    deal.piece_path = piece_path();
    store.put(&deal).unwrap();

    machine.restart().unwrap();
    let done = settle(&store, deal.proposal_cid, |d: &ProviderDeal| d.state == DealStatus::Completed).await;
    assert_eq!(done.deal_id, 9);
    assert_eq!(done.publish_cid, Some(cid_of(b"publish-message")));
}

#[tokio::test]
async fn restart_skips_terminal_deals() {
    let env = Arc::new(FakeProviderEnv::default());
    let store = memory_store::<ProviderDeal>();
    let machine = DealMachine::new(ProviderLifecycle::new(env, MessageWaiter::new()), Arc::clone(&store));
    let trail = record_trail(&machine);

    let done = provider_deal_in(DealStatus::Completed, default_proposal(), graphsync_data_ref());
    store.put(&done).unwrap();
    machine.restart().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(trail_names(&trail).is_empty());
}

#[tokio::test]
async fn undeclared_events_leave_the_record_untouched() {
    let env = Arc::new(FakeProviderEnv::default());
    let store = memory_store::<ProviderDeal>();
    let machine = DealMachine::new(ProviderLifecycle::new(env, MessageWaiter::new()), Arc::clone(&store));
    let trail = record_trail(&machine);

    let deal = provider_deal_in(DealStatus::Transferring, default_proposal(), graphsync_data_ref());
    store.put(&deal).unwrap();
    machine.fire(deal.proposal_cid, ProviderEvent::Open).unwrap();
    machine.fire(deal.proposal_cid, ProviderEvent::Funded).unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let unchanged = store.get(&deal.proposal_cid).unwrap().unwrap();
    assert_eq!(unchanged.state, DealStatus::Transferring);
    assert_eq!(unchanged.message, "");
    assert!(trail_names(&trail).is_empty());
}

#[tokio::test]
async fn stopped_engines_refuse_events() {
    let env = Arc::new(FakeProviderEnv::default());
    let store = memory_store::<ProviderDeal>();
    let machine = DealMachine::new(ProviderLifecycle::new(env, MessageWaiter::new()), Arc::clone(&store));

    let deal = provider_deal_in(DealStatus::Transferring, default_proposal(), graphsync_data_ref());
    store.put(&deal).unwrap();
    machine.stop();

    let err = machine.fire(deal.proposal_cid, ProviderEvent::DataTransferCompleted).unwrap_err();
    assert!(matches!(err, MarketError::EngineStopped));
}

#[tokio::test]
async fn store_watch_feeds_every_put() {
    let store = MemoryDealStore::<ProviderDeal>::new();
    let mut watch = store.watch();
    let deal = provider_deal_in(DealStatus::Validating, default_proposal(), graphsync_data_ref());
    store.put(&deal).unwrap();

    let seen = watch.recv().await.unwrap();
    assert_eq!(seen.proposal_cid, deal.proposal_cid);
    assert_eq!(seen.state, DealStatus::Validating);
}
