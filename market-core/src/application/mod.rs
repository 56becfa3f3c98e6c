pub mod ask;
pub mod client;
pub mod client_states;
pub mod environment;
pub mod machine;
pub mod provider;
pub mod provider_states;
pub mod subscribers;

pub use client::{ProposeDealResult, StorageClient};
pub use environment::{ClientEnvironment, ProviderEnvironment};
pub use machine::{DealLifecycle, DealMachine, EventSink};
pub use provider::StorageProvider;
pub use subscribers::{SubscriberHub, SubscriptionId};
