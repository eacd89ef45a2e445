//! The engine's services: webhook intake, session initiation, the
//! partitioned apply queue and its workers.

pub mod cache;
pub mod gateway;
pub mod initiator;
pub mod queue;
pub mod reconciler;

pub use cache::RecentKeyCache;
pub use gateway::{GatewayOutcome, WebhookGateway};
pub use initiator::{SessionInitiator, SessionOutcome, SessionRequest};
pub use queue::EventQueue;
pub use reconciler::{ApplyOutcome, ApplyPolicy, Reconciler};
