//! Framework-agnostic domain model: transactions, ledger entries,
//! tokens and the status state machine.

pub mod event;
pub mod money;
pub mod notification;
pub mod secret;
pub mod token;
pub mod transaction;

pub use event::{
    payload_fingerprint, EventStatus, NormalizedStatus, ParsedCallback, SignatureCheck,
    TokenMaterial, WebhookEvent,
};
pub use money::Currency;
pub use notification::DomainEvent;
pub use secret::Sealed;
pub use token::{CardToken, TokenView};
pub use transaction::{
    AppliedEvent, OperationMode, Transaction, TransactionDraft, TransactionStatus, Transition,
};
