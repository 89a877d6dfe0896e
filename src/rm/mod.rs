//! # Reliable Messaging
//!
//! WS-ReliableMessaging source and destination built on per-sequence
//! transactions.
//!
//! ## Architecture
//!
//! ```text
//! Reliable Messaging
//! ├── RmMessageReceiver     (inbound entry point, one transaction per message)
//! ├── ReliableSender        (outbound numbering, queueing, acknowledgements)
//! ├── SequenceStateMachine  (INITIAL → CREATING → ESTABLISHED → TERMINATING → TERMINATED)
//! ├── StorageManager        (sequence records behind key-scoped locks)
//! ├── RetransmissionScheduler (one cancelable timer per message number)
//! ├── SequenceReaper        (inactivity timeout and purge)
//! └── ReliableEnvironment   (bridges synchronous mediation sends)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use synapse_core::message::MessageContext;
//! use synapse_core::rm::{ChannelTransport, ReliableSender, RmPolicy, StorageManager};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let (transport, _wire) = ChannelTransport::new();
//! let sender = ReliableSender::new(
//!     Arc::new(StorageManager::new()),
//!     Arc::new(transport),
//!     RmPolicy::default(),
//! );
//!
//! let ctx = MessageContext::new(serde_json::json!({"order": 42}))
//!     .with_to("http://backend/services/Orders");
//! let number = sender.send("orders", ctx, false).await.unwrap();
//! assert_eq!(number, 1);
//! # });
//! ```

pub mod environment;
pub mod errors;
pub mod events;
pub mod headers;
pub mod messages;
pub mod policy;
pub mod publisher;
pub mod ranges;
pub mod reaper;
pub mod receiver;
pub mod retransmission;
pub mod sender;
pub mod state_machine;
pub mod states;
pub mod storage;
pub mod transport;

pub use environment::ReliableEnvironment;
pub use errors::{
    ProcessingError, ProcessingResult, RmFault, RmResult, StorageError, StorageResult,
};
pub use events::SequenceEvent;
pub use headers::{AckRange, RmHeader};
pub use messages::MessageCatalog;
pub use policy::{BackoffStrategy, RmPolicy};
pub use publisher::{RmEvent, RmEventPublisher};
pub use reaper::{ReapReport, SequenceReaper};
pub use receiver::{ReceiveOutcome, RmMessageReceiver};
pub use retransmission::RetransmissionScheduler;
pub use sender::ReliableSender;
pub use state_machine::SequenceStateMachine;
pub use states::SequenceState;
pub use storage::{SequenceRecord, SequenceRole, StorageManager, StoredMessage, Transaction};
pub use transport::{send_timeout, ChannelTransport, RmTransport, TransportError};
