#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

pub mod alias_table;
pub mod callbacks;
pub mod datagram;
pub mod dispatch;
pub mod engine;
pub mod event_transport;
pub mod fifo;
pub mod fragmenter;
pub mod inflight;
pub mod login;
pub mod message;
pub mod message_network;
pub mod node;
pub mod pool;
pub mod reassembler;
pub mod telemetry;

pub use callbacks::{ConsumerState, NodeCallbacks, NullLock, SharedResourceLock};
pub use dispatch::{Dispatcher, HandlerOutcome};
pub use engine::Engine;
pub use event_transport::{EnumeratorState, EventEnumerator};
pub use fifo::FrameFifo;
pub use inflight::InFlightList;
pub use login::{LoginState, LoginStateMachine};
pub use message::{Message, Payload};
pub use node::{NodeParameters, OpenLcbNode};
pub use pool::{BufferPool, MsgRef, PoolError};
pub use telemetry::{DropCause, Telemetry};
