#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

pub mod alias;
pub mod error;
pub mod event;
pub mod frame;
pub mod macros;
pub mod mti;
pub mod node_id;
pub mod payload;

pub use alias::{Alias, AliasSeed};
pub use error::ErrorCode;
pub use event::EventId;
pub use frame::{AddressedFraming, CanFrame, ControlFrame, FrameType, Identifier};
pub use mti::{Mti, Psi};
pub use node_id::NodeId;
pub use payload::PayloadClass;
