//! Transport boundary. The gossip wire itself is out of scope; the core
//! consumes the `Transport` trait (see `consensus`) for broadcast and
//! feeds inbound traffic through the two-stage validation pipeline here.

pub mod dispatch;
pub mod local;
pub mod validation;

pub use dispatch::{DispatchError, Dispatcher};
pub use local::{LocalHub, LocalTransport};
pub use validation::{InboundValidator, RejectReason, ValidatorConfig};
