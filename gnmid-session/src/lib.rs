//! Client Session (§4.7): owns one client's subscription lifecycle end to
//! end, from the first `SubscriptionList` message through producer selection,
//! admission, and multiplexing the producer's queue out to the transport.

mod error;
mod opaque;
mod select;
mod session;

pub use error::EngineError;
pub use select::{SelectError, StoreRegistry, ORIGIN_OPENCONFIG, TARGET_EVENTS, TARGET_OTHERS};
pub use session::{Session, SessionCounters};
