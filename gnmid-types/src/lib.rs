//! Data model shared by the subscription engine: paths, prefixes,
//! subscription lists, the internal value envelope, and the DB path triple.

mod path;
mod subscription;
mod triple;
mod value;

pub use path::{Path, PathElem, Prefix};
pub use subscription::{Mode, Subscription, SubscriptionList};
pub use triple::{DbTriple, StoreKind};
pub use value::{Payload, TypedValue, ValueEnvelope};
