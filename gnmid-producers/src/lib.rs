//! Reference producers (§4.4, §4.5): translate resolved paths into reads
//! against a [`gnmid_store::StoreClient`] and feed them through a
//! [`gnmid_producer::Producer`] into the session's queue.

mod counter;
mod db;
mod remap;
mod resolve;

pub use counter::CounterProducer;
pub use db::DbProducer;
pub use remap::PortNameRemap;
pub use resolve::resolve_triple;
