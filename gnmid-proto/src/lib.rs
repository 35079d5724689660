//! The wire schema (§6, §4.8) and the conversions between it and the
//! internal data model of `gnmid-types`. This is the only crate that names
//! `tonic`/`prost` directly; everything upstream of the session boundary
//! works exclusively with `gnmid_types` values.

mod convert;
mod wire;

pub mod pb {
    #![allow(clippy::derive_partial_eq_without_eq)]
    tonic::include_proto!("gnmid.v1");
}

pub use convert::{first_subscription_list, is_poll_trigger, ConvertError, FIRST_MESSAGE_MUST_BE_SUBSCRIBE};
pub use wire::envelope_to_response;
