use crate::pb;
use gnmid_types::{Mode, Path, PathElem, Prefix, Subscription, SubscriptionList};
use std::collections::BTreeMap;
use thiserror::Error;

pub const FIRST_MESSAGE_MUST_BE_SUBSCRIBE: &str = "first message must be SubscriptionList";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("{FIRST_MESSAGE_MUST_BE_SUBSCRIBE}")]
    FirstMessageNotSubscribe,
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl From<pb::PathElem> for PathElem {
    fn from(e: pb::PathElem) -> Self {
        PathElem {
            name: e.name,
            key: e.key.into_iter().collect::<BTreeMap<_, _>>(),
        }
    }
}

impl From<pb::Path> for Path {
    fn from(p: pb::Path) -> Self {
        Path {
            elem: p.elem.into_iter().map(PathElem::from).collect(),
            origin: (!p.origin.is_empty()).then_some(p.origin),
            target: (!p.target.is_empty()).then_some(p.target),
        }
    }
}

impl TryFrom<pb::Prefix> for Prefix {
    type Error = ConvertError;

    fn try_from(p: pb::Prefix) -> Result<Self, Self::Error> {
        Ok(Prefix {
            path: p.path.map(Path::from).unwrap_or_default(),
            origin: p.origin,
            target: p.target,
        })
    }
}

impl From<pb::SubscriptionMode> for Mode {
    fn from(m: pb::SubscriptionMode) -> Self {
        match m {
            pb::SubscriptionMode::Stream => Mode::Stream,
            pb::SubscriptionMode::Poll => Mode::Poll,
            pb::SubscriptionMode::Once => Mode::Once,
        }
    }
}

impl TryFrom<pb::SubscriptionList> for SubscriptionList {
    type Error = ConvertError;

    fn try_from(list: pb::SubscriptionList) -> Result<Self, Self::Error> {
        let prefix = list
            .prefix
            .ok_or_else(|| ConvertError::Malformed("subscription list has no prefix".into()))?
            .try_into()?;
        let mode = pb::SubscriptionMode::try_from(list.mode)
            .map_err(|_| ConvertError::Malformed("unknown subscription mode".into()))?;
        Ok(SubscriptionList {
            prefix,
            subscription: list
                .subscription
                .into_iter()
                .map(|s| Subscription {
                    path: s.path.map(Path::from).unwrap_or_default(),
                })
                .collect(),
            mode: mode.into(),
            sample_interval_seconds: (list.sample_interval_seconds > 0).then_some(list.sample_interval_seconds),
        })
    }
}

/// Extracts the mandatory initial `SubscriptionList` from the first message
/// of a `Subscribe` stream (§4.7: "If the first message is not a
/// SubscriptionList → reject").
pub fn first_subscription_list(req: pb::SubscribeRequest) -> Result<SubscriptionList, ConvertError> {
    match req.request {
        Some(pb::subscribe_request::Request::Subscribe(list)) => list.try_into(),
        _ => Err(ConvertError::FirstMessageNotSubscribe),
    }
}

/// Every message after the first is a poll trigger in POLL mode; anything
/// else is rejected by the receiver (§4.7).
pub fn is_poll_trigger(req: &pb::SubscribeRequest) -> bool {
    matches!(req.request, Some(pb::subscribe_request::Request::Poll(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_subscribe_first_message_is_rejected() {
        let req = pb::SubscribeRequest {
            request: Some(pb::subscribe_request::Request::Poll(pb::Poll {})),
        };
        assert_eq!(
            first_subscription_list(req),
            Err(ConvertError::FirstMessageNotSubscribe)
        );
    }

    #[test]
    fn converts_a_well_formed_subscription_list() {
        let req = pb::SubscribeRequest {
            request: Some(pb::subscribe_request::Request::Subscribe(pb::SubscriptionList {
                prefix: Some(pb::Prefix {
                    path: None,
                    origin: String::new(),
                    target: "state".into(),
                }),
                subscription: vec![pb::Subscription {
                    path: Some(pb::Path {
                        elem: vec![pb::PathElem {
                            name: "PORT_TABLE".into(),
                            key: Default::default(),
                        }],
                        origin: String::new(),
                        target: String::new(),
                    }),
                }],
                mode: pb::SubscriptionMode::Once as i32,
                sample_interval_seconds: 0,
            })),
        };
        let list = first_subscription_list(req).unwrap();
        assert_eq!(list.prefix.target, "state");
        assert_eq!(list.mode, Mode::Once);
        assert_eq!(list.subscription.len(), 1);
    }
}
