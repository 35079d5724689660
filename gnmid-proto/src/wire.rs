use crate::pb;
use gnmid_types::{Payload, TypedValue, ValueEnvelope};

/// Converts an internal [`ValueEnvelope`] to a transport response (§4.8).
///
/// A sync marker becomes a `Sync` frame, a typed envelope becomes an
/// `Update` frame. A fatal envelope is never a transport frame: it is
/// consumed by the sender, which turns it into a terminal error instead of
/// calling this function, so this returns `None` for it.
pub fn envelope_to_response(env: &ValueEnvelope) -> Option<pb::SubscribeResponse> {
    let response = match &env.payload {
        Payload::SyncMarker => pb::subscribe_response::Response::Sync(pb::Sync { timestamp: env.timestamp }),
        Payload::Typed(value) => pb::subscribe_response::Response::Update(pb::Update {
            path: env.path.clone().map(path_to_pb),
            timestamp: env.timestamp,
            value: Some(typed_value_to_pb(value)),
        }),
        Payload::Fatal(_) => return None,
    };
    Some(pb::SubscribeResponse { response: Some(response) })
}

fn path_to_pb(path: gnmid_types::Path) -> pb::Path {
    pb::Path {
        elem: path
            .elem
            .into_iter()
            .map(|e| pb::PathElem {
                name: e.name,
                key: e.key.into_iter().collect(),
            })
            .collect(),
        origin: path.origin.unwrap_or_default(),
        target: path.target.unwrap_or_default(),
    }
}

fn typed_value_to_pb(value: &TypedValue) -> pb::TypedValue {
    let value = match value {
        TypedValue::Scalar(s) => pb::typed_value::Value::Scalar(s.clone()),
        TypedValue::Json(v) => pb::typed_value::Value::Json(v.to_string()),
    };
    pb::TypedValue { value: Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnmid_types::{Path, PathElem};

    #[test]
    fn sync_marker_becomes_sync_frame() {
        let env = ValueEnvelope::sync(42);
        let resp = envelope_to_response(&env).unwrap();
        assert!(matches!(
            resp.response,
            Some(pb::subscribe_response::Response::Sync(pb::Sync { timestamp: 42 }))
        ));
    }

    #[test]
    fn fatal_envelope_has_no_wire_representation() {
        let env = ValueEnvelope::fatal(1, "boom");
        assert!(envelope_to_response(&env).is_none());
    }

    #[test]
    fn typed_scalar_becomes_update_frame() {
        let env = ValueEnvelope::typed(
            7,
            Path::new(vec![PathElem::new("a")]),
            TypedValue::Scalar("3".into()),
        );
        let resp = envelope_to_response(&env).unwrap();
        match resp.response {
            Some(pb::subscribe_response::Response::Update(update)) => {
                assert_eq!(update.timestamp, 7);
                assert_eq!(
                    update.value,
                    Some(pb::TypedValue {
                        value: Some(pb::typed_value::Value::Scalar("3".into()))
                    })
                );
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
