//! Path & Target Resolver (§4.1). A pure function: no I/O, no backing-store
//! calls, so it can run synchronously before admission control or producer
//! construction.

use gnmid_types::{Path, SubscriptionList};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid path")]
    NoSubscriptions,
    #[error("origin conflict between prefix and subscription paths")]
    OriginConflict,
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub paths: Vec<Path>,
    pub origin: String,
    pub target: String,
}

/// Applies §4.1's rules to produce the effective paths plus the agreed
/// origin and target, or a failure describing why they could not be agreed.
pub fn resolve(list: &SubscriptionList) -> Result<Resolved, ResolveError> {
    if list.subscription.is_empty() {
        return Err(ResolveError::NoSubscriptions);
    }

    for sub in &list.subscription {
        if sub.path.elem.iter().any(|e| e.name.is_empty()) {
            return Err(ResolveError::InvalidPath("empty path element name".into()));
        }
    }

    let mut path_origin: Option<String> = None;
    for sub in &list.subscription {
        if let Some(origin) = sub.path.origin.as_ref().filter(|o| !o.is_empty()) {
            match &path_origin {
                None => path_origin = Some(origin.clone()),
                Some(existing) if existing != origin => return Err(ResolveError::OriginConflict),
                Some(_) => {}
            }
        }
    }

    let prefix_origin = &list.prefix.origin;
    let effective_origin = if prefix_origin.is_empty() {
        path_origin.unwrap_or_default()
    } else {
        match &path_origin {
            Some(po) if po != prefix_origin => return Err(ResolveError::OriginConflict),
            _ => prefix_origin.clone(),
        }
    };

    let paths = list
        .subscription
        .iter()
        .map(|sub| sub.path.prefixed_by(&list.prefix.path))
        .collect();

    Ok(Resolved {
        paths,
        origin: effective_origin,
        target: list.prefix.target.clone(),
    })
}
