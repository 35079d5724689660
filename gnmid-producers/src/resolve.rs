use crate::remap::PortNameRemap;
use gnmid_producer::ProducerError;
use gnmid_store::StoreClient;
use gnmid_types::{DbTriple, Path, StoreKind};

/// Implements the path-to-triple algorithm of §4.4: dispatches on the
/// number of path elements, applying the port-name remap to the second
/// segment and falling back from a 3-segment composite key to a
/// 2-segment-key-plus-field reading when the composite key doesn't exist.
pub async fn resolve_triple(
    path: &Path,
    store_kind: StoreKind,
    store: &dyn StoreClient,
    remap: &PortNameRemap,
) -> Result<DbTriple, ProducerError> {
    let delim = store_kind.delimiter();
    let segs: Vec<&str> = path.elem.iter().map(|e| e.name.as_str()).collect();

    match segs.len() {
        0 => Err(ProducerError::InvalidPath("path has no elements".into())),
        1 => resolve_table_only(segs[0], store_kind, store).await,
        2 => {
            let key = remap.resolve(store, segs[1]).await;
            let triple = DbTriple {
                store: store_kind,
                table: segs[0].to_string(),
                key: Some(key),
                field: None,
            };
            ensure_key_exists(triple, store).await
        }
        3 => {
            let key = remap.resolve(store, segs[1]).await;
            let composite = format!("{key}{delim}{}", segs[2]);
            let composite_triple = DbTriple {
                store: store_kind,
                table: segs[0].to_string(),
                key: Some(composite),
                field: None,
            };
            if store
                .exists(&composite_triple.redis_key())
                .await
                .map_err(store_err)?
            {
                return Ok(composite_triple);
            }
            let field_triple = DbTriple {
                store: store_kind,
                table: segs[0].to_string(),
                key: Some(key),
                field: Some(segs[2].to_string()),
            };
            ensure_key_exists(field_triple, store).await
        }
        4 => {
            let key = remap.resolve(store, segs[1]).await;
            let composite = format!("{key}{delim}{}", segs[2]);
            let triple = DbTriple {
                store: store_kind,
                table: segs[0].to_string(),
                key: Some(composite),
                field: Some(segs[3].to_string()),
            };
            ensure_key_exists(triple, store).await
        }
        _ => Err(ProducerError::InvalidPath(format!(
            "path has {} elements, at most 4 are supported",
            segs.len()
        ))),
    }
}

async fn resolve_table_only(
    table: &str,
    store_kind: StoreKind,
    store: &dyn StoreClient,
) -> Result<DbTriple, ProducerError> {
    let found = if store_kind.has_keyless_tables() {
        store.exists(table).await.map_err(store_err)?
    } else {
        !store.keys(&format!("{table}*")).await.map_err(store_err)?.is_empty()
    };
    if !found {
        return Err(ProducerError::PathNotFound);
    }
    Ok(DbTriple {
        store: store_kind,
        table: table.to_string(),
        key: None,
        field: None,
    })
}

async fn ensure_key_exists(triple: DbTriple, store: &dyn StoreClient) -> Result<DbTriple, ProducerError> {
    if store.exists(&triple.redis_key()).await.map_err(store_err)? {
        Ok(triple)
    } else {
        Err(ProducerError::PathNotFound)
    }
}

/// `gnmid-producer` has no dependency on `gnmid-store`, so the conversion
/// from [`gnmid_store::StoreError`] lives here rather than as a `From` impl.
pub(crate) fn store_err(e: gnmid_store::StoreError) -> ProducerError {
    match e {
        gnmid_store::StoreError::Missing => ProducerError::PathNotFound,
        other => ProducerError::BackingStoreTransient(other.to_string()),
    }
}
