// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Mapping between schema names and their stable namespace oids.

use tracing::{debug, warn};

use crate::desc::SchemaId;
use crate::error::ExternalSchemaError;
use crate::executor::{CatalogQuery, Executor};
use crate::retry::{Retry, RetryResult};

/// Returns the oid of the namespace called `name`.
///
/// # Errors
///
/// - [`ExternalSchemaError::NotFound`] if no namespace has that name, e.g.
///   because the creating statement has not propagated yet.
/// - [`ExternalSchemaError::StorageAccess`] if the query fails.
pub async fn resolve_identifier_by_name(
    executor: &dyn Executor,
    name: &str,
) -> Result<SchemaId, ExternalSchemaError> {
    let context = || format!("error reading oid for external schema {name}");
    let rows = executor
        .query(&CatalogQuery::NamespaceOid { name })
        .await
        .map_err(ExternalSchemaError::storage(context()))?;
    let Some(row) = rows.first() else {
        return Err(ExternalSchemaError::NotFound {
            what: name.to_string(),
        });
    };
    let oid = row.oid(0).map_err(ExternalSchemaError::storage(context()))?;
    Ok(SchemaId(oid))
}

/// Reports whether a namespace with the given oid exists.
///
/// A missing namespace is not an error: it means the schema was dropped
/// out of band.
pub async fn check_exists(
    executor: &dyn Executor,
    id: SchemaId,
) -> Result<bool, ExternalSchemaError> {
    let rows = executor
        .query(&CatalogQuery::NamespaceName { id })
        .await
        .map_err(ExternalSchemaError::storage(format!(
            "error reading external schema with oid {id}"
        )))?;
    Ok(!rows.is_empty())
}

/// Waits for a newly created schema to become visible in `pg_namespace`,
/// returning its oid.
///
/// Catalog changes are not guaranteed to be visible to subsequent reads right
/// away, so the lookup is retried until `retry` gives up.
pub async fn await_visible(
    executor: &dyn Executor,
    name: &str,
    retry: Retry,
) -> Result<SchemaId, ExternalSchemaError> {
    let start = tokio::time::Instant::now();
    let result = retry
        .retry_async(|state| async move {
            match resolve_identifier_by_name(executor, name).await {
                Ok(id) => RetryResult::Ok(id),
                Err(e) if e.is_not_found() => {
                    debug!(schema = name, attempt = state.i, "external schema not yet visible");
                    RetryResult::RetryableErr(e)
                }
                Err(e) => RetryResult::FatalErr(e),
            }
        })
        .await;
    match result {
        Err(e) if e.is_not_found() => {
            let elapsed = start.elapsed();
            warn!(schema = name, ?elapsed, "external schema never became visible");
            Err(ExternalSchemaError::PropagationTimeout {
                schema: name.to_string(),
                elapsed,
            })
        }
        result => result,
    }
}
