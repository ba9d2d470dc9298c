// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Reading the live state of an external schema from the system catalogs.

use crate::desc::{ExternalSchema, SchemaId};
use crate::error::{ExternalSchemaError, WarehouseError};
use crate::executor::{CatalogQuery, Executor, Row};

/// Reads the external schema with the given oid.
///
/// Joins `pg_namespace` with `svv_external_schemas`, pulling the IAM role out
/// of the `esoptions` JSON. This is the only place live state comes from:
/// every mutation reads back through here before reporting success.
///
/// # Errors
///
/// - [`ExternalSchemaError::NotFound`] if no external schema has that oid.
/// - [`ExternalSchemaError::StorageAccess`] if the query fails or returns
///   values of the wrong shape.
pub async fn read_state(
    executor: &dyn Executor,
    id: SchemaId,
) -> Result<ExternalSchema, ExternalSchemaError> {
    let context = format!("error reading external schema information for oid {id}");
    let rows = executor
        .query(&CatalogQuery::ExternalSchema { id })
        .await
        .map_err(ExternalSchemaError::storage(context.clone()))?;
    let row = match rows.as_slice() {
        [] => {
            return Err(ExternalSchemaError::NotFound {
                what: format!("with oid {id}"),
            });
        }
        [row] => row,
        rows => {
            return Err(ExternalSchemaError::StorageAccess {
                context,
                source: WarehouseError::Generic(anyhow::anyhow!(
                    "expected one row, found {}",
                    rows.len()
                )),
            });
        }
    };
    decode(id, row).map_err(ExternalSchemaError::storage(context))
}

fn decode(id: SchemaId, row: &Row) -> Result<ExternalSchema, WarehouseError> {
    Ok(ExternalSchema {
        id,
        schema_name: row.text(0)?.to_string(),
        owner: row.int4(1)?,
        database_name: row.text(2)?.to_string(),
        iam_role: row.text(3)?.to_string(),
    })
}
