// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Transferring ownership of external schemas.

use std::collections::BTreeMap;

use tracing::info;

use crate::desc::UserId;
use crate::error::ExternalSchemaError;
use crate::executor::{CatalogQuery, Executor};
use crate::sql::{Ident, Statement};

/// Looks up the user names for `ids`, in the same order.
///
/// # Errors
///
/// - [`ExternalSchemaError::OwnerResolution`] if any id matches no user, or
///   more than one.
/// - [`ExternalSchemaError::StorageAccess`] if the query fails.
pub async fn usernames_for_ids(
    executor: &dyn Executor,
    ids: &[UserId],
) -> Result<Vec<String>, ExternalSchemaError> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let context = || format!("error reading user names for {ids:?}");
    let rows = executor
        .query(&CatalogQuery::UserNames { ids })
        .await
        .map_err(ExternalSchemaError::storage(context()))?;

    let mut names: BTreeMap<UserId, Vec<String>> = BTreeMap::new();
    for row in &rows {
        let id = row.int4(0).map_err(ExternalSchemaError::storage(context()))?;
        let name = row.text(1).map_err(ExternalSchemaError::storage(context()))?;
        names.entry(id).or_default().push(name.to_string());
    }

    ids.iter()
        .map(|id| match names.get(id).map(Vec::as_slice) {
            Some([name]) => Ok(name.clone()),
            found => Err(ExternalSchemaError::OwnerResolution {
                owner: *id,
                found: found.map_or(0, <[String]>::len),
            }),
        })
        .collect()
}

/// Makes `owner` the owner of the schema currently called `schema_name`.
///
/// Callers that also rename the schema must rename it first and pass the new
/// name.
pub async fn set_owner(
    executor: &dyn Executor,
    schema_name: &Ident,
    owner: UserId,
) -> Result<(), ExternalSchemaError> {
    let owner_name = usernames_for_ids(executor, &[owner])
        .await?
        .pop()
        .ok_or(ExternalSchemaError::OwnerResolution { owner, found: 0 })?;
    let statement = Statement::AlterSchemaOwner {
        name: schema_name.clone(),
        owner: Ident::new(owner_name.as_str())?,
    };
    executor
        .execute(&statement)
        .await
        .map_err(ExternalSchemaError::statement(format!(
            "error updating external schema {} owner to {owner_name}",
            schema_name.as_str()
        )))?;
    info!(schema = schema_name.as_str(), owner, %owner_name, "transferred external schema ownership");
    Ok(())
}
