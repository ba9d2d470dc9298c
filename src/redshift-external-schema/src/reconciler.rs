// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The create/read/update/delete lifecycle of an external schema.
//!
//! Every mutation ends by reading the schema back from the system catalogs,
//! so the state returned to the caller is always what the warehouse reports
//! rather than what was requested. Schemas are addressed by their namespace
//! oid, which is stable across renames.

use tracing::{info, warn};

use crate::catalog;
use crate::config::ReconcileConfig;
use crate::desc::{ExternalSchema, ExternalSchemaConfig, SchemaId};
use crate::error::ExternalSchemaError;
use crate::executor::{Connection, Executor, Warehouse};
use crate::identity;
use crate::owner;
use crate::sql::{Ident, Statement};


/// Converges external schemas toward their declared configuration.
///
/// Holds no connection of its own: every operation takes the [`Warehouse`]
/// to run against.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcileConfig,
}

async fn connect<W: Warehouse>(
    warehouse: &W,
    task_name: &str,
) -> Result<W::Connection, ExternalSchemaError> {
    warehouse
        .connect(task_name)
        .await
        .map_err(ExternalSchemaError::storage(format!(
            "error connecting to warehouse to {task_name}"
        )))
}

/// Rolls back the open transaction on `conn`, logging rather than returning
/// any failure so the caller can report the error that caused the rollback.
async fn rollback<C: Connection>(conn: &mut C, id: SchemaId) {
    if let Err(e) = conn.rollback().await {
        warn!(%id, "error rolling back update of external schema: {e}");
    }
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Reconciler { config }
    }

    /// Creates the schema described by `config` and returns its live state.
    ///
    /// # Errors
    ///
    /// Fails with [`ExternalSchemaError::Create`] if the `CREATE` statement
    /// fails, or [`ExternalSchemaError::PropagationTimeout`] if the new
    /// schema never shows up in `pg_namespace`. Failures after the schema's
    /// oid is known are wrapped in [`ExternalSchemaError::Incomplete`].
    #[tracing::instrument(level = "debug", skip_all, fields(schema = %config.schema_name))]
    pub async fn create<W: Warehouse>(
        &self,
        warehouse: &W,
        config: &ExternalSchemaConfig,
    ) -> Result<ExternalSchema, ExternalSchemaError> {
        let name = Ident::schema_name(config.schema_name.as_str())?;
        let statement = Statement::CreateExternalSchema {
            name: name.clone(),
            database: config.database_name.clone(),
            iam_role: config.iam_role.clone(),
        };
        let conn = connect(warehouse, "create external schema").await?;
        conn.execute(&statement)
            .await
            .map_err(|source| ExternalSchemaError::Create {
                schema: config.schema_name.clone(),
                source,
            })?;

        let id =
            identity::await_visible(&conn, name.as_str(), self.config.propagation_retry()).await?;
        info!(%id, database = %config.database_name, "created external schema");

        let configured = async {
            if let Some(owner) = config.owner {
                owner::set_owner(&conn, &name, owner).await?;
            }
            catalog::read_state(&conn, id).await
        };
        configured
            .await
            .map_err(|source| ExternalSchemaError::Incomplete {
                id,
                source: Box::new(source),
            })
    }

    /// Returns the live state of the schema with the given oid.
    ///
    /// A schema dropped out of band yields [`ExternalSchemaError::NotFound`].
    #[tracing::instrument(level = "debug", skip(self, warehouse))]
    pub async fn read<W: Warehouse>(
        &self,
        warehouse: &W,
        id: SchemaId,
    ) -> Result<ExternalSchema, ExternalSchemaError> {
        let conn = connect(warehouse, "read external schema").await?;
        catalog::read_state(&conn, id).await
    }

    /// Reports whether the schema with the given oid still exists.
    #[tracing::instrument(level = "debug", skip(self, warehouse))]
    pub async fn exists<W: Warehouse>(
        &self,
        warehouse: &W,
        id: SchemaId,
    ) -> Result<bool, ExternalSchemaError> {
        let conn = connect(warehouse, "check external schema").await?;
        identity::check_exists(&conn, id).await
    }

    /// Moves the schema with the given oid from `old` to `new`.
    ///
    /// Renames and ownership changes are applied in one transaction, renaming
    /// first so the ownership change addresses the schema by its new name.
    /// The transaction only commits once the schema has been read back.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalSchemaError::RequiresReplacement`], without touching
    /// the warehouse, if the data catalog database or IAM role differ. If the
    /// read-back fails the transaction is rolled back and the failure is
    /// returned as [`ExternalSchemaError::RolledBack`]. A failure reading the
    /// committed state is returned as [`ExternalSchemaError::Unverified`].
    #[tracing::instrument(level = "debug", skip(self, warehouse, old, new))]
    pub async fn update<W: Warehouse>(
        &self,
        warehouse: &W,
        id: SchemaId,
        old: &ExternalSchemaConfig,
        new: &ExternalSchemaConfig,
    ) -> Result<ExternalSchema, ExternalSchemaError> {
        for (attribute, old_value, new_value) in [
            ("database_name", &old.database_name, &new.database_name),
            ("iam_role", &old.iam_role, &new.iam_role),
        ] {
            if old_value != new_value {
                return Err(ExternalSchemaError::RequiresReplacement {
                    schema: old.schema_name.clone(),
                    attribute,
                    old: old_value.clone(),
                    new: new_value.clone(),
                });
            }
        }

        let rename = old.schema_name != new.schema_name;
        let reown = new.owner.filter(|owner| old.owner != Some(*owner));
        if !rename && reown.is_none() {
            return self.read(warehouse, id).await;
        }
        let old_name = Ident::new(old.schema_name.as_str())?;
        // An existing name is kept as stored; only a new name must survive
        // case folding.
        let new_name = if rename {
            Ident::schema_name(new.schema_name.as_str())?
        } else {
            Ident::new(new.schema_name.as_str())?
        };

        let mut conn = connect(warehouse, "update external schema").await?;
        conn.begin()
            .await
            .map_err(ExternalSchemaError::storage(format!(
                "error starting transaction to update external schema {id}"
            )))?;

        let applied = async {
            if rename {
                let statement = Statement::RenameSchema {
                    name: old_name.clone(),
                    new_name: new_name.clone(),
                };
                conn.execute(&statement)
                    .await
                    .map_err(ExternalSchemaError::statement(format!(
                        "error renaming external schema {} to {}",
                        old.schema_name, new.schema_name
                    )))?;
            }
            if let Some(owner) = reown {
                owner::set_owner(&conn, &new_name, owner).await?;
            }
            Ok::<_, ExternalSchemaError>(())
        };
        if let Err(e) = applied.await {
            rollback(&mut conn, id).await;
            return Err(e);
        }

        let verified = async {
            let reader = connect(warehouse, "verify external schema update").await?;
            catalog::read_state(&reader, id).await?;
            Ok::<_, ExternalSchemaError>(reader)
        };
        let reader = match verified.await {
            Ok(reader) => reader,
            Err(e) => {
                rollback(&mut conn, id).await;
                return Err(ExternalSchemaError::RolledBack {
                    id,
                    source: Box::new(e),
                });
            }
        };

        conn.commit()
            .await
            .map_err(ExternalSchemaError::storage(format!(
                "error committing update of external schema {id}"
            )))?;
        drop(conn);
        info!(
            %id,
            renamed_to = rename.then_some(new.schema_name.as_str()),
            owner = reown,
            "updated external schema"
        );
        catalog::read_state(&reader, id)
            .await
            .map_err(|source| ExternalSchemaError::Unverified {
                id,
                source: Box::new(source),
            })
    }

    /// Drops the schema described by `config`, cascading to the objects it
    /// contains if `cascade_on_delete` is set.
    #[tracing::instrument(level = "debug", skip_all, fields(schema = %config.schema_name))]
    pub async fn delete<W: Warehouse>(
        &self,
        warehouse: &W,
        config: &ExternalSchemaConfig,
    ) -> Result<(), ExternalSchemaError> {
        let statement = Statement::DropSchema {
            name: Ident::new(config.schema_name.as_str())?,
            cascade: config.cascade_on_delete,
        };
        let conn = connect(warehouse, "drop external schema").await?;
        conn.execute(&statement)
            .await
            .map_err(|source| ExternalSchemaError::Delete {
                schema: config.schema_name.clone(),
                source,
            })?;
        info!(cascade = config.cascade_on_delete, "dropped external schema");
        Ok(())
    }

    /// Adopts an existing schema given its oid as a string.
    #[tracing::instrument(level = "debug", skip(self, warehouse))]
    pub async fn import<W: Warehouse>(
        &self,
        warehouse: &W,
        raw_id: &str,
    ) -> Result<ExternalSchema, ExternalSchemaError> {
        let id: SchemaId = raw_id.parse()?;
        let schema = self.read(warehouse, id).await?;
        info!(%id, schema = %schema.schema_name, "imported external schema");
        Ok(schema)
    }
}
