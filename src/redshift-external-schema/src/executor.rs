// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The seam between the reconciler and the warehouse.
//!
//! The reconciler never holds a client of its own. Every operation receives a
//! [`Warehouse`], acquires [`Connection`]s from it, and speaks to them only in
//! terms of [`Statement`]s and [`CatalogQuery`]s. Query results come back as
//! [`Row`]s of decoded [`Value`]s, which keeps the catalog logic independent of
//! the wire driver.

use std::fmt;

use async_trait::async_trait;
use tokio_postgres::types::{Oid, ToSql};

use crate::desc::{SchemaId, UserId};
use crate::error::WarehouseError;
use crate::sql::Statement;

/// Issues statements and catalog queries on a single session.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes a DDL statement, returning the number of rows affected.
    async fn execute(&self, statement: &Statement) -> Result<u64, WarehouseError>;

    /// Runs a catalog query, returning every matching row.
    async fn query(&self, query: &CatalogQuery<'_>) -> Result<Vec<Row>, WarehouseError>;
}

/// A session that can scope statements in a transaction.
#[async_trait]
pub trait Connection: Executor {
    async fn begin(&mut self) -> Result<(), WarehouseError>;
    async fn commit(&mut self) -> Result<(), WarehouseError>;
    async fn rollback(&mut self) -> Result<(), WarehouseError>;
}

/// A source of warehouse sessions.
///
/// Each call to [`Warehouse::connect`] hands out a session that no other
/// caller shares; dropping it releases the session.
#[async_trait]
pub trait Warehouse: Send + Sync {
    type Connection: Connection;

    async fn connect(&self, task_name: &str) -> Result<Self::Connection, WarehouseError>;
}

/// The catalog queries the reconciler issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogQuery<'a> {
    /// The oid of the namespace with the given name.
    NamespaceOid { name: &'a str },
    /// The name of the namespace with the given oid.
    NamespaceName { id: SchemaId },
    /// The full state of the external schema with the given oid.
    ExternalSchema { id: SchemaId },
    /// The user names of the given users.
    UserNames { ids: &'a [UserId] },
}

/// The wire type of a projected column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Oid,
    Int4,
    Text,
}

impl CatalogQuery<'_> {
    pub fn sql(&self) -> String {
        match self {
            CatalogQuery::NamespaceOid { .. } => {
                "SELECT oid FROM pg_namespace WHERE nspname = $1".into()
            }
            CatalogQuery::NamespaceName { .. } => {
                "SELECT nspname FROM pg_namespace WHERE oid = $1".into()
            }
            CatalogQuery::ExternalSchema { .. } => "SELECT
                    nspname,
                    nspowner,
                    databasename,
                    json_extract_path_text(esoptions, 'IAM_ROLE') AS iam_role
                FROM
                    pg_namespace
                    JOIN svv_external_schemas ON pg_namespace.oid = svv_external_schemas.esoid
                WHERE
                    pg_namespace.oid = $1"
                .into(),
            CatalogQuery::UserNames { ids } => {
                let placeholders = (1..=ids.len())
                    .map(|i| format!("${i}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("SELECT usesysid, usename FROM pg_user WHERE usesysid IN ({placeholders})")
            }
        }
    }

    /// The types of the columns the query projects, in order.
    pub fn columns(&self) -> &'static [ColumnType] {
        match self {
            CatalogQuery::NamespaceOid { .. } => &[ColumnType::Oid],
            CatalogQuery::NamespaceName { .. } => &[ColumnType::Text],
            CatalogQuery::ExternalSchema { .. } => &[
                ColumnType::Text,
                ColumnType::Int4,
                ColumnType::Text,
                ColumnType::Text,
            ],
            CatalogQuery::UserNames { .. } => &[ColumnType::Int4, ColumnType::Text],
        }
    }

    /// The bound parameters, in placeholder order.
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        match self {
            CatalogQuery::NamespaceOid { name } => {
                let name: &(dyn ToSql + Sync) = name;
                vec![name]
            }
            CatalogQuery::NamespaceName { id } | CatalogQuery::ExternalSchema { id } => {
                let oid: &(dyn ToSql + Sync) = &id.0;
                vec![oid]
            }
            CatalogQuery::UserNames { ids } => {
                let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(ids.len());
                for id in ids.iter() {
                    params.push(id);
                }
                params
            }
        }
    }
}

impl fmt::Display for CatalogQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogQuery::NamespaceOid { name } => write!(f, "namespace oid for {name}"),
            CatalogQuery::NamespaceName { id } => write!(f, "namespace name for oid {id}"),
            CatalogQuery::ExternalSchema { id } => write!(f, "external schema with oid {id}"),
            CatalogQuery::UserNames { ids } => write!(f, "user names for {ids:?}"),
        }
    }
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Oid(Oid),
    Int4(i32),
    Text(String),
}

impl Value {
    fn describe(&self) -> String {
        match self {
            Value::Null => "NULL".into(),
            Value::Oid(v) => format!("oid {v}"),
            Value::Int4(v) => format!("int4 {v}"),
            Value::Text(v) => format!("text {v:?}"),
        }
    }
}

/// A row returned by a [`CatalogQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row(values)
    }

    fn value(&self, column: usize, expected: &'static str) -> Result<&Value, WarehouseError> {
        self.0.get(column).ok_or_else(|| WarehouseError::Decode {
            column,
            expected,
            found: format!("a row with {} columns", self.0.len()),
        })
    }

    pub fn oid(&self, column: usize) -> Result<Oid, WarehouseError> {
        match self.value(column, "oid")? {
            Value::Oid(v) => Ok(*v),
            other => Err(decode_error(column, "oid", other)),
        }
    }

    pub fn int4(&self, column: usize) -> Result<i32, WarehouseError> {
        match self.value(column, "int4")? {
            Value::Int4(v) => Ok(*v),
            other => Err(decode_error(column, "int4", other)),
        }
    }

    pub fn text(&self, column: usize) -> Result<&str, WarehouseError> {
        match self.value(column, "text")? {
            Value::Text(v) => Ok(v),
            other => Err(decode_error(column, "text", other)),
        }
    }
}

fn decode_error(column: usize, expected: &'static str, found: &Value) -> WarehouseError {
    WarehouseError::Decode {
        column,
        expected,
        found: found.describe(),
    }
}
