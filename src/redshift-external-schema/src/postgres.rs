// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A [`Warehouse`] that speaks the PostgreSQL wire protocol to Redshift.

use async_trait::async_trait;
use tokio_postgres::Client;
use tokio_postgres::types::Oid;
use tracing::{debug, warn};

use crate::error::WarehouseError;
use crate::executor::{CatalogQuery, ColumnType, Connection, Executor, Row, Value, Warehouse};
use crate::sql::Statement;
use crate::tls::{TlsConfig, make_tls};

/// Opens a fresh session for every [`Warehouse::connect`] call.
#[derive(Debug, Clone)]
pub struct PostgresWarehouse {
    inner: tokio_postgres::Config,
    tls: TlsConfig,
}

impl PostgresWarehouse {
    pub fn new(mut inner: tokio_postgres::Config, tls: TlsConfig) -> Result<Self, WarehouseError> {
        if inner.get_hosts().is_empty() {
            bail_generic!("no host configured for the warehouse");
        }
        inner.ssl_mode(tls.mode.ssl_mode());
        Ok(PostgresWarehouse { inner, tls })
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    type Connection = PostgresConnection;

    async fn connect(&self, task_name: &str) -> Result<PostgresConnection, WarehouseError> {
        let tls = make_tls(&self.tls)?;
        let (client, connection) = self.inner.connect(tls).await?;
        let task_name = task_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(task = %task_name, "redshift connection failed: {e}");
            }
        });
        Ok(PostgresConnection { client })
    }
}

/// A single warehouse session.
pub struct PostgresConnection {
    client: Client,
}

#[async_trait]
impl Executor for PostgresConnection {
    async fn execute(&self, statement: &Statement) -> Result<u64, WarehouseError> {
        let sql = statement.to_string();
        debug!(%sql, "executing statement");
        Ok(self.client.execute(sql.as_str(), &[]).await?)
    }

    async fn query(&self, query: &CatalogQuery<'_>) -> Result<Vec<Row>, WarehouseError> {
        let sql = query.sql();
        debug!(%query, "running catalog query");
        let rows = self.client.query(sql.as_str(), &query.params()).await?;
        rows.iter()
            .map(|row| decode_row(row, query.columns()))
            .collect()
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn begin(&mut self) -> Result<(), WarehouseError> {
        Ok(self.client.batch_execute("BEGIN").await?)
    }

    async fn commit(&mut self) -> Result<(), WarehouseError> {
        Ok(self.client.batch_execute("COMMIT").await?)
    }

    async fn rollback(&mut self) -> Result<(), WarehouseError> {
        Ok(self.client.batch_execute("ROLLBACK").await?)
    }
}

fn decode_row(row: &tokio_postgres::Row, columns: &[ColumnType]) -> Result<Row, WarehouseError> {
    if row.len() != columns.len() {
        bail_generic!(
            "expected {} columns, but the warehouse returned {}",
            columns.len(),
            row.len()
        );
    }
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| -> Result<Value, WarehouseError> {
            let value = match column {
                ColumnType::Oid => row.try_get::<_, Option<Oid>>(i)?.map(Value::Oid),
                // Redshift reports some owner columns as int4 and others as
                // oid, depending on the catalog view.
                ColumnType::Int4 => match row.try_get::<_, Option<i32>>(i) {
                    Ok(v) => v.map(Value::Int4),
                    Err(_) => match row.try_get::<_, Option<Oid>>(i)? {
                        Some(oid) => Some(Value::Int4(i32::try_from(oid).map_err(|_| {
                            WarehouseError::Decode {
                                column: i,
                                expected: "int4",
                                found: format!("oid {oid}"),
                            }
                        })?)),
                        None => None,
                    },
                },
                ColumnType::Text => row.try_get::<_, Option<String>>(i)?.map(Value::Text),
            };
            Ok(value.unwrap_or(Value::Null))
        })
        .collect::<Result<Vec<_>, WarehouseError>>()
        .map(Row::new)
}
