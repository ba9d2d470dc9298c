// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Declarative lifecycle management for Redshift external schemas.
//!
//! An external schema binds a Redshift namespace to a database in the AWS
//! Glue data catalog. The [`Reconciler`] converges the live state of such a
//! schema, as read from `pg_namespace` and `svv_external_schemas`, toward a
//! desired [`ExternalSchemaConfig`], tracking the schema across renames by
//! its namespace oid ([`SchemaId`]).
//!
//! All warehouse access goes through the [`Warehouse`] trait, which is passed
//! explicitly to every operation. [`PostgresWarehouse`] implements it over
//! tokio-postgres.

macro_rules! bail_generic {
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::WarehouseError::Generic(anyhow::anyhow!($fmt, $($arg)*)).into())
    };
    ($err:expr $(,)?) => {
        return Err($crate::error::WarehouseError::Generic(anyhow::anyhow!($err)).into())
    };
}

pub mod catalog;
pub mod config;
mod desc;
pub mod error;
pub mod executor;
pub mod identity;
pub mod owner;
pub mod postgres;
pub mod reconciler;
pub mod retry;
pub mod sql;
mod tls;

#[cfg(test)]
mod testing;

pub use desc::{ExternalSchema, ExternalSchemaConfig, SchemaId, UserId};
pub use error::{ExternalSchemaError, WarehouseError};
pub use executor::{CatalogQuery, Connection, Executor, Row, Value, Warehouse};
pub use postgres::{PostgresConnection, PostgresWarehouse};
pub use reconciler::Reconciler;
pub use tls::{TlsConfig, TlsError, TlsMode, make_tls};
