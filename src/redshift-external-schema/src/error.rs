// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Error types for external schema reconciliation.
//!
//! ```text
//! ExternalSchemaError        - what the reconciler reports to its caller
//!   └── WarehouseError       - what went wrong talking to the warehouse
//!         └── TlsError       - failures building the TLS connector
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::desc::{SchemaId, UserId};
use crate::sql::InvalidName;
use crate::tls::TlsError;

/// An error produced while reconciling an external schema.
#[derive(Debug, Error)]
pub enum ExternalSchemaError {
    /// The schema does not exist. Callers treat this as "the object is gone"
    /// and prune their state.
    #[error("external schema {what} does not exist")]
    NotFound { what: String },
    /// A catalog query or connection failed.
    #[error("{context}: {source}")]
    StorageAccess {
        context: String,
        #[source]
        source: WarehouseError,
    },
    #[error("error creating external schema {schema}: {source}")]
    Create {
        schema: String,
        #[source]
        source: WarehouseError,
    },
    /// A DDL statement other than CREATE or DROP failed.
    #[error("{context}: {source}")]
    Statement {
        context: String,
        #[source]
        source: WarehouseError,
    },
    #[error("error dropping external schema {schema}: {source}")]
    Delete {
        schema: String,
        #[source]
        source: WarehouseError,
    },
    #[error("owner {owner} resolved to {found} user names, expected exactly one")]
    OwnerResolution { owner: UserId, found: usize },
    #[error("external schema {schema} was not visible in pg_namespace after {elapsed:?}")]
    PropagationTimeout { schema: String, elapsed: Duration },
    #[error("invalid external schema identifier {0:?}")]
    InvalidIdentifier(String),
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
    /// The change can only be made by dropping and recreating the schema.
    #[error("{attribute} of external schema {schema} cannot be changed in place: {old:?} -> {new:?}")]
    RequiresReplacement {
        schema: String,
        attribute: &'static str,
        old: String,
        new: String,
    },
    /// Verifying an update failed, so its changes were rolled back.
    #[error("update of external schema {id} rolled back: {source}")]
    RolledBack {
        id: SchemaId,
        #[source]
        source: Box<ExternalSchemaError>,
    },
    /// An update committed, but reading the committed state back failed.
    /// The warehouse holds the new state; re-read it rather than retrying.
    #[error("update of external schema {id} was committed but could not be read back: {source}")]
    Unverified {
        id: SchemaId,
        #[source]
        source: Box<ExternalSchemaError>,
    },
    /// The schema was created and has an id, but a later step failed.
    #[error("external schema {id} was created but not fully configured: {source}")]
    Incomplete {
        id: SchemaId,
        #[source]
        source: Box<ExternalSchemaError>,
    },
}

impl ExternalSchemaError {
    /// Reports whether the error means the schema no longer exists.
    pub fn is_not_found(&self) -> bool {
        match self {
            ExternalSchemaError::NotFound { .. } => true,
            ExternalSchemaError::RolledBack { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The id of a schema that exists despite the error, if any.
    pub fn created_id(&self) -> Option<SchemaId> {
        match self {
            ExternalSchemaError::Incomplete { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Reports whether the warehouse holds the requested change despite the
    /// error.
    pub fn is_committed(&self) -> bool {
        matches!(self, ExternalSchemaError::Unverified { .. })
    }

    pub(crate) fn storage(context: impl Into<String>) -> impl FnOnce(WarehouseError) -> Self {
        let context = context.into();
        move |source| ExternalSchemaError::StorageAccess { context, source }
    }

    pub(crate) fn statement(context: impl Into<String>) -> impl FnOnce(WarehouseError) -> Self {
        let context = context.into();
        move |source| ExternalSchemaError::Statement { context, source }
    }
}

/// An error talking to the warehouse.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("{}", format_query_error(.0))]
    Postgres(#[from] tokio_postgres::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("error decoding column {column}: expected {expected}, found {found}")]
    Decode {
        column: usize,
        expected: &'static str,
        found: String,
    },
    /// Any other error we bail on.
    #[error(transparent)]
    Generic(#[from] anyhow::Error),
}

fn format_query_error(error: &tokio_postgres::Error) -> String {
    if let Some(db_error) = error.as_db_error() {
        let mut parts = vec![format!("database error: {}", db_error.message())];

        if let Some(detail) = db_error.detail() {
            parts.push(format!("detail: {}", detail));
        }

        if let Some(hint) = db_error.hint() {
            parts.push(format!("hint: {}", hint));
        }

        parts.push(format!("code: {}", db_error.code().code()));
        parts.join("; ")
    } else {
        format!("query error: {}", error)
    }
}
