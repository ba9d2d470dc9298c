// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Descriptions of external schemas, both as declared and as observed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_postgres::types::Oid;

use crate::error::ExternalSchemaError;

/// The `usesysid` of a Redshift user.
pub type UserId = i32;

/// The stable identity of an external schema: its `pg_namespace` oid.
///
/// Assigned by the warehouse when the schema is created and never derived
/// from the schema's name, so it survives renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(pub Oid);

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SchemaId {
    type Err = ExternalSchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Oid>()
            .map(SchemaId)
            .map_err(|_| ExternalSchemaError::InvalidIdentifier(s.to_string()))
    }
}

/// The desired state of an external schema, as declared by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSchemaConfig {
    /// The name of the schema in Redshift.
    pub schema_name: String,
    /// The Glue data catalog database backing the schema. Immutable after
    /// creation.
    pub database_name: String,
    /// The ARN of the IAM role granting access to the data catalog and S3.
    /// Immutable after creation.
    pub iam_role: String,
    /// The owning user. When unset, the warehouse assigns the session user
    /// and the value is learned on read-back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserId>,
    /// Whether dropping the schema also drops every object inside it.
    #[serde(default)]
    pub cascade_on_delete: bool,
}

/// The live state of an external schema, as read from the system catalogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSchema {
    pub id: SchemaId,
    pub schema_name: String,
    pub database_name: String,
    pub iam_role: String,
    pub owner: UserId,
}

impl ExternalSchema {
    /// Converts the observed state into the attribute set a caller persists.
    ///
    /// `cascade_on_delete` is not stored in the warehouse, so the caller's
    /// own value is carried over.
    pub fn to_config(&self, cascade_on_delete: bool) -> ExternalSchemaConfig {
        ExternalSchemaConfig {
            schema_name: self.schema_name.clone(),
            database_name: self.database_name.clone(),
            iam_role: self.iam_role.clone(),
            owner: Some(self.owner),
            cascade_on_delete,
        }
    }
}
