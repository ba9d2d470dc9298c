// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The DDL statements issued against the warehouse.
//!
//! Statements are built from validated [`Ident`]s and escaped string literals
//! rather than by splicing caller-supplied text into SQL.

use std::fmt;

use thiserror::Error;

/// The longest identifier Redshift accepts, in bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 127;

/// Words that must be quoted when used as identifiers.
///
/// Must be sorted.
const RESERVED_KEYWORDS: &[&str] = &[
    "all",
    "analyse",
    "analyze",
    "and",
    "any",
    "array",
    "as",
    "asc",
    "authorization",
    "between",
    "binary",
    "both",
    "case",
    "cast",
    "check",
    "collate",
    "column",
    "constraint",
    "create",
    "cross",
    "current_date",
    "current_time",
    "current_timestamp",
    "current_user",
    "default",
    "deferrable",
    "desc",
    "distinct",
    "do",
    "else",
    "end",
    "except",
    "false",
    "for",
    "foreign",
    "from",
    "full",
    "grant",
    "group",
    "having",
    "in",
    "initially",
    "inner",
    "intersect",
    "into",
    "is",
    "join",
    "leading",
    "left",
    "like",
    "limit",
    "localtime",
    "localtimestamp",
    "natural",
    "new",
    "not",
    "null",
    "off",
    "offset",
    "old",
    "on",
    "only",
    "or",
    "order",
    "outer",
    "primary",
    "references",
    "right",
    "select",
    "session_user",
    "similar",
    "some",
    "table",
    "then",
    "to",
    "trailing",
    "true",
    "union",
    "unique",
    "user",
    "using",
    "verbose",
    "when",
    "where",
    "with",
];

/// A name that cannot be used as a Redshift identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identifier {name:?}: {reason}")]
pub struct InvalidName {
    pub name: String,
    pub reason: &'static str,
}

/// A validated SQL identifier.
///
/// Renders bare when it is a lower-case simple identifier that is not a
/// reserved word, and double-quoted otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidName> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("identifiers must not be empty")
        } else if name.len() > MAX_IDENTIFIER_LENGTH {
            Some("identifiers must be at most 127 bytes long")
        } else if name.contains('\0') {
            Some("identifiers must not contain NUL characters")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(InvalidName { name, reason }),
            None => Ok(Ident(name)),
        }
    }

    /// Validates a name for a schema this crate creates or renames to.
    ///
    /// Redshift folds identifiers to lower case, quoted or not, unless
    /// `enable_case_sensitive_identifier` is set. A name with upper-case
    /// letters would be stored under a different name than the one later
    /// looked up in `pg_namespace`, so it is rejected.
    pub fn schema_name(name: impl Into<String>) -> Result<Self, InvalidName> {
        let ident = Ident::new(name)?;
        if ident.0.chars().any(char::is_uppercase) {
            return Err(InvalidName {
                name: ident.0,
                reason: "schema names must be lower case, as Redshift folds identifiers",
            });
        }
        Ok(ident)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn needs_quotes(&self) -> bool {
        let mut chars = self.0.chars();
        let starts_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
        let rest_ok =
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');
        !(starts_ok && rest_ok) || RESERVED_KEYWORDS.binary_search(&self.0.as_str()).is_ok()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.needs_quotes() {
            write!(f, "\"{}\"", self.0.replace('"', "\"\""))
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Renders `value` as a single-quoted string literal.
///
/// Redshift treats backslash as an escape character inside literals, so both
/// quotes and backslashes are doubled.
pub fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for c in value.chars() {
        match c {
            '\'' => escaped.push_str("''"),
            '\\' => escaped.push_str("\\\\"),
            c => escaped.push(c),
        }
    }
    escaped.push('\'');
    escaped
}

/// A DDL statement that changes an external schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateExternalSchema {
        name: Ident,
        database: String,
        iam_role: String,
    },
    RenameSchema {
        name: Ident,
        new_name: Ident,
    },
    AlterSchemaOwner {
        name: Ident,
        owner: Ident,
    },
    DropSchema {
        name: Ident,
        cascade: bool,
    },
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateExternalSchema {
                name,
                database,
                iam_role,
            } => write!(
                f,
                "CREATE EXTERNAL SCHEMA {} FROM DATA CATALOG DATABASE {} IAM_ROLE {}",
                name,
                escape_literal(database),
                escape_literal(iam_role)
            ),
            Statement::RenameSchema { name, new_name } => {
                write!(f, "ALTER SCHEMA {} RENAME TO {}", name, new_name)
            }
            Statement::AlterSchemaOwner { name, owner } => {
                write!(f, "ALTER SCHEMA {} OWNER TO {}", name, owner)
            }
            Statement::DropSchema { name, cascade } => {
                write!(f, "DROP SCHEMA {}", name)?;
                if *cascade {
                    f.write_str(" CASCADE")?;
                }
                Ok(())
            }
        }
    }
}
