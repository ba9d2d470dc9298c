// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Connection profiles and reconciliation settings.
//!
//! Configuration lives in a TOML file:
//!
//! ```toml
//! default_profile = "dev"
//!
//! [profiles.dev]
//! host = "example.redshift.amazonaws.com"
//! port = 5439
//! database = "dev"
//! user = "admin"
//! password = "${REDSHIFT_PASSWORD}"
//! sslmode = "require"
//! connect_timeout = "10s"
//!
//! [reconcile]
//! propagation_timeout = "30s"
//! ```
//!
//! `${VAR}` references in profile strings are expanded from the environment
//! when a profile is selected.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::error::WarehouseError;
use crate::postgres::PostgresWarehouse;
use crate::retry::Retry;
use crate::tls::{TlsConfig, TlsMode};

/// The application name reported to Redshift.
pub const APPLICATION_NAME: &str = "mz-external-schema";

pub const DEFAULT_PORT: u16 = 5439;

/// The shortest sleep between propagation lookups.
const MIN_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no profile requested and no default_profile configured")]
    NoDefaultProfile,
    #[error("profile '{0}' not found")]
    ProfileNotFound(String),
    #[error("environment variable '{var}' referenced by profile '{profile}' is not set")]
    MissingEnvVar { profile: String, var: String },
    #[error("unterminated environment variable reference in {0:?}")]
    UnterminatedEnvVar(String),
    #[error("failed to read sslrootcert {}: {source}", path.display())]
    RootCert {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid [reconcile] settings: {0}")]
    InvalidReconcile(&'static str),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// The contents of a configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesConfig {
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// How to reach a Redshift cluster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    #[serde(default)]
    pub sslmode: TlsMode,
    pub sslrootcert: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub connect_timeout: Option<Duration>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Tunables for the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// How long to wait for a new schema to appear in `pg_namespace`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub propagation_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub initial_backoff: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_backoff: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            propagation_timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.propagation_timeout.is_zero() {
            return Err(ConfigError::InvalidReconcile(
                "propagation_timeout must be positive",
            ));
        }
        if self.initial_backoff < MIN_BACKOFF {
            return Err(ConfigError::InvalidReconcile(
                "initial_backoff must be at least 10ms",
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::InvalidReconcile(
                "max_backoff must not be less than initial_backoff",
            ));
        }
        Ok(())
    }

    /// The retry policy for waiting on catalog propagation.
    ///
    /// Backoffs below 10ms are raised to 10ms, so the lookup never spins.
    pub fn propagation_retry(&self) -> Retry {
        let initial_backoff = self.initial_backoff.max(MIN_BACKOFF);
        Retry::default()
            .initial_backoff(initial_backoff)
            .factor(2)
            .clamp_backoff(self.max_backoff.max(initial_backoff))
            .max_duration(self.propagation_timeout)
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

impl ProfilesConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let config: ProfilesConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.reconcile.validate()?;
        Ok(config)
    }

    /// Returns the named profile, or the default one, with environment
    /// variables expanded.
    pub fn profile(&self, name: Option<&str>) -> Result<Profile, ConfigError> {
        self.profile_with(name, |var| std::env::var(var).ok())
    }

    fn profile_with<F>(&self, name: Option<&str>, lookup: F) -> Result<Profile, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = match name {
            Some(name) => name,
            None => self
                .default_profile
                .as_deref()
                .ok_or(ConfigError::NoDefaultProfile)?,
        };
        let profile = self
            .profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))?;
        let expand = |value: &str| expand_env_vars(name, value, &lookup);
        Ok(Profile {
            host: expand(&profile.host)?,
            port: profile.port,
            database: expand(&profile.database)?,
            user: expand(&profile.user)?,
            password: profile.password.as_deref().map(expand).transpose()?,
            sslmode: profile.sslmode,
            sslrootcert: profile.sslrootcert.clone(),
            connect_timeout: profile.connect_timeout,
        })
    }
}

fn expand_env_vars<F>(profile: &str, value: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::UnterminatedEnvVar(value.to_string()))?;
        let var = &after[..end];
        let replacement = lookup(var).ok_or_else(|| ConfigError::MissingEnvVar {
            profile: profile.to_string(),
            var: var.to_string(),
        })?;
        expanded.push_str(&replacement);
        rest = &after[end + 1..];
    }
    expanded.push_str(rest);
    Ok(expanded)
}

impl Profile {
    /// Builds a warehouse that opens sessions with this profile.
    pub fn warehouse(&self) -> Result<PostgresWarehouse, ConfigError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .application_name(APPLICATION_NAME);
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout(timeout);
        }
        let root_cert = match &self.sslrootcert {
            Some(path) => Some(std::fs::read(path).map_err(|source| ConfigError::RootCert {
                path: path.clone(),
                source,
            })?),
            None => None,
        };
        let tls = TlsConfig {
            mode: self.sslmode,
            root_cert,
        };
        Ok(PostgresWarehouse::new(config, tls)?)
    }
}
