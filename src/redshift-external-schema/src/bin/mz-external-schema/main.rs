// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Manages Redshift external schemas from the command line.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mz_redshift_external_schema::config::ProfilesConfig;
use mz_redshift_external_schema::{
    ExternalSchema, ExternalSchemaConfig, ExternalSchemaError, PostgresWarehouse, Reconciler,
    SchemaId, UserId,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Redshift external schema manager
#[derive(Parser, Debug)]
#[command(name = "mz-external-schema")]
#[command(about = "Create, inspect and reconcile Redshift external schemas")]
struct Args {
    /// Path to the profiles file
    #[arg(
        short,
        long,
        env = "MZ_EXTERNAL_SCHEMA_CONFIG",
        default_value = "profiles.toml",
        global = true
    )]
    config: PathBuf,

    /// Connection profile to use (defaults to `default_profile`)
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Enable debug logging, unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// The declared attributes of an external schema.
#[derive(clap::Args, Debug)]
struct SchemaArgs {
    /// Name of the schema in Redshift
    #[arg(long)]
    schema_name: String,

    /// Glue data catalog database backing the schema
    #[arg(long)]
    database_name: String,

    /// ARN of the IAM role Redshift assumes to read the catalog
    #[arg(long)]
    iam_role: String,

    /// `usesysid` of the owning user (defaults to the session user)
    #[arg(long)]
    owner: Option<UserId>,

    /// Drop every object in the schema when deleting it
    #[arg(long)]
    cascade_on_delete: bool,
}

impl From<SchemaArgs> for ExternalSchemaConfig {
    fn from(args: SchemaArgs) -> Self {
        ExternalSchemaConfig {
            schema_name: args.schema_name,
            database_name: args.database_name,
            iam_role: args.iam_role,
            owner: args.owner,
            cascade_on_delete: args.cascade_on_delete,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an external schema
    Create(SchemaArgs),

    /// Print the live state of an external schema
    Read {
        /// Namespace oid of the schema
        id: SchemaId,
    },

    /// Report whether an external schema still exists
    Exists {
        /// Namespace oid of the schema
        id: SchemaId,
    },

    /// Adopt an existing external schema by oid
    Import {
        /// Namespace oid of the schema
        id: String,
    },

    /// Rename an external schema or change its owner
    ///
    /// Attributes that are not given keep their live values. The data
    /// catalog database and IAM role cannot be changed in place.
    Update {
        /// Namespace oid of the schema
        id: SchemaId,

        /// New name for the schema
        #[arg(long)]
        schema_name: Option<String>,

        /// `usesysid` of the new owner
        #[arg(long)]
        owner: Option<UserId>,
    },

    /// Drop an external schema
    Delete {
        /// Namespace oid of the schema
        id: SchemaId,

        /// Drop every object in the schema too
        #[arg(long)]
        cascade: bool,
    },

    /// Converge an external schema toward the given attributes
    ///
    /// Without --id, or when the schema with that oid no longer exists, the
    /// schema is created. Otherwise it is updated in place.
    Apply {
        /// Namespace oid of a previously created schema
        #[arg(long)]
        id: Option<SchemaId>,

        #[command(flatten)]
        schema: SchemaArgs,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_directive = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        if let Some(id) = e
            .downcast_ref::<ExternalSchemaError>()
            .and_then(ExternalSchemaError::created_id)
        {
            eprintln!("hint: external schema {id} exists and should be imported or deleted");
        }
        if e
            .downcast_ref::<ExternalSchemaError>()
            .is_some_and(ExternalSchemaError::is_committed)
        {
            eprintln!("hint: the update was applied; run `read` to see the schema");
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), anyhow::Error> {
    let config = ProfilesConfig::load(&args.config)?;
    let profile = config.profile(args.profile.as_deref())?;
    let warehouse = profile
        .warehouse()
        .with_context(|| format!("invalid profile for host {}", profile.host))?;
    let reconciler = Reconciler::new(config.reconcile);

    match args.command {
        Command::Create(schema) => {
            let config = ExternalSchemaConfig::from(schema);
            print_json(&reconciler.create(&warehouse, &config).await?)
        }
        Command::Read { id } => print_json(&reconciler.read(&warehouse, id).await?),
        Command::Exists { id } => {
            let exists = reconciler.exists(&warehouse, id).await?;
            print_json(&serde_json::json!({ "id": id, "exists": exists }))
        }
        Command::Import { id } => print_json(&reconciler.import(&warehouse, &id).await?),
        Command::Update {
            id,
            schema_name,
            owner,
        } => {
            let old = reconciler.read(&warehouse, id).await?.to_config(false);
            let new = ExternalSchemaConfig {
                schema_name: schema_name.unwrap_or_else(|| old.schema_name.clone()),
                owner: owner.or(old.owner),
                ..old.clone()
            };
            print_json(&reconciler.update(&warehouse, id, &old, &new).await?)
        }
        Command::Delete { id, cascade } => {
            let config = reconciler.read(&warehouse, id).await?.to_config(cascade);
            reconciler.delete(&warehouse, &config).await?;
            print_json(&serde_json::json!({ "id": id, "deleted": true }))
        }
        Command::Apply { id, schema } => {
            let schema = apply(&reconciler, &warehouse, id, ExternalSchemaConfig::from(schema)).await?;
            print_json(&schema)
        }
    }
}

async fn apply(
    reconciler: &Reconciler,
    warehouse: &PostgresWarehouse,
    id: Option<SchemaId>,
    desired: ExternalSchemaConfig,
) -> Result<ExternalSchema, ExternalSchemaError> {
    let Some(id) = id else {
        return reconciler.create(warehouse, &desired).await;
    };
    if !reconciler.exists(warehouse, id).await? {
        tracing::info!(%id, "external schema is gone, recreating it");
        return reconciler.create(warehouse, &desired).await;
    }
    let old = reconciler
        .read(warehouse, id)
        .await?
        .to_config(desired.cascade_on_delete);
    reconciler.update(warehouse, id, &old, &desired).await
}

fn print_json<T: Serialize>(value: &T) -> Result<(), anyhow::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
