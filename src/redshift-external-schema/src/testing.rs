// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! An in-memory [`Warehouse`] for tests.
//!
//! Models just enough of Redshift's catalog to exercise the reconciler:
//! namespaces with external schema options, users, per-session transactions,
//! delayed catalog propagation and injected failures. Every statement, query
//! and transaction boundary is recorded, in order, across all sessions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio_postgres::types::Oid;

use crate::desc::{SchemaId, UserId};
use crate::error::WarehouseError;
use crate::executor::{CatalogQuery, Connection, Executor, Row, Value, Warehouse};
use crate::sql::Statement;

pub const SESSION_USER: UserId = 100;
pub const SESSION_USER_NAME: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub name: String,
    pub owner: UserId,
    pub database: String,
    pub iam_role: String,
    /// Whether objects inside the schema block a non-cascading drop.
    pub has_objects: bool,
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    schemas: BTreeMap<Oid, SchemaEntry>,
    users: BTreeMap<UserId, String>,
}

impl Catalog {
    fn oid_for(&self, name: &str) -> Option<Oid> {
        self.schemas
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(oid, _)| *oid)
    }

    fn lookup(&self, name: &str) -> Result<Oid, WarehouseError> {
        self.oid_for(name).ok_or_else(|| {
            WarehouseError::Generic(anyhow::anyhow!("schema \"{name}\" does not exist"))
        })
    }
}

#[derive(Debug)]
struct State {
    catalog: Catalog,
    next_oid: Oid,
    log: Vec<String>,
    failing_queries: Vec<Injected>,
    failing_statements: Vec<Injected>,
    failing_connects: usize,
    propagation_lag: usize,
    duplicated_users: BTreeSet<UserId>,
    open_sessions: usize,
}

/// Failures for operations whose text contains `pattern`. The first `skip`
/// matches succeed, then the next `remaining` fail.
#[derive(Debug)]
struct Injected {
    pattern: String,
    skip: usize,
    remaining: usize,
}

/// Consumes one injected failure matching `text`, if any.
fn take_failure(failures: &mut [Injected], text: &str) -> bool {
    let Some(injected) = failures
        .iter_mut()
        .find(|f| f.remaining > 0 && text.contains(f.pattern.as_str()))
    else {
        return false;
    };
    if injected.skip > 0 {
        injected.skip -= 1;
        return false;
    }
    injected.remaining -= 1;
    true
}

#[derive(Debug, Clone)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        let mut catalog = Catalog::default();
        catalog
            .users
            .insert(SESSION_USER, SESSION_USER_NAME.to_string());
        MemoryWarehouse {
            state: Arc::new(Mutex::new(State {
                catalog,
                next_oid: 108_000,
                log: vec![],
                failing_queries: vec![],
                failing_statements: vec![],
                failing_connects: 0,
                propagation_lag: 0,
                duplicated_users: BTreeSet::new(),
                open_sessions: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("lock poisoned")
    }

    /// Adds a committed external schema, bypassing the statement log.
    pub fn insert_schema(
        &self,
        name: &str,
        database: &str,
        iam_role: &str,
        owner: UserId,
    ) -> SchemaId {
        let mut state = self.state();
        let oid = state.next_oid;
        state.next_oid += 1;
        state.catalog.schemas.insert(
            oid,
            SchemaEntry {
                name: name.to_string(),
                owner,
                database: database.to_string(),
                iam_role: iam_role.to_string(),
                has_objects: false,
            },
        );
        SchemaId(oid)
    }

    pub fn insert_user(&self, id: UserId, name: &str) {
        self.state().catalog.users.insert(id, name.to_string());
    }

    /// Makes user name lookups return every row for `id` twice.
    pub fn duplicate_user_rows(&self, id: UserId) {
        self.state().duplicated_users.insert(id);
    }

    /// Gives the schema objects that block a non-cascading drop.
    pub fn add_objects(&self, id: SchemaId) {
        if let Some(entry) = self.state().catalog.schemas.get_mut(&id.0) {
            entry.has_objects = true;
        }
    }

    /// Drops a schema behind the reconciler's back.
    pub fn drop_out_of_band(&self, id: SchemaId) {
        self.state().catalog.schemas.remove(&id.0);
    }

    /// Hides namespaces from the next `lookups` oid-by-name queries.
    pub fn set_propagation_lag(&self, lookups: usize) {
        self.state().propagation_lag = lookups;
    }

    /// Fails the next `count` queries whose description contains `pattern`.
    pub fn fail_queries(&self, pattern: &str, count: usize) {
        self.fail_queries_after(pattern, 0, count);
    }

    /// Lets `skip` queries matching `pattern` through, then fails `count`.
    pub fn fail_queries_after(&self, pattern: &str, skip: usize, count: usize) {
        self.state().failing_queries.push(Injected {
            pattern: pattern.to_string(),
            skip,
            remaining: count,
        });
    }

    /// Fails the next `count` statements whose SQL contains `pattern`.
    /// `BEGIN`, `COMMIT` and `ROLLBACK` count as statements.
    pub fn fail_statements(&self, pattern: &str, count: usize) {
        self.state().failing_statements.push(Injected {
            pattern: pattern.to_string(),
            skip: 0,
            remaining: count,
        });
    }

    pub fn fail_connects(&self, count: usize) {
        self.state().failing_connects = count;
    }

    /// The committed state of a schema.
    pub fn schema(&self, id: SchemaId) -> Option<SchemaEntry> {
        self.state().catalog.schemas.get(&id.0).cloned()
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// The statements issued, without queries or transaction boundaries.
    pub fn statements(&self) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter(|entry| {
                !entry.starts_with("QUERY ")
                    && !["BEGIN", "COMMIT", "ROLLBACK"].contains(&entry.as_str())
            })
            .cloned()
            .collect()
    }

    pub fn queries_matching(&self, pattern: &str) -> usize {
        self.state()
            .log
            .iter()
            .filter(|entry| entry.starts_with("QUERY ") && entry.contains(pattern))
            .count()
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    type Connection = MemoryConnection;

    async fn connect(&self, _task_name: &str) -> Result<MemoryConnection, WarehouseError> {
        let mut state = self.state();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(WarehouseError::Generic(anyhow::anyhow!("connection refused")));
        }
        state.open_sessions += 1;
        Ok(MemoryConnection {
            state: Arc::clone(&self.state),
            txn: Mutex::new(None),
        })
    }
}

/// A session on a [`MemoryWarehouse`].
///
/// Inside a transaction the session works on a private copy of the catalog,
/// which replaces the shared catalog on commit.
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<Mutex<State>>,
    txn: Mutex<Option<Catalog>>,
}

impl MemoryConnection {
    fn boundary(&self, keyword: &str) -> Result<MutexGuard<'_, State>, WarehouseError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.log.push(keyword.to_string());
        if take_failure(&mut state.failing_statements, keyword) {
            return Err(WarehouseError::Generic(anyhow::anyhow!("{keyword} failed")));
        }
        Ok(state)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open_sessions -= 1;
        }
    }
}

fn apply(
    catalog: &mut Catalog,
    next_oid: &mut Oid,
    statement: &Statement,
) -> Result<u64, WarehouseError> {
    match statement {
        Statement::CreateExternalSchema {
            name,
            database,
            iam_role,
        } => {
            if catalog.oid_for(name.as_str()).is_some() {
                return Err(WarehouseError::Generic(anyhow::anyhow!(
                    "schema \"{}\" already exists",
                    name.as_str()
                )));
            }
            let oid = *next_oid;
            *next_oid += 1;
            catalog.schemas.insert(
                oid,
                SchemaEntry {
                    name: name.as_str().to_string(),
                    owner: SESSION_USER,
                    database: database.clone(),
                    iam_role: iam_role.clone(),
                    has_objects: false,
                },
            );
        }
        Statement::RenameSchema { name, new_name } => {
            let oid = catalog.lookup(name.as_str())?;
            if catalog.oid_for(new_name.as_str()).is_some() {
                return Err(WarehouseError::Generic(anyhow::anyhow!(
                    "schema \"{}\" already exists",
                    new_name.as_str()
                )));
            }
            if let Some(entry) = catalog.schemas.get_mut(&oid) {
                entry.name = new_name.as_str().to_string();
            }
        }
        Statement::AlterSchemaOwner { name, owner } => {
            let oid = catalog.lookup(name.as_str())?;
            let user = catalog
                .users
                .iter()
                .find(|(_, user)| user.as_str() == owner.as_str())
                .map(|(id, _)| *id)
                .ok_or_else(|| {
                    WarehouseError::Generic(anyhow::anyhow!(
                        "user \"{}\" does not exist",
                        owner.as_str()
                    ))
                })?;
            if let Some(entry) = catalog.schemas.get_mut(&oid) {
                entry.owner = user;
            }
        }
        Statement::DropSchema { name, cascade } => {
            let oid = catalog.lookup(name.as_str())?;
            if !cascade && catalog.schemas.get(&oid).is_some_and(|entry| entry.has_objects) {
                return Err(WarehouseError::Generic(anyhow::anyhow!(
                    "cannot drop schema {} because other objects depend on it",
                    name.as_str()
                )));
            }
            catalog.schemas.remove(&oid);
        }
    }
    Ok(0)
}

#[async_trait]
impl Executor for MemoryConnection {
    async fn execute(&self, statement: &Statement) -> Result<u64, WarehouseError> {
        let sql = statement.to_string();
        let mut state = self.state.lock().expect("lock poisoned");
        state.log.push(sql.clone());
        if take_failure(&mut state.failing_statements, &sql) {
            return Err(WarehouseError::Generic(anyhow::anyhow!("injected failure")));
        }
        let State {
            catalog, next_oid, ..
        } = &mut *state;
        let mut txn = self.txn.lock().expect("lock poisoned");
        match txn.as_mut() {
            Some(txn_catalog) => apply(txn_catalog, next_oid, statement),
            None => apply(catalog, next_oid, statement),
        }
    }

    async fn query(&self, query: &CatalogQuery<'_>) -> Result<Vec<Row>, WarehouseError> {
        let description = query.to_string();
        let mut state = self.state.lock().expect("lock poisoned");
        state.log.push(format!("QUERY {description}"));
        if take_failure(&mut state.failing_queries, &description) {
            return Err(WarehouseError::Generic(anyhow::anyhow!("injected failure")));
        }
        let txn = self.txn.lock().expect("lock poisoned");
        let catalog = txn.as_ref().unwrap_or(&state.catalog);
        let rows = match query {
            CatalogQuery::NamespaceOid { name } => {
                let oid = catalog.oid_for(name);
                if state.propagation_lag > 0 {
                    state.propagation_lag -= 1;
                    return Ok(vec![]);
                }
                oid.map(|oid| Row::new(vec![Value::Oid(oid)]))
                    .into_iter()
                    .collect()
            }
            CatalogQuery::NamespaceName { id } => catalog
                .schemas
                .get(&id.0)
                .map(|entry| Row::new(vec![Value::Text(entry.name.clone())]))
                .into_iter()
                .collect(),
            CatalogQuery::ExternalSchema { id } => catalog
                .schemas
                .get(&id.0)
                .map(|entry| {
                    Row::new(vec![
                        Value::Text(entry.name.clone()),
                        Value::Int4(entry.owner),
                        Value::Text(entry.database.clone()),
                        Value::Text(entry.iam_role.clone()),
                    ])
                })
                .into_iter()
                .collect(),
            CatalogQuery::UserNames { ids } => {
                let mut rows = vec![];
                for id in ids.iter() {
                    if let Some(name) = catalog.users.get(id) {
                        let row = Row::new(vec![Value::Int4(*id), Value::Text(name.clone())]);
                        if state.duplicated_users.contains(id) {
                            rows.push(row.clone());
                        }
                        rows.push(row);
                    }
                }
                rows
            }
        };
        Ok(rows)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn begin(&mut self) -> Result<(), WarehouseError> {
        let state = self.boundary("BEGIN")?;
        let snapshot = state.catalog.clone();
        drop(state);
        *self.txn.lock().expect("lock poisoned") = Some(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), WarehouseError> {
        let mut state = self.boundary("COMMIT")?;
        if let Some(catalog) = self.txn.lock().expect("lock poisoned").take() {
            state.catalog = catalog;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), WarehouseError> {
        let state = self.boundary("ROLLBACK");
        self.txn.lock().expect("lock poisoned").take();
        state.map(|_| ())
    }
}
