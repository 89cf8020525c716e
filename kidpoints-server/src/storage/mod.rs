pub mod models;
mod repo;
pub mod schema;

use std::future::Future;

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use kidpoints_shared::auth::Role;
use models::{NewRelationship, NewUser, UserRow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::engine::model::User;
use crate::engine::{Storage, UnitOfWork, WorkflowError, WorkflowResult};
use crate::server::config::{RelationshipConfig, UserConfig};
use repo::SqliteUnit;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<StorageError> for WorkflowError {
    fn from(e: StorageError) -> Self {
        WorkflowError::internal(e)
    }
}

impl From<diesel::result::Error> for WorkflowError {
    fn from(e: diesel::result::Error) -> Self {
        StorageError::Database(e).into()
    }
}

/// Credentials row used by the login handler.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone, Copy)]
enum UnitMode {
    Write,
    Read,
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    /// Upserts configured accounts by username, then links the configured
    /// parent/child pairs. Existing relationships are left alone.
    pub async fn seed_from_config(
        &self,
        cfg_users: &[UserConfig],
        cfg_relationships: &[RelationshipConfig],
    ) -> Result<(), StorageError> {
        use schema::{user_relationships, users};

        let pool = self.pool.clone();
        let users_owned = cfg_users.to_owned();
        let relationships_owned = cfg_relationships.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                let now = Utc::now().naive_utc();
                for u in &users_owned {
                    let new_user = NewUser {
                        username: &u.username,
                        display_name: u.display_name.as_deref().unwrap_or(&u.username),
                        role: u.role.as_str(),
                        password_hash: &u.password_hash,
                        created_at: now,
                    };
                    diesel::insert_into(users::table)
                        .values(&new_user)
                        .on_conflict(users::username)
                        .do_update()
                        .set((
                            users::display_name.eq(new_user.display_name),
                            users::role.eq(new_user.role),
                            users::password_hash.eq(new_user.password_hash),
                        ))
                        .execute(conn)?;
                }

                for rel in &relationships_owned {
                    let parent = seeded_user(conn, &rel.parent, Role::Parent)?;
                    let child = seeded_user(conn, &rel.child, Role::Child)?;
                    diesel::insert_into(user_relationships::table)
                        .values(&NewRelationship {
                            parent_id: parent,
                            child_id: child,
                            created_at: now,
                        })
                        .on_conflict_do_nothing()
                        .execute(conn)?;
                }
                Ok(())
            })?;
            debug!(
                users = users_owned.len(),
                relationships = relationships_owned.len(),
                "seeded accounts from config"
            );
            Ok(())
        })
        .await?
    }

    pub async fn find_credentials(
        &self,
        username: &str,
    ) -> Result<Option<Credentials>, StorageError> {
        use schema::users::dsl as u;
        let pool = self.pool.clone();
        let name = username.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Credentials>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let Some(row) = u::users
                .filter(u::username.eq(&name))
                .select(UserRow::as_select())
                .first(&mut conn)
                .optional()?
            else {
                return Ok(None);
            };
            let password_hash = row.password_hash.clone();
            let user = User::try_from(row)
                .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
            Ok(Some(Credentials {
                user,
                password_hash,
            }))
        })
        .await?
    }

    /// Runs `work` on a pooled connection off the async runtime. Write units
    /// take SQLite's write lock up front (`BEGIN IMMEDIATE`) and roll back if
    /// the calling future is dropped before the closure commits.
    fn run_unit<T, F>(
        &self,
        op: &'static str,
        mode: UnitMode,
        work: F,
    ) -> impl Future<Output = WorkflowResult<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn UnitOfWork) -> WorkflowResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        async move {
            let abandoned = CancellationToken::new();
            let _abandon_on_drop = abandoned.clone().drop_guard();
            trace!(op, ?mode, "unit of work starting");
            let joined = tokio::task::spawn_blocking(move || -> WorkflowResult<T> {
                let mut conn = pool.get().map_err(StorageError::from)?;
                configure_sqlite_conn(&mut conn)?;
                match mode {
                    UnitMode::Read => {
                        let mut unit = SqliteUnit::new(&mut conn);
                        work(&mut unit)
                    }
                    UnitMode::Write => conn.immediate_transaction(|conn| {
                        let mut unit = SqliteUnit::new(conn);
                        let out = work(&mut unit)?;
                        if abandoned.is_cancelled() {
                            return Err(WorkflowError::Internal(format!(
                                "{op}: caller went away before commit"
                            )));
                        }
                        Ok(out)
                    }),
                }
            })
            .await;
            let result = joined.map_err(StorageError::from)?;
            if let Err(e) = &result {
                trace!(op, kind = e.kind(), "unit of work rolled back");
            }
            result
        }
    }
}

impl Storage for Store {
    fn transact<T, F>(
        &self,
        op: &'static str,
        work: F,
    ) -> impl Future<Output = WorkflowResult<T>> + Send
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn UnitOfWork) -> WorkflowResult<T> + Send + 'static,
    {
        self.run_unit(op, UnitMode::Write, work)
    }

    fn read<T, F>(
        &self,
        op: &'static str,
        work: F,
    ) -> impl Future<Output = WorkflowResult<T>> + Send
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn UnitOfWork) -> WorkflowResult<T> + Send + 'static,
    {
        self.run_unit(op, UnitMode::Read, work)
    }
}

fn seeded_user(
    conn: &mut SqliteConnection,
    username: &str,
    expected: Role,
) -> Result<i32, StorageError> {
    use schema::users::dsl as u;
    let found: Option<(i32, String)> = u::users
        .filter(u::username.eq(username))
        .select((u::id, u::role))
        .first(conn)
        .optional()?;
    match found {
        Some((id, role)) if role == expected.as_str() => Ok(id),
        Some((_, role)) => Err(StorageError::InvalidInput(format!(
            "relationship user {username} has role {role}, expected {expected}"
        ))),
        None => Err(StorageError::InvalidInput(format!(
            "relationship references unknown user {username}"
        ))),
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // busy_timeout first so the WAL switch itself waits on a locked database
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}
