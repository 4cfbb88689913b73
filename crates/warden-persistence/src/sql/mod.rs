//! SQL-based persistence backend (MySQL/PostgreSQL via SeaORM)
//!
//! Atomicity relies on what every relational store guarantees for a single
//! statement:
//! - leases: expired rows are deleted, then a unique-key insert decides
//! - shared locks: conditional `UPDATE`/`DELETE` keyed on the token, judged
//!   by `rows_affected`
//! - path locks: insert-then-verify; a request that sees any conflicting live
//!   row removes its own row, so racing conflicting requests can both fail but
//!   never both succeed

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::LikeExpr;
use sea_orm::{prelude::Expr, *};

use warden_common::utils::{ancestor_paths, normalize_path};

use crate::entity::{exclusive_lock, shared_lock, tree_lock};
use crate::model::*;
use crate::traits::*;

/// External database lock store
///
/// Wraps a SeaORM `DatabaseConnection` and implements every lock table on it.
pub struct SqlLockStore {
    db: DatabaseConnection,
    options: StoreOptions,
}

impl SqlLockStore {
    /// Create a new SqlLockStore with the given database connection
    pub fn new(db: DatabaseConnection, options: StoreOptions) -> Self {
        Self { db, options }
    }

    /// Open a connection pool for `url`
    pub async fn connect(
        url: &str,
        max_connections: u32,
        options: StoreOptions,
    ) -> anyhow::Result<Self> {
        let mut connect_options = ConnectOptions::new(url.to_string());
        connect_options
            .max_connections(max_connections)
            .sqlx_logging(false);
        let db = Database::connect(connect_options).await?;
        Ok(Self::new(db, options))
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create the lock tables and their indexes when missing
    pub async fn install(&self) -> anyhow::Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let mut tables = vec![
            schema.create_table_from_entity(exclusive_lock::Entity),
            schema.create_table_from_entity(tree_lock::Entity),
            schema.create_table_from_entity(shared_lock::Entity),
        ];
        for table in tables.iter_mut() {
            table.if_not_exists();
            self.db.execute(backend.build(&*table)).await?;
        }

        for mut index in schema.create_index_from_entity(tree_lock::Entity) {
            index.if_not_exists();
            self.db.execute(backend.build(&index)).await?;
        }
        Ok(())
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

// ============================================================================
// ExclusiveLockPersistence implementation
// ============================================================================

#[async_trait]
impl ExclusiveLockPersistence for SqlLockStore {
    async fn acquire_exclusive_lock(
        &self,
        key: &str,
        operation_id: &str,
        expiration: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        exclusive_lock::Entity::delete_many()
            .filter(exclusive_lock::Column::Name.eq(key))
            .filter(exclusive_lock::Column::TimeLimit.lte(Utc::now()))
            .exec(&self.db)
            .await?;

        let model = exclusive_lock::ActiveModel {
            name: Set(key.to_string()),
            operation_id: Set(operation_id.to_string()),
            time_limit: Set(expiration),
            ..Default::default()
        };

        match exclusive_lock::Entity::insert(model).exec(&self.db).await {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn refresh_exclusive_lock(
        &self,
        key: &str,
        operation_id: &str,
        expiration: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        exclusive_lock::Entity::update_many()
            .col_expr(exclusive_lock::Column::TimeLimit, Expr::value(expiration))
            .filter(exclusive_lock::Column::Name.eq(key))
            .filter(exclusive_lock::Column::OperationId.eq(operation_id))
            .filter(exclusive_lock::Column::TimeLimit.gt(Utc::now()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn release_exclusive_lock(&self, key: &str, operation_id: &str) -> anyhow::Result<()> {
        exclusive_lock::Entity::delete_many()
            .filter(exclusive_lock::Column::Name.eq(key))
            .filter(exclusive_lock::Column::OperationId.eq(operation_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn is_exclusive_locked(&self, key: &str) -> anyhow::Result<bool> {
        let count = exclusive_lock::Entity::find()
            .filter(exclusive_lock::Column::Name.eq(key))
            .filter(exclusive_lock::Column::TimeLimit.gt(Utc::now()))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }
}

// ============================================================================
// TreeLockPersistence implementation
// ============================================================================

/// Escape SQL wildcard characters in a literal LIKE prefix.
#[inline]
fn escape_sql_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Rows that conflict with a lock on the normalized `path`
fn tree_conflict_condition(path: &str) -> Condition {
    if path == "/" {
        return Condition::all();
    }

    let mut same_or_above = ancestor_paths(path);
    same_or_above.push(path.to_string());

    Condition::any()
        .add(tree_lock::Column::Path.is_in(same_or_above))
        .add(
            tree_lock::Column::Path
                .like(LikeExpr::new(format!("{}/%", escape_sql_like(path))).escape('\\')),
        )
}

impl SqlLockStore {
    async fn has_tree_conflict(&self, path: &str, exclude_id: Option<i32>) -> anyhow::Result<bool> {
        let mut query = tree_lock::Entity::find()
            .filter(tree_conflict_condition(path))
            .filter(tree_lock::Column::LockedAt.gt(self.options.tree_lock_time_limit()));
        if let Some(id) = exclude_id {
            query = query.filter(tree_lock::Column::Id.ne(id));
        }
        Ok(query.count(&self.db).await? > 0)
    }
}

#[async_trait]
impl TreeLockPersistence for SqlLockStore {
    async fn acquire_tree_lock(&self, path: &str) -> anyhow::Result<i32> {
        let path = normalize_path(path);

        tree_lock::Entity::delete_many()
            .filter(tree_lock::Column::LockedAt.lte(self.options.tree_lock_time_limit()))
            .exec(&self.db)
            .await?;

        if self.has_tree_conflict(&path, None).await? {
            return Ok(0);
        }

        let inserted = tree_lock::ActiveModel {
            path: Set(path.clone()),
            locked_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        if self.has_tree_conflict(&path, Some(inserted.id)).await? {
            tree_lock::Entity::delete_by_id(inserted.id)
                .exec(&self.db)
                .await?;
            return Ok(0);
        }
        Ok(inserted.id)
    }

    async fn release_tree_locks(&self, lock_ids: &[i32]) -> anyhow::Result<()> {
        if lock_ids.is_empty() {
            return Ok(());
        }
        tree_lock::Entity::delete_many()
            .filter(tree_lock::Column::Id.is_in(lock_ids.iter().copied()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn is_tree_locked(&self, path: &str) -> anyhow::Result<bool> {
        self.has_tree_conflict(&normalize_path(path), None).await
    }

    async fn load_all_tree_locks(&self) -> anyhow::Result<Vec<TreeLockEntry>> {
        let rows = tree_lock::Entity::find()
            .filter(tree_lock::Column::LockedAt.gt(self.options.tree_lock_time_limit()))
            .order_by_asc(tree_lock::Column::Id)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| TreeLockEntry {
                id: row.id,
                path: row.path,
                locked_at: row.locked_at,
            })
            .collect())
    }
}

// ============================================================================
// SharedLockPersistence implementation
// ============================================================================

impl SqlLockStore {
    /// Explain a conditional write that touched no row.
    ///
    /// Only a live row that still carries `held`, the caller's own token,
    /// counts as applied; any other live token is a mismatch.
    async fn classify_shared_miss(
        &self,
        content_id: i32,
        held: &str,
    ) -> anyhow::Result<SharedLockWrite> {
        Ok(match self.get_shared_lock(content_id).await? {
            None => SharedLockWrite::NotFound,
            Some(current) if current == held => SharedLockWrite::Applied(current),
            Some(current) => SharedLockWrite::Mismatch(current),
        })
    }
}

#[async_trait]
impl SharedLockPersistence for SqlLockStore {
    async fn create_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
    ) -> anyhow::Result<SharedLockWrite> {
        shared_lock::Entity::delete_many()
            .filter(shared_lock::Column::ContentId.eq(content_id))
            .filter(shared_lock::Column::CreationDate.lte(self.options.shared_lock_time_limit()))
            .exec(&self.db)
            .await?;

        // A concurrent unlock can remove the row between the failed insert and
        // the refresh; one more insert settles it.
        for _ in 0..2 {
            let model = shared_lock::ActiveModel {
                content_id: Set(content_id),
                token: Set(lock.to_string()),
                creation_date: Set(Utc::now()),
                ..Default::default()
            };
            match shared_lock::Entity::insert(model).exec(&self.db).await {
                Ok(_) => return Ok(SharedLockWrite::Applied(lock.to_string())),
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err.into()),
            }

            match self.refresh_shared_lock(content_id, lock).await? {
                SharedLockWrite::NotFound => continue,
                outcome => return Ok(outcome),
            }
        }
        self.classify_shared_miss(content_id, lock).await
    }

    async fn refresh_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
    ) -> anyhow::Result<SharedLockWrite> {
        let result = shared_lock::Entity::update_many()
            .col_expr(shared_lock::Column::CreationDate, Expr::value(Utc::now()))
            .filter(shared_lock::Column::ContentId.eq(content_id))
            .filter(shared_lock::Column::Token.eq(lock))
            .filter(shared_lock::Column::CreationDate.gt(self.options.shared_lock_time_limit()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(SharedLockWrite::Applied(lock.to_string()));
        }
        self.classify_shared_miss(content_id, lock).await
    }

    async fn modify_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
        new_lock: &str,
    ) -> anyhow::Result<SharedLockWrite> {
        let result = shared_lock::Entity::update_many()
            .col_expr(shared_lock::Column::Token, Expr::value(new_lock))
            .col_expr(shared_lock::Column::CreationDate, Expr::value(Utc::now()))
            .filter(shared_lock::Column::ContentId.eq(content_id))
            .filter(shared_lock::Column::Token.eq(lock))
            .filter(shared_lock::Column::CreationDate.gt(self.options.shared_lock_time_limit()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(SharedLockWrite::Applied(new_lock.to_string()));
        }
        if lock == new_lock {
            return self.classify_shared_miss(content_id, lock).await;
        }
        Ok(match self.get_shared_lock(content_id).await? {
            None => SharedLockWrite::NotFound,
            Some(current) => SharedLockWrite::Mismatch(current),
        })
    }

    async fn get_shared_lock(&self, content_id: i32) -> anyhow::Result<Option<String>> {
        let row = shared_lock::Entity::find()
            .filter(shared_lock::Column::ContentId.eq(content_id))
            .filter(shared_lock::Column::CreationDate.gt(self.options.shared_lock_time_limit()))
            .one(&self.db)
            .await?;
        Ok(row.map(|row| row.token))
    }

    async fn delete_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
    ) -> anyhow::Result<SharedLockWrite> {
        let result = shared_lock::Entity::delete_many()
            .filter(shared_lock::Column::ContentId.eq(content_id))
            .filter(shared_lock::Column::Token.eq(lock))
            .filter(shared_lock::Column::CreationDate.gt(self.options.shared_lock_time_limit()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(SharedLockWrite::Applied(lock.to_string()));
        }
        Ok(match self.get_shared_lock(content_id).await? {
            None => SharedLockWrite::NotFound,
            Some(current) => SharedLockWrite::Mismatch(current),
        })
    }

    async fn delete_all_shared_locks(&self) -> anyhow::Result<u64> {
        let result = shared_lock::Entity::delete_many().exec(&self.db).await?;
        Ok(result.rows_affected)
    }

    async fn cleanup_shared_locks(&self) -> anyhow::Result<u64> {
        let result = shared_lock::Entity::delete_many()
            .filter(shared_lock::Column::CreationDate.lte(self.options.shared_lock_time_limit()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

// ============================================================================
// LockPersistence implementation
// ============================================================================

#[async_trait]
impl LockPersistence for SqlLockStore {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::ExternalDb
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        self.db.ping().await?;
        Ok(())
    }
}
