use crate::models::{
    CreateItemRequest, DonationRequest, Item, ItemFilter, ItemStatus, RequestFilter,
    RequestStatus, Role, UpdateItemRequest, User,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    QueryBuilder, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, name, password_hash, role, created_at";
const ITEM_COLUMNS: &str =
    "id, donor_id, name, category, description, location, status, created_at, updated_at";
const REQUEST_COLUMNS: &str = "id, requester_id, item_id, status, created_at, updated_at";

/// RepositoryError
///
/// Failures of the persistence layer. Unique-constraint violations are split out
/// so callers can report them as conflicts instead of server errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("unique constraint violated")]
    UniqueViolation,

    #[error(transparent)]
    Sqlx(sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Self::UniqueViolation,
            _ => Self::Sqlx(err),
        }
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// NewUser
///
/// Registration data after password hashing.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
}

/// Repository Trait
///
/// Abstract contract for all persistence operations. Handlers only see this
/// trait, so tests can swap in a mock.
///
/// Every state-changing method is a single conditional statement or a single
/// transaction; a `None`/`false` result means the precondition no longer held
/// when the write was attempted.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;

    // --- Items ---
    async fn create_item(&self, donor_id: Uuid, req: CreateItemRequest) -> RepoResult<Item>;
    async fn get_item(&self, id: Uuid) -> RepoResult<Option<Item>>;
    // Insertion order.
    async fn list_items(&self, filter: &ItemFilter) -> RepoResult<Vec<Item>>;
    // Descriptive fields only. Uses COALESCE for partial updates.
    async fn update_item(&self, id: Uuid, req: &UpdateItemRequest) -> RepoResult<Option<Item>>;
    // Moves the item from `from` to `to`; None if it was no longer in `from`.
    async fn set_item_status(
        &self,
        id: Uuid,
        from: ItemStatus,
        to: ItemStatus,
    ) -> RepoResult<Option<Item>>;
    // Deletes an available item with no pending requests, along with its settled requests.
    async fn delete_item(&self, id: Uuid) -> RepoResult<bool>;

    // --- Requests ---
    // Inserts a pending request only if the item is available and the requester
    // has no pending request for it yet.
    async fn create_request(
        &self,
        requester_id: Uuid,
        item_id: Uuid,
    ) -> RepoResult<Option<DonationRequest>>;
    async fn get_request(&self, id: Uuid) -> RepoResult<Option<DonationRequest>>;
    async fn list_requests(&self, filter: &RequestFilter) -> RepoResult<Vec<DonationRequest>>;
    async fn has_pending_request(&self, requester_id: Uuid, item_id: Uuid) -> RepoResult<bool>;
    async fn count_pending_requests(&self, item_id: Uuid) -> RepoResult<i64>;
    // Moves a pending request to `next`. Approval also reserves the item and
    // declines the other pending requests for it. None if another writer got there first.
    async fn decide_request(
        &self,
        id: Uuid,
        next: RequestStatus,
    ) -> RepoResult<Option<DonationRequest>>;
    // Deletes the request only if it is still in `observed` status.
    async fn delete_request(&self, id: Uuid, observed: RequestStatus) -> RepoResult<bool>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// SqliteRepository
///
/// The concrete implementation of the `Repository` trait, backed by SQLite.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Creates a new repository instance using an initialized connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// connect
    ///
    /// Opens a pool for `db_url` and applies the embedded migrations.
    ///
    /// An in-memory database lives only as long as its connection, so
    /// `sqlite::memory:` is served by one connection that is never recycled.
    pub async fn connect(db_url: &str) -> RepoResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?.foreign_keys(true);

        let pool = if db_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(db_url, "database ready");

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    /// create_user
    ///
    /// Inserts a new account. A duplicate email surfaces as `UniqueViolation`.
    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let sql = format!(
            "INSERT INTO users (id, email, name, password_hash, role, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {USER_COLUMNS}"
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.email)
            .bind(&user.name)
            .bind(&user.password_hash)
            .bind(user.role)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// create_item
    ///
    /// New items always start out `available`.
    async fn create_item(&self, donor_id: Uuid, req: CreateItemRequest) -> RepoResult<Item> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO items (id, donor_id, name, category, description, location, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {ITEM_COLUMNS}"
        );
        let item = sqlx::query_as::<_, Item>(&sql)
            .bind(Uuid::new_v4())
            .bind(donor_id)
            .bind(req.name)
            .bind(req.category)
            .bind(req.description)
            .bind(req.location)
            .bind(ItemStatus::Available)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(item)
    }

    async fn get_item(&self, id: Uuid) -> RepoResult<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
        let item = sqlx::query_as::<_, Item>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// list_items
    ///
    /// Builds the filter with QueryBuilder so every value is bound, never interpolated.
    async fn list_items(&self, filter: &ItemFilter) -> RepoResult<Vec<Item>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM items WHERE 1 = 1"));

        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }
        if let Some(category) = &filter.category {
            builder.push(" AND category = ");
            builder.push_bind(category.clone());
        }
        if let Some(location) = &filter.location {
            builder.push(" AND location = ");
            builder.push_bind(location.clone());
        }
        if let Some(donor_id) = filter.donor_id {
            builder.push(" AND donor_id = ");
            builder.push_bind(donor_id);
        }

        builder.push(" ORDER BY rowid ASC");

        let items = builder
            .build_query_as::<Item>()
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    async fn update_item(&self, id: Uuid, req: &UpdateItemRequest) -> RepoResult<Option<Item>> {
        let sql = format!(
            "UPDATE items \
             SET description = COALESCE(?, description), \
                 name = COALESCE(?, name), \
                 category = COALESCE(?, category), \
                 location = COALESCE(?, location), \
                 updated_at = ? \
             WHERE id = ? RETURNING {ITEM_COLUMNS}"
        );
        let item = sqlx::query_as::<_, Item>(&sql)
            .bind(req.description.clone())
            .bind(req.name.clone())
            .bind(req.category.clone())
            .bind(req.location.clone())
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    async fn set_item_status(
        &self,
        id: Uuid,
        from: ItemStatus,
        to: ItemStatus,
    ) -> RepoResult<Option<Item>> {
        let sql = format!(
            "UPDATE items SET status = ?, updated_at = ? WHERE id = ? AND status = ? \
             RETURNING {ITEM_COLUMNS}"
        );
        let item = sqlx::query_as::<_, Item>(&sql)
            .bind(to)
            .bind(Utc::now())
            .bind(id)
            .bind(from)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(item) = &item {
            tracing::info!(item_id = %item.id, from = from.as_str(), to = to.as_str(), "item status changed");
        }
        Ok(item)
    }

    /// delete_item
    ///
    /// The guard UPDATE runs first so the transaction holds the write lock while
    /// the pending-request check is still true.
    async fn delete_item(&self, id: Uuid) -> RepoResult<bool> {
        let mut tx = self.pool.begin().await?;

        let guard = sqlx::query(
            "UPDATE items SET updated_at = ? WHERE id = ? AND status = 'available' \
             AND NOT EXISTS (SELECT 1 FROM requests WHERE item_id = ? AND status = 'pending')",
        )
        .bind(Utc::now())
        .bind(id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if guard.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM requests WHERE item_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(item_id = %id, "item deleted");
        Ok(true)
    }

    /// create_request
    ///
    /// INSERT ... SELECT ... WHERE keeps the availability check and the insert
    /// in one statement.
    async fn create_request(
        &self,
        requester_id: Uuid,
        item_id: Uuid,
    ) -> RepoResult<Option<DonationRequest>> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO requests (id, requester_id, item_id, status, created_at, updated_at) \
             SELECT ?, ?, ?, 'pending', ?, ? \
             WHERE EXISTS (SELECT 1 FROM items WHERE id = ? AND status = 'available') \
               AND NOT EXISTS (SELECT 1 FROM requests \
                               WHERE requester_id = ? AND item_id = ? AND status = 'pending') \
             RETURNING {REQUEST_COLUMNS}"
        );
        let request = sqlx::query_as::<_, DonationRequest>(&sql)
            .bind(Uuid::new_v4())
            .bind(requester_id)
            .bind(item_id)
            .bind(now)
            .bind(now)
            .bind(item_id)
            .bind(requester_id)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(request)
    }

    async fn get_request(&self, id: Uuid) -> RepoResult<Option<DonationRequest>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?");
        let request = sqlx::query_as::<_, DonationRequest>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(request)
    }

    /// list_requests
    ///
    /// Joins `items` so donors can be scoped to requests on their own items.
    async fn list_requests(&self, filter: &RequestFilter) -> RepoResult<Vec<DonationRequest>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT r.id, r.requester_id, r.item_id, r.status, r.created_at, r.updated_at \
             FROM requests r JOIN items i ON i.id = r.item_id WHERE 1 = 1",
        );

        if let Some(requester_id) = filter.requester_id {
            builder.push(" AND r.requester_id = ");
            builder.push_bind(requester_id);
        }
        if let Some(donor_id) = filter.donor_id {
            builder.push(" AND i.donor_id = ");
            builder.push_bind(donor_id);
        }
        if let Some(item_id) = filter.item_id {
            builder.push(" AND r.item_id = ");
            builder.push_bind(item_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND r.status = ");
            builder.push_bind(status);
        }

        builder.push(" ORDER BY r.rowid ASC");

        let requests = builder
            .build_query_as::<DonationRequest>()
            .fetch_all(&self.pool)
            .await?;
        Ok(requests)
    }

    async fn has_pending_request(&self, requester_id: Uuid, item_id: Uuid) -> RepoResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM requests \
             WHERE requester_id = ? AND item_id = ? AND status = 'pending'",
        )
        .bind(requester_id)
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn count_pending_requests(&self, item_id: Uuid) -> RepoResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM requests WHERE item_id = ? AND status = 'pending'",
        )
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// decide_request
    ///
    /// The request update is guarded by `status = 'pending'`: of two concurrent
    /// decisions only the first to commit matches a row. Reservation of the item
    /// and the sibling declines ride in the same transaction.
    async fn decide_request(
        &self,
        id: Uuid,
        next: RequestStatus,
    ) -> RepoResult<Option<DonationRequest>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE requests SET status = ?, updated_at = ? WHERE id = ? AND status = 'pending' \
             RETURNING {REQUEST_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, DonationRequest>(&sql)
            .bind(next)
            .bind(now)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };

        if next == RequestStatus::Approved {
            let reserved = sqlx::query(
                "UPDATE items SET status = 'reserved', updated_at = ? \
                 WHERE id = ? AND status = 'available'",
            )
            .bind(now)
            .bind(updated.item_id)
            .execute(&mut *tx)
            .await?;

            if reserved.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(None);
            }

            let declined = sqlx::query(
                "UPDATE requests SET status = 'declined', updated_at = ? \
                 WHERE item_id = ? AND status = 'pending' AND id <> ?",
            )
            .bind(now)
            .bind(updated.item_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            tracing::info!(
                request_id = %id,
                item_id = %updated.item_id,
                siblings_declined = declined.rows_affected(),
                "request approved, item reserved"
            );
        } else {
            tracing::info!(request_id = %id, status = next.as_str(), "request decided");
        }

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn delete_request(&self, id: Uuid, observed: RequestStatus) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM requests WHERE id = ? AND status = ?")
            .bind(id)
            .bind(observed)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
