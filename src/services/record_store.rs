//! src/services/record_store.rs
//!
//! Durable bookkeeping for captures, resources and upload requests.
//!
//! `RecordStore` is the persistence contract the engine depends on; it is
//! object safe so the engine can hold an `Arc<dyn RecordStore>`.
//! `SqliteRecordStore` implements it on top of an SQLx SQLite pool. Unique and
//! foreign-key constraints live in the schema (`migrations/0001_init.sql`) and
//! are surfaced as typed `StoreError`s.

use crate::models::{Capture, RequestStatus, Resource, UploadRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    types::Json,
};
use std::{str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};

/// Schema applied on open and by `--migrate`.
const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} `{id}` violates a uniqueness constraint: {detail}")]
    ConstraintViolation {
        entity: &'static str,
        id: String,
        detail: String,
    },
    #[error("{entity} `{id}` references a missing {parent}")]
    ForeignKeyViolation {
        entity: &'static str,
        id: String,
        parent: &'static str,
    },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("upload request `{id}` is claimed by another driver")]
    ClaimLost { id: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A resource removed from the store, with what it may have left remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedResource {
    pub resource_id: String,
    pub upload_url: String,
    /// Multipart session of an upload that never completed.
    pub open_upload_id: Option<String>,
}

/// Persistence contract for the upload engine.
///
/// Every single-record write is atomic. `add_resource_with_request` and
/// `delete_records_in_capture` span several rows and are all-or-nothing.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn add_capture(&self, capture: &Capture) -> StoreResult<String>;

    async fn add_resource(&self, resource: &Resource) -> StoreResult<String>;

    async fn add_upload_request(&self, request: &UploadRequest) -> StoreResult<String>;

    /// Insert a resource and its upload request in one transaction.
    async fn add_resource_with_request(
        &self,
        resource: &Resource,
        request: &UploadRequest,
    ) -> StoreResult<String>;

    /// Resources of every capture taken for `participant_id`, in insertion order.
    async fn list_resources_for_participant(
        &self,
        participant_id: &str,
    ) -> StoreResult<Vec<Resource>>;

    /// Resources of one capture, in insertion order.
    async fn list_resources_in_capture(&self, capture_id: &str) -> StoreResult<Vec<Resource>>;

    /// Upload requests with exactly `status`, in insertion order.
    async fn list_upload_requests(&self, status: RequestStatus)
    -> StoreResult<Vec<UploadRequest>>;

    /// Replace a request by `request_id`. The `upload_url` may never change.
    async fn update_upload_request(&self, request: &UploadRequest) -> StoreResult<()>;

    /// Take the upload lease on a request for `owner` until `until`.
    ///
    /// Returns false while another lease is still live at `now`, or when the
    /// request does not exist. An expired lease is taken over.
    async fn claim_upload_request(
        &self,
        request_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Replace a request under `owner`'s lease and extend the lease to
    /// `until`. Fails with `ClaimLost` once someone else holds the lease.
    async fn checkpoint_upload_request(
        &self,
        request: &UploadRequest,
        owner: &str,
        until: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Drop `owner`'s lease. A lease taken over by someone else is kept.
    async fn release_upload_request(&self, request_id: &str, owner: &str) -> StoreResult<()>;

    /// Whether a live lease is held on the request at `now`.
    async fn is_upload_request_claimed(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Replace a resource by `resource_id`. The `upload_url` may not change
    /// once its upload request has acknowledged bytes.
    async fn update_resource(&self, resource: &Resource) -> StoreResult<()>;

    async fn get_capture(&self, capture_id: &str) -> StoreResult<Capture>;

    async fn get_resource(&self, resource_id: &str) -> StoreResult<Resource>;

    async fn get_upload_request(&self, request_id: &str) -> StoreResult<UploadRequest>;

    async fn get_upload_request_for_resource(
        &self,
        resource_id: &str,
    ) -> StoreResult<UploadRequest>;

    async fn delete_upload_request(&self, request_id: &str) -> StoreResult<bool>;

    /// Delete a resource together with its upload request. Returns `None` if
    /// the resource does not exist.
    async fn delete_resource(&self, resource_id: &str) -> StoreResult<Option<RemovedResource>>;

    async fn delete_capture(&self, capture_id: &str) -> StoreResult<bool>;

    /// Delete a capture with all of its resources and upload requests, or
    /// nothing at all. Returns the removed resources, or `None` if the
    /// capture does not exist.
    async fn delete_records_in_capture(
        &self,
        capture_id: &str,
    ) -> StoreResult<Option<Vec<RemovedResource>>>;

    /// Garbage-collect completed requests last touched before `before`.
    async fn purge_completed_upload_requests(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}

const SELECT_REQUEST: &str = "SELECT request_id, resource_id, upload_url, file_path, file_size,
        bytes_uploaded, next_part, upload_id, status, failed_attempts, last_error,
        retryable, last_updated_time
     FROM upload_requests";

const SELECT_RESOURCE: &str = "SELECT resource_id, capture_id, capture_type, file_type,
        file_path, file_size, upload_url, status
     FROM resources";

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteRecordStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open (creating if missing) the database at `database_url` and apply the schema.
    pub async fn open(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        run_migrations(&pool).await?;
        info!("record store ready at {}", database_url);
        Ok(Self::new(Arc::new(pool)))
    }

    /// Open a private in-memory database.
    ///
    /// The pool is pinned to a single connection that never expires, since
    /// each SQLite in-memory connection is its own database.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        run_migrations(&pool).await?;
        Ok(Self::new(Arc::new(pool)))
    }

    async fn request_exists(&self, request_id: &str) -> StoreResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM upload_requests WHERE request_id = ?")
                .bind(request_id)
                .fetch_optional(&*self.db)
                .await?;
        Ok(found.is_some())
    }

    async fn resource_exists(&self, resource_id: &str) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM resources WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(found.is_some())
    }
}

/// Apply the embedded schema. Idempotent.
pub async fn run_migrations(db: &SqlitePool) -> StoreResult<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("running {} migration statements", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

async fn insert_resource<'e, E>(executor: E, resource: &Resource) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO resources (
            resource_id, capture_id, capture_type, file_type, file_path,
            file_size, upload_url, status
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&resource.resource_id)
    .bind(&resource.capture_id)
    .bind(resource.capture_type)
    .bind(&resource.file_type)
    .bind(&resource.file_path)
    .bind(resource.file_size)
    .bind(&resource.upload_url)
    .bind(resource.status)
    .execute(executor)
    .await
    .map_err(|err| classify(err, "resource", &resource.resource_id, "capture"))?;
    Ok(())
}

async fn insert_upload_request<'e, E>(executor: E, request: &UploadRequest) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO upload_requests (
            request_id, resource_id, upload_url, file_path, file_size, bytes_uploaded,
            next_part, upload_id, status, failed_attempts, last_error, retryable,
            last_updated_time
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.request_id)
    .bind(&request.resource_id)
    .bind(&request.upload_url)
    .bind(&request.file_path)
    .bind(request.file_size)
    .bind(request.bytes_uploaded)
    .bind(request.next_part)
    .bind(&request.upload_id)
    .bind(request.status)
    .bind(request.failed_attempts)
    .bind(&request.last_error)
    .bind(request.retryable)
    .bind(request.last_updated_time)
    .execute(executor)
    .await
    .map_err(|err| classify(err, "upload request", &request.request_id, "resource"))?;
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn add_capture(&self, capture: &Capture) -> StoreResult<String> {
        sqlx::query(
            "INSERT INTO captures (
                capture_id, participant_id, capture_type, capture_folder, settings, captured_at
            ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&capture.capture_id)
        .bind(&capture.participant_id)
        .bind(capture.capture_type)
        .bind(&capture.capture_folder)
        .bind(Json(&capture.settings))
        .bind(capture.captured_at)
        .execute(&*self.db)
        .await
        .map_err(|err| classify(err, "capture", &capture.capture_id, "participant"))?;

        debug!(capture_id = %capture.capture_id, "capture added");
        Ok(capture.capture_id.clone())
    }

    async fn add_resource(&self, resource: &Resource) -> StoreResult<String> {
        insert_resource(&*self.db, resource).await?;
        debug!(resource_id = %resource.resource_id, "resource added");
        Ok(resource.resource_id.clone())
    }

    async fn add_upload_request(&self, request: &UploadRequest) -> StoreResult<String> {
        insert_upload_request(&*self.db, request).await?;
        debug!(request_id = %request.request_id, "upload request added");
        Ok(request.request_id.clone())
    }

    async fn add_resource_with_request(
        &self,
        resource: &Resource,
        request: &UploadRequest,
    ) -> StoreResult<String> {
        let mut tx = self.db.begin().await?;
        insert_resource(&mut *tx, resource).await?;
        insert_upload_request(&mut *tx, request).await?;
        tx.commit().await?;

        debug!(
            resource_id = %resource.resource_id,
            request_id = %request.request_id,
            "resource and upload request added"
        );
        Ok(resource.resource_id.clone())
    }

    async fn list_resources_for_participant(
        &self,
        participant_id: &str,
    ) -> StoreResult<Vec<Resource>> {
        let rows = sqlx::query_as::<_, Resource>(
            "SELECT r.resource_id, r.capture_id, r.capture_type, r.file_type, r.file_path,
                    r.file_size, r.upload_url, r.status
             FROM resources r
             JOIN captures c ON c.capture_id = r.capture_id
             WHERE c.participant_id = ?
             ORDER BY r.id ASC",
        )
        .bind(participant_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn list_resources_in_capture(&self, capture_id: &str) -> StoreResult<Vec<Resource>> {
        let sql = format!("{SELECT_RESOURCE} WHERE capture_id = ? ORDER BY id ASC");
        let rows = sqlx::query_as::<_, Resource>(&sql)
            .bind(capture_id)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    async fn list_upload_requests(
        &self,
        status: RequestStatus,
    ) -> StoreResult<Vec<UploadRequest>> {
        let sql = format!("{SELECT_REQUEST} WHERE status = ? ORDER BY id ASC");
        let rows = sqlx::query_as::<_, UploadRequest>(&sql)
            .bind(status)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    async fn update_upload_request(&self, request: &UploadRequest) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE upload_requests SET
                resource_id = ?, file_path = ?, file_size = ?, bytes_uploaded = ?,
                next_part = ?, upload_id = ?, status = ?, failed_attempts = ?,
                last_error = ?, retryable = ?, last_updated_time = ?
             WHERE request_id = ? AND upload_url = ?",
        )
        .bind(&request.resource_id)
        .bind(&request.file_path)
        .bind(request.file_size)
        .bind(request.bytes_uploaded)
        .bind(request.next_part)
        .bind(&request.upload_id)
        .bind(request.status)
        .bind(request.failed_attempts)
        .bind(&request.last_error)
        .bind(request.retryable)
        .bind(request.last_updated_time)
        .bind(&request.request_id)
        .bind(&request.upload_url)
        .execute(&*self.db)
        .await
        .map_err(|err| classify(err, "upload request", &request.request_id, "resource"))?;

        if result.rows_affected() == 0 {
            if self.request_exists(&request.request_id).await? {
                return Err(StoreError::ConstraintViolation {
                    entity: "upload request",
                    id: request.request_id.clone(),
                    detail: "upload_url is immutable".into(),
                });
            }
            return Err(StoreError::NotFound {
                entity: "upload request",
                id: request.request_id.clone(),
            });
        }
        Ok(())
    }

    async fn claim_upload_request(
        &self,
        request_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE upload_requests SET claimed_by = ?, claimed_until = ?
             WHERE request_id = ?
               AND (claimed_by IS NULL OR claimed_until IS NULL OR claimed_until < ?)",
        )
        .bind(owner)
        .bind(until.timestamp_millis())
        .bind(request_id)
        .bind(now.timestamp_millis())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn checkpoint_upload_request(
        &self,
        request: &UploadRequest,
        owner: &str,
        until: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE upload_requests SET
                resource_id = ?, file_path = ?, file_size = ?, bytes_uploaded = ?,
                next_part = ?, upload_id = ?, status = ?, failed_attempts = ?,
                last_error = ?, retryable = ?, last_updated_time = ?, claimed_until = ?
             WHERE request_id = ? AND upload_url = ? AND claimed_by = ?",
        )
        .bind(&request.resource_id)
        .bind(&request.file_path)
        .bind(request.file_size)
        .bind(request.bytes_uploaded)
        .bind(request.next_part)
        .bind(&request.upload_id)
        .bind(request.status)
        .bind(request.failed_attempts)
        .bind(&request.last_error)
        .bind(request.retryable)
        .bind(request.last_updated_time)
        .bind(until.timestamp_millis())
        .bind(&request.request_id)
        .bind(&request.upload_url)
        .bind(owner)
        .execute(&*self.db)
        .await
        .map_err(|err| classify(err, "upload request", &request.request_id, "resource"))?;

        if result.rows_affected() == 0 {
            if self.request_exists(&request.request_id).await? {
                return Err(StoreError::ClaimLost {
                    id: request.request_id.clone(),
                });
            }
            return Err(StoreError::NotFound {
                entity: "upload request",
                id: request.request_id.clone(),
            });
        }
        Ok(())
    }

    async fn release_upload_request(&self, request_id: &str, owner: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE upload_requests SET claimed_by = NULL, claimed_until = NULL
             WHERE request_id = ? AND claimed_by = ?",
        )
        .bind(request_id)
        .bind(owner)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn is_upload_request_claimed(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM upload_requests
             WHERE request_id = ? AND claimed_by IS NOT NULL AND claimed_until >= ?",
        )
        .bind(request_id)
        .bind(now.timestamp_millis())
        .fetch_optional(&*self.db)
        .await?;
        Ok(found.is_some())
    }

    async fn update_resource(&self, resource: &Resource) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE resources SET
                capture_id = ?, capture_type = ?, file_type = ?, file_path = ?,
                file_size = ?, upload_url = ?, status = ?
             WHERE resource_id = ?
               AND (upload_url = ? OR NOT EXISTS (
                    SELECT 1 FROM upload_requests
                    WHERE resource_id = ? AND bytes_uploaded > 0))",
        )
        .bind(&resource.capture_id)
        .bind(resource.capture_type)
        .bind(&resource.file_type)
        .bind(&resource.file_path)
        .bind(resource.file_size)
        .bind(&resource.upload_url)
        .bind(resource.status)
        .bind(&resource.resource_id)
        .bind(&resource.upload_url)
        .bind(&resource.resource_id)
        .execute(&*self.db)
        .await
        .map_err(|err| classify(err, "resource", &resource.resource_id, "capture"))?;

        if result.rows_affected() == 0 {
            if self.resource_exists(&resource.resource_id).await? {
                return Err(StoreError::ConstraintViolation {
                    entity: "resource",
                    id: resource.resource_id.clone(),
                    detail: "upload_url cannot change after bytes were uploaded".into(),
                });
            }
            return Err(StoreError::NotFound {
                entity: "resource",
                id: resource.resource_id.clone(),
            });
        }
        Ok(())
    }

    async fn get_capture(&self, capture_id: &str) -> StoreResult<Capture> {
        sqlx::query_as::<_, Capture>(
            "SELECT capture_id, participant_id, capture_type, capture_folder, settings, captured_at
             FROM captures WHERE capture_id = ?",
        )
        .bind(capture_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "capture",
            id: capture_id.to_string(),
        })
    }

    async fn get_resource(&self, resource_id: &str) -> StoreResult<Resource> {
        let sql = format!("{SELECT_RESOURCE} WHERE resource_id = ?");
        sqlx::query_as::<_, Resource>(&sql)
            .bind(resource_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "resource",
                id: resource_id.to_string(),
            })
    }

    async fn get_upload_request(&self, request_id: &str) -> StoreResult<UploadRequest> {
        let sql = format!("{SELECT_REQUEST} WHERE request_id = ?");
        sqlx::query_as::<_, UploadRequest>(&sql)
            .bind(request_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "upload request",
                id: request_id.to_string(),
            })
    }

    async fn get_upload_request_for_resource(
        &self,
        resource_id: &str,
    ) -> StoreResult<UploadRequest> {
        let sql = format!("{SELECT_REQUEST} WHERE resource_id = ?");
        sqlx::query_as::<_, UploadRequest>(&sql)
            .bind(resource_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "upload request for resource",
                id: resource_id.to_string(),
            })
    }

    async fn delete_upload_request(&self, request_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM upload_requests WHERE request_id = ?")
            .bind(request_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_resource(&self, resource_id: &str) -> StoreResult<Option<RemovedResource>> {
        let mut tx = self.db.begin().await?;
        let request: Option<RemovedRequest> = sqlx::query_as(
            "DELETE FROM upload_requests WHERE resource_id = ?
             RETURNING resource_id, upload_id, status",
        )
        .bind(resource_id)
        .fetch_optional(&mut *tx)
        .await?;
        let resource: Option<(String, String)> = sqlx::query_as(
            "DELETE FROM resources WHERE resource_id = ? RETURNING resource_id, upload_url",
        )
        .bind(resource_id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(resource.and_then(|resource| {
            removed_resources(vec![resource], request.into_iter().collect())
                .into_iter()
                .next()
        }))
    }

    async fn delete_capture(&self, capture_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM captures WHERE capture_id = ?")
            .bind(capture_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_records_in_capture(
        &self,
        capture_id: &str,
    ) -> StoreResult<Option<Vec<RemovedResource>>> {
        // Dropping `tx` on any early return rolls the whole cascade back.
        let mut tx = self.db.begin().await?;

        let requests: Vec<RemovedRequest> = sqlx::query_as(
            "DELETE FROM upload_requests WHERE resource_id IN (
                SELECT resource_id FROM resources WHERE capture_id = ?)
             RETURNING resource_id, upload_id, status",
        )
        .bind(capture_id)
        .fetch_all(&mut *tx)
        .await?;
        let resources: Vec<(String, String)> = sqlx::query_as(
            "DELETE FROM resources WHERE capture_id = ? RETURNING resource_id, upload_url",
        )
        .bind(capture_id)
        .fetch_all(&mut *tx)
        .await?;
        let capture = sqlx::query("DELETE FROM captures WHERE capture_id = ?")
            .bind(capture_id)
            .execute(&mut *tx)
            .await?;

        if capture.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;

        debug!(
            capture_id,
            requests = requests.len(),
            resources = resources.len(),
            "deleted capture records"
        );
        Ok(Some(removed_resources(resources, requests)))
    }

    async fn purge_completed_upload_requests(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM upload_requests
             WHERE status = ? AND julianday(last_updated_time) < julianday(?)",
        )
        .bind(RequestStatus::Completed)
        .bind(before)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

/// `(resource_id, upload_id, status)` of a deleted upload request.
type RemovedRequest = (String, Option<String>, RequestStatus);

/// Pair deleted `(resource_id, upload_url)` rows with their deleted requests.
fn removed_resources(
    resources: Vec<(String, String)>,
    requests: Vec<RemovedRequest>,
) -> Vec<RemovedResource> {
    resources
        .into_iter()
        .map(|(resource_id, upload_url)| {
            let open_upload_id = requests
                .iter()
                .find(|(id, _, status)| *id == resource_id && *status != RequestStatus::Completed)
                .and_then(|(_, upload_id, _)| upload_id.clone());
            RemovedResource {
                resource_id,
                upload_url,
                open_upload_id,
            }
        })
        .collect()
}

/// Map constraint failures reported by SQLite onto typed store errors.
fn classify(err: sqlx::Error, entity: &'static str, id: &str, parent: &'static str) -> StoreError {
    if is_unique_violation(&err) {
        let detail = match &err {
            sqlx::Error::Database(db_err) => db_err.message().to_string(),
            _ => String::new(),
        };
        StoreError::ConstraintViolation {
            entity,
            id: id.to_string(),
            detail,
        }
    } else if is_foreign_key_violation(&err) {
        StoreError::ForeignKeyViolation {
            entity,
            id: id.to_string(),
            parent,
        }
    } else {
        StoreError::Sqlx(err)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.message().to_ascii_lowercase().contains("foreign key")
    )
}
