//! Typed repository over the four state tables
//!
//! [`SyncStore`] exposes single-statement CRUD for the canonical tables
//! (`files`, `directories`) and the pending queues (`file_queue`,
//! `directory_queue`), plus the composite operations that must be atomic:
//! file/directory insertion with a queue entry, tombstoned deletes,
//! recursive folder deletion, and prefix-rewriting directory moves.
//!
//! ## Conventions
//!
//! - Upserts are `INSERT OR REPLACE`. For files this doubles as the
//!   rename primitive: the `origin` uniqueness makes the replaced row
//!   disappear when the same identity reappears under a new path.
//! - Directory upserts preserve the existing `uuid` when a row with the
//!   same `(device, folder, path)` triple already exists.
//! - Composite operations run in one SQLite transaction; on failure
//!   nothing is visible. Creation orders parents before children,
//!   deletion orders children before parents.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, SqliteConnection, SqlitePool};

use tidesync_core::domain::{
    DirQueueEntry, DirectoryMetadata, FileMetadata, FileQueueEntry, SyncStatus,
};
use tidesync_core::paths;

use crate::StoreError;

/// Embedded schema, applied on every open (tables are IF NOT EXISTS)
const SCHEMA_SQL: &str = include_str!("migrations/0001_schema.sql");

/// How long a statement waits for the writer lock before failing
///
/// The composite transactions hold the lock for a handful of statements
/// at most; anything longer than this is a wedged writer, and failing
/// lets the caller's retry-on-next-event policy take over.
const WRITER_WAIT: Duration = Duration::from_secs(5);

/// SQLite-backed store for canonical state and pending queues
///
/// Cheap to clone; all clones share the same connection pool. The sync
/// root is kept so directory moves can rewrite absolute paths.
#[derive(Clone)]
pub struct SyncStore {
    pool: SqlitePool,
    sync_root: String,
}

// ============================================================================
// Row mapping
// ============================================================================

fn status_from_row(row: &SqliteRow) -> Result<SyncStatus, StoreError> {
    let raw: String = row.get("sync_status");
    raw.parse()
        .map_err(|e: tidesync_core::domain::UnknownStatus| StoreError::Serialization(e.to_string()))
}

fn file_from_row(row: &SqliteRow) -> FileMetadata {
    FileMetadata {
        uuid: row.get("uuid"),
        path: row.get("path"),
        filename: row.get("filename"),
        last_modified: row.get("last_modified"),
        hashvalue: row.get("hashvalue"),
        size: row.get("size"),
        dir_id: row.get("dir_id"),
        inode: row.get("inode"),
        abs_path: row.get("abs_path"),
        versions: row.get("versions"),
        origin: row.get("origin"),
        last_synced_hashvalue: row.get("last_synced_hashvalue"),
        conflict_id: row.get("conflict_id"),
    }
}

fn directory_from_row(row: &SqliteRow) -> DirectoryMetadata {
    DirectoryMetadata {
        uuid: row.get("uuid"),
        device: row.get("device"),
        folder: row.get("folder"),
        path: row.get("path"),
        created_at: row.get("created_at"),
        abs_path: row.get("abs_path"),
        inode: row.get("inode"),
    }
}

fn file_queue_from_row(row: &SqliteRow) -> Result<FileQueueEntry, StoreError> {
    Ok(FileQueueEntry {
        file: file_from_row(row),
        status: status_from_row(row)?,
        old_path: row.get("old_path"),
        old_filename: row.get("old_filename"),
    })
}

fn dir_queue_from_row(row: &SqliteRow) -> Result<DirQueueEntry, StoreError> {
    Ok(DirQueueEntry {
        dir: directory_from_row(row),
        status: status_from_row(row)?,
        old_path: row.get("old_path"),
    })
}

// ============================================================================
// Statement helpers, usable inside and outside transactions
// ============================================================================

async fn upsert_file_on(conn: &mut SqliteConnection, file: &FileMetadata) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT OR REPLACE INTO files \
         (uuid, path, filename, last_modified, hashvalue, size, dir_id, \
          inode, abs_path, versions, origin, last_synced_hashvalue, conflict_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&file.uuid)
    .bind(&file.path)
    .bind(&file.filename)
    .bind(&file.last_modified)
    .bind(&file.hashvalue)
    .bind(file.size)
    .bind(&file.dir_id)
    .bind(&file.inode)
    .bind(&file.abs_path)
    .bind(file.versions)
    .bind(&file.origin)
    .bind(&file.last_synced_hashvalue)
    .bind(&file.conflict_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Upserts a directory, keeping the stored uuid when the triple exists
async fn upsert_directory_on(
    conn: &mut SqliteConnection,
    dir: &DirectoryMetadata,
) -> Result<String, StoreError> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT uuid FROM directories WHERE device = ? AND folder = ? AND path = ?",
    )
    .bind(&dir.device)
    .bind(&dir.folder)
    .bind(&dir.path)
    .fetch_optional(&mut *conn)
    .await?;

    let uuid = existing.unwrap_or_else(|| dir.uuid.clone());

    sqlx::query(
        "INSERT OR REPLACE INTO directories \
         (uuid, device, folder, path, created_at, abs_path, inode) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&uuid)
    .bind(&dir.device)
    .bind(&dir.folder)
    .bind(&dir.path)
    .bind(&dir.created_at)
    .bind(&dir.abs_path)
    .bind(&dir.inode)
    .execute(conn)
    .await?;
    Ok(uuid)
}

async fn upsert_file_queue_on(
    conn: &mut SqliteConnection,
    entry: &FileQueueEntry,
) -> Result<(), StoreError> {
    let f = &entry.file;
    sqlx::query(
        "INSERT OR REPLACE INTO file_queue \
         (uuid, path, filename, last_modified, hashvalue, size, dir_id, \
          inode, abs_path, versions, origin, last_synced_hashvalue, conflict_id, \
          sync_status, old_path, old_filename) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&f.uuid)
    .bind(&f.path)
    .bind(&f.filename)
    .bind(&f.last_modified)
    .bind(&f.hashvalue)
    .bind(f.size)
    .bind(&f.dir_id)
    .bind(&f.inode)
    .bind(&f.abs_path)
    .bind(f.versions)
    .bind(&f.origin)
    .bind(&f.last_synced_hashvalue)
    .bind(&f.conflict_id)
    .bind(entry.status.as_str())
    .bind(&entry.old_path)
    .bind(&entry.old_filename)
    .execute(conn)
    .await?;
    Ok(())
}

/// Upserts a directory queue entry, keeping the stored uuid for the triple
async fn upsert_dir_queue_on(
    conn: &mut SqliteConnection,
    entry: &DirQueueEntry,
) -> Result<String, StoreError> {
    let d = &entry.dir;
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT uuid FROM directory_queue WHERE device = ? AND folder = ? AND path = ?",
    )
    .bind(&d.device)
    .bind(&d.folder)
    .bind(&d.path)
    .fetch_optional(&mut *conn)
    .await?;

    let uuid = existing.unwrap_or_else(|| d.uuid.clone());

    sqlx::query(
        "INSERT OR REPLACE INTO directory_queue \
         (uuid, device, folder, path, created_at, abs_path, inode, \
          sync_status, old_path) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&uuid)
    .bind(&d.device)
    .bind(&d.folder)
    .bind(&d.path)
    .bind(&d.created_at)
    .bind(&d.abs_path)
    .bind(&d.inode)
    .bind(entry.status.as_str())
    .bind(&entry.old_path)
    .execute(conn)
    .await?;
    Ok(uuid)
}

/// `path = P OR path LIKE P || '/%'` parameter for subtree matches
fn subtree_like(path: &str) -> String {
    format!("{path}/%")
}

impl SyncStore {
    // ========================================================================
    // Connection management
    // ========================================================================

    /// Opens (creating if needed) the database file at `db_path`
    ///
    /// `sync_root` is the local directory all absolute paths live under;
    /// directory moves use it to rewrite `abs_path` columns.
    ///
    /// Connection policy: WAL so the reconciler's full-table reads never
    /// block the worker's write transactions, foreign keys on so the
    /// canonical `dir_id` reference is enforced by SQLite itself, and a
    /// small pool since all writes serialize on the single writer lock
    /// anyway.
    pub async fn open(db_path: &Path, sync_root: impl Into<String>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(WRITER_WAIT)
            .foreign_keys(true);

        let store = Self::connect(options, 4, sync_root).await?;
        tracing::info!(path = %db_path.display(), "state database opened");
        Ok(store)
    }

    /// Opens an in-memory database for testing
    ///
    /// A single connection that never expires: an in-memory SQLite
    /// database lives and dies with its connection, so pooling or
    /// recycling would silently discard the data.
    pub async fn in_memory(sync_root: impl Into<String>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        Self::connect(options, 1, sync_root).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        max_connections: u32,
        sync_root: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

        Ok(Self {
            pool,
            sync_root: sync_root.into(),
        })
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Returns every canonical file row
    pub async fn all_files(&self) -> Result<Vec<FileMetadata>, StoreError> {
        let rows = sqlx::query("SELECT * FROM files")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(file_from_row).collect())
    }

    /// Looks up a file by its `(path, filename)` primary key
    pub async fn file_by_path(
        &self,
        path: &str,
        filename: &str,
    ) -> Result<Option<FileMetadata>, StoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE path = ? AND filename = ?")
            .bind(path)
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(file_from_row))
    }

    /// Looks up a file by its durable server identity
    pub async fn file_by_origin(&self, origin: &str) -> Result<Option<FileMetadata>, StoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE origin = ?")
            .bind(origin)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(file_from_row))
    }

    /// Returns files whose directory is `path` or lies beneath it
    pub async fn files_under(&self, path: &str) -> Result<Vec<FileMetadata>, StoreError> {
        let rows = sqlx::query("SELECT * FROM files WHERE path = ?1 OR path LIKE ?2")
            .bind(path)
            .bind(subtree_like(path))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(file_from_row).collect())
    }

    pub async fn upsert_file(&self, file: &FileMetadata) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_file_on(&mut conn, file).await
    }

    /// Updates an existing file row in place, keyed by `(path, filename)`
    pub async fn update_file(&self, file: &FileMetadata) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE files SET uuid = ?, last_modified = ?, hashvalue = ?, size = ?, \
             dir_id = ?, inode = ?, abs_path = ?, versions = ?, origin = ?, \
             last_synced_hashvalue = ?, conflict_id = ? \
             WHERE path = ? AND filename = ?",
        )
        .bind(&file.uuid)
        .bind(&file.last_modified)
        .bind(&file.hashvalue)
        .bind(file.size)
        .bind(&file.dir_id)
        .bind(&file.inode)
        .bind(&file.abs_path)
        .bind(file.versions)
        .bind(&file.origin)
        .bind(&file.last_synced_hashvalue)
        .bind(&file.conflict_id)
        .bind(&file.path)
        .bind(&file.filename)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_file(&self, path: &str, filename: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM files WHERE path = ? AND filename = ?")
            .bind(path)
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_file_by_origin(&self, origin: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM files WHERE origin = ?")
            .bind(origin)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Directory operations
    // ========================================================================

    /// Returns every canonical directory row
    pub async fn all_directories(&self) -> Result<Vec<DirectoryMetadata>, StoreError> {
        let rows = sqlx::query("SELECT * FROM directories")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(directory_from_row).collect())
    }

    /// Looks up a directory by its `(device, folder, path)` primary key
    pub async fn directory_by_triple(
        &self,
        device: &str,
        folder: &str,
        path: &str,
    ) -> Result<Option<DirectoryMetadata>, StoreError> {
        let row =
            sqlx::query("SELECT * FROM directories WHERE device = ? AND folder = ? AND path = ?")
                .bind(device)
                .bind(folder)
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.as_ref().map(directory_from_row))
    }

    /// Upserts a directory; returns the uuid actually stored (the existing
    /// one when the triple was already present)
    pub async fn upsert_directory(&self, dir: &DirectoryMetadata) -> Result<String, StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_directory_on(&mut conn, dir).await
    }

    pub async fn remove_directory(&self, uuid: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM directories WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Queue operations
    // ========================================================================

    /// Returns the full pending-file queue
    pub async fn file_queue(&self) -> Result<Vec<FileQueueEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM file_queue")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(file_queue_from_row).collect()
    }

    pub async fn upsert_file_queue(&self, entry: &FileQueueEntry) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_file_queue_on(&mut conn, entry).await
    }

    /// Updates an existing queue row in place, keyed by `(path, filename)`
    pub async fn update_file_queue(&self, entry: &FileQueueEntry) -> Result<(), StoreError> {
        let f = &entry.file;
        sqlx::query(
            "UPDATE file_queue SET uuid = ?, last_modified = ?, hashvalue = ?, size = ?, \
             dir_id = ?, inode = ?, abs_path = ?, versions = ?, origin = ?, \
             last_synced_hashvalue = ?, conflict_id = ?, sync_status = ?, \
             old_path = ?, old_filename = ? \
             WHERE path = ? AND filename = ?",
        )
        .bind(&f.uuid)
        .bind(&f.last_modified)
        .bind(&f.hashvalue)
        .bind(f.size)
        .bind(&f.dir_id)
        .bind(&f.inode)
        .bind(&f.abs_path)
        .bind(f.versions)
        .bind(&f.origin)
        .bind(&f.last_synced_hashvalue)
        .bind(&f.conflict_id)
        .bind(entry.status.as_str())
        .bind(&entry.old_path)
        .bind(&entry.old_filename)
        .bind(&f.path)
        .bind(&f.filename)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes a pending file entry by origin
    ///
    /// Origin is the right key here: after a rename the stale entry still
    /// sits at the old `(path, filename)`.
    pub async fn remove_file_queue_by_origin(&self, origin: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM file_queue WHERE origin = ?")
            .bind(origin)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns the full pending-directory queue
    pub async fn directory_queue(&self) -> Result<Vec<DirQueueEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM directory_queue")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(dir_queue_from_row).collect()
    }

    /// Upserts a directory queue entry; returns the uuid actually stored
    pub async fn upsert_directory_queue(&self, entry: &DirQueueEntry) -> Result<String, StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_dir_queue_on(&mut conn, entry).await
    }

    pub async fn remove_directory_queue(&self, uuid: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM directory_queue WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Composite transactions
    // ========================================================================

    /// Upserts a file and its queue entry atomically
    pub async fn insert_file_with_queue(
        &self,
        file: &FileMetadata,
        entry: &FileQueueEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_file_on(&mut tx, file).await?;
        upsert_file_queue_on(&mut tx, entry).await?;
        tx.commit().await?;
        tracing::trace!(path = %file.path, filename = %file.filename, status = %entry.status,
            "file and queue entry stored");
        Ok(())
    }

    /// Upserts a directory and its queue entry atomically
    ///
    /// Returns the canonical uuid stored for the directory.
    pub async fn insert_directory_with_queue(
        &self,
        dir: &DirectoryMetadata,
        entry: &DirQueueEntry,
    ) -> Result<String, StoreError> {
        let mut tx = self.pool.begin().await?;
        let uuid = upsert_directory_on(&mut tx, dir).await?;
        upsert_dir_queue_on(&mut tx, entry).await?;
        tx.commit().await?;
        tracing::trace!(path = %dir.path, status = %entry.status, "directory and queue entry stored");
        Ok(uuid)
    }

    /// Removes a canonical file and leaves a delete tombstone in the queue
    pub async fn delete_file_with_tombstone(
        &self,
        path: &str,
        filename: &str,
        entry: &FileQueueEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM files WHERE path = ? AND filename = ?")
            .bind(path)
            .bind(filename)
            .execute(&mut *tx)
            .await?;
        upsert_file_queue_on(&mut tx, entry).await?;
        tx.commit().await?;
        tracing::trace!(path, filename, "file removed with delete tombstone");
        Ok(())
    }

    /// Recursively removes a folder subtree and records a delete tombstone
    ///
    /// Deletes every canonical file and directory at or under `path`
    /// (children first). When the directory queue already holds entries
    /// under `path`, the matching pending rows are purged too so the
    /// tombstone is the only surviving record of the subtree.
    pub async fn delete_folder(&self, path: &str, entry: &DirQueueEntry) -> Result<(), StoreError> {
        let like = subtree_like(path);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM files WHERE path = ?1 OR path LIKE ?2")
            .bind(path)
            .bind(&like)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM directories WHERE path = ?1 OR path LIKE ?2")
            .bind(path)
            .bind(&like)
            .execute(&mut *tx)
            .await?;

        let queued: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM directory_queue WHERE path = ?1 OR path LIKE ?2")
                .bind(path)
                .bind(&like)
                .fetch_one(&mut *tx)
                .await?;
        if queued > 0 {
            sqlx::query("DELETE FROM file_queue WHERE path = ?1 OR path LIKE ?2")
                .bind(path)
                .bind(&like)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM directory_queue WHERE path = ?1 OR path LIKE ?2")
                .bind(path)
                .bind(&like)
                .execute(&mut *tx)
                .await?;
        }

        upsert_dir_queue_on(&mut tx, entry).await?;
        tx.commit().await?;
        tracing::debug!(path, "folder subtree removed with delete tombstone");
        Ok(())
    }

    /// Moves a directory subtree from `old_path` to `new_path`
    ///
    /// Every canonical directory whose path is `old_path` or lies under it
    /// has its `old_path` prefix substituted with `new_path`; `device` and
    /// `folder` are recomputed from the rewritten path and `abs_path` from
    /// the sync root. Files are carried along through their `dir_id`.
    /// Stale pending entries under `old_path` are purged and the supplied
    /// rename tombstone is recorded, all in one transaction.
    pub async fn move_directory(
        &self,
        new_path: &str,
        old_path: &str,
        entry: &DirQueueEntry,
    ) -> Result<(), StoreError> {
        let like = subtree_like(old_path);
        let mut tx = self.pool.begin().await?;

        let dir_rows = sqlx::query("SELECT * FROM directories WHERE path = ?1 OR path LIKE ?2")
            .bind(old_path)
            .bind(&like)
            .fetch_all(&mut *tx)
            .await?;

        for row in &dir_rows {
            let dir = directory_from_row(row);
            let suffix = &dir.path[old_path.len()..];
            let rewritten = format!("{new_path}{suffix}");
            let fd = paths::folder_device(&rewritten);
            let abs = paths::join_abs(&self.sync_root, &rewritten);

            sqlx::query(
                "UPDATE directories SET path = ?, device = ?, folder = ?, abs_path = ? \
                 WHERE uuid = ?",
            )
            .bind(&rewritten)
            .bind(&fd.device)
            .bind(&fd.folder)
            .bind(&abs)
            .bind(&dir.uuid)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE files SET path = ?1, abs_path = ?2 || '/' || filename \
                 WHERE dir_id = ?3",
            )
            .bind(&rewritten)
            .bind(&abs)
            .bind(&dir.uuid)
            .execute(&mut *tx)
            .await?;
        }

        let queued: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM directory_queue WHERE path = ?1 OR path LIKE ?2")
                .bind(old_path)
                .bind(&like)
                .fetch_one(&mut *tx)
                .await?;
        if queued > 0 {
            sqlx::query("DELETE FROM file_queue WHERE path = ?1 OR path LIKE ?2")
                .bind(old_path)
                .bind(&like)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM directory_queue WHERE path = ?1 OR path LIKE ?2")
                .bind(old_path)
                .bind(&like)
                .execute(&mut *tx)
                .await?;
        }

        upsert_dir_queue_on(&mut tx, entry).await?;
        tx.commit().await?;
        tracing::debug!(old_path, new_path, moved = dir_rows.len(), "directory subtree moved");
        Ok(())
    }

    /// Applies the same prefix rewrite as [`move_directory`] to the queue
    /// tables, without purging anything and without a tombstone
    pub async fn move_directory_queue(
        &self,
        new_path: &str,
        old_path: &str,
    ) -> Result<(), StoreError> {
        let like = subtree_like(old_path);
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT * FROM directory_queue WHERE path = ?1 OR path LIKE ?2")
            .bind(old_path)
            .bind(&like)
            .fetch_all(&mut *tx)
            .await?;

        for row in &rows {
            let dir = directory_from_row(row);
            let suffix = &dir.path[old_path.len()..];
            let rewritten = format!("{new_path}{suffix}");
            let fd = paths::folder_device(&rewritten);
            let abs = paths::join_abs(&self.sync_root, &rewritten);

            sqlx::query(
                "UPDATE directory_queue SET path = ?, device = ?, folder = ?, abs_path = ? \
                 WHERE uuid = ?",
            )
            .bind(&rewritten)
            .bind(&fd.device)
            .bind(&fd.folder)
            .bind(&abs)
            .bind(&dir.uuid)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE file_queue SET path = ?1, abs_path = ?2 || '/' || filename \
                 WHERE dir_id = ?3",
            )
            .bind(&rewritten)
            .bind(&abs)
            .bind(&dir.uuid)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(old_path, new_path, moved = rows.len(), "queued subtree paths rewritten");
        Ok(())
    }
}
