//! Storage for the cloud server: identities, sessions and documents

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::cloud::{Document, Fields};

/// Identity resolved from a bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: String,
    pub email: String,
}

/// Thread-safe database wrapper
pub struct ServerDb {
    conn: Mutex<Connection>,
}

impl ServerDb {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database lock poisoned"))
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                uid TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (uid) REFERENCES users(uid) ON DELETE CASCADE
            );

            -- One row per document; parent is the collection path
            CREATE TABLE IF NOT EXISTS documents (
                path TEXT PRIMARY KEY,
                parent TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                fields TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_uid ON sessions(uid);
            CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent);
            "#,
        )?;

        Ok(())
    }

    /// Create an identity. Returns `None` when the email is taken.
    pub fn create_user(&self, email: &str, password_hash: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let uid = uuid::Uuid::new_v4().to_string();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (uid, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![&uid, email, password_hash, Utc::now().to_rfc3339()],
        )?;

        Ok((inserted > 0).then_some(uid))
    }

    /// Look up `(uid, password_hash)` by email
    pub fn find_user(&self, email: &str) -> Result<Option<(String, String)>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT uid, password_hash FROM users WHERE email = ?1",
            params![email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn password_hash(&self, uid: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT password_hash FROM users WHERE uid = ?1",
            params![uid],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Delete an identity and all of its sessions
    pub fn delete_user(&self, uid: &str) -> Result<bool> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sessions WHERE uid = ?1", params![uid])?;
        let removed = conn.execute("DELETE FROM users WHERE uid = ?1", params![uid])?;
        Ok(removed > 0)
    }

    pub fn create_session(&self, uid: &str, token: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (token, uid, created_at) VALUES (?1, ?2, ?3)",
            params![token, uid, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Resolve a bearer token to its user
    pub fn session_user(&self, token: &str) -> Result<Option<Caller>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT u.uid, u.email FROM sessions s JOIN users u ON u.uid = s.uid
             WHERE s.token = ?1",
            params![token],
            |row| {
                Ok(Caller {
                    uid: row.get(0)?,
                    email: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_document(&self, path: &str) -> Result<Option<Fields>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT fields FROM documents WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| serde_json::from_str(&json).context("Corrupt document fields"))
            .transpose()
    }

    /// Upsert a document, keeping stored fields absent from `fields`
    pub fn merge_document(&self, path: &str, fields: Fields) -> Result<()> {
        let (parent, doc_id) = path
            .rsplit_once('/')
            .with_context(|| format!("Not a document path: {path}"))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT fields FROM documents WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;

        let mut merged: Fields = match existing {
            Some(json) => serde_json::from_str(&json).context("Corrupt document fields")?,
            None => Fields::new(),
        };
        merged.extend(fields);

        tx.execute(
            "INSERT OR REPLACE INTO documents (path, parent, doc_id, fields, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                path,
                parent,
                doc_id,
                serde_json::to_string(&merged)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;

        Ok(())
    }

    pub fn delete_document(&self, path: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM documents WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    /// Documents directly under a collection
    pub fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT doc_id, fields FROM documents WHERE parent = ?1 ORDER BY doc_id",
        )?;

        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, json) = row?;
            let fields = serde_json::from_str(&json)
                .with_context(|| format!("Corrupt fields in {collection}/{id}"))?;
            documents.push(Document { id, fields });
        }
        Ok(documents)
    }

    /// Delete many documents in one transaction
    pub fn delete_documents(&self, paths: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut removed = 0;
        for path in paths {
            removed += tx.execute("DELETE FROM documents WHERE path = ?1", params![path])?;
        }
        tx.commit()?;

        Ok(removed)
    }
}
