//! Backing store surface and its SQLite implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::snapshot::{Record, CONTACTS_TABLE};
use crate::view::Row;
use crate::{Error, Result};

/// Salt the application appends to passwords before hashing
pub const PASSWORD_SALT: &str = "XDrBmrW9g2fb";

/// Minimal transactional row store consumed by the fixture orchestrator
pub trait FixtureStore: Send + Sync {
    fn begin(&self) -> Result<()>;

    /// Delete every row of `table`, returning the number removed
    fn delete_all(&self, table: &str) -> Result<usize>;

    /// Insert `records` in order, returning the number inserted
    fn insert_many(&self, table: &str, records: &[Record]) -> Result<usize>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Read every row of `table` in insertion order
    fn query_all(&self, table: &str) -> Result<Vec<Row>>;
}

/// Reject anything but plain SQL identifiers; table and column names come
/// from configuration and snapshot files.
fn identifier(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{}\"", name))
    } else {
        Err(Error::InvalidConfig(format!("invalid SQL identifier: {:?}", name)))
    }
}

/// Digest stored in the users table: hex SHA-256 of password + salt
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Summary of a provisioned database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReport {
    pub tables: Vec<String>,
    pub users: i64,
    pub admin: Option<String>,
    pub contacts: i64,
}

/// SQLite database holding the application's contacts and users
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database at `path` and ensure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;

        // Other worker processes share this file
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.as_ref().to_path_buf()),
        };
        store.init_schema()?;

        info!("Opened store at {:?}", path.as_ref());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create the application tables if they are missing
    pub fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT,
                title TEXT,
                created TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS users (
                id_user INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE,
                password TEXT
            );
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    /// Insert the admin account unless a user with that name exists.
    /// Returns whether a row was added.
    pub fn seed_admin(&self, username: &str, password: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let digest = hash_password(password, PASSWORD_SALT);
        let rows = conn.execute(
            "INSERT OR IGNORE INTO users (username, password) VALUES (?1, ?2)",
            params![username, digest],
        )?;
        Ok(rows > 0)
    }

    /// Check a username/password pair against the users table
    pub fn check_credentials(&self, username: &str, password: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let stored: Option<String> = conn
            .query_row(
                "SELECT password FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.as_deref() == Some(hash_password(password, PASSWORD_SALT).as_str()))
    }

    /// Provisioning sample: five contacts for a freshly created database
    pub fn seed_sample_contacts(&self) -> Result<usize> {
        let sample = [
            ("John Doe", "john.doe@example.com", "08123456789", "Software Engineer"),
            ("Jane Smith", "jane.smith@example.com", "08987654321", "Product Manager"),
            ("Bob Johnson", "bob.johnson@example.com", "08111111111", "QA Engineer"),
            ("Alice Brown", "alice.brown@example.com", "08222222222", "UI/UX Designer"),
            ("Charlie Wilson", "charlie.wilson@example.com", "08333333333", "DevOps Engineer"),
        ];
        let records: Vec<Record> = sample
            .into_iter()
            .map(|(name, email, phone, title)| {
                Record::new()
                    .with("name", name)
                    .with("email", email)
                    .with("phone", phone)
                    .with("title", title)
            })
            .collect();
        self.insert_many(CONTACTS_TABLE, &records)
    }

    /// Report tables and row counts
    pub fn verify(&self) -> Result<StoreReport> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let admin: Option<String> = conn
            .query_row("SELECT username FROM users ORDER BY id_user LIMIT 1", [], |row| row.get(0))
            .optional()?;
        let contacts: i64 = conn.query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;

        Ok(StoreReport {
            tables,
            users,
            admin,
            contacts,
        })
    }

    /// Remove the row with the given primary key from `table`
    pub fn delete_row(&self, table: &str, id: i64) -> Result<bool> {
        let table = identifier(table)?;
        let conn = self.conn.lock();
        let rows = conn.execute(&format!("DELETE FROM {} WHERE rowid = ?1", table), params![id])?;
        Ok(rows > 0)
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => hex::encode(b),
    }
}

impl FixtureStore for SqliteStore {
    fn begin(&self) -> Result<()> {
        self.conn.lock().execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn delete_all(&self, table: &str) -> Result<usize> {
        let quoted = identifier(table)?;
        let conn = self.conn.lock();
        let deleted = conn.execute(&format!("DELETE FROM {}", quoted), [])?;

        // Restart AUTOINCREMENT so seeded ids are the same after every reset
        let has_sequence: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
                [],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if has_sequence {
            conn.execute("DELETE FROM sqlite_sequence WHERE name = ?1", params![table])?;
        }

        debug!("Deleted {} row(s) from {}", deleted, table);
        Ok(deleted)
    }

    fn insert_many(&self, table: &str, records: &[Record]) -> Result<usize> {
        let quoted = identifier(table)?;
        let conn = self.conn.lock();

        for record in records {
            if record.is_empty() {
                conn.execute(&format!("INSERT INTO {} DEFAULT VALUES", quoted), [])?;
                continue;
            }

            let columns = record
                .columns()
                .map(identifier)
                .collect::<Result<Vec<_>>>()?;
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quoted,
                columns.join(", "),
                placeholders.join(", ")
            );
            conn.execute(&sql, params_from_iter(record.iter().map(|(_, value)| value)))?;
        }

        debug!("Inserted {} row(s) into {}", records.len(), table);
        Ok(records.len())
    }

    fn commit(&self) -> Result<()> {
        self.conn.lock().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn query_all(&self, table: &str) -> Result<Vec<Row>> {
        let quoted = identifier(table)?;
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY rowid", quoted))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut out = Row::new();
            for (i, column) in columns.iter().enumerate() {
                out.insert(column.clone(), render_value(row.get_ref(i)?));
            }
            results.push(out);
        }

        Ok(results)
    }
}
