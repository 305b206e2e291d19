//! Append-only log of received messages, kept in SQLite.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::Result;

/// Version the schema is migrated to on open.
pub const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Applied in order to databases whose `user_version` is below `version`.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create messages table",
        sql: "CREATE TABLE messages (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  name TEXT,
                  address TEXT,
                  message TEXT
              )",
    },
    Migration {
        version: 2,
        description: "add note column",
        sql: "ALTER TABLE messages ADD COLUMN note TEXT DEFAULT ''",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub payload: String,
}

pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Lets a second connection read while this one appends.
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        log::debug!(
            "Opened message store {} (journal mode {})",
            path.as_ref().display(),
            mode
        );

        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        migrate(&mut conn)?;
        Ok(Self { conn })
    }

    /// Stores a message and returns its id. Ids are strictly increasing.
    pub fn append(&self, name: &str, address: &str, payload: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO messages (name, address, message) VALUES (?1, ?2, ?3)",
            params![name, address, payload],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// All stored messages, most recent first.
    pub fn list_all(&self) -> Result<Vec<Message>> {
        let mut statement = self
            .conn
            .prepare("SELECT id, name, address, message FROM messages ORDER BY id DESC")?;

        let messages = statement
            .query_map([], |row| {
                Ok(Message {
                    id: row.get(0)?,
                    name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    address: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    payload: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(messages)
    }

    pub fn schema_version(&self) -> Result<u32> {
        user_version(&self.conn)
    }
}

fn user_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current = user_version(conn)?;

    if current > SCHEMA_VERSION {
        log::warn!(
            "Message store has schema version {}, newer than {}",
            current,
            SCHEMA_VERSION
        );
        return Ok(());
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        log::info!(
            "Migrating message store to version {}: {}",
            migration.version,
            migration.description
        );
        tx.execute_batch(migration.sql)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}
