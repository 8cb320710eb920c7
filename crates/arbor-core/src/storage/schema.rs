//! SQLite schema for the local store
//!
//! Every synced table carries `sync_status` and `base_updated_at` (the last
//! server-confirmed `updated_at`, used as the optimistic-concurrency
//! baseline on push). Timestamps are epoch milliseconds.

use rusqlite::{Connection, Result};

/// Layout version stored in SQLite's `user_version` pragma
pub const SCHEMA_VERSION: i32 = 1;

const TABLES: &str = r#"
        CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            is_favorite INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            base_updated_at INTEGER,
            sync_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (sync_status IN ('synced', 'pending', 'conflict'))
        );

        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            parent_id TEXT,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            is_favorite INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            base_updated_at INTEGER,
            sync_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (sync_status IN ('synced', 'pending', 'conflict')),
            CHECK (parent_id IS NULL OR parent_id <> id),
            FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
            FOREIGN KEY (parent_id) REFERENCES notes(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS blocks (
            id TEXT PRIMARY KEY,
            note_id TEXT NOT NULL,
            type TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            metadata TEXT NOT NULL DEFAULT 'null',
            order_index INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            base_updated_at INTEGER,
            sync_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (sync_status IN ('synced', 'pending', 'conflict')),
            FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE
        );

        -- Outbox of local mutations; rows are never deleted
        CREATE TABLE IF NOT EXISTS change_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            action TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'success', 'error')),
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            synced_at INTEGER,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_notes_workspace ON notes(workspace_id);
        CREATE INDEX IF NOT EXISTS idx_notes_parent ON notes(parent_id);
        CREATE INDEX IF NOT EXISTS idx_blocks_note_order ON blocks(note_id, order_index);
        CREATE INDEX IF NOT EXISTS idx_change_log_status ON change_log(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_change_log_entity ON change_log(entity_id);
"#;

/// Create every table and index, then stamp the layout version
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(TABLES)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
}

/// Layout version recorded in the file; 0 for a fresh database
pub fn stored_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// True when the file predates the current layout (or is empty)
pub fn needs_init(conn: &Connection) -> bool {
    stored_version(conn).map_or(true, |v| v < SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_creates_synced_tables_and_outbox() {
        let conn = fresh();
        let mut stmt = conn
            .prepare("SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .unwrap();
        for name in ["workspaces", "notes", "blocks", "change_log"] {
            let count: i64 = stmt.query_row([name], |row| row.get(0)).unwrap();
            assert_eq!(count, 1, "{} was not created", name);
        }
    }

    #[test]
    fn test_version_stamp() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_version(&conn).unwrap(), 0);
        assert!(needs_init(&conn));

        init_schema(&conn).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(!needs_init(&conn));

        // Running it again on an initialized file is harmless
        init_schema(&conn).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_note_cannot_parent_itself() {
        let conn = fresh();
        conn.execute(
            "INSERT INTO workspaces (id, user_id, name, created_at, updated_at) VALUES ('w', 'u', 'W', 0, 0)",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO notes (id, workspace_id, parent_id, title, created_at, updated_at)
             VALUES ('n', 'w', 'n', 'Self', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_sync_status_rejected() {
        let conn = fresh();
        let result = conn.execute(
            "INSERT INTO workspaces (id, user_id, name, created_at, updated_at, sync_status)
             VALUES ('w', 'u', 'W', 0, 0, 'lost')",
            [],
        );
        assert!(result.is_err());
    }
}
