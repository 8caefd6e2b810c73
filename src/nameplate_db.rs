use crate::heuristics::{AttrValue, AttributeMap};
use rusqlite::{Connection, Result as SqliteResult, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

pub struct NameplateStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNameplate {
    pub uid: String,
    pub file_name: String,
    pub raw_response: Option<String>,
    /// Attribute map as a JSON object, key order preserved.
    pub attributes_json: Option<String>,
    pub code: Option<String>,
    /// Set when the vision call failed for this image.
    pub error: Option<String>,
}

impl StoredNameplate {
    /// Decode the stored attribute JSON; a record without it, or with a
    /// damaged one, reads back as an empty map.
    pub fn attributes(&self) -> AttributeMap {
        self.attributes_json
            .as_deref()
            .and_then(|j| serde_json::from_str::<serde_json::Value>(j).ok())
            .and_then(|v| match v {
                serde_json::Value::Object(obj) => Some(obj),
                _ => None,
            })
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.as_str(), AttrValue::from_json(v)))
                    .collect::<AttributeMap>()
            })
            .unwrap_or_default()
    }
}

const COLUMNS: &str = "uid, file_name, raw_response, attributes_json, code, error";

impl NameplateStore {
    /// Open (or create) the store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS nameplates (
                uid TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                raw_response TEXT,
                attributes_json TEXT,
                code TEXT,
                error TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_nameplates_code ON nameplates(code)",
            [],
        )?;

        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    /// Content hash of the image bytes, so a renamed copy is still recognised.
    pub fn generate_uid(image: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image);
        format!("{:x}", hasher.finalize())
    }

    /// Insert or update a nameplate
    pub fn upsert(&self, plate: &StoredNameplate) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO nameplates (uid, file_name, raw_response, attributes_json, code, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(uid) DO UPDATE SET
                file_name = excluded.file_name,
                raw_response = excluded.raw_response,
                attributes_json = excluded.attributes_json,
                code = excluded.code,
                error = excluded.error,
                updated_at = CURRENT_TIMESTAMP",
            params![
                plate.uid,
                plate.file_name,
                plate.raw_response,
                plate.attributes_json,
                plate.code,
                plate.error,
            ],
        )?;
        info!(uid = %plate.uid, file = %plate.file_name, "Nameplate stored");
        Ok(())
    }

    fn row_to_nameplate(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredNameplate> {
        Ok(StoredNameplate {
            uid: row.get(0)?,
            file_name: row.get(1)?,
            raw_response: row.get(2)?,
            attributes_json: row.get(3)?,
            code: row.get(4)?,
            error: row.get(5)?,
        })
    }

    pub fn get_by_uid(&self, uid: &str) -> SqliteResult<Option<StoredNameplate>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM nameplates WHERE uid = ?1"))?;
        let mut rows = stmt.query(params![uid])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_nameplate(row)?)),
            None => Ok(None),
        }
    }

    /// All stored nameplates, oldest first.
    pub fn all(&self) -> SqliteResult<Vec<StoredNameplate>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM nameplates ORDER BY created_at, rowid"
        ))?;
        let plates = stmt.query_map([], Self::row_to_nameplate)?;
        plates.collect()
    }

    /// (total, coded, errored)
    pub fn get_counts(&self) -> SqliteResult<(usize, usize, usize)> {
        let total: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM nameplates", [], |row| row.get(0))?;

        let coded: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM nameplates WHERE code IS NOT NULL AND code != ''",
            [],
            |row| row.get(0),
        )?;

        let errored: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM nameplates WHERE error IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok((total, coded, errored))
    }
}
