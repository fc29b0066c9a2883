use crate::cipher::{ContentKey, PartNonce};
use crate::error::{Result, VaultError};
use crate::node::{Node, NodeAddress};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Pending => "pending",
            FileState::InProgress => "in_progress",
            FileState::Complete => "complete",
            FileState::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(FileState::Pending),
            "in_progress" => Ok(FileState::InProgress),
            "complete" => Ok(FileState::Complete),
            "failed" => Ok(FileState::Failed),
            other => Err(VaultError::Internal(format!(
                "unexpected file state in files: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub state: FileState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PartRecord {
    pub id: String,
    pub file_id: String,
    pub node_id: String,
    pub nonce: PartNonce,
    pub seq: u32,
    pub size_bytes: u64,
}

/// Panel-side relational state: nodes, files and parts.
pub struct MetadataStore {
    db_path: PathBuf,
}

impl MetadataStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                ca_cert TEXT NOT NULL,
                content_key BLOB NOT NULL,
                auth_token TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL CHECK(state IN ('pending', 'in_progress', 'complete', 'failed')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(path, name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS parts (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL REFERENCES files(id),
                node_id TEXT NOT NULL,
                nonce BLOB NOT NULL,
                seq INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                UNIQUE(file_id, seq)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_parts_node ON parts(node_id)",
            [],
        )?;

        Ok(())
    }

    pub fn insert_node(&self, node: &Node) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO nodes (id, host, port, ca_cert, content_key, auth_token, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                node.id,
                node.address.host,
                node.address.port as i64,
                node.ca_cert,
                node.content_key.as_bytes(),
                node.auth_token,
                node.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT id, host, port, ca_cert, content_key, auth_token, created_at
                 FROM nodes WHERE id = ?1",
                params![node_id],
                NodeRow::from_row,
            )
            .optional()?;

        row.map(NodeRow::decode).transpose()
    }

    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, host, port, ca_cert, content_key, auth_token, created_at
             FROM nodes ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], NodeRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(NodeRow::decode).collect()
    }

    pub fn update_node_address(
        &self,
        node_id: &str,
        address: &NodeAddress,
        ca_cert: &str,
    ) -> Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE nodes SET host = ?1, port = ?2, ca_cert = ?3 WHERE id = ?4",
            params![address.host, address.port as i64, ca_cert, node_id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_node(&self, node_id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute("DELETE FROM nodes WHERE id = ?1", params![node_id])?;
        Ok(changed > 0)
    }

    pub fn count_parts_on_node(&self, node_id: &str) -> Result<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM parts WHERE node_id = ?1",
            params![node_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Inserts the placeholder row that locks `(path, name)` for an upload.
    pub fn insert_file(&self, file: &FileRecord) -> Result<()> {
        let conn = self.get_conn()?;
        let result = conn.execute(
            "INSERT INTO files (id, name, path, size_bytes, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                file.id,
                file.name,
                file.path,
                file.size_bytes as i64,
                file.state.as_str(),
                file.created_at.to_rfc3339(),
                file.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(error, _))
                if error.code == ErrorCode::ConstraintViolation =>
            {
                Err(VaultError::FileExists(format!("{}{}", file.path, file.name)))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn get_file(&self, path: &str, name: &str) -> Result<Option<FileRecord>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, path, size_bytes, state, created_at, updated_at
                 FROM files WHERE path = ?1 AND name = ?2",
                params![path, name],
                FileRow::from_row,
            )
            .optional()?;

        row.map(FileRow::decode).transpose()
    }

    pub fn set_file_state(&self, file_id: &str, state: FileState) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE files SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state.as_str(), Utc::now().to_rfc3339(), file_id],
        )?;
        Ok(())
    }

    /// Removes a file row, but only once it has no parts left.
    pub fn delete_file(&self, file_id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "DELETE FROM files
             WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM parts WHERE file_id = ?1)",
            params![file_id],
        )?;
        Ok(changed > 0)
    }

    pub fn list_files(&self, path: &str) -> Result<Vec<FileRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, path, size_bytes, state, created_at, updated_at
             FROM files WHERE path = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map(params![path], FileRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(FileRow::decode).collect()
    }

    /// Names of the directories directly below `path`.
    pub fn list_subdirectories(&self, path: &str) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT path FROM files
             WHERE path <> ?1 AND substr(path, 1, length(?1)) = ?1
             ORDER BY path",
        )?;
        let paths = stmt
            .query_map(params![path], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut children: Vec<String> = paths
            .iter()
            .filter_map(|child| child.strip_prefix(path))
            .filter_map(|rest| rest.split('/').next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        children.sort();
        children.dedup();
        Ok(children)
    }

    pub fn insert_part(&self, part: &PartRecord) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO parts (id, file_id, node_id, nonce, seq, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                part.id,
                part.file_id,
                part.node_id,
                part.nonce.as_bytes(),
                part.seq as i64,
                part.size_bytes as i64,
            ],
        )?;
        Ok(())
    }

    pub fn list_parts(&self, file_id: &str) -> Result<Vec<PartRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, file_id, node_id, nonce, seq, size_bytes
             FROM parts WHERE file_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![file_id], |row| {
                Ok(PartRow {
                    id: row.get(0)?,
                    file_id: row.get(1)?,
                    node_id: row.get(2)?,
                    nonce: row.get(3)?,
                    seq: row.get(4)?,
                    size_bytes: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                Ok(PartRecord {
                    id: row.id,
                    file_id: row.file_id,
                    node_id: row.node_id,
                    nonce: PartNonce::from_slice(&row.nonce)?,
                    seq: row.seq as u32,
                    size_bytes: row.size_bytes as u64,
                })
            })
            .collect()
    }

    pub fn delete_part(&self, part_id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute("DELETE FROM parts WHERE id = ?1", params![part_id])?;
        Ok(changed > 0)
    }
}

struct NodeRow {
    id: String,
    host: String,
    port: i64,
    ca_cert: String,
    content_key: Vec<u8>,
    auth_token: String,
    created_at: String,
}

impl NodeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            host: row.get(1)?,
            port: row.get(2)?,
            ca_cert: row.get(3)?,
            content_key: row.get(4)?,
            auth_token: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<Node> {
        let port = u16::try_from(self.port).map_err(|_| {
            VaultError::Internal(format!("invalid port in nodes: {}", self.port))
        })?;

        Ok(Node {
            id: self.id,
            address: NodeAddress::new(self.host, port),
            ca_cert: self.ca_cert,
            content_key: ContentKey::from_slice(&self.content_key)?,
            auth_token: self.auth_token,
            created_at: parse_rfc3339(&self.created_at)?,
        })
    }
}

struct FileRow {
    id: String,
    name: String,
    path: String,
    size_bytes: i64,
    state: String,
    created_at: String,
    updated_at: String,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            path: row.get(2)?,
            size_bytes: row.get(3)?,
            state: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<FileRecord> {
        Ok(FileRecord {
            id: self.id,
            name: self.name,
            path: self.path,
            size_bytes: self.size_bytes as u64,
            state: FileState::parse(&self.state)?,
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

struct PartRow {
    id: String,
    file_id: String,
    node_id: String,
    nonce: Vec<u8>,
    seq: i64,
    size_bytes: i64,
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|error| VaultError::Internal(format!("invalid RFC3339 timestamp: {}", error)))?;
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MetadataStore::new(dir.path().join("panel.sqlite3")).expect("store");
        (dir, store)
    }

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            address: NodeAddress::new("127.0.0.1", 3001),
            ca_cert: "-----BEGIN CERTIFICATE-----".to_string(),
            content_key: ContentKey::generate(),
            auth_token: "token".to_string(),
            created_at: Utc::now(),
        }
    }

    fn file(id: &str, path: &str, name: &str) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: id.to_string(),
            name: name.to_string(),
            path: path.to_string(),
            size_bytes: 10,
            state: FileState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn part(id: &str, file_id: &str, seq: u32) -> PartRecord {
        PartRecord {
            id: id.to_string(),
            file_id: file_id.to_string(),
            node_id: "n1".to_string(),
            nonce: PartNonce::generate(),
            seq,
            size_bytes: 5,
        }
    }

    #[test]
    fn node_roundtrip_keeps_key_and_token() {
        let (_dir, store) = store();
        let original = node("n1");
        store.insert_node(&original).expect("insert");

        let loaded = store.get_node("n1").expect("get").expect("node");
        assert_eq!(loaded.content_key, original.content_key);
        assert_eq!(loaded.auth_token, "token");
        assert_eq!(loaded.address, original.address);

        let moved = NodeAddress::new("10.0.0.9", 4000);
        assert!(store.update_node_address("n1", &moved, "ca2").expect("update"));
        let loaded = store.get_node("n1").expect("get").expect("node");
        assert_eq!(loaded.address, moved);
        assert_eq!(loaded.ca_cert, "ca2");

        assert!(store.delete_node("n1").expect("delete"));
        assert!(store.get_node("n1").expect("get").is_none());
    }

    #[test]
    fn file_path_and_name_are_unique() {
        let (_dir, store) = store();
        store.insert_file(&file("f1", "/docs/", "a.txt")).expect("insert");
        let second = store.insert_file(&file("f2", "/docs/", "a.txt"));
        assert!(matches!(second, Err(VaultError::FileExists(_))));
        store.insert_file(&file("f3", "/other/", "a.txt")).expect("insert");
    }

    #[test]
    fn file_row_survives_while_parts_remain() {
        let (_dir, store) = store();
        store.insert_file(&file("f1", "/", "a.bin")).expect("insert");
        store.insert_part(&part("p0", "f1", 0)).expect("part");

        assert!(!store.delete_file("f1").expect("delete"));
        assert!(store.delete_part("p0").expect("delete part"));
        assert!(store.delete_file("f1").expect("delete"));
    }

    #[test]
    fn parts_are_listed_by_sequence() {
        let (_dir, store) = store();
        store.insert_file(&file("f1", "/", "a.bin")).expect("insert");
        for (id, seq) in [("p2", 2), ("p0", 0), ("p1", 1)] {
            store.insert_part(&part(id, "f1", seq)).expect("part");
        }

        let seqs: Vec<u32> = store
            .list_parts("f1")
            .expect("list")
            .into_iter()
            .map(|part| part.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn subdirectories_are_immediate_children() {
        let (_dir, store) = store();
        store.insert_file(&file("f1", "/", "root.txt")).expect("insert");
        store.insert_file(&file("f2", "/docs/", "a.txt")).expect("insert");
        store.insert_file(&file("f3", "/docs/2024/", "b.txt")).expect("insert");
        store.insert_file(&file("f4", "/music/", "c.mp3")).expect("insert");

        assert_eq!(
            store.list_subdirectories("/").expect("list"),
            vec!["docs".to_string(), "music".to_string()]
        );
        assert_eq!(
            store.list_subdirectories("/docs/").expect("list"),
            vec!["2024".to_string()]
        );
        assert_eq!(store.list_files("/docs/").expect("files").len(), 1);
    }

    #[test]
    fn file_state_updates_are_persisted() {
        let (_dir, store) = store();
        store.insert_file(&file("f1", "/", "a.bin")).expect("insert");
        store
            .set_file_state("f1", FileState::Complete)
            .expect("state");
        let loaded = store.get_file("/", "a.bin").expect("get").expect("file");
        assert_eq!(loaded.state, FileState::Complete);
    }
}
