//! Knowledge Store - rusqlite 기반 문서/청크 저장소
//!
//! 문서와 청크(임베딩 포함)를 내구 저장합니다.
//! 청크는 문서에 `ON DELETE CASCADE`로 묶여 문서 삭제 시 함께 삭제됩니다.
//! 저장 위치: ~/.culinary-rag/knowledge.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.culinary-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".culinary-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서 (저장 후 불변, 수정은 삭제 + 재추가)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// 새 문서 생성 (ID 자동 발급)
    pub fn new(title: impl Into<String>, content: impl Into<String>, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 문서 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    /// 문서 내 위치 (0-based)
    pub position: usize,
    /// 임베딩 (임베딩 경로를 쓰지 않으면 None)
    pub embedding: Option<Vec<f32>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// 새 청크 생성 (ID 자동 발급)
    pub fn new(
        document_id: impl Into<String>,
        content: impl Into<String>,
        position: usize,
        metadata: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            content: content.into(),
            position,
            embedding: None,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// ID 지정
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 임베딩 지정
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedded_chunk_count: usize,
    /// 문서 본문의 UTF-8 바이트 합계
    pub total_content_bytes: usize,
    pub db_path: Option<PathBuf>,
}

// ============================================================================
// DocumentStore Trait
// ============================================================================

/// 내구 저장소 인터페이스
///
/// 검색 서비스는 이 트레이트를 통해서만 저장소에 접근합니다.
pub trait DocumentStore: Send + Sync {
    /// 문서 삽입
    fn insert_document(&self, doc: &Document) -> Result<()>;

    /// 청크 삽입
    fn insert_chunks(&self, chunks: &[Chunk]) -> Result<usize>;

    /// 문서와 청크를 함께 저장
    ///
    /// 기본 구현은 순차 삽입입니다. 트랜잭션을 지원하는 저장소는 원자적으로 구현합니다.
    fn save_document(&self, doc: &Document, chunks: &[Chunk]) -> Result<()> {
        self.insert_document(doc)?;
        self.insert_chunks(chunks)?;
        Ok(())
    }

    /// 전체 청크 조회 (인덱스 재구성용, 저장 순서)
    fn list_chunks(&self) -> Result<Vec<Chunk>>;

    /// ID로 문서 조회
    fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// 문서 목록 (최신순)
    fn list_documents(&self, limit: usize) -> Result<Vec<Document>>;

    /// 문서 삭제 (청크 연쇄 삭제)
    fn delete_document(&self, id: &str) -> Result<bool>;

    /// 전체 삭제 (삭제된 문서 수 반환)
    fn delete_all(&self) -> Result<usize>;

    /// 저장소 통계
    fn stats(&self) -> Result<StoreStats>;
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// SQLite 지식 저장소
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 지정 데이터 디렉토리에서 열기 (`<dir>/knowledge.db`)
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open(&data_dir.join("knowledge.db"))
    }

    /// 기본 위치에서 열기 (~/.culinary-rag/knowledge.db)
    pub fn open_default() -> Result<Self> {
        Self::open_in(&get_data_dir())
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;

        // 연쇄 삭제를 위해 연결마다 활성화 필요
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                position INTEGER NOT NULL,
                embedding TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id);
            "#,
        )
        .context("Failed to create schema")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }
}

impl DocumentStore for KnowledgeStore {
    fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn()?;
        insert_document_row(&conn, doc)
    }

    fn insert_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        for chunk in chunks {
            insert_chunk_row(&tx, chunk)?;
        }
        tx.commit().context("Failed to commit chunks")?;
        Ok(chunks.len())
    }

    fn save_document(&self, doc: &Document, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        insert_document_row(&tx, doc)?;
        for chunk in chunks {
            insert_chunk_row(&tx, chunk)?;
        }

        tx.commit().context("Failed to commit document")?;
        tracing::debug!("Saved document {} with {} chunks", doc.id, chunks.len());
        Ok(())
    }

    fn list_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, document_id, content, position, embedding, metadata, created_at
             FROM chunks ORDER BY rowid",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ChunkRow {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    content: row.get(2)?,
                    position: row.get(3)?,
                    embedding: row.get(4)?,
                    metadata: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read chunks")?;

        rows.into_iter().map(ChunkRow::into_chunk).collect()
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, content, metadata, created_at, updated_at
             FROM documents WHERE id = ?1",
        )?;

        let mut rows = stmt.query_map(params![id], document_from_row)?;
        rows.next()
            .transpose()
            .context("Failed to read document")
    }

    fn list_documents(&self, limit: usize) -> Result<Vec<Document>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, content, metadata, created_at, updated_at
             FROM documents
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;

        let docs = stmt
            .query_map(params![limit as i64], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list documents")?;

        Ok(docs)
    }

    fn delete_document(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .context("Failed to delete document")?;
        Ok(rows > 0)
    }

    fn delete_all(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        tx.execute("DELETE FROM chunks", [])?;
        let rows = tx.execute("DELETE FROM documents", [])?;
        tx.commit().context("Failed to commit reset")?;

        tracing::info!("Deleted all documents ({} rows)", rows);
        Ok(rows)
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;

        let count_of = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            document_count: count_of("SELECT COUNT(*) FROM documents")?,
            chunk_count: count_of("SELECT COUNT(*) FROM chunks")?,
            embedded_chunk_count: count_of(
                "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL",
            )?,
            total_content_bytes: count_of(
                "SELECT COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) FROM documents",
            )?,
            db_path: Some(self.db_path.clone()),
        })
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

/// 파싱 전 청크 행
struct ChunkRow {
    id: String,
    document_id: String,
    content: String,
    position: i64,
    embedding: Option<String>,
    metadata: Option<String>,
    created_at: String,
}

impl ChunkRow {
    fn into_chunk(self) -> Result<Chunk> {
        let embedding = self
            .embedding
            .map(|raw| serde_json::from_str::<Vec<f32>>(&raw))
            .transpose()
            .with_context(|| format!("Malformed embedding for chunk {}", self.id))?;

        Ok(Chunk {
            metadata: parse_metadata(self.metadata.as_deref()),
            created_at: parse_datetime(&self.created_at),
            position: usize::try_from(self.position).unwrap_or_default(),
            id: self.id,
            document_id: self.document_id,
            content: self.content,
            embedding,
        })
    }
}

fn insert_document_row(conn: &Connection, doc: &Document) -> Result<()> {
    conn.execute(
        "INSERT INTO documents (id, title, content, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            doc.id,
            doc.title,
            doc.content,
            doc.metadata.to_string(),
            doc.created_at.to_rfc3339(),
            doc.updated_at.to_rfc3339(),
        ],
    )
    .context("Failed to insert document")?;
    Ok(())
}

fn insert_chunk_row(conn: &Connection, chunk: &Chunk) -> Result<()> {
    let embedding = chunk
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize embedding")?;

    conn.execute(
        "INSERT INTO chunks (id, document_id, content, position, embedding, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            chunk.id,
            chunk.document_id,
            chunk.content,
            chunk.position as i64,
            embedding,
            chunk.metadata.to_string(),
            chunk.created_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to insert chunk {}", chunk.id))?;
    Ok(())
}

fn document_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        metadata: parse_metadata(row.get::<_, Option<String>>(3)?.as_deref()),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

// ============================================================================
// Helper Functions
// ============================================================================

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// JSON 메타데이터 파싱 (없거나 깨졌으면 Null)
fn parse_metadata(raw: Option<&str>) -> Value {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(Value::Null)
}

// ============================================================================
// Tests
// ============================================================================
