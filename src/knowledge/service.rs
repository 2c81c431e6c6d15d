//! Retrieval Service - 수집/검색/삭제/초기화 오케스트레이션
//!
//! 청커, 랭킹 전략(렉시컬/시맨틱), 관련성 게이트, 내구 저장소를 묶어
//! 하나의 검색 서비스로 제공합니다.
//!
//! 인덱스 수명주기: `Uninitialized → Initializing → Ready`
//! - 첫 사용 시 저장소의 모든 청크를 인메모리 인덱스로 로드
//! - 동시 초기화 요청은 하나만 로드를 수행하고 나머지는 완료를 기다림
//! - 로드 실패 시 빈 인덱스로 `Ready` 전환 (가용성 우선)

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::{RetrievalConfig, RetrievalMode};
use crate::embedding::FallbackEmbedder;
use crate::error::{Result, RetrievalError};

use super::chunker::{sentence_chunker, Chunker};
use super::gate::{GateDecision, RelevanceGate};
use super::store::{Chunk, Document, DocumentStore};
use super::strategy::{
    fuse_rankings, LexicalStrategy, RankingStrategy, ScoredCandidate, SemanticStrategy,
};

// ============================================================================
// Types
// ============================================================================

/// 인덱스 수명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Uninitialized,
    Initializing,
    Ready,
}

impl IndexState {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexState::Uninitialized => "uninitialized",
            IndexState::Initializing => "initializing",
            IndexState::Ready => "ready",
        }
    }
}

/// 검색 + 게이트 결과
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// 랭킹된 후보 (점수 내림차순)
    pub candidates: Vec<ScoredCandidate>,
    /// 게이트 판정
    pub decision: GateDecision,
}

/// 서비스 통계
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub state: IndexState,
    pub mode: RetrievalMode,
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedded_chunk_count: usize,
    pub total_content_bytes: usize,
    /// 렉시컬 인덱스 항목 수
    pub lexical_entries: usize,
    /// 벡터 인덱스 항목 수
    pub vector_entries: usize,
    /// 청크당 평균 토큰 수
    pub avg_chunk_tokens: f64,
    /// 제로 벡터로 대체된 임베딩 수 (프로세스 시작 이후)
    pub degraded_embeddings: usize,
}

// ============================================================================
// RetrievalService
// ============================================================================

/// 검색 서비스
pub struct RetrievalService {
    store: Arc<dyn DocumentStore>,
    chunker: Box<dyn Chunker>,
    config: RetrievalConfig,
    gate: RelevanceGate,
    lexical: Option<LexicalStrategy>,
    semantic: Option<SemanticStrategy>,
    state: RwLock<IndexState>,
    /// 초기화/리셋 직렬화
    lifecycle: tokio::sync::Mutex<()>,
    /// 저장소 + 인메모리 인덱스 동시 갱신 직렬화 (await 없는 구간만)
    writes: Mutex<()>,
}

impl RetrievalService {
    /// 새 서비스 생성
    ///
    /// # Arguments
    /// * `store` - 내구 저장소
    /// * `config` - 검색 설정
    /// * `embedder` - 임베딩 래퍼 (semantic/hybrid 모드에서 필수)
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: RetrievalConfig,
        embedder: Option<Arc<FallbackEmbedder>>,
    ) -> Result<Self> {
        let semantic = match (config.mode.needs_embeddings(), embedder) {
            (true, Some(embedder)) => Some(SemanticStrategy::new(embedder)),
            (true, None) => {
                return Err(RetrievalError::InvalidInput(format!(
                    "{:?} mode requires an embedding provider",
                    config.mode
                )))
            }
            (false, _) => None,
        };

        let lexical = match config.mode {
            RetrievalMode::Semantic => None,
            RetrievalMode::Lexical | RetrievalMode::Hybrid => {
                Some(LexicalStrategy::new(config.bm25))
            }
        };

        Ok(Self {
            store,
            chunker: sentence_chunker(config.chunk.clone()),
            gate: RelevanceGate::new(config.gate.clone()),
            config,
            lexical,
            semantic,
            state: RwLock::new(IndexState::Uninitialized),
            lifecycle: tokio::sync::Mutex::new(()),
            writes: Mutex::new(()),
        })
    }

    /// 설정 반환
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// 현재 수명주기 상태
    pub fn state(&self) -> IndexState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: IndexState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn strategies(&self) -> Vec<&dyn RankingStrategy> {
        let mut strategies: Vec<&dyn RankingStrategy> = Vec::with_capacity(2);
        if let Some(lexical) = &self.lexical {
            strategies.push(lexical);
        }
        if let Some(semantic) = &self.semantic {
            strategies.push(semantic);
        }
        strategies
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// 인메모리 인덱스 초기화 (멱등, 동시 호출 안전)
    pub async fn initialize(&self) {
        if self.state() == IndexState::Ready {
            return;
        }

        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == IndexState::Ready {
            return;
        }

        self.set_state(IndexState::Initializing);
        tracing::info!("Loading retrieval index ({:?} mode)", self.config.mode);

        match self.load_index() {
            Ok(count) => tracing::info!("Retrieval index ready: {} chunks", count),
            Err(e) => {
                let failure = RetrievalError::IndexCorruption(format!("{:#}", e));
                tracing::warn!("Starting with an empty index: {}", failure);
                for strategy in self.strategies() {
                    strategy.clear();
                }
            }
        }

        self.set_state(IndexState::Ready);
    }

    fn load_index(&self) -> anyhow::Result<usize> {
        let chunks: Vec<Arc<Chunk>> = self
            .store
            .list_chunks()?
            .into_iter()
            .map(Arc::new)
            .collect();

        for strategy in self.strategies() {
            strategy.clear();
            let indexed = strategy.index(&chunks);
            tracing::debug!("{:?} strategy indexed {} chunks", strategy.source(), indexed);
        }

        Ok(chunks.len())
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// 문서 수집 (빈 메타데이터)
    pub async fn ingest(&self, title: &str, content: &str) -> Result<String> {
        self.ingest_with_metadata(title, content, Value::Object(Map::new()))
            .await
    }

    /// 문서 수집
    ///
    /// 청킹 → (시맨틱 사용 시) 임베딩 → 한 트랜잭션으로 저장 → 인덱스 갱신.
    /// 모든 임베딩을 저장 전에 계산하므로 중간에 취소되어도 저장소에 흔적이 남지 않습니다.
    ///
    /// # Returns
    /// 문서 ID
    pub async fn ingest_with_metadata(
        &self,
        title: &str,
        content: &str,
        metadata: Value,
    ) -> Result<String> {
        self.initialize().await;

        let title = match title.trim() {
            "" => {
                tracing::warn!("{}", RetrievalError::InvalidInput("empty title".into()));
                "Untitled"
            }
            title => title,
        };
        let content = content.trim();

        let document = Document::new(title, content, metadata);
        let pieces = self.chunker.chunk(content);
        if pieces.is_empty() {
            tracing::warn!("No chunks generated for document: {}", title);
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.into_iter().enumerate() {
            let mut chunk = Chunk::new(
                &document.id,
                piece,
                i,
                chunk_metadata(&document.metadata, i),
            );
            if let Some(semantic) = &self.semantic {
                let embedding = semantic.embedder().embed_or_zero(&chunk.content).await;
                chunk = chunk.with_embedding(embedding);
            }
            chunks.push(chunk);
        }

        let chunks: Vec<Arc<Chunk>> = {
            let _writes = self
                .writes
                .lock()
                .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

            self.store.save_document(&document, &chunks)?;

            let chunks: Vec<Arc<Chunk>> = chunks.into_iter().map(Arc::new).collect();
            for strategy in self.strategies() {
                strategy.index(&chunks);
            }
            chunks
        };

        tracing::info!(
            "Ingested document {} ({}): {} chunks",
            document.id,
            title,
            chunks.len()
        );
        Ok(document.id)
    }

    // ========================================================================
    // Query
    // ========================================================================

    /// 쿼리에 대한 랭킹된 후보
    ///
    /// 단일 모드는 해당 전략의 결과를 그대로, 하이브리드는 두 전략을
    /// 동시에 실행해 RRF로 통합합니다. 빈 쿼리는 빈 결과입니다.
    pub async fn query(&self, text: &str, limit: usize) -> Vec<ScoredCandidate> {
        self.initialize().await;

        let text = text.trim();
        if text.is_empty() || limit == 0 {
            tracing::debug!("{}", RetrievalError::InvalidInput("empty query".into()));
            return vec![];
        }

        let strategies = self.strategies();
        if let [single] = strategies.as_slice() {
            return single.rank(text, limit).await;
        }

        let per_strategy = limit.saturating_mul(2);
        let rankings = join_all(strategies.iter().map(|s| s.rank(text, per_strategy))).await;
        fuse_rankings(&rankings, limit)
    }

    /// 검색 후 게이트 판정
    pub async fn retrieve(&self, question: &str, limit: usize) -> Retrieval {
        let candidates = self.query(question, limit).await;
        let decision = self.gate.decide(&candidates);
        Retrieval {
            candidates,
            decision,
        }
    }

    // ========================================================================
    // Management
    // ========================================================================

    /// 문서 삭제 (청크 연쇄 삭제)
    ///
    /// # Returns
    /// 문서가 존재했는지 여부
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        self.initialize().await;

        let _writes = self
            .writes
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let existed = self.store.delete_document(document_id)?;
        let mut removed = 0;
        for strategy in self.strategies() {
            removed += strategy.remove_document(document_id);
        }

        tracing::info!(
            "Deleted document {} (existed: {}, index entries removed: {})",
            document_id,
            existed,
            removed
        );
        Ok(existed)
    }

    /// 전체 초기화 (저장소 + 인메모리 인덱스)
    ///
    /// # Returns
    /// 삭제된 문서 수
    pub async fn reset(&self) -> Result<usize> {
        let _lifecycle = self.lifecycle.lock().await;
        let _writes = self
            .writes
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let deleted = self.store.delete_all()?;
        for strategy in self.strategies() {
            strategy.clear();
        }
        self.set_state(IndexState::Ready);

        tracing::info!("Retrieval index reset ({} documents removed)", deleted);
        Ok(deleted)
    }

    /// 문서 목록 (최신순)
    pub fn list_documents(&self, limit: usize) -> Result<Vec<Document>> {
        Ok(self.store.list_documents(limit)?)
    }

    /// 문서 조회
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.store.get_document(id)?)
    }

    /// 서비스 통계
    pub fn stats(&self) -> Result<ServiceStats> {
        let store = self.store.stats()?;

        Ok(ServiceStats {
            state: self.state(),
            mode: self.config.mode,
            document_count: store.document_count,
            chunk_count: store.chunk_count,
            embedded_chunk_count: store.embedded_chunk_count,
            total_content_bytes: store.total_content_bytes,
            lexical_entries: self.lexical.as_ref().map_or(0, |s| s.len()),
            vector_entries: self.semantic.as_ref().map_or(0, |s| s.len()),
            avg_chunk_tokens: self.lexical.as_ref().map_or(0.0, |s| s.avg_chunk_tokens()),
            degraded_embeddings: self
                .semantic
                .as_ref()
                .map_or(0, |s| s.embedder().degraded_count()),
        })
    }
}

/// 청크 메타데이터 = 문서 메타데이터 + 청크 위치
fn chunk_metadata(document_metadata: &Value, index: usize) -> Value {
    let mut map = match document_metadata {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    map.insert("index".to_string(), json!(index));
    Value::Object(map)
}

// ============================================================================
// Tests
// ============================================================================
