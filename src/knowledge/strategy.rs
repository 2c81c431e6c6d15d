//! 랭킹 전략 - 렉시컬(BM25) / 시맨틱(임베딩) 공통 인터페이스
//!
//! 검색 서비스는 두 전략을 같은 `RankingStrategy` 트레이트로 다루고,
//! 설정에 따라 하나만 쓰거나 RRF로 통합합니다.
//! 각 전략은 자신의 인덱스를 하나의 RwLock으로 보호합니다 (전략 간 전역 락 없음).
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::FallbackEmbedder;

use super::lexical::{tokenize, Bm25Index, Bm25Params};
use super::store::Chunk;
use super::vector::{VectorEntry, VectorIndex};

/// RRF 상수
const RRF_K: f32 = 60.0;

/// 렉시컬 쿼리에서 제외할 불용어
const QUERY_STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "is", "are", "was", "were", "be", "to", "of", "in",
    "on", "at", "for", "with", "by", "from", "as", "it", "this", "that", "what", "which", "who",
    "where", "when", "why", "how", "do", "does", "i", "you", "we", "they", "my", "your", "can",
    "could", "should", "would", "will", "about", "into", "there", "please",
];

// ============================================================================
// Types
// ============================================================================

/// 랭킹 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankSource {
    /// BM25 렉시컬 검색
    Lexical,
    /// 임베딩 코사인 유사도 검색
    Embedding,
    /// 두 검색 모두에서 발견 (RRF 통합)
    Hybrid,
}

impl RankSource {
    /// 짧은 표시용 태그
    pub fn tag(self) -> &'static str {
        match self {
            RankSource::Lexical => "LEX",
            RankSource::Embedding => "VEC",
            RankSource::Hybrid => "HYB",
        }
    }
}

/// 점수가 매겨진 후보 (쿼리 수명 동안만 존재)
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub source: RankSource,
}

// ============================================================================
// RankingStrategy Trait
// ============================================================================

/// 랭킹 전략 트레이트
#[async_trait]
pub trait RankingStrategy: Send + Sync {
    /// 랭킹 출처
    fn source(&self) -> RankSource;

    /// 청크 색인 (색인된 개수 반환)
    fn index(&self, chunks: &[Arc<Chunk>]) -> usize;

    /// 문서의 모든 청크 제거
    fn remove_document(&self, document_id: &str) -> usize;

    /// 전체 초기화
    fn clear(&self);

    /// 색인된 청크 수
    fn len(&self) -> usize;

    /// 쿼리에 대한 상위 `limit`개 후보 (점수 내림차순)
    async fn rank(&self, query: &str, limit: usize) -> Vec<ScoredCandidate>;
}

// ============================================================================
// LexicalStrategy
// ============================================================================

#[derive(Default)]
struct LexicalState {
    index: Bm25Index,
    chunks: HashMap<String, Arc<Chunk>>,
}

/// BM25 렉시컬 전략
pub struct LexicalStrategy {
    params: Bm25Params,
    state: RwLock<LexicalState>,
}

impl LexicalStrategy {
    /// 파라미터를 지정하여 생성
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            state: RwLock::new(LexicalState {
                index: Bm25Index::new(params),
                chunks: HashMap::new(),
            }),
        }
    }

    /// 청크당 평균 토큰 수
    pub fn avg_chunk_tokens(&self) -> f64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .avg_doc_len()
    }

    /// 단어의 현재 IDF
    pub fn idf(&self, term: &str) -> Option<f64> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .idf(term)
    }
}

impl Default for LexicalStrategy {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

#[async_trait]
impl RankingStrategy for LexicalStrategy {
    fn source(&self) -> RankSource {
        RankSource::Lexical
    }

    fn index(&self, chunks: &[Arc<Chunk>]) -> usize {
        if chunks.is_empty() {
            return 0;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .index
            .extend(chunks.iter().map(|c| (c.id.clone(), c.content.clone())));
        for chunk in chunks {
            state.chunks.insert(chunk.id.clone(), Arc::clone(chunk));
        }
        chunks.len()
    }

    fn remove_document(&self, document_id: &str) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let ids: HashSet<String> = state
            .chunks
            .values()
            .filter(|c| c.document_id == document_id)
            .map(|c| c.id.clone())
            .collect();

        if ids.is_empty() {
            return 0;
        }

        state.chunks.retain(|id, _| !ids.contains(id));
        state.index.remove_many(&ids)
    }

    fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = LexicalState {
            index: Bm25Index::new(self.params),
            chunks: HashMap::new(),
        };
    }

    fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .len()
    }

    async fn rank(&self, query: &str, limit: usize) -> Vec<ScoredCandidate> {
        let terms = content_terms(query);
        if terms.is_empty() {
            tracing::debug!("Lexical query has no content terms: {:?}", query);
            return Vec::new();
        }

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .index
            .search(&terms, limit)
            .into_iter()
            .filter_map(|(id, score)| {
                state.chunks.get(&id).map(|chunk| ScoredCandidate {
                    chunk: Arc::clone(chunk),
                    score: score as f32,
                    source: RankSource::Lexical,
                })
            })
            .collect()
    }
}

/// 불용어를 뺀 쿼리 단어 (공백 구분)
fn content_terms(query: &str) -> String {
    tokenize(query)
        .into_iter()
        .filter(|term| !QUERY_STOP_WORDS.contains(&term.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// SemanticStrategy
// ============================================================================

struct SemanticState {
    index: VectorIndex,
    chunks: HashMap<String, Arc<Chunk>>,
}

/// 임베딩 시맨틱 전략
///
/// 임베딩이 있는 청크만 색인합니다. 쿼리 임베딩 실패 시 제로 벡터로
/// 검색하므로 모든 점수가 0이 됩니다.
pub struct SemanticStrategy {
    embedder: Arc<FallbackEmbedder>,
    state: RwLock<SemanticState>,
}

impl SemanticStrategy {
    /// 임베더로 생성 (인덱스 차원 = 임베더 차원)
    pub fn new(embedder: Arc<FallbackEmbedder>) -> Self {
        let index = VectorIndex::with_dimension(embedder.dimension());
        Self {
            embedder,
            state: RwLock::new(SemanticState {
                index,
                chunks: HashMap::new(),
            }),
        }
    }

    /// 임베더 반환
    pub fn embedder(&self) -> &Arc<FallbackEmbedder> {
        &self.embedder
    }
}

#[async_trait]
impl RankingStrategy for SemanticStrategy {
    fn source(&self) -> RankSource {
        RankSource::Embedding
    }

    fn index(&self, chunks: &[Arc<Chunk>]) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut indexed = 0;

        for chunk in chunks {
            let Some(embedding) = chunk.embedding.as_ref() else {
                continue;
            };

            let entry = VectorEntry {
                chunk_id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                embedding: embedding.clone(),
            };

            match state.index.add(entry) {
                Ok(()) => {
                    state.chunks.insert(chunk.id.clone(), Arc::clone(chunk));
                    indexed += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping vector for chunk {}: {}", chunk.id, e);
                }
            }
        }

        indexed
    }

    fn remove_document(&self, document_id: &str) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.chunks.retain(|_, c| c.document_id != document_id);
        state.index.remove_document(document_id)
    }

    fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.index = VectorIndex::with_dimension(self.embedder.dimension());
        state.chunks.clear();
    }

    fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .len()
    }

    async fn rank(&self, query: &str, limit: usize) -> Vec<ScoredCandidate> {
        // 임베딩 호출은 락 밖에서
        let query_vector = self.embedder.embed_or_zero(query).await;

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let ranked = match state.index.search(&query_vector, limit) {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::error!("Vector search failed: {}", e);
                return vec![];
            }
        };

        ranked
            .into_iter()
            .filter_map(|(id, score)| {
                state.chunks.get(&id).map(|chunk| ScoredCandidate {
                    chunk: Arc::clone(chunk),
                    score,
                    source: RankSource::Embedding,
                })
            })
            .collect()
    }
}

// ============================================================================
// Reciprocal Rank Fusion
// ============================================================================

/// RRF (Reciprocal Rank Fusion)
///
/// RRF Score = sum(1 / (k + rank)), k = 60
///
/// 통합 점수 내림차순으로 정렬하며, 동점은 처음 발견된 순서를 유지합니다.
/// 두 개 이상의 목록에서 발견된 청크는 `RankSource::Hybrid`가 됩니다.
pub fn fuse_rankings(rankings: &[Vec<ScoredCandidate>], limit: usize) -> Vec<ScoredCandidate> {
    let mut fused: Vec<ScoredCandidate> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for ranking in rankings {
        for (rank, candidate) in ranking.iter().enumerate() {
            let rrf_score = 1.0 / (RRF_K + rank as f32 + 1.0);

            match positions.get(&candidate.chunk.id) {
                Some(&pos) => {
                    let entry = &mut fused[pos];
                    entry.score += rrf_score;
                    entry.source = RankSource::Hybrid;
                }
                None => {
                    positions.insert(candidate.chunk.id.clone(), fused.len());
                    fused.push(ScoredCandidate {
                        chunk: Arc::clone(&candidate.chunk),
                        score: rrf_score,
                        source: candidate.source,
                    });
                }
            }
        }
    }

    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(limit);
    fused
}

// ============================================================================
// Tests
// ============================================================================
