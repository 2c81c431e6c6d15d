//! culinary-rag - 요리 지식 검색 엔진
//!
//! BM25 키워드 랭킹과 임베딩 유사도 랭킹을 결합한 문서 검색 엔진입니다.
//! 검색 결과가 답변 근거로 충분한지 판정하고 컨텍스트를 조립합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;

// Re-exports
pub use config::{RetrievalConfig, RetrievalMode};
pub use embedding::{
    create_embedder, get_api_key, has_api_key, EmbeddingProvider, FallbackEmbedder,
    OpenAiEmbedding,
};
pub use error::{Result, RetrievalError};
pub use knowledge::{
    compose_prompt, Chunk, ChunkConfig, Chunker, Document, DocumentStore, GateConfig,
    GateDecision, GateMode, IndexState, KnowledgeStore, PromptPlan, RankSource, Retrieval,
    RetrievalService, ScoredCandidate, ServiceStats, StoreStats,
};
