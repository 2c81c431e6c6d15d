//! Knowledge 모듈 - 요리 지식 검색 엔진
//!
//! - Chunker: 문장 경계 기반 텍스트 분할
//! - Lexical: BM25 통계 랭킹
//! - Vector: 임베딩 코사인 유사도 랭킹
//! - Strategy: 두 랭킹의 공통 인터페이스 + RRF 통합
//! - Gate: 근거 충분성 판정 및 컨텍스트 조립
//! - Service: 수집/검색/삭제/초기화 오케스트레이션
//! - Store: SQLite 문서/청크 저장소

mod chunker;
mod gate;
mod lexical;
mod prompt;
mod service;
mod store;
mod strategy;
mod vector;

// Re-exports
pub use chunker::{
    default_chunker, sentence_chunker, split_sentences, ChunkConfig, Chunker, SentenceChunker,
};
pub use gate::{
    GateConfig, GateDecision, GateMode, RelevanceGate, DEFAULT_RELEVANCE_THRESHOLD,
    HYBRID_RELEVANCE_THRESHOLD, LEXICAL_RELEVANCE_THRESHOLD, MAX_CONTEXT_CHARS,
    MAX_KNOWLEDGE_SECTIONS, STRICT_RELEVANCE_THRESHOLD,
};
pub use lexical::{tokenize, Bm25Index, Bm25Params, IdfFormula};
pub use prompt::{compose_prompt, PromptPlan, NO_KNOWLEDGE_RESPONSE, RAG_SYSTEM_PROMPT};
pub use service::{IndexState, Retrieval, RetrievalService, ServiceStats};
pub use store::{
    get_data_dir, Chunk, Document, DocumentStore, KnowledgeStore, StoreStats,
};
pub use strategy::{
    fuse_rankings, LexicalStrategy, RankSource, RankingStrategy, ScoredCandidate,
    SemanticStrategy,
};
pub use vector::{cosine_similarity, VectorEntry, VectorIndex, EMBEDDING_DIMENSION};
