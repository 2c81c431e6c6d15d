//! 에러 타입
//!
//! 검색 엔진 내부에서 발생하는 실패를 분류합니다.
//! 저장소(SQLite) 실패만 호출자에게 전파되고, 나머지는 로컬에서 복구됩니다.

use thiserror::Error;

/// 검색 엔진 에러
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// 벡터 길이 불일치 (정상 동작에서는 발생하지 않음)
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 임베딩 호출 실패 또는 타임아웃 (제로 벡터로 대체됨)
    #[error("Embedding provider failure: {0}")]
    ProviderFailure(String),

    /// 초기화 시 저장된 인덱스 로드 실패 (빈 인덱스로 대체됨)
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    /// 빈 쿼리, 빈 문서 등 잘못된 입력
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 저장소 실패 - 유일하게 호출자에게 전파되는 에러
    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// 검색 엔진 Result 타입
pub type Result<T> = std::result::Result<T, RetrievalError>;
