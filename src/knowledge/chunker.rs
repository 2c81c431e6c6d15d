//! Text Chunking Module
//!
//! 문장 경계를 존중하는 텍스트 분할을 제공합니다.
//! 문장 종결 부호(`.`, `!`, `?`) 뒤의 공백을 경계로 나누고,
//! 최대 크기를 넘지 않도록 문장을 탐욕적으로 묶습니다.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 문장 경계: 종결 부호 + 공백
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("valid sentence regex"));

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    ///
    /// 한 문장이 이 크기를 넘으면 문장을 자르지 않고 그대로 하나의 청크로 둡니다.
    pub max_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 1000,
        }
    }
}

impl ChunkConfig {
    /// 최대 크기를 지정하여 생성
    pub fn with_max(max_characters: usize) -> Self {
        Self { max_characters }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// SentenceChunker
// ============================================================================

/// 문장 단위 청커
///
/// - 문장 종결 부호는 앞 문장에 남김
/// - 버퍼가 비어있지 않고 다음 문장을 붙이면 최대 크기를 넘을 때 flush
/// - 빈 청크는 만들지 않음
pub struct SentenceChunker {
    config: ChunkConfig,
}

impl SentenceChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 최대 크기 반환
    pub fn max_characters(&self) -> usize {
        self.config.max_characters
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let max = self.config.max_characters;
        let mut chunks = Vec::new();
        let mut buffer = String::new();
        let mut buffer_len = 0usize;

        for sentence in split_sentences(text) {
            let sentence_len = sentence.chars().count();

            // 구분 공백 1자 포함
            if !buffer.is_empty() && buffer_len + 1 + sentence_len > max {
                chunks.push(std::mem::take(&mut buffer));
                buffer_len = 0;
            }

            if !buffer.is_empty() {
                buffer.push(' ');
                buffer_len += 1;
            }
            buffer.push_str(sentence);
            buffer_len += sentence_len;
        }

        if !buffer.is_empty() {
            chunks.push(buffer);
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "SentenceChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문장 분할 (종결 부호 유지, 앞뒤 공백 제거, 빈 문장 제외)
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in SENTENCE_BOUNDARY.find_iter(text) {
        // 종결 부호는 ASCII 1바이트
        sentences.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    sentences.push(&text[start..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(SentenceChunker::with_defaults())
}

/// 문장 청커 생성 (설정 지정)
pub fn sentence_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(SentenceChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================
