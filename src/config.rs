//! 검색 엔진 설정
//!
//! 배포마다 조정 가능한 값들(검색 모드, 청크 크기, BM25 파라미터, 게이트 임계값)을 모읍니다.
//! JSON 파일에서 읽고, `CULINARY_RAG_*` 환경변수로 덮어쓸 수 있습니다.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::knowledge::{Bm25Params, ChunkConfig, GateConfig, GateMode, EMBEDDING_DIMENSION};

/// 검색 모드 환경변수
pub const ENV_MODE: &str = "CULINARY_RAG_MODE";
/// 게이트 임계값 환경변수
pub const ENV_THRESHOLD: &str = "CULINARY_RAG_THRESHOLD";
/// 게이트 방식 환경변수 (`binary` | `strict` | `lexical` | `hybrid`)
pub const ENV_GATE: &str = "CULINARY_RAG_GATE";
/// 최대 섹션 수 환경변수
pub const ENV_MAX_SECTIONS: &str = "CULINARY_RAG_MAX_SECTIONS";
/// 최대 컨텍스트 문자 수 환경변수
pub const ENV_MAX_CONTEXT_CHARS: &str = "CULINARY_RAG_MAX_CONTEXT_CHARS";
/// 청크 크기 환경변수
pub const ENV_CHUNK_SIZE: &str = "CULINARY_RAG_CHUNK_SIZE";

// ============================================================================
// RetrievalMode
// ============================================================================

/// 검색 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// BM25만 사용 (임베딩 불필요)
    Lexical,
    /// 임베딩 유사도만 사용
    Semantic,
    /// 두 검색을 RRF로 통합
    Hybrid,
}

impl RetrievalMode {
    /// 임베딩 프로바이더가 필요한지 여부
    pub fn needs_embeddings(self) -> bool {
        !matches!(self, RetrievalMode::Lexical)
    }

    /// 모드별 점수 척도에 맞는 기본 게이트
    pub fn default_gate(self) -> GateConfig {
        match self {
            RetrievalMode::Lexical => GateConfig::for_lexical(),
            RetrievalMode::Semantic => GateConfig::binary(),
            RetrievalMode::Hybrid => GateConfig::for_hybrid(),
        }
    }
}

impl FromStr for RetrievalMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lexical" | "bm25" => Ok(RetrievalMode::Lexical),
            "semantic" | "embedding" => Ok(RetrievalMode::Semantic),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => anyhow::bail!("Unknown retrieval mode: {}", other),
        }
    }
}

// ============================================================================
// RetrievalConfig
// ============================================================================

/// 검색 엔진 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub mode: RetrievalMode,
    pub chunk: ChunkConfig,
    pub bm25: Bm25Params,
    pub gate: GateConfig,
    /// 기본 검색 결과 수
    pub default_limit: usize,
    /// 임베딩 차원
    pub embedding_dimension: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Lexical,
            chunk: ChunkConfig::default(),
            bm25: Bm25Params::default(),
            gate: RetrievalMode::Lexical.default_gate(),
            default_limit: 3,
            embedding_dimension: EMBEDDING_DIMENSION,
        }
    }
}

impl RetrievalConfig {
    /// 임베딩 검색 설정 (이진 게이트)
    pub fn semantic() -> Self {
        Self::default().with_mode(RetrievalMode::Semantic)
    }

    /// 하이브리드 설정 (RRF 점수용 게이트)
    pub fn hybrid() -> Self {
        Self::default().with_mode(RetrievalMode::Hybrid)
    }

    /// 검색 모드 변경
    ///
    /// 게이트가 이전 모드의 기본값 그대로면 새 모드의 기본 게이트로 바꿉니다.
    /// 직접 조정한 게이트는 유지합니다.
    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        if self.gate == self.mode.default_gate() {
            self.gate = mode.default_gate();
        }
        self.mode = mode;
        self
    }

    /// JSON 파일에서 로드 (없는 필드는 기본값)
    ///
    /// `gate`가 없으면 `mode`에 맞는 기본 게이트를 씁니다.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        let has_gate = value.get("gate").is_some();

        let mut config: Self = serde_json::from_value(value)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        if !has_gate {
            config.gate = config.mode.default_gate();
        }
        Ok(config)
    }

    /// 환경변수 덮어쓰기 적용
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// 조회 함수로 덮어쓰기 적용 (잘못된 값은 경고 후 무시)
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = parse_override::<RetrievalMode>(&lookup, ENV_MODE) {
            self = self.with_mode(mode);
        }

        if let Some(gate) = lookup(ENV_GATE) {
            match gate.trim().to_ascii_lowercase().as_str() {
                "binary" => self.gate = GateConfig::binary(),
                "strict" => self.gate = GateConfig::strict(),
                "lexical" | "bm25" => self.gate = GateConfig::for_lexical(),
                "hybrid" => self.gate = GateConfig::for_hybrid(),
                other => tracing::warn!("Ignoring {}={}: unknown gate", ENV_GATE, other),
            }
        }

        if let Some(threshold) = parse_override::<f32>(&lookup, ENV_THRESHOLD) {
            self.gate.threshold = threshold;
        }
        if let Some(max) = parse_override::<usize>(&lookup, ENV_MAX_SECTIONS) {
            self.gate.max_sections = max;
        }
        if let Some(max) = parse_override::<usize>(&lookup, ENV_MAX_CONTEXT_CHARS) {
            self.gate.max_context_chars = max;
        }
        if let Some(size) = parse_override::<usize>(&lookup, ENV_CHUNK_SIZE) {
            self.chunk.max_characters = size;
        }

        self
    }

    /// 게이트 방식 설명
    pub fn gate_label(&self) -> &'static str {
        match self.gate.mode {
            GateMode::Fallback => "fallback",
            GateMode::Refuse => "refuse",
        }
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {}={}: {}", key, raw, e);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::knowledge::IdfFormula;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RetrievalConfig::default();
        assert_eq!(config.mode, RetrievalMode::Lexical);
        assert_eq!(config.chunk.max_characters, 1000);
        assert_eq!(config.bm25.k1, 1.2);
        assert_eq!(config.bm25.b, 0.75);
        assert_eq!(config.gate, GateConfig::for_lexical());
        assert_eq!(config.gate_label(), "fallback");
        assert_eq!(config.embedding_dimension, 1536);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Hybrid".parse::<RetrievalMode>().unwrap(), RetrievalMode::Hybrid);
        assert_eq!("bm25".parse::<RetrievalMode>().unwrap(), RetrievalMode::Lexical);
        assert!("fuzzy".parse::<RetrievalMode>().is_err());
        assert!(RetrievalMode::Semantic.needs_embeddings());
        assert!(!RetrievalMode::Lexical.needs_embeddings());
    }

    #[test]
    fn test_overrides() {
        let config = RetrievalConfig::default().apply_overrides(lookup_from(&[
            (ENV_MODE, "semantic"),
            (ENV_GATE, "strict"),
            (ENV_THRESHOLD, "0.42"),
            (ENV_MAX_SECTIONS, "2"),
            (ENV_CHUNK_SIZE, "500"),
        ]));

        assert_eq!(config.mode, RetrievalMode::Semantic);
        assert_eq!(config.gate.mode, GateMode::Refuse);
        assert_eq!(config.gate.threshold, 0.42);
        assert_eq!(config.gate.max_sections, 2);
        assert_eq!(config.chunk.max_characters, 500);
        assert_eq!(config.gate_label(), "refuse");
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let config = RetrievalConfig::default().apply_overrides(lookup_from(&[
            (ENV_MODE, "quantum"),
            (ENV_THRESHOLD, "high"),
            (ENV_GATE, "maybe"),
        ]));
        assert_eq!(config, RetrievalConfig::default());
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"mode":"hybrid","bm25":{"k1":1.5,"b":0.5,"idf":"classic"},"gate":{"threshold":0.6,"mode":"only_relevant","max_sections":3,"max_context_chars":2000}}"#,
        )
        .unwrap();

        let config = RetrievalConfig::load(&path).unwrap();
        assert_eq!(config.mode, RetrievalMode::Hybrid);
        assert_eq!(config.bm25.idf, IdfFormula::Classic);
        assert_eq!(config.gate.max_sections, 3);
        assert_eq!(config.gate.mode, GateMode::Refuse);
        assert_eq!(config.chunk, ChunkConfig::default());
        assert_eq!(config.default_limit, 3);
    }

    #[test]
    fn test_load_mode_without_gate() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"mode":"hybrid"}"#).unwrap();

        let config = RetrievalConfig::load(&path).unwrap();
        assert_eq!(config.gate, GateConfig::for_hybrid());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(RetrievalConfig::load(Path::new("/nonexistent/culinary.json")).is_err());
    }

    #[test]
    fn test_presets() {
        assert_eq!(RetrievalConfig::semantic().mode, RetrievalMode::Semantic);
        let hybrid = RetrievalConfig::hybrid();
        assert_eq!(hybrid.mode, RetrievalMode::Hybrid);
        assert_eq!(hybrid.gate, GateConfig::for_hybrid());
        assert_eq!(RetrievalConfig::semantic().gate, GateConfig::binary());
    }

    #[test]
    fn test_mode_switch_follows_score_scale() {
        let semantic = RetrievalConfig::default().apply_overrides(lookup_from(&[(ENV_MODE, "semantic")]));
        assert_eq!(semantic.gate, GateConfig::binary());

        let lexical = RetrievalConfig::hybrid().with_mode(RetrievalMode::Lexical);
        assert_eq!(lexical.gate, GateConfig::for_lexical());
        assert_eq!(lexical.gate.threshold, 0.5);
    }

    #[test]
    fn test_mode_switch_keeps_tuned_gate() {
        let mut config = RetrievalConfig::default();
        config.gate = GateConfig::strict().with_threshold(0.8);

        let hybrid = config.clone().with_mode(RetrievalMode::Hybrid);
        assert_eq!(hybrid.gate, config.gate);

        let overridden = RetrievalConfig::default().apply_overrides(lookup_from(&[
            (ENV_MODE, "hybrid"),
            (ENV_THRESHOLD, "0.03"),
        ]));
        assert_eq!(overridden.gate, GateConfig::for_hybrid().with_threshold(0.03));
    }
}
