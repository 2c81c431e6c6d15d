//! Relevance Gate - 검색 근거 충분성 판정
//!
//! 점수가 매겨진 후보들 중 임계값 이상인 후보만 골라
//! 하위 소비자(답변 생성)에게 넘길 컨텍스트 문자열을 조립합니다.
//!
//! 두 게이트 방식은 같은 메커니즘의 설정이며, 근거가 없을 때 소비자의 동작만 다릅니다:
//! - `Fallback`: 고정 안내 메시지를 그대로 반환
//! - `Refuse`: 생성 모델에 답변 거절을 지시

use serde::{Deserialize, Serialize};

use super::strategy::ScoredCandidate;

/// 코사인 유사도 기준 기본 임계값
pub const DEFAULT_RELEVANCE_THRESHOLD: f32 = 0.35;
/// 엄격 게이트 임계값 (코사인 유사도)
pub const STRICT_RELEVANCE_THRESHOLD: f32 = 0.5;
/// BM25 점수 기준 임계값 (불용어를 제외한 단어 하나가 뚜렷하게 일치해야 통과)
pub const LEXICAL_RELEVANCE_THRESHOLD: f32 = 0.5;
/// RRF 점수 기준 임계값 (두 검색 모두 상위권에 있어야 통과)
pub const HYBRID_RELEVANCE_THRESHOLD: f32 = 0.025;
/// 컨텍스트 최대 문자 수
pub const MAX_CONTEXT_CHARS: usize = 4000;
/// 컨텍스트 최대 섹션 수
pub const MAX_KNOWLEDGE_SECTIONS: usize = 5;

// ============================================================================
// Configuration
// ============================================================================

/// 게이트 방식 (근거 불충분 시 소비자 동작)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// 고정 안내 메시지 반환 (이진 게이트)
    #[serde(alias = "any_relevant", alias = "binary")]
    Fallback,
    /// 생성 모델에 거절 지시 (엄격 게이트)
    #[serde(alias = "only_relevant", alias = "strict")]
    Refuse,
}

/// 게이트 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// 관련성 임계값 (점수 >= 임계값이면 관련)
    pub threshold: f32,
    /// 게이트 방식
    pub mode: GateMode,
    /// 최대 섹션 수
    pub max_sections: usize,
    /// 컨텍스트 최대 문자 수 (첫 섹션은 항상 포함)
    pub max_context_chars: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::binary()
    }
}

impl GateConfig {
    fn preset(threshold: f32, mode: GateMode) -> Self {
        Self {
            threshold,
            mode,
            max_sections: MAX_KNOWLEDGE_SECTIONS,
            max_context_chars: MAX_CONTEXT_CHARS,
        }
    }

    /// 이진 게이트 (코사인 유사도, 근거 없으면 고정 메시지)
    pub fn binary() -> Self {
        Self::preset(DEFAULT_RELEVANCE_THRESHOLD, GateMode::Fallback)
    }

    /// 엄격 게이트 (코사인 유사도, 근거 없으면 거절 지시)
    pub fn strict() -> Self {
        Self::preset(STRICT_RELEVANCE_THRESHOLD, GateMode::Refuse)
    }

    /// BM25 점수용 게이트
    pub fn for_lexical() -> Self {
        Self::preset(LEXICAL_RELEVANCE_THRESHOLD, GateMode::Fallback)
    }

    /// 하이브리드(RRF) 점수용 게이트
    pub fn for_hybrid() -> Self {
        Self::preset(HYBRID_RELEVANCE_THRESHOLD, GateMode::Fallback)
    }

    /// 임계값 변경
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }
}

// ============================================================================
// Decision
// ============================================================================

/// 게이트 판정 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateDecision {
    /// 근거가 충분한지 여부
    pub sufficient: bool,
    /// 조립된 컨텍스트 (불충분하면 빈 문자열)
    pub context: String,
    /// 컨텍스트에 포함된 섹션 수
    pub sections: usize,
    /// 최고 점수
    pub top_score: Option<f32>,
    /// 불충분 시 소비자 동작
    pub mode: GateMode,
}

impl GateDecision {
    fn insufficient(top_score: Option<f32>, mode: GateMode) -> Self {
        Self {
            sufficient: false,
            context: String::new(),
            sections: 0,
            top_score,
            mode,
        }
    }
}

// ============================================================================
// RelevanceGate
// ============================================================================

/// 관련성 게이트
#[derive(Debug, Clone, Default)]
pub struct RelevanceGate {
    config: GateConfig,
}

impl RelevanceGate {
    /// 설정으로 생성
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// 설정 반환
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// 후보 평가 및 컨텍스트 조립
    pub fn decide(&self, candidates: &[ScoredCandidate]) -> GateDecision {
        let threshold = self.config.threshold;
        let top_score = candidates
            .iter()
            .map(|c| c.score)
            .max_by(|a, b| a.total_cmp(b));

        if !candidates.iter().any(|c| c.score >= threshold) {
            tracing::debug!(
                "Gate closed: no candidate reached threshold {} (top: {:?})",
                threshold,
                top_score
            );
            return GateDecision::insufficient(top_score, self.config.mode);
        }

        let mut pool: Vec<&ScoredCandidate> =
            candidates.iter().filter(|c| c.score >= threshold).collect();
        pool.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut sections: Vec<String> = Vec::new();
        let mut total_chars = 0usize;

        for candidate in pool.into_iter().take(self.config.max_sections) {
            let section = format!(
                "Context {}:\n{}",
                sections.len() + 1,
                candidate.chunk.content.trim()
            );
            let section_chars = section.chars().count();
            let separator = if sections.is_empty() { 0 } else { 2 };

            if !sections.is_empty()
                && total_chars + separator + section_chars > self.config.max_context_chars
            {
                break;
            }

            total_chars += separator + section_chars;
            sections.push(section);
        }

        tracing::debug!(
            "Gate open: {} sections, {} chars (top: {:?})",
            sections.len(),
            total_chars,
            top_score
        );

        GateDecision {
            sufficient: true,
            sections: sections.len(),
            context: sections.join("\n\n"),
            top_score,
            mode: self.config.mode,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::knowledge::store::Chunk;
    use crate::knowledge::strategy::RankSource;

    fn candidate(id: &str, content: &str, score: f32) -> ScoredCandidate {
        ScoredCandidate {
            chunk: Arc::new(Chunk::new("doc", content, 0, serde_json::Value::Null).with_id(id)),
            score,
            source: RankSource::Embedding,
        }
    }

    #[test]
    fn test_all_below_threshold_is_insufficient() {
        let gate = RelevanceGate::new(GateConfig::binary());
        let decision = gate.decide(&[
            candidate("a", "Boil water.", 0.1),
            candidate("b", "Salt the pasta.", 0.349),
        ]);

        assert!(!decision.sufficient);
        assert_eq!(decision.context, "");
        assert_eq!(decision.sections, 0);
        assert_eq!(decision.top_score, Some(0.349));
    }

    #[test]
    fn test_empty_candidates() {
        let decision = RelevanceGate::default().decide(&[]);
        assert!(!decision.sufficient);
        assert!(decision.context.is_empty());
        assert_eq!(decision.top_score, None);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let gate = RelevanceGate::new(GateConfig::strict());
        let decision = gate.decide(&[candidate("a", "Rest the steak.", 0.5)]);

        assert!(decision.sufficient);
        assert!(decision.context.contains("Rest the steak."));
    }

    #[test]
    fn test_binary_gate_excludes_lower_candidates() {
        let gate = RelevanceGate::new(GateConfig::binary());
        let decision = gate.decide(&[
            candidate("low", "Garnish with parsley.", 0.2),
            candidate("high", "Sear the scallops.", 0.8),
            candidate("noise", "Unrelated tax advice.", 0.05),
        ]);

        assert!(decision.sufficient);
        assert_eq!(decision.sections, 1);
        assert_eq!(decision.context, "Context 1:\nSear the scallops.");
        assert!(!decision.context.contains("parsley"));
        assert!(!decision.context.contains("tax"));
        assert_eq!(decision.mode, GateMode::Fallback);
    }

    #[test]
    fn test_strict_gate_filters_candidates() {
        let gate = RelevanceGate::new(GateConfig::strict());
        let decision = gate.decide(&[
            candidate("low", "Garnish with parsley.", 0.2),
            candidate("high", "Sear the scallops.", 0.8),
            candidate("mid", "Deglaze with wine.", 0.6),
        ]);

        assert!(decision.sufficient);
        assert_eq!(decision.sections, 2);
        assert!(decision.context.starts_with("Context 1:\nSear the scallops."));
        assert!(decision.context.contains("Context 2:\nDeglaze with wine."));
        assert!(!decision.context.contains("parsley"));
        assert_eq!(decision.mode, GateMode::Refuse);
    }

    #[test]
    fn test_modes_share_filtering() {
        let candidates = [
            candidate("a", "Toast the spices.", 0.7),
            candidate("b", "Grind them finely.", 0.6),
            candidate("c", "Store in a jar.", 0.1),
        ];
        let binary = RelevanceGate::new(GateConfig::binary().with_threshold(0.5)).decide(&candidates);
        let strict = RelevanceGate::new(GateConfig::strict()).decide(&candidates);

        assert_eq!(binary.context, strict.context);
        assert_eq!(binary.sections, 2);
        assert_ne!(binary.mode, strict.mode);
    }

    #[test]
    fn test_insufficient_carries_mode() {
        let decision = RelevanceGate::new(GateConfig::strict()).decide(&[candidate("a", "Boil.", 0.1)]);
        assert!(!decision.sufficient);
        assert_eq!(decision.mode, GateMode::Refuse);
    }

    #[test]
    fn test_max_sections() {
        let config = GateConfig {
            max_sections: 2,
            ..GateConfig::strict()
        };
        let candidates: Vec<_> = (0..5)
            .map(|i| candidate(&format!("c{}", i), &format!("Step {}.", i), 0.9 - i as f32 * 0.01))
            .collect();

        let decision = RelevanceGate::new(config).decide(&candidates);
        assert_eq!(decision.sections, 2);
        assert!(decision.context.contains("Step 0."));
        assert!(decision.context.contains("Step 1."));
        assert!(!decision.context.contains("Step 2."));
    }

    #[test]
    fn test_char_budget_keeps_first_section() {
        let config = GateConfig {
            max_context_chars: 30,
            ..GateConfig::strict()
        };
        let long = "A very long paragraph about laminating croissant dough properly.";
        let decision = RelevanceGate::new(config).decide(&[
            candidate("long", long, 0.9),
            candidate("short", "Brush with egg.", 0.8),
        ]);

        // 첫 섹션은 예산을 넘어도 포함, 이후 섹션은 제외
        assert!(decision.sufficient);
        assert_eq!(decision.sections, 1);
        assert!(decision.context.contains(long));
        assert!(!decision.context.contains("Brush with egg."));
    }

    #[test]
    fn test_char_budget_limits_sections() {
        let config = GateConfig {
            max_context_chars: 60,
            ..GateConfig::strict()
        };
        let decision = RelevanceGate::new(config).decide(&[
            candidate("a", "Cream butter and sugar.", 0.9),
            candidate("b", "Add eggs one at a time.", 0.85),
            candidate("c", "Fold in flour.", 0.8),
        ]);

        // "Context 1:\n" (11) + 23 = 34, + 2 + 11 + 23 = 70 > 60
        assert_eq!(decision.sections, 1);
        assert!(decision.context.chars().count() <= 60);
    }

    #[test]
    fn test_presets() {
        assert_eq!(GateConfig::default(), GateConfig::binary());
        assert_eq!(GateConfig::binary().threshold, 0.35);
        assert_eq!(GateConfig::strict().threshold, 0.5);
        assert_eq!(GateConfig::strict().mode, GateMode::Refuse);
        assert_eq!(GateConfig::for_lexical().threshold, LEXICAL_RELEVANCE_THRESHOLD);
        assert_eq!(GateConfig::for_hybrid().mode, GateMode::Fallback);
        assert_eq!(GateConfig::binary().with_threshold(0.7).threshold, 0.7);
    }

    #[test]
    fn test_mode_accepts_legacy_names() {
        let mode: GateMode = serde_json::from_str("\"only_relevant\"").unwrap();
        assert_eq!(mode, GateMode::Refuse);
        let mode: GateMode = serde_json::from_str("\"any_relevant\"").unwrap();
        assert_eq!(mode, GateMode::Fallback);
    }
}
