//! Lexical Index - BM25 통계 랭킹
//!
//! 청크 텍스트를 토큰화하여 BM25 점수로 랭킹합니다.
//! IDF 테이블과 평균 길이는 추가/삭제마다 전체 코퍼스에서 다시 계산합니다.
//! (O(N·평균토큰수) - 작은 코퍼스 가정, 대규모에서는 병목)
//!
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 단어/공백이 아닌 문자
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid token regex"));

// ============================================================================
// Parameters
// ============================================================================

/// IDF 계산 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdfFormula {
    /// `ln((N - df + 0.5) / (df + 0.5))`
    ///
    /// 코퍼스 절반 이상에 등장하는 단어는 0 이하가 됩니다.
    Classic,
    /// `ln(1 + (N - df + 0.5) / (df + 0.5))` (항상 양수)
    Smoothed,
}

impl IdfFormula {
    /// 문서 수 `n`, 문서 빈도 `df`로 IDF 계산
    pub fn compute(self, n: usize, df: usize) -> f64 {
        let ratio = (n as f64 - df as f64 + 0.5) / (df as f64 + 0.5);
        match self {
            IdfFormula::Classic => ratio.ln(),
            IdfFormula::Smoothed => (1.0 + ratio).ln(),
        }
    }
}

/// BM25 튜닝 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// TF 포화 계수
    pub k1: f64,
    /// 길이 정규화 계수
    pub b: f64,
    /// IDF 계산 방식
    pub idf: IdfFormula,
}

/// k1 1.2, b 0.75, `IdfFormula::Smoothed` (`ln(1 + (N-df+0.5)/(df+0.5))`).
///
/// 말뭉치 절반에 등장하는 단어도 양의 IDF를 받습니다.
/// 고전 공식 `ln((N-df+0.5)/(df+0.5))`이 필요하면 [`Bm25Params::classic`]을 쓰세요.
impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            idf: IdfFormula::Smoothed,
        }
    }
}

impl Bm25Params {
    /// 고전 IDF 공식 사용
    pub fn classic() -> Self {
        Self {
            idf: IdfFormula::Classic,
            ..Self::default()
        }
    }
}

// ============================================================================
// Bm25Index
// ============================================================================

#[derive(Debug, Clone)]
struct IndexedEntry {
    id: String,
    content: String,
    token_count: usize,
    term_freqs: HashMap<String, usize>,
}

/// BM25 인덱스
///
/// 엔트리는 추가 순서를 유지하며, 동점은 먼저 추가된 엔트리가 앞섭니다.
/// 동시 접근 제어는 소유자(검색 전략)가 담당합니다.
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    params: Bm25Params,
    entries: Vec<IndexedEntry>,
    avg_doc_len: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    /// 파라미터를 지정하여 생성
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// 엔트리 추가
    pub fn add(&mut self, id: impl Into<String>, content: &str) {
        self.push_entry(id.into(), content);
        self.recompute_statistics();
    }

    /// 여러 엔트리를 추가하고 통계는 한 번만 재계산
    pub fn extend<I, S>(&mut self, items: I)
    where
        I: IntoIterator<Item = (S, String)>,
        S: Into<String>,
    {
        for (id, content) in items {
            self.push_entry(id.into(), &content);
        }
        self.recompute_statistics();
    }

    /// ID로 엔트리 삭제
    pub fn remove(&mut self, id: &str) -> bool {
        self.retain(|entry_id| entry_id != id) > 0
    }

    /// 조건을 만족하지 않는 엔트리 삭제 (삭제 개수 반환)
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|e| keep(&e.id));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.recompute_statistics();
        }
        removed
    }

    /// 여러 ID를 한 번에 삭제
    pub fn remove_many(&mut self, ids: &HashSet<String>) -> usize {
        self.retain(|id| !ids.contains(id))
    }

    /// 전체 초기화
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recompute_statistics();
    }

    /// BM25 검색
    ///
    /// 점수 내림차순, 최대 `limit`개. 점수가 0 이하인 엔트리는 제외됩니다.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(String, f64)> {
        if self.entries.is_empty() || limit == 0 {
            return vec![];
        }

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return vec![];
        }

        let Bm25Params { k1, b, .. } = self.params;

        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let length_ratio = if self.avg_doc_len > 0.0 {
                    entry.token_count as f64 / self.avg_doc_len
                } else {
                    0.0
                };

                let score: f64 = query_tokens
                    .iter()
                    .filter_map(|term| {
                        let tf = *entry.term_freqs.get(term)? as f64;
                        let idf = self.idf.get(term).copied().unwrap_or(0.0);
                        Some(idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * length_ratio)))
                    })
                    .sum();

                (score > 0.0).then_some((i, score))
            })
            .collect();

        // 안정 정렬: 동점은 추가 순서 유지
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(i, score)| (self.entries[i].id.clone(), score))
            .collect()
    }

    /// 엔트리 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어있는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 엔트리당 평균 토큰 수
    pub fn avg_doc_len(&self) -> f64 {
        self.avg_doc_len
    }

    /// 단어의 IDF (인덱스에 없는 단어는 None)
    pub fn idf(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    /// 엔트리 존재 여부
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// 엔트리 원문
    pub fn content(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.content.as_str())
    }

    /// 파라미터
    pub fn params(&self) -> Bm25Params {
        self.params
    }

    fn push_entry(&mut self, id: String, content: &str) {
        let tokens = tokenize(content);
        let mut term_freqs = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }

        self.entries.push(IndexedEntry {
            id,
            content: content.to_string(),
            token_count: tokens.len(),
            term_freqs,
        });
    }

    /// 평균 길이 + IDF 테이블 전체 재계산
    fn recompute_statistics(&mut self) {
        self.idf.clear();

        if self.entries.is_empty() {
            self.avg_doc_len = 0.0;
            return;
        }

        let n = self.entries.len();
        let total: usize = self.entries.iter().map(|e| e.token_count).sum();
        self.avg_doc_len = total as f64 / n as f64;

        // term_freqs 키는 엔트리 내 고유 단어
        let mut doc_freqs: HashMap<&str, usize> = HashMap::new();
        for entry in &self.entries {
            for term in entry.term_freqs.keys() {
                *doc_freqs.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        let formula = self.params.idf;
        self.idf = doc_freqs
            .into_iter()
            .map(|(term, df)| (term.to_string(), formula.compute(n, df)))
            .collect();
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// 토큰화: 소문자 변환 → 비단어 문자를 공백으로 → 공백 분할
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    NON_WORD
        .replace_all(&lowered, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
