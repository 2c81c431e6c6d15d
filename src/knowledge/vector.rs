//! Vector Index - 임베딩 코사인 유사도 랭킹
//!
//! 청크 벡터를 메모리에 보관하고 쿼리 벡터와의 코사인 유사도로 정렬합니다.
//! 내구 저장소(SQLite)의 임베딩을 그대로 미러링합니다.

use std::collections::HashSet;

use crate::error::{Result, RetrievalError};

/// 기본 임베딩 차원 (OpenAI text-embedding-3-small)
pub const EMBEDDING_DIMENSION: usize = 1536;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 청크 ID
    pub chunk_id: String,
    /// 소속 문서 ID
    pub document_id: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 메모리 벡터 인덱스 (전수 탐색)
///
/// 모든 벡터는 같은 차원이어야 합니다. 첫 벡터의 길이가 인덱스 차원이 됩니다.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<VectorEntry>,
    dimension: Option<usize>,
}

impl VectorIndex {
    /// 차원을 고정하여 생성
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            entries: Vec::new(),
            dimension: Some(dimension),
        }
    }

    /// 벡터 추가
    pub fn add(&mut self, entry: VectorEntry) -> Result<()> {
        let actual = entry.embedding.len();
        match self.dimension {
            Some(expected) if expected != actual => {
                return Err(RetrievalError::DimensionMismatch { expected, actual });
            }
            Some(_) => {}
            None => self.dimension = Some(actual),
        }

        self.entries.push(entry);
        Ok(())
    }

    /// 문서에 속한 벡터 전부 삭제 (삭제 개수 반환)
    pub fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.document_id != document_id);
        before - self.entries.len()
    }

    /// 청크 ID 목록으로 삭제
    pub fn remove_chunks(&mut self, chunk_ids: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !chunk_ids.contains(&e.chunk_id));
        before - self.entries.len()
    }

    /// 전체 초기화 (고정 차원은 유지)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 코사인 유사도 검색
    ///
    /// 유사도 내림차순, 최대 `limit`개. 동점은 추가 순서를 유지합니다.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        if self.entries.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let mut scored = self
            .entries
            .iter()
            .map(|e| Ok((e.chunk_id.as_str(), cosine_similarity(query, &e.embedding)?)))
            .collect::<Result<Vec<_>>>()?;

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect())
    }

    /// 벡터 개수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어있는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 인덱스 차원
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 어느 한쪽의 크기가 0이면 0.0을 반환합니다.
///
/// # Errors
/// 두 벡터의 길이가 다르면 [`RetrievalError::DimensionMismatch`]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RetrievalError::DimensionMismatch {
            expected: b.len(),
            actual: a.len(),
        });
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot_product / (norm_a * norm_b))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chunk_id: &str, document_id: &str, embedding: Vec<f32>) -> VectorEntry {
        VectorEntry {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            embedding,
        }
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![0.3, -1.2, 4.0];
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &c).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d).unwrap() - -1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![1.0, 2.0, 3.0];
        let zero = vec![0.0; 3];
        assert_eq!(cosine_similarity(&a, &zero).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = vec![0.5, 1.5, -2.0, 0.25];
        let b = vec![1.0, -0.5, 0.75, 3.0];
        assert_eq!(
            cosine_similarity(&a, &b).unwrap(),
            cosine_similarity(&b, &a).unwrap()
        );
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        let result = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!(matches!(
            result,
            Err(RetrievalError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_search_two_orthogonal_chunks() {
        let mut index = VectorIndex::default();
        index.add(entry("c1", "d1", vec![1.0, 0.0])).unwrap();
        index.add(entry("c2", "d1", vec![0.0, 1.0])).unwrap();

        let results = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], ("c1".to_string(), 1.0));
        assert_eq!(results[1], ("c2".to_string(), 0.0));

        let results = index.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(results, vec![("c1".to_string(), 1.0)]);
    }

    #[test]
    fn test_zero_vector_never_outranks_match() {
        let mut index = VectorIndex::with_dimension(3);
        index.add(entry("degraded", "d1", vec![0.0; 3])).unwrap();
        index.add(entry("real", "d2", vec![0.2, 0.9, 0.1])).unwrap();

        let results = index.search(&[0.1, 1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].0, "real");
        assert_eq!(results[1], ("degraded".to_string(), 0.0));
    }

    #[test]
    fn test_add_rejects_wrong_dimension() {
        let mut index = VectorIndex::with_dimension(2);
        let err = index.add(entry("c1", "d1", vec![1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_search_with_wrong_query_dimension() {
        let mut index = VectorIndex::default();
        index.add(entry("c1", "d1", vec![1.0, 0.0])).unwrap();
        assert_eq!(index.dimension(), Some(2));
        assert!(index.search(&[1.0, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_remove_document() {
        let mut index = VectorIndex::default();
        index.add(entry("a0", "a", vec![1.0, 0.0])).unwrap();
        index.add(entry("b0", "b", vec![0.0, 1.0])).unwrap();
        index.add(entry("a1", "a", vec![0.7, 0.7])).unwrap();

        assert_eq!(index.remove_document("a"), 2);
        assert_eq!(index.len(), 1);

        let results = index.search(&[1.0, 0.0], 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "b0");
    }

    #[test]
    fn test_remove_chunks_and_clear() {
        let mut index = VectorIndex::with_dimension(2);
        index.add(entry("a0", "a", vec![1.0, 0.0])).unwrap();
        index.add(entry("a1", "a", vec![0.0, 1.0])).unwrap();

        let ids: HashSet<String> = ["a0".to_string()].into_iter().collect();
        assert_eq!(index.remove_chunks(&ids), 1);

        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.dimension(), Some(2));
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::default();
        assert!(index.search(&[1.0], 3).unwrap().is_empty());
    }
}
