//! 임베딩 모듈 - OpenAI API를 통한 텍스트 벡터화
//!
//! 텍스트를 벡터로 변환하는 임베딩 프로바이더와,
//! 프로바이더 실패 시 제로 벡터로 대체하는 래퍼를 제공합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = FallbackEmbedder::new(Arc::new(OpenAiEmbedding::from_env()?));
//! let vector = embedder.embed_or_zero("How do I temper chocolate?").await;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 고정 길이 벡터로 변환합니다. 실패할 수 있으며 재시도 계약은 없습니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// OpenAI 임베딩 API 엔드포인트
/// source: https://platform.openai.com/docs/api-reference/embeddings
const OPENAI_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

/// 기본 임베딩 모델 (가장 저렴한 모델)
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 1536;

/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    client: reqwest::Client,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedding {
    /// 새 인스턴스 생성 (기본 모델/차원)
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(api_key, DEFAULT_MODEL, DEFAULT_DIMENSION)
    }

    /// 모델과 차원을 지정하여 생성
    pub fn with_model(api_key: String, model: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            model: model.to_string(),
            dimension,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> Result<Self> {
        Self::new(get_api_key()?)
    }

    /// 환경변수에서 API 키를 읽어 차원 지정하여 생성
    pub fn from_env_with_dimension(dimension: usize) -> Result<Self> {
        Self::with_model(get_api_key()?, DEFAULT_MODEL, dimension)
    }
}

/// OpenAI API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

/// OpenAI API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI API 에러 응답
#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimension,
        };

        let response = self
            .client
            .post(OPENAI_EMBED_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<OpenAiError>(&body) {
                anyhow::bail!(
                    "OpenAI API error ({} {}): {}",
                    status,
                    error.error.kind,
                    error.error.message
                );
            }
            anyhow::bail!("OpenAI API error ({}): {}", status, body);
        }

        let parsed: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no data"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// FallbackEmbedder
// ============================================================================

/// 실패 시 제로 벡터로 대체하는 임베딩 래퍼
///
/// 프로바이더 에러, 타임아웃, 잘못된 길이의 응답은 모두 같은 경로로 처리합니다.
/// 제로 벡터는 코사인 유사도가 항상 0이므로 실제 매치보다 위에 오지 않습니다.
pub struct FallbackEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    degraded: AtomicUsize,
}

impl FallbackEmbedder {
    /// 프로바이더를 감싸서 생성
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = provider.dimension();
        Self {
            provider,
            dimension,
            degraded: AtomicUsize::new(0),
        }
    }

    /// 임베딩 (실패 시 제로 벡터)
    pub async fn embed_or_zero(&self, text: &str) -> Vec<f32> {
        let failure = match self.provider.embed(text).await {
            Ok(vector) if vector.len() == self.dimension => return vector,
            Ok(vector) => RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            },
            Err(e) => RetrievalError::ProviderFailure(format!("{:#}", e)),
        };

        self.degraded.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "Embedding degraded to zero vector ({}): {}",
            self.provider.name(),
            failure
        );
        vec![0.0; self.dimension]
    }

    /// 임베딩 차원
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 프로바이더 이름
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 제로 벡터로 대체된 횟수
    pub fn degraded_count(&self) -> usize {
        self.degraded.load(Ordering::Relaxed)
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 환경변수
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// API 키 로드 (환경변수에서)
pub fn get_api_key() -> Result<String> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.is_empty() => {
            tracing::debug!("Using API key from {}", API_KEY_ENV);
            Ok(key)
        }
        _ => anyhow::bail!(
            "API key not found. Set {} environment variable.\n\
             Get your API key at: https://platform.openai.com/api-keys",
            API_KEY_ENV
        ),
    }
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    std::env::var(API_KEY_ENV)
        .map(|key| !key.is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 프로바이더 생성 (차원 지정)
pub fn create_embedder(dimension: usize) -> Result<FallbackEmbedder> {
    let provider = OpenAiEmbedding::from_env_with_dimension(dimension)?;
    tracing::info!(
        "Using OpenAI embedding {} (dimension: {})",
        provider.name(),
        provider.dimension()
    );
    Ok(FallbackEmbedder::new(Arc::new(provider)))
}

// ============================================================================
// Tests
// ============================================================================
