//! CLI 모듈
//!
//! culinary-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{RetrievalConfig, RetrievalMode};
use crate::embedding::{create_embedder, has_api_key, API_KEY_ENV};
use crate::knowledge::{
    compose_prompt, get_data_dir, KnowledgeStore, PromptPlan, RetrievalService,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "culinary-rag")]
#[command(version, about = "요리 지식 검색 엔진", long_about = None)]
pub struct Cli {
    /// 설정 파일 (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 검색 모드 (lexical | semantic | hybrid)
    #[arg(long, global = true)]
    pub mode: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 또는 파일을 지식베이스에 추가
    Ingest {
        /// 문서 제목
        #[arg(long)]
        title: String,

        /// 직접 입력할 텍스트
        #[arg(short, long, conflicts_with = "file")]
        text: Option<String>,

        /// 수집할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// 지식베이스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한 (기본: 설정값)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// 질문에 대한 프롬프트 조립 (근거 없으면 고정 응답)
    Ask {
        /// 질문
        question: String,

        /// 검색 결과 개수 제한 (기본: 설정값)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// 저장된 문서 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID
        #[arg(short, long)]
        id: String,
    },

    /// 모든 문서와 인덱스 삭제
    Reset {
        /// 확인 없이 실행
        #[arg(long)]
        yes: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mode = cli
        .mode
        .as_deref()
        .map(str::parse::<RetrievalMode>)
        .transpose()?;
    let config = load_config(cli.config.as_deref(), mode)?;

    match cli.command {
        Commands::Ingest { title, text, file } => cmd_ingest(config, &title, text, file).await,
        Commands::Query { query, limit } => cmd_query(config, &query, limit).await,
        Commands::Ask { question, limit } => cmd_ask(config, &question, limit).await,
        Commands::List { limit } => cmd_list(config, limit),
        Commands::Delete { id } => cmd_delete(config, &id).await,
        Commands::Reset { yes } => cmd_reset(config, yes).await,
        Commands::Status => cmd_status(config).await,
    }
}

/// 설정 로드 (파일 → 환경변수 → --mode → API 키 확인)
fn load_config(path: Option<&Path>, mode: Option<RetrievalMode>) -> Result<RetrievalConfig> {
    let config = match path {
        Some(path) => RetrievalConfig::load(path)?,
        None => RetrievalConfig::default(),
    }
    .apply_env();

    let (config, warning) = resolve_mode(config, mode, has_api_key());
    if let Some(warning) = warning {
        println!("[!] {}", warning);
    }
    Ok(config)
}

/// 검색 모드 결정
///
/// 게이트가 기본값이면 모드의 점수 척도에 맞는 게이트로 바꿉니다.
/// 임베딩 모드인데 API 키가 없으면 렉시컬 모드로 내려갑니다.
fn resolve_mode(
    mut config: RetrievalConfig,
    mode: Option<RetrievalMode>,
    api_key: bool,
) -> (RetrievalConfig, Option<String>) {
    if let Some(mode) = mode {
        config = config.with_mode(mode);
    }

    if !config.mode.needs_embeddings() || api_key {
        return (config, None);
    }

    let warning = format!(
        "API 키({})가 없어 {:?} 대신 lexical 모드로 검색합니다.",
        API_KEY_ENV, config.mode
    );
    (config.with_mode(RetrievalMode::Lexical), Some(warning))
}

/// 기본 저장소로 서비스 생성
fn open_service(config: RetrievalConfig) -> Result<RetrievalService> {
    let store = KnowledgeStore::open_default().context("KnowledgeStore 열기 실패")?;

    let embedder = if config.mode.needs_embeddings() {
        Some(Arc::new(
            create_embedder(config.embedding_dimension).context("임베딩 프로바이더 생성 실패")?,
        ))
    } else {
        None
    };

    RetrievalService::new(Arc::new(store), config, embedder).context("검색 서비스 생성 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(
    config: RetrievalConfig,
    title: &str,
    text: Option<String>,
    file: Option<PathBuf>,
) -> Result<()> {
    let content = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => {
            println!("[*] 파일 읽는 중: {}", path.display());
            std::fs::read_to_string(&path)
                .with_context(|| format!("파일 읽기 실패: {}", path.display()))?
        }
        (None, None) => bail!("--text 또는 --file 중 하나를 지정해야 합니다"),
    };

    let service = open_service(config)?;

    println!("[*] 문서 청킹 및 색인 중... ({:?})", service.config().mode);
    let doc_id = service
        .ingest(title, &content)
        .await
        .context("문서 추가 실패")?;

    let stats = service.stats().context("통계 조회 실패")?;
    println!("[OK] 문서가 추가되었습니다 (ID: {})", doc_id);
    println!("     제목: {}", title);
    if stats.degraded_embeddings > 0 {
        println!(
            "[!] 임베딩 실패 {} 건은 제로 벡터로 저장되었습니다",
            stats.degraded_embeddings
        );
    }

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(config: RetrievalConfig, query: &str, limit: Option<usize>) -> Result<()> {
    let limit = limit.unwrap_or(config.default_limit);
    let service = open_service(config)?;

    println!("[*] 검색 중: \"{}\"", query);

    let results = service.query(query, limit).await;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{}] [점수: {:.4}] Doc {} / Chunk #{}",
            i + 1,
            result.source.tag(),
            result.score,
            result.chunk.document_id,
            result.chunk.position
        );
        println!("   내용: {}", truncate_text(&result.chunk.content, 200));
        println!();
    }

    Ok(())
}

/// 질문 명령어 (ask)
///
/// 검색 → 게이트 판정 → 생성 모델에 보낼 프롬프트(또는 고정 응답) 출력
async fn cmd_ask(config: RetrievalConfig, question: &str, limit: Option<usize>) -> Result<()> {
    let limit = limit.unwrap_or(config.default_limit);
    let service = open_service(config)?;

    let retrieval = service.retrieve(question, limit).await;
    let decision = &retrieval.decision;

    match decision.top_score {
        Some(top) => println!(
            "[*] 후보 {} 건, 최고 점수 {:.4}, 임계값 {:.4}",
            retrieval.candidates.len(),
            top,
            service.config().gate.threshold
        ),
        None => println!("[*] 검색 후보 없음"),
    }

    match compose_prompt(decision, question) {
        PromptPlan::Grounded(prompt) => {
            println!("[OK] 근거 {} 섹션으로 프롬프트를 조립했습니다:\n", decision.sections);
            println!("{}", prompt);
        }
        PromptPlan::Refusal(prompt) => {
            println!("[!] 관련 지식이 없습니다. 거절 안내 프롬프트:\n");
            println!("{}", prompt);
        }
        PromptPlan::Fallback(message) => {
            println!("[!] 관련 지식이 부족합니다. 고정 응답:\n");
            println!("{}", message);
        }
    }

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(config: RetrievalConfig, limit: usize) -> Result<()> {
    let service = open_service(config)?;
    let docs = service
        .list_documents(limit)
        .context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        println!("  {}  {}", doc.id, truncate_text(&doc.title, 40));
        println!(
            "        {} | {} chars",
            doc.created_at.format("%Y-%m-%d %H:%M"),
            doc.content.chars().count()
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: RetrievalConfig, id: &str) -> Result<()> {
    let service = open_service(config)?;

    if service.delete(id).await.context("문서 삭제 실패")? {
        println!("[OK] 문서 {} 삭제됨 (청크 포함)", id);
    } else {
        println!("[!] ID {}인 문서를 찾을 수 없습니다", id);
    }

    Ok(())
}

/// 초기화 명령어 (reset)
async fn cmd_reset(config: RetrievalConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!("모든 문서와 인덱스가 삭제됩니다. 계속하려면 --yes를 지정하세요");
    }

    let service = open_service(config)?;
    let deleted = service.reset().await.context("초기화 실패")?;

    println!("[OK] 문서 {} 건을 삭제하고 인덱스를 비웠습니다", deleted);
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: RetrievalConfig) -> Result<()> {
    println!("culinary-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export {}=your-key", API_KEY_ENV);
    }

    println!(
        "[*] 검색 모드: {:?} | 게이트: {} (임계값 {})",
        config.mode,
        config.gate_label(),
        config.gate.threshold
    );

    let service = match open_service(config) {
        Ok(service) => service,
        Err(e) => {
            println!("[!] 검색 서비스 열기 실패: {:#}", e);
            return Ok(());
        }
    };

    service.initialize().await;
    match service.stats() {
        Ok(stats) => {
            println!("[OK] 인덱스 상태: {}", stats.state.as_str());
            println!(
                "[OK] 저장된 문서: {} 건 / 청크: {} 개 (임베딩 {} 개)",
                stats.document_count, stats.chunk_count, stats.embedded_chunk_count
            );
            println!(
                "     총 콘텐츠: {}",
                format_bytes(stats.total_content_bytes)
            );
            println!(
                "     렉시컬 인덱스: {} 청크 (평균 {:.1} 토큰) | 벡터 인덱스: {} 청크",
                stats.lexical_entries, stats.avg_chunk_tokens, stats.vector_entries
            );
        }
        Err(e) => {
            println!("[!] 통계 조회 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{GateConfig, GateMode};

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("Whisk eggs", 20), "Whisk eggs");
        assert_eq!(truncate_text("Whisk the eggs", 5), "Whisk...");
        assert_eq!(truncate_text("Whisk\nthe eggs", 20), "Whisk the eggs");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("김치찌개 끓이기", 4), "김치찌개...");
    }

    #[test]
    fn test_resolve_mode_without_api_key_falls_back() {
        let (config, warning) =
            resolve_mode(RetrievalConfig::default(), Some(RetrievalMode::Hybrid), false);
        assert_eq!(config.mode, RetrievalMode::Lexical);
        assert_eq!(config.gate, GateConfig::for_lexical());
        assert!(warning.is_some());
    }

    #[test]
    fn test_resolve_mode_hybrid_switches_gate() {
        let (config, warning) =
            resolve_mode(RetrievalConfig::default(), Some(RetrievalMode::Hybrid), true);
        assert_eq!(config.mode, RetrievalMode::Hybrid);
        assert_eq!(config.gate, GateConfig::for_hybrid());
        assert!(warning.is_none());
    }

    #[test]
    fn test_resolve_mode_semantic_uses_cosine_gate() {
        let (config, warning) =
            resolve_mode(RetrievalConfig::default(), Some(RetrievalMode::Semantic), true);
        assert_eq!(config.gate, GateConfig::binary());
        assert!(warning.is_none());

        let (lexical, _) = resolve_mode(RetrievalConfig::default(), None, false);
        assert_eq!(lexical.gate, GateConfig::for_lexical());
    }

    #[test]
    fn test_resolve_mode_keeps_custom_gate() {
        let base = RetrievalConfig {
            gate: GateConfig::strict(),
            ..RetrievalConfig::default()
        };
        let (config, _) = resolve_mode(base, Some(RetrievalMode::Semantic), true);
        assert_eq!(config.mode, RetrievalMode::Semantic);
        assert_eq!(config.gate.mode, GateMode::Refuse);
        assert_eq!(config.gate.threshold, 0.5);
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "culinary-rag",
            "query",
            "how long to rest dough",
            "--mode",
            "hybrid",
            "--limit",
            "7",
        ]);
        assert_eq!(cli.mode.as_deref(), Some("hybrid"));
        match cli.command {
            Commands::Query { query, limit } => {
                assert_eq!(query, "how long to rest dough");
                assert_eq!(limit, Some(7));
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_cli_ingest_requires_title() {
        assert!(Cli::try_parse_from(["culinary-rag", "ingest", "--text", "Boil water."]).is_err());
        assert!(Cli::try_parse_from([
            "culinary-rag",
            "ingest",
            "--title",
            "Pasta",
            "--text",
            "Boil water.",
            "--file",
            "pasta.txt",
        ])
        .is_err());
    }
}
