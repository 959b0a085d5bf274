//! CLI 모듈
//!
//! sop-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::collector::{CollectionStats, FileCollector};
use crate::config::{EmbedMode, RagConfig};
use crate::generation::ChatTurn;
use crate::knowledge::{
    AnswerStream, Query, ResponseEvent, RetrievalEngine, RetrievalPath, RetrievalResult,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "sop-rag")]
#[command(version, about = "SOP 문서 하이브리드 검색 + 답변 생성", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub options: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// 모든 명령에 공통인 설정 덮어쓰기
#[derive(Args, Default)]
pub struct GlobalOptions {
    /// 인덱스 디렉토리
    #[arg(long, global = true)]
    pub index_dir: Option<PathBuf>,

    /// Ollama 서버 주소
    #[arg(long, global = true)]
    pub ollama_host: Option<String>,

    /// 임베딩 모델
    #[arg(long, global = true)]
    pub embed_model: Option<String>,

    /// 답변 생성 모델
    #[arg(long, global = true)]
    pub llm_model: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 문서 폴더를 인덱싱 (기존 인덱스 교체)
    Index {
        /// 문서 폴더 (기본: 데이터 디렉토리의 documents)
        #[arg(short, long)]
        docs: Option<PathBuf>,

        /// 임베딩 방식 (per-chunk | batch)
        #[arg(long)]
        embed_mode: Option<String>,

        /// 임베딩 실패 청크가 하나라도 있으면 중단
        #[arg(long)]
        strict: bool,
    },

    /// 질문 하나에 답변 (NDJSON 이벤트 출력)
    Ask {
        /// 질문
        question: String,

        /// 사람이 읽기 좋은 형태로 출력
        #[arg(long)]
        pretty: bool,
    },

    /// 대화형 질의 (exit / quit 로 종료)
    Chat,

    /// 상태 확인
    Status,

    /// 저장된 인덱스 삭제
    Clear,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli.options);

    match cli.command {
        Commands::Index {
            docs,
            embed_mode,
            strict,
        } => cmd_index(config, docs, embed_mode, strict).await,
        Commands::Ask { question, pretty } => cmd_ask(config, &question, pretty).await,
        Commands::Chat => cmd_chat(config).await,
        Commands::Status => cmd_status(config).await,
        Commands::Clear => cmd_clear(config).await,
    }
}

/// 기본값 → 환경변수 → CLI 플래그
fn resolve_config(options: &GlobalOptions) -> RagConfig {
    let mut config = RagConfig::from_env();

    if let Some(dir) = &options.index_dir {
        config.index_dir = dir.clone();
    }
    if let Some(host) = &options.ollama_host {
        config.ollama_host = host.clone();
    }
    if let Some(model) = &options.embed_model {
        config.embed_model = model.clone();
    }
    if let Some(model) = &options.llm_model {
        config.llm_model = model.clone();
    }

    config
}

/// 엔진 생성 + 디스크 인덱스 로드
async fn open_engine(config: RagConfig) -> Result<RetrievalEngine> {
    let engine = RetrievalEngine::from_config(config).context("엔진 초기화 실패")?;

    // stdout은 NDJSON 전용이므로 안내는 stderr로
    if let Err(e) = engine.load_from_disk().await {
        eprintln!("[!] 인덱스를 불러오지 못했습니다: {}", e);
        eprintln!("    먼저 `sop-rag index --docs <폴더>`를 실행하세요.");
    }

    Ok(engine)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱싱 명령어 (index)
async fn cmd_index(
    mut config: RagConfig,
    docs: Option<PathBuf>,
    embed_mode: Option<String>,
    strict: bool,
) -> Result<()> {
    if let Some(docs) = docs {
        config.docs_dir = docs;
    }
    if let Some(mode) = embed_mode {
        config.embed_mode = match EmbedMode::parse(&mode) {
            Some(m) => m,
            None => bail!("알 수 없는 임베딩 방식: {} (per-chunk | batch)", mode),
        };
    }
    if strict {
        config.allow_partial_embeddings = false;
    }

    let files = FileCollector::with_defaults()
        .collect_directory(&config.docs_dir)
        .context("문서 폴더 수집 실패")?;
    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일 ({})", stats.total_files, config.docs_dir.display());
    println!(
        "    텍스트: {}, PDF: {}, Word: {}",
        stats.text_files, stats.pdf_files, stats.word_files
    );
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    if stats.word_files > 0 {
        println!(
            "[!] Word 문서 {} 개는 텍스트/PDF로 변환 후 다시 인덱싱하세요.",
            stats.word_files
        );
    }
    println!();

    println!("[*] 인덱싱 중 (모델: {})...", config.embed_model);
    let engine = RetrievalEngine::from_config(config).context("엔진 초기화 실패")?;
    let summary = engine
        .spawn_rebuild()
        .await
        .context("인덱싱 태스크 실패")?
        .map_err(|e| anyhow::anyhow!("{} 단계에서 실패: {}", e.stage(), e))?;

    println!(
        "[OK] 완료: 파일 {} (실패 {}), 요소 {}, 청크 {}",
        summary.files, summary.failed_files, summary.documents, summary.chunks
    );
    if summary.skipped > 0 {
        println!("[!] 임베딩 실패로 건너뛴 청크: {}", summary.skipped);
    }

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(config: RagConfig, question: &str, pretty: bool) -> Result<()> {
    let engine = open_engine(config).await?;
    let stream = engine.answer(Query::new(question));

    if pretty {
        print_pretty(stream).await?;
    } else {
        print_ndjson(stream, &mut tokio::io::stdout()).await?;
    }

    Ok(())
}

/// 대화형 명령어 (chat)
async fn cmd_chat(config: RagConfig) -> Result<()> {
    let engine = open_engine(config).await?;
    let mut history: Vec<ChatTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("[*] 질문을 입력하세요 (exit / quit 로 종료)");

    loop {
        print!("\n> ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        let result = match engine.retrieve(question).await {
            Ok(result) => result,
            Err(e) => {
                println!("[!] {}", e);
                continue;
            }
        };
        print_audit_trail(&result);

        let query = Query::new(question).with_history(history.clone());
        let answer = print_pretty(engine.answer_with(result, query)).await?;

        history.push(ChatTurn {
            role: "user".to_string(),
            content: question.to_string(),
        });
        history.push(ChatTurn {
            role: "assistant".to_string(),
            content: answer,
        });
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("sop-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 인덱스 디렉토리: {}", config.index_dir.display());
    println!("[*] 문서 디렉토리: {}", config.docs_dir.display());
    println!(
        "[*] Ollama: {} (임베딩: {}, 생성: {})",
        config.ollama_host, config.embed_model, config.llm_model
    );

    let engine = RetrievalEngine::from_config(config).context("엔진 초기화 실패")?;
    match engine.load_from_disk().await {
        Ok(()) => {
            let stats = engine.stats();
            println!(
                "[OK] 인덱스: 청크 {}, 출처 {}, 엔티티 값 {}",
                stats.chunk_count, stats.source_count, stats.entity_values
            );
            if let (Some(model), Some(dim)) = (&stats.embedding_model, stats.dimension) {
                println!("     임베딩: {} ({}차원)", model, dim);
            }
            if let Some(built_at) = stats.built_at {
                println!("     빌드: {}", built_at.format("%Y-%m-%d %H:%M"));
            }
        }
        Err(e) => println!("[!] 인덱스: {}", e),
    }

    Ok(())
}

/// 삭제 명령어 (clear)
async fn cmd_clear(config: RagConfig) -> Result<()> {
    let dir = config.index_dir.clone();
    let engine = RetrievalEngine::from_config(config).context("엔진 초기화 실패")?;
    engine.clear().await.context("인덱스 삭제 실패")?;
    println!("[OK] 인덱스 삭제됨: {}", dir.display());
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

/// 이벤트를 한 줄에 하나씩 NDJSON으로 출력 (`to_ndjson`이 개행 포함)
async fn print_ndjson<W>(mut stream: AnswerStream, out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = stream.next().await {
        let line = event.to_ndjson().context("이벤트 직렬화 실패")?;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}

/// 답변을 이어서 출력하고 출처를 붙임 (답변 전문 반환)
async fn print_pretty(mut stream: AnswerStream) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    let mut answer = String::new();

    while let Some(event) = stream.next().await {
        match event {
            ResponseEvent::Fragment(text) => {
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await?;
                answer.push_str(&text);
            }
            ResponseEvent::Citations(sources) => {
                println!();
                if !sources.is_empty() {
                    println!("\n[출처]");
                    for source in sources {
                        println!("  - {}", source);
                    }
                }
            }
            ResponseEvent::Error(message) => {
                println!("\n[!] {}", message);
            }
        }
    }

    Ok(answer)
}

/// 검색된 섹션 감사 출력
fn print_audit_trail(result: &RetrievalResult) {
    let path = match result.path {
        RetrievalPath::Metadata => "METADATA",
        RetrievalPath::Semantic => "SEMANTIC",
    };

    println!("\n--- Retrieved Sections for Audit [{}] ---", path);
    if !result.entities.is_empty() {
        println!("    엔티티: {}", result.entities.join(", "));
    }
    for (i, retrieved) in result.chunks.iter().enumerate() {
        let chunk = &retrieved.chunk;
        let score = retrieved
            .score
            .map(|s| format!(" [점수: {:.4}]", s))
            .unwrap_or_default();
        println!("{}. {}{}", i + 1, chunk.source_path, score);
        if let Some(heading) = &chunk.heading {
            println!("   섹션: {}", heading);
        }
        println!("   내용: {}", truncate_text(&chunk.text, 200));
    }
    println!("---\n");
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
