use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pdf_qa_core::{
    ingest_folder_best_effort, Answer, CharacterNgramEmbedder, ChatCompletionsClient,
    ChunkingConfig, Embedder, EmbeddingConfig, GenerationConfig, HttpEmbedder,
    InteractionLogger, Metric, QaConfig, QaEngine, RetryPolicy, SessionRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    embedding: EmbeddingArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Deterministic word-trigram vectors computed locally.
    Local,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

#[derive(Args)]
struct EmbeddingArgs {
    /// Embedder used both to build and to query indexes.
    #[arg(long, value_enum, default_value = "local", env = "PDF_QA_EMBEDDER")]
    embedder: EmbedderKind,

    /// Base URL of the embeddings API.
    #[arg(long, default_value = "https://api.openai.com/v1", env = "PDF_QA_EMBEDDING_URL")]
    embedding_url: String,

    /// Embedding model name.
    #[arg(long, default_value = "text-embedding-3-small", env = "PDF_QA_EMBEDDING_MODEL")]
    embedding_model: String,

    /// API key for the embeddings API.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Output dimensionality requested from the embeddings API.
    #[arg(long, default_value = "384")]
    embedding_dimensions: usize,

    /// Per-request timeout for the embeddings API, in seconds.
    #[arg(long, default_value = "30")]
    embedding_timeout_secs: u64,
}

#[derive(Args)]
struct AnswerArgs {
    /// Base URL of the chat completions API.
    #[arg(long, default_value = "https://api.groq.com/openai/v1", env = "PDF_QA_BASE_URL")]
    base_url: String,

    /// Chat model name.
    #[arg(long, default_value = "llama-3.3-70b-versatile", env = "PDF_QA_MODEL")]
    model: String,

    /// API key for the chat completions API.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Number of chunks retrieved per question.
    #[arg(long, default_value = "4")]
    top_k: usize,

    /// Best-match distance above which a question is treated as off-topic.
    #[arg(long, default_value = "1.4")]
    relevance_threshold: f32,

    /// Disable the relevance gate.
    #[arg(long, default_value_t = false)]
    no_relevance_gate: bool,

    /// Attempts per generation call, the first included.
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Per-request timeout for the chat API, in seconds.
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// JSON file that records every answered question.
    #[arg(long, default_value = "data/analytics/interactions.json", env = "PDF_QA_LOG_FILE")]
    log_file: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Index one PDF, or every PDF under a folder, one index per document.
    Ingest {
        /// A single PDF file.
        #[arg(long, conflicts_with = "folder", required_unless_present = "folder")]
        pdf: Option<PathBuf>,
        /// Folder searched recursively for PDFs.
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Directory that holds the per-document indexes.
        #[arg(long, default_value = "data/indexes")]
        index_root: PathBuf,
        /// Use cosine distance instead of squared Euclidean.
        #[arg(long, default_value_t = false)]
        cosine: bool,
        #[arg(long, default_value = "800")]
        max_chars: usize,
        #[arg(long, default_value = "120")]
        overlap_chars: usize,
        #[arg(long, default_value = "50")]
        min_chars: usize,
    },
    /// Answer one question from an index.
    Ask {
        /// Index directory written by `ingest`.
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        question: String,
        #[command(flatten)]
        answer: AnswerArgs,
    },
    /// Interactive session over one index, reading questions from stdin.
    Chat {
        #[arg(long)]
        index: PathBuf,
        #[command(flatten)]
        answer: AnswerArgs,
    },
}

fn build_embedder(args: &EmbeddingArgs) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match args.embedder {
        EmbedderKind::Local => Arc::new(CharacterNgramEmbedder::default()),
        EmbedderKind::Http => Arc::new(
            HttpEmbedder::new(EmbeddingConfig {
                base_url: args.embedding_url.clone(),
                model: args.embedding_model.clone(),
                api_key: args.embedding_api_key.clone(),
                dimensions: args.embedding_dimensions,
                request_timeout: Duration::from_secs(args.embedding_timeout_secs),
            })
            .context("invalid embeddings configuration")?,
        ),
    };
    Ok(embedder)
}

fn build_engine(embedder: Arc<dyn Embedder>, args: &AnswerArgs) -> anyhow::Result<QaEngine> {
    let generator = ChatCompletionsClient::new(GenerationConfig {
        base_url: args.base_url.clone(),
        model: args.model.clone(),
        api_key: args.api_key.clone(),
        request_timeout: Duration::from_secs(args.timeout_secs),
        ..GenerationConfig::default()
    })
    .context("invalid chat completions configuration")?;

    if args.api_key.is_none() {
        warn!("no API key set for the chat completions API; requests will likely be rejected");
    }

    let config = QaConfig {
        top_k: args.top_k,
        relevance_threshold: (!args.no_relevance_gate).then_some(args.relevance_threshold),
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            attempt_timeout: Duration::from_secs(args.timeout_secs.saturating_mul(2)),
            ..RetryPolicy::default()
        },
        ..QaConfig::default()
    };

    let engine = QaEngine::new(embedder, Arc::new(generator), config)
        .context("invalid question-answering configuration")?
        .with_logger(Arc::new(InteractionLogger::new(&args.log_file)));
    Ok(engine)
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        let pages: Vec<String> = answer
            .sources
            .iter()
            .map(|source| format!("p.{} (distance {:.4})", source.page, source.distance))
            .collect();
        println!("sources: {}", pages.join(", "));
    }
    println!("confidence: {:.3}", answer.confidence);
    if answer.used_vision {
        println!("(page images were sent to the model)");
    }
}

async fn chat(engine: &QaEngine, index: &Path) -> anyhow::Result<()> {
    let registry = SessionRegistry::new();
    let session = registry.create("cli", index).await;
    info!(%session, index = %index.display(), "chat session started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if matches!(question, "exit" | "quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }
        let answer = registry.ask(engine, session, question).await?;
        print_answer(&answer);
    }

    if let Some(session) = registry.get(session).await {
        info!(turns = session.messages.len() / 2, "chat session ended");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-qa boot"
    );

    let embedder = build_embedder(&cli.embedding)?;

    match cli.command {
        Command::Ingest {
            pdf,
            folder,
            index_root,
            cosine,
            max_chars,
            overlap_chars,
            min_chars,
        } => {
            let chunking = ChunkingConfig {
                max_chars,
                overlap_chars,
                min_chars,
            };
            let metric = if cosine { Metric::Cosine } else { Metric::SquaredL2 };

            if let Some(pdf) = pdf {
                let report = pdf_qa_core::ingest_document(
                    &pdf,
                    &index_root,
                    chunking,
                    embedder.as_ref(),
                    metric,
                )
                .await
                .with_context(|| format!("failed to ingest {}", pdf.display()))?;
                println!(
                    "{}: {} pages, {} chunks, {} images -> {}",
                    report.fingerprint.document_title,
                    report.pages,
                    report.chunks,
                    report.images,
                    report.index_path.display()
                );
            } else if let Some(folder) = folder {
                let report = ingest_folder_best_effort(
                    &folder,
                    &index_root,
                    chunking,
                    embedder.as_ref(),
                    metric,
                )
                .await
                .with_context(|| format!("failed to ingest {}", folder.display()))?;

                for document in &report.documents {
                    println!(
                        "{}: {} chunks -> {}",
                        document.fingerprint.document_title,
                        document.chunks,
                        document.index_path.display()
                    );
                }
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                }
                if report.documents.is_empty() {
                    println!("0 documents indexed (all files were skipped)");
                }
            }
        }
        Command::Ask {
            index,
            question,
            answer,
        } => {
            let engine = build_engine(embedder, &answer)?;
            let answer = engine.answer(&question, &index).await;
            print_answer(&answer);
        }
        Command::Chat { index, answer } => {
            let engine = build_engine(embedder, &answer)?;
            chat(&engine, &index).await?;
        }
    }

    Ok(())
}
