//! CLI module
//!
//! bankrag command definitions and implementations

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::answer::{dedup_sources, has_groq_api_key, AnswerSynthesizer, SourceCitation};
use crate::embedding::{has_api_key, EmbeddingProvider, GeminiEmbedding};
use crate::ingest::IngestPipeline;
use crate::retrieval::{
    get_data_dir, ChunkStore, HybridRetriever, LanceDenseIndex, MetadataFilter, RetrievalError,
    RetrievalResult, RetrieverConfig,
};

/// Vector index directory under the data dir
const VECTOR_DIR: &str = "vectors.lance";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "bankrag")]
#[command(version, about = "Hybrid retrieval QA over banking regulations", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest regulatory PDFs into the knowledge base
    Ingest {
        /// Directory of PDFs to ingest (recursive)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Single PDF file to ingest
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Search the knowledge base and show ranked chunks
    Search {
        /// Search query
        query: String,

        /// Number of results
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Dense weight in [0, 1]; keyword weight is 1 - alpha
        #[arg(short, long, default_value = "0.5")]
        alpha: f64,

        /// Filter by regulator (exact match)
        #[arg(short, long)]
        regulator: Option<String>,

        /// Filter by jurisdiction (exact match)
        #[arg(short, long)]
        jurisdiction: Option<String>,

        /// Filter by source filename (exact match)
        #[arg(short, long)]
        source: Option<String>,

        /// Skip the vector index and use keyword search only
        #[arg(long)]
        sparse_only: bool,
    },

    /// Ask a question and get a cited answer
    Ask {
        /// Question to answer
        question: String,

        /// Number of chunks passed to the LLM
        #[arg(short, long, default_value = "3")]
        top_k: usize,

        /// Filter by regulator (exact match)
        #[arg(short, long)]
        regulator: Option<String>,

        /// Filter by jurisdiction (exact match)
        #[arg(short, long)]
        jurisdiction: Option<String>,
    },

    /// Interactive question-answering session
    Chat,

    /// System status
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// Run a CLI command
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { dir, file } => cmd_ingest(dir, file).await,
        Commands::Search {
            query,
            limit,
            alpha,
            regulator,
            jurisdiction,
            source,
            sparse_only,
        } => {
            cmd_search(
                &query,
                limit,
                alpha,
                source,
                regulator,
                jurisdiction,
                sparse_only,
            )
            .await
        }
        Commands::Ask {
            question,
            top_k,
            regulator,
            jurisdiction,
        } => cmd_ask(&question, top_k, regulator, jurisdiction).await,
        Commands::Chat => cmd_chat().await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Build the retriever from the persisted corpus and vector index
async fn build_retriever(config: RetrieverConfig) -> Result<HybridRetriever> {
    let store = ChunkStore::open_default().context("Failed to open chunk store")?;
    let chunks = store.load_all().context("Failed to load corpus")?;

    if chunks.is_empty() {
        bail!("Knowledge base is empty. Run: bankrag ingest --dir <pdf-directory>");
    }

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(GeminiEmbedding::from_env().context("Failed to create embedding client")?);

    let dense = LanceDenseIndex::open(&get_data_dir().join(VECTOR_DIR), embedder)
        .await
        .context("Failed to open vector index")?;

    Ok(HybridRetriever::new(chunks, Box::new(dense), config))
}

/// Hybrid search with a keyword-only fallback when the dense index fails
async fn retrieve_with_fallback(
    retriever: &HybridRetriever,
    query: &str,
    top_k: usize,
    filter: Option<&MetadataFilter>,
) -> Result<Vec<RetrievalResult>> {
    match retriever.search(query, top_k, filter).await {
        Ok(results) => Ok(results),
        Err(e) => match e.downcast_ref::<RetrievalError>() {
            Some(err) => {
                tracing::warn!("Dense index failed: {}", err);
                println!("[!] Vector search unavailable, falling back to keyword search");
                Ok(retriever.search_sparse(query, top_k, filter))
            }
            None => Err(e),
        },
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Ingest command
///
/// Extracts, chunks, embeds, and indexes regulatory PDFs.
async fn cmd_ingest(dir: Option<PathBuf>, file: Option<PathBuf>) -> Result<()> {
    if !has_api_key() {
        bail!(
            "Embedding API key not set.\n\n\
             Setup:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             or\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             Get a key: https://aistudio.google.com/app/apikey"
        );
    }

    let store = ChunkStore::open_default().context("Failed to open chunk store")?;
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(GeminiEmbedding::from_env().context("Failed to create embedding client")?);
    let dense = LanceDenseIndex::open(&get_data_dir().join(VECTOR_DIR), embedder.clone())
        .await
        .context("Failed to open vector index")?;

    let pipeline = IngestPipeline::new(store, dense, embedder);

    if let Some(ref dir_path) = dir {
        println!("[*] Ingesting PDFs under {:?}", dir_path);
        println!();

        let stats = pipeline.ingest_dir(dir_path).await?;

        println!();
        println!(
            "[OK] Done: {} files, {} chunks ({} skipped, {} failed)",
            stats.files_processed, stats.chunks_created, stats.files_skipped, stats.files_failed
        );
    } else if let Some(ref file_path) = file {
        println!("[*] Ingesting {:?}", file_path);

        let count = pipeline.ingest_file(file_path).await?;
        if count == 0 {
            println!("[!] Skipped: no extractable text");
        } else {
            println!("[OK] {} chunks indexed", count);
        }
    } else {
        bail!("Specify --dir or --file");
    }

    Ok(())
}

/// Search command
///
/// Runs hybrid (vector + keyword) search and prints the ranked chunks.
async fn cmd_search(
    query: &str,
    limit: usize,
    alpha: f64,
    source: Option<String>,
    regulator: Option<String>,
    jurisdiction: Option<String>,
    sparse_only: bool,
) -> Result<()> {
    if !sparse_only && !has_api_key() {
        bail!(
            "Embedding API key not set.\n\
             Setup: export GEMINI_API_KEY=your-key\n\
             Or run with --sparse-only for keyword search."
        );
    }

    println!("[*] Searching: \"{}\"", query);

    let retriever = build_retriever(RetrieverConfig::with_alpha(alpha)).await?;
    let filter = MetadataFilter::from_parts(source, regulator, jurisdiction);

    let results = if sparse_only {
        retriever.search_sparse(query, limit, filter.as_ref())
    } else {
        retrieve_with_fallback(&retriever, query, limit, filter.as_ref()).await?
    };

    if results.is_empty() {
        println!("\n[!] No results.");
        return Ok(());
    }

    println!("\n[OK] Results ({}):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [score: {:.4}] {} (chunk {})",
            i + 1,
            result.score,
            result.source,
            result.chunk_id
        );
        println!(
            "   {} | {}",
            result.regulator, result.jurisdiction
        );
        println!("   {}", truncate_text(&result.content, 200));
        println!();
    }

    Ok(())
}

/// Ask command
///
/// Retrieves the top chunks and synthesizes a cited answer.
async fn cmd_ask(
    question: &str,
    top_k: usize,
    regulator: Option<String>,
    jurisdiction: Option<String>,
) -> Result<()> {
    if !has_api_key() {
        bail!(
            "Embedding API key not set.\n\
             Setup: export GEMINI_API_KEY=your-key"
        );
    }
    if !has_groq_api_key() {
        bail!(
            "GROQ_API_KEY not set.\n\
             Setup: export GROQ_API_KEY=gsk-..."
        );
    }

    let retriever = build_retriever(RetrieverConfig::default()).await?;
    let synthesizer = AnswerSynthesizer::from_env()?;

    let filter = MetadataFilter::from_parts(None, regulator, jurisdiction);
    answer_question(&retriever, &synthesizer, question, top_k, filter.as_ref()).await
}

/// Chat command
///
/// Interactive loop over stdin; `exit` or `quit` ends the session.
async fn cmd_chat() -> Result<()> {
    if !has_api_key() {
        bail!(
            "Embedding API key not set.\n\
             Setup: export GEMINI_API_KEY=your-key"
        );
    }
    if !has_groq_api_key() {
        bail!(
            "GROQ_API_KEY not set.\n\
             Setup: export GROQ_API_KEY=gsk-..."
        );
    }

    let retriever = build_retriever(RetrieverConfig::default()).await?;
    let synthesizer = AnswerSynthesizer::from_env()?;

    println!("bankrag chat - {} chunks loaded", retriever.chunk_count());
    println!("Type a question, or 'exit' to quit.");
    println!();

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        if let Err(e) = answer_question(&retriever, &synthesizer, question, 3, None).await {
            println!("[!] Error: {:#}", e);
        }
        println!();
    }

    Ok(())
}

/// Retrieve, synthesize, and print one answer with its sources
async fn answer_question(
    retriever: &HybridRetriever,
    synthesizer: &AnswerSynthesizer,
    question: &str,
    top_k: usize,
    filter: Option<&MetadataFilter>,
) -> Result<()> {
    let retrieved = retrieve_with_fallback(retriever, question, top_k, filter).await?;

    let answer = synthesizer
        .synthesize(question, &retrieved)
        .await
        .context("Answer synthesis failed")?;

    println!("\n{}\n", answer.answer.trim());

    let sources: Vec<SourceCitation> = dedup_sources(&answer.sources);
    if !sources.is_empty() {
        println!("Sources:");
        for citation in &sources {
            println!(
                "  - {} ({}) [score: {:.4}]",
                citation.source, citation.regulator, citation.score
            );
        }
    }

    Ok(())
}

/// Status command
async fn cmd_status() -> Result<()> {
    println!("bankrag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = get_data_dir();
    println!("[*] Data directory: {}", data_dir.display());

    if has_api_key() {
        println!("[OK] Embedding API key: set");
    } else {
        println!("[!] Embedding API key: not set");
        println!("    Setup: export GEMINI_API_KEY=your-key");
    }

    if has_groq_api_key() {
        println!("[OK] LLM API key: set");
    } else {
        println!("[!] LLM API key: not set");
        println!("    Setup: export GROQ_API_KEY=gsk-...");
    }

    match ChunkStore::open_default() {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!("[OK] Stored chunks: {}", stats.chunk_count);
                println!(
                    "     Total content: {}",
                    format_bytes(stats.total_content_bytes)
                );
                if !stats.chunks_by_regulator.is_empty() {
                    println!("     By regulator:");
                    for (regulator, count) in &stats.chunks_by_regulator {
                        println!("       {} - {} chunks", regulator, count);
                    }
                }
            }
            Err(e) => {
                println!("[!] Failed to read store stats: {}", e);
            }
        },
        Err(e) => {
            println!("[!] Failed to open chunk store: {}", e);
        }
    }

    // Vector index status (only with an API key for the embedder)
    if has_api_key() {
        let embedder: Arc<dyn EmbeddingProvider> = match GeminiEmbedding::from_env() {
            Ok(e) => Arc::new(e),
            Err(e) => {
                tracing::debug!("Failed to create embedding client: {}", e);
                return Ok(());
            }
        };

        match LanceDenseIndex::open(&data_dir.join(VECTOR_DIR), embedder).await {
            Ok(dense) => {
                use crate::retrieval::DenseIndex;
                match dense.count().await {
                    Ok(count) => println!("[OK] Vector index: {} vectors", count),
                    Err(e) => tracing::debug!("Failed to read vector count: {}", e),
                }
            }
            Err(e) => {
                tracing::debug!("Failed to open vector index: {}", e);
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Truncate text for display (UTF-8 safe)
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

/// Format a byte count for display
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
