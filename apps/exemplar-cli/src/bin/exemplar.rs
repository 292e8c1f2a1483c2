use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use exemplar_core::config::{resolve_with_base, Config};
use exemplar_core::{Category, Error, QueryFilter, Settings, Tags};
use exemplar_extract::DocumentFormat;
use exemplar_learner::{Excerpt, ExemplarLearner, LearnRequest};

#[derive(Parser)]
#[command(
    name = "exemplar",
    about = "Learn exemplar documents and retrieve relevant excerpts",
    version
)]
struct Cli {
    /// Store directory, overriding `store.uri`
    #[arg(global = true, long)]
    store: Option<String>,

    /// Use the deterministic offline embedder
    #[arg(global = true, long)]
    fake_embeddings: bool,

    /// Print machine-readable JSON
    #[arg(global = true, long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Learn a single PDF, DOCX, XLSX or text file
    Learn {
        file: PathBuf,
        #[arg(long, default_value = "other")]
        category: String,
        /// Comma separated, e.g. "auth, backend"
        #[arg(long, default_value = "")]
        tags: String,
        /// Source label, defaults to the file name
        #[arg(long)]
        source_id: Option<String>,
    },
    /// Learn raw text passed on the command line
    LearnText {
        text: String,
        #[arg(long, default_value = "other")]
        category: String,
        #[arg(long, default_value = "")]
        tags: String,
    },
    /// Learn every supported file under a directory
    LearnDir {
        dir: PathBuf,
        #[arg(long, default_value = "other")]
        category: String,
        #[arg(long, default_value = "")]
        tags: String,
    },
    /// Rank learned excerpts against a query
    Retrieve {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        tags: Option<String>,
    },
    /// Remove everything that was learned
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Summarize the store contents
    Stats,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let config = Config::load().context("loading configuration")?;
    let mut settings = config.settings()?;
    if let Some(store) = &cli.store {
        let cwd = std::env::current_dir()?;
        settings.store.uri = resolve_with_base(&cwd, store).to_string_lossy().into_owned();
    }
    if cli.fake_embeddings {
        settings.use_fake_embeddings = true;
    }
    Ok(settings)
}

fn request(category: &str, tags: &str) -> LearnRequest {
    LearnRequest::new(Category::normalize(category)).with_tags(Tags::parse(tags))
}

fn print_excerpts(excerpts: &[Excerpt]) {
    if excerpts.is_empty() {
        println!("No matching excerpts.");
        return;
    }
    for (i, e) in excerpts.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}#{} ({}; tags: {})",
            i + 1,
            e.score,
            e.source_id,
            e.sequence_index,
            e.category,
            e.tags
        );
        println!("   {}", e.text.replace('\n', "\n   "));
    }
}

async fn learn_dir(
    learner: &ExemplarLearner,
    dir: &Path,
    req: &LearnRequest,
) -> anyhow::Result<()> {
    let files: Vec<(PathBuf, DocumentFormat)> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| match DocumentFormat::from_path(e.path()) {
            Ok(format) => Some((e.into_path(), format)),
            Err(_) => {
                tracing::debug!(path = %e.path().display(), "skipping unsupported file");
                None
            }
        })
        .collect();
    if files.is_empty() {
        println!("No supported files under {}", dir.display());
        return Ok(());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                 {pos}/{len} files ({percent}%) {msg}",
            )?
            .progress_chars("#>-"),
    );
    let (mut learned, mut chunks, mut skipped) = (0usize, 0usize, 0usize);
    for (path, format) in files {
        let label = path.strip_prefix(dir).unwrap_or(&path).to_string_lossy().into_owned();
        pb.set_message(label.clone());
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let request = req.clone().with_source_id(label.clone());
        match learner.learn_document(&bytes, format, request).await {
            Ok(summary) => {
                learned += 1;
                chunks += summary.chunks_added;
            }
            // the file is bad, the store is fine: keep going
            Err(e @ (Error::EmptyDocument | Error::Extraction { .. })) => {
                tracing::warn!(file = %label, error = %e, "skipped");
                skipped += 1;
            }
            Err(e) => {
                pb.abandon_with_message(format!("failed at {}", label));
                return Err(e).with_context(|| format!("learning {}", label));
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");
    println!("Learned {} files ({} chunks), skipped {}", learned, chunks, skipped);
    Ok(())
}

async fn run(cli: Cli, learner: &ExemplarLearner, settings: &Settings) -> anyhow::Result<()> {
    match cli.command {
        Command::Learn { file, category, tags, source_id } => {
            let format = DocumentFormat::from_path(&file)?;
            let bytes =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let source_id = source_id.unwrap_or_else(|| {
                file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
            });
            let req = request(&category, &tags).with_source_id(source_id);
            let summary = learner.learn_document(&bytes, format, req).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Learned {} chunks from {} as {}",
                    summary.chunks_added, summary.source_id, summary.category
                );
            }
        }
        Command::LearnText { text, category, tags } => {
            let summary = learner.learn_text(&text, request(&category, &tags)).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Learned {} chunks as {}", summary.chunks_added, summary.source_id);
            }
        }
        Command::LearnDir { dir, category, tags } => {
            learn_dir(learner, &dir, &request(&category, &tags)).await?;
        }
        Command::Retrieve { query, k, category, tags } => {
            let mut filter = QueryFilter::any();
            if let Some(c) = category {
                filter = filter.with_category(Category::normalize(&c));
            }
            if let Some(t) = tags {
                filter = filter.with_tags(Tags::parse(&t));
            }
            let k = k.unwrap_or(settings.retrieval.default_k);
            let excerpts = learner.retrieve(&query, k, &filter).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&excerpts)?);
            } else {
                print_excerpts(&excerpts);
            }
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to clear without --yes");
            }
            let receipt = learner.clear_all().await?;
            println!("Removed {} chunks", receipt.removed);
        }
        Command::Stats => {
            let stats = learner.get_stats().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Chunks: {}", stats.count);
                match stats.dimension {
                    Some(d) => println!("Dimension: {}", d),
                    None => println!("Dimension: (empty store)"),
                }
                for (category, n) in &stats.categories {
                    println!("  {:<24} {}", category, n);
                }
                let tags: Vec<&str> = stats.distinct_tags.iter().map(String::as_str).collect();
                let tags = if tags.is_empty() { "-".to_string() } else { tags.join(", ") };
                println!("Tags: {}", tags);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let learner = ExemplarLearner::from_settings(&settings).await?;
    tracing::info!(store = %settings.store.uri, embedder = learner.embedder_id(), "learner ready");
    let result = run(cli, &learner, &settings).await;
    learner.close().await;
    result
}
