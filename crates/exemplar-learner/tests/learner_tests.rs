use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

use exemplar_core::config::StoreSettings;
use exemplar_core::{Category, Chunker, Embedder, Error, QueryFilter, Settings, Tags};
use exemplar_extract::{normalize_whitespace, DocumentFormat};
use exemplar_learner::{ExemplarLearner, LearnRequest};
use exemplar_vector::VectorStore;

const TOPICS: [&[&str]; 4] = [
    &["login", "auth", "password", "sso"],
    &["budget", "cost", "invoice"],
    &["meeting", "agenda", "minutes"],
    &["deploy", "server", "cluster"],
];

/// Maps text onto a handful of keyword topics plus a small constant bias.
struct TopicEmbedder {
    fail: AtomicBool,
}

impl TopicEmbedder {
    fn new() -> Self {
        Self { fail: AtomicBool::new(false) }
    }

    fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = TOPICS
            .iter()
            .map(|words| words.iter().filter(|w| lower.contains(*w)).count() as f32)
            .collect();
        v.push(0.1);
        v
    }
}

#[async_trait]
impl Embedder for TopicEmbedder {
    fn embedder_id(&self) -> &str {
        "topics"
    }

    async fn embed_batch(&self, texts: &[String]) -> exemplar_core::Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable {
                attempts: 3,
                reason: "503 service unavailable".into(),
            });
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

async fn open_store(dir: &tempfile::TempDir) -> VectorStore {
    VectorStore::open_at(&dir.path().to_string_lossy(), "chunks", "meta").await.expect("store")
}

async fn learner(
    dir: &tempfile::TempDir,
    chunker: Chunker,
) -> (ExemplarLearner, Arc<TopicEmbedder>) {
    let embedder = Arc::new(TopicEmbedder::new());
    let store = open_store(dir).await;
    (ExemplarLearner::new(chunker, embedder.clone(), store), embedder)
}

#[tokio::test]
async fn learn_text_then_retrieve_it() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (learner, _) = learner(&tmp, Chunker::default()).await;

    let summary = learner
        .learn_text(
            "Project X requires a login module.",
            LearnRequest::new(Category::ProjectProposal).with_tags(Tags::parse("auth")),
        )
        .await?;
    assert_eq!(summary.chunks_added, 1);
    assert!(summary.source_id.starts_with("text-"));
    assert_eq!(summary.source_id.len(), "text-".len() + 16);

    learner
        .learn_text(
            "Quarterly budget and invoice review.",
            LearnRequest::new(Category::PlanningDocument),
        )
        .await?;

    let excerpts = learner.retrieve("How to design login?", 1, &QueryFilter::any()).await?;
    assert_eq!(excerpts.len(), 1);
    let top = &excerpts[0];
    assert_eq!(top.text, "Project X requires a login module.");
    assert!(top.score > 0.5, "score {}", top.score);
    assert_eq!(top.category, Category::ProjectProposal);
    assert!(top.tags.contains("auth"));
    assert_eq!(top.sequence_index, 0);
    Ok(())
}

#[tokio::test]
async fn relearning_same_text_is_idempotent() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (learner, _) = learner(&tmp, Chunker::new(40, 10, 15)?).await;
    let text = "Meeting agenda for the auth review.\n\n\
                Minutes follow below with every decision recorded.";
    let first = learner.learn_text(text, LearnRequest::new(Category::MeetingNotes)).await?;
    let second = learner.learn_text(text, LearnRequest::new(Category::MeetingNotes)).await?;
    assert!(first.chunks_added > 1);
    assert_eq!(first.source_id, second.source_id);
    assert_eq!(learner.get_stats().await?.count, first.chunks_added);
    Ok(())
}

#[tokio::test]
async fn embedding_failure_leaves_store_untouched() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (learner, embedder) = learner(&tmp, Chunker::default()).await;
    learner
        .learn_text("Deploy to the cluster.", LearnRequest::new(Category::TechnicalDocument))
        .await?;

    embedder.fail.store(true, Ordering::SeqCst);
    let err = learner
        .learn_text(
            "Password reset flow for login.",
            LearnRequest::new(Category::SoftwareSpecification),
        )
        .await
        .expect_err("embedding down");
    assert!(matches!(err, Error::EmbeddingUnavailable { .. }));
    let err = learner.retrieve("login", 3, &QueryFilter::any()).await.expect_err("embedding down");
    assert!(matches!(err, Error::EmbeddingUnavailable { .. }));

    embedder.fail.store(false, Ordering::SeqCst);
    let stats = learner.get_stats().await?;
    assert_eq!(stats.count, 1);
    assert_eq!(stats.categories.get(&Category::SoftwareSpecification), None);
    Ok(())
}

#[tokio::test]
async fn documents_go_through_extraction() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (learner, _) = learner(&tmp, Chunker::default()).await;

    let summary = learner
        .learn_document(
            b"Server cluster deploy checklist.\r\n\r\n\r\nRoll back on failure.",
            DocumentFormat::Text,
            LearnRequest::new(Category::TechnicalDocument).with_source_id("runbook.txt"),
        )
        .await?;
    assert_eq!(summary.source_id, "runbook.txt");

    let excerpts = learner
        .retrieve("deploy", 5, &QueryFilter::any().with_category(Category::TechnicalDocument))
        .await?;
    assert_eq!(excerpts.len(), 1);
    assert_eq!(excerpts[0].text, "Server cluster deploy checklist.\n\nRoll back on failure.");
    assert_eq!(excerpts[0].source_id, "runbook.txt");

    let err = learner
        .learn_document(b"   \n\n ", DocumentFormat::Text, LearnRequest::default())
        .await
        .expect_err("blank");
    assert!(matches!(err, Error::EmptyDocument));
    assert!(matches!(DocumentFormat::from_extension("pptx"), Err(Error::UnsupportedFormat(_))));
    assert_eq!(learner.get_stats().await?.count, 1);
    Ok(())
}

#[tokio::test]
async fn retrieve_edge_cases() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (learner, _) = learner(&tmp, Chunker::default()).await;

    assert!(learner.retrieve("login", 3, &QueryFilter::any()).await?.is_empty());
    assert!(matches!(
        learner.retrieve("  ", 3, &QueryFilter::any()).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        learner.learn_text(" \n ", LearnRequest::default()).await,
        Err(Error::EmptyDocument)
    ));

    learner
        .learn_text("SSO login design.", LearnRequest::new(Category::SoftwareSpecification))
        .await?;
    assert!(learner.retrieve("login", 0, &QueryFilter::any()).await?.is_empty());
    let other_tags = QueryFilter::any().with_tags(Tags::parse("billing"));
    assert!(learner.retrieve("login", 3, &other_tags).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn min_score_drops_weak_matches() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (learner, _) = learner(&tmp, Chunker::default()).await;
    let learner = learner.with_min_score(Some(0.5));
    learner.learn_text("Login with SSO.", LearnRequest::default()).await?;
    learner.learn_text("Invoice totals.", LearnRequest::default()).await?;

    let excerpts = learner.retrieve("login password", 5, &QueryFilter::any()).await?;
    assert_eq!(excerpts.len(), 1);
    assert_eq!(excerpts[0].text, "Login with SSO.");
    Ok(())
}

#[tokio::test]
async fn clear_all_reports_removed_chunks() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (learner, _) = learner(&tmp, Chunker::default()).await;
    learner.learn_text("Login module.", LearnRequest::default()).await?;
    learner.learn_text("Budget plan.", LearnRequest::default()).await?;

    let receipt = learner.clear_all().await?;
    assert_eq!(receipt.removed, 2);
    assert_eq!(learner.get_stats().await?.count, 0);
    assert!(learner.retrieve("login", 5, &QueryFilter::any()).await?.is_empty());
    learner.close().await;
    Ok(())
}

#[tokio::test]
async fn from_settings_with_fake_embeddings() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut settings = Settings::default();
    settings.use_fake_embeddings = true;
    settings.embedding.fake_dim = 64;
    settings.store = StoreSettings {
        uri: tmp.path().join("db").to_string_lossy().to_string(),
        ..StoreSettings::default()
    };

    let learner = ExemplarLearner::from_settings(&settings).await?;
    assert_eq!(learner.embedder_id(), "fake:d64");
    learner.learn_text("Login module for project X.", LearnRequest::default()).await?;
    let stats = learner.get_stats().await?;
    assert_eq!(stats.count, 1);
    assert_eq!(stats.dimension, Some(64));
    let excerpts = learner.retrieve("login module", 1, &QueryFilter::any()).await?;
    assert_eq!(excerpts.len(), 1);
    learner.close().await;
    Ok(())
}

const DOCS: [&str; 4] = [
    "Login design notes. Passwords are hashed. SSO is optional for staff accounts.",
    "Budget review for the quarter. Invoice totals are checked against the cost plan every month.",
    "Meeting minutes. The agenda covered hiring.",
    "Deploy runbook for the cluster. Drain each server first. Then roll the new image out slowly.",
];

/// Every total a store holding some set of whole documents can report.
fn whole_document_totals(counts: &[usize]) -> BTreeSet<usize> {
    (0..1usize << counts.len())
        .map(|mask| (0..counts.len()).filter(|i| mask & (1 << i) != 0).map(|i| counts[i]).sum())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_learning_never_exposes_partial_documents() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let chunker = Chunker::new(40, 10, 15)?;
    let counts: Vec<usize> = DOCS
        .iter()
        .map(|d| chunker.split(&normalize_whitespace(d)).len())
        .collect();
    assert!(counts.iter().all(|&n| n > 1), "each document spans several chunks: {:?}", counts);
    let totals = whole_document_totals(&counts);

    let (learner, _) = learner(&tmp, chunker).await;
    let learner = Arc::new(learner);
    let mut tasks: JoinSet<exemplar_core::Result<()>> = JoinSet::new();
    for (n, doc) in DOCS.into_iter().enumerate() {
        let learner = learner.clone();
        tasks.spawn(async move {
            let request = LearnRequest::default().with_source_id(format!("doc{}", n));
            let summary = learner.learn_text(doc, request).await?;
            assert_eq!(summary.source_id, format!("doc{}", n));
            Ok(())
        });
    }
    for _ in 0..3 {
        let learner = learner.clone();
        let totals = totals.clone();
        tasks.spawn(async move {
            for _ in 0..15 {
                let count = learner.get_stats().await?.count;
                assert!(totals.contains(&count), "partial document visible: {}", count);
                let seen =
                    learner.retrieve("login budget deploy", 1000, &QueryFilter::any()).await?;
                assert!(totals.contains(&seen.len()), "partial document visible: {}", seen.len());
                tokio::task::yield_now().await;
            }
            Ok(())
        });
    }
    {
        let learner = learner.clone();
        tasks.spawn(async move { learner.clear_all().await.map(|_| ()) });
    }
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }

    let excerpts = learner.retrieve("login budget deploy", 1000, &QueryFilter::any()).await?;
    let mut per_source: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
    for e in &excerpts {
        assert!(
            per_source.entry(e.source_id.clone()).or_default().insert(e.sequence_index),
            "duplicate chunk {}#{}",
            e.source_id,
            e.sequence_index
        );
    }
    for (source, indices) in &per_source {
        let n: usize = source.trim_start_matches("doc").parse()?;
        let expected: BTreeSet<usize> = (0..counts[n]).collect();
        assert_eq!(indices, &expected, "{} is stored whole", source);
    }
    assert_eq!(learner.get_stats().await?.count, excerpts.len());

    let learner = Arc::try_unwrap(learner).map_err(|_| anyhow::anyhow!("learner still shared"))?;
    learner.close().await;
    let reopened = open_store(&tmp).await;
    assert_eq!(reopened.len(), excerpts.len(), "disk and memory agree");
    Ok(())
}
