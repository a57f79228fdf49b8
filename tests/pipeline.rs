//! End-to-end tests of the retrieval pipeline through [`Session`].
//!
//! Everything runs in-process: accounts live in a temporary SQLite file,
//! the index is in memory, pages come from a counting fake fetcher, and
//! the LLM is a stub that records what it was asked.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use sakiyomi::accounts::{NewUser, PromptKind, SqliteAccounts};
use sakiyomi::cache::CacheState;
use sakiyomi::config::{ChunkingConfig, Config};
use sakiyomi::embedding::{EmbeddingProvider, HashProvider};
use sakiyomi::extract::extract_pdf;
use sakiyomi::error::RagError;
use sakiyomi::ingest::{IngestOutcome, IngestPipeline};
use sakiyomi::llm::{ChatBackend, LlmRegistry};
use sakiyomi::loader::{load_pdf, Fetch, FetchedPage, Loader, BLOCKED_MESSAGE};
use sakiyomi::models::{IndexCredential, Namespace, SourceDocument, SourceKind, META_TITLE};
use sakiyomi::prompts;
use sakiyomi::session::{ScriptOutcome, Services, Session};
use sakiyomi::tracer::{RunTracer, TraceRun};
use sakiyomi::{db, migrate};

const EMAIL: &str = "manager@example.com";
const PASSWORD: &str = "secret-pass";

struct CountingFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl Fetch for CountingFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchedPage {
            content_type: Some("text/html; charset=utf-8".into()),
            body: format!(
                "<html><head><title>Page {path}</title></head><body>\
                 <p>Morning routine ideas for busy people.</p>\
                 <p>Source page {path}.</p></body></html>",
                path = url.path()
            ),
        })
    }
}

/// Answers with a fixed string and remembers the last request.
struct StubBackend {
    name: String,
    answer: String,
    last_context: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl ChatBackend for StubBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _system_prompt: &str, context: &str, _message: &str) -> Result<String> {
        *self.last_context.lock().unwrap() = Some(context.to_string());
        Ok(self.answer.clone())
    }
}

/// Returns the context it was given with list markers removed.
struct EchoBackend;

#[async_trait]
impl ChatBackend for EchoBackend {
    fn name(&self) -> &str {
        "Echo"
    }

    async fn complete(&self, _system_prompt: &str, context: &str, _message: &str) -> Result<String> {
        Ok(context
            .lines()
            .map(|l| l.trim_start_matches("- "))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[derive(Default)]
struct CountingTracer {
    runs: Mutex<Vec<TraceRun>>,
}

impl RunTracer for CountingTracer {
    fn submit(&self, run: TraceRun) {
        self.runs.lock().unwrap().push(run);
    }
}

struct Harness {
    _tmp: TempDir,
    accounts: Arc<SqliteAccounts>,
    services: Arc<Services>,
    fetcher: Arc<CountingFetcher>,
    tracer: Arc<CountingTracer>,
    last_context: Arc<Mutex<Option<String>>>,
}

async fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal(tmp.path().join("accounts.sqlite"));
    config.index.provider = "memory".into();
    config.retrieval.top_k = 3;

    let pool = db::connect(&config).await.unwrap();
    migrate::migrate(&pool).await.unwrap();
    let accounts = Arc::new(SqliteAccounts::new(pool));

    let user = accounts
        .create_user(NewUser {
            email: EMAIL.into(),
            password: PASSWORD.into(),
            display_name: "Manager".into(),
            instagram_username: "manager".into(),
        })
        .await
        .unwrap();
    accounts
        .write_index_config(
            &user.id,
            &IndexCredential {
                index_name: "manager-index".into(),
                api_key: "unused".into(),
                project_name: "manager-project".into(),
            },
        )
        .await
        .unwrap();

    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
    });
    let tracer = Arc::new(CountingTracer::default());
    let last_context = Arc::new(Mutex::new(None));

    let mut llms = LlmRegistry::new();
    llms.register(Box::new(StubBackend {
        name: "GPT-4o".into(),
        answer: "DONE".into(),
        last_context: last_context.clone(),
    }));
    llms.register(Box::new(StubBackend {
        name: "Silent".into(),
        answer: "  \n".into(),
        last_context: last_context.clone(),
    }));
    llms.register(Box::new(EchoBackend));

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashProvider::new(64));
    let loader = Arc::new(Loader::new(&config.loader, fetcher.clone()));

    let services = Arc::new(Services {
        config: Arc::new(config),
        identity: accounts.clone(),
        configs: accounts.clone(),
        embedder,
        loader,
        llms: Arc::new(llms),
        tracer: tracer.clone(),
    });

    Harness {
        _tmp: tmp,
        accounts,
        services,
        fetcher,
        tracer,
        last_context,
    }
}

async fn login(h: &Harness) -> Session {
    Session::login(h.services.clone(), EMAIL, PASSWORD)
        .await
        .unwrap()
}

/// Write a titled document straight into `namespace` of the session's index.
async fn seed(h: &Harness, session: &Session, namespace: &Namespace, title: &str, body: &str) {
    let pipeline = IngestPipeline::new(
        h.services.loader.clone(),
        h.services.embedder.clone(),
        session.index().clone(),
        ChunkingConfig::default(),
        16,
    );
    let mut fields = BTreeMap::new();
    fields.insert(META_TITLE.to_string(), title.to_string());
    pipeline
        .ingest_document(
            SourceDocument {
                origin: format!("{}.pdf", title),
                kind: SourceKind::Pdf,
                raw_text: body.to_string(),
                extracted_fields: fields,
            },
            namespace,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_registered_url_is_searchable() {
    let h = harness().await;
    let session = login(&h).await;

    let outcome = session
        .register_url("https://example.com/a")
        .await
        .unwrap();
    match outcome {
        IngestOutcome::Ingested(report) => {
            assert_eq!(report.namespace, Namespace::new("ns2"));
            assert!(report.chunks >= 1);
            assert_eq!(report.chunks, report.vectors);
        }
        other => panic!("expected ingest, got {:?}", other),
    }

    let hits = session
        .search("Morning routine ideas", &Namespace::new("ns2"), 5)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].origin(), Some("https://example.com/a"));
    assert!(hits[0].text().contains("Morning routine"));
}

#[tokio::test]
async fn test_blocked_url_fetches_and_writes_nothing() {
    let h = harness().await;
    let mut session = login(&h).await;

    let outcome = session
        .generate_script("https://www.instagram.com/p/xyz", "朝の投稿", "GPT-4o")
        .await
        .unwrap();
    assert_eq!(outcome, ScriptOutcome::Blocked(BLOCKED_MESSAGE.to_string()));
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(*session.reference_cache().state(), CacheState::Empty);
    assert!(h.tracer.runs.lock().unwrap().is_empty());

    let registered = session
        .register_url("https://instagram.com/someone")
        .await
        .unwrap();
    assert!(matches!(registered, IngestOutcome::Blocked(_)));
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);

    let hits = session
        .search("anything", &Namespace::new("ns2"), 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_generate_reads_every_namespace_and_traces_once() {
    let h = harness().await;
    let mut session = login(&h).await;

    session.register_url("https://example.com/b").await.unwrap();
    seed(&h, &session, &Namespace::new("ns3"), "過去のプロット", "朝の習慣について").await;
    seed(&h, &session, &Namespace::new("ns4"), "競合", "競合アカウントの投稿").await;
    seed(&h, &session, &Namespace::new("ns5"), "データ", "保存率の傾向").await;

    let outcome = session
        .generate_script("https://example.com/ref", "朝の習慣", "GPT-4o")
        .await
        .unwrap();
    assert_eq!(outcome, ScriptOutcome::Generated("DONE".to_string()));
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);

    let runs = h.tracer.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].project, "manager-project");
    assert_eq!(runs[0].output, "DONE");
    assert_eq!(runs[0].metadata["llm"], "GPT-4o");
    assert_eq!(runs[0].metadata["namespaces"], "ns1,ns2,ns3,ns4,ns5");

    let context = h.last_context.lock().unwrap().clone().unwrap();
    for ns in ["[ns1 |", "[ns2 |", "[ns3 |", "[ns4 |", "[ns5 |"] {
        assert!(context.contains(ns), "missing {} in context", ns);
    }
    let ns1 = context.find("[ns1 |").unwrap();
    let ns5 = context.find("[ns5 |").unwrap();
    assert!(ns1 < ns5);
}

#[tokio::test]
async fn test_same_reference_url_is_fetched_once() {
    let h = harness().await;
    let mut session = login(&h).await;

    for _ in 0..2 {
        let outcome = session
            .generate_script("https://example.com/same", "台本", "GPT-4o")
            .await
            .unwrap();
        assert_eq!(outcome, ScriptOutcome::Generated("DONE".to_string()));
    }
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *session.reference_cache().state(),
        CacheState::Loaded("https://example.com/same".to_string())
    );

    session
        .generate_script("https://example.com/other", "台本", "GPT-4o")
        .await
        .unwrap();
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);

    // An empty reference clears the slot, so the next URL loads again.
    session.generate_script("", "台本", "GPT-4o").await.unwrap();
    assert_eq!(*session.reference_cache().state(), CacheState::Empty);
    let hits = session
        .search("Morning routine", &Namespace::reference(), 5)
        .await
        .unwrap();
    assert!(hits.is_empty());

    session
        .generate_script("https://example.com/other", "台本", "GPT-4o")
        .await
        .unwrap();
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_clearing_reference_namespace_resets_cache() {
    let h = harness().await;
    let mut session = login(&h).await;

    session
        .generate_script("https://example.com/c", "台本", "GPT-4o")
        .await
        .unwrap();
    session.clear(&Namespace::reference()).await.unwrap();
    assert_eq!(*session.reference_cache().state(), CacheState::Empty);

    session
        .generate_script("https://example.com/c", "台本", "GPT-4o")
        .await
        .unwrap();
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_generation_is_an_error_and_still_traced() {
    let h = harness().await;
    let mut session = login(&h).await;

    let err = session
        .generate_script("", "台本", "Silent")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Generation(_)));
    assert_eq!(err.user_message(), "エラー: プロットを生成できませんでした。");

    let runs = h.tracer.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].metadata.contains_key("error"));
}

#[tokio::test]
async fn test_unknown_llm_is_a_generation_error() {
    let h = harness().await;
    let mut session = login(&h).await;

    let err = session
        .generate_script("", "台本", "NoSuchModel")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Generation(_)));
}

#[tokio::test]
async fn test_titles_with_empty_query_use_past_plots() {
    let h = harness().await;
    let session = login(&h).await;

    seed(&h, &session, &Namespace::past_plots(), "朝5分でできる時短メイク", "メイクの手順").await;
    seed(&h, &session, &Namespace::past_plots(), "週末の作り置きレシピ", "作り置きの手順").await;
    seed(&h, &session, &Namespace::new("ns4"), "競合の投稿", "競合の内容").await;

    let mut candidates = session.suggest_titles("", "Echo").await.unwrap();
    candidates.sort();
    assert_eq!(
        candidates,
        vec![
            "朝5分でできる時短メイク".to_string(),
            "週末の作り置きレシピ".to_string()
        ]
    );

    let runs = h.tracer.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].name, "titles");
    assert_eq!(runs[0].project, "manager-project");
    assert_eq!(runs[0].input, "*");
    assert_eq!(runs[0].metadata["namespaces"], "ns3");
}

#[tokio::test]
async fn test_titles_without_any_plots_fail() {
    let h = harness().await;
    let session = login(&h).await;

    let err = session.suggest_titles("", "Echo").await.unwrap_err();
    assert!(matches!(err, RagError::Generation(_)));

    let runs = h.tracer.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].metadata.contains_key("error"));
}

#[tokio::test]
async fn test_search_returns_at_most_top_k() {
    let h = harness().await;
    let session = login(&h).await;
    let ns = Namespace::new("ns5");
    for i in 0..6 {
        seed(&h, &session, &ns, &format!("資料{}", i), &format!("保存率のデータ {}", i)).await;
    }

    for k in [1, 3, 6] {
        let hits = session.search("保存率", &ns, k).await.unwrap();
        assert_eq!(hits.len(), k);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
    let all = session.search("保存率", &ns, 50).await.unwrap();
    assert_eq!(all.len(), 6);
}

#[tokio::test]
async fn test_login_without_index_config_is_index_init() {
    let h = harness().await;
    h.accounts
        .create_user(NewUser {
            email: "new@example.com".into(),
            password: "another-pass".into(),
            display_name: "New".into(),
            instagram_username: String::new(),
        })
        .await
        .unwrap();

    let err = match Session::login(h.services.clone(), "new@example.com", "another-pass").await {
        Ok(_) => panic!("login should fail without an index"),
        Err(e) => e,
    };
    let rag = err.downcast_ref::<RagError>().unwrap();
    assert!(matches!(rag, RagError::IndexInit(_)));
    assert!(rag.is_terminal());
}

#[tokio::test]
async fn test_login_with_wrong_password_fails() {
    let h = harness().await;
    assert!(Session::login(h.services.clone(), EMAIL, "wrong-pass")
        .await
        .is_err());
}

#[tokio::test]
async fn test_missing_prompt_falls_back_to_example() {
    let h = harness().await;
    let session = login(&h).await;
    let user_id = session.profile().id.clone();

    let post = prompts::resolve(h.accounts.as_ref(), &user_id, PromptKind::Post)
        .await
        .unwrap();
    assert_eq!(post, prompts::example(PromptKind::Post));

    h.accounts
        .write_prompt(&user_id, PromptKind::Title, "タイトルだけを出力して下さい")
        .await
        .unwrap();
    let title = prompts::resolve(h.accounts.as_ref(), &user_id, PromptKind::Title)
        .await
        .unwrap();
    assert_eq!(title, "タイトルだけを出力して下さい");
    session.logout().await.unwrap();
}

/// Three pages of text; the middle page's content stream is missing.
fn three_page_pdf_with_broken_middle() -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in [Some("alpha page"), None, Some("gamma page")] {
        let contents_id = match text {
            Some(text) => {
                let content = Content {
                    operations: vec![
                        Operation::new("BT", vec![]),
                        Operation::new("Tf", vec!["F1".into(), 12.into()]),
                        Operation::new("Td", vec![100.into(), 700.into()]),
                        Operation::new("Tj", vec![Object::string_literal(text)]),
                        Operation::new("ET", vec![]),
                    ],
                };
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()))
            }
            // Referenced but never written.
            None => doc.new_object_id(),
        };
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => contents_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => 3,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

#[test]
fn test_pdf_pages_in_order_with_broken_page_empty() {
    let bytes = three_page_pdf_with_broken_middle();

    let pdf = extract_pdf(&bytes).unwrap();
    assert_eq!(pdf.pages.len(), 3);
    assert_eq!(pdf.pages[0].trim(), "alpha page");
    assert!(pdf.pages[1].trim().is_empty());
    assert_eq!(pdf.pages[2].trim(), "gamma page");

    let doc = load_pdf(&bytes, "plots.pdf");
    assert_eq!(doc.origin, "plots.pdf");
    assert_eq!(doc.raw_text, "alpha page\ngamma page");
}

#[tokio::test]
async fn test_registered_pdf_is_searchable() {
    let h = harness().await;
    let session = login(&h).await;
    let ns = Namespace::past_plots();

    let report = session
        .register_pdf(&three_page_pdf_with_broken_middle(), "plots.pdf", &ns)
        .await
        .unwrap();
    assert_eq!(report.chunks, 1);

    let hits = session.search("alpha page", &ns, 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].origin(), Some("plots.pdf"));
    assert_eq!(hits[0].text(), "alpha page\ngamma page");
    assert_eq!(hits[0].metadata["filename"], "plots.pdf");
}
