#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

use async_trait::async_trait;
use shop_rag::completion::{OpenAiClient, Role};
use shop_rag::config::CompletionConfig;
use shop_rag::content::{ContentMetadata, ContentType, ContentUnit};
use shop_rag::database::Database;
use shop_rag::database::lancedb::LanceVectorStore;
use shop_rag::embeddings::Embedder;
use shop_rag::index::IndexStore;
use shop_rag::memory::SessionStore;
use shop_rag::rag::{CHAT_ERROR_MESSAGE, NOTHING_FOUND_MESSAGE, RagOrchestrator, RagSettings};
use shop_rag::router::{RegexIntentRouter, SUPPORT_ROUTE};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIMENSION: usize = 48;

/// Bag-of-words vectors: texts sharing words land close together
struct WordHashEmbedder;

fn word_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; DIMENSION];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        let hash = word.bytes().fold(2_166_136_261_u32, |hash, byte| {
            (hash ^ u32::from(byte)).wrapping_mul(16_777_619)
        });
        vector[hash as usize % DIMENSION] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
    vector.iter().map(|v| v / norm).collect()
}

#[async_trait]
impl Embedder for WordHashEmbedder {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(&self, texts: &[String]) -> shop_rag::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| word_vector(text)).collect())
    }
}

struct Harness {
    _temp_dir: TempDir,
    server: MockServer,
    index: Arc<IndexStore>,
    orchestrator: RagOrchestrator,
}

async fn harness() -> Harness {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let server = MockServer::start().await;

    let backend = LanceVectorStore::connect(&temp_dir.path().join("vectors"))
        .await
        .expect("should connect to LanceDB");
    let index = Arc::new(IndexStore::new(
        Arc::new(backend),
        Arc::new(WordHashEmbedder),
        "loja",
    ));
    index.ensure_collection().await.expect("should create collection");

    let database = Database::new(temp_dir.path().join("sessions.db"))
        .await
        .expect("should open database");

    let completion = OpenAiClient::new(
        &CompletionConfig {
            base_url: format!("{}/v1", server.uri()),
            timeout_seconds: 5,
            ..CompletionConfig::default()
        },
        Some("test-key".to_string()),
    )
    .expect("client should build");

    let orchestrator = RagOrchestrator::new(
        SessionStore::new(database),
        Arc::clone(&index),
        Box::new(RegexIntentRouter::new("suporte@emvidros.com.br")),
        Arc::new(completion),
        RagSettings {
            preview_chars: 40,
            ..RagSettings::default()
        },
    );

    Harness {
        _temp_dir: temp_dir,
        server,
        index,
        orchestrator,
    }
}

fn completion_body(answer: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": answer },
            "finish_reason": "stop"
        }]
    })
}

async fn index_catalog(index: &IndexStore) {
    let units: Vec<ContentUnit> = [
        (
            "https://emvidros.com.br/box",
            "Box",
            "Box para banheiro em vidro temperado 8mm com ferragens cromadas e instalacao inclusa.",
        ),
        (
            "https://emvidros.com.br/espelhos",
            "Espelhos",
            "Espelhos sob medida com lapidacao bisote para salas, quartos e academias.",
        ),
    ]
    .into_iter()
    .filter_map(|(url, title, text)| {
        ContentUnit::new(
            text,
            ContentMetadata::new("website", ContentType::Website)
                .with_url(url)
                .with_title(title),
            10,
        )
    })
    .collect();

    let added = index.add_units(&units).await.expect("should index catalog");
    assert_eq!(added, 2);
}

#[tokio::test]
async fn chat_answers_with_retrieved_context() {
    let h = harness().await;
    index_catalog(&h.index).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("CONTEXTO"))
        .and(body_string_contains("ferragens cromadas"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("Sim, fazemos box temperado.")),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let reply = h
        .orchestrator
        .chat("Voces fazem box para banheiro em vidro temperado?", "cliente-1")
        .await;

    assert!(reply.success);
    assert_eq!(reply.response, "Sim, fazemos box temperado.");
    assert_eq!(reply.session_id, "cliente-1");
    assert!(reply.routed_to.is_none());
    assert!(!reply.sources.is_empty());
    assert_eq!(
        reply.sources[0].metadata.url.as_deref(),
        Some("https://emvidros.com.br/box")
    );
    assert!(reply.sources.iter().all(|s| s.text.chars().count() <= 40));

    let history = h.orchestrator.sessions().get_history("cliente-1", None).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
    let stored = history[1].parsed_metadata().expect("sources should be stored");
    assert_eq!(stored.sources.len(), reply.sources.len());
}

#[tokio::test]
async fn second_turn_sends_previous_messages() {
    let h = harness().await;
    index_catalog(&h.index).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Resposta.")))
        .mount(&h.server)
        .await;

    h.orchestrator.chat("Voces fazem espelhos?", "cliente-2").await;
    h.orchestrator
        .chat("E com lapidacao bisote?", "cliente-2")
        .await;

    let requests = h.server.received_requests().await.expect("recording is on");
    assert_eq!(requests.len(), 2);

    let second: serde_json::Value =
        serde_json::from_slice(&requests[1].body).expect("request should be JSON");
    let messages = second["messages"].as_array().expect("messages array");
    let roles: Vec<&str> = messages
        .iter()
        .filter_map(|m| m["role"].as_str())
        .collect();
    assert_eq!(roles, ["system", "user", "assistant", "user"]);
    assert_eq!(messages[1]["content"], "Voces fazem espelhos?");
    assert_eq!(messages[3]["content"], "E com lapidacao bisote?");
}

#[tokio::test]
async fn delivery_question_goes_to_support() {
    let h = harness().await;
    index_catalog(&h.index).await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("nunca")))
        .expect(0)
        .mount(&h.server)
        .await;

    let reply = h
        .orchestrator
        .chat("Onde está meu pedido? Já faz uma semana", "cliente-3")
        .await;

    assert!(reply.success);
    assert_eq!(reply.routed_to, Some(SUPPORT_ROUTE));
    assert!(reply.response.contains("suporte@emvidros.com.br"));
    assert!(reply.sources.is_empty());
    assert_eq!(h.orchestrator.sessions().message_count("cliente-3").await, 2);

    let query = h.orchestrator.query("Qual o prazo de entrega?", None).await;
    assert_eq!(query.routed_to, Some(SUPPORT_ROUTE));
}

#[tokio::test]
async fn product_words_keep_question_in_retrieval() {
    let h = harness().await;
    index_catalog(&h.index).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Consulte o valor.")))
        .expect(1)
        .mount(&h.server)
        .await;

    let reply = h
        .orchestrator
        .query("Qual o preço do frete do box?", Some(1))
        .await;

    assert!(reply.success);
    assert!(reply.routed_to.is_none());
    assert_eq!(reply.response, "Consulte o valor.");
    assert_eq!(reply.sources.len(), 1);
}

#[tokio::test]
async fn empty_index_answers_nothing_found() {
    let h = harness().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("nunca")))
        .expect(0)
        .mount(&h.server)
        .await;

    let reply = h.orchestrator.query("Voces instalam fachadas?", None).await;
    assert!(reply.success);
    assert_eq!(reply.response, NOTHING_FOUND_MESSAGE);
    assert!(reply.sources.is_empty());
}

#[tokio::test]
async fn completion_failure_is_an_apology() {
    let h = harness().await;
    index_catalog(&h.index).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.server)
        .await;

    let reply = h.orchestrator.chat("Voces fazem espelhos?", "cliente-4").await;
    assert!(!reply.success);
    assert_eq!(reply.response, CHAT_ERROR_MESSAGE);
    assert!(reply.sources.is_empty());

    let history = h.orchestrator.sessions().get_history("cliente-4", None).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn stats_report_index_and_model() {
    let h = harness().await;
    index_catalog(&h.index).await;

    let stats = h.orchestrator.stats().await;
    let index = stats.index.expect("index stats should be available");
    assert_eq!(index.collection, "loja");
    assert_eq!(index.points_count, 2);
    assert_eq!(index.dimension, DIMENSION);
    assert_eq!(stats.model, CompletionConfig::default().model);
}
