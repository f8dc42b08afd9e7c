use super::*;
use crate::RagError;
use crate::completion::CompletionStream;
use crate::content::{ContentMetadata, ContentType, ContentUnit};
use crate::database::Database;
use crate::database::lancedb::{IndexRecord, ScoredRecord, VectorBackend};
use crate::embeddings::Embedder;
use crate::router::RegexIntentRouter;
use async_trait::async_trait;
use futures::stream;
use tempfile::TempDir;

const DIMENSION: usize = 32;

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

    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| word_vector(text)).collect())
    }
}

/// In-process collection store with exact cosine ranking
#[derive(Default)]
struct MemoryBackend {
    collections: std::sync::Mutex<HashMap<String, Vec<IndexRecord>>>,
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn collection_exists(&self, name: &str) -> crate::Result<bool> {
        Ok(self.collections.lock().expect("lock").contains_key(name))
    }

    async fn create_collection(&self, name: &str, _dimension: usize) -> crate::Result<()> {
        self.collections
            .lock()
            .expect("lock")
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> crate::Result<()> {
        self.collections.lock().expect("lock").remove(name);
        Ok(())
    }

    async fn insert(&self, name: &str, records: Vec<IndexRecord>) -> crate::Result<usize> {
        let count = records.len();
        self.collections
            .lock()
            .expect("lock")
            .entry(name.to_string())
            .or_default()
            .extend(records);
        Ok(count)
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> crate::Result<Vec<ScoredRecord>> {
        let collections = self.collections.lock().expect("lock");
        let mut results: Vec<ScoredRecord> = collections
            .get(name)
            .into_iter()
            .flatten()
            .filter(|record| {
                filter
                    .iter()
                    .all(|(key, value)| record.metadata.field(key).as_deref() == Some(value))
            })
            .map(|record| ScoredRecord {
                id: record.id.clone(),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                score: record.vector.iter().zip(vector).map(|(a, b)| a * b).sum(),
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    async fn count(&self, name: &str) -> crate::Result<usize> {
        Ok(self
            .collections
            .lock()
            .expect("lock")
            .get(name)
            .map_or(0, Vec::len))
    }
}

struct BrokenBackend;

#[async_trait]
impl VectorBackend for BrokenBackend {
    async fn collection_exists(&self, _name: &str) -> crate::Result<bool> {
        Err(RagError::Database("vector store offline".to_string()))
    }

    async fn create_collection(&self, _name: &str, _dimension: usize) -> crate::Result<()> {
        Err(RagError::Database("vector store offline".to_string()))
    }

    async fn delete_collection(&self, _name: &str) -> crate::Result<()> {
        Err(RagError::Database("vector store offline".to_string()))
    }

    async fn insert(&self, _name: &str, _records: Vec<IndexRecord>) -> crate::Result<usize> {
        Err(RagError::Database("vector store offline".to_string()))
    }

    async fn search(
        &self,
        _name: &str,
        _vector: &[f32],
        _top_k: usize,
        _filter: &MetadataFilter,
    ) -> crate::Result<Vec<ScoredRecord>> {
        Err(RagError::Database("vector store offline".to_string()))
    }

    async fn count(&self, _name: &str) -> crate::Result<usize> {
        Err(RagError::Database("vector store offline".to_string()))
    }
}

/// Completion service with a fixed answer (or a fixed failure) that records
/// every conversation it receives
struct ScriptedCompletion {
    answer: Option<String>,
    seen: std::sync::Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(answer.to_string()),
            seen: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            seen: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().expect("lock").clone()
    }

    fn respond(&self, messages: &[ChatMessage]) -> crate::Result<String> {
        self.seen.lock().expect("lock").push(messages.to_vec());
        self.answer
            .clone()
            .ok_or_else(|| RagError::Completion("service unavailable".to_string()))
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> crate::Result<String> {
        self.respond(messages)
    }

    async fn complete_stream(&self, messages: &[ChatMessage]) -> crate::Result<CompletionStream> {
        let answer = self.respond(messages)?;
        let chunks: Vec<crate::Result<String>> = answer
            .split_inclusive(' ')
            .map(|chunk| Ok(chunk.to_string()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

fn unit(text: &str, title: &str, url: &str) -> ContentUnit {
    let metadata = ContentMetadata::new("website", ContentType::Website)
        .with_title(title)
        .with_url(url);
    ContentUnit::new(text, metadata, 1).expect("text is long enough")
}

struct Harness {
    _temp_dir: TempDir,
    orchestrator: RagOrchestrator,
    completion: Arc<ScriptedCompletion>,
}

async fn harness(
    backend: Arc<dyn VectorBackend>,
    completion: Arc<ScriptedCompletion>,
    settings: RagSettings,
) -> Harness {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::new(temp_dir.path().join("sessions.db"))
        .await
        .expect("should open database");
    let sessions = SessionStore::new(database).with_max_history(settings.max_history);
    let index = Arc::new(IndexStore::new(backend, Arc::new(WordHashEmbedder), "docs"));

    let orchestrator = RagOrchestrator::new(
        sessions,
        index,
        Box::new(RegexIntentRouter::new("suporte@emvidros.com.br")),
        Arc::clone(&completion) as Arc<dyn CompletionClient>,
        settings,
    );

    Harness {
        _temp_dir: temp_dir,
        orchestrator,
        completion,
    }
}

async fn seeded_harness(completion: Arc<ScriptedCompletion>, settings: RagSettings) -> Harness {
    let backend = Arc::new(MemoryBackend::default());
    let index = IndexStore::new(
        Arc::clone(&backend) as Arc<dyn VectorBackend>,
        Arc::new(WordHashEmbedder),
        "docs",
    );
    index
        .add_units(&[
            unit(
                "Box para banheiro em vidro temperado incolor de 8mm com instalação inclusa",
                "Box",
                "https://emvidros.com.br/box",
            ),
            unit(
                "Espelhos sob medida com lapidação bisotê para salas e quartos",
                "Espelhos",
                "https://emvidros.com.br/espelhos",
            ),
        ])
        .await
        .expect("seeding should work");

    harness(backend, completion, settings).await
}

#[tokio::test]
async fn support_turn_skips_retrieval_and_generation() {
    let h = seeded_harness(ScriptedCompletion::answering("nunca"), RagSettings::default()).await;

    let reply = h
        .orchestrator
        .chat("Qual o status da minha entrega?", "s1")
        .await;

    assert!(reply.success);
    assert_eq!(reply.routed_to, Some("support"));
    assert!(reply.sources.is_empty());
    assert!(reply.response.contains("suporte@emvidros.com.br"));
    assert!(h.completion.calls().is_empty());

    let history = h.orchestrator.sessions().get_history("s1", None).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, reply.response);
}

#[tokio::test]
async fn retrieval_turn_answers_with_truncated_sources() {
    let settings = RagSettings {
        preview_chars: 12,
        ..RagSettings::default()
    };
    let h = seeded_harness(
        ScriptedCompletion::answering("Temos box de vidro temperado."),
        settings,
    )
    .await;

    let reply = h
        .orchestrator
        .chat("Vocês fazem box de vidro temperado para banheiro?", "s1")
        .await;

    assert!(reply.success);
    assert_eq!(reply.routed_to, None);
    assert_eq!(reply.session_id, "s1");
    assert_eq!(reply.response, "Temos box de vidro temperado.");
    assert!(!reply.sources.is_empty());
    assert_eq!(reply.sources[0].metadata.title, "Box");
    assert!(reply.sources.iter().all(|s| s.text.chars().count() <= 12));

    let calls = h.completion.calls();
    assert_eq!(calls.len(), 1);
    let conversation = &calls[0];
    assert_eq!(conversation[0].role, Role::System);
    assert!(conversation[0].content.contains("instalação inclusa"));
    assert_eq!(conversation.len(), 2);
    assert_eq!(
        conversation[1],
        ChatMessage::user("Vocês fazem box de vidro temperado para banheiro?")
    );

    let history = h.orchestrator.sessions().get_history("s1", None).await;
    assert_eq!(history.len(), 2);
    let stored = history[1]
        .parsed_metadata()
        .expect("assistant message carries sources");
    assert_eq!(stored.sources.len(), reply.sources.len());
    assert_eq!(
        stored.sources[0].metadata.url.as_deref(),
        Some("https://emvidros.com.br/box")
    );
}

#[tokio::test]
async fn later_turns_see_prior_history() {
    let h = seeded_harness(
        ScriptedCompletion::answering("Resposta."),
        RagSettings::default(),
    )
    .await;

    h.orchestrator.chat("Vocês fazem espelhos?", "s1").await;
    h.orchestrator.chat("E box de banheiro?", "s1").await;

    let calls = h.completion.calls();
    assert_eq!(calls.len(), 2);
    let roles: Vec<Role> = calls[1].iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(calls[1][1].content, "Vocês fazem espelhos?");
    assert_eq!(calls[1][3].content, "E box de banheiro?");
}

#[tokio::test]
async fn repeated_question_keeps_earlier_turns() {
    let h = seeded_harness(
        ScriptedCompletion::answering("Sim."),
        RagSettings {
            max_history: 3,
            ..RagSettings::default()
        },
    )
    .await;

    for _ in 0..3 {
        h.orchestrator.chat("Vocês fazem espelhos?", "s1").await;
    }

    let calls = h.completion.calls();
    assert_eq!(calls.len(), 3);
    let roles: Vec<Role> = calls[2].iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::User
        ]
    );
    assert!(
        calls[2]
            .iter()
            .skip(1)
            .filter(|m| m.role == Role::User)
            .all(|m| m.content == "Vocês fazem espelhos?")
    );
}

#[tokio::test]
async fn concurrent_turns_on_one_session_run_in_order() {
    let h = seeded_harness(
        ScriptedCompletion::answering("Resposta."),
        RagSettings::default(),
    )
    .await;

    let (first, second) = tokio::join!(
        h.orchestrator.chat("Vocês fazem espelhos?", "s1"),
        h.orchestrator.chat("E box de banheiro?", "s1"),
    );
    assert!(first.success);
    assert!(second.success);

    let history = h.orchestrator.sessions().get_history("s1", None).await;
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );

    let calls = h.completion.calls();
    assert_eq!(calls[1].len(), 4, "second turn sees the whole first turn");

    let locks = h
        .orchestrator
        .session_locks
        .lock()
        .expect("lock");
    assert!(locks.is_empty());
}

#[tokio::test]
async fn lock_entry_is_dropped_after_each_turn() {
    let h = seeded_harness(
        ScriptedCompletion::answering("Resposta."),
        RagSettings::default(),
    )
    .await;

    for session in ["a", "b", "c"] {
        h.orchestrator.chat("Vocês fazem espelhos?", session).await;
    }
    h.orchestrator
        .chat_stream("Qual o status da minha entrega?", "d", |_| {})
        .await;

    assert!(h.orchestrator.session_locks.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn generation_failure_returns_apology() {
    let h = seeded_harness(ScriptedCompletion::failing(), RagSettings::default()).await;

    let reply = h.orchestrator.chat("Vocês fazem espelhos?", "s1").await;

    assert!(!reply.success);
    assert_eq!(reply.response, CHAT_ERROR_MESSAGE);
    assert!(reply.sources.is_empty());
    assert_eq!(reply.session_id, "s1");

    let history = h.orchestrator.sessions().get_history("s1", None).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "Vocês fazem espelhos?");
}

#[tokio::test]
async fn broken_vector_store_still_answers_chat() {
    let h = harness(
        Arc::new(BrokenBackend),
        ScriptedCompletion::answering("Sem contexto."),
        RagSettings::default(),
    )
    .await;

    let reply = h.orchestrator.chat("Vocês fazem espelhos?", "s1").await;
    assert!(reply.success);
    assert!(reply.sources.is_empty());
    assert_eq!(reply.response, "Sem contexto.");
}

#[tokio::test]
async fn query_degrades_when_search_fails() {
    let h = harness(
        Arc::new(BrokenBackend),
        ScriptedCompletion::answering("nunca"),
        RagSettings::default(),
    )
    .await;

    let reply = h.orchestrator.query("Vocês fazem espelhos?", None).await;

    assert!(reply.success);
    assert_eq!(reply.response, NOTHING_FOUND_MESSAGE);
    assert!(reply.sources.is_empty());
    assert!(h.completion.calls().is_empty());
}

#[tokio::test]
async fn query_cites_sources_inline() {
    let h = seeded_harness(
        ScriptedCompletion::answering("Fazemos box."),
        RagSettings::default(),
    )
    .await;

    let reply = h.orchestrator.query("box de vidro temperado", Some(1)).await;

    assert!(reply.success);
    assert_eq!(reply.response, "Fazemos box.");
    assert_eq!(reply.sources.len(), 1);

    let calls = h.completion.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 1);
    let prompt = &calls[0][0].content;
    assert!(prompt.contains("[Fonte: Box - https://emvidros.com.br/box]"));
    assert!(prompt.contains("PERGUNTA: box de vidro temperado"));

    assert!(
        h.orchestrator
            .sessions()
            .list_sessions(None)
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn query_routes_and_fails_gracefully() {
    let h = seeded_harness(ScriptedCompletion::failing(), RagSettings::default()).await;

    let routed = h.orchestrator.query("Onde está meu pedido?", None).await;
    assert!(routed.success);
    assert_eq!(routed.routed_to, Some("support"));

    let failed = h.orchestrator.query("box de vidro", None).await;
    assert!(!failed.success);
    assert_eq!(failed.response, QUERY_ERROR_MESSAGE);
    assert!(failed.sources.is_empty());
}

#[tokio::test]
async fn streamed_turn_forwards_chunks_and_persists_answer() {
    let h = seeded_harness(
        ScriptedCompletion::answering("Temos espelhos sob medida."),
        RagSettings::default(),
    )
    .await;

    let mut chunks = Vec::new();
    let reply = h
        .orchestrator
        .chat_stream("Vocês fazem espelhos?", "s1", |chunk| {
            chunks.push(chunk.to_string());
        })
        .await;

    assert!(reply.success);
    assert!(chunks.len() > 1);
    assert_eq!(chunks.concat(), "Temos espelhos sob medida.");
    assert_eq!(reply.response, "Temos espelhos sob medida.");

    let history = h.orchestrator.sessions().get_history("s1", None).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Temos espelhos sob medida.");
}

#[tokio::test]
async fn stats_report_index_and_model() {
    let h = seeded_harness(ScriptedCompletion::answering("ok"), RagSettings::default()).await;
    let stats = h.orchestrator.stats().await;

    assert_eq!(stats.model, "scripted-model");
    let index = stats.index.expect("index stats available");
    assert_eq!(index.points_count, 2);
    assert_eq!(index.dimension, DIMENSION);
}

#[test]
fn truncation_counts_characters() {
    assert_eq!(truncate_chars("lapidação", 6), "lapida");
    assert_eq!(truncate_chars("vidro", 10), "vidro");
    assert_eq!(truncate_chars("", 3), "");
}
