//! Retrieval-augmented answering.
//!
//! A chat turn runs strictly in order: ensure the session, persist the user
//! message, route, then either reply with the support template or retrieve
//! context and ask the completion service, and finally persist the assistant
//! message. Failures inside retrieval or generation end the turn with a fixed
//! apology and `success = false`; the error itself only reaches the log.

#[cfg(test)]
mod tests;

use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info};

use crate::completion::{ChatMessage, CompletionClient, Role};
use crate::config::Config;
use crate::database::lancedb::MetadataFilter;
use crate::database::sqlite::{Message, MessageMetadata, StoredSource};
use crate::index::{IndexStats, IndexStore, RetrievedSource};
use crate::memory::SessionStore;
use crate::router::{IntentClassifier, RoutedReply};

pub const CHAT_ERROR_MESSAGE: &str =
    "Desculpe, ocorreu um erro ao processar sua mensagem. Por favor, tente novamente.";
pub const QUERY_ERROR_MESSAGE: &str = "Desculpe, ocorreu um erro ao processar sua pergunta.";
pub const NOTHING_FOUND_MESSAGE: &str =
    "Não encontrei informações relevantes sobre isso nos nossos documentos.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagSettings {
    pub top_k: usize,
    pub preview_chars: usize,
    pub max_history: u32,
    pub company_name: String,
}

impl Default for RagSettings {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 5,
            preview_chars: 500,
            max_history: 10,
            company_name: "EM Vidros".to_string(),
        }
    }
}

impl RagSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.index.top_k,
            preview_chars: config.index.preview_chars,
            max_history: config.memory.max_history,
            company_name: config.assistant.company_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub sources: Vec<RetrievedSource>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_to: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub response: String,
    pub sources: Vec<RetrievedSource>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_to: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub index: Option<IndexStats>,
    pub model: String,
}

type SessionLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive hold on one session for the length of a turn.
///
/// On drop the lock is released and its map entry removed once nobody else
/// holds or waits for it.
struct SessionTurn<'a> {
    locks: &'a SessionLocks,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}

/// What a turn does after the user message is stored
enum TurnPlan {
    Routed(RoutedReply),
    Generate {
        messages: Vec<ChatMessage>,
        sources: Vec<RetrievedSource>,
    },
}

pub struct RagOrchestrator {
    sessions: SessionStore,
    index: Arc<IndexStore>,
    router: Box<dyn IntentClassifier>,
    completion: Arc<dyn CompletionClient>,
    settings: RagSettings,
    session_locks: SessionLocks,
}

impl std::fmt::Debug for RagOrchestrator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagOrchestrator")
            .field("index", &self.index)
            .field("model", &self.completion.model())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RagOrchestrator {
    #[inline]
    pub fn new(
        sessions: SessionStore,
        index: Arc<IndexStore>,
        router: Box<dyn IntentClassifier>,
        completion: Arc<dyn CompletionClient>,
        settings: RagSettings,
    ) -> Self {
        Self {
            sessions,
            index,
            router,
            completion,
            settings,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[inline]
    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// One conversational turn
    #[inline]
    pub async fn chat(&self, message: &str, session_id: &str) -> ChatResponse {
        let _turn = self.lock_session(session_id).await;

        match self.begin_turn(message, session_id).await {
            TurnPlan::Routed(reply) => self.finish_routed(session_id, reply).await,
            TurnPlan::Generate { messages, sources } => {
                match self.completion.complete(&messages).await {
                    Ok(response) => self.finish_generated(session_id, response, sources).await,
                    Err(e) => Self::failed_turn(session_id, &e),
                }
            }
        }
    }

    /// Same turn as [`chat`](Self::chat), forwarding answer chunks to
    /// `on_chunk` as they arrive. The assembled answer is persisted once the
    /// stream ends.
    #[inline]
    pub async fn chat_stream<F>(&self, message: &str, session_id: &str, mut on_chunk: F) -> ChatResponse
    where
        F: FnMut(&str) + Send,
    {
        let _turn = self.lock_session(session_id).await;

        match self.begin_turn(message, session_id).await {
            TurnPlan::Routed(reply) => {
                on_chunk(&reply.response);
                self.finish_routed(session_id, reply).await
            }
            TurnPlan::Generate { messages, sources } => {
                let mut stream = match self.completion.complete_stream(&messages).await {
                    Ok(stream) => stream,
                    Err(e) => return Self::failed_turn(session_id, &e),
                };

                let mut response = String::new();
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(text) => {
                            on_chunk(&text);
                            response.push_str(&text);
                        }
                        Err(e) => return Self::failed_turn(session_id, &e),
                    }
                }

                self.finish_generated(session_id, response, sources).await
            }
        }
    }

    /// Stateless single question: no session, no history, nothing persisted
    #[inline]
    pub async fn query(&self, question: &str, top_k: Option<usize>) -> QueryResponse {
        if let Some(reply) = self.router.route(question) {
            return QueryResponse {
                response: reply.response,
                sources: Vec::new(),
                success: true,
                routed_to: Some(reply.routed_to),
            };
        }

        let top_k = top_k.unwrap_or(self.settings.top_k);
        let sources = self
            .index
            .search(question, top_k, &MetadataFilter::new())
            .await;

        if sources.is_empty() {
            return QueryResponse {
                response: NOTHING_FOUND_MESSAGE.to_string(),
                sources,
                success: true,
                routed_to: None,
            };
        }

        let prompt = query_prompt(question, &sources);
        match self.completion.complete(&[ChatMessage::user(prompt)]).await {
            Ok(response) => QueryResponse {
                response,
                sources,
                success: true,
                routed_to: None,
            },
            Err(e) => {
                error!("Error in query: {}", e);
                QueryResponse {
                    response: QUERY_ERROR_MESSAGE.to_string(),
                    sources: Vec::new(),
                    success: false,
                    routed_to: None,
                }
            }
        }
    }

    #[inline]
    pub async fn stats(&self) -> EngineStats {
        let index = match self.index.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("Failed to read index stats: {}", e);
                None
            }
        };

        EngineStats {
            index,
            model: self.completion.model().to_string(),
        }
    }

    async fn lock_session(&self, session_id: &str) -> SessionTurn<'_> {
        let lock = {
            let mut locks = self
                .session_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };

        SessionTurn {
            locks: &self.session_locks,
            session_id: session_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn begin_turn(&self, message: &str, session_id: &str) -> TurnPlan {
        if self.sessions.get_session(session_id).await.is_none() {
            self.sessions.create_session(session_id, None).await;
        }

        let stored_id = self
            .sessions
            .append_message(session_id, Role::User, message, None)
            .await
            .map(|stored| stored.id);

        if let Some(reply) = self.router.route(message) {
            return TurnPlan::Routed(reply);
        }

        let history = self
            .sessions
            .get_history(session_id, Some(self.settings.max_history))
            .await;
        let sources = self
            .index
            .search(message, self.settings.top_k, &MetadataFilter::new())
            .await;
        debug!(
            "Turn in {} uses {} history messages and {} sources",
            session_id,
            history.len(),
            sources.len()
        );

        let messages = conversation(
            &system_prompt(&self.settings.company_name),
            &history,
            &sources,
            message,
            stored_id,
        );
        TurnPlan::Generate { messages, sources }
    }

    async fn finish_routed(&self, session_id: &str, reply: RoutedReply) -> ChatResponse {
        self.sessions
            .add_message(session_id, Role::Assistant, &reply.response, None)
            .await;

        ChatResponse {
            response: reply.response,
            session_id: session_id.to_string(),
            sources: Vec::new(),
            success: true,
            routed_to: Some(reply.routed_to),
        }
    }

    async fn finish_generated(
        &self,
        session_id: &str,
        response: String,
        sources: Vec<RetrievedSource>,
    ) -> ChatResponse {
        let metadata = (!sources.is_empty()).then(|| MessageMetadata {
            sources: sources
                .iter()
                .map(|source| StoredSource {
                    score: source.score,
                    metadata: source.metadata.clone(),
                })
                .collect(),
        });

        self.sessions
            .add_message(session_id, Role::Assistant, &response, metadata)
            .await;
        info!("Answered turn in session {}", session_id);

        let preview_chars = self.settings.preview_chars;
        ChatResponse {
            response,
            session_id: session_id.to_string(),
            sources: sources
                .into_iter()
                .map(|source| RetrievedSource {
                    text: truncate_chars(&source.text, preview_chars),
                    ..source
                })
                .collect(),
            success: true,
            routed_to: None,
        }
    }

    fn failed_turn(session_id: &str, err: &crate::RagError) -> ChatResponse {
        error!("Error in chat for session {}: {}", session_id, err);
        ChatResponse {
            response: CHAT_ERROR_MESSAGE.to_string(),
            session_id: session_id.to_string(),
            sources: Vec::new(),
            success: false,
            routed_to: None,
        }
    }
}

fn system_prompt(company_name: &str) -> String {
    format!(
        "Você é um assistente virtual da {company_name}, uma empresa especializada em vidros e espelhos.\n\n\
         MISSÃO:\n\
         - Responder perguntas sobre produtos, serviços e informações da {company_name}\n\
         - Ser prestativo, cordial e profissional\n\
         - Fornecer informações precisas baseadas no contexto disponível\n\n\
         REGRAS:\n\
         1. Responda APENAS com base nas informações fornecidas no contexto\n\
         2. Se não souber a resposta, diga honestamente que não tem essa informação\n\
         3. Não invente informações sobre preços, produtos ou serviços\n\
         4. Mantenha um tom profissional e amigável\n\
         5. Responda em português do Brasil\n\
         6. Seja conciso mas completo nas respostas\n"
    )
}

/// System instructions plus retrieved context, prior turns, then the new message.
/// `stored_id` is the row of the new message, left out of the prior turns.
fn conversation(
    system: &str,
    history: &[Message],
    sources: &[RetrievedSource],
    message: &str,
    stored_id: Option<i64>,
) -> Vec<ChatMessage> {
    let mut system = system.to_string();
    if !sources.is_empty() {
        system.push_str("\nCONTEXTO:\n");
        for source in sources {
            system.push_str(&source.text);
            system.push_str("\n\n");
        }
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(
        history
            .iter()
            .filter(|turn| turn.role != Role::System && Some(turn.id) != stored_id)
            .map(|turn| ChatMessage {
                role: turn.role,
                content: turn.content.clone(),
            }),
    );
    messages.push(ChatMessage::user(message));
    messages
}

fn query_prompt(question: &str, sources: &[RetrievedSource]) -> String {
    let context = sources
        .iter()
        .map(|source| {
            let title = if source.metadata.title.is_empty() {
                "Documento"
            } else {
                source.metadata.title.as_str()
            };
            let url = source.metadata.url.as_deref().unwrap_or_default();
            format!("[Fonte: {} - {}]\n{}", title, url, source.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Com base nas seguintes informações, responda à pergunta:\n\n\
         CONTEXTO:\n{context}\n\n\
         PERGUNTA: {question}\n\n\
         Responda de forma clara e objetiva em português:"
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text.get(..end).unwrap_or(text).to_string(),
        None => text.to_string(),
    }
}
