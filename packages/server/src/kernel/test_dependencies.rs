//! Test doubles for the infrastructure traits and stores.
//!
//! Mocks are scripted: tests queue up the turns and structured replies the
//! model should produce, and the mock fails loudly when the script runs dry.
//! Call counts are recorded so tests can assert that an operation did (or
//! did not) reach the model.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::common::{
    BatchSessionId, ClarificationId, DocumentId, TransactionId, UserId,
};
use crate::domains::ingestion::models::{
    ClarificationSession, Document, EntityKind, Enrichment, SequentialBatchSession, StoredEntity,
    TransactionDraft,
};
use crate::domains::ingestion::store::{
    EntityStore, SessionStore, SimilarityIndex, TransactionStore,
};
use crate::kernel::traits::{
    AssistantTurn, BaseAI, BaseEmbeddingService, BaseTextExtractor, ExtractedText,
    StructuredReply, ToolCall,
};

// =============================================================================
// Model mock
// =============================================================================

#[derive(Default)]
pub struct MockAI {
    turns: Mutex<VecDeque<AssistantTurn>>,
    structured: Mutex<VecDeque<String>>,
    tool_call_count: AtomicUsize,
    structured_call_count: AtomicUsize,
}

impl MockAI {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_turn(&self, turn: AssistantTurn) {
        self.turns.lock().unwrap().push_back(turn);
    }

    pub fn push_structured(&self, json: impl Into<String>) {
        self.structured.lock().unwrap().push_back(json.into());
    }

    /// Number of tool-bound model calls made so far.
    pub fn tool_calls(&self) -> usize {
        self.tool_call_count.load(Ordering::SeqCst)
    }

    /// Number of structured-output model calls made so far.
    pub fn structured_calls(&self) -> usize {
        self.structured_call_count.load(Ordering::SeqCst)
    }

    /// A text-only assistant turn with no tool calls.
    pub fn text_turn(content: &str) -> AssistantTurn {
        AssistantTurn {
            content: Some(content.to_string()),
            tool_calls: vec![],
            raw_message: json!({"role": "assistant", "content": content}),
            usage: None,
        }
    }

    /// An assistant turn requesting the given tool calls.
    pub fn tool_turn(calls: Vec<(&str, serde_json::Value)>) -> AssistantTurn {
        let tool_calls: Vec<ToolCall> = calls
            .iter()
            .enumerate()
            .map(|(i, (name, arguments))| ToolCall {
                id: Some(format!("call_{i}")),
                name: (*name).to_string(),
                arguments: arguments.clone(),
            })
            .collect();
        let raw_calls: Vec<serde_json::Value> = tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.arguments.to_string(),
                    }
                })
            })
            .collect();
        AssistantTurn {
            content: None,
            tool_calls,
            raw_message: json!({"role": "assistant", "content": null, "tool_calls": raw_calls}),
            usage: None,
        }
    }
}

#[async_trait]
impl BaseAI for MockAI {
    async fn generate_with_tools(
        &self,
        _messages: &[serde_json::Value],
        _tools: &serde_json::Value,
    ) -> Result<AssistantTurn> {
        self.tool_call_count.fetch_add(1, Ordering::SeqCst);
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("MockAI: no scripted assistant turn left"))
    }

    async fn generate_structured(
        &self,
        _messages: Vec<serde_json::Value>,
        _schema: serde_json::Value,
    ) -> Result<StructuredReply> {
        self.structured_call_count.fetch_add(1, Ordering::SeqCst);
        self.structured
            .lock()
            .unwrap()
            .pop_front()
            .map(|json| StructuredReply { json, usage: None })
            .ok_or_else(|| anyhow!("MockAI: no scripted structured reply left"))
    }
}

pub struct MockEmbeddingService;

#[async_trait]
impl BaseEmbeddingService for MockEmbeddingService {
    async fn generate(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; 1536])
    }
}

pub struct MockTextExtractor {
    text: String,
}

impl MockTextExtractor {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl BaseTextExtractor for MockTextExtractor {
    async fn extract(&self, _source_ref: &str) -> Result<ExtractedText> {
        Ok(ExtractedText {
            text: self.text.clone(),
            metadata: json!({}),
        })
    }
}

// =============================================================================
// In-memory stores
// =============================================================================

#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: RwLock<Vec<StoredEntity>>,
}

impl InMemoryEntityStore {
    pub fn all(&self) -> Vec<StoredEntity> {
        self.entities.read().unwrap().clone()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_by_name(&self, kind: EntityKind, name: &str) -> Result<Option<StoredEntity>> {
        Ok(self
            .entities
            .read()
            .unwrap()
            .iter()
            .find(|e| e.kind == kind && e.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<StoredEntity>> {
        Ok(self
            .entities
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect())
    }

    async fn insert(&self, entity: StoredEntity) -> Result<StoredEntity> {
        let mut entities = self.entities.write().unwrap();
        // Same uniqueness rule the real store enforces with a constraint.
        if let Some(existing) = entities
            .iter()
            .find(|e| e.kind == entity.kind && e.normalized_name == entity.normalized_name)
        {
            return Ok(existing.clone());
        }
        entities.push(entity.clone());
        Ok(entity)
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
    sessions: RwLock<HashMap<BatchSessionId, SequentialBatchSession>>,
    clarifications: RwLock<HashMap<ClarificationId, ClarificationSession>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_document(&self, document: &Document) -> Result<()> {
        self.documents
            .write()
            .unwrap()
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.read().unwrap().get(&id).cloned())
    }

    async fn update_document(&self, document: &Document) -> Result<()> {
        self.documents
            .write()
            .unwrap()
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn find_active_session(
        &self,
        document_id: DocumentId,
        user_id: UserId,
    ) -> Result<Option<SequentialBatchSession>> {
        Ok(self
            .sessions
            .read()
            .unwrap()
            .values()
            .find(|s| {
                s.document_id == document_id
                    && s.user_id == user_id
                    && !s.status.is_terminal()
            })
            .cloned())
    }

    async fn insert_session(&self, session: &SequentialBatchSession) -> Result<()> {
        self.sessions
            .write()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: BatchSessionId) -> Result<Option<SequentialBatchSession>> {
        Ok(self.sessions.read().unwrap().get(&id).cloned())
    }

    async fn update_session(&self, session: &SequentialBatchSession) -> Result<()> {
        self.sessions
            .write()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn insert_clarification(&self, session: &ClarificationSession) -> Result<()> {
        self.clarifications
            .write()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_clarification(
        &self,
        id: ClarificationId,
    ) -> Result<Option<ClarificationSession>> {
        Ok(self.clarifications.read().unwrap().get(&id).cloned())
    }

    async fn update_clarification(&self, session: &ClarificationSession) -> Result<()> {
        self.clarifications
            .write()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommittedTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub transaction: TransactionDraft,
    pub enrichment: Enrichment,
}

#[derive(Default)]
pub struct InMemoryTransactionStore {
    committed: RwLock<Vec<CommittedTransaction>>,
    fail_descriptions: RwLock<HashSet<String>>,
}

impl InMemoryTransactionStore {
    pub fn committed(&self) -> Vec<CommittedTransaction> {
        self.committed.read().unwrap().clone()
    }

    /// Make commits fail for transactions with this description.
    pub fn fail_on_description(&self, description: &str) {
        self.fail_descriptions
            .write()
            .unwrap()
            .insert(description.to_string());
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn commit(
        &self,
        user_id: UserId,
        transaction: &TransactionDraft,
        enrichment: &Enrichment,
    ) -> Result<TransactionId> {
        if self
            .fail_descriptions
            .read()
            .unwrap()
            .contains(&transaction.description)
        {
            return Err(anyhow!("invalid transaction data"));
        }
        let id = TransactionId::new();
        self.committed.write().unwrap().push(CommittedTransaction {
            id,
            user_id,
            transaction: transaction.clone(),
            enrichment: enrichment.clone(),
        });
        Ok(id)
    }
}

#[derive(Default)]
pub struct RecordingSimilarityIndex {
    indexed: RwLock<Vec<(TransactionId, String)>>,
}

impl RecordingSimilarityIndex {
    pub fn indexed(&self) -> Vec<(TransactionId, String)> {
        self.indexed.read().unwrap().clone()
    }
}

#[async_trait]
impl SimilarityIndex for RecordingSimilarityIndex {
    async fn index(&self, transaction_id: TransactionId, text: &str) -> Result<()> {
        self.indexed
            .write()
            .unwrap()
            .push((transaction_id, text.to_string()));
        Ok(())
    }
}
