//! The fixed tool registry and execution engine.
//!
//! Five side-effecting tools are bound to every extraction call. Each is a
//! typed `openai_client::Tool`; the engine erases them for dispatch and
//! normalizes every outcome into the uniform `ToolResult` envelope so one
//! failing call cannot take down a batch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use schemars::JsonSchema;
use serde::Deserialize;
use uuid::Uuid;

use openai_client::{ErasedTool, Tool};

use super::models::{EntityKind, StoredEntity, ToolData, ToolInvocation, ToolResult};
use super::resolver::{generate_variations, EntityResolver};
use super::store::EntityStore;
use crate::common::{AppError, AppResult};

pub const RESOLVE_CONTACT: &str = "resolve_contact";
pub const RESOLVE_CATEGORY: &str = "resolve_category";
pub const FIND_ACCOUNT: &str = "find_account";
pub const VALIDATE_TRANSACTION_TYPE: &str = "validate_transaction_type";
pub const CREATE_BANK_ACCOUNT: &str = "create_bank_account";

/// Failure raised by a tool body (store or resolver error). The engine folds
/// it into the result envelope; it never reaches the model raw.
#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Deserialize, JsonSchema)]
pub struct NameArgs {
    /// Free-text name as it appears in the document.
    pub name: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct TypeArgs {
    /// Candidate transaction type.
    pub value: String,
}

pub struct ResolveContactTool {
    resolver: Arc<EntityResolver>,
}

#[async_trait]
impl Tool for ResolveContactTool {
    const NAME: &'static str = RESOLVE_CONTACT;
    type Args = NameArgs;
    type Output = ToolData;
    type Error = ToolFailure;

    fn description(&self) -> &str {
        "Resolve a person or company name against known contacts, creating a new contact if none matches"
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let resolution = self.resolver.resolve(EntityKind::Contact, &args.name).await?;
        Ok(ToolData::ContactResolved {
            id: resolution.entity.id,
            name: resolution.entity.name,
            created: resolution.created,
            match_confidence: resolution.match_confidence,
        })
    }
}

pub struct ResolveCategoryTool {
    resolver: Arc<EntityResolver>,
}

#[async_trait]
impl Tool for ResolveCategoryTool {
    const NAME: &'static str = RESOLVE_CATEGORY;
    type Args = NameArgs;
    type Output = ToolData;
    type Error = ToolFailure;

    fn description(&self) -> &str {
        "Resolve a spending category name against known categories, creating a new category if none matches"
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let resolution = self
            .resolver
            .resolve(EntityKind::Category, &args.name)
            .await?;
        Ok(ToolData::CategoryResolved {
            id: resolution.entity.id,
            name: resolution.entity.name,
            created: resolution.created,
            match_confidence: resolution.match_confidence,
        })
    }
}

/// Pure lookup; never creates.
pub struct FindAccountTool {
    store: Arc<dyn EntityStore>,
}

#[async_trait]
impl Tool for FindAccountTool {
    const NAME: &'static str = FIND_ACCOUNT;
    type Args = NameArgs;
    type Output = ToolData;
    type Error = ToolFailure;

    fn description(&self) -> &str {
        "Look up a bank account by name; reports not-found instead of creating one"
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        if let Some(entity) = self
            .store
            .find_by_name(EntityKind::Account, &args.name)
            .await?
        {
            return Ok(ToolData::AccountFound {
                id: Some(entity.id),
                name: entity.name,
                found: true,
            });
        }

        let normalized = args.name.trim().to_lowercase();
        let matched = self
            .store
            .list(EntityKind::Account)
            .await?
            .into_iter()
            .find(|e| e.normalized_name == normalized || e.variations.contains(&normalized));
        Ok(match matched {
            Some(entity) => ToolData::AccountFound {
                id: Some(entity.id),
                name: entity.name,
                found: true,
            },
            None => ToolData::AccountFound {
                id: None,
                name: args.name,
                found: false,
            },
        })
    }
}

pub struct ValidateTransactionTypeTool;

#[async_trait]
impl Tool for ValidateTransactionTypeTool {
    const NAME: &'static str = VALIDATE_TRANSACTION_TYPE;
    type Args = TypeArgs;
    type Output = ToolData;
    type Error = std::convert::Infallible;

    fn description(&self) -> &str {
        "Check whether a transaction type is one of the supported values"
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let valid = super::models::VALID_TRANSACTION_TYPES
            .contains(&args.value.to_lowercase().as_str());
        Ok(ToolData::TransactionTypeValidated {
            value: args.value,
            valid,
        })
    }
}

pub struct CreateBankAccountTool {
    store: Arc<dyn EntityStore>,
}

#[async_trait]
impl Tool for CreateBankAccountTool {
    const NAME: &'static str = CREATE_BANK_ACCOUNT;
    type Args = NameArgs;
    type Output = ToolData;
    type Error = ToolFailure;

    fn description(&self) -> &str {
        "Create a new bank account with the given name"
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let entity = StoredEntity {
            id: Uuid::now_v7(),
            kind: EntityKind::Account,
            name: args.name.trim().to_string(),
            normalized_name: args.name.trim().to_lowercase(),
            variations: generate_variations(&args.name),
        };
        let stored = self.store.insert(entity).await?;
        Ok(ToolData::AccountCreated {
            id: stored.id,
            name: stored.name,
        })
    }
}

/// Dispatches tool invocations against the fixed registry.
pub struct ToolEngine {
    // Registration order is the order definitions are sent to the model.
    tools: Vec<Arc<dyn ErasedTool>>,
}

impl ToolEngine {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        let resolver = Arc::new(EntityResolver::new(store.clone()));
        Self {
            tools: vec![
                Arc::new(ResolveContactTool {
                    resolver: resolver.clone(),
                }),
                Arc::new(ResolveCategoryTool { resolver }),
                Arc::new(FindAccountTool {
                    store: store.clone(),
                }),
                Arc::new(ValidateTransactionTypeTool),
                Arc::new(CreateBankAccountTool { store }),
            ],
        }
    }

    /// Tool definitions in OpenAI wire format.
    pub fn definitions(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.tools
                .iter()
                .map(|t| t.definition().to_openai_format())
                .collect(),
        )
    }

    /// Execute one invocation. An unknown tool name is a client error; every
    /// other failure is folded into the result envelope.
    pub async fn execute(&self, invocation: &ToolInvocation) -> AppResult<ToolResult> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == invocation.name)
            .ok_or_else(|| {
                AppError::validation(
                    "execute_tool",
                    format!("unknown tool '{}'", invocation.name),
                )
            })?;

        let result = match tool.call_erased(&invocation.arguments).await {
            Ok(value) => match serde_json::from_value::<ToolData>(value) {
                Ok(data) => ToolResult::ok(data),
                Err(e) => ToolResult::err(format!("malformed tool output: {e}")),
            },
            Err(e) => ToolResult::err(e.to_string()),
        };
        if !result.success {
            tracing::warn!(tool = %invocation.name, error = ?result.error, "tool execution failed");
        }
        Ok(result)
    }

    /// Execute many invocations concurrently; results come back keyed by
    /// tool name with no ordering guarantee between calls.
    pub async fn execute_batch(
        &self,
        invocations: &[ToolInvocation],
    ) -> AppResult<HashMap<String, ToolResult>> {
        let futures = invocations.iter().map(|inv| async {
            let result = self.execute(inv).await?;
            Ok::<_, AppError>((inv.name.clone(), result))
        });

        let mut results = HashMap::new();
        for outcome in join_all(futures).await {
            let (name, result) = outcome?;
            results.insert(name, result);
        }
        Ok(results)
    }
}
