use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tool call requested by the model.
///
/// Not persisted standalone; embedded in session/record state for audit and
/// resumability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    /// Argument map as sent by the model.
    pub arguments: serde_json::Value,
    /// Provider-assigned call id, when present.
    pub call_id: Option<String>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            call_id: None,
        }
    }
}

/// Typed result payload per tool, a tagged union with a fixed schema, so
/// enrichment extraction is a typed field access rather than JSON-path
/// guessing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolData {
    ContactResolved {
        id: Uuid,
        name: String,
        created: bool,
        match_confidence: f32,
    },
    CategoryResolved {
        id: Uuid,
        name: String,
        created: bool,
        match_confidence: f32,
    },
    AccountFound {
        id: Option<Uuid>,
        name: String,
        found: bool,
    },
    AccountCreated {
        id: Uuid,
        name: String,
    },
    TransactionTypeValidated {
        value: String,
        valid: bool,
    },
    /// The user declined a confirmation-gated call. Not an error; extraction
    /// proceeds without this enrichment.
    DeclinedByUser {
        tool: String,
    },
}

impl ToolData {
    /// Whether executing the tool actually created a new entity.
    pub fn created(&self) -> bool {
        match self {
            ToolData::ContactResolved { created, .. }
            | ToolData::CategoryResolved { created, .. } => *created,
            ToolData::AccountCreated { .. } => true,
            _ => false,
        }
    }
}

/// Uniform success/error envelope for every tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<ToolData>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: ToolData) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn declined(tool: impl Into<String>) -> Self {
        Self::ok(ToolData::DeclinedByUser { tool: tool.into() })
    }

    /// Whether the underlying tool created a new entity.
    pub fn created(&self) -> bool {
        self.data.as_ref().is_some_and(ToolData::created)
    }
}

/// A tool call held back for human confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCall {
    pub invocation: ToolInvocation,
    /// Human-readable confirmation question, templated per tool.
    pub question: String,
    /// For `conditional` tools the call already ran; its result is held here
    /// provisionally until the user approves or declines.
    pub provisional: Option<ToolResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_flag() {
        let created = ToolData::ContactResolved {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            created: true,
            match_confidence: 0.0,
        };
        assert!(created.created());

        let matched = ToolData::ContactResolved {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            created: false,
            match_confidence: 1.0,
        };
        assert!(!matched.created());

        let account = ToolData::AccountCreated {
            id: Uuid::new_v4(),
            name: "Checking".into(),
        };
        assert!(account.created());

        let validated = ToolData::TransactionTypeValidated {
            value: "expense".into(),
            valid: true,
        };
        assert!(!validated.created());
    }

    #[test]
    fn test_declined_is_success_not_error() {
        let result = ToolResult::declined("resolve_contact");
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(!result.created());
    }

    #[test]
    fn test_tagged_serialization() {
        let result = ToolResult::ok(ToolData::TransactionTypeValidated {
            value: "income".into(),
            valid: true,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["data"]["kind"], "transaction_type_validated");
    }
}
