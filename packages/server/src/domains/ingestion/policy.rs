//! Confirmation gating.
//!
//! Decides, per tool, whether a side-effecting call needs explicit human
//! approval. The table is an immutable value injected at construction time,
//! never global state.

use std::collections::HashMap;

use super::models::{ToolData, ToolInvocation, ToolResult};
use super::tools;

/// When a tool requires human confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationRule {
    /// Every invocation pauses for approval before it runs.
    Always,
    /// Never pauses.
    Never,
    /// Runs first; pauses only if the result reports `created: true`. The
    /// effect is treated as provisional by policy, not rolled back.
    Conditional,
}

/// Immutable tool-name to rule table.
#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    rules: HashMap<&'static str, ConfirmationRule>,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            rules: HashMap::from([
                (tools::RESOLVE_CONTACT, ConfirmationRule::Conditional),
                (tools::RESOLVE_CATEGORY, ConfirmationRule::Conditional),
                (tools::FIND_ACCOUNT, ConfirmationRule::Never),
                (tools::VALIDATE_TRANSACTION_TYPE, ConfirmationRule::Never),
                (tools::CREATE_BANK_ACCOUNT, ConfirmationRule::Always),
            ]),
        }
    }
}

impl ConfirmationPolicy {
    /// Unknown tools fall back to `Always`; an unregistered side effect is
    /// never run without a human in the loop.
    pub fn rule(&self, tool_name: &str) -> ConfirmationRule {
        self.rules
            .get(tool_name)
            .copied()
            .unwrap_or(ConfirmationRule::Always)
    }

    /// Deterministic gating decision. For `Conditional` the result must be
    /// supplied (the tool has to run before we know whether it created
    /// anything); without one the call is treated as needing confirmation.
    pub fn requires_confirmation(&self, tool_name: &str, result: Option<&ToolResult>) -> bool {
        match self.rule(tool_name) {
            ConfirmationRule::Always => true,
            ConfirmationRule::Never => false,
            ConfirmationRule::Conditional => result.map_or(true, ToolResult::created),
        }
    }
}

/// Human-readable confirmation question for a held-back call, templated per
/// tool from its arguments and provisional result.
pub fn confirmation_question(
    invocation: &ToolInvocation,
    provisional: Option<&ToolResult>,
) -> String {
    let arg_name = |key: &str| {
        invocation
            .arguments
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("(unnamed)")
            .to_string()
    };

    match invocation.name.as_str() {
        tools::RESOLVE_CONTACT => {
            let name = provisional
                .and_then(|r| match &r.data {
                    Some(ToolData::ContactResolved { name, .. }) => Some(name.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| arg_name("name"));
            format!("I found a new contact '{name}'. Should I save it?")
        }
        tools::RESOLVE_CATEGORY => {
            let name = provisional
                .and_then(|r| match &r.data {
                    Some(ToolData::CategoryResolved { name, .. }) => Some(name.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| arg_name("name"));
            format!("I found a new category '{name}'. Should I save it?")
        }
        tools::CREATE_BANK_ACCOUNT => {
            format!(
                "This will create a new bank account '{}'. Proceed?",
                arg_name("name")
            )
        }
        other => format!("The action '{other}' needs your approval. Proceed?"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_always_and_never_decide_before_execution() {
        let policy = ConfirmationPolicy::default();
        assert!(policy.requires_confirmation(tools::CREATE_BANK_ACCOUNT, None));
        assert!(!policy.requires_confirmation(tools::FIND_ACCOUNT, None));
        assert!(!policy.requires_confirmation(tools::VALIDATE_TRANSACTION_TYPE, None));
    }

    #[test]
    fn test_conditional_depends_on_created_flag() {
        let policy = ConfirmationPolicy::default();

        let created = ToolResult::ok(ToolData::ContactResolved {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            created: true,
            match_confidence: 0.0,
        });
        let matched = ToolResult::ok(ToolData::ContactResolved {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            created: false,
            match_confidence: 1.0,
        });

        assert!(policy.requires_confirmation(tools::RESOLVE_CONTACT, Some(&created)));
        assert!(!policy.requires_confirmation(tools::RESOLVE_CONTACT, Some(&matched)));
    }

    #[test]
    fn test_unknown_tool_defaults_to_always() {
        let policy = ConfirmationPolicy::default();
        assert_eq!(policy.rule("drop_everything"), ConfirmationRule::Always);
    }

    #[test]
    fn test_question_templating() {
        let invocation = ToolInvocation::new(
            tools::CREATE_BANK_ACCOUNT,
            json!({"name": "Checking"}),
        );
        let question = confirmation_question(&invocation, None);
        assert!(question.contains("Checking"));

        let resolve = ToolInvocation::new(tools::RESOLVE_CONTACT, json!({"name": "Bob"}));
        let provisional = ToolResult::ok(ToolData::ContactResolved {
            id: Uuid::new_v4(),
            name: "Bob Jones".into(),
            created: true,
            match_confidence: 0.0,
        });
        let question = confirmation_question(&resolve, Some(&provisional));
        assert!(question.contains("Bob Jones"));
    }
}
