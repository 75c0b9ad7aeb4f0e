//! Directive dispatch
//!
//! Every directive occurrence yields exactly one outcome. Handlers may be
//! non-idempotent, so each occurrence carries an invocation key; an outcome
//! already persisted under that key (from an earlier attempt of the same turn)
//! is reused instead of calling the handler again.

use crate::error::{within, EngineError};
use crate::models::{meta, Message, MessageRole, ToolOutcome, ToolStatus};
use crate::tools::directive::{Directive, DirectiveParse};
use crate::tools::{ToolContext, ToolRegistry};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stable key of one directive occurrence within one turn
pub fn invocation_key(session_id: &str, turn_id: &str, index: usize, tool_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b"|");
    hasher.update(turn_id.as_bytes());
    hasher.update(b"|");
    hasher.update(index.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(tool_name.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ToolDispatcher {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run directives in order of appearance. Never fails: every problem becomes
    /// that directive's error outcome.
    pub async fn dispatch(
        &self,
        ctx: &ToolContext,
        turn_id: &str,
        directives: &[Directive],
        prior: &HashMap<String, ToolOutcome>,
    ) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(directives.len());

        for directive in directives {
            let key = invocation_key(&ctx.session_id, turn_id, directive.index, directive.name());

            if let Some(previous) = prior.get(&key) {
                debug!(
                    tool_name = %directive.name(),
                    invocation_key = %key,
                    "Reusing persisted tool result"
                );
                let mut replayed = previous.clone();
                replayed.replayed = true;
                outcomes.push(replayed);
                continue;
            }

            let outcome = match &directive.parse {
                DirectiveParse::Ok { name, args } => self.execute(ctx, name, args, key).await,
                DirectiveParse::ParseError { name, raw, reason } => {
                    warn!(tool_name = %name, reason = %reason, "Tool directive parse error");
                    failed(
                        name,
                        Value::String(raw.clone()),
                        ToolStatus::ParseError,
                        EngineError::ToolParseError(reason.clone()).to_string(),
                        key,
                    )
                }
                DirectiveParse::UnknownTool { name, args } => {
                    warn!(tool_name = %name, "Directive names an unregistered tool");
                    failed(
                        name,
                        args.clone(),
                        ToolStatus::UnknownTool,
                        EngineError::UnknownTool(name.clone()).to_string(),
                        key,
                    )
                }
            };

            outcomes.push(outcome);
        }

        outcomes
    }

    async fn execute(&self, ctx: &ToolContext, name: &str, args: &Value, key: String) -> ToolOutcome {
        // Registry membership was checked at parse time, but parse and dispatch
        // may use different registries.
        let Some(tool) = self.registry.get(name) else {
            return failed(
                name,
                args.clone(),
                ToolStatus::UnknownTool,
                EngineError::UnknownTool(name.to_string()).to_string(),
                key,
            );
        };

        let start = Instant::now();
        let limit = self.timeout;
        let result = within(limit, tool.execute(ctx, args), || {
            EngineError::ToolExecutionError(format!("{} timed out after {:?}", name, limit))
        })
        .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                info!(
                    tool_name = %name,
                    owner_id = %ctx.owner_id,
                    elapsed_ms,
                    "Tool executed"
                );
                ToolOutcome {
                    tool_name: name.to_string(),
                    arguments: args.clone(),
                    status: ToolStatus::Success,
                    output,
                    error: None,
                    invocation_key: key,
                    invoked_at: Utc::now(),
                    replayed: false,
                }
            }
            Err(e) => {
                warn!(tool_name = %name, error = %e, elapsed_ms, "Tool execution failed");
                failed(name, args.clone(), ToolStatus::ExecutionError, describe(&e), key)
            }
        }
    }
}

/// Handler-facing errors are descriptive by contract; anything else is an
/// internal failure whose details stay in the logs.
fn describe(error: &EngineError) -> String {
    match error {
        EngineError::InvalidToolInput(_) | EngineError::ToolExecutionError(_) => error.to_string(),
        _ => EngineError::ToolExecutionError("the tool could not complete".to_string()).to_string(),
    }
}

fn failed(name: &str, arguments: Value, status: ToolStatus, error: String, key: String) -> ToolOutcome {
    ToolOutcome {
        tool_name: name.to_string(),
        arguments,
        status,
        output: Value::Null,
        error: Some(error),
        invocation_key: key,
        invoked_at: Utc::now(),
        replayed: false,
    }
}

/// Rebuild an outcome from its persisted tool message.
pub fn outcome_from_message(message: &Message) -> Option<ToolOutcome> {
    if message.role != MessageRole::Tool
        || message.message_type() != Some(meta::TYPE_TOOL_EXECUTION)
    {
        return None;
    }

    Some(ToolOutcome {
        tool_name: message.meta_str(meta::TOOL_NAME)?.to_string(),
        arguments: message.metadata.get(meta::ARGUMENTS).cloned().unwrap_or(Value::Null),
        status: ToolStatus::from_str_lossy(message.meta_str(meta::STATUS).unwrap_or_default()),
        output: message.metadata.get(meta::OUTPUT).cloned().unwrap_or(Value::Null),
        error: message.meta_str(meta::ERROR).map(str::to_string),
        invocation_key: message.meta_str(meta::INVOCATION_KEY)?.to_string(),
        invoked_at: message.timestamp,
        replayed: false,
    })
}

/// Persisted outcomes of a turn, keyed by invocation key
pub fn prior_outcomes(messages: &[Message]) -> HashMap<String, ToolOutcome> {
    messages
        .iter()
        .filter_map(outcome_from_message)
        .map(|o| (o.invocation_key.clone(), o))
        .collect()
}
