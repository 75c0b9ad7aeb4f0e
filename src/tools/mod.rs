//! Tool trait and registry
//!
//! Tools are the side-effecting half of a turn. The model requests them with
//! an embedded directive (see [`directive`]); the [`ToolDispatcher`] runs each
//! occurrence at most once.

pub mod directive;
pub mod dispatcher;

pub use directive::{parse_reply, strip_directives, Directive, DirectiveParse, ParsedReply};
pub use dispatcher::{invocation_key, ToolDispatcher};

use crate::error::EngineError;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Who a tool call acts for
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub owner_id: String,
    pub session_id: String,
}

/// A single tool handler.
///
/// Handlers validate their own arguments and report problems as `Err` with a
/// descriptive message; the dispatcher turns that into the directive's result.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Example argument object shown to the model, e.g. `{"amount": 12.5}`
    fn usage(&self) -> &'static str;
    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<Value>;
}

/// Tool registry for looking up and executing tools
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tools sorted by name, for stable prompts
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.tools.values().cloned().collect();
        tools.sort_by_key(|t| t.name());
        tools
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================
// Argument helpers for handlers
// =============================

pub fn ensure_object(args: &Value) -> Result<&serde_json::Map<String, Value>> {
    args.as_object().ok_or_else(|| {
        EngineError::InvalidToolInput("arguments must be a JSON object".to_string())
    })
}

pub fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::InvalidToolInput(format!("'{}' must be a non-empty string", key)))
}

pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Accepts numbers and numeric strings ("12.50")
pub fn require_number(args: &Value, key: &str) -> Result<f64> {
    optional_number(args, key)?
        .ok_or_else(|| EngineError::InvalidToolInput(format!("'{}' is required", key)))
}

pub fn optional_number(args: &Value, key: &str) -> Result<Option<f64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| EngineError::InvalidToolInput(format!("'{}' must be a number", key))),
        Some(_) => Err(EngineError::InvalidToolInput(format!("'{}' must be a number", key))),
    }
}

pub fn optional_limit(args: &Value, default: usize, max: usize) -> Result<usize> {
    match optional_number(args, "limit")? {
        None => Ok(default),
        Some(n) if n >= 1.0 => Ok((n as usize).min(max)),
        Some(_) => Err(EngineError::InvalidToolInput(
            "'limit' must be at least 1".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingTool;
    use serde_json::json;

    #[test]
    fn test_registry_lookup_and_listing() {
        let registry = ToolRegistry::new()
            .with(Arc::new(CountingTool::new("zeta", json!("z"))))
            .with(Arc::new(CountingTool::new("alpha", json!("a"))));

        assert!(registry.contains("alpha"));
        assert!(registry.get("missing").is_none());
        let names: Vec<&str> = registry.list().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_number_helpers() {
        let args = json!({"amount": "12.50", "bad": "x", "n": 3, "flag": true});
        assert_eq!(require_number(&args, "amount").unwrap(), 12.5);
        assert_eq!(require_number(&args, "n").unwrap(), 3.0);
        assert!(require_number(&args, "bad").is_err());
        assert!(require_number(&args, "flag").is_err());
        assert!(require_number(&args, "missing").is_err());
        assert_eq!(optional_number(&args, "missing").unwrap(), None);
    }

    #[test]
    fn test_string_helpers() {
        let args = json!({"name": "  Ada ", "blank": "  "});
        assert_eq!(require_str(&args, "name").unwrap(), "Ada");
        assert!(require_str(&args, "blank").is_err());
        assert_eq!(optional_str(&args, "blank"), None);
    }

    #[test]
    fn test_limit_helper() {
        assert_eq!(optional_limit(&json!({}), 5, 20).unwrap(), 5);
        assert_eq!(optional_limit(&json!({"limit": 100}), 5, 20).unwrap(), 20);
        assert!(optional_limit(&json!({"limit": 0}), 5, 20).is_err());
    }
}
