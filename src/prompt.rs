//! Prompt assembly
//!
//! Pure transform from persona, domain knowledge, tool registry, retrieved
//! documents and windowed history into a (system, user) prompt pair. Nothing
//! here performs I/O.
//!
//! User prompt sections always appear in this order, each omitted when empty:
//! conversation so far, retrieved context, current question.

use crate::models::{meta, Message, MessageRole, RetrievedDocument};
use crate::tools::directive::DIRECTIVE_PREFIX;
use crate::tools::ToolRegistry;
use std::fmt::Write;

/// Voice and standing instructions of one assistant
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub instructions: String,
}

impl Persona {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub system: String,
    pub user: String,
}

pub struct PromptAssembler;

impl PromptAssembler {
    pub fn assemble(
        persona: &Persona,
        domain_knowledge: &str,
        tools: &ToolRegistry,
        retrieved: &[RetrievedDocument],
        history: &[Message],
        new_user_text: &str,
    ) -> AssembledPrompt {
        AssembledPrompt {
            system: Self::system_prompt(persona, domain_knowledge, tools),
            user: Self::user_prompt(retrieved, history, new_user_text),
        }
    }

    fn system_prompt(persona: &Persona, domain_knowledge: &str, tools: &ToolRegistry) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "You are {}.", persona.name);
        out.push_str(persona.instructions.trim());
        out.push('\n');

        if !tools.is_empty() {
            out.push_str("\n## Tools\n");
            let _ = writeln!(
                out,
                "To perform an action, write a directive anywhere in your reply using exactly this syntax:\n{}<name>:<json object>",
                DIRECTIVE_PREFIX
            );
            out.push_str(
                "The directive is removed before the user sees your reply and its result is shown separately. \
                 Emit each action once. Arguments must be a single valid JSON object.\n\nAvailable tools:\n",
            );
            for tool in tools.list() {
                let _ = writeln!(
                    out,
                    "- {}: {}\n  Usage: {}{}:{}",
                    tool.name(),
                    tool.description(),
                    DIRECTIVE_PREFIX,
                    tool.name(),
                    tool.usage()
                );
            }
        }

        let knowledge = domain_knowledge.trim();
        if !knowledge.is_empty() {
            out.push_str("\n## Domain knowledge\n");
            out.push_str(knowledge);
            out.push('\n');
        }

        out
    }

    fn user_prompt(retrieved: &[RetrievedDocument], history: &[Message], new_user_text: &str) -> String {
        let mut out = String::new();

        let transcript: Vec<&Message> = history.iter().filter(|m| !m.content.trim().is_empty()).collect();
        if !transcript.is_empty() {
            out.push_str("## Conversation so far\n");
            for message in transcript {
                let _ = writeln!(out, "{}: {}", speaker(message), message.content.trim());
            }
            out.push('\n');
        }

        if !retrieved.is_empty() {
            out.push_str("## Retrieved context\n");
            for (i, doc) in retrieved.iter().enumerate() {
                let _ = writeln!(out, "[{}] (score {:.2}) {}", i + 1, doc.score, doc.content.trim());
            }
            out.push('\n');
        }

        out.push_str("## Current question\n");
        out.push_str(new_user_text.trim());
        out
    }
}

fn speaker(message: &Message) -> String {
    match message.role {
        MessageRole::User => "User".to_string(),
        MessageRole::Assistant => "Assistant".to_string(),
        MessageRole::System => "System".to_string(),
        MessageRole::Tool => match message.meta_str(meta::TOOL_NAME) {
            Some(name) => format!("Tool {}", name),
            None => "Tool".to_string(),
        },
    }
}
