//! Terminal chat against one assistant.
//!
//! `assistant-chat [kind]`, where kind defaults to `finance`.
//! Commands: `/history`, `/clear`, `/quit`.

use assistant_engine::{
    domains, ConversationEngine, EngineConfig, EngineServices, ToolStatus, TurnRequest,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const OWNER: &str = "terminal";
const UNREACHABLE: &str = "Sorry, your conversation can't be reached right now. Please try again.";
const TURN_FAILED: &str = "Sorry, something went wrong answering that. Please try again.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Keep the chat readable; RUST_LOG still overrides.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let kind = std::env::args().nth(1).unwrap_or_else(|| "finance".to_string());
    let profile = domains::profile_for(&kind).ok_or_else(|| {
        format!("unknown assistant '{}', expected one of: {}", kind, domains::KINDS.join(", "))
    })?;

    let config = EngineConfig::from_env()?;
    let services = EngineServices::from_config(&config)?;
    let engine = ConversationEngine::new(profile, services, &config);
    info!(kind = %kind, retrieval = engine.has_retrieval(), "Chat engine ready");

    println!("=== {} ===", engine.profile().persona.name);
    println!("Type a message, or /history, /clear, /quit\n");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session_id: Option<String> = None;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/history" => {
                match &session_id {
                    Some(id) => match engine.get_history(id, None).await {
                        Ok(messages) => {
                            for message in messages {
                                println!("[{}] {}", message.role, message.content);
                            }
                        }
                        Err(e) => {
                            warn!(session_id = %id, error = %e, "History read failed");
                            println!("{}", UNREACHABLE);
                        }
                    },
                    None => println!("(no conversation yet)"),
                }
                continue;
            }
            "/clear" => {
                match &session_id {
                    Some(id) => match engine.clear_history(id).await {
                        Ok(_) => println!("(history cleared)"),
                        Err(e) => {
                            warn!(session_id = %id, error = %e, "History clear failed");
                            println!("{}", UNREACHABLE);
                        }
                    },
                    None => println!("(history cleared)"),
                }
                continue;
            }
            _ => {}
        }

        let mut request = TurnRequest::new(line).for_owner(OWNER);
        if let Some(id) = &session_id {
            request = request.in_session(id.clone());
        }

        match engine.handle_turn(request).await {
            Ok(outcome) => {
                session_id = Some(outcome.session_id);
                if !outcome.response.text.is_empty() {
                    println!("{}", outcome.response.text);
                }
                for tool in &outcome.response.tool_outputs {
                    match tool.status {
                        ToolStatus::Success => println!("  [{}] {}", tool.tool_name, tool.output),
                        _ => println!(
                            "  [{}] {}: {}",
                            tool.tool_name,
                            tool.status.as_str(),
                            tool.error.as_deref().unwrap_or("failed")
                        ),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Turn failed");
                println!("{}", TURN_FAILED);
            }
        }
    }

    if let Some(id) = &session_id {
        if let Err(e) = engine.close_session(id).await {
            warn!(session_id = %id, error = %e, "Session close failed");
        }
    }
    Ok(())
}
