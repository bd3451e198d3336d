/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes two top-level command modules:

- `chat`  -- Stream a session interactively in the terminal
- `check` -- Validate a JSON value against an agent schema file

These handlers are intentionally small and use the library components:
the session API, the stream transport, and the orchestrator.
*/

use std::sync::Arc;

use crate::api::SessionApi;
use crate::config::Config;
use crate::error::{FormStreamError, Result};

// Chat command handler
pub mod chat {
    //! Interactive session handler.
    //!
    //! Activates a `SessionOrchestrator` for one session id, renders
    //! transcript / field / health updates as they stream in, and runs a
    //! readline loop that sends visitor messages: over the socket when
    //! the stream is bidirectional, over the request path when degraded.

    use super::*;
    use colored::Colorize;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::session::orchestrator::{
        ConnectionHealth, SessionEvent, SessionOrchestrator, SessionView,
    };
    use crate::session::state::MessageRole;
    use crate::stream::sse::SseConnector;
    use crate::stream::websocket::WebSocketConnector;
    use tokio::sync::{mpsc, watch};

    /// Start an interactive session
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `session` - Session id to resume; `None` creates a new session
    /// * `agent` - Agent id for session creation (required without `session`)
    ///
    /// # Errors
    ///
    /// Returns an error when neither a session id nor an agent id is
    /// given, or when session creation/lookup fails.
    pub async fn run_chat(
        config: Config,
        session: Option<String>,
        agent: Option<String>,
    ) -> Result<()> {
        let base_url = config.base_url()?;
        let headers = config.headers();
        let api = Arc::new(SessionApi::new(
            base_url.clone(),
            headers.clone(),
            config.request_timeout(),
        ));

        let session_id = match (session, agent) {
            (Some(id), _) => {
                // Verify the session exists before opening a stream for it.
                let existing = api.fetch_session(&id).await?;
                tracing::info!(session_id = %existing.id, status = ?existing.status, "resuming session");
                existing.id
            }
            (None, Some(agent_id)) => {
                let created = api.create_session(&agent_id).await?;
                tracing::info!(session_id = %created.id, "created session");
                created.id
            }
            (None, None) => {
                return Err(FormStreamError::Config(
                    "chat needs --session to resume or --agent to create".to_string(),
                )
                .into())
            }
        };

        let primary = Arc::new(WebSocketConnector::new(base_url.clone(), headers.clone()));
        let fallback = Arc::new(SseConnector::new(
            base_url,
            headers,
            config.request_timeout(),
        ));

        let (orchestrator, views, events) = SessionOrchestrator::activate(
            session_id.clone(),
            primary,
            fallback,
            Some(Arc::clone(&api)),
            config.orchestrator_options(),
        );

        let done = Arc::new(AtomicBool::new(false));
        let render = tokio::spawn(render_loop(views, events, Arc::clone(&done)));

        println!(
            "{} session {} (Ctrl-D or /quit to leave)\n",
            "formstream".bold(),
            session_id.cyan()
        );

        let mut rl = DefaultEditor::new()?;
        loop {
            if done.load(Ordering::SeqCst) {
                break;
            }
            match rl.readline("you> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if trimmed == "/quit" || trimmed == "/exit" {
                        break;
                    }
                    let _ = rl.add_history_entry(trimmed);
                    send(&orchestrator, &api, &session_id, trimmed).await;
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => {
                    tracing::error!("readline failed: {}", e);
                    break;
                }
            }
        }

        orchestrator.deactivate();
        render.abort();
        Ok(())
    }

    /// Send over the socket, falling back to the request path when the
    /// stream is degraded or down.
    async fn send(
        orchestrator: &SessionOrchestrator,
        api: &SessionApi,
        session_id: &str,
        content: &str,
    ) {
        if let Err(stream_err) = orchestrator.send_message(content) {
            tracing::debug!("stream send rejected, using request path: {}", stream_err);
            if let Err(e) = api.post_message(session_id, content).await {
                eprintln!("{} {}", "send failed:".red(), e);
            }
        }
    }

    /// Render snapshots and side-channel events until the session ends.
    async fn render_loop(
        mut views: watch::Receiver<SessionView>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        done: Arc<AtomicBool>,
    ) {
        let mut printed = 0usize;
        let mut typing_shown = false;
        let mut last_health = ConnectionHealth::Connecting;

        loop {
            tokio::select! {
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = views.borrow().clone();

                    for message in view.session.transcript.iter().skip(printed) {
                        let tag = match message.role {
                            MessageRole::Assistant => "agent".green().bold(),
                            MessageRole::User => "you  ".blue().bold(),
                            MessageRole::System => "sys  ".dimmed().bold(),
                        };
                        println!("{} {}", tag, message.content);
                    }
                    printed = view.session.transcript.len();

                    if view.assistant_typing != typing_shown {
                        typing_shown = view.assistant_typing;
                        if typing_shown {
                            println!("{}", "agent is typing...".dimmed());
                        }
                    }

                    if view.health != last_health {
                        render_health(view.health);
                        last_health = view.health;
                    }
                }

                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        SessionEvent::Completed(session) => {
                            println!("\n{}", "session complete".green().bold());
                            for (id, field) in &session.parsed_fields {
                                let mark = if field.validated { "✓".green() } else { "✗".red() };
                                println!("  {} {}: {}", mark, id, field.value);
                            }
                            done.store(true, Ordering::SeqCst);
                        }
                        SessionEvent::ServerError { message, detail } => {
                            match detail {
                                Some(detail) => {
                                    eprintln!("{} {} ({})", "server error:".red().bold(), message, detail)
                                }
                                None => eprintln!("{} {}", "server error:".red().bold(), message),
                            }
                        }
                        SessionEvent::ConnectionLost { error } => {
                            eprintln!("{} {}", "connection lost:".red().bold(), error);
                            done.store(true, Ordering::SeqCst);
                        }
                    }
                }
            }
        }
    }

    fn render_health(health: ConnectionHealth) {
        match health {
            ConnectionHealth::Connecting => {}
            ConnectionHealth::Connected { bidirectional: true } => {
                println!("{}", "connected".green().dimmed());
            }
            ConnectionHealth::Connected { bidirectional: false } => {
                println!(
                    "{}",
                    "connected (read-only stream; replies go over the request path)"
                        .yellow()
                        .dimmed()
                );
            }
            ConnectionHealth::Recovering { attempt } => {
                println!("{}", format!("reconnecting (attempt {})...", attempt).yellow());
            }
            ConnectionHealth::Lost => {}
        }
    }
}

// Check command handler
pub mod check {
    //! Schema validation helper.
    //!
    //! Loads a schema file (a JSON array of field definitions), picks one
    //! field, and runs the validation engine against a JSON value. A
    //! quick way for schema authors to see what the engine will say
    //! before wiring anything up.

    use super::*;
    use colored::Colorize;
    use std::path::Path;

    use crate::schema::{AgentField, FieldValue};
    use crate::validation;

    /// Validate `raw_value` against field `field_id` of the schema at
    /// `schema_path` and print the verdict.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema file cannot be read, the field id
    /// is unknown, or the value is not valid JSON.
    pub fn run_check(schema_path: &Path, field_id: &str, raw_value: &str) -> Result<()> {
        let contents = std::fs::read_to_string(schema_path).map_err(|e| {
            FormStreamError::Config(format!(
                "Failed to read schema file {}: {}",
                schema_path.display(),
                e
            ))
        })?;
        let fields: Vec<AgentField> = serde_json::from_str(&contents)
            .map_err(|e| FormStreamError::Config(format!("Failed to parse schema: {}", e)))?;

        let field = AgentField::find(&fields, field_id).ok_or_else(|| {
            FormStreamError::Config(format!("No field '{}' in schema", field_id))
        })?;

        let value: FieldValue = serde_json::from_str(raw_value)
            .map_err(|e| FormStreamError::Config(format!("Value is not valid JSON: {}", e)))?;

        let verdict = validation::validate(field, Some(&value));
        if verdict.valid {
            println!("{}", "valid".green().bold());
            if verdict.normalized != value {
                println!("normalized: {}", verdict.normalized);
            }
        } else {
            println!(
                "{} {}",
                "invalid:".red().bold(),
                verdict.error.as_deref().unwrap_or("unknown reason")
            );
        }
        Ok(())
    }
}
