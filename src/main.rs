use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use guided_chat::agent::{InvocationOutcome, SessionEvent};
use guided_chat::config::EngineConfig;
use guided_chat::handoff::PayloadKind;
use guided_chat::llm::{HttpTransport, TransportConfig};
use guided_chat::routes::{WorkflowRouteState, workflow_routes};
use guided_chat::session::WorkflowSession;
use guided_chat::transcript::{LibSqlDraftStore, RevealHandle, Timeline};
use guided_chat::workflow::builtin::modes;
use guided_chat::workflow::builtin_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mode = std::env::args()
        .nth(1)
        .unwrap_or_else(|| modes::FIRST_TIME_ONBOARDING.to_string());

    let config = EngineConfig::from_env();
    let transport_config = TransportConfig::from_env(config.transport_timeout)?;
    let transport = Arc::new(HttpTransport::new(transport_config.clone())?);

    let db_path = std::env::var("GUIDED_CHAT_DB_PATH")
        .unwrap_or_else(|_| "./data/guided-chat.db".to_string());
    let drafts = Arc::new(
        LibSqlDraftStore::new_local(Path::new(&db_path))
            .await
            .with_context(|| format!("Failed to open draft store at {db_path}"))?,
    );

    let registry = builtin_registry();
    eprintln!("💬 guided-chat v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Endpoint: {}", transport_config.endpoint);
    eprintln!("   Drafts: {db_path}");
    eprintln!("   Modes: {}", registry.modes().join(", "));

    let session = Arc::new(
        WorkflowSession::new(Arc::new(registry), transport, config).with_draft_store(drafts),
    );

    if let Some(port) = std::env::var("GUIDED_CHAT_HTTP_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
    {
        let app = workflow_routes(WorkflowRouteState {
            session: Arc::clone(&session),
        });
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
            .await
            .with_context(|| format!("Failed to bind port {port}"))?;
        eprintln!("   Status API: http://0.0.0.0:{port}/api/workflow/status");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
    }

    spawn_event_printer(&session);

    let rehydrated = session.activate(&mode).await?;
    eprintln!("   Workflow: {mode}{}", if rehydrated { " (resumed)" } else { "" });
    eprintln!("   Commands: /confirm, /skip, /quit\n");

    if rehydrated {
        for entry in session.timeline().timeline().await {
            println!("[{}] {}\n", entry.role, entry.content);
        }
    }
    let outcome = session.bootstrap().await;
    print_outcome(session.timeline(), outcome).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Error reading stdin");
                break;
            }
        };

        match line.trim() {
            "" => {}
            "/quit" => break,
            "/skip" => session.skip_reveals().await,
            "/confirm" => confirm(&session).await,
            text => match session.submit_user_input(text).await {
                Ok(outcome) => print_outcome(session.timeline(), outcome).await,
                Err(e) => eprintln!("Error: {e}"),
            },
        }
        eprint!("> ");
    }

    session.deactivate().await;
    Ok(())
}

/// Confirm the payload the current step expects, or any pending one.
async fn confirm(session: &WorkflowSession) {
    let expected = session
        .status()
        .await
        .and_then(|s| s.current_step)
        .and_then(|step| step.handoff);

    let mut kinds: Vec<PayloadKind> = expected.into_iter().collect();
    kinds.extend(PayloadKind::ALL);

    for kind in kinds {
        if let Some(value) = session.confirm_payload(kind).await {
            println!("✅ Confirmed {kind}:\n{}\n", serde_json::to_string_pretty(&value).unwrap_or_default());
            if let Some(status) = session.status().await {
                println!("   Status: {}\n", status.instance.status);
            }
            return;
        }
    }
    eprintln!("Nothing to confirm yet.");
}

async fn print_outcome(timeline: &Arc<Timeline>, outcome: InvocationOutcome) {
    match outcome {
        InvocationOutcome::Replied(reply) => {
            if let Some(reveal) = reply.reveal {
                print_reveal(timeline, &reveal).await;
            }
        }
        InvocationOutcome::Failed { .. } => {
            if let Some(last) = timeline.timeline().await.last() {
                println!("\n{}\n", last.content);
            }
        }
        InvocationOutcome::QuotaExceeded => eprintln!("Generation limit reached."),
        InvocationOutcome::AlreadyInFlight => eprintln!("Still working on that…"),
        InvocationOutcome::Skipped | InvocationOutcome::Stale => {}
    }
}

/// Echo a reveal to stdout as it grows.
async fn print_reveal(timeline: &Arc<Timeline>, reveal: &RevealHandle) {
    let mut changes = timeline.subscribe_changes();
    let mut printed = 0;
    println!();
    loop {
        if let Some(message) = timeline.message(reveal.message_id()).await {
            if let Some(fresh) = message.content.get(printed..) {
                print!("{fresh}");
                let _ = std::io::stdout().flush();
                printed = message.content.len();
            }
        }
        if !reveal.is_running() {
            break;
        }
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = reveal.wait() => {}
        }
    }
    println!("\n");
}

fn spawn_event_printer(session: &WorkflowSession) {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::PayloadReady {
                    kind,
                    payload,
                    replaced_by_fallback,
                    ..
                } => {
                    let note = if replaced_by_fallback { " (fallback)" } else { "" };
                    eprintln!(
                        "📦 {kind}{note}: {}\n   /confirm to accept, or reply to refine.",
                        serde_json::to_string_pretty(&payload).unwrap_or_default()
                    );
                }
                SessionEvent::QuotaExceeded { paywall_source, .. } => {
                    eprintln!("💳 Upgrade required ({})", paywall_source.as_deref().unwrap_or("generation"));
                }
                SessionEvent::WorkflowStatusChanged { status, .. } => {
                    eprintln!("🏁 Workflow {status}");
                }
                SessionEvent::StepCompleted { .. } | SessionEvent::TransportError { .. } => {}
            }
        }
    });
}
