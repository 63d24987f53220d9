//! End-to-end workflow sessions against a stub transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use guided_chat::agent::{GENERIC_ERROR_MESSAGE, InvocationOutcome, SessionEvent};
use guided_chat::error::{Error, TransportError, WorkflowError};
use guided_chat::handoff::PayloadKind;
use guided_chat::llm::Role;
use guided_chat::session::WorkflowSession;
use guided_chat::transcript::{DraftStore, MemoryDraftStore, draft_key};
use guided_chat::workflow::builtin::modes;
use guided_chat::workflow::{InstanceStatus, StaticRegistry, Step, WorkflowDefinition, builtin_registry};

use common::{StubTransport, drain, fast_config, is_critic, step_of};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn session(transport: Arc<StubTransport>) -> WorkflowSession {
    WorkflowSession::new(Arc::new(builtin_registry()), transport, fast_config())
}

async fn wait_reveal(outcome: &InvocationOutcome) {
    if let Some(reveal) = outcome.reply().and_then(|r| r.reveal.as_ref()) {
        reveal.wait().await;
    }
}

#[tokio::test]
async fn onboarding_runs_to_presenter_controlled_end() {
    timeout(TEST_TIMEOUT, async {
        let transport = StubTransport::new(|req| match step_of(req) {
            "welcome" => Ok("Welcome! What should I call you?".into()),
            "profile_summary" => Ok(
                "You're Sam and you want to focus on fitness.\n\nPROFILE_SUMMARY_JSON:\n{\"displayName\":\"Sam\",\"focusArea\":\"fitness\"}"
                    .into(),
            ),
            other => panic!("unexpected step {other}"),
        });
        let session = session(transport.clone());
        let mut events = session.subscribe();

        assert!(!session.activate(modes::FIRST_TIME_ONBOARDING).await.unwrap());

        let opening = session.bootstrap().await;
        wait_reveal(&opening).await;
        let status = session.status().await.unwrap();
        assert_eq!(status.current_step.unwrap().id, "name");

        session.submit_user_input("Sam").await.unwrap();
        let outcome = session.submit_user_input("fitness").await.unwrap();
        assert_eq!(
            outcome.reply().unwrap().payload_kind,
            Some(PayloadKind::ProfileSummary)
        );
        wait_reveal(&outcome).await;

        let visible = session.timeline().timeline().await;
        let contents: Vec<&str> = visible.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "Welcome! What should I call you?",
                "Sam",
                "fitness",
                "You're Sam and you want to focus on fitness."
            ]
        );

        let confirmed = session
            .confirm_payload(PayloadKind::ProfileSummary)
            .await
            .unwrap();
        assert_eq!(confirmed["displayName"], "Sam");

        // Opted out of auto-complete: parked on the terminal step.
        let status = session.status().await.unwrap();
        assert_eq!(status.instance.status, InstanceStatus::InProgress);
        assert_eq!(status.current_step.unwrap().id, "confirm_profile");
        let data = &status.instance.collected_data;
        assert_eq!(data["display_name"], "Sam");
        assert_eq!(data["focus_area"], "fitness");
        assert_eq!(data["profile_summary"]["focusArea"], "fitness");

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::PayloadReady { kind: PayloadKind::ProfileSummary, .. }
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::WorkflowStatusChanged { .. })));

        // The profile generation saw the collected answers.
        let summary_request = transport
            .requests()
            .into_iter()
            .find(|r| step_of(r) == "profile_summary")
            .unwrap();
        assert!(summary_request
            .turns
            .iter()
            .any(|t| t.role == Role::System && t.content.contains("display_name: Sam")));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn arc_creation_completes_on_confirmation() {
    timeout(TEST_TIMEOUT, async {
        let transport = StubTransport::new(|req| {
            if is_critic(req) {
                return Ok(r#"{"specificity":2,"grounding":2,"coherence":2,"voice":1,"actionability":2,"total":9}"#.into());
            }
            Ok("Here's an arc for you.\n\nARC_PROPOSAL_JSON:\n{\"name\":\"Garden Keeper\",\"narrative\":\"I tend what I plant.\"}".into())
        });
        let store = Arc::new(MemoryDraftStore::new());
        let session = session(transport.clone()).with_draft_store(store.clone());
        let mut events = session.subscribe();

        session.activate(modes::ARC_CREATION).await.unwrap();
        assert!(matches!(session.bootstrap().await, InvocationOutcome::Skipped));

        session.submit_user_input("gardening").await.unwrap();
        session.submit_user_input("I want to slow down").await.unwrap();
        let outcome = session.submit_user_input("a patient grower").await.unwrap();
        let reply = outcome.reply().unwrap();
        assert_eq!(reply.payload_kind, Some(PayloadKind::ArcProposal));
        assert!(!reply.replaced_by_fallback);
        wait_reveal(&outcome).await;

        // One generation plus one critic call.
        assert_eq!(transport.call_count(), 2);
        assert_eq!(
            session.pending_payload(PayloadKind::ArcProposal).await,
            Some(json!({"name": "Garden Keeper", "narrative": "I tend what I plant."}))
        );

        session.confirm_payload(PayloadKind::ArcProposal).await.unwrap();
        let status = session.status().await.unwrap();
        assert_eq!(status.instance.status, InstanceStatus::Completed);
        assert!(status.instance.current_step_id.is_none());
        let outcome = status.instance.outcome.unwrap();
        assert_eq!(outcome["arc_proposal"]["name"], "Garden Keeper");
        assert_eq!(outcome["arc_domain"], "gardening");
        assert!(session.pending_payloads().await.is_empty());

        // Finished workflows leave no draft behind.
        assert!(store.load(&draft_key(modes::ARC_CREATION)).await.unwrap().is_none());

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::WorkflowStatusChanged { status: InstanceStatus::Completed, .. }
        )));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn weak_arc_is_swapped_for_fallback_before_it_is_shown() {
    timeout(TEST_TIMEOUT, async {
        let transport = StubTransport::new(|req| {
            if is_critic(req) {
                return Ok("```json\n{\"total\": \"3\"}\n```".into());
            }
            Ok("ARC_PROPOSAL_JSON: {\"name\":\"Stuff\",\"narrative\":\"Do things.\"}".into())
        });
        let session = session(transport);
        session.activate(modes::ARC_CREATION).await.unwrap();
        session.submit_user_input("cooking").await.unwrap();
        session.submit_user_input("to feed my family").await.unwrap();
        let outcome = session.submit_user_input("a home cook").await.unwrap();

        let reply = outcome.reply().unwrap();
        assert!(reply.replaced_by_fallback);
        assert!(reply.reveal.is_none(), "marker-only reply has no prose");

        let pending = session.pending_payload(PayloadKind::ArcProposal).await.unwrap();
        assert_eq!(pending["name"], "Cooking: Becoming home cook");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn refinement_replaces_pending_payload() {
    timeout(TEST_TIMEOUT, async {
        let transport = StubTransport::new(|req| {
            let last_user = req
                .turns
                .iter()
                .rev()
                .find(|t| t.role == Role::User)
                .map(|t| t.content.clone())
                .unwrap_or_default();
            let title = if last_user.contains("shorter") { "Run 3k" } else { "Run 10k" };
            Ok(format!("GOAL_PROPOSAL_JSON:\n{{\"title\": \"{title}\"}}"))
        });
        let session = session(transport.clone());
        session.activate(modes::GOAL_CREATION).await.unwrap();
        session.submit_user_input("get fit").await.unwrap();
        session.submit_user_input("by summer").await.unwrap();
        assert_eq!(
            session.pending_payload(PayloadKind::GoalProposal).await.unwrap()["title"],
            "Run 10k"
        );

        // Still on the generating step: more input is a refinement turn.
        session.submit_user_input("make it shorter").await.unwrap();
        assert_eq!(transport.call_count(), 2);
        assert_eq!(
            session.pending_payload(PayloadKind::GoalProposal).await.unwrap()["title"],
            "Run 3k"
        );
        assert_eq!(
            session.status().await.unwrap().current_step.unwrap().id,
            "proposal"
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn generic_failure_leaves_apology_and_allows_retry() {
    timeout(TEST_TIMEOUT, async {
        let transport = StubTransport::new(|_| {
            Err(TransportError::RequestFailed {
                transport: "stub".into(),
                reason: "HTTP 500: upstream exploded".into(),
            })
        });
        let session = session(transport.clone());
        let mut events = session.subscribe();
        session.activate(modes::GOAL_CREATION).await.unwrap();
        session.submit_user_input("read more").await.unwrap();
        let outcome = session.submit_user_input("this month").await.unwrap();
        assert!(matches!(outcome, InvocationOutcome::Failed { .. }));

        let visible = session.timeline().timeline().await;
        assert_eq!(visible.last().unwrap().role, Role::Assistant);
        assert_eq!(visible.last().unwrap().content, GENERIC_ERROR_MESSAGE);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::TransportError { .. })));

        // Manual retry goes straight back to the transport.
        session.invoke_agent_step("proposal").await;
        assert_eq!(transport.call_count(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn quota_exhaustion_blocks_generation_until_cleared() {
    timeout(TEST_TIMEOUT, async {
        let transport = StubTransport::new(|_| {
            Err(TransportError::RequestFailed {
                transport: "stub".into(),
                reason: "HTTP 403: Quota exceeded for this account".into(),
            })
        });
        let session = session(transport.clone());
        let mut events = session.subscribe();
        session.activate(modes::ACTIVITY_SUGGESTIONS).await.unwrap();

        let outcome = session.submit_user_input("I have 10 minutes").await.unwrap();
        assert!(matches!(outcome, InvocationOutcome::QuotaExceeded));
        assert!(session.status().await.unwrap().quota_suppressed);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::QuotaExceeded { .. })));

        // No apology for quota; the host shows a paywall instead.
        let assistant_messages = session
            .timeline()
            .timeline()
            .await
            .into_iter()
            .filter(|e| e.role == Role::Assistant)
            .count();
        assert_eq!(assistant_messages, 0);

        let blocked = session.submit_user_input("please?").await.unwrap();
        assert!(matches!(blocked, InvocationOutcome::QuotaExceeded));
        assert_eq!(transport.call_count(), 1);

        session.clear_quota_suppression();
        session.invoke_agent_step("suggest").await;
        assert_eq!(transport.call_count(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn late_reply_after_deactivation_is_dropped() {
    timeout(TEST_TIMEOUT, async {
        let transport = StubTransport::with_delay(Duration::from_millis(200), |_| {
            Ok("Too late.\nGOAL_PROPOSAL_JSON:\n{\"title\":\"x\"}".into())
        });
        let session = Arc::new(session(transport));
        session.activate(modes::GOAL_CREATION).await.unwrap();
        session.submit_user_input("learn piano").await.unwrap();

        let background = Arc::clone(&session);
        let call =
            tokio::spawn(async move { background.submit_user_input("this year").await.unwrap() });
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.deactivate().await;

        assert!(matches!(call.await.unwrap(), InvocationOutcome::Stale));
        assert!(session.pending_payloads().await.is_empty());
        assert!(session
            .timeline()
            .timeline()
            .await
            .iter()
            .all(|e| e.role == Role::User));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn draft_is_restored_instead_of_regenerating() {
    timeout(TEST_TIMEOUT, async {
        let store = Arc::new(MemoryDraftStore::new());
        let transport = StubTransport::new(|_| Ok("unused".into()));

        let first = session(transport.clone()).with_draft_store(store.clone());
        first.activate(modes::ARC_CREATION).await.unwrap();
        first.submit_user_input("woodworking").await.unwrap();
        first.set_pending_input("because I like").await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        first.deactivate().await;

        let saved = store
            .load(&draft_key(modes::ARC_CREATION))
            .await
            .unwrap()
            .expect("draft saved");
        assert_eq!(saved.pending_input, "because I like");

        let second = session(transport.clone()).with_draft_store(store.clone());
        assert!(second.activate(modes::ARC_CREATION).await.unwrap());
        assert!(matches!(second.bootstrap().await, InvocationOutcome::Skipped));
        let visible = second.timeline().timeline().await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].content, "woodworking");
        assert_eq!(second.timeline().pending_input().await, "because I like");
        assert_eq!(transport.call_count(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn empty_draft_is_discarded_on_activation() {
    let store = Arc::new(MemoryDraftStore::new());
    let key = draft_key(modes::ARC_CREATION);
    store
        .save(
            &key,
            &guided_chat::transcript::Draft {
                messages: vec![],
                pending_input: "   ".into(),
                updated_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();

    let session = session(StubTransport::new(|_| Ok("x".into()))).with_draft_store(store.clone());
    assert!(!session.activate(modes::ARC_CREATION).await.unwrap());
    assert!(store.load(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn drafts_are_only_kept_for_opted_in_workflows() {
    timeout(TEST_TIMEOUT, async {
        let store = Arc::new(MemoryDraftStore::new());
        let session = session(StubTransport::new(|_| Ok("Noted.".into())))
            .with_draft_store(store.clone());
        session.activate(modes::GOAL_CREATION).await.unwrap();
        session.submit_user_input("sleep better").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store
            .load(&draft_key(modes::GOAL_CREATION))
            .await
            .unwrap()
            .is_none());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_mode_and_inactive_session_are_errors() {
    let session = session(StubTransport::new(|_| Ok("x".into())));
    assert!(matches!(
        session.activate("no_such_mode").await,
        Err(Error::Workflow(WorkflowError::UnknownMode(_)))
    ));
    assert!(matches!(
        session.submit_user_input("hello").await,
        Err(Error::Workflow(WorkflowError::NotActive))
    ));
    assert!(session.confirm_payload(PayloadKind::ArcProposal).await.is_none());
}

#[tokio::test]
async fn skip_reveals_shows_full_reply_at_once() {
    let transport = StubTransport::new(|_| {
        Ok("A long welcome message.\n\nWith a second paragraph that takes time to type.".into())
    });
    let mut config = fast_config();
    config.reveal_chunk_chars = 1;
    config.reveal_tick = Duration::from_millis(50);
    let session = WorkflowSession::new(Arc::new(builtin_registry()), transport, config);

    session.activate(modes::FIRST_TIME_ONBOARDING).await.unwrap();
    let outcome = session.bootstrap().await;
    let reveal = outcome.reply().unwrap().reveal.clone().unwrap();
    assert!(reveal.is_running());

    session.skip_reveals().await;
    assert!(!reveal.is_running());
    let message = session
        .timeline()
        .message(reveal.message_id())
        .await
        .unwrap();
    assert_eq!(
        message.content,
        "A long welcome message.\n\nWith a second paragraph that takes time to type."
    );
}

#[tokio::test]
async fn chained_generation_sees_the_full_previous_reply() {
    timeout(TEST_TIMEOUT, async {
        let registry = StaticRegistry::new().with(WorkflowDefinition::new(
            "two-part-intro",
            "two_part_intro",
            vec![
                Step::agent_generate("opening")
                    .then("follow_up")
                    .with_prompt("Say hello."),
                Step::agent_generate("follow_up").with_prompt("Ask a follow-up question."),
            ],
        ));
        let transport = StubTransport::new(|req| match step_of(req) {
            "opening" => Ok("Hello, and welcome to a slow typist.".into()),
            _ => Ok("What brings you here?".into()),
        });
        let mut config = fast_config();
        config.reveal_chunk_chars = 3;
        config.reveal_tick = Duration::from_millis(20);
        let session = WorkflowSession::new(Arc::new(registry), transport.clone(), config);

        session.activate("two_part_intro").await.unwrap();
        session.bootstrap().await;
        assert_eq!(transport.call_count(), 2);

        let follow_up = &transport.requests()[1];
        assert_eq!(step_of(follow_up), "follow_up");
        let assistant: Vec<&str> = follow_up
            .turns
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(assistant, vec!["Hello, and welcome to a slow typist."]);

        let status = session.status().await.unwrap();
        assert_eq!(status.instance.status, InstanceStatus::Completed);
    })
    .await
    .expect("test timed out");
}
