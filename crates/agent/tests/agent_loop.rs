//! End-to-end tests of the agent loop against the scripted mock backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map};

use aw_agent::{collect_final_text, find_agent, Agent, Callbacks, InvocationContext, LlmAgent, SequentialAgent};
use aw_domain::{Content, Error, Event, LlmResponse, Part, Role, RunConfig};
use aw_model::MockModel;
use aw_services::{Services, SessionKey, SessionService};
use aw_tools::FunctionTool;

async fn make_ctx(services: &Services, user_text: Option<&str>, config: RunConfig) -> InvocationContext {
    let session = services
        .session
        .as_ref()
        .expect("session service")
        .create_session("app", "user", Some("s1".into()))
        .await
        .expect("create session");
    InvocationContext::new(
        session,
        user_text.map(Content::user_text),
        services.clone(),
        config,
    )
}

fn greet_tool() -> Arc<FunctionTool> {
    Arc::new(FunctionTool::new(
        "greet",
        "Greets a person by name",
        json!({"type": "object", "properties": {"name": {"type": "string"}}}),
        |args| async move {
            let name = args
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("stranger");
            Ok(json!(format!("Hello, {name}!")))
        },
    ))
}

fn assert_event_invariants(events: &[Event]) {
    // Unique ids, non-decreasing timestamps, exactly one terminal marker.
    let mut ids = std::collections::HashSet::new();
    for event in events {
        assert!(ids.insert(event.id.clone()), "duplicate event id");
    }
    for pair in events.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    let terminals = events
        .iter()
        .filter(|e| e.turn_complete || e.interrupted || e.error_code.is_some())
        .count();
    assert_eq!(terminals, 1, "expected exactly one terminal event");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plain turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn simple_text_turn() {
    let services = Services::in_memory();
    let agent = LlmAgent::builder("assistant", Arc::new(MockModel::text_reply("Hi"))).build();
    let ctx = make_ctx(&services, Some("Hello"), RunConfig::default()).await;

    let stream = agent.run(ctx).await.unwrap();
    let (text, events) = collect_final_text(stream).await;

    assert_eq!(text, "Hi");
    assert_event_invariants(&events);
    assert!(events.last().unwrap().turn_complete);
}

#[tokio::test]
async fn tool_call_turn_orders_events() {
    let services = Services::in_memory();
    let tool = greet_tool();
    let mut args = Map::new();
    args.insert("name".into(), json!("World"));
    let model = Arc::new(MockModel::tool_then_text("c1", "greet", args, "Hello, World!"));
    let agent = LlmAgent::builder("assistant", model)
        .tool(tool.clone())
        .build();
    let ctx = make_ctx(&services, Some("greet World"), RunConfig::default()).await;

    let stream = agent.run(ctx).await.unwrap();
    let (text, events) = collect_final_text(stream).await;

    assert_eq!(text, "Hello, World!");
    assert_eq!(tool.call_count(), 1);
    assert_event_invariants(&events);

    // assistant(function_call) → function_response → assistant(final).
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].function_calls().len(), 1);
    assert!(!events[0].turn_complete);
    let responses = events[1].function_responses();
    assert_eq!(responses.len(), 1);
    if let Part::FunctionResponse { response, .. } = &responses[0] {
        assert_eq!(response.get("result"), Some(&json!("Hello, World!")));
    } else {
        panic!("expected function response part");
    }
    assert!(events[2].turn_complete);
}

#[tokio::test]
async fn unknown_tool_yields_error_response_and_continues() {
    let services = Services::in_memory();
    let model = Arc::new(MockModel::tool_then_text(
        "c1",
        "missing_tool",
        Map::new(),
        "recovered",
    ));
    let agent = LlmAgent::builder("assistant", model).build();
    let ctx = make_ctx(&services, Some("go"), RunConfig::default()).await;

    let (text, events) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    assert_eq!(text, "recovered");
    let responses = events[1].function_responses();
    if let Part::FunctionResponse { response, .. } = &responses[0] {
        assert!(response
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap()
            .contains("not found"));
    } else {
        panic!("expected function response part");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn repeating_pattern_terminates_loop() {
    let services = Services::in_memory();
    let tool = greet_tool();
    let mut args = Map::new();
    args.insert("x".into(), json!(1));
    // The script never changes, so the fingerprints repeat forever.
    let model = Arc::new(MockModel::always_tool_call("greet", args));
    let config = RunConfig {
        max_turns: 50,
        ..RunConfig::default()
    };
    let agent = LlmAgent::builder("assistant", model)
        .tool(tool.clone())
        .build();
    let ctx = make_ctx(&services, Some("spin"), config).await;

    let (text, events) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    assert_eq!(text, "Completed the tool execution");
    assert!(tool.call_count() <= 10);
    assert_event_invariants(&events);
}

#[tokio::test]
async fn tool_call_budget_terminates_loop() {
    let services = Services::in_memory();
    let tool = greet_tool();
    // Distinct arguments each turn, so only the budget check can fire.
    let responses: Vec<LlmResponse> = (0..40)
        .map(|i| {
            let mut args = Map::new();
            args.insert("name".into(), json!(format!("caller-{i}")));
            LlmResponse::from_content(
                Content::new(Role::Model).with_part(Part::function_call(
                    format!("c{i}"),
                    "greet",
                    args,
                )),
            )
        })
        .collect();
    let model = Arc::new(MockModel::new(responses));
    let config = RunConfig {
        max_turns: 40,
        max_tool_calls: 10,
        ..RunConfig::default()
    };
    let agent = LlmAgent::builder("assistant", model)
        .tool(tool.clone())
        .build();
    let ctx = make_ctx(&services, Some("go"), config).await;

    let (text, _events) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    assert_eq!(text, "Reached maximum number of tool calls");
    assert!(tool.call_count() <= 20);
}

#[tokio::test]
async fn max_turns_reached_without_tools() {
    let services = Services::in_memory();
    let tool = greet_tool();
    let mut args = Map::new();
    args.insert("x".into(), json!(1));
    let model = Arc::new(MockModel::always_tool_call("greet", args));
    // Window so large the pattern never trips within two turns.
    let config = RunConfig {
        max_turns: 2,
        ..RunConfig::default()
    };
    let agent = LlmAgent::builder("assistant", model).tool(tool).build();
    let ctx = make_ctx(&services, Some("go"), config).await;

    let (text, _) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    assert_eq!(text, "Max turns reached");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error semantics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn transient_model_errors_are_retried() {
    let services = Services::in_memory();
    let model = Arc::new(MockModel::fail_then_text(2, "ok"));
    let agent = LlmAgent::builder("assistant", model.clone()).build();
    let ctx = make_ctx(&services, Some("go"), RunConfig::default()).await;

    let (text, _) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    assert_eq!(text, "ok");
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn persistent_model_error_emits_error_event() {
    let services = Services::in_memory();
    let model = Arc::new(MockModel::fail_then_text(10, "unreachable"));
    let config = RunConfig {
        retry_attempts: 1,
        ..RunConfig::default()
    };
    let agent = LlmAgent::builder("assistant", model).build();
    let ctx = make_ctx(&services, Some("go"), config).await;

    let (_, events) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    let last = events.last().unwrap();
    assert_eq!(last.error_code.as_deref(), Some("MODEL_ERROR"));
}

#[tokio::test]
async fn callback_error_is_terminal() {
    let services = Services::in_memory();
    let agent = LlmAgent::builder("assistant", Arc::new(MockModel::text_reply("hi")))
        .callbacks(Callbacks::new().on_before_model(|_, _| {
            Err(Error::Other("hook rejected the request".into()))
        }))
        .build();
    let ctx = make_ctx(&services, Some("go"), RunConfig::default()).await;

    let (_, events) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    let last = events.last().unwrap();
    assert_eq!(last.error_code.as_deref(), Some("CALLBACK_ERROR"));
    assert!(last
        .error_message
        .as_deref()
        .unwrap()
        .contains("hook rejected"));
}

#[tokio::test]
async fn tool_timeout_is_reported_and_loop_continues() {
    let services = Services::in_memory();
    let slow = Arc::new(FunctionTool::new(
        "slow",
        "Sleeps past the deadline",
        json!({"type": "object"}),
        |_args| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!(null))
        },
    ));
    let model = Arc::new(MockModel::tool_then_text(
        "c1",
        "slow",
        Map::new(),
        "moved on",
    ));
    let config = RunConfig {
        tool_call_timeout_secs: 1,
        ..RunConfig::default()
    };
    let agent = LlmAgent::builder("assistant", model).tool(slow).build();
    let ctx = make_ctx(&services, Some("go"), config).await;

    let (text, events) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    assert_eq!(text, "moved on");
    let responses = events[1].function_responses();
    if let Part::FunctionResponse { response, .. } = &responses[0] {
        assert_eq!(response.get("error_type"), Some(&json!("timeout")));
    } else {
        panic!("expected function response part");
    }
}

#[tokio::test]
async fn invalid_arguments_are_not_retried() {
    let services = Services::in_memory();
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let calls_in_tool = calls.clone();
    let picky = Arc::new(
        FunctionTool::new(
            "picky",
            "Rejects its arguments",
            json!({"type": "object"}),
            move |_args| {
                let calls = calls_in_tool.clone();
                async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    Err(Error::InvalidArguments("missing field 'q'".into()))
                }
            },
        )
        .idempotent(),
    );
    let model = Arc::new(MockModel::tool_then_text(
        "c1",
        "picky",
        Map::new(),
        "corrected",
    ));
    let agent = LlmAgent::builder("assistant", model).tool(picky).build();
    let ctx = make_ctx(&services, Some("go"), RunConfig::default()).await;

    let (text, events) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    assert_eq!(text, "corrected");
    assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 1);
    let responses = events[1].function_responses();
    if let Part::FunctionResponse { response, .. } = &responses[0] {
        assert_eq!(response.get("error_type"), Some(&json!("invalid_arguments")));
    } else {
        panic!("expected function response part");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State, escalation, cancellation, streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tool_state_delta_lands_in_session() {
    let services = Services::in_memory();
    let stateful = Arc::new(FunctionTool::with_context(
        "remember",
        "Writes session state",
        json!({"type": "object"}),
        |_args, ctx: &mut aw_tools::ToolContext| {
            Box::pin(async move {
                ctx.set_state("color", json!("teal"));
                Ok(json!("stored"))
            })
        },
    ));
    let model = Arc::new(MockModel::tool_then_text("c1", "remember", Map::new(), "done"));
    let agent = LlmAgent::builder("assistant", model).tool(stateful).build();
    let ctx = make_ctx(&services, Some("go"), RunConfig::default()).await;

    collect_final_text(agent.run(ctx).await.unwrap()).await;

    let session = services
        .session
        .as_ref()
        .unwrap()
        .get_session(&SessionKey::new("app", "user", "s1"))
        .await
        .unwrap();
    assert_eq!(session.state.get("color"), Some(&json!("teal")));
}

#[tokio::test]
async fn escalating_tool_ends_invocation() {
    let services = Services::in_memory();
    let escalating = Arc::new(FunctionTool::with_context(
        "give_up",
        "Escalates to the parent",
        json!({"type": "object"}),
        |_args, ctx: &mut aw_tools::ToolContext| {
            Box::pin(async move {
                ctx.escalate();
                Ok(json!("escalated"))
            })
        },
    ));
    // The script would keep calling tools forever; escalation must win.
    let model = Arc::new(MockModel::always_tool_call("give_up", Map::new()));
    let config = RunConfig {
        max_turns: 50,
        ..RunConfig::default()
    };
    let agent = LlmAgent::builder("assistant", model).tool(escalating).build();
    let ctx = make_ctx(&services, Some("go"), config).await;

    let (_, events) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    assert!(events.iter().any(|e| e.actions.escalate));
    assert!(events.last().unwrap().turn_complete);
    assert_event_invariants(&events);
}

#[tokio::test]
async fn cancellation_mid_tool_interrupts() {
    let services = Services::in_memory();
    let slow = Arc::new(FunctionTool::new(
        "slow",
        "Sleeps for a long time",
        json!({"type": "object"}),
        |_args| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!(null))
        },
    ));
    let model = Arc::new(MockModel::tool_then_text("c1", "slow", Map::new(), "never"));
    let agent = LlmAgent::builder("assistant", model).tool(slow).build();
    let ctx = make_ctx(&services, Some("go"), RunConfig::default()).await;
    let cancel = ctx.cancel.clone();

    let mut stream = agent.run(ctx).await.unwrap();
    // First event: the assistant's function call. Then cancel mid-tool.
    let first = stream.recv().await.unwrap();
    assert_eq!(first.function_calls().len(), 1);
    cancel.cancel();

    let start = std::time::Instant::now();
    let mut saw_interrupted = false;
    while let Some(event) = stream.recv().await {
        if event.interrupted {
            saw_interrupted = true;
        }
    }
    assert!(saw_interrupted);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn streaming_emits_partials_then_final() {
    let services = Services::in_memory();
    let model = Arc::new(MockModel::text_reply("alpha beta gamma"));
    let config = RunConfig {
        streaming: true,
        ..RunConfig::default()
    };
    let agent = LlmAgent::builder("assistant", model).build();
    let ctx = make_ctx(&services, Some("go"), config).await;

    let (text, events) = collect_final_text(agent.run(ctx).await.unwrap()).await;
    assert_eq!(text, "alpha beta gamma");
    let partials = events.iter().filter(|e| e.partial).count();
    assert!(partials >= 2, "expected streamed partial events");
    // All events share the invocation id; partials precede the final.
    let inv = &events[0].invocation_id;
    assert!(events.iter().all(|e| &e.invocation_id == inv));
    assert!(events.last().unwrap().turn_complete);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Composition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn sequential_zero_rounds_emits_bare_turn_complete() {
    let services = Services::in_memory();
    let child = Arc::new(
        LlmAgent::builder("writer", Arc::new(MockModel::text_reply("draft"))).build(),
    );
    let seq = SequentialAgent::builder("pipeline")
        .sub_agent(child)
        .max_rounds(0)
        .build();
    let ctx = make_ctx(&services, Some("go"), RunConfig::default()).await;

    let (_, events) = collect_final_text(seq.run(ctx).await.unwrap()).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].turn_complete);
    assert!(events[0].content.is_none());
}

#[tokio::test]
async fn sequential_pipeline_runs_children_in_order() {
    let services = Services::in_memory();
    let writer = Arc::new(
        LlmAgent::builder("writer", Arc::new(MockModel::text_reply("the draft"))).build(),
    );
    let critic = Arc::new(
        LlmAgent::builder("critic", Arc::new(MockModel::text_reply("the review"))).build(),
    );
    let seq = SequentialAgent::builder("pipeline")
        .sub_agent(writer)
        .sub_agent(critic)
        .max_rounds(1)
        .build();
    let ctx = make_ctx(&services, Some("write then review"), RunConfig::default()).await;

    let (text, events) = collect_final_text(seq.run(ctx).await.unwrap()).await;
    assert_eq!(text, "the review");

    let authors: Vec<&str> = events.iter().map(|e| e.author.as_str()).collect();
    let writer_pos = authors.iter().position(|a| *a == "writer").unwrap();
    let critic_pos = authors.iter().position(|a| *a == "critic").unwrap();
    assert!(writer_pos < critic_pos);
    // Only the composite's closing event is terminal.
    let terminals = events.iter().filter(|e| e.turn_complete).count();
    assert_eq!(terminals, 1);
    assert_eq!(events.last().unwrap().author, "pipeline");
}

#[tokio::test]
async fn sequential_cancel_stops_before_next_child() {
    let services = Services::in_memory();
    let writer = Arc::new(
        LlmAgent::builder("writer", Arc::new(MockModel::text_reply("draft"))).build(),
    );
    let critic = Arc::new(
        LlmAgent::builder("critic", Arc::new(MockModel::text_reply("review"))).build(),
    );
    let seq = SequentialAgent::builder("pipeline")
        .sub_agent(writer)
        .sub_agent(critic)
        .max_rounds(1)
        .build();
    let ctx = make_ctx(&services, Some("go"), RunConfig::default()).await;
    ctx.cancel.cancel();

    let (_, events) = collect_final_text(seq.run(ctx).await.unwrap()).await;
    assert!(events.iter().all(|e| e.author != "critic"));
    assert!(events.iter().any(|e| e.interrupted));
}

#[tokio::test]
async fn find_agent_walks_sub_agents_only() {
    let leaf = Arc::new(
        LlmAgent::builder("leaf", Arc::new(MockModel::text_reply("x"))).build(),
    );
    let mid: Arc<dyn Agent> = Arc::new(
        SequentialAgent::builder("mid")
            .sub_agent(leaf.clone())
            .build(),
    );
    let root: Arc<dyn Agent> = Arc::new(
        SequentialAgent::builder("root").sub_agent(mid).build(),
    );

    assert!(find_agent(&root, "leaf").is_some());
    assert!(find_agent(&root, "mid").is_some());
    assert!(find_agent(&root, "missing").is_none());
}
