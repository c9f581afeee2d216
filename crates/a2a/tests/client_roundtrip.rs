//! Client ↔ server round-trips over a real loopback listener.

use std::sync::Arc;

use serde_json::json;

use aw_a2a::{
    A2aClient, A2aServer, AgentCapabilities, AgentCard, AgentExecutor, CardResolver, RemoteAgent,
    StreamResult, TaskManager, TaskState,
};
use aw_agent::{collect_final_text, Agent, InvocationContext, LlmAgent};
use aw_domain::{Content, RunConfig, ServerConfig};
use aw_model::MockModel;
use aw_services::{Services, SessionService};

async fn spawn_server(model: Arc<MockModel>) -> String {
    let agent = Arc::new(LlmAgent::builder("echo-agent", model).build());
    let tasks = Arc::new(TaskManager::new());
    let executor = Arc::new(AgentExecutor::new(
        agent,
        Services::in_memory(),
        RunConfig::default(),
        tasks,
        "test-app",
    ));
    let card = AgentCard {
        name: "echo-agent".into(),
        description: None,
        url: String::new(),
        provider: None,
        version: "0.1.0".into(),
        capabilities: AgentCapabilities {
            streaming: true,
            push_notifications: true,
            state_transition_history: false,
        },
        authentication: None,
        default_input_modes: Vec::new(),
        default_output_modes: Vec::new(),
        skills: Vec::new(),
    };
    let router = A2aServer::new(executor, card, ServerConfig::default()).router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn user_message(text: &str) -> aw_a2a::MessageSendParams {
    serde_json::from_value(json!({
        "message": {
            "kind": "message",
            "messageId": "m1",
            "role": "user",
            "parts": [{"type": "text", "text": text}]
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn card_resolver_fetches_well_known_card() {
    let base = spawn_server(Arc::new(MockModel::text_reply("Hi"))).await;
    let card = CardResolver::new(&base).resolve().await.unwrap();
    assert_eq!(card.name, "echo-agent");
    assert!(card.capabilities.streaming);
}

#[tokio::test]
async fn client_send_message_gets_completed_task() {
    let base = spawn_server(Arc::new(MockModel::text_reply("Hi"))).await;
    let client = A2aClient::new(&base);

    let task = client.send_message(user_message("Hello")).await.unwrap();
    assert_eq!(task.status.state, TaskState::Completed);
    assert_eq!(task.status.message.unwrap().text(), "Hi");

    // The same task is queryable afterwards.
    let fetched = client.get_task(&task.id).await.unwrap();
    assert_eq!(fetched.id, task.id);
}

#[tokio::test]
async fn client_stream_ends_with_final_status() {
    let base = spawn_server(Arc::new(MockModel::text_reply("streamed reply"))).await;
    let client = A2aClient::new(&base);

    let mut finals = Vec::new();
    let mut count = 0usize;
    client
        .send_message_stream(user_message("Hello"), |event| {
            count += 1;
            if let StreamResult::StatusUpdate(update) = &event {
                if update.final_ {
                    finals.push(update.status.state);
                }
            }
            Ok(())
        })
        .await
        .unwrap();

    assert!(count >= 2, "expected submitted + terminal events");
    assert_eq!(finals, vec![TaskState::Completed]);
}

#[tokio::test]
async fn handler_error_aborts_stream() {
    let base = spawn_server(Arc::new(MockModel::text_reply("x"))).await;
    let client = A2aClient::new(&base);

    let err = client
        .send_message_stream(user_message("Hello"), |_| Err("enough".to_string()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("enough"));
}

#[tokio::test]
async fn remote_agent_proxies_an_invocation() {
    let base = spawn_server(Arc::new(MockModel::text_reply("remote answer"))).await;
    let remote = RemoteAgent::new("proxy", Arc::new(A2aClient::new(&base)));

    let services = Services::in_memory();
    let session = services
        .session
        .as_ref()
        .unwrap()
        .create_session("local-app", "user", Some("local-session".into()))
        .await
        .unwrap();
    let ctx = InvocationContext::new(
        session,
        Some(Content::user_text("ask the remote")),
        services,
        RunConfig::default(),
    );

    let stream = remote.run(ctx).await.unwrap();
    let (text, events) = collect_final_text(stream).await;
    assert_eq!(text, "remote answer");
    assert!(events.iter().any(|e| e.turn_complete));
    assert!(events.iter().all(|e| e.author == "proxy"));
}
