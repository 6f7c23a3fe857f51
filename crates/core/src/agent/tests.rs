use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rewind_model::{ModelMessage, Role};
use rewind_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::timeout;

use crate::tool::{RegistryError, Tool, ToolResult};
use crate::{AgentBuilder, AgentError, AgentEvent, Turn, TurnError, TurnOutcome};

const WAIT: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct EchoInput {
    text: String,
}

struct EchoTool {
    schema: Value,
}

impl EchoTool {
    fn new() -> Self {
        Self {
            schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            }),
        }
    }
}

impl Tool for EchoTool {
    type Input = EchoInput;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the text back."
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move { Ok(input.text) }
    }
}

/// A tool that takes a while and records that it ran to the end.
struct SlowTool {
    done: Arc<AtomicBool>,
    schema: Value,
}

impl Tool for SlowTool {
    type Input = Value;

    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps for a bit."
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        _input: Value,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let done = Arc::clone(&self.done);
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            done.store(true, Ordering::SeqCst);
            Ok("slept".to_owned())
        }
    }
}

async fn drain(mut turn: Turn) -> (Vec<AgentEvent>, TurnOutcome) {
    timeout(WAIT, async move {
        let mut events = vec![];
        while let Some(event) = turn.next_event().await {
            events.push(event);
        }
        (events, turn.outcome().await)
    })
    .await
    .unwrap()
}

/// Reads events until `pred` matches, returning everything read so far.
async fn read_until(
    turn: &mut Turn,
    pred: impl Fn(&AgentEvent) -> bool,
) -> Vec<AgentEvent> {
    timeout(WAIT, async {
        let mut events = vec![];
        while let Some(event) = turn.next_event().await {
            let matched = pred(&event);
            events.push(event);
            if matched {
                return events;
            }
        }
        panic!("turn ended early: {events:?}");
    })
    .await
    .unwrap()
}

fn roles(messages: &[ModelMessage]) -> Vec<Role> {
    messages.iter().map(|m| m.role()).collect()
}

#[tokio::test]
async fn test_simple_answer() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider
        .add_assistant_response_step(PresetResponse::with_message("hi"));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let turn = agent.start("hello").await.unwrap();
    let (events, outcome) = drain(turn).await;

    assert_eq!(events, [AgentEvent::ContentDelta("hi".to_owned())]);
    let TurnOutcome::Completed(summary) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(summary.answer, "hi");
    assert_eq!(summary.rounds, 1);
    assert_eq!(summary.reasoning, None);

    let messages = agent.messages().await.unwrap();
    assert_eq!(roles(&messages), [Role::System, Role::User, Role::Assistant]);
    assert_eq!(messages[1].content(), Some("hello"));
    assert_eq!(messages[2].content(), Some("hi"));
}

#[tokio::test]
async fn test_tool_round_trip() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("call_1", "echo", r#"{"text":"x"}"#),
    ]));
    model_provider.add_tool_result_step();
    model_provider
        .add_assistant_response_step(PresetResponse::with_message("done"));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool::new())
        .unwrap()
        .build();
    let turn = agent.start("echo x").await.unwrap();
    let (events, outcome) = drain(turn).await;

    assert_eq!(
        events,
        [
            AgentEvent::ToolCallStarted {
                id: "call_1".to_owned(),
                name: "echo".to_owned(),
                arguments: r#"{"text":"x"}"#.to_owned(),
            },
            AgentEvent::ContentDelta("done".to_owned()),
        ]
    );
    let TurnOutcome::Completed(summary) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(summary.rounds, 2);

    let messages = agent.messages().await.unwrap();
    assert_eq!(
        roles(&messages),
        [
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );
    assert_eq!(messages[3], ModelMessage::tool("call_1", "x"));

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "echo");
}

#[tokio::test]
async fn test_several_calls_in_one_message() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("c1", "echo", r#"{"text":"a"}"#),
        PresetEvent::tool_call("c2", "echo", r#"{"text":"b"}"#),
    ]));
    model_provider.add_tool_result_step();
    model_provider.add_tool_result_step();
    model_provider
        .add_assistant_response_step(PresetResponse::with_message("done"));

    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool::new())
        .unwrap()
        .build();
    let turn = agent.start("echo both").await.unwrap();
    let (events, outcome) = drain(turn).await;
    assert!(matches!(outcome, TurnOutcome::Completed(_)));

    let started: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolCallStarted { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, ["c1", "c2"]);
    let done = AgentEvent::ContentDelta("done".to_owned());
    assert_eq!(events.last(), Some(&done));

    let messages = agent.messages().await.unwrap();
    assert_eq!(
        roles(&messages),
        [
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Tool,
            Role::Assistant
        ]
    );
    assert_eq!(messages[3], ModelMessage::tool("c1", "a"));
    assert_eq!(messages[4], ModelMessage::tool("c2", "b"));
    assert_eq!(messages[5].content(), Some("done"));
}

#[tokio::test]
async fn test_unknown_tool() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("call_1", "foo", "{}"),
    ]));
    model_provider.add_tool_result_step();
    model_provider
        .add_assistant_response_step(PresetResponse::with_message("ok"));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let turn = agent.start("call foo").await.unwrap();
    let (events, outcome) = drain(turn).await;

    assert!(matches!(outcome, TurnOutcome::Completed(_)));
    assert_eq!(
        events[1],
        AgentEvent::Error("foo: Tool not found: foo".to_owned())
    );
    let messages = agent.messages().await.unwrap();
    assert_eq!(messages[3].content(), Some("Tool not found: foo"));
}

#[tokio::test]
async fn test_cancel_mid_stream() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("call_1", "echo", r#"{"text":"x"}"#),
    ]));
    model_provider.add_tool_result_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::MessageDelta("par".to_owned()),
        PresetEvent::Stall,
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool::new())
        .unwrap()
        .build();
    let before = agent.snapshot().await.unwrap();
    let mut turn = agent.start("echo x").await.unwrap();
    read_until(&mut turn, |e| matches!(e, AgentEvent::ContentDelta(_))).await;

    agent.cancel().unwrap();
    let (_, outcome) = drain(turn).await;
    assert!(matches!(outcome, TurnOutcome::Aborted));

    let messages = agent.messages().await.unwrap();
    assert_eq!(messages.len(), before.message_count());
    assert_eq!(roles(&messages), [Role::System]);
}

#[tokio::test]
async fn test_cancel_before_any_event() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::Stall,
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let turn = agent.start("hello").await.unwrap();
    agent.cancel().unwrap();
    let (events, outcome) = drain(turn).await;

    assert!(events.is_empty());
    assert!(matches!(outcome, TurnOutcome::Aborted));
    assert_eq!(agent.messages().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_after_tool_calls() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("call_1", "echo", r#"{"text":"a"}"#),
    ]));
    model_provider.add_tool_result_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("call_2", "echo", r#"{"text":"b"}"#),
    ]));
    model_provider.add_tool_result_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::Stall,
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool::new())
        .unwrap()
        .build();
    let mut turn = agent.start("echo twice").await.unwrap();
    read_until(&mut turn, |e| {
        matches!(e, AgentEvent::ToolCallStarted { id, .. } if id == "call_2")
    })
    .await;

    agent.cancel().unwrap();
    let (_, outcome) = drain(turn).await;
    assert!(matches!(outcome, TurnOutcome::Aborted));
    assert_eq!(roles(&agent.messages().await.unwrap()), [Role::System]);
}

#[tokio::test]
async fn test_cancel_while_tool_runs() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::tool_call("call_1", "slow", "{}"),
    ]));
    model_provider.add_tool_result_step();
    model_provider
        .add_assistant_response_step(PresetResponse::with_message("late"));

    let done = Arc::new(AtomicBool::new(false));
    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(SlowTool {
            done: Arc::clone(&done),
            schema: json!({ "type": "object" }),
        })
        .unwrap()
        .build();
    let before = agent.snapshot().await.unwrap();
    let mut turn = agent.start("take your time").await.unwrap();
    read_until(&mut turn, |e| {
        matches!(e, AgentEvent::ToolCallStarted { .. })
    })
    .await;

    agent.cancel().unwrap();
    assert!(!done.load(Ordering::SeqCst));
    let (_, outcome) = drain(turn).await;

    // The started tool still ran to the end, but its result is discarded.
    assert!(done.load(Ordering::SeqCst));
    assert!(matches!(outcome, TurnOutcome::Aborted));
    let messages = agent.messages().await.unwrap();
    assert_eq!(messages.len(), before.message_count());
    // No round starts after the cancel.
    assert_eq!(model_provider.requests().len(), 1);
}

#[tokio::test]
async fn test_shutdown_interrupts_turn() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::MessageDelta("partial".to_owned()),
        PresetEvent::Stall,
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let mut turn = agent.start("hang").await.unwrap();
    read_until(&mut turn, |e| matches!(e, AgentEvent::ContentDelta(_))).await;

    agent.shutdown().await;
    let (_, outcome) = drain(turn).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed(TurnError::Interrupted(_))
    ));
    assert!(matches!(agent.start("again").await, Err(AgentError::Stopped)));
    timeout(WAIT, async {
        while agent.is_alive() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    // A second shutdown is a no-op.
    agent.shutdown().await;
}

#[tokio::test]
async fn test_busy_while_running() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::Stall,
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let turn = agent.start("hello").await.unwrap();

    assert_eq!(agent.start("again").await.err(), Some(AgentError::Busy));
    assert_eq!(agent.snapshot().await.err(), Some(AgentError::Busy));
    assert_eq!(agent.reset_session().await.err(), Some(AgentError::Busy));
    assert_eq!(agent.messages().await.err(), Some(AgentError::Busy));

    agent.cancel().unwrap();
    assert!(matches!(drain(turn).await.1, TurnOutcome::Aborted));
    // Cancelling an idle agent does nothing.
    agent.cancel().unwrap();
    assert_eq!(agent.messages().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_history_grows_across_turns() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider
        .add_assistant_response_step(PresetResponse::with_message("hi"));
    model_provider.add_user_input_step();
    model_provider
        .add_assistant_response_step(PresetResponse::with_message("sure"));

    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_system_prompt("Be brief.")
        .build();

    let (_, outcome) = drain(agent.start("hello").await.unwrap()).await;
    assert!(matches!(outcome, TurnOutcome::Completed(_)));
    let after_first = agent.snapshot().await.unwrap();
    assert_eq!(after_first.message_count(), 3);

    let (_, outcome) = drain(agent.start("again").await.unwrap()).await;
    assert!(matches!(outcome, TurnOutcome::Completed(_)));
    let messages = agent.messages().await.unwrap();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0].content(), Some("Be brief."));
    assert_eq!(messages[4].content(), Some("sure"));

    agent.restore(after_first).await.unwrap();
    assert_eq!(agent.messages().await.unwrap().len(), 3);
    agent.restore(after_first).await.unwrap();
    assert_eq!(agent.messages().await.unwrap().len(), 3);

    agent.reset_session().await.unwrap();
    let messages = agent.messages().await.unwrap();
    assert_eq!(messages, [ModelMessage::system("Be brief.")]);
}

#[tokio::test]
async fn test_round_limit() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    for i in 0..3 {
        let id = format!("call_{i}");
        model_provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::tool_call(&id, "echo", r#"{"text":"again"}"#),
        ]));
        model_provider.add_tool_result_step();
    }

    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool::new())
        .unwrap()
        .with_max_rounds(2)
        .build();
    let (events, outcome) = drain(agent.start("loop").await.unwrap()).await;

    assert!(matches!(
        outcome,
        TurnOutcome::Failed(TurnError::RoundLimitExceeded(2))
    ));
    assert!(matches!(events.last(), Some(AgentEvent::Error(_))));
    // History of a failed turn is kept.
    assert_eq!(agent.messages().await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_broken_stream() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::ReasoningDelta("hmm".to_owned()),
        PresetEvent::MessageDelta("par".to_owned()),
        PresetEvent::Fail,
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let (events, outcome) = drain(agent.start("hello").await.unwrap()).await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], AgentEvent::ReasoningDelta("hmm".to_owned()));
    assert!(matches!(events[2], AgentEvent::Error(_)));
    assert!(matches!(outcome, TurnOutcome::Failed(TurnError::Model(_))));
    assert_eq!(
        roles(&agent.messages().await.unwrap()),
        [Role::System, Role::User]
    );
}

#[tokio::test]
async fn test_outcome_without_draining() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_system_step();
    model_provider.add_user_input_step();
    model_provider.add_assistant_response_step(PresetResponse::with_events([
        PresetEvent::MessageDelta("a".to_owned()),
        PresetEvent::MessageDelta("b".to_owned()),
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let turn = agent.start("hello").await.unwrap();
    let outcome = timeout(WAIT, turn.outcome()).await.unwrap();
    let TurnOutcome::Completed(summary) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(summary.answer, "ab");
}

#[test]
fn test_duplicate_tool() {
    let result = AgentBuilder::with_model_provider(TestModelProvider::default())
        .with_tool(EchoTool::new())
        .and_then(|b| b.with_tool(EchoTool::new()));
    assert_eq!(
        result.err().map(|e| e.to_string()),
        Some(RegistryError::DuplicateTool("echo".to_owned()).to_string())
    );
}
