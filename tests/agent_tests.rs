use futures_util::StreamExt;
use miniagent::{
    Agent, AgentError, BackendError, BackendPool, BoxError, ChatBackend, Content, HookContext,
    HookPoint, Memory, Message, MessageChunk, MockBackend, ReplyEvent, ReplyOptions, RetryPolicy,
    Role, Speaker, ToolError, ToolFailurePolicy, ToolKit, ToolMetadata, ToolParameter, ToolParameterType,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn pool_of(backend: &Arc<MockBackend>) -> BackendPool {
    BackendPool::new(vec![backend.clone() as Arc<dyn ChatBackend>])
        .with_retry_policy(RetryPolicy::none())
}

fn calculator() -> ToolKit {
    let mut toolkit = ToolKit::new();
    toolkit.register_fn(
        ToolMetadata::new("add", "Add two integers")
            .with_parameter(ToolParameter::new("a", ToolParameterType::Integer).required())
            .with_parameter(ToolParameter::new("b", ToolParameterType::Integer).required()),
        |args| {
            let a = args["a"].as_i64().unwrap_or_default();
            let b = args["b"].as_i64().unwrap_or_default();
            Ok(json!(a + b))
        },
    );
    toolkit
}

#[tokio::test]
async fn test_reply_stores_user_and_named_assistant() {
    let backend = Arc::new(MockBackend::new("mock").always_text("hello"));
    let agent = Agent::new("a1", "Alice", pool_of(&backend));

    let response = agent.reply("hi").await.unwrap();
    assert_eq!(response.text(), "hello");
    assert_eq!(response.iterations, 1);
    assert!(!response.truncated);
    assert_eq!(response.backend, "mock");

    let memory = agent.memory_snapshot();
    assert_eq!(memory.len(), 2);
    assert_eq!(memory[0].role, Role::User);
    assert_eq!(memory[1].role, Role::Assistant);
    assert_eq!(memory[1].name.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn test_system_prompt_leads_every_request() {
    let backend = Arc::new(MockBackend::new("mock").always_text("ok"));
    let agent =
        Agent::new("a1", "Alice", pool_of(&backend)).with_system_prompt("Be brief.");
    agent.reply("one").await.unwrap();

    let request = &backend.requests()[0];
    assert_eq!(request.messages[0].role, Role::System);
    assert_eq!(request.messages[0].text(), "Be brief.");
    assert_eq!(request.messages[1].text(), "one");
}

#[tokio::test]
async fn test_empty_input_adds_no_user_message() {
    let backend = Arc::new(MockBackend::new("mock").always_text("from memory"));
    let agent = Agent::new("a1", "Alice", pool_of(&backend));
    agent.observe(Message::user("context")).await.unwrap();

    agent.reply("").await.unwrap();
    assert_eq!(agent.memory_by_role(Role::User).len(), 1);
    assert_eq!(backend.requests()[0].messages.len(), 1);
}

#[tokio::test]
async fn test_react_loop_runs_tool_then_answers() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .then_tool_call("add", json!({"a": 2, "b": 3}))
            .then_text("The sum is 5"),
    );
    let agent = Agent::new("a1", "Alice", pool_of(&backend)).with_tools(calculator());

    let response = agent.reply("what is 2 + 3?").await.unwrap();
    assert_eq!(response.text(), "The sum is 5");
    assert_eq!(response.iterations, 2);
    assert_eq!(response.tool_calls_made, 1);

    let memory = agent.memory_snapshot();
    let roles: Vec<Role> = memory.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(memory[2].text(), "5");
    assert_eq!(
        memory[2].tool_call_id.as_deref(),
        Some(memory[1].tool_calls[0].id.as_str())
    );

    // The second model call sees the tool result.
    let second = &backend.requests()[1];
    assert_eq!(second.messages.last().map(|m| m.role), Some(Role::Tool));
    assert_eq!(second.tools.len(), 1);
}

#[tokio::test]
async fn test_max_iterations_bounds_model_calls() {
    let backend = Arc::new(MockBackend::new("mock").always_tool_call("add", json!({"a": 1, "b": 1})));
    let agent = Agent::new("a1", "Alice", pool_of(&backend))
        .with_tools(calculator())
        .with_max_iterations(3);

    let response = agent.reply("loop forever").await.unwrap();
    assert_eq!(backend.calls(), 3);
    assert_eq!(response.iterations, 3);
    assert_eq!(response.tool_calls_made, 2);
    assert!(response.truncated);
    assert!(response.message.tool_calls.is_empty());

    let last = agent.memory_snapshot().pop().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert!(last.tool_calls.is_empty());
}

#[tokio::test]
async fn test_tool_timeout_is_fed_back_to_model() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .then_tool_call("slow", json!({}))
            .then_text("gave up waiting"),
    );
    let mut toolkit = ToolKit::new();
    toolkit.register_async_fn(ToolMetadata::new("slow", "Never finishes in time"), |_| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, BoxError>(json!("late"))
    });
    let agent = Agent::new("a1", "Alice", pool_of(&backend))
        .with_tools(toolkit)
        .with_tool_timeout(Duration::from_millis(50));

    let response = agent.reply("go").await.unwrap();
    assert_eq!(response.text(), "gave up waiting");

    let tool_message = agent.memory_by_role(Role::Tool).pop().unwrap();
    assert!(tool_message.text().starts_with("Error:"));
    assert!(tool_message.text().contains("timed out"));
}

#[tokio::test]
async fn test_tool_execution_error_is_fed_back_to_model() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .then_tool_call("fail", json!({}))
            .then_text("handled"),
    );
    let mut toolkit = ToolKit::new();
    toolkit.register_fn(ToolMetadata::new("fail", "Always fails"), |_| {
        Err::<serde_json::Value, BoxError>("disk full".into())
    });
    let agent = Agent::new("a1", "Alice", pool_of(&backend)).with_tools(toolkit);

    agent.reply("go").await.unwrap();
    let tool_message = agent.memory_by_role(Role::Tool).pop().unwrap();
    assert!(tool_message.text().contains("disk full"));
}

#[tokio::test]
async fn test_unknown_tool_aborts_turn() {
    let backend = Arc::new(MockBackend::new("mock").then_tool_call("missing", json!({})));
    let agent = Agent::new("a1", "Alice", pool_of(&backend)).with_tools(calculator());

    let err = agent.reply("go").await.unwrap_err();
    assert!(matches!(err, AgentError::Tool(ToolError::NotFound(ref name)) if name == "missing"));
    // Only the user message was stored; the aborted call left no trace.
    assert_eq!(agent.memory_len(), 1);
}

#[tokio::test]
async fn test_invalid_arguments_abort_before_any_tool_runs() {
    let backend = Arc::new(MockBackend::new("mock").then(miniagent::MockReply::Message(
        Message::assistant("").with_tool_calls(vec![
            miniagent::ToolCall::new("add", json!({"a": 1, "b": 2})),
            miniagent::ToolCall::new("add", json!({"a": "one"})),
        ]),
    )));
    let agent = Agent::new("a1", "Alice", pool_of(&backend)).with_tools(calculator());

    let err = agent.reply("go").await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Tool(ToolError::InvalidArguments { .. })
    ));
    assert!(agent.memory_by_role(Role::Tool).is_empty());
}

#[tokio::test]
async fn test_feed_back_all_reports_unknown_tool() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .then_tool_call("missing", json!({}))
            .then_text("sorry"),
    );
    let agent = Agent::new("a1", "Alice", pool_of(&backend))
        .with_tools(calculator())
        .with_tool_failure_policy(ToolFailurePolicy::FeedBackAll);

    let response = agent.reply("go").await.unwrap();
    assert_eq!(response.text(), "sorry");
    let tool_message = agent.memory_by_role(Role::Tool).pop().unwrap();
    assert!(tool_message.text().contains("tool not found: missing"));
}

#[tokio::test]
async fn test_foreign_assistant_messages_become_prefixed_user_turns() {
    let backend = Arc::new(MockBackend::new("mock").always_text("noted"));
    let agent = Agent::new("a1", "Alice", pool_of(&backend));
    agent
        .observe(Message::assistant("it will rain").with_name("Bob"))
        .await
        .unwrap();
    agent
        .observe(Message::assistant("my own words").with_name("Alice"))
        .await
        .unwrap();

    agent.reply("").await.unwrap();
    let messages = &backend.requests()[0].messages;
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text(), "[Bob]: it will rain");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text(), "my own words");

    // Memory keeps the original form.
    assert_eq!(agent.memory_snapshot()[0].role, Role::Assistant);
}

#[tokio::test]
async fn test_pre_reply_hook_rewrites_input() {
    let backend = Arc::new(MockBackend::new("mock").always_text("ok"));
    let agent = Agent::new("a1", "Alice", pool_of(&backend));
    agent.register_hook(HookPoint::PreReply, "upper", |_: &HookContext, mut m: Message| {
        m.content = Content::Text(m.text().to_uppercase());
        Ok(m)
    });

    agent.reply("quiet please").await.unwrap();
    assert_eq!(agent.memory_snapshot()[0].text(), "QUIET PLEASE");
    assert_eq!(backend.requests()[0].messages[0].text(), "QUIET PLEASE");
}

#[tokio::test]
async fn test_post_reply_hook_sees_named_response() {
    let backend = Arc::new(MockBackend::new("mock").always_text("answer"));
    let agent = Agent::new("a1", "Alice", pool_of(&backend));
    agent.register_hook(HookPoint::PostReply, "sign", |ctx: &HookContext, mut m: Message| {
        assert_eq!(m.name.as_deref(), Some("Alice"));
        m.content = Content::Text(format!("{} -- {}", m.text(), ctx.agent_name));
        Ok(m)
    });

    let response = agent.reply("q").await.unwrap();
    assert_eq!(response.text(), "answer -- Alice");
    assert_eq!(agent.memory_snapshot()[1].text(), "answer -- Alice");
}

#[tokio::test]
async fn test_failing_post_reply_hook_aborts_turn() {
    let backend = Arc::new(MockBackend::new("mock").always_text("answer"));
    let agent = Agent::new("a1", "Alice", pool_of(&backend));
    agent.register_hook(HookPoint::PostReply, "reject", |_: &HookContext, _: Message| {
        Err::<Message, BoxError>("not allowed".into())
    });

    let err = agent.reply("q").await.unwrap_err();
    match err {
        AgentError::Hook(hook) => {
            assert_eq!(hook.hook, "reject");
            assert_eq!(hook.point, HookPoint::PostReply);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(agent.memory_len(), 1);
}

#[tokio::test]
async fn test_failing_pre_observe_hook_leaves_memory_untouched() {
    let backend = Arc::new(MockBackend::new("mock"));
    let agent = Agent::new("a1", "Alice", pool_of(&backend));
    agent.register_hook(HookPoint::PreObserve, "gate", |_: &HookContext, m: Message| {
        if m.text().contains("secret") {
            Err::<Message, BoxError>("blocked".into())
        } else {
            Ok(m)
        }
    });

    assert!(agent.observe(Message::user("the secret")).await.is_err());
    agent.observe(Message::user("public")).await.unwrap();
    assert_eq!(agent.memory_len(), 1);

    assert!(agent.remove_hook(HookPoint::PreObserve, "gate"));
    agent.observe(Message::user("the secret")).await.unwrap();
    assert_eq!(agent.memory_len(), 2);
}

#[tokio::test]
async fn test_bounded_memory_evicts_oldest() {
    let backend = Arc::new(MockBackend::new("mock").always_text("ok"));
    let agent = Agent::new("a1", "Alice", pool_of(&backend)).with_memory(Memory::bounded(3));

    agent.reply("first").await.unwrap();
    agent.reply("second").await.unwrap();
    let memory = agent.memory_snapshot();
    assert_eq!(memory.len(), 3);
    assert_eq!(memory[0].text(), "ok");
    assert_eq!(memory[1].text(), "second");
}

#[tokio::test]
async fn test_reply_stream_yields_chunks_then_final() {
    let backend = Arc::new(
        MockBackend::new("stream")
            .with_streaming()
            .then_chunks(vec![
                Ok(MessageChunk::text("Hel")),
                Ok(MessageChunk::text("lo")),
            ]),
    );
    let agent = Agent::new("a1", "Alice", pool_of(&backend));

    let events: Vec<_> = agent
        .reply_stream(Content::from("hi"), ReplyOptions::default())
        .collect()
        .await;
    assert_eq!(events.len(), 3);

    let chunks: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            Ok(ReplyEvent::Chunk(chunk)) => Some(chunk.content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["Hel", "lo"]);

    match events.last() {
        Some(Ok(ReplyEvent::Final(response))) => assert_eq!(response.text(), "Hello"),
        other => panic!("expected final response, got {other:?}"),
    }
    assert_eq!(agent.memory_snapshot()[1].text(), "Hello");
}

#[tokio::test]
async fn test_stream_failure_after_first_chunk_is_interrupted() {
    let backend = Arc::new(
        MockBackend::new("flaky")
            .with_streaming()
            .then_chunks(vec![
                Ok(MessageChunk::text("par")),
                Err(BackendError::Stream("connection reset".into())),
            ]),
    );
    let agent = Agent::new("a1", "Alice", pool_of(&backend));

    let err = agent
        .reply_with("hi", ReplyOptions::streaming())
        .await
        .unwrap_err();
    match err {
        AgentError::StreamInterrupted { backend, source } => {
            assert_eq!(backend, "flaky");
            assert!(matches!(source, BackendError::Stream(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(agent.memory_by_role(Role::Assistant).len(), 0);
}

#[tokio::test]
async fn test_streamed_tool_call_is_executed() {
    let backend = Arc::new(
        MockBackend::new("stream")
            .with_streaming()
            .then_tool_call("add", json!({"a": 20, "b": 22}))
            .then_text("42"),
    );
    let agent = Agent::new("a1", "Alice", pool_of(&backend)).with_tools(calculator());

    let response = agent
        .reply_with("sum", ReplyOptions::streaming())
        .await
        .unwrap();
    assert_eq!(response.text(), "42");
    assert_eq!(response.tool_calls_made, 1);
    assert_eq!(agent.memory_by_role(Role::Tool)[0].text(), "42");
}

#[tokio::test]
async fn test_info_reports_configuration() {
    let backend = Arc::new(MockBackend::new("mock"));
    let agent = Agent::new("a1", "Alice", pool_of(&backend))
        .with_tools(calculator())
        .with_max_iterations(7);
    agent.register_hook(HookPoint::PostObserve, "log", |_: &HookContext, m: Message| Ok(m));

    let info = agent.info();
    assert_eq!(info.tools, vec!["add"]);
    assert_eq!(info.backends, vec!["mock"]);
    assert_eq!(info.max_iterations, 7);
    assert!(!info.in_hub);
    assert_eq!(
        info.instance_hooks.get("post_observe"),
        Some(&vec!["log".to_string()])
    );
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["name"], "Alice");
}

struct EventLog {
    labels: std::sync::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl miniagent::EventHandler for EventLog {
    async fn on_agent_event(&self, event: &miniagent::AgentEvent) {
        use miniagent::AgentEvent::*;
        let label = match event {
            ReplyStarted { .. } => "reply_started".to_string(),
            ModelCallStarted { iteration, .. } => format!("model_started:{iteration}"),
            ModelCallCompleted { iteration, .. } => format!("model_completed:{iteration}"),
            ToolCallDetected { tool_name, .. } => format!("tool_detected:{tool_name}"),
            ToolExecutionCompleted { success, .. } => format!("tool_completed:{success}"),
            MaxIterationsReached { .. } => "max_iterations".to_string(),
            ReplyCompleted { .. } => "reply_completed".to_string(),
            MessageObserved { .. } => "observed".to_string(),
        };
        self.labels.lock().unwrap().push(label);
    }
}

#[tokio::test]
async fn test_events_follow_the_react_loop() {
    let log = Arc::new(EventLog {
        labels: std::sync::Mutex::new(Vec::new()),
    });
    let backend = Arc::new(
        MockBackend::new("mock")
            .then_tool_call("add", json!({"a": 1, "b": 1}))
            .then_text("2"),
    );
    let agent = Agent::new("a1", "Alice", pool_of(&backend))
        .with_tools(calculator())
        .with_event_handler(log.clone());

    agent.reply("1 + 1").await.unwrap();
    assert_eq!(
        *log.labels.lock().unwrap(),
        vec![
            "reply_started",
            "model_started:1",
            "model_completed:1",
            "tool_detected:add",
            "tool_completed:true",
            "model_started:2",
            "model_completed:2",
            "reply_completed",
        ]
    );
}

#[tokio::test]
async fn test_cancelled_reply_keeps_no_partial_iteration() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .then_tool_call("slow", json!({}))
            .then_text("done"),
    );
    let mut toolkit = ToolKit::new();
    toolkit.register_async_fn(ToolMetadata::new("slow", "Takes half a second"), |_| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok::<_, BoxError>(json!("finished"))
    });
    let agent = Agent::new("a1", "Alice", pool_of(&backend)).with_tools(toolkit);

    let cancelled = tokio::time::timeout(Duration::from_millis(100), agent.reply("go")).await;
    assert!(cancelled.is_err());
    let roles: Vec<Role> = agent.memory_snapshot().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User]);

    // The turn lock was released with the cancelled future.
    let response = agent.reply("again").await.unwrap();
    assert_eq!(response.text(), "done");
}

#[tokio::test]
async fn test_cancelled_reply_keeps_completed_iterations() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .with_latency(Duration::from_millis(200))
            .then_tool_call("add", json!({"a": 1, "b": 2}))
            .then_text("never seen"),
    );
    let agent = Agent::new("a1", "Alice", pool_of(&backend)).with_tools(calculator());

    // First model call and the tool finish; the second model call is cut off.
    let cancelled = tokio::time::timeout(Duration::from_millis(300), agent.reply("go")).await;
    assert!(cancelled.is_err());
    let roles: Vec<Role> = agent.memory_snapshot().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
    assert_eq!(agent.memory_by_role(Role::Tool)[0].text(), "3");
}

#[tokio::test]
async fn test_tool_calls_in_one_iteration_run_concurrently() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .then(miniagent::MockReply::Message(
                Message::assistant("").with_tool_calls(vec![
                    miniagent::ToolCall::new("nap", json!({})),
                    miniagent::ToolCall::new("nap", json!({})),
                ]),
            ))
            .then_text("rested"),
    );
    let mut toolkit = ToolKit::new();
    toolkit.register_async_fn(ToolMetadata::new("nap", "Sleeps 300ms"), |_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok::<_, BoxError>(json!("ok"))
    });
    let agent = Agent::new("a1", "Alice", pool_of(&backend)).with_tools(toolkit);

    let started = tokio::time::Instant::now();
    let response = agent.reply("sleep twice").await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.tool_calls_made, 2);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(550), "tools ran sequentially: {elapsed:?}");
}

#[tokio::test]
async fn test_independent_agents_reply_concurrently() {
    let a = Arc::new(
        MockBackend::new("a")
            .with_latency(Duration::from_millis(300))
            .always_text("from a"),
    );
    let b = Arc::new(
        MockBackend::new("b")
            .with_latency(Duration::from_millis(300))
            .always_text("from b"),
    );
    let alice = Agent::new("a1", "Alice", pool_of(&a));
    let bob = Agent::new("b1", "Bob", pool_of(&b));

    let started = tokio::time::Instant::now();
    let (ra, rb) = tokio::join!(alice.reply("hi"), bob.reply("hi"));
    let elapsed = started.elapsed();

    assert_eq!(ra.unwrap().text(), "from a");
    assert_eq!(rb.unwrap().text(), "from b");
    assert!(elapsed < Duration::from_millis(550), "agents were serialized: {elapsed:?}");
}

#[derive(Default)]
struct RecordingSpeaker {
    calls: std::sync::Mutex<Vec<&'static str>>,
}

impl RecordingSpeaker {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Speaker for RecordingSpeaker {
    fn speak_stream_start(&self, _agent_name: &str) {
        self.record("start");
    }

    fn speak_chunk(&self, _chunk: &MessageChunk) {
        self.record("chunk");
    }

    fn speak_stream_end(&self) {
        self.record("end");
    }

    fn speak_complete(&self, _response: &Message, _agent_name: &str) {
        self.record("complete");
    }
}

#[tokio::test]
async fn test_interrupted_stream_still_closes_speaker() {
    let backend = Arc::new(
        MockBackend::new("flaky")
            .with_streaming()
            .then_chunks(vec![
                Ok(MessageChunk::text("par")),
                Err(BackendError::Stream("connection reset".into())),
            ]),
    );
    let speaker = Arc::new(RecordingSpeaker::default());
    let agent =
        Agent::new("a1", "Alice", pool_of(&backend)).with_speaker(speaker.clone() as Arc<dyn Speaker>);

    let result = agent
        .reply_with("hi", ReplyOptions::streaming().with_auto_speak(true))
        .await;
    assert!(result.is_err());
    assert_eq!(*speaker.calls.lock().unwrap(), vec!["start", "chunk", "end"]);
}
