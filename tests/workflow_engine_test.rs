//! Integration tests for `WorkflowEngine` DAG execution, gates, guards,
//! checkpoints, and failure policies against the in-memory backend
//! (spec.md §4.7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleetd::domain::errors::WorkflowError;
use fleetd::domain::models::{
    ExecutionStatus, Handoff, HandoffStatus, InputSpec, OnFailure, StepDefinition, StepStatus, StepType,
    TriggerType, WorkflowDefinition, WorkflowDefinitionBody, WorkflowTrigger,
};
use fleetd::domain::ports::{
    HandoffStore, WorkflowDefinitionRepository, WorkflowExecutionRepository, WorkflowStepRepository,
    WorkflowTriggerRepository,
};
use fleetd::infrastructure::memory::InMemoryStore;
use fleetd::services::EventBus;
use fleetd::services::workflow_engine::WorkflowEngine;
use uuid::Uuid;

fn step(key: &str, step_type: StepType, depends_on: &[&str], config: serde_json::Value) -> StepDefinition {
    StepDefinition {
        key: key.to_string(),
        step_type,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        config,
        guard: None,
        on_failure: OnFailure::Fail,
        max_retries: 0,
        timeout_ms: None,
    }
}

fn engine(store: Arc<InMemoryStore>) -> Arc<WorkflowEngine> {
    let events = Arc::new(EventBus::new());
    Arc::new(WorkflowEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        events,
        5,
        Duration::from_millis(10),
    ))
}

async fn definition(store: &InMemoryStore, steps: Vec<StepDefinition>) -> Uuid {
    definition_with_io(store, steps, None, None).await
}

async fn definition_with_io(
    store: &InMemoryStore,
    steps: Vec<StepDefinition>,
    inputs: Option<HashMap<String, InputSpec>>,
    outputs: Option<HashMap<String, String>>,
) -> Uuid {
    let def = WorkflowDefinition {
        id: Uuid::new_v4(),
        name: "test-workflow".to_string(),
        version: 1,
        definition: WorkflowDefinitionBody { steps, inputs, outputs },
        is_template: false,
    };
    store.create(&def).await.unwrap();
    def.id
}

#[tokio::test]
async fn linear_task_chain_completes_end_to_end() {
    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition(
        &store,
        vec![
            step("a", StepType::Task, &[], serde_json::json!({"title": "first"})),
            step("b", StepType::Task, &["a"], serde_json::json!({"title": "second"})),
        ],
    )
    .await;
    let engine = engine(store.clone());

    let execution = engine.start_workflow(workflow_id, "tester", None, None).await.unwrap();

    // Three cycles: step a ready+completes, step b becomes ready+completes,
    // third cycle observes no active steps and finalizes the execution.
    for _ in 0..3 {
        engine.process_cycle().await.unwrap();
    }

    let finished = store.get(execution.id).await.unwrap().unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);

    let steps = store.list_for_execution(execution.id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn missing_required_input_rejects_start() {
    let store = Arc::new(InMemoryStore::new());
    let mut inputs = HashMap::new();
    inputs.insert("target".to_string(), InputSpec { required: true, default: None });
    let workflow_id = definition_with_io(
        &store,
        vec![step("a", StepType::Task, &[], serde_json::json!({}))],
        Some(inputs),
        None,
    )
    .await;
    let engine = engine(store);

    let result = engine.start_workflow(workflow_id, "tester", None, None).await;
    assert!(matches!(result, Err(WorkflowError::MissingInput(ref key)) if key == "target"));
}

#[tokio::test]
async fn cyclic_definition_is_rejected_at_start() {
    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition(
        &store,
        vec![
            step("a", StepType::Task, &["b"], serde_json::json!({})),
            step("b", StepType::Task, &["a"], serde_json::json!({})),
        ],
    )
    .await;
    let engine = engine(store);

    let result = engine.start_workflow(workflow_id, "tester", None, None).await;
    assert!(matches!(result, Err(WorkflowError::CyclicDependency(_))));
}

#[tokio::test]
async fn gate_step_skips_the_losing_branch_and_unblocks_its_dependents() {
    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition(
        &store,
        vec![
            step(
                "gate",
                StepType::Gate,
                &[],
                serde_json::json!({"condition": "inputs.go == true", "onTrue": ["yes"], "onFalse": ["no"]}),
            ),
            step("yes", StepType::Task, &["gate"], serde_json::json!({"title": "yes branch"})),
            step("no", StepType::Task, &["gate"], serde_json::json!({"title": "no branch"})),
            step("join", StepType::Task, &["yes", "no"], serde_json::json!({"title": "join"})),
        ],
    )
    .await;
    let engine = engine(store.clone());

    let mut inputs = serde_json::Map::new();
    inputs.insert("go".to_string(), serde_json::Value::Bool(true));
    let execution = engine
        .start_workflow(workflow_id, "tester", Some(serde_json::Value::Object(inputs)), None)
        .await
        .unwrap();

    for _ in 0..4 {
        engine.process_cycle().await.unwrap();
    }

    let steps = store.list_for_execution(execution.id).await.unwrap();
    let by_key: HashMap<_, _> = steps.iter().map(|s| (s.step_key.clone(), s.status)).collect();
    assert_eq!(by_key["yes"], StepStatus::Completed);
    assert_eq!(by_key["no"], StepStatus::Skipped);
    assert_eq!(by_key["join"], StepStatus::Completed);

    let finished = store.get(execution.id).await.unwrap().unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn script_step_evaluates_guard_expression_into_output() {
    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition(
        &store,
        vec![step(
            "check",
            StepType::Script,
            &[],
            serde_json::json!({"expression": "inputs.count > 3", "outputKey": "passed"}),
        )],
    )
    .await;
    let engine = engine(store.clone());

    let mut inputs = serde_json::Map::new();
    inputs.insert("count".to_string(), serde_json::json!(5));
    let execution = engine
        .start_workflow(workflow_id, "tester", Some(serde_json::Value::Object(inputs)), None)
        .await
        .unwrap();

    engine.process_cycle().await.unwrap();
    engine.process_cycle().await.unwrap();

    let s = store.get_by_key(execution.id, "check").await.unwrap().unwrap();
    assert_eq!(s.status, StepStatus::Completed);
    assert_eq!(s.output, Some(serde_json::json!({"passed": true})));
}

#[tokio::test]
async fn script_step_bare_literal_produces_numeric_output() {
    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition(
        &store,
        vec![step("compute", StepType::Script, &[], serde_json::json!({"expression": "1"}))],
    )
    .await;
    let engine = engine(store.clone());

    let execution = engine.start_workflow(workflow_id, "tester", None, None).await.unwrap();
    engine.process_cycle().await.unwrap();

    let s = store.get_by_key(execution.id, "compute").await.unwrap().unwrap();
    assert_eq!(s.status, StepStatus::Completed);
    assert_eq!(s.output, Some(serde_json::json!({"result": 1.0})));
}

#[tokio::test]
async fn guard_skips_step_and_unblocks_dependents_without_running_it() {
    let store = Arc::new(InMemoryStore::new());
    let mut skip_step = step("maybe", StepType::Task, &[], serde_json::json!({"title": "maybe"}));
    skip_step.guard = Some("inputs.run == true".to_string());
    let workflow_id = definition(
        &store,
        vec![skip_step, step("after", StepType::Task, &["maybe"], serde_json::json!({"title": "after"}))],
    )
    .await;
    let engine = engine(store.clone());

    let mut inputs = serde_json::Map::new();
    inputs.insert("run".to_string(), serde_json::Value::Bool(false));
    let execution = engine
        .start_workflow(workflow_id, "tester", Some(serde_json::Value::Object(inputs)), None)
        .await
        .unwrap();

    for _ in 0..3 {
        engine.process_cycle().await.unwrap();
    }

    let maybe = store.get_by_key(execution.id, "maybe").await.unwrap().unwrap();
    assert_eq!(maybe.status, StepStatus::Skipped);
    let after = store.get_by_key(execution.id, "after").await.unwrap().unwrap();
    assert_eq!(after.status, StepStatus::Completed);
}

#[tokio::test]
async fn checkpoint_step_blocks_until_handoff_is_accepted() {
    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition(
        &store,
        vec![step(
            "review",
            StepType::Checkpoint,
            &[],
            serde_json::json!({"toHandle": "reviewer", "goal": "review output", "waitForAcceptance": true}),
        )],
    )
    .await;
    let engine = engine(store.clone());

    let execution = engine.start_workflow(workflow_id, "tester", None, None).await.unwrap();

    engine.process_cycle().await.unwrap();
    let pending = store.get_by_key(execution.id, "review").await.unwrap().unwrap();
    assert_eq!(pending.status, StepStatus::Running, "step stays running while awaiting acceptance");

    engine.process_cycle().await.unwrap();
    let still_pending = store.get_by_key(execution.id, "review").await.unwrap().unwrap();
    assert_eq!(still_pending.status, StepStatus::Running, "not accepted yet, still waiting");

    let handoff_id = Uuid::parse_str(pending.output.as_ref().unwrap()["handoffId"].as_str().unwrap()).unwrap();
    HandoffStore::accept(&*store, handoff_id, chrono::Utc::now()).await.unwrap();

    engine.process_cycle().await.unwrap();
    engine.process_cycle().await.unwrap();

    let finished = store.get_by_key(execution.id, "review").await.unwrap().unwrap();
    assert_eq!(finished.status, StepStatus::Completed);
    let execution_row = store.get(execution.id).await.unwrap().unwrap();
    assert_eq!(execution_row.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn on_failure_skip_unblocks_dependents_despite_the_failure() {
    let store = Arc::new(InMemoryStore::new());
    let mut failing = step("flaky", StepType::Script, &[], serde_json::json!({"expression": "not a valid expr"}));
    failing.on_failure = OnFailure::Skip;
    let workflow_id = definition(
        &store,
        vec![failing, step("after", StepType::Task, &["flaky"], serde_json::json!({"title": "after"}))],
    )
    .await;
    let engine = engine(store.clone());

    let execution = engine.start_workflow(workflow_id, "tester", None, None).await.unwrap();
    for _ in 0..3 {
        engine.process_cycle().await.unwrap();
    }

    let flaky = store.get_by_key(execution.id, "flaky").await.unwrap().unwrap();
    assert_eq!(flaky.status, StepStatus::Skipped);
    let after = store.get_by_key(execution.id, "after").await.unwrap().unwrap();
    assert_eq!(after.status, StepStatus::Completed);
}

#[tokio::test]
async fn on_failure_continue_leaves_dependents_permanently_blocked() {
    let store = Arc::new(InMemoryStore::new());
    let mut failing = step("flaky", StepType::Script, &[], serde_json::json!({"expression": "not a valid expr"}));
    failing.on_failure = OnFailure::Continue;
    let workflow_id = definition(
        &store,
        vec![failing, step("after", StepType::Task, &["flaky"], serde_json::json!({"title": "after"}))],
    )
    .await;
    let engine = engine(store.clone());

    let execution = engine.start_workflow(workflow_id, "tester", None, None).await.unwrap();
    for _ in 0..3 {
        engine.process_cycle().await.unwrap();
    }

    let flaky = store.get_by_key(execution.id, "flaky").await.unwrap().unwrap();
    assert_eq!(flaky.status, StepStatus::Failed);
    let after = store.get_by_key(execution.id, "after").await.unwrap().unwrap();
    assert_eq!(after.status, StepStatus::Pending, "continue does not decrement dependents");
}

#[tokio::test]
async fn on_failure_fail_fails_the_whole_execution() {
    let store = Arc::new(InMemoryStore::new());
    let failing = step("flaky", StepType::Script, &[], serde_json::json!({"expression": "not a valid expr"}));
    let workflow_id = definition(&store, vec![failing]).await;
    let engine = engine(store.clone());

    let execution = engine.start_workflow(workflow_id, "tester", None, None).await.unwrap();
    engine.process_cycle().await.unwrap();

    let execution_row = store.get(execution.id).await.unwrap().unwrap();
    assert_eq!(execution_row.status, ExecutionStatus::Failed);
    assert!(execution_row.error.is_some());
}

#[tokio::test]
async fn on_failure_retry_exhausts_budget_then_fails() {
    let store = Arc::new(InMemoryStore::new());
    let mut failing = step("flaky", StepType::Script, &[], serde_json::json!({"expression": "not a valid expr"}));
    failing.on_failure = OnFailure::Retry;
    failing.max_retries = 2;
    let workflow_id = definition(&store, vec![failing]).await;
    let engine = engine(store.clone());

    let execution = engine.start_workflow(workflow_id, "tester", None, None).await.unwrap();
    for _ in 0..4 {
        engine.process_cycle().await.unwrap();
    }

    let flaky = store.get_by_key(execution.id, "flaky").await.unwrap().unwrap();
    assert_eq!(flaky.status, StepStatus::Failed);
    assert_eq!(flaky.retry_count, 2);
    let execution_row = store.get(execution.id).await.unwrap().unwrap();
    assert_eq!(execution_row.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn process_cycle_is_not_reentrant() {
    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition(&store, vec![step("a", StepType::Task, &[], serde_json::json!({"title": "a"}))]).await;
    let engine = engine(store);
    engine.start_workflow(workflow_id, "tester", None, None).await.unwrap();

    // Concurrent calls must not panic or double-process; both return Ok.
    let (r1, r2) = tokio::join!(engine.process_cycle(), engine.process_cycle());
    assert!(r1.is_ok());
    assert!(r2.is_ok());
}

#[tokio::test]
async fn blackboard_trigger_starts_an_execution_once_per_new_message() {
    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition(&store, vec![step("a", StepType::Task, &[], serde_json::json!({"title": "a"}))]).await;
    let engine = engine(store.clone());

    let trigger = WorkflowTrigger {
        id: Uuid::new_v4(),
        workflow_id,
        trigger_type: TriggerType::Blackboard,
        config: serde_json::json!({"swarmId": "swarm-1", "messageType": "deploy_ready"}),
        is_enabled: true,
        last_fired_at: None,
        fire_count: 0,
    };
    store.create(&trigger).await.unwrap();

    fleetd::domain::ports::BlackboardStore::post(
        &*store,
        "swarm-1",
        "alice",
        "deploy_ready",
        serde_json::json!({"env": "prod"}),
        None,
        fleetd::domain::models::Priority::Normal,
    )
    .await
    .unwrap();

    engine.poll_triggers().await.unwrap();
    let fired_once = store.get(trigger.id).await.unwrap().unwrap();
    assert_eq!(fired_once.fire_count, 1);

    // Polling again without a new message must not fire a second time.
    engine.poll_triggers().await.unwrap();
    let fired_twice = store.get(trigger.id).await.unwrap().unwrap();
    assert_eq!(fired_twice.fire_count, 1);
}

#[tokio::test]
async fn event_trigger_fires_matching_event_type_only() {
    let store = Arc::new(InMemoryStore::new());
    let workflow_id = definition(&store, vec![step("a", StepType::Task, &[], serde_json::json!({"title": "a"}))]).await;
    let engine = engine(store.clone());

    let trigger = WorkflowTrigger {
        id: Uuid::new_v4(),
        workflow_id,
        trigger_type: TriggerType::Event,
        config: serde_json::json!({"eventType": "pr_merged"}),
        is_enabled: true,
        last_fired_at: None,
        fire_count: 0,
    };
    store.create(&trigger).await.unwrap();

    let fired = engine.check_event_trigger("pr_opened", serde_json::json!({})).await.unwrap();
    assert_eq!(fired, 0);

    let fired = engine.check_event_trigger("pr_merged", serde_json::json!({"number": 7})).await.unwrap();
    assert_eq!(fired, 1);
}
