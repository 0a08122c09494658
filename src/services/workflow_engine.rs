//! Workflow engine: DAG-ordered execution of workflow definitions
//! (spec.md §4.7).
//!
//! The teacher's `services::workflow_engine::WorkflowEngine` drives a
//! fixed linear phase list stored in a task's JSON context — there is no
//! general dependency graph to execute. This engine replaces that model
//! wholesale with Kahn-order DAG execution over `WorkflowStep` rows,
//! reusing only the shape the teacher and `worker_supervisor` already
//! established: a non-reentrant processing guard plus a `tokio::select!`
//! interval loop driven by a `CancellationToken`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::WorkflowError;
use crate::domain::models::{
    Checkpoint, ExecutionStatus, Handoff, HandoffStatus, OnFailure, StepStatus, StepType, WorkflowDefinition,
    WorkflowExecution, WorkflowStep, WorkflowTrigger,
};
use crate::domain::ports::{
    BlackboardStore, CheckpointStore, HandoffStore, WorkflowDefinitionRepository, WorkflowExecutionRepository,
    WorkflowStepRepository, WorkflowTriggerRepository,
};
use crate::domain::models::BlackboardQuery;
use crate::services::event_bus::{kinds, Event, EventBus, Topic};
use crate::services::expr::{self, resolve_dotted};

/// A request to spawn a worker, handed to whatever owns the real
/// `SpawnController` (spec.md §9: the engine depends on a callback, not
/// on the spawn controller's type, to avoid a cyclic dependency).
#[derive(Debug, Clone)]
pub struct SpawnStepRequest {
    pub agent_role: String,
    pub task: String,
    pub swarm_id: Option<String>,
}

pub type SpawnCallback =
    Arc<dyn Fn(SpawnStepRequest) -> Pin<Box<dyn Future<Output = Result<Uuid, String>> + Send>> + Send + Sync>;

enum StepOutcome {
    Completed(Value),
    /// Step stays `running`; re-polled on a later cycle (checkpoint steps
    /// awaiting acceptance).
    Pending,
    Failed(WorkflowError),
}

pub struct WorkflowEngine {
    definitions: Arc<dyn WorkflowDefinitionRepository>,
    executions: Arc<dyn WorkflowExecutionRepository>,
    steps: Arc<dyn WorkflowStepRepository>,
    triggers: Arc<dyn WorkflowTriggerRepository>,
    blackboard: Arc<dyn BlackboardStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    handoffs: Arc<dyn HandoffStore>,
    events: Arc<EventBus>,
    max_concurrent_steps: usize,
    process_interval: Duration,
    spawn_callback: Option<SpawnCallback>,
    processing: AtomicBool,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        definitions: Arc<dyn WorkflowDefinitionRepository>,
        executions: Arc<dyn WorkflowExecutionRepository>,
        steps: Arc<dyn WorkflowStepRepository>,
        triggers: Arc<dyn WorkflowTriggerRepository>,
        blackboard: Arc<dyn BlackboardStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        handoffs: Arc<dyn HandoffStore>,
        events: Arc<EventBus>,
        max_concurrent_steps: usize,
        process_interval: Duration,
    ) -> Self {
        Self {
            definitions,
            executions,
            steps,
            triggers,
            blackboard,
            checkpoints,
            handoffs,
            events,
            max_concurrent_steps,
            process_interval,
            spawn_callback: None,
            processing: AtomicBool::new(false),
        }
    }

    /// Wires a direct spawn path for `spawn`-type steps. Without one, spawn
    /// steps complete immediately with a `pending: true` output and leave
    /// the actual enqueue to whatever reads workflow output (spec.md §4.7).
    pub fn with_spawn_callback(mut self, callback: SpawnCallback) -> Self {
        self.spawn_callback = Some(callback);
        self
    }

    /// Starts a new execution of `workflow_id`. Validates `inputs` against
    /// the definition's declared inputs (filling defaults, rejecting a
    /// missing required input), materializes one `WorkflowStep` per
    /// `StepDefinition`, and marks dependency-free steps `ready`.
    pub async fn start_workflow(
        &self,
        workflow_id: Uuid,
        created_by: &str,
        inputs: Option<Value>,
        swarm_id: Option<String>,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let definition = self
            .definitions
            .get(workflow_id)
            .await?
            .ok_or(WorkflowError::DefinitionNotFound(workflow_id))?;
        definition.validate().map_err(WorkflowError::CyclicDependency)?;

        let context = Self::resolve_inputs(&definition, inputs)?;

        let execution = WorkflowExecution {
            id: Uuid::new_v4(),
            workflow_id,
            swarm_id,
            status: ExecutionStatus::Running,
            context,
            created_by: created_by.to_string(),
            started_at: Some(Utc::now()),
            completed_at: None,
            error: None,
        };
        self.executions.create(&execution).await?;

        let now = Utc::now();
        for step_def in &definition.definition.steps {
            let mut step = WorkflowStep::from_definition(execution.id, step_def, now);
            if step.is_eligible() {
                step.status = StepStatus::Ready;
            }
            self.steps.create(&step).await?;
        }

        self.events.publish_broadcast(
            &Topic::Custom(format!("workflow:{}", execution.id)),
            Event::new(kinds::WORKFLOW_STARTED, serde_json::json!({"executionId": execution.id, "workflowId": workflow_id})),
        );

        Ok(execution)
    }

    fn resolve_inputs(definition: &WorkflowDefinition, inputs: Option<Value>) -> Result<Value, WorkflowError> {
        let mut provided = match inputs {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(specs) = &definition.definition.inputs {
            for (key, spec) in specs {
                if !provided.contains_key(key) {
                    match &spec.default {
                        Some(default) => {
                            provided.insert(key.clone(), default.clone());
                        }
                        None if spec.required => return Err(WorkflowError::MissingInput(key.clone())),
                        None => {}
                    }
                }
            }
        }
        Ok(Value::Object(provided))
    }

    pub async fn pause_execution(&self, execution_id: Uuid) -> Result<(), WorkflowError> {
        let mut execution = self.require_execution(execution_id).await?;
        if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Paused;
            self.executions.update(&execution).await?;
        }
        Ok(())
    }

    pub async fn resume_execution(&self, execution_id: Uuid) -> Result<(), WorkflowError> {
        let mut execution = self.require_execution(execution_id).await?;
        if execution.status == ExecutionStatus::Paused {
            execution.status = ExecutionStatus::Running;
            self.executions.update(&execution).await?;
        }
        Ok(())
    }

    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<(), WorkflowError> {
        let mut execution = self.require_execution(execution_id).await?;
        if !execution.status.is_terminal() {
            execution.status = ExecutionStatus::Cancelled;
            execution.completed_at = Some(Utc::now());
            self.executions.update(&execution).await?;
        }
        Ok(())
    }

    async fn require_execution(&self, execution_id: Uuid) -> Result<WorkflowExecution, WorkflowError> {
        self.executions
            .get(execution_id)
            .await?
            .ok_or(WorkflowError::ExecutionNotFound(execution_id))
    }

    /// One processing cycle across every `running` execution. Non-
    /// reentrant: a cycle already in flight causes a new call to return
    /// immediately rather than queue up behind it (spec.md §4.7, §5).
    pub async fn process_cycle(&self) -> Result<(), WorkflowError> {
        if self.processing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.process_cycle_inner().await;
        self.processing.store(false, Ordering::Release);
        result
    }

    async fn process_cycle_inner(&self) -> Result<(), WorkflowError> {
        let running = self.executions.list_running().await?;
        for execution in running {
            self.process_execution(&execution).await?;
        }
        Ok(())
    }

    async fn process_execution(&self, execution: &WorkflowExecution) -> Result<(), WorkflowError> {
        let now = Utc::now();

        let ready = self.steps.get_ready_steps(execution.id, self.max_concurrent_steps).await?;
        for mut step in ready {
            if is_timed_out(&step, now) {
                self.handle_step_failure(execution, step, WorkflowError::Timeout).await?;
                continue;
            }
            self.drive_step(execution, &mut step).await?;
        }

        // Checkpoint steps awaiting acceptance are `running` but not
        // re-claimed by `getReadySteps` (which only returns `ready` rows),
        // so they are polled here directly.
        let all_steps = self.steps.list_for_execution(execution.id).await?;
        for mut step in all_steps {
            if step.step_type != StepType::Checkpoint || step.status != StepStatus::Running {
                continue;
            }
            if is_timed_out(&step, now) {
                self.handle_step_failure(execution, step, WorkflowError::Timeout).await?;
                continue;
            }
            self.drive_step(execution, &mut step).await?;
        }

        self.try_complete(execution).await
    }

    async fn drive_step(&self, execution: &WorkflowExecution, step: &mut WorkflowStep) -> Result<(), WorkflowError> {
        if step.output.is_none() {
            if let Some(guard) = step.guard.clone() {
                let context = self.build_context_bag(execution, step).await?;
                if !expr::evaluate_guard(&guard, &context) {
                    step.status = StepStatus::Skipped;
                    step.completed_at = Some(Utc::now());
                    self.steps.update(step).await?;
                    self.steps.decrement_dependents(execution.id, &step.step_key).await?;
                    return Ok(());
                }
            }
        }

        let context = self.build_context_bag(execution, step).await?;
        let outcome = match step.step_type {
            StepType::Task => Self::execute_task_step(step, &context),
            StepType::Spawn => self.execute_spawn_step(step, &context, execution).await,
            StepType::Checkpoint => self.execute_checkpoint_step(step, execution, &context).await,
            StepType::Gate => self.execute_gate_step(execution, step, &context).await,
            StepType::Script => Self::execute_script_step(step, &context),
            StepType::Parallel => StepOutcome::Completed(Value::Object(serde_json::Map::new())),
        };

        match outcome {
            StepOutcome::Completed(output) => {
                step.output = Some(output);
                step.status = StepStatus::Completed;
                step.completed_at = Some(Utc::now());
                self.steps.update(step).await?;
                self.steps.decrement_dependents(execution.id, &step.step_key).await?;
            }
            StepOutcome::Pending => {
                self.steps.update(step).await?;
            }
            StepOutcome::Failed(error) => {
                self.handle_step_failure(execution, step.clone(), error).await?;
            }
        }
        Ok(())
    }

    async fn build_context_bag(&self, execution: &WorkflowExecution, step: &WorkflowStep) -> Result<Value, WorkflowError> {
        let siblings = self.steps.list_for_execution(execution.id).await?;
        let mut steps_obj = serde_json::Map::new();
        for sibling in &siblings {
            if sibling.status.satisfies_dependency() {
                steps_obj.insert(
                    sibling.step_key.clone(),
                    serde_json::json!({"output": sibling.output.clone().unwrap_or(Value::Null)}),
                );
            }
        }

        let mut bag = match &execution.context {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        bag.insert("steps".to_string(), Value::Object(steps_obj));
        bag.insert(
            "execution".to_string(),
            serde_json::json!({"id": execution.id, "status": execution.status.as_str()}),
        );
        bag.insert(
            "currentStep".to_string(),
            serde_json::json!({"key": step.step_key, "type": step.step_type.as_str()}),
        );
        Ok(Value::Object(bag))
    }

    fn execute_task_step(step: &WorkflowStep, context: &Value) -> StepOutcome {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct Config {
            #[serde(default)]
            title: String,
            #[serde(default)]
            description: String,
        }
        let config: Config = serde_json::from_value(step.config.clone()).unwrap_or_default();
        let title = expr::resolve_template(&config.title, context);
        let description = expr::resolve_template(&config.description, context);
        let _ = description;
        StepOutcome::Completed(serde_json::json!({"workItemId": Uuid::new_v4(), "title": title}))
    }

    async fn execute_spawn_step(&self, step: &WorkflowStep, context: &Value, execution: &WorkflowExecution) -> StepOutcome {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct Config {
            #[serde(default)]
            agent_role: Option<String>,
            #[serde(default)]
            task: String,
        }
        let config: Config = serde_json::from_value(step.config.clone()).unwrap_or_default();
        let agent_role = config.agent_role.unwrap_or_else(|| "worker".to_string());
        let task = expr::resolve_template(&config.task, context);

        if let Some(callback) = &self.spawn_callback {
            let request = SpawnStepRequest { agent_role: agent_role.clone(), task: task.clone(), swarm_id: execution.swarm_id.clone() };
            if let Ok(request_id) = callback(request).await {
                return StepOutcome::Completed(serde_json::json!({
                    "agentRole": agent_role,
                    "task": task,
                    "swarmId": execution.swarm_id,
                    "pending": false,
                    "requestId": request_id,
                }));
            }
        }

        StepOutcome::Completed(serde_json::json!({
            "agentRole": agent_role,
            "task": task,
            "swarmId": execution.swarm_id,
            "pending": true,
        }))
    }

    async fn execute_checkpoint_step(&self, step: &mut WorkflowStep, execution: &WorkflowExecution, context: &Value) -> StepOutcome {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct Config {
            #[serde(default)]
            to_handle: String,
            #[serde(default)]
            goal: String,
            #[serde(default)]
            wait_for_acceptance: bool,
        }
        let config: Config = match serde_json::from_value(step.config.clone()) {
            Ok(c) => c,
            Err(e) => return StepOutcome::Failed(WorkflowError::GuardExpression(e.to_string())),
        };

        if step.output.is_none() {
            let checkpoint = Checkpoint {
                id: Uuid::new_v4(),
                worker_handle: config.to_handle.clone(),
                goal: expr::resolve_template(&config.goal, context),
                now: Utc::now().to_rfc3339(),
                test: None,
                done_this_session: vec![],
                blockers: vec![],
                questions: vec![],
                next: vec![],
                created_at: Utc::now(),
            };
            if let Err(e) = self.checkpoints.create(&checkpoint).await {
                return StepOutcome::Failed(WorkflowError::Storage(e));
            }

            let handoff = Handoff {
                id: Uuid::new_v4(),
                from_handle: "workflow-engine".to_string(),
                to_handle: config.to_handle.clone(),
                context: context.clone(),
                checkpoint: serde_json::to_value(&checkpoint).ok(),
                status: HandoffStatus::Pending,
                outcome: None,
                accepted_at: None,
                created_at: Utc::now(),
            };
            if let Err(e) = self.handoffs.create(&handoff).await {
                return StepOutcome::Failed(WorkflowError::Storage(e));
            }

            step.output = Some(serde_json::json!({"checkpointId": checkpoint.id, "handoffId": handoff.id}));
            step.status = StepStatus::Running;
            if !config.wait_for_acceptance {
                return StepOutcome::Completed(step.output.clone().unwrap());
            }
            return StepOutcome::Pending;
        }

        if !config.wait_for_acceptance {
            return StepOutcome::Completed(step.output.clone().unwrap());
        }

        let handoff_id = step
            .output
            .as_ref()
            .and_then(|o| o.get("handoffId"))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        if let Some(id) = handoff_id {
            match self.handoffs.get(id).await {
                Ok(Some(handoff)) if handoff.status == HandoffStatus::Accepted => {
                    return StepOutcome::Completed(step.output.clone().unwrap());
                }
                Ok(_) => {}
                Err(e) => return StepOutcome::Failed(WorkflowError::Storage(e)),
            }
        }
        StepOutcome::Pending
    }

    async fn execute_gate_step(&self, execution: &WorkflowExecution, step: &WorkflowStep, context: &Value) -> StepOutcome {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct Config {
            #[serde(default)]
            condition: String,
            #[serde(default)]
            on_true: Vec<String>,
            #[serde(default)]
            on_false: Vec<String>,
        }
        let config: Config = serde_json::from_value(step.config.clone()).unwrap_or_default();
        let result = expr::evaluate_guard(&config.condition, context);
        let losing = if result { &config.on_false } else { &config.on_true };

        for key in losing {
            let sibling = match self.steps.get_by_key(execution.id, key).await {
                Ok(s) => s,
                Err(e) => return StepOutcome::Failed(WorkflowError::Storage(e)),
            };
            if let Some(mut sibling) = sibling {
                if sibling.status == StepStatus::Pending {
                    sibling.status = StepStatus::Skipped;
                    sibling.completed_at = Some(Utc::now());
                    if let Err(e) = self.steps.update(&sibling).await {
                        return StepOutcome::Failed(WorkflowError::Storage(e));
                    }
                    if let Err(e) = self.steps.decrement_dependents(execution.id, &sibling.step_key).await {
                        return StepOutcome::Failed(WorkflowError::Storage(e));
                    }
                }
            }
        }

        StepOutcome::Completed(serde_json::json!({"conditionResult": result}))
    }

    fn execute_script_step(step: &WorkflowStep, context: &Value) -> StepOutcome {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct Config {
            #[serde(default)]
            expression: String,
            #[serde(default)]
            output_key: Option<String>,
        }
        let config: Config = serde_json::from_value(step.config.clone()).unwrap_or_default();
        let Some(value) = expr::evaluate_script(&config.expression, context) else {
            return StepOutcome::Failed(WorkflowError::GuardExpression(config.expression));
        };
        let key = config.output_key.unwrap_or_else(|| "result".to_string());
        let mut output = serde_json::Map::new();
        output.insert(key, value);
        StepOutcome::Completed(Value::Object(output))
    }

    async fn handle_step_failure(&self, execution: &WorkflowExecution, mut step: WorkflowStep, error: WorkflowError) -> Result<(), WorkflowError> {
        step.error = Some(error.to_string());
        match step.on_failure {
            OnFailure::Fail => {
                step.status = StepStatus::Failed;
                step.completed_at = Some(Utc::now());
                self.steps.update(&step).await?;
                self.fail_execution(execution, &format!("step {} failed: {error}", step.step_key)).await?;
            }
            OnFailure::Skip => {
                step.status = StepStatus::Skipped;
                step.completed_at = Some(Utc::now());
                self.steps.update(&step).await?;
                self.steps.decrement_dependents(execution.id, &step.step_key).await?;
            }
            OnFailure::Retry if step.retry_count < step.max_retries => {
                step.retry_count += 1;
                step.status = StepStatus::Ready;
                step.error = None;
                self.steps.update(&step).await?;
            }
            OnFailure::Retry => {
                step.status = StepStatus::Failed;
                step.completed_at = Some(Utc::now());
                self.steps.update(&step).await?;
                self.fail_execution(execution, &format!("step {} exhausted retries", step.step_key)).await?;
            }
            OnFailure::Continue => {
                step.status = StepStatus::Failed;
                step.completed_at = Some(Utc::now());
                self.steps.update(&step).await?;
                // No decrementDependents: downstream steps stay permanently
                // blocked rather than treating this as a satisfied dependency.
            }
        }
        Ok(())
    }

    async fn fail_execution(&self, execution: &WorkflowExecution, message: &str) -> Result<(), WorkflowError> {
        let mut execution = execution.clone();
        execution.status = ExecutionStatus::Failed;
        execution.error = Some(message.to_string());
        execution.completed_at = Some(Utc::now());
        self.executions.update(&execution).await?;
        self.events.publish_broadcast(
            &Topic::Custom(format!("workflow:{}", execution.id)),
            Event::new(kinds::WORKFLOW_FAILED, serde_json::json!({"executionId": execution.id, "error": message})),
        );
        Ok(())
    }

    async fn try_complete(&self, execution: &WorkflowExecution) -> Result<(), WorkflowError> {
        // Re-fetch rather than trusting the caller's (possibly stale) copy:
        // `handle_step_failure` may have already moved this execution to
        // `Failed` with a specific error and emitted `workflow:failed` earlier
        // in this same cycle. Bail out here instead of overwriting that error
        // with a generic one and emitting a duplicate event.
        let mut execution = self.require_execution(execution.id).await?;
        if execution.status.is_terminal() {
            return Ok(());
        }

        let steps = self.steps.list_for_execution(execution.id).await?;
        let any_active = steps
            .iter()
            .any(|s| matches!(s.status, StepStatus::Running | StepStatus::Ready | StepStatus::Pending));
        if any_active {
            return Ok(());
        }

        let hard_failed = steps.iter().any(|s| s.status == StepStatus::Failed && s.on_failure != OnFailure::Continue);
        if hard_failed {
            execution.status = ExecutionStatus::Failed;
            execution.error.get_or_insert_with(|| "one or more steps failed".to_string());
        } else {
            execution.status = ExecutionStatus::Completed;
            execution.context = self.gather_outputs(&execution, &steps).await?;
        }
        execution.completed_at = Some(Utc::now());
        self.executions.update(&execution).await?;

        let kind = if execution.status == ExecutionStatus::Completed { kinds::WORKFLOW_COMPLETED } else { kinds::WORKFLOW_FAILED };
        self.events.publish_broadcast(
            &Topic::Custom(format!("workflow:{}", execution.id)),
            Event::new(kind, serde_json::json!({"executionId": execution.id, "status": execution.status.as_str()})),
        );
        Ok(())
    }

    async fn gather_outputs(&self, execution: &WorkflowExecution, steps: &[WorkflowStep]) -> Result<Value, WorkflowError> {
        let Some(definition) = self.definitions.get(execution.workflow_id).await? else {
            return Ok(execution.context.clone());
        };
        let Some(output_specs) = &definition.definition.outputs else {
            return Ok(execution.context.clone());
        };

        let mut steps_obj = serde_json::Map::new();
        for step in steps {
            steps_obj.insert(step.step_key.clone(), serde_json::json!({"output": step.output.clone().unwrap_or(Value::Null)}));
        }
        let mut bag = match &execution.context {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        bag.insert("steps".to_string(), Value::Object(steps_obj));
        let bag = Value::Object(bag);

        let mut context = match &execution.context {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        for (name, path) in output_specs {
            let value = resolve_dotted(&bag, path).cloned().unwrap_or(Value::Null);
            context.insert(name.clone(), value);
        }
        Ok(Value::Object(context))
    }

    /// Polls all enabled `blackboard`-type triggers for new matching
    /// messages since each trigger's `lastFiredAt`, starting a workflow
    /// execution per match. `event`/`schedule`/`webhook` triggers are
    /// fired through `check_event_trigger`/`check_webhook_trigger` by
    /// whatever transport owns that signal (out of scope here).
    pub async fn poll_triggers(&self) -> Result<(), WorkflowError> {
        let triggers = self.triggers.list_enabled().await?;
        for trigger in triggers {
            if trigger.trigger_type == crate::domain::models::TriggerType::Blackboard {
                self.poll_blackboard_trigger(trigger).await?;
            }
        }
        Ok(())
    }

    async fn poll_blackboard_trigger(&self, mut trigger: WorkflowTrigger) -> Result<(), WorkflowError> {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct Config {
            swarm_id: String,
            #[serde(default)]
            message_type: Option<String>,
            #[serde(default)]
            filter: Option<serde_json::Map<String, Value>>,
        }
        let config: Config = serde_json::from_value(trigger.config.clone())
            .map_err(|e| WorkflowError::GuardExpression(e.to_string()))?;

        let query = BlackboardQuery {
            message_type: config.message_type.clone(),
            ..Default::default()
        };
        let messages = self.blackboard.read(&config.swarm_id, &query).await?;

        let since = trigger.last_fired_at;
        let mut fired = false;
        for message in messages {
            if let Some(since) = since {
                if message.created_at <= since {
                    continue;
                }
            }
            if let Some(filter) = &config.filter {
                let matches = filter.iter().all(|(k, v)| message.payload.get(k) == Some(v));
                if !matches {
                    continue;
                }
            }

            let mut inputs = serde_json::Map::new();
            inputs.insert(
                "triggerMessage".to_string(),
                serde_json::to_value(&message).map_err(|e| WorkflowError::GuardExpression(e.to_string()))?,
            );
            self.start_workflow(trigger.workflow_id, "trigger:blackboard", Some(Value::Object(inputs)), Some(config.swarm_id.clone()))
                .await?;

            trigger.last_fired_at = Some(message.created_at);
            trigger.fire_count += 1;
            fired = true;
        }
        if fired {
            self.triggers.update(&trigger).await?;
        }
        Ok(())
    }

    /// Hook for an external event source: fires every enabled `event`
    /// trigger whose configured `eventType` matches. Returns the number of
    /// workflows started.
    pub async fn check_event_trigger(&self, event_type: &str, data: Value) -> Result<usize, WorkflowError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Config {
            event_type: String,
        }
        let triggers = self.triggers.list_enabled().await?;
        let mut fired = 0;
        for mut trigger in triggers {
            if trigger.trigger_type != crate::domain::models::TriggerType::Event {
                continue;
            }
            let Ok(config) = serde_json::from_value::<Config>(trigger.config.clone()) else {
                continue;
            };
            if config.event_type != event_type {
                continue;
            }
            let mut inputs = serde_json::Map::new();
            inputs.insert("event".to_string(), data.clone());
            self.start_workflow(trigger.workflow_id, "trigger:event", Some(Value::Object(inputs)), None).await?;
            trigger.last_fired_at = Some(Utc::now());
            trigger.fire_count += 1;
            self.triggers.update(&trigger).await?;
            fired += 1;
        }
        Ok(fired)
    }

    /// Hook for an external webhook receiver, same shape as
    /// `check_event_trigger` but keyed on `webhookPath` rather than an
    /// event type.
    pub async fn check_webhook_trigger(&self, path: &str, payload: Value) -> Result<usize, WorkflowError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Config {
            webhook_path: String,
        }
        let triggers = self.triggers.list_enabled().await?;
        let mut fired = 0;
        for mut trigger in triggers {
            if trigger.trigger_type != crate::domain::models::TriggerType::Webhook {
                continue;
            }
            let Ok(config) = serde_json::from_value::<Config>(trigger.config.clone()) else {
                continue;
            };
            if config.webhook_path != path {
                continue;
            }
            let mut inputs = serde_json::Map::new();
            inputs.insert("payload".to_string(), payload.clone());
            self.start_workflow(trigger.workflow_id, "trigger:webhook", Some(Value::Object(inputs)), None).await?;
            trigger.last_fired_at = Some(Utc::now());
            trigger.fire_count += 1;
            self.triggers.update(&trigger).await?;
            fired += 1;
        }
        Ok(fired)
    }

    /// Runs the processing cycle on an interval until `token` is cancelled.
    pub async fn run_processing_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.process_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.process_cycle().await {
                        tracing::warn!(%error, "workflow processing cycle failed");
                    }
                }
            }
        }
    }

    /// Runs the trigger-poll loop on the same interval until `token` is
    /// cancelled.
    pub async fn run_trigger_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.process_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.poll_triggers().await {
                        tracing::warn!(%error, "trigger poll pass failed");
                    }
                }
            }
        }
    }
}

fn is_timed_out(step: &WorkflowStep, now: DateTime<Utc>) -> bool {
    match (step.timeout_ms, step.started_at) {
        (Some(timeout_ms), Some(started_at)) => {
            let elapsed = (now - started_at).num_milliseconds().max(0) as u64;
            elapsed > timeout_ms
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_detection() {
        let now = Utc::now();
        let mut step = sample_step();
        step.timeout_ms = Some(1_000);
        step.started_at = Some(now - chrono::Duration::seconds(2));
        assert!(is_timed_out(&step, now));

        step.started_at = Some(now);
        assert!(!is_timed_out(&step, now));
    }

    #[test]
    fn no_timeout_configured_never_times_out() {
        let now = Utc::now();
        let mut step = sample_step();
        step.started_at = Some(now - chrono::Duration::hours(1));
        assert!(!is_timed_out(&step, now));
    }

    fn sample_step() -> WorkflowStep {
        WorkflowStep {
            id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            step_key: "a".to_string(),
            step_type: StepType::Task,
            status: StepStatus::Running,
            config: Value::Null,
            guard: None,
            depends_on: vec![],
            blocked_by_count: 0,
            on_failure: OnFailure::Fail,
            output: None,
            retry_count: 0,
            max_retries: 0,
            timeout_ms: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}
