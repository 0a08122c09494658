//! Integration tests for `WorkerSupervisor::dismiss` idempotency against the
//! in-memory backend (spec.md §8, scenario S1).

use std::sync::Arc;

use chrono::Utc;
use fleetd::domain::models::{SpawnConfig, Worker, WorkerRole};
use fleetd::domain::ports::WorkerRepository;
use fleetd::infrastructure::memory::InMemoryStore;
use fleetd::services::{EventBus, MailHandoffService, WorkerSupervisor};
use uuid::Uuid;

fn supervisor(store: Arc<InMemoryStore>) -> Arc<WorkerSupervisor> {
    let events = Arc::new(EventBus::new());
    let mail = Arc::new(MailHandoffService::new(store.clone(), store.clone()));
    Arc::new(WorkerSupervisor::new(store.clone(), store, mail, events, 100, 3, "http://127.0.0.1:8080".to_string()))
}

async fn seed_worker(store: &InMemoryStore, handle: &str) -> Uuid {
    let config = SpawnConfig {
        handle: handle.to_string(),
        team_name: "alpha".to_string(),
        role: WorkerRole::Worker,
        swarm_id: None,
        depth_level: 0,
        session_id: None,
        initial_prompt: None,
        worktree_path: None,
        worktree_branch: None,
        command: "true".to_string(),
        args: vec![],
        auto_restart: true,
    };
    let worker = Worker::new(Uuid::new_v4(), &config, Utc::now());
    let id = worker.id;
    store.create(&worker).await.unwrap();
    id
}

#[tokio::test]
async fn dismiss_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let sup = supervisor(store.clone());
    let id = seed_worker(&store, "alice").await;

    assert!(sup.dismiss(id).await.unwrap());
    assert!(!sup.dismiss(id).await.unwrap());

    let worker = store.get(id).await.unwrap().unwrap();
    assert_eq!(worker.status, fleetd::domain::models::WorkerStatus::Dismissed);
}

#[tokio::test]
async fn dismiss_unknown_worker_returns_false() {
    let store = Arc::new(InMemoryStore::new());
    let sup = supervisor(store);

    assert!(!sup.dismiss(Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn spawn_exposes_subprocess_contract_env_vars() {
    // spec.md §6: the worker's environment must carry its handle, team,
    // role, a per-launch uid, and the swarm id. Round-trips the handle
    // back through `CLAUDE_CODE_AGENT_NAME` via a real `sh` subprocess and
    // the existing `system`/`init` event parsing, rather than asserting
    // on `std::process::Command` construction directly.
    let store = Arc::new(InMemoryStore::new());
    let sup = supervisor(store.clone());

    let config = SpawnConfig {
        handle: "env-probe".to_string(),
        team_name: "alpha".to_string(),
        role: WorkerRole::Worker,
        swarm_id: Some("swarm-7".to_string()),
        depth_level: 0,
        session_id: None,
        initial_prompt: None,
        worktree_path: None,
        worktree_branch: None,
        command: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            r#"printf '{"type":"system","subtype":"init","session_id":"%s|%s|%s|%s"}\n' \
                "$CLAUDE_CODE_AGENT_NAME" "$CLAUDE_CODE_TEAM_NAME" "$CLAUDE_CODE_AGENT_TYPE" "$CLAUDE_CODE_SWARM_ID""#
                .to_string(),
        ],
        auto_restart: true,
    };

    let worker = sup.spawn(config).await.unwrap();

    let mut observed = None;
    for _ in 0..50 {
        if let Some(row) = store.get(worker.id).await.unwrap() {
            if row.session_id.is_some() {
                observed = row.session_id;
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert_eq!(observed.as_deref(), Some("env-probe|alpha|worker|swarm-7"));
}

#[tokio::test]
async fn dismiss_all_with_no_active_handles_is_a_no_op() {
    let store = Arc::new(InMemoryStore::new());
    let sup = supervisor(store.clone());
    seed_worker(&store, "alice").await;

    // `dismiss_all` only walks workers with a live process handle; a worker
    // seeded straight into the repo (no real subprocess) isn't among them.
    let count = sup.dismiss_all().await.unwrap();
    assert_eq!(count, 0);
}
