//! Property tests for the spawn-request dependency counter and depth bound
//! (spec.md §8, invariants 2 and 4).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use fleetd::domain::models::{Priority, SpawnPayload, SpawnRequest, SpawnRequestStatus};
use fleetd::infrastructure::memory::InMemoryStore;
use fleetd::services::{EventBus, MailHandoffService, SpawnController, SpawnControllerConfig, WorkerSupervisor};
use proptest::prelude::*;
use uuid::Uuid;

fn enqueue_with_depth(depth_level: u32, max_depth: u32) -> SpawnRequestStatus {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async move {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(EventBus::new());
        let mail = Arc::new(MailHandoffService::new(store.clone(), store.clone()));
        let supervisor = Arc::new(WorkerSupervisor::new(
            store.clone(),
            store.clone(),
            mail,
            events.clone(),
            100,
            max_depth,
            "http://127.0.0.1:8080".to_string(),
        ));
        let controller = Arc::new(SpawnController::new(
            store,
            supervisor,
            events,
            SpawnControllerConfig { soft_limit: 100, hard_limit: 100, max_depth, process_interval: Duration::from_millis(10) },
        ));

        let request = controller
            .enqueue(
                "tester".to_string(),
                "worker".to_string(),
                depth_level,
                None,
                Priority::Normal,
                SpawnPayload { task: "noop".to_string(), context: None, checkpoint: None },
                HashSet::new(),
            )
            .await
            .unwrap();
        request.status
    })
}

fn arb_status() -> impl Strategy<Value = SpawnRequestStatus> {
    prop_oneof![
        Just(SpawnRequestStatus::Pending),
        Just(SpawnRequestStatus::Spawned),
        Just(SpawnRequestStatus::Rejected),
    ]
}

proptest! {
    /// `compute_blocked_by_count` always equals the number of dependencies
    /// whose recorded status is not `spawned`, for any dependency set and
    /// any assignment of statuses to those dependencies.
    #[test]
    fn prop_blocked_by_count_matches_definition(
        dep_count in 0usize..10,
        statuses in proptest::collection::vec(arb_status(), 0..10),
    ) {
        let deps: Vec<Uuid> = (0..dep_count).map(|_| Uuid::new_v4()).collect();
        let depends_on: HashSet<Uuid> = deps.iter().copied().collect();

        let dependency_status: HashMap<Uuid, SpawnRequestStatus> = deps
            .iter()
            .zip(statuses.iter().cycle())
            .map(|(id, status)| (*id, *status))
            .collect();

        let expected = deps
            .iter()
            .filter(|d| dependency_status.get(*d) != Some(&SpawnRequestStatus::Spawned))
            .count() as u32;

        let actual = SpawnRequest::compute_blocked_by_count(&depends_on, &dependency_status);
        prop_assert_eq!(actual, expected);
    }

    /// A dependency absent from the status map counts as unresolved (not
    /// `spawned`), so adding unknown dependency ids only ever raises the
    /// count, never lowers it.
    #[test]
    fn prop_unknown_dependencies_are_blocking(
        known in 0usize..5,
        unknown in 0usize..5,
    ) {
        let known_ids: Vec<Uuid> = (0..known).map(|_| Uuid::new_v4()).collect();
        let unknown_ids: Vec<Uuid> = (0..unknown).map(|_| Uuid::new_v4()).collect();

        let dependency_status: HashMap<Uuid, SpawnRequestStatus> =
            known_ids.iter().map(|id| (*id, SpawnRequestStatus::Spawned)).collect();

        let only_known: HashSet<Uuid> = known_ids.iter().copied().collect();
        let mut with_unknown = only_known.clone();
        with_unknown.extend(unknown_ids.iter().copied());

        let count_known = SpawnRequest::compute_blocked_by_count(&only_known, &dependency_status);
        let count_with_unknown = SpawnRequest::compute_blocked_by_count(&with_unknown, &dependency_status);

        prop_assert_eq!(count_known, 0);
        prop_assert_eq!(count_with_unknown, unknown as u32);
    }

    /// Depth bound (invariant 2): admission never lets a request whose
    /// depth exceeds the configured maximum reach `spawned` — it is
    /// rejected immediately, for any depth/limit pair.
    #[test]
    fn prop_depth_bound_rejects_beyond_max_depth(
        depth_level in 0u32..20,
        max_depth in 0u32..20,
    ) {
        let status = enqueue_with_depth(depth_level, max_depth);
        if depth_level > max_depth {
            prop_assert_eq!(status, SpawnRequestStatus::Rejected);
        } else {
            prop_assert_ne!(status, SpawnRequestStatus::Rejected);
        }
    }
}
