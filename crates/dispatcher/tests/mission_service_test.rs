use std::sync::Arc;

use datatrans_core::{
    models::{
        ConstraintRecord, MissionState, PipelineDefinition, TableRef, TaskMessage, TaskState,
        TaskUpdate,
    },
    services::{CompletionPolicyKind, KnownTables, MissionAggregator},
    traits::{MessageQueue, MissionRepository, PipelineRepository, TaskRepository},
    DatatransError, RetryPolicy,
};
use datatrans_dispatcher::{MissionService, MissionSplitter, TaskDispatcher};
use datatrans_infrastructure::{
    ConstraintCatalog, InMemoryMessageQueue, InMemorySourceStore, InMemoryStateStore,
};
use serde_json::json;

const QUEUE: &str = "datatrans_tasks";

struct Fixture {
    store: Arc<InMemoryStateStore>,
    queue: Arc<InMemoryMessageQueue>,
    source: Arc<InMemorySourceStore>,
    service: MissionService,
}

fn users_pipeline() -> PipelineDefinition {
    PipelineDefinition::new("users", TableRef::new("public", "users"), "users-index")
}

async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStateStore::with_pipelines(vec![users_pipeline()]).await);
    let queue = Arc::new(InMemoryMessageQueue::new());
    let source = Arc::new(InMemorySourceStore::new());
    source
        .insert_table(
            "users",
            (1..=23).map(|id| json!({"id": id, "name": format!("user-{id}")})).collect(),
        )
        .await;

    let catalog = Arc::new(ConstraintCatalog::new(vec![ConstraintRecord::primary_key(
        "users", "id",
    )]));
    let aggregator = Arc::new(MissionAggregator::new(
        store.clone(),
        store.clone(),
        CompletionPolicyKind::AllDone.build(),
    ));
    let retry = RetryPolicy::no_retry();

    let service = MissionService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        source.clone(),
        KnownTables::new(Vec::new(), catalog),
        MissionSplitter::new(store.clone(), aggregator),
        TaskDispatcher::new(store.clone(), queue.clone(), QUEUE.to_string(), retry.clone()),
        retry,
    );

    Fixture {
        store,
        queue,
        source,
        service,
    }
}

#[tokio::test]
async fn test_create_split_dispatch_flow() {
    let f = fixture().await;

    let mission = f.service.create_mission("users", 23, 5).await.unwrap();
    let tasks = f.service.split(&mission.id).await.unwrap();
    let ranges: Vec<(i64, i64)> = tasks.iter().map(|t| (t.take, t.skip)).collect();
    assert_eq!(ranges, vec![(4, 0), (4, 4), (4, 8), (4, 12), (4, 16), (3, 20)]);

    let summary = f.service.dispatch_mission(&mission.id).await.unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.dispatched.len(), 6);
    assert!(summary
        .dispatched
        .iter()
        .all(|t| t.state == TaskState::InQueue && t.queue_message_id.is_some()));
    assert_eq!(f.queue.get_queue_size(QUEUE).await.unwrap(), 6);

    let delivered = f.queue.consume_messages(QUEUE, 1).await.unwrap().remove(0);
    let body: TaskMessage = delivered.message.decode_payload().unwrap();
    assert_eq!(body.mission_id, mission.id);
    assert_eq!((body.take, body.skip), (4, 0));

    let progress = f.service.progress(&mission.id).await.unwrap();
    assert_eq!(progress.in_queue, 6);
    assert_eq!(progress.total(), 6);
}

#[tokio::test]
async fn test_dispatching_twice_skips_enqueued_tasks() {
    let f = fixture().await;
    let mission = f.service.create_mission("users", 4, 2).await.unwrap();
    f.service.split(&mission.id).await.unwrap();

    f.service.dispatch_mission(&mission.id).await.unwrap();
    let again = f.service.dispatch_mission(&mission.id).await.unwrap();

    assert!(again.dispatched.is_empty());
    assert_eq!(again.skipped, 2);
    assert_eq!(f.queue.get_queue_size(QUEUE).await.unwrap(), 2);
}

#[tokio::test]
async fn test_create_mission_for_pipeline_counts_source_rows() {
    let f = fixture().await;

    let mission = f
        .service
        .create_mission_for_pipeline("users", 10)
        .await
        .unwrap();
    assert_eq!(mission.total_records, 23);
    assert_eq!(f.source.query_count(), 1);

    let tasks = f.service.split(&mission.id).await.unwrap();
    assert_eq!(tasks.iter().map(|t| t.take).sum::<i64>(), 23);
}

#[tokio::test]
async fn test_invalid_batch_count_is_rejected_before_any_state() {
    let f = fixture().await;

    let err = f.service.create_mission("users", 10, 0).await.unwrap_err();
    assert!(matches!(err, DatatransError::InvalidArgument(_)));

    let err = f
        .service
        .create_mission_for_pipeline("users", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, DatatransError::InvalidArgument(_)));
    assert_eq!(f.source.query_count(), 0);
}

#[tokio::test]
async fn test_unknown_pipeline_is_not_found() {
    let f = fixture().await;
    let err = f.service.create_mission("orders", 10, 2).await.unwrap_err();
    assert!(matches!(err, DatatransError::NotFound { .. }));
}

#[tokio::test]
async fn test_resplit_is_rejected() {
    let f = fixture().await;
    let mission = f.service.create_mission("users", 10, 3).await.unwrap();
    f.service.split(&mission.id).await.unwrap();

    let err = f.service.split(&mission.id).await.unwrap_err();
    assert!(matches!(err, DatatransError::InvalidState { .. }));
    assert_eq!(f.service.progress(&mission.id).await.unwrap().total(), 4);
}

#[tokio::test]
async fn test_empty_mission_completes_on_split() {
    let f = fixture().await;
    let mission = f.service.create_mission("users", 0, 4).await.unwrap();

    assert!(f.service.split(&mission.id).await.unwrap().is_empty());
    let stored = MissionRepository::get_by_id(f.store.as_ref(), &mission.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, MissionState::Done);
}

#[tokio::test]
async fn test_dispatch_requires_split_mission() {
    let f = fixture().await;
    let mission = f.service.create_mission("users", 10, 3).await.unwrap();

    let err = f.service.dispatch_mission(&mission.id).await.unwrap_err();
    assert!(matches!(err, DatatransError::InvalidState { .. }));
}

#[tokio::test]
async fn test_failed_tasks_are_redispatched() {
    let f = fixture().await;
    let mission = f.service.create_mission("users", 4, 2).await.unwrap();
    let tasks = f.service.split(&mission.id).await.unwrap();
    f.service.dispatch_mission(&mission.id).await.unwrap();

    let error = DatatransError::Permanent("mapper_parsing_exception".to_string());
    f.store
        .transition(tasks[0].id, &[TaskState::InQueue], TaskState::Failed, TaskUpdate::failed(&error))
        .await
        .unwrap()
        .unwrap();

    let summary = f.service.redispatch_failed(&mission.id).await.unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.dispatched.len(), 1);
    assert_eq!(summary.dispatched[0].id, tasks[0].id);
    assert_eq!(summary.skipped, 1);
    assert_eq!(f.queue.get_queue_size(QUEUE).await.unwrap(), 3);

    let requeued = TaskRepository::get_by_id(f.store.as_ref(), tasks[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(requeued.state, TaskState::InQueue);

    let again = f.service.redispatch_failed(&mission.id).await.unwrap();
    assert!(again.dispatched.is_empty());
    assert!(matches!(
        f.service.redispatch_task(tasks[1].id).await,
        Err(DatatransError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_single_task_dispatch_by_id() {
    let f = fixture().await;
    let mission = f.service.create_mission("users", 4, 2).await.unwrap();
    let tasks = f.service.split(&mission.id).await.unwrap();

    let dispatched = f.service.dispatch_task(tasks[1].id).await.unwrap();
    assert_eq!(dispatched.state, TaskState::InQueue);
    assert_eq!(f.queue.get_queue_size(QUEUE).await.unwrap(), 1);

    assert!(matches!(
        f.service.dispatch_task(999).await,
        Err(DatatransError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_pipeline_in_use_cannot_be_redefined() {
    let f = fixture().await;
    f.service.create_mission("users", 10, 2).await.unwrap();

    let mut retargeted = users_pipeline();
    retargeted.source_table = TableRef::new("public", "orders");
    let err = PipelineRepository::save(f.store.as_ref(), &retargeted)
        .await
        .unwrap_err();
    assert!(matches!(err, DatatransError::InvalidState { .. }));

    PipelineRepository::save(f.store.as_ref(), &users_pipeline())
        .await
        .unwrap();
    let stored = PipelineRepository::get_by_id(f.store.as_ref(), "users")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.source_table.name, "users");
}
