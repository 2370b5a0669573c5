mod common;

use common::*;

use futures::future::join_all;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use granule_orchestrator::models::NewJob;
use granule_orchestrator::orchestration::GetWorkResponse;
use granule_orchestrator::{JobStatus, WorkItemStatus};

#[tokio::test]
async fn test_concurrent_pollers_never_share_an_item() {
    let harness = TestHarness::new();
    let job = harness
        .create_job(NewJob::new("joe", 10), &[StepDef::service("subsetter")])
        .await;

    let polls = (0..12).map(|_| harness.core.dispatcher.get_work("subsetter", Some(TEST_WORKER)));
    let responses: Vec<GetWorkResponse> = join_all(polls)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let claimed: Vec<i64> = responses
        .iter()
        .filter_map(|response| response.work_item().map(|item| item.id))
        .collect();
    let unique: HashSet<i64> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), 10);
    assert_eq!(unique.len(), 10);
    assert_eq!(
        responses
            .iter()
            .filter(|response| **response == GetWorkResponse::NoWork)
            .count(),
        2
    );

    for item in harness.items_for_step(job.job_id, 1).await {
        assert_eq!(item.status, WorkItemStatus::Running);
        assert!(item.started_at.is_some());
    }
}

#[tokio::test]
async fn test_oldest_ready_item_is_dispatched_first() {
    let harness = TestHarness::new();
    let job = harness
        .create_job(NewJob::new("joe", 3), &[StepDef::service("subsetter")])
        .await;

    let mut dispatched = Vec::new();
    for _ in 0..3 {
        let (item, _) = harness.dispatch("subsetter").await;
        dispatched.push(item.id);
    }
    let created: Vec<i64> = job.initial_items.iter().map(|item| item.id).collect();
    assert_eq!(dispatched, created);
}

#[tokio::test]
async fn test_items_of_inactive_jobs_are_not_dispatched() {
    let harness = TestHarness::new();
    for status in [JobStatus::Paused, JobStatus::Failed, JobStatus::Canceled] {
        harness
            .create_job(
                NewJob::new("joe", 1).with_status(status),
                &[StepDef::service("subsetter")],
            )
            .await;
    }
    assert!(!harness.has_work("subsetter").await);

    let running = harness
        .create_job(NewJob::new("joe", 1), &[StepDef::service("subsetter")])
        .await;
    let (item, _) = harness.dispatch("subsetter").await;
    assert_eq!(item.job_id, running.job_id);
}

#[tokio::test]
async fn test_services_only_receive_their_own_items() {
    let harness = TestHarness::new();
    harness
        .create_job(NewJob::new("joe", 1), &[StepDef::service("subsetter")])
        .await;

    assert!(!harness.has_work("reformatter").await);
    let (item, max_granules) = harness.dispatch("subsetter").await;
    assert_eq!(item.service_id, "subsetter");
    assert_eq!(max_granules, None);
}

#[tokio::test]
async fn test_empty_poll_waits_between_attempts() {
    let mut config = test_config();
    config.work_items.get_work_max_tries = 3;
    config.work_items.get_work_retry_delay_ms = 20;
    let harness = TestHarness::with_config(config);

    let started = Instant::now();
    let response = harness
        .core
        .dispatcher
        .get_work("subsetter", None)
        .await
        .unwrap();
    assert_eq!(response, GetWorkResponse::NoWork);
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn test_discovery_limit_tracks_successful_pages() {
    let harness = TestHarness::new();
    let job = harness
        .create_job(
            NewJob::new("joe", 150),
            &[StepDef::discovery("query-cmr"), StepDef::service("subsetter")],
        )
        .await;

    let (first, max_granules) = harness.dispatch("query-cmr").await;
    assert_eq!(max_granules, Some(100));
    let results =
        write_discovery_page(harness.object_store.as_ref(), &first, &granules("G", 3)).await;
    harness
        .handle(granule_orchestrator::WorkItemUpdate::succeeded(first.id, results).with_scroll_id("next"))
        .await;

    let (second, max_granules) = harness.dispatch("query-cmr").await;
    assert_eq!(max_granules, Some(50));
    assert_eq!(second.scroll_id.as_deref(), Some("next"));
    assert_eq!(second.workflow_step_index, 1);
    assert_eq!(harness.items_for_step(job.job_id, 1).await.len(), 2);
}
