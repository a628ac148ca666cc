use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use taskplane_core::{Clock, ManualClock, SystemClock, Task, TaskBroker, TaskId, TaskState, TaskplaneError};
use taskplane_infrastructure::{InMemoryBroker, InMemoryBrokerConfig};
use taskplane_worker::{
    handler_fn, DedupHandler, HandlerRegistry, RetryPolicy, TaskEvent, TaskHandler, Worker,
    WorkerSettings,
};

fn settings() -> WorkerSettings {
    WorkerSettings {
        concurrency: 2,
        prefetch_limit: 4,
        max_tasks_per_child: 1000,
        poll_interval: Duration::from_millis(10),
        lease_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(5),
        retry: RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(40)),
    }
}

fn start(
    broker: &InMemoryBroker,
    registry: HandlerRegistry,
    settings: WorkerSettings,
) -> (taskplane_worker::WorkerHandle, broadcast::Receiver<TaskEvent>) {
    let (events, rx) = broadcast::channel(256);
    let worker = Worker::new(
        "worker-test",
        Arc::new(broker.clone()),
        Arc::new(registry),
        settings,
        events,
    );
    (worker.spawn(), rx)
}

async fn next_terminal(rx: &mut broadcast::Receiver<TaskEvent>) -> TaskEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if event.is_terminal() {
                return event;
            }
        }
    })
    .await
    .expect("no terminal event")
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_successful_task_is_acked_after_completion() {
    let broker = InMemoryBroker::new();
    let registry = HandlerRegistry::new().with("add", || {
        handler_fn(|task: Task| async move {
            let a = task.args["a"].as_i64().unwrap_or(0);
            let b = task.args["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        })
    });
    let (handle, mut events) = start(&broker, registry, settings());

    let id = broker.enqueue(Task::new("add", json!({"a": 1, "b": 2}))).await.unwrap();
    let event = next_terminal(&mut events).await;
    assert!(matches!(event, TaskEvent::Completed { task_id, .. } if task_id == id));
    assert_eq!(broker.task(id).await.unwrap().unwrap().state, TaskState::Completed);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_failing_task_runs_max_retries_plus_one_times() {
    let broker = InMemoryBroker::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let registry = HandlerRegistry::new().with("flaky", move || {
        let counter = counter.clone();
        handler_fn(move |_task: Task| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TaskplaneError::TaskExecution("boom".to_string()))
            }
        })
    });
    let (handle, mut events) = start(&broker, registry, settings());

    let id = broker
        .enqueue(Task::new("flaky", Value::Null).with_max_retries(2))
        .await
        .unwrap();

    match next_terminal(&mut events).await {
        TaskEvent::Failed { task_id, attempts, error, .. } => {
            assert_eq!(task_id, id);
            assert_eq!(attempts, 3);
            assert!(error.contains("boom"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    let task = broker.task(id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempt_count, 3);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_unknown_task_is_dead_lettered_without_retry() {
    let broker = InMemoryBroker::new();
    let (handle, mut events) = start(&broker, HandlerRegistry::new(), settings());

    let id = broker.enqueue(Task::new("missing", Value::Null)).await.unwrap();
    match next_terminal(&mut events).await {
        TaskEvent::Failed { task_id, attempts, .. } => {
            assert_eq!(task_id, id);
            assert_eq!(attempts, 0);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn test_execution_is_bounded_by_lease_timeout() {
    let broker = InMemoryBroker::new();
    let registry = HandlerRegistry::new().with("slow", || {
        handler_fn(|_task: Task| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        })
    });
    let settings = WorkerSettings {
        lease_timeout: Duration::from_millis(50),
        ..settings()
    };
    let (handle, mut events) = start(&broker, registry, settings);

    broker
        .enqueue(Task::new("slow", Value::Null).with_max_retries(0))
        .await
        .unwrap();
    match next_terminal(&mut events).await {
        TaskEvent::Failed { error, attempts, .. } => {
            assert_eq!(attempts, 1);
            assert_eq!(error, TaskplaneError::ExecutionTimeout.to_string());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn test_prefetch_limit_bounds_leased_tasks() {
    let broker = InMemoryBroker::new();
    let gate = Arc::new(tokio::sync::Notify::new());
    let waiter = gate.clone();
    let registry = HandlerRegistry::new().with("blocked", move || {
        let waiter = waiter.clone();
        handler_fn(move |_task: Task| {
            let waiter = waiter.clone();
            async move {
                waiter.notified().await;
                Ok(Value::Null)
            }
        })
    });
    let settings = WorkerSettings {
        concurrency: 1,
        prefetch_limit: 2,
        ..settings()
    };
    for _ in 0..5 {
        broker.enqueue(Task::new("blocked", Value::Null)).await.unwrap();
    }
    let (handle, _events) = start(&broker, registry, settings);

    wait_until(|| handle.active_tasks() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.queue_depth().await.unwrap(), 3);

    gate.notify_waiters();
    drop(handle);
}

#[tokio::test]
async fn test_slot_is_recycled_after_max_tasks() {
    let broker = InMemoryBroker::new();
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let registry = HandlerRegistry::new().with("noop", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        handler_fn(|_task: Task| async { Ok(Value::Null) })
    });
    let settings = WorkerSettings {
        concurrency: 1,
        max_tasks_per_child: 2,
        ..settings()
    };
    let (handle, mut events) = start(&broker, registry, settings);

    for _ in 0..4 {
        broker.enqueue(Task::new("noop", Value::Null)).await.unwrap();
    }
    for _ in 0..4 {
        next_terminal(&mut events).await;
    }
    handle.shutdown().await;
    // 初始一次，之后每两个任务重建一次
    assert_eq!(created.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_graceful_shutdown_releases_prefetched_tasks() {
    let broker = InMemoryBroker::new();
    let registry = HandlerRegistry::new().with("work", || {
        handler_fn(|_task: Task| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Value::Null)
        })
    });
    let settings = WorkerSettings {
        concurrency: 1,
        prefetch_limit: 3,
        ..settings()
    };
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(broker.enqueue(Task::new("work", Value::Null)).await.unwrap());
    }
    let (handle, _events) = start(&broker, registry, settings);

    wait_until(|| handle.active_tasks() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.shutdown().await;

    let mut completed = 0;
    for id in ids {
        let task = broker.task(id).await.unwrap().unwrap();
        match task.state {
            TaskState::Completed => completed += 1,
            TaskState::Pending => assert_eq!(task.attempt_count, 0),
            other => panic!("unexpected state: {other:?}"),
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(broker.queue_depth().await.unwrap(), 2);
}

#[tokio::test]
async fn test_broker_outage_does_not_stop_worker() {
    let broker = InMemoryBroker::new();
    let registry = HandlerRegistry::new().with("noop", || handler_fn(|_t: Task| async { Ok(Value::Null) }));
    let (handle, mut events) = start(&broker, registry, settings());

    broker.set_reachable(false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    broker.set_reachable(true);

    let id = broker.enqueue(Task::new("noop", Value::Null)).await.unwrap();
    let event = next_terminal(&mut events).await;
    assert_eq!(event.task_id(), id);
    handle.shutdown().await;
}

async fn wait_all_completed(broker: &InMemoryBroker, ids: &[TaskId]) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let mut done = 0;
            for id in ids {
                if let Some(task) = broker.task(*id).await.unwrap() {
                    if task.state == TaskState::Completed {
                        done += 1;
                    }
                }
            }
            if done == ids.len() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("tasks not completed");
}

#[tokio::test]
async fn test_prefetched_task_is_never_run_by_two_workers() {
    let broker = InMemoryBroker::new();
    let runs: Arc<Mutex<HashMap<TaskId, usize>>> = Arc::default();
    let recorder = runs.clone();
    let registry = Arc::new(HandlerRegistry::new().with("report", move || {
        let recorder = recorder.clone();
        handler_fn(move |task: Task| {
            let recorder = recorder.clone();
            async move {
                *recorder.lock().unwrap().entry(task.id).or_default() += 1;
                tokio::time::sleep(Duration::from_millis(250)).await;
                Ok(Value::Null)
            }
        })
    }));
    let settings = WorkerSettings {
        concurrency: 1,
        prefetch_limit: 3,
        lease_timeout: Duration::from_millis(400),
        ..settings()
    };

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(broker.enqueue(Task::new("report", Value::Null)).await.unwrap());
    }
    let (events, _rx) = broadcast::channel(64);
    let first = Worker::new(
        "worker-a",
        Arc::new(broker.clone()),
        registry.clone(),
        settings.clone(),
        events.clone(),
    )
    .spawn();
    // 第一个Worker预取了全部任务，第三个任务在等待期间租约过期
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = Worker::new("worker-b", Arc::new(broker.clone()), registry, settings, events).spawn();

    wait_all_completed(&broker, &ids).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let runs = runs.lock().unwrap().clone();
    for id in &ids {
        assert_eq!(runs.get(id).copied(), Some(1), "task {id} ran {:?} times", runs.get(id));
    }
    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_redelivery_after_crash_has_single_side_effect() {
    let clock = ManualClock::new(SystemClock.now());
    let broker = InMemoryBroker::with_config(InMemoryBrokerConfig::default(), Arc::new(clock.clone()));
    let charges = Arc::new(AtomicUsize::new(0));
    let charge = {
        let charges = charges.clone();
        move || {
            let charges = charges.clone();
            handler_fn(move |_task: Task| {
                let charges = charges.clone();
                async move {
                    charges.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
        }
    };
    let dedup = DedupHandler::new(charge(), 64);

    let id = broker.enqueue(Task::new("charge", Value::Null)).await.unwrap();

    // 第一个Worker执行完副作用后在确认前崩溃
    let crashed = broker.lease("worker-crashed", Duration::from_secs(30)).await.unwrap().unwrap();
    dedup.handle(&crashed.task).await.unwrap();
    assert_eq!(charges.load(Ordering::SeqCst), 1);

    let registry = HandlerRegistry::new().with("charge", move || dedup.share(charge()));
    let (handle, mut events) = start(&broker, registry, settings());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.task(id).await.unwrap().unwrap().state, TaskState::Leased);

    clock.advance_secs(31);
    match next_terminal(&mut events).await {
        TaskEvent::Completed { task_id, worker_id, .. } => {
            assert_eq!(task_id, id);
            assert_eq!(worker_id, "worker-test");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(charges.load(Ordering::SeqCst), 1);
    assert_eq!(broker.task(id).await.unwrap().unwrap().state, TaskState::Completed);
    assert!(matches!(
        broker.ack(&crashed).await,
        Err(TaskplaneError::LeaseNotHeld { .. })
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    handle.shutdown().await;
}
