use async_trait::async_trait;
use dispatch_recipe::framework::mock::RecordingFaultSink;
use dispatch_recipe::framework::{
    BoxError, DispatchError, QueueEngine, QueueOptions, WorkProcessor, WorkerState,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Records processed items; fails on `fail_on` and panics on `panic_on`.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<u32>>,
    fail_on: Option<u32>,
    panic_on: Option<u32>,
}

#[async_trait]
impl WorkProcessor<u32> for Recorder {
    async fn process(&self, item: u32) -> Result<(), BoxError> {
        self.seen.lock().push(item);
        if Some(item) == self.panic_on {
            panic!("item {item} exploded");
        }
        if Some(item) == self.fail_on {
            return Err(format!("item {item} rejected").into());
        }
        Ok(())
    }
}

/// Blocks each item until a permit is released.
struct Gate {
    permits: Arc<Semaphore>,
    seen: Mutex<Vec<u32>>,
}

#[async_trait]
impl WorkProcessor<u32> for Gate {
    async fn process(&self, item: u32) -> Result<(), BoxError> {
        let permit = self.permits.acquire().await?;
        permit.forget();
        self.seen.lock().push(item);
        Ok(())
    }
}

fn engine(processor: Arc<dyn WorkProcessor<u32>>, faults: &RecordingFaultSink) -> QueueEngine<u32> {
    QueueEngine::new(QueueOptions::new("test-queue"), processor, Arc::new(faults.clone()))
}

async fn wait_for_drain(queue: &QueueEngine<u32>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.backlog() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("queue did not drain");
}

#[tokio::test]
async fn test_enqueue_requires_running() {
    let faults = RecordingFaultSink::new();
    let queue = engine(Arc::new(Recorder::default()), &faults);

    let err = queue.enqueue(1).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::InvalidState {
            operation: "enqueue",
            state: WorkerState::NotStarted
        }
    ));
    assert_eq!(queue.backlog(), 0);

    queue.start().await.unwrap();
    queue.enqueue(1).unwrap();
    assert!(queue.backlog() <= 1);
    wait_for_drain(&queue).await;

    queue.stop().await.unwrap();
    assert!(matches!(
        queue.enqueue(2),
        Err(DispatchError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_backlog_counts_item_until_drained() {
    let faults = RecordingFaultSink::new();
    let permits = Arc::new(Semaphore::new(0));
    let gate = Arc::new(Gate {
        permits: permits.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let queue = engine(gate.clone(), &faults);
    queue.start().await.unwrap();

    queue.enqueue(7).unwrap();
    // Held by the gate, so still counted whether queued or in flight
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.backlog(), 1);

    permits.add_permits(1);
    wait_for_drain(&queue).await;
    assert_eq!(*gate.seen.lock(), vec![7]);
    queue.stop().await.unwrap();
}

#[tokio::test]
async fn test_drains_in_fifo_order() {
    let faults = RecordingFaultSink::new();
    let recorder = Arc::new(Recorder::default());
    let queue = engine(recorder.clone(), &faults);
    queue.start().await.unwrap();

    for item in 0..100 {
        queue.enqueue(item).unwrap();
    }
    wait_for_drain(&queue).await;

    assert_eq!(*recorder.seen.lock(), (0..100).collect::<Vec<_>>());
    assert!(faults.is_empty());
    queue.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_item_is_reported_once_and_loop_continues() {
    let faults = RecordingFaultSink::new();
    let recorder = Arc::new(Recorder {
        fail_on: Some(3),
        ..Recorder::default()
    });
    let queue = engine(recorder.clone(), &faults);
    queue.start().await.unwrap();

    for item in 1..=6 {
        queue.enqueue(item).unwrap();
    }
    wait_for_drain(&queue).await;

    assert_eq!(*recorder.seen.lock(), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(faults.labels(), vec!["processing_failure"]);
    faults.with(|recorded| {
        assert_eq!(recorded[0].component, "test-queue");
        assert!(recorded[0].error.to_string().contains("item 3 rejected"));
    });
    assert_eq!(queue.state(), WorkerState::Running);
    queue.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_item_does_not_kill_worker() {
    let faults = RecordingFaultSink::new();
    let recorder = Arc::new(Recorder {
        panic_on: Some(2),
        ..Recorder::default()
    });
    let queue = engine(recorder.clone(), &faults);
    queue.start().await.unwrap();

    for item in 1..=4 {
        queue.enqueue(item).unwrap();
    }
    wait_for_drain(&queue).await;

    assert_eq!(*recorder.seen.lock(), vec![1, 2, 3, 4]);
    assert_eq!(faults.len(), 1);
    faults.with(|recorded| {
        assert!(recorded[0].error.to_string().contains("item 2 exploded"));
    });
    queue.stop().await.unwrap();
}

#[tokio::test]
async fn test_pause_holds_backlog_and_resume_drains() {
    let faults = RecordingFaultSink::new();
    let recorder = Arc::new(Recorder::default());
    let queue = engine(recorder.clone(), &faults);
    queue.start().await.unwrap();

    queue.pause().await.unwrap();
    assert_eq!(queue.state(), WorkerState::Paused);
    for item in 0..5 {
        queue.enqueue(item).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.backlog(), 5);
    assert!(recorder.seen.lock().is_empty());

    queue.resume().await.unwrap();
    wait_for_drain(&queue).await;
    assert_eq!(*recorder.seen.lock(), vec![0, 1, 2, 3, 4]);
    queue.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_keeps_pending_and_restart_drains_them() {
    let faults = RecordingFaultSink::new();
    let recorder = Arc::new(Recorder::default());
    let queue = engine(recorder.clone(), &faults);
    queue.start().await.unwrap();

    queue.pause().await.unwrap();
    queue.enqueue(1).unwrap();
    queue.enqueue(2).unwrap();
    queue.stop().await.unwrap();
    assert_eq!(queue.state(), WorkerState::Stopped);
    assert_eq!(queue.backlog(), 2);

    queue.start().await.unwrap();
    wait_for_drain(&queue).await;
    assert_eq!(*recorder.seen.lock(), vec![1, 2]);
    queue.stop().await.unwrap();
}

#[tokio::test]
async fn test_dispose_discards_backlog() {
    let faults = RecordingFaultSink::new();
    let recorder = Arc::new(Recorder::default());
    let queue = engine(recorder.clone(), &faults);
    queue.start().await.unwrap();

    queue.pause().await.unwrap();
    for item in 0..3 {
        queue.enqueue(item).unwrap();
    }
    queue.dispose().await.unwrap();

    assert_eq!(queue.state(), WorkerState::Disposed);
    assert_eq!(queue.backlog(), 0);
    assert!(recorder.seen.lock().is_empty());
    assert!(matches!(
        queue.dispose().await,
        Err(DispatchError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_item_only() {
    let faults = RecordingFaultSink::new();
    let permits = Arc::new(Semaphore::new(0));
    let gate = Arc::new(Gate {
        permits: permits.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let queue = Arc::new(engine(gate.clone(), &faults));
    queue.start().await.unwrap();
    for item in 0..3 {
        queue.enqueue(item).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stopper = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.stop().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!stopper.is_finished());

    // Release only the in-flight item
    permits.add_permits(1);
    stopper.await.unwrap().unwrap();

    assert_eq!(queue.state(), WorkerState::Stopped);
    assert_eq!(*gate.seen.lock(), vec![0]);
    assert_eq!(queue.backlog(), 2);
}

#[tokio::test]
async fn test_concurrent_producers() {
    let faults = RecordingFaultSink::new();
    let recorder = Arc::new(Recorder::default());
    let queue = Arc::new(engine(recorder.clone(), &faults));
    queue.start().await.unwrap();

    let mut producers = Vec::new();
    for producer in 0..4u32 {
        let queue = queue.clone();
        producers.push(tokio::spawn(async move {
            for n in 0..25u32 {
                queue.enqueue(producer * 100 + n).unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    wait_for_drain(&queue).await;

    let seen = recorder.seen.lock().clone();
    assert_eq!(seen.len(), 100);
    // Per-producer order is preserved
    for producer in 0..4u32 {
        let mine: Vec<_> = seen.iter().filter(|i| **i / 100 == producer).copied().collect();
        assert_eq!(mine, (0..25).map(|n| producer * 100 + n).collect::<Vec<_>>());
    }
    queue.stop().await.unwrap();
}

#[tokio::test]
async fn test_pause_unsupported_queue() {
    let faults = RecordingFaultSink::new();
    let queue = QueueEngine::new(
        QueueOptions::new("fixed").with_pause_supported(false),
        Arc::new(Recorder::default()) as Arc<dyn WorkProcessor<u32>>,
        Arc::new(faults.clone()),
    );
    queue.start().await.unwrap();
    assert!(matches!(
        queue.pause().await,
        Err(DispatchError::Unsupported { .. })
    ));
    assert_eq!(queue.state(), WorkerState::Running);
    queue.dispose().await.unwrap();
}

/// Spawns OS-thread producers that enqueue until the queue refuses.
fn flood(queue: &Arc<QueueEngine<u32>>, producers: u32) -> Vec<std::thread::JoinHandle<u32>> {
    (0..producers)
        .map(|_| {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let mut accepted = 0;
                while queue.enqueue(accepted).is_ok() {
                    accepted += 1;
                }
                accepted
            })
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispose_racing_producers_leaves_nothing_behind() {
    for _ in 0..50 {
        let faults = RecordingFaultSink::new();
        let queue = Arc::new(engine(Arc::new(Recorder::default()), &faults));
        queue.start().await.unwrap();

        let producers = flood(&queue, 6);
        tokio::time::sleep(Duration::from_millis(1)).await;
        queue.dispose().await.unwrap();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(queue.state(), WorkerState::Disposed);
        assert_eq!(queue.backlog(), 0);
        assert!(queue.enqueue(0).is_err());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_racing_producers_freezes_backlog() {
    for _ in 0..10 {
        let faults = RecordingFaultSink::new();
        let queue = Arc::new(engine(Arc::new(Recorder::default()), &faults));
        queue.start().await.unwrap();

        let producers = flood(&queue, 4);
        tokio::time::sleep(Duration::from_millis(1)).await;
        queue.stop().await.unwrap();
        let frozen = queue.backlog();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(queue.state(), WorkerState::Stopped);
        assert_eq!(queue.backlog(), frozen);
        assert!(matches!(
            queue.enqueue(0),
            Err(DispatchError::InvalidState { .. })
        ));

        // Kept items drain on the next run
        queue.start().await.unwrap();
        wait_for_drain(&queue).await;
        queue.dispose().await.unwrap();
    }
}
