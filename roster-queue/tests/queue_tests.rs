use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use roster_queue::{
    EnqueueOptions, EnqueueOptionsBuilder, PatternRule, Priority, QueueOptions, RequestQueue,
    ThrottleRule,
};
use roster_resilience::{CancelReason, RequestError, RetryPolicy};
use tokio::time::sleep;

fn request(url: &str) -> EnqueueOptionsBuilder {
    let mut builder = EnqueueOptions::builder();
    builder.url(url);
    builder
}

fn queue(options: QueueOptions) -> RequestQueue {
    RequestQueue::spawn(options).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_max_concurrent_is_never_exceeded() {
    let queue = queue(QueueOptions {
        max_concurrent: 2,
        ..Default::default()
    });
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let calls = (0..5).map(|i| {
        let running = running.clone();
        let peak = peak.clone();
        let options = request(&format!("/api/employees/{i}"))
            .tag("batch")
            .build()
            .unwrap();
        queue.enqueue(options, move || {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            }
        })
    });

    let results: Vec<u32> = join_all(calls)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(results, vec![0, 1, 2, 3, 4]);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    let stats = queue.stats().borrow().clone();
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.peak_running, 2);
    assert_eq!(stats.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_per_endpoint_limit_ignores_query() {
    let queue = queue(QueueOptions {
        max_concurrent: 6,
        max_concurrent_per_endpoint: 1,
        ..Default::default()
    });
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let calls = (0..3).map(|page| {
        let running = running.clone();
        let peak = peak.clone();
        let options = request(&format!("https://hr.example.com/api/employees?page={page}"))
            .build()
            .unwrap();
        queue.enqueue(options, move || {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    });
    for result in join_all(calls).await {
        result.unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_retried_exactly_max_retries() {
    let queue = queue(QueueOptions::default());
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    let result: Result<(), _> = queue
        .enqueue(
            request("/api/employees").max_retries(3u32).build().unwrap(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RequestError::from_status(503, "unavailable"))
                }
            },
        )
        .await;

    assert_eq!(result.unwrap_err().status(), Some(503));
    // one initial attempt plus three retries
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(queue.stats().borrow().retried, 3);
    assert_eq!(queue.stats().borrow().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_never_retried() {
    let queue = queue(QueueOptions::default());
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    let result: Result<(), _> = queue
        .enqueue(request("/api/employees/404").build().unwrap(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RequestError::from_status(404, "not found"))
            }
        })
        .await;

    assert_eq!(result.unwrap_err().status(), Some(404));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().borrow().retried, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_on_later_attempt() {
    let queue = queue(QueueOptions {
        retry: RetryPolicy {
            base_delay: Duration::from_millis(100),
            ..Default::default()
        },
        ..Default::default()
    });
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    let value = queue
        .enqueue(request("/api/dashboard").build().unwrap(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RequestError::Network("connection reset".into()))
                } else {
                    Ok("summary")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "summary");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout() {
    let queue = queue(QueueOptions::default());
    let result: Result<(), _> = queue
        .enqueue(
            request("/api/slow")
                .timeout(Duration::from_millis(100))
                .max_retries(0u32)
                .build()
                .unwrap(),
            || async {
                sleep(Duration::from_secs(10)).await;
                Ok(())
            },
        )
        .await;
    assert_eq!(
        result.unwrap_err(),
        RequestError::Timeout(Duration::from_millis(100))
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_by_tag_rejects_pending_and_running() {
    let queue = queue(QueueOptions {
        max_concurrent: 1,
        ..Default::default()
    });
    let side_effect = Arc::new(AtomicBool::new(false));

    let mut tagged = Vec::new();
    for i in 0..3 {
        let queue = queue.clone();
        let side_effect = side_effect.clone();
        tagged.push(tokio::spawn(async move {
            queue
                .enqueue(
                    request(&format!("/api/reports/{i}")).tag("reports").build().unwrap(),
                    move || {
                        let side_effect = side_effect.clone();
                        async move {
                            sleep(Duration::from_secs(60)).await;
                            side_effect.store(true, Ordering::SeqCst);
                            Ok(())
                        }
                    },
                )
                .await
        }));
    }
    let untagged = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .enqueue(request("/api/employees").build().unwrap(), || async { Ok(7) })
                .await
        })
    };

    sleep(Duration::from_millis(1)).await;
    assert_eq!(queue.stats().borrow().running, 1);

    assert_eq!(queue.cancel_by_tag("reports").await, 3);
    for handle in tagged {
        assert_eq!(
            handle.await.unwrap().unwrap_err(),
            RequestError::Cancelled(CancelReason::Tag("reports".into()))
        );
    }
    assert_eq!(untagged.await.unwrap().unwrap(), 7);

    // the aborted attempt never finishes
    sleep(Duration::from_secs(120)).await;
    assert!(!side_effect.load(Ordering::SeqCst));
    assert_eq!(queue.cancel_by_tag("reports").await, 0);
    assert_eq!(queue.stats().borrow().cancelled, 3);
}

/// Occupy the single slot so later requests queue up behind it.
fn spawn_blocker(queue: &RequestQueue, hold: Duration) -> tokio::task::JoinHandle<()> {
    let queue = queue.clone();
    tokio::spawn(async move {
        queue
            .enqueue(request("/api/blocker").build().unwrap(), move || async move {
                sleep(hold).await;
                Ok(())
            })
            .await
            .unwrap();
    })
}

fn spawn_recorded(
    queue: &RequestQueue,
    name: &'static str,
    priority: Priority,
    order: &Arc<Mutex<Vec<&'static str>>>,
) -> tokio::task::JoinHandle<Result<(), RequestError>> {
    let queue = queue.clone();
    let order = order.clone();
    tokio::spawn(async move {
        queue
            .enqueue(
                request(&format!("/api/{name}")).priority(priority).build().unwrap(),
                move || {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(name);
                        Ok(())
                    }
                },
            )
            .await
    })
}

#[tokio::test(start_paused = true)]
async fn test_higher_priority_drains_first() {
    let queue = queue(QueueOptions {
        max_concurrent: 1,
        ..Default::default()
    });
    let order = Arc::new(Mutex::new(Vec::new()));

    let blocker = spawn_blocker(&queue, Duration::from_millis(100));
    sleep(Duration::from_millis(1)).await;
    let low = spawn_recorded(&queue, "low", Priority::Low, &order);
    let normal = spawn_recorded(&queue, "normal", Priority::Normal, &order);
    let high = spawn_recorded(&queue, "high", Priority::High, &order);

    blocker.await.unwrap();
    for handle in [low, normal, high] {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
}

#[tokio::test(start_paused = true)]
async fn test_aging_promotes_waiting_requests() {
    let queue = queue(QueueOptions {
        max_concurrent: 1,
        boost_interval: Duration::from_secs(10),
        aging_tick: Duration::from_secs(1),
        default_timeout: Duration::from_secs(60),
        ..Default::default()
    });
    let order = Arc::new(Mutex::new(Vec::new()));

    let blocker = spawn_blocker(&queue, Duration::from_secs(25));
    sleep(Duration::from_millis(1)).await;
    let aged = spawn_recorded(&queue, "aged", Priority::Low, &order);

    // by now the low request has been boosted twice, up to high
    sleep(Duration::from_secs(21)).await;
    let fresh = spawn_recorded(&queue, "fresh", Priority::Normal, &order);

    blocker.await.unwrap();
    aged.await.unwrap().unwrap();
    fresh.await.unwrap().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["aged", "fresh"]);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_rejects_low_and_evicts_lowest() {
    let queue = queue(QueueOptions {
        max_concurrent: 1,
        max_queue_size: 2,
        ..Default::default()
    });
    let order = Arc::new(Mutex::new(Vec::new()));

    let blocker = spawn_blocker(&queue, Duration::from_millis(100));
    sleep(Duration::from_millis(1)).await;
    let first = spawn_recorded(&queue, "first", Priority::Normal, &order);
    let second = spawn_recorded(&queue, "second", Priority::Normal, &order);
    sleep(Duration::from_millis(1)).await;

    // queue is full: a low arrival is refused outright
    let low = spawn_recorded(&queue, "low", Priority::Low, &order);
    assert_eq!(
        low.await.unwrap().unwrap_err(),
        RequestError::Cancelled(CancelReason::Overflow)
    );

    // a high arrival evicts the last of the lowest tier
    let high = spawn_recorded(&queue, "high", Priority::High, &order);
    assert_eq!(
        second.await.unwrap().unwrap_err(),
        RequestError::Cancelled(CancelReason::Overflow)
    );

    blocker.await.unwrap();
    first.await.unwrap().unwrap();
    high.await.unwrap().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["high", "first"]);
}

#[tokio::test(start_paused = true)]
async fn test_global_throttle_window() {
    let queue = queue(QueueOptions {
        throttle: ThrottleRule {
            max_requests: 2,
            window: Duration::from_secs(1),
        },
        ..Default::default()
    });

    for _ in 0..2 {
        queue
            .enqueue(request("/api/employees").build().unwrap(), || async { Ok(()) })
            .await
            .unwrap();
    }
    let throttled: Result<(), _> = queue
        .enqueue(request("/api/employees").build().unwrap(), || async { Ok(()) })
        .await;
    assert!(matches!(throttled, Err(RequestError::Throttled(_))));
    assert_eq!(queue.stats().borrow().throttled, 1);

    sleep(Duration::from_secs(1)).await;
    queue
        .enqueue(request("/api/employees").build().unwrap(), || async { Ok(()) })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pattern_throttle() {
    let queue = queue(QueueOptions {
        pattern_throttles: vec![PatternRule {
            pattern: "*/documents/upload*".into(),
            max_requests: 1,
            window: Duration::from_secs(10),
        }],
        ..Default::default()
    });

    queue
        .enqueue(request("/api/documents/upload").build().unwrap(), || async { Ok(()) })
        .await
        .unwrap();
    let second: Result<(), _> = queue
        .enqueue(request("/api/documents/upload").build().unwrap(), || async { Ok(()) })
        .await;
    match second {
        Err(RequestError::Throttled(limit)) => assert!(limit.contains("*/documents/upload*")),
        other => panic!("expected throttled, got {other:?}"),
    }
    // other endpoints are unaffected
    queue
        .enqueue(request("/api/documents").build().unwrap(), || async { Ok(()) })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pause_rejects_and_resume_restores() {
    let queue = queue(QueueOptions::default());

    queue.pause().await;
    let result: Result<(), _> = queue
        .enqueue(request("/api/employees").build().unwrap(), || async { Ok(()) })
        .await;
    assert_eq!(result.unwrap_err(), RequestError::Paused);
    assert!(queue.is_paused());

    queue.resume().await;
    let value = queue
        .enqueue(request("/api/employees").build().unwrap(), || async { Ok(1) })
        .await
        .unwrap();
    assert_eq!(value, 1);
    assert!(!queue.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_pending_requests() {
    let queue = queue(QueueOptions {
        max_concurrent: 1,
        ..Default::default()
    });
    let order = Arc::new(Mutex::new(Vec::new()));

    let blocker = spawn_blocker(&queue, Duration::from_millis(100));
    sleep(Duration::from_millis(1)).await;
    let waiting = spawn_recorded(&queue, "waiting", Priority::Normal, &order);
    sleep(Duration::from_millis(1)).await;
    queue.pause().await;

    blocker.await.unwrap();
    sleep(Duration::from_secs(5)).await;
    assert!(order.lock().unwrap().is_empty());
    assert_eq!(queue.stats().borrow().pending, 1);

    queue.resume().await;
    waiting.await.unwrap().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["waiting"]);
}

#[tokio::test(start_paused = true)]
async fn test_batch_window_holds_requests() {
    let queue = queue(QueueOptions {
        batch_window: Duration::from_millis(50),
        ..Default::default()
    });
    let calls = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let queue = queue.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(
                        request(&format!("/api/employees/{i}"))
                            .batch_key("employee-lookup")
                            .build()
                            .unwrap(),
                        move || {
                            let calls = calls.clone();
                            async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                Ok(i)
                            }
                        },
                    )
                    .await
            })
        })
        .collect();

    sleep(Duration::from_millis(10)).await;
    assert_eq!(queue.stats().borrow().batched, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), i);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_outstanding() {
    let queue = queue(QueueOptions::default());
    let pending = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .enqueue(request("/api/slow").build().unwrap(), || async {
                    sleep(Duration::from_secs(10)).await;
                    Ok(())
                })
                .await
        })
    };
    sleep(Duration::from_millis(1)).await;

    queue.shutdown().await;
    assert_eq!(
        pending.await.unwrap().unwrap_err(),
        RequestError::Cancelled(CancelReason::Shutdown)
    );
}

#[tokio::test(start_paused = true)]
async fn test_pause_state_visible_on_return() {
    let queue = queue(QueueOptions::default());

    queue.pause().await;
    assert!(queue.is_paused());
    assert!(queue.stats().borrow().paused);

    queue.resume().await;
    assert!(!queue.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_by_tag_reaches_retry_backoff() {
    let queue = queue(QueueOptions::default());
    let attempts = Arc::new(AtomicU32::new(0));

    let handle = {
        let queue = queue.clone();
        let attempts = attempts.clone();
        tokio::spawn(async move {
            queue
                .enqueue(
                    request("/api/employees")
                        .max_retries(3u32)
                        .tag("sync")
                        .build()
                        .unwrap(),
                    move || {
                        let attempts = attempts.clone();
                        async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            Err::<(), _>(RequestError::from_status(503, "unavailable"))
                        }
                    },
                )
                .await
        })
    };

    // first attempt failed, the retry waits out a backoff of at least 850ms
    sleep(Duration::from_millis(10)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().borrow().delayed, 1);

    assert_eq!(queue.cancel_by_tag("sync").await, 1);
    assert_eq!(
        handle.await.unwrap().unwrap_err(),
        RequestError::Cancelled(CancelReason::Tag("sync".into()))
    );

    sleep(Duration::from_secs(60)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().borrow().delayed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_by_tag_reaches_open_batch() {
    let queue = queue(QueueOptions {
        batch_window: Duration::from_millis(50),
        ..Default::default()
    });
    let calls = Arc::new(AtomicU32::new(0));

    let spawn = |i: u32, tag: &'static str| {
        let queue = queue.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            queue
                .enqueue(
                    request(&format!("/api/documents/{i}"))
                        .batch_key("document-lookup")
                        .tag(tag)
                        .build()
                        .unwrap(),
                    move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(i)
                        }
                    },
                )
                .await
        })
    };
    let dropped = spawn(1, "preview");
    let kept = spawn(2, "listing");

    sleep(Duration::from_millis(10)).await;
    assert_eq!(queue.stats().borrow().batched, 2);

    assert_eq!(queue.cancel_by_tag("preview").await, 1);
    assert_eq!(
        dropped.await.unwrap().unwrap_err(),
        RequestError::Cancelled(CancelReason::Tag("preview".into()))
    );
    assert_eq!(queue.stats().borrow().batched, 1);

    assert_eq!(kept.await.unwrap().unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
