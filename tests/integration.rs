use std::{
    collections::HashSet,
    ops::Deref,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use ackq::{
    query::{Sqlite, Templates},
    AckOpts, AckQueue, AnyStore, CallConvention, Clock, Completion, Config, Dialect, DialectKind,
    Error, ManualClock, Msg, NackOutcome, RetryLimit, SqliteStore,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const T0: i64 = 1_700_000_000;

struct TmpQueue {
    queue: AckQueue,
    clock: ManualClock,
    #[allow(unused)]
    tmpdir: TempDir,
}

impl Deref for TmpQueue {
    type Target = AckQueue;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

fn db_config(tmpdir: &TempDir) -> Config {
    Config {
        db_path: Some(
            tmpdir
                .path()
                .join("ackq.db")
                .to_string_lossy()
                .to_string(),
        ),
        ..Config::default()
    }
}

async fn setup() -> TmpQueue {
    setup_with(AckOpts::default()).await
}

async fn setup_with(opts: AckOpts) -> TmpQueue {
    let tmpdir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);

    let queue = AckQueue::builder()
        .store(SqliteStore::connect_with(&db_config(&tmpdir)).await.unwrap())
        .opts(opts)
        .clock(Arc::new(clock.clone()))
        .poll_interval(Duration::from_millis(10))
        .build()
        .unwrap();

    queue.create_schema().await.unwrap();

    TmpQueue {
        queue,
        clock,
        tmpdir,
    }
}

#[tokio::test]
async fn test_fifo_among_available() {
    let queue = setup().await;

    let a = queue.enqueue(b"a").await.unwrap();
    let b = queue.enqueue(b"b").await.unwrap();
    let c = queue.enqueue(b"c").await.unwrap();

    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, a);
    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, b);
    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, c);
    assert_eq!(queue.try_dequeue().await.unwrap(), None);
}

#[tokio::test]
async fn test_expired_claim_is_redelivered_first() {
    let queue = setup().await;

    let a = queue.enqueue(b"a").await.unwrap();
    let b = queue.enqueue(b"b").await.unwrap();

    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, a);

    queue.clock.advance(Duration::from_secs(31));

    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, a);
    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, b);
}

#[tokio::test]
async fn test_concurrent_claims_are_exclusive() {
    let queue = setup().await;

    for i in 0..5u8 {
        queue.enqueue([i]).await.unwrap();
    }

    let claimants = (0..8)
        .map(|_| {
            let queue = queue.queue.clone();
            tokio::spawn(async move { queue.try_dequeue().await })
        })
        .collect::<Vec<_>>();

    let mut claimed = Vec::new();
    for claimant in claimants {
        if let Some(msg) = claimant.await.unwrap().unwrap() {
            claimed.push(msg.id);
        }
    }

    let unique = claimed.iter().copied().collect::<HashSet<_>>();
    assert_eq!(claimed.len(), 5);
    assert_eq!(unique.len(), 5);
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ack_after_expiry_is_noop() {
    let queue = setup().await;

    let id = queue.enqueue(b"slow").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();

    queue.clock.advance(Duration::from_secs(31));
    assert!(!queue.ack(id).await.unwrap());

    // Still there for someone else.
    assert_eq!(queue.len().await.unwrap(), 1);
    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, id);
    assert!(queue.ack(id).await.unwrap());
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_forced_expiry_allows_reclaim() {
    let queue = setup().await;

    let id = queue.enqueue(b"a").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();
    assert_eq!(queue.try_dequeue().await.unwrap(), None);

    assert!(queue.expire(id).await.unwrap());
    assert!(!queue.ack(id).await.unwrap());

    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, id);
}

#[tokio::test]
async fn test_retry_bound_runs_callback_once() {
    let failures = Arc::new(AtomicUsize::new(0));
    let opts = AckOpts::builder()
        .max_retries(RetryLimit::Limited(2))
        .build()
        .on_failure({
            let failures = failures.clone();
            move |msg: &Msg| {
                assert_eq!(&msg.payload[..], b"flaky");
                failures.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    let queue = setup_with(opts).await;

    let id = queue.enqueue(b"flaky").await.unwrap();

    for attempt in 1..=2 {
        assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, id);
        assert!(matches!(
            queue.nack(id).await.unwrap(),
            NackOutcome::Retried { .. }
        ));
        assert_eq!(queue.details(id).await.unwrap().unwrap().retry_count, attempt);
        assert_eq!(failures.load(Ordering::SeqCst), 0);

        queue.clock.advance(Duration::from_secs(31));
    }

    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, id);
    assert_eq!(
        queue.nack(id).await.unwrap(),
        NackOutcome::Exhausted(Msg::new(id, &b"flaky"[..]))
    );
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    queue.clock.advance(Duration::from_secs(3600));
    assert_eq!(queue.details(id).await.unwrap(), None);
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.try_dequeue().await.unwrap(), None);
}

#[tokio::test]
async fn test_failure_callback_error_is_surfaced() {
    let opts = AckOpts::builder()
        .max_retries(RetryLimit::Limited(0))
        .build()
        .on_failure(|_: &Msg| Err(eyre::eyre!("dead letter table is full")));
    let queue = setup_with(opts).await;

    let id = queue.enqueue(b"a").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();

    let err = queue.nack(id).await.unwrap_err();
    assert!(matches!(err, Error::FailureCallback { .. }));
    assert_eq!(queue.details(id).await.unwrap(), None);
}

#[tokio::test]
async fn test_nack_errors() {
    let queue = setup().await;

    let err = queue.nack(404).await.unwrap_err();
    assert!(matches!(err, Error::ItemNotFound { id: 404 }));
    assert!(err.is_claim_lost());

    let id = queue.enqueue(b"a").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();
    queue.clock.advance(Duration::from_secs(31));

    let err = queue.nack(id).await.unwrap_err();
    assert!(matches!(err, Error::AckDeadlineExpired { .. }));
    assert_eq!(queue.details(id).await.unwrap().unwrap().retry_count, 0);
}

#[tokio::test]
async fn test_nack_after_ack_is_rejected() {
    let failures = Arc::new(AtomicUsize::new(0));
    let opts = AckOpts::builder()
        .max_retries(RetryLimit::Limited(0))
        .build()
        .on_failure({
            let failures = failures.clone();
            move |_: &Msg| {
                failures.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    let queue = setup_with(opts).await;

    let id = queue.enqueue(b"done").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();

    queue.clock.advance(Duration::from_secs(1));
    assert!(queue.ack(id).await.unwrap());

    queue.clock.advance(Duration::from_secs(1));
    let err = queue.nack(id).await.unwrap_err();
    assert!(matches!(err, Error::AckDeadlineExpired { id: lost } if lost == id));

    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert!(queue.details(id).await.unwrap().is_some());
    assert_eq!(queue.try_dequeue().await.unwrap(), None);
}

#[tokio::test]
async fn test_nack_after_delete_ack_finds_nothing() {
    let queue = setup_with(AckOpts::builder().completion(Completion::Delete).build()).await;

    let id = queue.enqueue(b"done").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();
    assert!(queue.ack(id).await.unwrap());

    let err = queue.nack(id).await.unwrap_err();
    assert!(matches!(err, Error::ItemNotFound { .. }));
}

#[tokio::test]
async fn test_stale_nack_after_redelivery_and_ack() {
    let failures = Arc::new(AtomicUsize::new(0));
    let opts = AckOpts::builder()
        .max_retries(RetryLimit::Limited(0))
        .build()
        .on_failure({
            let failures = failures.clone();
            move |_: &Msg| {
                failures.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    let queue = setup_with(opts).await;
    let other = queue.queue.clone();

    let id = queue.enqueue(b"contested").await.unwrap();
    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, id);

    // The first claim lapses and another consumer finishes the job.
    queue.clock.advance(Duration::from_secs(31));
    assert_eq!(other.try_dequeue().await.unwrap().unwrap().id, id);
    assert!(other.ack(id).await.unwrap());

    queue.clock.advance(Duration::from_secs(1));
    let err = queue.nack(id).await.unwrap_err();
    assert!(matches!(err, Error::AckDeadlineExpired { .. }));
    assert!(err.is_claim_lost());

    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(queue.details(id).await.unwrap().unwrap().retry_count, 0);
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_stale_nack_with_retries_left_after_redelivery_and_ack() {
    let queue = setup().await;
    let other = queue.queue.clone();

    let id = queue.enqueue(b"contested").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();

    queue.clock.advance(Duration::from_secs(31));
    other.try_dequeue().await.unwrap().unwrap();
    assert!(other.ack(id).await.unwrap());

    let err = queue.nack(id).await.unwrap_err();
    assert!(matches!(err, Error::AckDeadlineExpired { .. }));
    assert_eq!(queue.details(id).await.unwrap().unwrap().retry_count, 0);
    assert_eq!(queue.try_dequeue().await.unwrap(), None);
}

#[tokio::test]
async fn test_backoff_floor() {
    let opts = AckOpts::builder()
        .ack_timeout(Duration::from_secs(30))
        .retry_backoff(Duration::from_secs(1))
        .build();
    let queue = setup_with(opts).await;

    let id = queue.enqueue(b"a").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();

    queue.clock.advance(Duration::from_secs(10));
    let nacked_at = queue.clock.now();

    let NackOutcome::Retried { ack_deadline } = queue.nack(id).await.unwrap() else {
        panic!("expected a retry");
    };
    assert_eq!(ack_deadline, nacked_at + 30);

    queue.clock.advance(Duration::from_secs(30));
    assert_eq!(queue.try_dequeue().await.unwrap(), None);

    queue.clock.advance(Duration::from_secs(1));
    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, id);
}

#[tokio::test]
async fn test_len_counts_only_available() {
    let queue = setup().await;
    assert!(queue.is_empty().await.unwrap());

    let a = queue.enqueue(b"a").await.unwrap();
    queue.enqueue(b"b").await.unwrap();
    queue.enqueue(b"c").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 3);

    queue.try_dequeue().await.unwrap().unwrap();
    assert_eq!(queue.len().await.unwrap(), 2);

    assert!(queue.ack(a).await.unwrap());
    assert_eq!(queue.len().await.unwrap(), 2);

    let b = queue.try_dequeue().await.unwrap().unwrap().id;
    assert_eq!(queue.len().await.unwrap(), 1);

    queue.clock.advance(Duration::from_secs(31));
    assert_eq!(queue.len().await.unwrap(), 2);

    assert!(queue.expire(b).await.unwrap());
    assert_eq!(queue.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_job_redelivered_after_nack() {
    let opts = AckOpts::builder()
        .ack_timeout(Duration::from_secs(30))
        .retry_backoff(Duration::from_secs(5))
        .build();
    let queue = setup_with(opts).await;

    let id = queue.enqueue(b"job-1").await.unwrap();
    assert_eq!(id, 1);

    let msg = queue.try_dequeue().await.unwrap().unwrap();
    assert_eq!(msg, Msg::new(1, &b"job-1"[..]));
    assert_eq!(
        queue.details(1).await.unwrap().unwrap().ack_deadline,
        Some(T0 + 30)
    );

    queue.clock.advance(Duration::from_secs(2));
    queue.nack(1).await.unwrap();

    let details = queue.details(1).await.unwrap().unwrap();
    assert_eq!(details.retry_count, 1);
    assert_eq!(details.ack_deadline, Some(T0 + 2 + 30));

    queue.clock.set(T0 + 2 + 31);
    let msg = queue.try_dequeue().await.unwrap().unwrap();
    assert_eq!(msg, Msg::new(1, &b"job-1"[..]));
    assert_eq!(queue.details(1).await.unwrap().unwrap().retry_count, 1);
}

#[tokio::test]
async fn test_delete_completion() {
    let opts = AckOpts::builder().completion(Completion::Delete).build();
    let queue = setup_with(opts).await;

    let id = queue.enqueue(b"a").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();
    assert!(queue.ack(id).await.unwrap());

    assert_eq!(queue.details(id).await.unwrap(), None);
}

#[tokio::test]
async fn test_mark_completion_retains_record() {
    let queue = setup().await;

    let id = queue.enqueue(b"a").await.unwrap();
    queue.try_dequeue().await.unwrap().unwrap();
    assert!(queue.ack(id).await.unwrap());

    assert!(queue.details(id).await.unwrap().is_some());
    queue.clock.advance(Duration::from_secs(3600));
    assert_eq!(queue.try_dequeue().await.unwrap(), None);
}

#[tokio::test]
async fn test_dequeue_timeout_on_empty_queue() {
    let queue = setup().await;

    let started = tokio::time::Instant::now();
    let msg = queue
        .dequeue_timeout(Duration::from_millis(50))
        .await
        .unwrap();

    assert_eq!(msg, None);
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_dequeue_woken_by_enqueue() {
    let tmpdir = tempfile::tempdir().unwrap();
    let queue = AckQueue::builder()
        .store(SqliteStore::connect_with(&db_config(&tmpdir)).await.unwrap())
        .poll_interval(Duration::from_secs(3600))
        .build()
        .unwrap();
    queue.create_schema().await.unwrap();

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.dequeue().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let id = queue.enqueue(b"wake").await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .expect("consumer was not woken")
        .unwrap()
        .unwrap();
    assert_eq!(msg.id, id);
}

#[tokio::test]
async fn test_dequeue_cancellable() {
    let queue = setup().await;
    let cancel = CancellationToken::new();

    let consumer = {
        let queue = queue.queue.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.dequeue_cancellable(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    assert_eq!(consumer.await.unwrap().unwrap(), None);

    // A cancelled wait leaves nothing behind.
    let id = queue.enqueue(b"a").await.unwrap();
    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, id);
}

#[tokio::test]
async fn test_open_from_config() {
    let tmpdir = tempfile::tempdir().unwrap();
    let config = Config {
        table: Some("jobs".to_owned()),
        max_retries: Some(RetryLimit::Infinite),
        ..db_config(&tmpdir)
    };

    let queue = AckQueue::open(&config).await.unwrap();
    assert_eq!(queue.table(), "jobs");
    assert_eq!(queue.opts().max_retries, RetryLimit::Infinite);

    let id = queue.enqueue(b"a").await.unwrap();
    drop(queue);

    // Records outlive the handle.
    let queue = AckQueue::open(&config).await.unwrap();
    assert_eq!(queue.dequeue().await.unwrap().id, id);
}

#[tokio::test]
async fn test_open_uses_configured_dialect() {
    let tmpdir = tempfile::tempdir().unwrap();
    let config = Config {
        dialect: Some(DialectKind::External),
        call_convention: Some(CallConvention::Placeholder),
        ..db_config(&tmpdir)
    };

    // Procedure dialects leave the schema alone, and SQLite has no procedures.
    let queue = AckQueue::open(&config).await.unwrap();
    let err = queue.enqueue(b"a").await.unwrap_err();
    assert!(matches!(err, Error::Store { .. }));

    let config = Config {
        dialect: Some(DialectKind::Sqlite),
        ..config
    };
    let queue = AckQueue::open(&config).await.unwrap();
    queue.enqueue(b"a").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_custom_templates() {
    let tmpdir = tempfile::tempdir().unwrap();
    let templates = Templates {
        convention: CallConvention::Verbatim,
        create: Sqlite.create("{table}"),
        enqueue: Sqlite.enqueue("{table}"),
        claim: Sqlite.claim("{table}"),
        ack_mark: Sqlite.ack("{table}", Completion::Mark),
        ack_delete: Sqlite.ack("{table}", Completion::Delete),
        item_details: Sqlite.item_details("{table}"),
        delete_item: Sqlite.delete_item("{table}"),
        update_for_retry: Sqlite.update_for_retry("{table}"),
        expire_deadline: Sqlite.expire_deadline("{table}"),
        len: Sqlite.len("{table}"),
    };

    let queue = AckQueue::builder()
        .store(SqliteStore::connect_with(&db_config(&tmpdir)).await.unwrap())
        .table("custom_jobs")
        .dialect(Arc::new(templates))
        .build()
        .unwrap();
    queue.create_schema().await.unwrap();

    let id = queue.enqueue(b"a").await.unwrap();
    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, id);
    assert!(queue.ack(id).await.unwrap());
}

#[tokio::test]
async fn test_invalid_templates_are_rejected_at_build() {
    let tmpdir = tempfile::tempdir().unwrap();
    let templates = Templates {
        claim: "call pop(:now)".to_owned(),
        ..Templates::procedures(CallConvention::Placeholder)
    };

    let result = AckQueue::builder()
        .store(SqliteStore::connect_with(&db_config(&tmpdir)).await.unwrap())
        .dialect(Arc::new(templates))
        .build();

    assert!(matches!(result, Err(Error::InvalidTemplate { .. })));
}

#[tokio::test]
async fn test_any_store() {
    let tmpdir = tempfile::tempdir().unwrap();
    let url = format!(
        "sqlite://{}?mode=rwc",
        tmpdir.path().join("any.db").to_string_lossy()
    );

    let clock = ManualClock::new(T0);
    let queue = AckQueue::builder()
        .store(AnyStore::connect(&url).await.unwrap())
        .clock(Arc::new(clock.clone()))
        .opts(AckOpts::builder().max_retries(RetryLimit::Limited(0)).build())
        .build()
        .unwrap();
    queue.create_schema().await.unwrap();

    let a = queue.enqueue(b"a").await.unwrap();
    let b = queue.enqueue(b"b").await.unwrap();

    assert_eq!(
        queue.try_dequeue().await.unwrap(),
        Some(Msg::new(a, &b"a"[..]))
    );
    assert!(queue.ack(a).await.unwrap());

    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, b);
    assert_eq!(
        queue.details(b).await.unwrap().unwrap().ack_deadline,
        Some(T0 + 30)
    );
    assert!(matches!(
        queue.nack(b).await.unwrap(),
        NackOutcome::Exhausted(_)
    ));
    assert_eq!(queue.len().await.unwrap(), 0);
}

/// Runs against a live server when `ACKQ_TEST_POSTGRES_URL` is set.
#[cfg(feature = "postgres")]
#[tokio::test]
async fn test_postgres_dialect() {
    let Ok(url) = std::env::var("ACKQ_TEST_POSTGRES_URL") else {
        return;
    };

    let table = format!("ackq_test_{}", std::process::id());
    let config = Config {
        table: Some(table.clone()),
        dialect: Some(DialectKind::Postgres),
        max_retries: Some(RetryLimit::Limited(0)),
        ..Config::default()
    };
    let queue = AckQueue::connect(&url, &config).await.unwrap();

    let a = queue.enqueue(b"a").await.unwrap();
    let b = queue.enqueue(b"b").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 2);

    assert_eq!(
        queue.try_dequeue().await.unwrap(),
        Some(Msg::new(a, &b"a"[..]))
    );
    assert!(queue.ack(a).await.unwrap());
    assert!(matches!(
        queue.nack(a).await.unwrap_err(),
        Error::AckDeadlineExpired { .. }
    ));

    assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, b);
    assert!(matches!(
        queue.nack(b).await.unwrap(),
        NackOutcome::Exhausted(_)
    ));
    assert_eq!(queue.details(b).await.unwrap(), None);
    assert_eq!(queue.len().await.unwrap(), 0);

    sqlx::raw_sql(&format!("DROP TABLE {table}"))
        .execute(queue.store().pool())
        .await
        .unwrap();
}
