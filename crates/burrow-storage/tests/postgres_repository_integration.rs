use std::sync::Arc;
use std::time::Duration;

use burrow_storage::{
    shutdown, Backend, DeletionBatch, NewUrl, OpContext, OwnerToken, PostgresRepository,
    ReadRepository, Repository, ShortCode, Storage, StorageConfig, StorageError,
};
use burrow_test_infra::postgres::{PostgresConfig, PostgresServer};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

struct Fixture {
    _postgres: PostgresServer,
    url: String,
    repo: PostgresRepository,
}

impl Fixture {
    async fn start() -> Self {
        let postgres = PostgresServer::start(PostgresConfig::builder().build())
            .await
            .expect("start postgres");
        let url = postgres.dsn().to_string();
        let repo = connect_with_retry(&url).await;
        repo.migrate().await.expect("create schema");

        Self {
            _postgres: postgres,
            url,
            repo,
        }
    }
}

async fn connect_with_retry(url: &str) -> PostgresRepository {
    let mut last_error = None;

    for _ in 0..20 {
        match PostgresRepository::connect_with(url, 5, Duration::from_secs(5)).await {
            Ok(repo) => match repo.ping().await {
                Ok(()) => return repo,
                Err(err) => last_error = Some(err),
            },
            Err(err) => last_error = Some(err),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    panic!("failed to connect postgres: {last_error:?}");
}

fn code(value: &str) -> ShortCode {
    ShortCode::new_unchecked(value)
}

fn new_url(url: &str, owner: &str, short: &str) -> NewUrl {
    NewUrl {
        original_url: url.to_string(),
        owner: OwnerToken::new(owner),
        short_code: code(short),
    }
}

fn ctx() -> OpContext {
    OpContext::with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn insert_and_lookup_live_record() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .insert(&ctx(), new_url("https://a.example", "owner-x", "abc123"))
        .await
        .unwrap();

    let got = fixture.repo.lookup(&ctx(), &code("abc123")).await.unwrap();
    assert_eq!(got, "https://a.example");

    let err = fixture.repo.lookup(&ctx(), &code("missing")).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn duplicate_url_returns_existing_short_code() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .insert(&ctx(), new_url("https://a.example", "owner-x", "abc123"))
        .await
        .unwrap();

    let err = fixture
        .repo
        .insert(&ctx(), new_url("https://a.example", "owner-y", "zzz999"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        StorageError::AlreadyExists {
            url: "https://a.example".to_string(),
            short_code: "abc123".to_string(),
        }
    );
}

#[tokio::test]
async fn concurrent_inserts_leave_exactly_one_record() {
    let fixture = Fixture::start().await;
    let repo = Arc::new(fixture.repo.clone());
    let mut handles = vec![];

    for i in 0..8u32 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            let short = format!("race{i:02}");
            let result = repo
                .insert(
                    &ctx(),
                    new_url("https://race.example", &format!("owner-{i}"), &short),
                )
                .await;
            (short, result)
        }));
    }

    let mut winners = vec![];
    let mut reported = vec![];
    for handle in handles {
        match handle.await.unwrap() {
            (short, Ok(())) => winners.push(short),
            (_, Err(StorageError::AlreadyExists { short_code, .. })) => reported.push(short_code),
            (_, Err(other)) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1);
    assert!(reported.iter().all(|c| *c == winners[0]));
}

#[tokio::test]
async fn mark_deleted_is_idempotent_and_irreversible() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .insert(&ctx(), new_url("https://a.example", "owner-x", "abc123"))
        .await
        .unwrap();

    let batch = DeletionBatch::new(OwnerToken::new("owner-x"), vec![code("abc123")]);
    assert_eq!(fixture.repo.mark_deleted(&batch).await.unwrap(), 1);
    assert_eq!(fixture.repo.mark_deleted(&batch).await.unwrap(), 0);

    let err = fixture.repo.lookup(&ctx(), &code("abc123")).await.unwrap_err();
    assert!(matches!(err, StorageError::Gone(_)));

    let err = fixture
        .repo
        .insert(&ctx(), new_url("https://a.example", "owner-x", "again1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }));

    let err = fixture.repo.lookup(&ctx(), &code("abc123")).await.unwrap_err();
    assert!(matches!(err, StorageError::Gone(_)));
}

#[tokio::test]
async fn owner_scan_is_isolated_and_live_only() {
    let fixture = Fixture::start().await;

    for (url, owner, short) in [
        ("https://a.example", "owner-x", "aaa111"),
        ("https://b.example", "owner-x", "bbb222"),
        ("https://c.example", "owner-y", "ccc333"),
    ] {
        fixture
            .repo
            .insert(&ctx(), new_url(url, owner, short))
            .await
            .unwrap();
    }

    let batch = DeletionBatch::new(OwnerToken::new("owner-x"), vec![code("aaa111")]);
    fixture.repo.mark_deleted(&batch).await.unwrap();

    let listed = fixture
        .repo
        .list_by_owner(&ctx(), &OwnerToken::new("owner-x"))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].short_code, code("bbb222"));

    let empty = fixture
        .repo
        .list_by_owner(&ctx(), &OwnerToken::new("owner-z"))
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn storage_drains_deletions_before_closing_pool() {
    let fixture = Fixture::start().await;
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let config = StorageConfig::builder()
        .backend(Backend::Postgres {
            dsn: fixture.url.clone(),
        })
        .build();
    let storage = Storage::init(cancel.clone(), &tracker, config)
        .await
        .unwrap();

    for i in 0..20 {
        storage
            .insert(
                &ctx(),
                new_url(&format!("https://{i}.example"), "owner-x", &format!("d{i:03}")),
            )
            .await
            .unwrap();
    }
    for i in 0..20 {
        storage
            .submit_deletion(OwnerToken::new("owner-x"), vec![code(&format!("d{i:03}"))])
            .await
            .unwrap();
    }

    shutdown(&cancel, &tracker).await;
    assert!(storage.pool_failure().is_none());
    assert!(matches!(
        storage.ping().await,
        Err(StorageError::Unreachable(_))
    ));

    for i in 0..20 {
        let err = fixture
            .repo
            .lookup(&ctx(), &code(&format!("d{i:03}")))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Gone(_)));
    }
}
