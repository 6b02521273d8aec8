use super::*;
use crate::db::Database;
use crate::fetch::Fetcher;
use crate::parser::SyndicationParser;
use crate::test_helpers::{
    FaultyStore, Scripted, ScriptedFetcher, insert_source, rss_document, setup_db,
};
use async_trait::async_trait;
use chrono::Utc;

fn test_config(concurrency: usize, poll_interval: Duration) -> Config {
    Config {
        concurrency,
        poll_interval,
        store_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn scheduler(
    store: Arc<dyn FeedStore>,
    fetcher: Arc<dyn Fetcher>,
    config: &Config,
) -> (Arc<FeedScheduler>, broadcast::Receiver<Event>) {
    let worker = Arc::new(SourceWorker::new(
        store.clone(),
        fetcher,
        Arc::new(SyndicationParser),
        config.store_timeout,
    ));
    let (event_tx, event_rx) = broadcast::channel(256);
    let scheduler = Arc::new(FeedScheduler::new(store, worker, config, event_tx));
    (scheduler, event_rx)
}

async fn register(db: &Database, fetcher: &ScriptedFetcher, count: usize) -> Vec<Source> {
    let mut sources = Vec::with_capacity(count);
    for i in 0..count {
        let url = format!("https://feeds.example.com/{i}.xml");
        fetcher.respond(
            &url,
            Scripted::Document(rss_document(&[(
                "Post",
                &format!("https://feeds.example.com/{i}/post"),
                "Mon, 01 Jan 2024 12:00:00 +0000",
            )])),
        );
        sources.push(insert_source(db, &format!("Feed {i}"), &url).await);
    }
    sources
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

struct PanickingFetcher;

#[async_trait]
impl Fetcher for PanickingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        panic!("fetcher exploded on {url}");
    }
}

#[tokio::test]
async fn test_cycle_never_exceeds_concurrency_limit() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(200)));
    register(&db, &fetcher, 5).await;

    let config = test_config(2, Duration::from_secs(60));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher.clone(), &config);

    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.sources_selected, 2);
    assert_eq!(fetcher.calls().len(), 2);
    assert!(fetcher.max_in_flight() <= 2);
}

#[tokio::test]
async fn test_workers_run_in_parallel() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(300)));
    register(&db, &fetcher, 3).await;

    let config = test_config(3, Duration::from_secs(60));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher.clone(), &config);

    let started = std::time::Instant::now();
    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.sources_completed, 3);
    assert!(fetcher.max_in_flight() > 1, "workers should overlap");
    assert!(
        started.elapsed() < Duration::from_millis(900),
        "three 300ms fetches took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_fewer_due_sources_than_limit_selects_all() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new());
    register(&db, &fetcher, 3).await;

    let config = test_config(10, Duration::from_secs(60));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher.clone(), &config);

    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.sources_selected, 3);
    assert_eq!(report.sources_completed, 3);
    assert_eq!(report.entries_inserted, 3);
}

#[tokio::test]
async fn test_every_source_is_eventually_polled() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new());
    let sources = register(&db, &fetcher, 5).await;

    let config = test_config(2, Duration::from_secs(60));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher.clone(), &config);

    // ceil(5 / 2) cycles cover every source
    for _ in 0..3 {
        scheduler.run_cycle().await.unwrap();
    }

    let calls = fetcher.calls();
    for source in &sources {
        assert!(
            calls.contains(&source.url),
            "{} was never polled; calls: {:?}",
            source.url,
            calls
        );
    }
}

#[tokio::test]
async fn test_never_fetched_source_goes_first_then_oldest() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new());
    let b = insert_source(&db, "B", "https://b.example.com/rss").await;
    let a = insert_source(&db, "A", "https://a.example.com/rss").await;
    db.mark_source_fetched(b.id, Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    fetcher.respond(&a.url, Scripted::Document(rss_document(&[])));
    fetcher.respond(&b.url, Scripted::Document(rss_document(&[])));

    let config = test_config(1, Duration::from_secs(60));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher.clone(), &config);

    scheduler.run_cycle().await.unwrap();
    assert_eq!(fetcher.calls(), vec![a.url.clone()]);

    scheduler.run_cycle().await.unwrap();
    assert_eq!(fetcher.calls(), vec![a.url.clone(), b.url.clone()]);
}

#[tokio::test]
async fn test_unreachable_source_is_deprioritized() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new());
    let down = insert_source(&db, "Down", "https://down.example.com/rss").await;
    // Creation time breaks the tie between never-fetched sources
    tokio::time::sleep(Duration::from_millis(5)).await;
    let up = insert_source(&db, "Up", "https://up.example.com/rss").await;
    fetcher.respond(&down.url, Scripted::Unreachable);
    fetcher.respond(&up.url, Scripted::Document(rss_document(&[])));

    let config = test_config(1, Duration::from_secs(60));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher.clone(), &config);

    let first = scheduler.run_cycle().await.unwrap();
    assert_eq!(first.sources_failed, 1);

    let second = scheduler.run_cycle().await.unwrap();
    assert_eq!(second.sources_completed, 1);
    assert_eq!(fetcher.calls(), vec![down.url, up.url]);
}

#[tokio::test]
async fn test_selection_failure_skips_only_that_cycle() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new());
    register(&db, &fetcher, 2).await;

    let store = Arc::new(FaultyStore::new(db.clone()));
    store.fail_next_selections(1);

    let config = test_config(5, Duration::from_secs(60));
    let (scheduler, mut rx) = scheduler(store.clone(), fetcher.clone(), &config);

    let err = scheduler.run_cycle().await.unwrap_err();
    assert!(err.to_string().contains("injected"));
    assert!(fetcher.calls().is_empty());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [Event::CycleSkipped { cycle: 1, .. }]
    ));

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.cycle, 2);
    assert_eq!(report.sources_completed, 2);
    assert_eq!(store.selections(), 2);
}

#[tokio::test]
async fn test_empty_store_is_a_quiet_cycle() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new());

    let config = test_config(5, Duration::from_secs(60));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher.clone(), &config);

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.sources_selected, 0);
    assert_eq!(report.sources_completed, 0);
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_cycle_events() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new());
    let good = insert_source(&db, "Good", "https://good.example.com/rss").await;
    let bad = insert_source(&db, "Bad", "https://bad.example.com/rss").await;
    fetcher.respond(
        &good.url,
        Scripted::Document(rss_document(&[(
            "Post",
            "https://good.example.com/1",
            "Mon, 01 Jan 2024 12:00:00 +0000",
        )])),
    );
    fetcher.respond(&bad.url, Scripted::Status(500));

    let config = test_config(5, Duration::from_secs(60));
    let (scheduler, mut rx) = scheduler(db.clone(), fetcher.clone(), &config);

    scheduler.run_cycle().await.unwrap();
    let events = drain(&mut rx);

    assert_eq!(events.len(), 4, "events: {:?}", events);
    assert!(matches!(
        events[0],
        Event::CycleStarted {
            cycle: 1,
            sources: 2
        }
    ));

    let mut polled: Vec<(String, bool)> = events[1..3]
        .iter()
        .map(|event| match event {
            Event::SourcePolled { name, outcome, .. } => (name.clone(), outcome.is_completed()),
            other => panic!("expected SourcePolled, got {:?}", other),
        })
        .collect();
    polled.sort();
    assert_eq!(
        polled,
        vec![("Bad".to_string(), false), ("Good".to_string(), true)]
    );

    match &events[3] {
        Event::CycleCompleted { report } => {
            assert_eq!(report.sources_selected, 2);
            assert_eq!(report.sources_completed, 1);
            assert_eq!(report.sources_failed, 1);
            assert_eq!(report.entries_inserted, 1);
        }
        other => panic!("expected CycleCompleted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_panicking_worker_is_reported_as_failed() {
    let (db, _temp) = setup_db().await;
    let source = insert_source(&db, "Cursed", "https://cursed.example.com/rss").await;

    let config = test_config(5, Duration::from_secs(60));
    let (scheduler, mut rx) = scheduler(db.clone(), Arc::new(PanickingFetcher), &config);

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.sources_failed, 1);

    let polled = drain(&mut rx)
        .into_iter()
        .find_map(|event| match event {
            Event::SourcePolled {
                source_id, outcome, ..
            } => Some((source_id, outcome)),
            _ => None,
        })
        .unwrap();
    assert_eq!(polled.0, source.id);
    assert!(matches!(
        polled.1,
        PollOutcome::Failed {
            stage: PollStage::Worker,
            ..
        }
    ));

    // The scheduler is still usable afterwards
    scheduler.run_cycle().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_cycles_are_serialized() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(200)));
    register(&db, &fetcher, 1).await;

    let config = test_config(5, Duration::from_secs(60));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher.clone(), &config);

    let (first, second) = tokio::join!(scheduler.run_cycle(), scheduler.run_cycle());
    first.unwrap();
    second.unwrap();

    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(
        fetcher.max_in_flight(),
        1,
        "a source must never have two workers at once"
    );
}

#[tokio::test]
async fn test_run_stops_on_cancellation() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new());

    let config = test_config(5, Duration::from_millis(50));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher, &config);

    let cancel_token = CancellationToken::new();
    let handle = tokio::spawn(scheduler.clone().run(cancel_token.clone()));

    tokio::time::sleep(Duration::from_millis(180)).await;
    cancel_token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
    assert!(
        result.is_ok(),
        "scheduler should stop within 1 second after cancellation"
    );
    assert!(scheduler.cycles_started() >= 2);
}

#[tokio::test]
async fn test_cancellation_lets_in_flight_cycle_finish() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(300)));
    let sources = register(&db, &fetcher, 2).await;

    let config = test_config(5, Duration::from_secs(60));
    let (scheduler, mut rx) = scheduler(db.clone(), fetcher.clone(), &config);

    let cancel_token = CancellationToken::new();
    let handle = tokio::spawn(scheduler.clone().run(cancel_token.clone()));

    // First tick fires immediately; cancel while its fetches are sleeping
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel_token.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    for source in &sources {
        assert_eq!(db.count_entries_for_source(source.id).await.unwrap(), 1);
    }
    assert!(
        drain(&mut rx)
            .iter()
            .any(|event| matches!(event, Event::CycleCompleted { .. }))
    );
    assert_eq!(scheduler.cycles_started(), 1);
}

#[tokio::test]
async fn test_close_waits_for_running_cycle_and_refuses_new_ones() {
    let (db, _temp) = setup_db().await;
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(300)));
    let sources = register(&db, &fetcher, 1).await;

    let config = test_config(5, Duration::from_secs(60));
    let (scheduler, _rx) = scheduler(db.clone(), fetcher.clone(), &config);

    let running = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_cycle().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    scheduler.close().await;
    assert!(
        started.elapsed() >= Duration::from_millis(150),
        "close returned before the running cycle finished"
    );
    assert_eq!(running.await.unwrap().unwrap().entries_inserted, 1);
    assert_eq!(db.count_entries_for_source(sources[0].id).await.unwrap(), 1);

    assert!(matches!(
        scheduler.run_cycle().await,
        Err(Error::ShuttingDown)
    ));
    assert_eq!(fetcher.calls().len(), 1);
    assert_eq!(scheduler.cycles_started(), 1);
}
