use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use otd_adapters::FixtureSource;
use otd_core::{DayFailureKind, RunOutcome, TargetDay};
use otd_storage::{EventStore, MemoryEventStore};
use otd_sync::{SyncConfig, SyncPipeline};

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/pages")
        .canonicalize()
        .expect("fixtures dir")
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn day(m: u32, d: u32) -> TargetDay {
    TargetDay::new(m, d).expect("valid day")
}

async fn seeded_store() -> MemoryEventStore {
    let store = MemoryEventStore::new();
    store.seed(date(1969, 7, 20), "Apollo 11 landing").await;
    store
        .seed(
            date(1944, 7, 20),
            "Claus von Stauffenberg's bomb fails to kill Adolf Hitler.",
        )
        .await;
    store.seed(date(1850, 7, 20), "Retracted claim").await;
    store.seed(date(1969, 7, 21), "Armstrong walks").await;
    store
}

fn fixture_pipeline(store: &MemoryEventStore) -> SyncPipeline {
    let config = SyncConfig {
        fixtures_dir: Some(fixtures_dir()),
        ..Default::default()
    };
    SyncPipeline::new(
        config,
        Arc::new(FixtureSource::new(fixtures_dir())),
        Arc::new(store.clone()),
    )
}

fn descriptions(records: &[otd_core::EventRecord]) -> Vec<(NaiveDate, &str)> {
    records
        .iter()
        .map(|r| (r.date, r.description.as_str()))
        .collect()
}

#[tokio::test]
async fn dry_run_reports_changes_but_keeps_the_store_intact() {
    let store = seeded_store().await;
    let before = store.snapshot().await;

    let report = fixture_pipeline(&store)
        .run(vec![day(7, 20)], false)
        .await
        .expect("run");

    assert_eq!(report.outcome, Some(RunOutcome::RolledBack));
    assert_eq!(report.days_harvested, 1);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.ignored, 2);
    assert_eq!(report.kept, 1);
    assert_eq!(report.new, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(store.snapshot().await, before);
}

#[tokio::test]
async fn committed_run_rewrites_the_day() {
    let store = seeded_store().await;

    let report = fixture_pipeline(&store)
        .run(vec![day(7, 20)], true)
        .await
        .expect("run");
    assert_eq!(report.outcome, Some(RunOutcome::Committed));

    let july_20 = store.events_on_day(day(7, 20)).await.expect("query");
    assert_eq!(
        descriptions(&july_20),
        vec![
            (date(1881, 7, 20), "Sitting Bull surrenders at Fort Buford."),
            (
                date(1944, 7, 20),
                "Claus von Stauffenberg's bomb fails to kill Adolf Hitler."
            ),
            (date(1969, 7, 20), "Apollo 11 lands on the Moon."),
        ]
    );

    let july_21 = store.events_on_day(day(7, 21)).await.expect("query");
    assert_eq!(
        descriptions(&july_21),
        vec![(date(1969, 7, 21), "Armstrong walks")]
    );
}

#[tokio::test]
async fn second_committed_run_is_a_no_op() {
    let store = seeded_store().await;
    let pipeline = fixture_pipeline(&store);
    pipeline.run(vec![day(7, 20)], true).await.expect("first run");
    let after_first = store.snapshot().await;

    let report = pipeline.run(vec![day(7, 20)], true).await.expect("second run");

    assert_eq!((report.new, report.updated, report.deleted), (0, 0, 0));
    assert_eq!(report.kept, 3);
    assert_eq!(store.snapshot().await, after_first);
}

#[tokio::test]
async fn unavailable_day_is_reported_and_its_events_survive() {
    let store = MemoryEventStore::new();
    store.seed(date(1981, 8, 1), "MTV begins broadcasting").await;

    let report = fixture_pipeline(&store)
        .run(vec![day(8, 1), day(7, 20)], true)
        .await
        .expect("run");

    assert_eq!(report.days_targeted, 2);
    assert_eq!(report.days_harvested, 1);
    assert_eq!(report.failures_of(DayFailureKind::Transport), 1);
    assert_eq!(report.failed_days[0].day, day(8, 1));
    assert_eq!(report.deleted, 0);
    assert_eq!(report.new, 3);

    let august_1 = store.events_on_day(day(8, 1)).await.expect("query");
    assert_eq!(
        descriptions(&august_1),
        vec![(date(1981, 8, 1), "MTV begins broadcasting")]
    );
}

#[tokio::test]
async fn leap_day_reads_its_own_event_list() {
    let store = MemoryEventStore::new();

    let report = fixture_pipeline(&store)
        .run(vec![day(2, 29)], true)
        .await
        .expect("run");

    assert_eq!(report.ignored, 1);
    assert_eq!(report.new, 2);
    let stored = store.snapshot().await;
    assert!(stored.iter().all(|r| r.date.format("%m-%d").to_string() == "02-29"));
}
