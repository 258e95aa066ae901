//! End-to-end banner scenarios against real pref stores.
//!
//! Each scenario opens "windows" (fresh `SearchBanner`s over a shared
//! governor) and watches the show-count pref through the store's change
//! channel, the way a host would observe it.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;
use tempfile::TempDir;

use privbanner_core::banner::{BannerVisibility, SEARCH_SETTINGS_URL, SearchBanner};
use privbanner_core::governor::{BannerGovernor, MAX_SHOW_COUNT};
use privbanner_core::prefs::{PREF_BANNER_SHOWN, PREF_UI_ENABLED, PrefChange, PrefStore, PrefValue};
use privbanner_core::prefs_file::FilePrefStore;
use privbanner_core::prefs_sqlite::SqlitePrefStore;
use privbanner_core::telemetry::{Platform, TelemetryRecorder};

const WAIT: Duration = Duration::from_secs(2);

fn wait_for_pref_change(rx: &Receiver<PrefChange>, key: &str) -> Option<PrefValue> {
    loop {
        let change = rx.recv_timeout(WAIT).expect("pref change within timeout");
        if change.key == key {
            return change.value;
        }
    }
}

fn open_window(governor: &Arc<BannerGovernor>) -> BannerVisibility {
    SearchBanner::new(governor.clone()).on_page_load()
}

fn file_store(dir: &TempDir) -> Arc<FilePrefStore> {
    Arc::new(FilePrefStore::open(dir.path().join("prefs.toml")).unwrap())
}

fn shown(store: &dyn PrefStore) -> i64 {
    store.get_int(PREF_BANNER_SHOWN, -1).unwrap()
}

#[test]
fn hidden_when_feature_pref_off() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    store.set_bool(PREF_UI_ENABLED, false).unwrap();
    store.set_int(PREF_BANNER_SHOWN, 0).unwrap();
    let governor = Arc::new(BannerGovernor::new(store.clone()));

    assert_eq!(open_window(&governor), BannerVisibility::Hidden);
    assert_eq!(shown(&*store), 0);
}

#[test]
fn shown_in_first_window_only() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    store.set_bool(PREF_UI_ENABLED, true).unwrap();
    store.set_int(PREF_BANNER_SHOWN, 0).unwrap();
    let governor = Arc::new(BannerGovernor::new(store.clone()));

    let rx = store.subscribe();
    assert_eq!(open_window(&governor), BannerVisibility::Shown);
    assert_eq!(
        wait_for_pref_change(&rx, PREF_BANNER_SHOWN),
        Some(PrefValue::Int(1))
    );

    assert_eq!(open_window(&governor), BannerVisibility::Hidden);
    assert!(rx.try_recv().is_err(), "second window must not touch the pref");
    assert_eq!(shown(&*store), 1);
}

#[test]
fn shown_max_times_across_sessions() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    store.set_bool(PREF_UI_ENABLED, true).unwrap();
    let governor = Arc::new(BannerGovernor::new(store.clone()));
    let rx = store.subscribe();

    for i in 1..=MAX_SHOW_COUNT {
        governor.reset_session();
        assert_eq!(open_window(&governor), BannerVisibility::Shown, "session {i}");
        assert_eq!(
            wait_for_pref_change(&rx, PREF_BANNER_SHOWN),
            Some(PrefValue::Int(i64::from(i)))
        );
    }

    governor.reset_session();
    assert_eq!(open_window(&governor), BannerVisibility::Hidden);
    assert_eq!(shown(&*store), i64::from(MAX_SHOW_COUNT));
}

#[test]
fn close_pins_count_at_max() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    store.set_bool(PREF_UI_ENABLED, true).unwrap();
    store.set_int(PREF_BANNER_SHOWN, 0).unwrap();
    let governor = Arc::new(BannerGovernor::new(store.clone()));

    let mut banner = SearchBanner::new(governor.clone());
    assert_eq!(banner.on_page_load(), BannerVisibility::Shown);
    banner.on_close().unwrap();
    assert_eq!(banner.visibility(), BannerVisibility::Hidden);
    assert_eq!(shown(&*store), i64::from(MAX_SHOW_COUNT));

    governor.reset_session();
    assert_eq!(open_window(&governor), BannerVisibility::Hidden);
}

#[test]
fn open_settings_pins_count_at_max() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqlitePrefStore::open(dir.path().join("prefs.db")).unwrap());
    store.set_bool(PREF_UI_ENABLED, true).unwrap();
    store.set_int(PREF_BANNER_SHOWN, 0).unwrap();
    let governor = Arc::new(BannerGovernor::new(store.clone()));

    let mut banner = SearchBanner::new(governor.clone());
    assert_eq!(banner.on_page_load(), BannerVisibility::Shown);
    let target = banner.on_open_settings().unwrap();
    assert_eq!(target.url, SEARCH_SETTINGS_URL);
    assert_eq!(shown(&*store), i64::from(MAX_SHOW_COUNT));

    governor.reset_session();
    assert!(!governor.should_show());
}

#[test]
fn restart_is_a_new_session() {
    let dir = TempDir::new().unwrap();
    {
        let store = file_store(&dir);
        store.set_bool(PREF_UI_ENABLED, true).unwrap();
        let governor = Arc::new(BannerGovernor::new(store));
        assert_eq!(open_window(&governor), BannerVisibility::Shown);
        assert_eq!(open_window(&governor), BannerVisibility::Hidden);
    }

    let store = file_store(&dir);
    let governor = Arc::new(BannerGovernor::new(store.clone()));
    assert_eq!(open_window(&governor), BannerVisibility::Shown);
    assert_eq!(shown(&*store), 2);
}

#[test]
fn out_of_band_lowering_re_enables_banner() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    store.set_bool(PREF_UI_ENABLED, true).unwrap();
    let governor = Arc::new(BannerGovernor::new(store.clone()));
    governor.suppress_permanently().unwrap();
    assert!(!governor.should_show());

    // Another process resets the pref between sessions.
    let tooling = file_store(&dir);
    tooling.set_int(PREF_BANNER_SHOWN, 3).unwrap();

    governor.reset_session();
    assert_eq!(open_window(&governor), BannerVisibility::Shown);
    assert_eq!(shown(&*store), 4);
}

#[test]
fn racing_windows_show_once() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    store.set_bool(PREF_UI_ENABLED, true).unwrap();
    let governor = Arc::new(BannerGovernor::new(store.clone()));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let governor = governor.clone();
            std::thread::spawn(move || open_window(&governor))
        })
        .collect();
    let shown_windows = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|v| v.is_shown())
        .count();

    assert_eq!(shown_windows, 1);
    assert_eq!(shown(&*store), 1);
}

#[test]
fn telemetry_follows_banner_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);
    store.set_bool(PREF_UI_ENABLED, true).unwrap();
    let governor = Arc::new(BannerGovernor::new(store.clone()));
    let telemetry = Arc::new(TelemetryRecorder::new(Platform::Desktop, store));

    let mut banner = SearchBanner::new(governor).with_telemetry(telemetry.clone());
    banner.on_page_load();
    banner.on_open_settings().unwrap();

    let events = telemetry.snapshot_events(true);
    let methods: Vec<_> = events.iter().map(|e| e.method.as_str()).collect();
    assert_eq!(methods, ["shown", "open_settings"]);
    assert_eq!(events[0].extra.as_ref().unwrap()["count"], "1");
    assert!(telemetry.snapshot_events(false).is_empty());
}
