#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use privbanner_core::governor::{BannerGovernor, MAX_SHOW_COUNT, ShowDecision};
use privbanner_core::prefs::{MemoryPrefStore, PREF_BANNER_SHOWN, PREF_UI_ENABLED, PrefStore, PrefValue};

fuzz_target!(|data: &[u8]| {
    let store = Arc::new(MemoryPrefStore::new());
    let governor = BannerGovernor::new(store.clone());
    let mut ceiling = i64::from(MAX_SHOW_COUNT);

    for chunk in data.chunks(2) {
        let tag = chunk[0];
        let arg = chunk.get(1).copied().unwrap_or_default();
        let session_before = governor.shown_this_session();

        match tag % 10 {
            0 | 1 => {
                let _ = governor.should_show();
            }
            2 => {
                let _ = governor.record_shown();
            }
            3 | 4 => {
                let granted = governor.try_show();
                if session_before {
                    assert!(matches!(granted, Ok(false)));
                }
            }
            5 => {
                let _ = governor.suppress_permanently();
            }
            6 => governor.reset_session(),
            7 => {
                store.set_fail_writes(false);
                let raw = i64::from(arg as i8);
                let _ = store.set_int(PREF_BANNER_SHOWN, raw);
                ceiling = ceiling.max(raw);
            }
            8 => {
                store.set_fail_writes(arg & 1 == 1);
                store.set_fail_reads(arg & 2 == 2);
            }
            _ => {
                store.set_fail_writes(false);
                let _ = store.set_bool(PREF_UI_ENABLED, arg & 1 == 1);
                let _ = governor.retry_persist();
            }
        }

        assert!(governor.show_count() <= MAX_SHOW_COUNT);
        if let Ok(Some(PrefValue::Int(raw))) = store.get(PREF_BANNER_SHOWN) {
            assert!(raw <= ceiling);
        }
        if governor.shown_this_session() {
            assert!(!governor.should_show());
            assert_ne!(governor.decision(), ShowDecision::Show);
        }
    }
});
