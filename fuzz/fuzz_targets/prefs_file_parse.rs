#![no_main]

use libfuzzer_sys::fuzz_target;
use privbanner_core::prefs_file::{parse_prefs, render_prefs};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(prefs) = parse_prefs(text) else {
        return;
    };
    let rendered = render_prefs(&prefs).expect("parsed prefs must render");
    let reparsed = parse_prefs(&rendered).expect("rendered prefs must parse");
    assert_eq!(prefs, reparsed);
});
