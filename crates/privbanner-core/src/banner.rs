//! The search banner as seen by the private browsing new-tab page.
//!
//! [`SearchBanner`] is the display surface that drives the
//! [`BannerGovernor`]: it asks on every page load whether to show, and pins
//! the count when the user closes the banner or follows its link to the
//! search settings. Rendering is left to the host; this type only reports
//! visibility.
//!
//! When a [`TelemetryRecorder`] is attached, each interaction is recorded as
//! an event in the `search.privatebanner` category and the show count is
//! mirrored into a count scalar. Telemetry failures are logged and never
//! change what the user sees.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::governor::{BannerGovernor, MAX_SHOW_COUNT};
use crate::telemetry::{EventDefinition, ScalarDefinition, ScalarKind, TelemetryRecorder};

/// Telemetry category for banner events.
pub const TELEMETRY_CATEGORY: &str = "search.privatebanner";

/// Count scalar mirroring the persisted show count.
pub const SHOWN_COUNT_SCALAR: &str = "search.privatebanner.shown_count";

/// Page the settings link opens.
pub const SEARCH_SETTINGS_URL: &str = "about:preferences#search";

/// Whether the banner element is visible on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerVisibility {
    Shown,
    Hidden,
}

impl BannerVisibility {
    #[must_use]
    pub const fn is_shown(self) -> bool {
        matches!(self, Self::Shown)
    }
}

/// Where the settings link sends the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsTarget {
    pub url: String,
}

/// Banner controller for one page.
#[derive(Debug)]
pub struct SearchBanner {
    governor: Arc<BannerGovernor>,
    telemetry: Option<Arc<TelemetryRecorder>>,
    visibility: BannerVisibility,
}

impl SearchBanner {
    /// A banner that is hidden until the first page load.
    #[must_use]
    pub fn new(governor: Arc<BannerGovernor>) -> Self {
        Self {
            governor,
            telemetry: None,
            visibility: BannerVisibility::Hidden,
        }
    }

    /// Attach a telemetry recorder and register the banner's probes.
    ///
    /// Registration failures (e.g. a non-desktop platform) leave the banner
    /// without telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryRecorder>) -> Self {
        match register_probes(&telemetry) {
            Ok(()) => self.telemetry = Some(telemetry),
            Err(e) => warn!(error = %e, "Banner telemetry unavailable"),
        }
        self
    }

    #[must_use]
    pub fn visibility(&self) -> BannerVisibility {
        self.visibility
    }

    /// Evaluate the banner for a freshly loaded page.
    ///
    /// A count that could not be saved still shows the banner: the session
    /// flag is already set, so it will not reappear in this session.
    pub fn on_page_load(&mut self) -> BannerVisibility {
        self.visibility = match self.governor.try_show() {
            Ok(true) => BannerVisibility::Shown,
            Ok(false) => BannerVisibility::Hidden,
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Showing search banner with unsaved show count");
                BannerVisibility::Shown
            }
            Err(e) => {
                warn!(error = %e, "Search banner evaluation failed");
                BannerVisibility::Hidden
            }
        };

        if self.visibility.is_shown() {
            let count = self.governor.show_count();
            self.record("shown", Some(count));
        }
        debug!(visibility = ?self.visibility, "Search banner evaluated");
        self.visibility
    }

    /// Close button: hide now and never show again.
    pub fn on_close(&mut self) -> Result<()> {
        self.visibility = BannerVisibility::Hidden;
        let result = self.governor.suppress_permanently();
        self.record("closed", result.is_ok().then_some(MAX_SHOW_COUNT));
        result
    }

    /// Settings link: never show again and return the page to open.
    pub fn on_open_settings(&mut self) -> Result<SettingsTarget> {
        let result = self.governor.suppress_permanently();
        self.record("open_settings", result.is_ok().then_some(MAX_SHOW_COUNT));
        result?;
        Ok(SettingsTarget {
            url: SEARCH_SETTINGS_URL.to_string(),
        })
    }

    fn record(&self, method: &str, count: Option<u32>) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let extra = count.map(|c| {
            let mut extra = BTreeMap::new();
            extra.insert("count".to_string(), c.to_string());
            extra
        });
        if let Err(e) = telemetry.record_event(TELEMETRY_CATEGORY, method, "banner", None, extra) {
            warn!(method, error = %e, "Failed to record banner event");
        }
        if let Some(count) = count {
            if let Err(e) = telemetry.scalar_set_maximum(SHOWN_COUNT_SCALAR, count) {
                warn!(error = %e, "Failed to update banner scalar");
            }
        }
    }
}

fn register_probes(telemetry: &TelemetryRecorder) -> Result<()> {
    let mut scalars = BTreeMap::new();
    scalars.insert(
        "shown_count".to_string(),
        ScalarDefinition::new(ScalarKind::Count),
    );
    telemetry.register_scalars(TELEMETRY_CATEGORY, scalars)?;

    let mut events = BTreeMap::new();
    events.insert(
        "interaction".to_string(),
        EventDefinition {
            methods: vec![
                "shown".to_string(),
                "closed".to_string(),
                "open_settings".to_string(),
            ],
            objects: vec!["banner".to_string()],
            extra_keys: vec!["count".to_string()],
            expired: false,
        },
    );
    telemetry.register_events(TELEMETRY_CATEGORY, events)?;
    Ok(())
}
