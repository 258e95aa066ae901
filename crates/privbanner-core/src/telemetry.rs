//! In-process telemetry recorder.
//!
//! Exposes the same call surface that browser extensions get for telemetry:
//!
//! - **Scalars**: register, add, set, set-maximum
//! - **Events**: register, toggle recording per category, record
//! - **Pings**: upload-consent check and submission into a local outbox
//!
//! Every call starts with a platform check (desktop only) and every failure
//! is reported as a [`TelemetryError`]. Nothing is uploaded; submitted pings
//! wait in [`TelemetryRecorder::pending_pings`] for whatever transport the
//! host provides.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Result, TelemetryError};
use crate::prefs::{PREF_UPLOAD_ENABLED, PrefStore};

/// Maximum length of an event value or extra value; longer input is truncated.
pub const MAX_EVENT_VALUE_LEN: usize = 80;

/// Longest key a keyed scalar accepts.
pub const MAX_SCALAR_KEY_LEN: usize = 72;

/// Host platform. Telemetry recording is only available on desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    Desktop,
    Android,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Desktop => write!(f, "desktop"),
            Self::Android => write!(f, "android"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "desktop" => Ok(Self::Desktop),
            "android" => Ok(Self::Android),
            _ => Err(format!(
                "unknown platform: {s}. Expected one of: desktop, android"
            )),
        }
    }
}

/// Scalar type as named by the extension API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Count,
    String,
    Boolean,
}

impl ScalarKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }
}

/// Registration data for one scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarDefinition {
    pub kind: ScalarKind,
    /// Keyed scalars hold one value per string key and are only reachable
    /// through the `keyed_scalar_*` calls.
    #[serde(default)]
    pub keyed: bool,
    #[serde(default)]
    pub record_on_release: bool,
    #[serde(default)]
    pub expired: bool,
}

impl ScalarDefinition {
    #[must_use]
    pub const fn new(kind: ScalarKind) -> Self {
        Self {
            kind,
            keyed: false,
            record_on_release: false,
            expired: false,
        }
    }

    #[must_use]
    pub const fn keyed(kind: ScalarKind) -> Self {
        Self {
            keyed: true,
            ..Self::new(kind)
        }
    }
}

/// Current value of a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Count(u32),
    Boolean(bool),
    String(String),
}

impl ScalarValue {
    const fn kind(&self) -> ScalarKind {
        match self {
            Self::Count(_) => ScalarKind::Count,
            Self::Boolean(_) => ScalarKind::Boolean,
            Self::String(_) => ScalarKind::String,
        }
    }
}

/// Registration data for one event.
///
/// When `methods` is empty the event name itself is the only method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventDefinition {
    #[serde(default)]
    pub methods: Vec<String>,
    pub objects: Vec<String>,
    #[serde(default)]
    pub extra_keys: Vec<String>,
    #[serde(default)]
    pub expired: bool,
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Milliseconds since the recorder was created.
    pub timestamp_ms: u64,
    pub category: String,
    pub method: String,
    pub object: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<BTreeMap<String, String>>,
}

/// Options accepted by [`TelemetryRecorder::submit_ping`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingOptions {
    pub add_client_id: bool,
    pub add_environment: bool,
}

/// A ping waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPing {
    pub id: Uuid,
    pub ping_type: String,
    pub payload: serde_json::Value,
    pub options: PingOptions,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
enum ScalarOp {
    Add(u32),
    Set(ScalarValue),
    SetMaximum(u32),
}

#[derive(Debug, Default)]
struct RecorderState {
    scalar_defs: HashMap<String, ScalarDefinition>,
    scalars: BTreeMap<String, ScalarValue>,
    keyed_scalars: BTreeMap<String, BTreeMap<String, ScalarValue>>,
    /// category -> event name -> definition
    event_defs: HashMap<String, BTreeMap<String, EventDefinition>>,
    enabled_categories: HashSet<String>,
    events: Vec<RecordedEvent>,
    outbox: Vec<PendingPing>,
}

/// Scalar/event recorder and ping outbox.
pub struct TelemetryRecorder {
    platform: Platform,
    prefs: Arc<dyn PrefStore>,
    started: Instant,
    state: Mutex<RecorderState>,
}

impl fmt::Debug for TelemetryRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryRecorder")
            .field("platform", &self.platform)
            .field("state", &self.state)
            .finish()
    }
}

fn is_valid_identifier(name: &str, allow_dots: bool) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_dots && c == '.'))
        && !name.ends_with('.')
}

fn validate_name(name: &str, allow_dots: bool) -> std::result::Result<(), TelemetryError> {
    if is_valid_identifier(name, allow_dots) {
        Ok(())
    } else {
        Err(TelemetryError::InvalidName(name.to_string()))
    }
}

/// Ping types look like `my-ping`: alphanumerics and dashes, at least three
/// characters, starting and ending with an alphanumeric.
fn is_valid_ping_type(ping_type: &str) -> bool {
    let bytes = ping_type.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

fn truncate_value(value: &str) -> String {
    value.chars().take(MAX_EVENT_VALUE_LEN).collect()
}

impl TelemetryRecorder {
    #[must_use]
    pub fn new(platform: Platform, prefs: Arc<dyn PrefStore>) -> Self {
        Self {
            platform,
            prefs,
            started: Instant::now(),
            state: Mutex::new(RecorderState::default()),
        }
    }

    fn desktop_check(&self) -> std::result::Result<(), TelemetryError> {
        if self.platform == Platform::Desktop {
            Ok(())
        } else {
            Err(TelemetryError::UnsupportedPlatform)
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RecorderState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether the user allows data upload.
    pub fn can_upload(&self) -> Result<bool> {
        self.desktop_check()?;
        Ok(self.prefs.get_bool(PREF_UPLOAD_ENABLED, false)?)
    }

    /// Queue a ping for submission. Returns the ping id.
    pub fn submit_ping(
        &self,
        ping_type: &str,
        payload: serde_json::Value,
        options: PingOptions,
    ) -> Result<Uuid> {
        self.desktop_check()?;
        if !is_valid_ping_type(ping_type) {
            return Err(TelemetryError::InvalidPingType(ping_type.to_string()).into());
        }
        if !self.can_upload()? {
            return Err(TelemetryError::UploadDisabled(ping_type.to_string()).into());
        }

        let ping = PendingPing {
            id: Uuid::new_v4(),
            ping_type: ping_type.to_string(),
            payload,
            options,
            created_at: Utc::now(),
        };
        let id = ping.id;
        self.lock_state().outbox.push(ping);
        debug!(ping_type, ping_id = %id, "Ping queued");
        Ok(id)
    }

    /// Register scalars under `category`. Re-registering an identical
    /// definition is accepted.
    pub fn register_scalars(
        &self,
        category: &str,
        scalars: BTreeMap<String, ScalarDefinition>,
    ) -> Result<()> {
        self.desktop_check()?;
        validate_name(category, true)?;
        for name in scalars.keys() {
            validate_name(name, false)?;
        }

        let mut state = self.lock_state();
        for (name, def) in &scalars {
            let full = format!("{category}.{name}");
            if state.scalar_defs.get(&full).is_some_and(|d| d != def) {
                return Err(TelemetryError::AlreadyRegistered(full).into());
            }
        }
        for (name, def) in scalars {
            let full = format!("{category}.{name}");
            debug!(scalar = %full, kind = def.kind.name(), "Scalar registered");
            state.scalar_defs.insert(full, def);
        }
        Ok(())
    }

    fn scalar_def(
        state: &RecorderState,
        name: &str,
    ) -> std::result::Result<ScalarDefinition, TelemetryError> {
        state
            .scalar_defs
            .get(name)
            .cloned()
            .ok_or_else(|| TelemetryError::UnknownScalar(name.to_string()))
    }

    fn expect_count(
        def: &ScalarDefinition,
        name: &str,
    ) -> std::result::Result<(), TelemetryError> {
        if def.kind == ScalarKind::Count {
            Ok(())
        } else {
            Err(TelemetryError::ScalarTypeMismatch {
                name: name.to_string(),
                expected: def.kind.name(),
            })
        }
    }

    fn apply_scalar(&self, name: &str, key: Option<&str>, op: ScalarOp) -> Result<()> {
        self.desktop_check()?;
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let def = Self::scalar_def(state, name)?;
        if def.keyed != key.is_some() {
            return Err(TelemetryError::KeyedMismatch {
                name: name.to_string(),
                actual: if def.keyed { "keyed" } else { "unkeyed" },
            }
            .into());
        }
        match &op {
            ScalarOp::Set(value) if value.kind() != def.kind => {
                return Err(TelemetryError::ScalarTypeMismatch {
                    name: name.to_string(),
                    expected: def.kind.name(),
                }
                .into());
            }
            ScalarOp::Set(_) => {}
            ScalarOp::Add(_) | ScalarOp::SetMaximum(_) => Self::expect_count(&def, name)?,
        }
        if let Some(key) = key {
            if key.is_empty() || key.chars().count() > MAX_SCALAR_KEY_LEN {
                return Err(TelemetryError::InvalidScalarKey {
                    name: name.to_string(),
                    key: key.to_string(),
                }
                .into());
            }
        }
        if def.expired {
            return Ok(());
        }

        trace!(scalar = name, key = ?key, op = ?op, "Scalar updated");
        let slot = match key {
            None => state.scalars.entry(name.to_string()),
            Some(key) => state
                .keyed_scalars
                .entry(name.to_string())
                .or_default()
                .entry(key.to_string()),
        };
        let current = slot.or_insert(ScalarValue::Count(0));
        match op {
            ScalarOp::Add(value) => {
                if let ScalarValue::Count(count) = current {
                    *count = count.saturating_add(value);
                }
            }
            ScalarOp::SetMaximum(value) => {
                if let ScalarValue::Count(count) = current {
                    *count = (*count).max(value);
                }
            }
            ScalarOp::Set(value) => *current = value,
        }
        Ok(())
    }

    /// Add to a count scalar (saturating).
    pub fn scalar_add(&self, name: &str, value: u32) -> Result<()> {
        self.apply_scalar(name, None, ScalarOp::Add(value))
    }

    /// Set a scalar; the value type must match the registered kind.
    pub fn scalar_set(&self, name: &str, value: ScalarValue) -> Result<()> {
        self.apply_scalar(name, None, ScalarOp::Set(value))
    }

    /// Raise a count scalar to `value` if it is currently lower.
    pub fn scalar_set_maximum(&self, name: &str, value: u32) -> Result<()> {
        self.apply_scalar(name, None, ScalarOp::SetMaximum(value))
    }

    pub fn keyed_scalar_add(&self, name: &str, key: &str, value: u32) -> Result<()> {
        self.apply_scalar(name, Some(key), ScalarOp::Add(value))
    }

    pub fn keyed_scalar_set(&self, name: &str, key: &str, value: ScalarValue) -> Result<()> {
        self.apply_scalar(name, Some(key), ScalarOp::Set(value))
    }

    pub fn keyed_scalar_set_maximum(&self, name: &str, key: &str, value: u32) -> Result<()> {
        self.apply_scalar(name, Some(key), ScalarOp::SetMaximum(value))
    }

    /// Register events under `category` and enable recording for it.
    pub fn register_events(
        &self,
        category: &str,
        events: BTreeMap<String, EventDefinition>,
    ) -> Result<()> {
        self.desktop_check()?;
        validate_name(category, true)?;
        for (name, def) in &events {
            validate_name(name, false)?;
            for ident in def.methods.iter().chain(&def.objects).chain(&def.extra_keys) {
                validate_name(ident, false)?;
            }
        }

        let mut state = self.lock_state();
        state
            .event_defs
            .entry(category.to_string())
            .or_default()
            .extend(events);
        state.enabled_categories.insert(category.to_string());
        debug!(category, "Event category registered");
        Ok(())
    }

    /// Enable or disable event recording for a category.
    ///
    /// Unknown categories are accepted so recording can be configured before
    /// registration.
    pub fn set_event_recording_enabled(&self, category: &str, enabled: bool) -> Result<()> {
        self.desktop_check()?;
        let mut state = self.lock_state();
        if enabled {
            state.enabled_categories.insert(category.to_string());
        } else {
            state.enabled_categories.remove(category);
        }
        debug!(category, enabled, "Event recording toggled");
        Ok(())
    }

    /// Record an event. Events in disabled categories, or of expired
    /// definitions, are dropped without error.
    pub fn record_event(
        &self,
        category: &str,
        method: &str,
        object: &str,
        value: Option<&str>,
        extra: Option<BTreeMap<String, String>>,
    ) -> Result<()> {
        self.desktop_check()?;
        let timestamp_ms = self.started.elapsed().as_millis() as u64;
        let mut state = self.lock_state();

        let defs = state
            .event_defs
            .get(category)
            .ok_or_else(|| TelemetryError::UnknownCategory(category.to_string()))?;

        let def = defs
            .iter()
            .find(|(name, def)| {
                let method_ok = if def.methods.is_empty() {
                    name.as_str() == method
                } else {
                    def.methods.iter().any(|m| m == method)
                };
                method_ok && def.objects.iter().any(|o| o == object)
            })
            .map(|(_, def)| def.clone())
            .ok_or_else(|| TelemetryError::UnknownEvent {
                category: category.to_string(),
                method: method.to_string(),
                object: object.to_string(),
            })?;

        if let Some(extra) = &extra {
            if let Some(key) = extra.keys().find(|k| !def.extra_keys.contains(k)) {
                return Err(TelemetryError::InvalidExtraKey {
                    category: category.to_string(),
                    method: method.to_string(),
                    key: key.clone(),
                }
                .into());
            }
        }

        if def.expired || !state.enabled_categories.contains(category) {
            trace!(category, method, object, "Event dropped");
            return Ok(());
        }

        state.events.push(RecordedEvent {
            timestamp_ms,
            category: category.to_string(),
            method: method.to_string(),
            object: object.to_string(),
            value: value.map(truncate_value),
            extra: extra.map(|m| {
                m.into_iter()
                    .map(|(k, v)| (k, truncate_value(&v)))
                    .collect()
            }),
        });
        trace!(category, method, object, "Event recorded");
        Ok(())
    }

    /// Current scalar values, optionally clearing them.
    pub fn snapshot_scalars(&self, clear: bool) -> BTreeMap<String, ScalarValue> {
        let mut state = self.lock_state();
        if clear {
            std::mem::take(&mut state.scalars)
        } else {
            state.scalars.clone()
        }
    }

    /// Current keyed scalar values by scalar name then key.
    pub fn snapshot_keyed_scalars(
        &self,
        clear: bool,
    ) -> BTreeMap<String, BTreeMap<String, ScalarValue>> {
        let mut state = self.lock_state();
        if clear {
            std::mem::take(&mut state.keyed_scalars)
        } else {
            state.keyed_scalars.clone()
        }
    }

    /// Recorded events, optionally clearing them.
    pub fn snapshot_events(&self, clear: bool) -> Vec<RecordedEvent> {
        let mut state = self.lock_state();
        if clear {
            std::mem::take(&mut state.events)
        } else {
            state.events.clone()
        }
    }

    pub fn pending_pings(&self) -> Vec<PendingPing> {
        self.lock_state().outbox.clone()
    }

    /// Drain the outbox.
    pub fn take_pending_pings(&self) -> Vec<PendingPing> {
        std::mem::take(&mut self.lock_state().outbox)
    }
}
