//! Reading `settings.json` and layering `HERALD_*` variables on top.
//!
//! A missing file is not an error: the compiled defaults stand in for it.
//! When the file exists its JSON is overlaid on the defaults with
//! [`deep_merge`], so a file only needs the keys it wants to change.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::HeraldSettings;

/// `~/.herald/settings.json`, falling back to `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".herald")
        .join("settings.json")
}

/// [`load_settings_from_path`] on [`settings_path`].
pub fn load_settings() -> Result<HeraldSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, then the file at `path`, then the process environment.
///
/// The result is validated before it is returned.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<HeraldSettings> {
    let base = serde_json::to_value(HeraldSettings::default())?;
    let layered = match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(path = %path.display(), "applying settings file");
            deep_merge(base, serde_json::from_str(&text)?)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file");
            base
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_value(layered)?)
}

/// Overlay `overlay` onto `base`.
///
/// Two objects combine key by key; `null` in the overlay leaves the base
/// value alone. Any other pairing takes the overlay as a whole, which means
/// arrays are replaced rather than concatenated.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => Value::Object(merge_maps(base, overlay)),
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

fn merge_maps(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
        let combined = match base.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        let _ = base.insert(key, combined);
    }
    base
}

/// Apply `HERALD_*` variables from the process environment.
///
/// Unparseable or out-of-range values are logged and skipped.
pub fn apply_env_overrides(settings: &mut HeraldSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` instead of the real environment.
pub fn apply_overrides_from<F>(settings: &mut HeraldSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(host) = env.text("HERALD_HOST") {
        settings.server.host = host;
    }
    if let Some(port) = env.bounded("HERALD_PORT", 0u16, u16::MAX) {
        settings.server.port = port;
    }
    if let Some(max) = env.bounded("HERALD_MAX_CONNECTIONS", 1usize, 1_000_000) {
        settings.server.max_connections = max;
    }
    if let Some(ms) = env.bounded("HERALD_SEND_TIMEOUT_MS", 100u64, 600_000) {
        settings.server.send_timeout_ms = ms;
    }

    if let Some(topics) = env.text("HERALD_TOPICS").map(|raw| parse_topic_list(&raw)) {
        if topics.is_empty() {
            warn!("HERALD_TOPICS has no topic names, keeping configured list");
        } else {
            settings.topics = topics;
        }
    }
    if let Some(capacity) = env.bounded("HERALD_BUFFER_CAPACITY", 1usize, 1_000_000) {
        settings.buffer.capacity = capacity;
    }

    if let Some(ms) = env.bounded("HERALD_HEARTBEAT_INTERVAL_MS", 100u64, 3_600_000) {
        settings.heartbeat.interval_ms = ms;
    }
    if let Some(ms) = env.bounded("HERALD_HEARTBEAT_TIMEOUT_MS", 100u64, 3_600_000) {
        settings.heartbeat.timeout_ms = ms;
    }

    if let Some(url) = env.text("HERALD_RELAY_URL") {
        settings.relay.url = Some(url);
    }
    if let Some(prefix) = env.text("HERALD_SUBJECT_PREFIX") {
        settings.relay.subject_prefix = prefix;
    }

    if let Some(level) = env.text("HERALD_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(json) = env.flag("HERALD_LOG_JSON") {
        settings.logging.json = json;
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn text(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn flag(&self, name: &str) -> Option<bool> {
        let raw = self.text(name)?;
        let parsed = parse_flag(&raw);
        if parsed.is_none() {
            warn!(var = name, value = %raw, "not a boolean, ignoring");
        }
        parsed
    }

    fn bounded<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
    {
        let raw = self.text(name)?;
        let parsed = parse_bounded(&raw, min, max);
        if parsed.is_none() {
            warn!(var = name, value = %raw, %min, %max, "out of range or not a number, ignoring");
        }
        parsed
    }
}

/// Split a comma-separated topic list, trimming names and dropping blanks.
pub fn parse_topic_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// `true`/`yes`/`on`/`1` and `false`/`no`/`off`/`0`, any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if ["true", "yes", "on", "1"].iter().any(|t| raw.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if ["false", "no", "off", "0"].iter().any(|f| raw.eq_ignore_ascii_case(f)) {
        Some(false)
    } else {
        None
    }
}

/// Parse `raw` as a `T` in `min..=max`.
pub fn parse_bounded<T>(raw: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim()
        .parse::<T>()
        .ok()
        .filter(|n| (min..=max).contains(n))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn write_settings(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, body).unwrap();
        (dir, path)
    }

    #[test]
    fn overlay_keeps_sibling_keys() {
        let merged = deep_merge(
            json!({"relay": {"url": null, "subjectPrefix": "events"}}),
            json!({"relay": {"url": "nats://a:4222"}}),
        );
        assert_eq!(merged, json!({"relay": {"url": "nats://a:4222", "subjectPrefix": "events"}}));
    }

    #[test]
    fn overlay_lists_replace_wholesale() {
        let merged = deep_merge(json!({"topics": ["agents", "jobs"]}), json!({"topics": ["tasks"]}));
        assert_eq!(merged["topics"], json!(["tasks"]));
    }

    #[test]
    fn overlay_nulls_are_skipped() {
        let merged = deep_merge(json!({"buffer": {"capacity": 200}}), json!({"buffer": null}));
        assert_eq!(merged["buffer"]["capacity"], 200);
        assert_eq!(deep_merge(json!(3), Value::Null), json!(3));
    }

    #[test]
    fn overlay_scalar_wins_over_object() {
        let merged = deep_merge(json!({"logging": {"json": false}, "x": 1}), json!({"logging": "off", "y": 2}));
        assert_eq!(merged, json!({"logging": "off", "x": 1, "y": 2}));
    }

    #[test]
    fn absent_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_layered(&dir.path().join("absent.json")).unwrap();
        let defaults = HeraldSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.topics, defaults.topics);
    }

    #[test]
    fn file_values_layer_over_defaults() {
        let (_dir, path) = write_settings(r#"{"buffer": {"capacity": 50}, "relay": {"url": "nats://broker:4222"}}"#);
        let settings = read_layered(&path).unwrap();
        assert_eq!(settings.buffer.capacity, 50);
        assert_eq!(settings.relay.url.as_deref(), Some("nats://broker:4222"));
        assert_eq!(settings.relay.subject_prefix, "events");
        assert_eq!(settings.heartbeat.interval_ms, 30_000);
    }

    #[test]
    fn file_topic_list_is_taken_verbatim() {
        let (_dir, path) = write_settings(r#"{"topics": ["agents", "tasks"]}"#);
        assert_eq!(read_layered(&path).unwrap().topics, ["agents", "tasks"]);
    }

    #[test]
    fn broken_json_is_reported() {
        let (_dir, path) = write_settings("{ topics: ");
        assert!(matches!(read_layered(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn zero_capacity_fails_validation() {
        let (_dir, path) = write_settings(r#"{"buffer": {"capacity": 0}}"#);
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn env_values_override_file_values() {
        let mut settings = HeraldSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("HERALD_PORT", "9300"),
                ("HERALD_TOPICS", "agents, jobs"),
                ("HERALD_RELAY_URL", "nats://bus:4222"),
                ("HERALD_HEARTBEAT_TIMEOUT_MS", "90000"),
                ("HERALD_LOG_JSON", "Yes"),
            ]),
        );
        assert_eq!(settings.server.port, 9300);
        assert_eq!(settings.topics, ["agents", "jobs"]);
        assert_eq!(settings.relay.url.as_deref(), Some("nats://bus:4222"));
        assert_eq!(settings.heartbeat.timeout_ms, 90_000);
        assert!(settings.logging.json);
    }

    #[test]
    fn bad_env_values_are_skipped() {
        let mut settings = HeraldSettings::default();
        let before = settings.clone();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("HERALD_PORT", "70000"),
                ("HERALD_BUFFER_CAPACITY", "0"),
                ("HERALD_TOPICS", " , "),
                ("HERALD_HOST", "   "),
                ("HERALD_LOG_JSON", "maybe"),
            ]),
        );
        assert_eq!(settings.server.port, before.server.port);
        assert_eq!(settings.server.host, before.server.host);
        assert_eq!(settings.buffer.capacity, before.buffer.capacity);
        assert_eq!(settings.topics, before.topics);
        assert_eq!(settings.logging.json, before.logging.json);
    }

    #[test]
    fn bounded_parsing() {
        assert_eq!(parse_bounded("8080", 1u16, u16::MAX), Some(8080));
        assert_eq!(parse_bounded(" 12 ", 1usize, 100), Some(12));
        assert_eq!(parse_bounded("99", 100u64, 1000), None);
        assert_eq!(parse_bounded("-1", 0u64, 10), None);
        assert_eq!(parse_bounded::<u16>("port", 0, 10), None);
    }

    #[test]
    fn flag_spellings() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("enabled"), None);
    }

    #[test]
    fn topic_list_trims_and_drops_blanks() {
        assert_eq!(parse_topic_list(" agents, ,tasks ,"), ["agents", "tasks"]);
        assert!(parse_topic_list(" , ").is_empty());
    }
}
