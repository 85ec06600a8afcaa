use super::{StoreError, StoreResult};
use crate::config::set_mode_600;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const API_KEY_PREF: &str = "perplexityApiKey";

const OBFUSCATION_PREFIX: &str = "obf1:";
const OBFUSCATION_PAD: &[u8] = b"novastore-preferences";

/// The fixed preference schema with its documented defaults. Unknown keys
/// are rejected at deserialization time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Preferences {
    pub theme: String,
    pub font_size: i64,
    pub zoom_level: f64,
    pub default_search_engine: String,
    pub home_page: String,
    pub show_bookmarks_bar: bool,
    pub open_new_tabs_in_background: bool,
    pub clear_history_on_exit: bool,
    pub clear_cookies_on_exit: bool,
    pub do_not_track: bool,
    pub download_path: String,
    pub ask_download_location: bool,
    pub hardware_acceleration: bool,
    pub autoplay_media: bool,
    pub block_popups: bool,
    pub perplexity_api_key: Option<String>,
    pub ai_model: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            font_size: 14,
            zoom_level: 1.0,
            default_search_engine: "https://www.google.com/search?q=".to_string(),
            home_page: String::new(),
            show_bookmarks_bar: true,
            open_new_tabs_in_background: false,
            clear_history_on_exit: false,
            clear_cookies_on_exit: false,
            do_not_track: true,
            download_path: String::new(),
            ask_download_location: true,
            hardware_acceleration: true,
            autoplay_media: true,
            block_popups: true,
            perplexity_api_key: None,
            ai_model: "llama-3.1-sonar-small-128k-online".to_string(),
        }
    }
}

type ChangeCallback = Box<dyn Fn(&str, &Value) + Send>;

struct Subscriber {
    key: Option<String>,
    callback: ChangeCallback,
}

/// Typed key-value preference store: only overrides are persisted, reads
/// layer them on the documented defaults. Every `set` commits to disk
/// before returning; change subscribers fire after the commit.
pub struct PreferenceStore {
    path: PathBuf,
    overrides: Map<String, Value>,
    subscribers: Vec<Subscriber>,
}

impl PreferenceStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let overrides = match fs::read_to_string(path) {
            Ok(content) => {
                let mut parsed: Map<String, Value> = serde_json::from_str(&content)
                    .with_context(|| {
                        format!("Failed to parse preferences file: {}", path.display())
                    })?;

                if let Some(Value::String(stored)) = parsed.get(API_KEY_PREF) {
                    if let Some(plain) = deobfuscate(stored) {
                        parsed.insert(API_KEY_PREF.to_string(), Value::String(plain));
                    }
                }

                let defaults = defaults_map();
                let unknown = parsed
                    .keys()
                    .filter(|key| !defaults.contains_key(*key))
                    .cloned()
                    .collect::<Vec<_>>();
                for key in unknown {
                    warn!(key = %key, "dropping unknown preference override");
                    parsed.remove(&key);
                }

                parsed
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(error) => {
                return Err(StoreError::Storage(anyhow::Error::from(error).context(
                    format!("Failed to read preferences file: {}", path.display()),
                )));
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            overrides,
            subscribers: Vec::new(),
        })
    }

    pub fn get(&self, key: &str) -> StoreResult<Value> {
        let defaults = defaults_map();
        let default = defaults
            .get(key)
            .ok_or_else(|| StoreError::Validation(format!("unknown preference key: {key}")))?;

        Ok(self.overrides.get(key).unwrap_or(default).clone())
    }

    pub fn set(&mut self, key: &str, value: Value) -> StoreResult<()> {
        self.validate(key, &value)?;

        self.overrides.insert(key.to_string(), value.clone());
        self.persist()?;
        self.notify(key, &value);

        Ok(())
    }

    pub fn get_all(&self) -> Preferences {
        let mut merged = defaults_map();
        for (key, value) in &self.overrides {
            merged.insert(key.clone(), value.clone());
        }

        // Overrides are schema-validated on every write, so the merged view
        // always deserializes.
        serde_json::from_value(Value::Object(merged)).unwrap_or_default()
    }

    /// Merges each provided key independently; keys not present are
    /// untouched. Nothing is applied if any key fails validation.
    pub fn set_all(&mut self, partial: &Map<String, Value>) -> StoreResult<()> {
        for (key, value) in partial {
            self.validate(key, value)?;
        }

        for (key, value) in partial {
            self.overrides.insert(key.clone(), value.clone());
        }
        self.persist()?;
        for (key, value) in partial {
            self.notify(key, value);
        }

        Ok(())
    }

    pub fn reset(&mut self) -> StoreResult<()> {
        let cleared = std::mem::take(&mut self.overrides);
        self.persist()?;

        let defaults = defaults_map();
        for key in cleared.keys() {
            if let Some(default) = defaults.get(key) {
                self.notify(key, default);
            }
        }

        Ok(())
    }

    pub fn reset_key(&mut self, key: &str) -> StoreResult<()> {
        let defaults = defaults_map();
        let default = defaults
            .get(key)
            .ok_or_else(|| StoreError::Validation(format!("unknown preference key: {key}")))?
            .clone();

        if self.overrides.remove(key).is_some() {
            self.persist()?;
            self.notify(key, &default);
        }

        Ok(())
    }

    pub fn export(&self) -> Preferences {
        self.get_all()
    }

    pub fn import(&mut self, partial: &Map<String, Value>) -> StoreResult<()> {
        self.set_all(partial)
    }

    /// Registers a callback for one key. Fires synchronously after the
    /// change is durably committed, on the writing thread.
    pub fn on_key_change<F>(&mut self, key: &str, callback: F)
    where
        F: Fn(&str, &Value) + Send + 'static,
    {
        self.subscribers.push(Subscriber {
            key: Some(key.to_string()),
            callback: Box::new(callback),
        });
    }

    pub fn on_any_change<F>(&mut self, callback: F)
    where
        F: Fn(&str, &Value) + Send + 'static,
    {
        self.subscribers.push(Subscriber {
            key: None,
            callback: Box::new(callback),
        });
    }

    fn validate(&self, key: &str, value: &Value) -> StoreResult<()> {
        let mut candidate = defaults_map();
        for (existing_key, existing_value) in &self.overrides {
            candidate.insert(existing_key.clone(), existing_value.clone());
        }
        candidate.insert(key.to_string(), value.clone());

        serde_json::from_value::<Preferences>(Value::Object(candidate))
            .map(|_| ())
            .map_err(|error| StoreError::Validation(format!("invalid preference {key}: {error}")))
    }

    fn persist(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create preferences directory: {}", parent.display())
            })?;
        }

        let mut on_disk = self.overrides.clone();
        if let Some(Value::String(plain)) = on_disk.get(API_KEY_PREF) {
            on_disk.insert(API_KEY_PREF.to_string(), Value::String(obfuscate(plain)));
        }

        let content = serde_json::to_string_pretty(&Value::Object(on_disk))
            .context("Failed to serialize preferences")?;
        fs::write(&self.path, content).with_context(|| {
            format!("Failed to write preferences file: {}", self.path.display())
        })?;
        set_mode_600(&self.path)?;

        Ok(())
    }

    fn notify(&self, key: &str, value: &Value) {
        for subscriber in &self.subscribers {
            match &subscriber.key {
                Some(watched) if watched != key => {}
                _ => (subscriber.callback)(key, value),
            }
        }
    }
}

fn defaults_map() -> Map<String, Value> {
    match serde_json::to_value(Preferences::default()) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Best-effort at-rest obfuscation for the API key: a fixed byte mask plus
/// hex, clearly reversible. Confidentiality comes from file permissions,
/// not from this encoding.
fn obfuscate(plain: &str) -> String {
    let mut encoded = String::with_capacity(OBFUSCATION_PREFIX.len() + plain.len() * 2);
    encoded.push_str(OBFUSCATION_PREFIX);
    for (index, byte) in plain.bytes().enumerate() {
        let masked = byte ^ OBFUSCATION_PAD[index % OBFUSCATION_PAD.len()];
        encoded.push_str(&format!("{masked:02x}"));
    }
    encoded
}

fn deobfuscate(stored: &str) -> Option<String> {
    let hex = stored.strip_prefix(OBFUSCATION_PREFIX)?;
    // Slicing below is by byte offset, so the payload must be plain hex.
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return None;
    }

    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for index in (0..hex.len()).step_by(2) {
        let masked = u8::from_str_radix(&hex[index..index + 2], 16).ok()?;
        bytes.push(masked ^ OBFUSCATION_PAD[(index / 2) % OBFUSCATION_PAD.len()]);
    }

    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::{API_KEY_PREF, PreferenceStore, Preferences, deobfuscate, obfuscate};
    use serde_json::{Map, Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> PreferenceStore {
        PreferenceStore::open(&dir.path().join("preferences.json")).expect("open preferences")
    }

    #[test]
    fn unset_keys_resolve_to_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir);

        assert_eq!(store.get("theme").expect("get theme"), json!("system"));
        assert_eq!(store.get("fontSize").expect("get fontSize"), json!(14));
        assert_eq!(store.get("doNotTrack").expect("get doNotTrack"), json!(true));
    }

    #[test]
    fn set_persists_across_reopen() {
        let dir = TempDir::new().expect("temp dir");
        {
            let mut store = open_store(&dir);
            store.set("theme", json!("dark")).expect("set theme");
        }

        let store = open_store(&dir);
        assert_eq!(store.get("theme").expect("get theme"), json!("dark"));
        assert_eq!(store.get("fontSize").expect("untouched key"), json!(14));
    }

    #[test]
    fn unknown_key_and_wrong_type_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = open_store(&dir);

        assert!(store.get("pollingSeconds").is_err());
        assert!(store.set("pollingSeconds", json!(300)).is_err());
        assert!(store.set("fontSize", json!("large")).is_err());
    }

    #[test]
    fn reset_restores_the_documented_default_table() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = open_store(&dir);

        store.set("theme", json!("dark")).expect("set theme");
        store.set("blockPopups", json!(false)).expect("set blockPopups");
        store.reset().expect("reset");

        let merged = serde_json::to_value(store.get_all()).expect("serialize");
        let defaults = serde_json::to_value(Preferences::default()).expect("serialize defaults");
        assert_eq!(merged, defaults);
    }

    #[test]
    fn reset_key_reverts_a_single_override() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = open_store(&dir);

        store.set("theme", json!("dark")).expect("set theme");
        store.set("fontSize", json!(18)).expect("set fontSize");
        store.reset_key("theme").expect("reset theme");

        assert_eq!(store.get("theme").expect("theme"), json!("system"));
        assert_eq!(store.get("fontSize").expect("fontSize"), json!(18));
    }

    #[test]
    fn set_all_merges_each_key_independently() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = open_store(&dir);

        store.set("homePage", json!("https://start.example/")).expect("set");

        let mut partial = Map::new();
        partial.insert("theme".to_string(), json!("light"));
        partial.insert("fontSize".to_string(), json!(16));
        store.set_all(&partial).expect("set_all");

        assert_eq!(store.get("theme").expect("theme"), json!("light"));
        assert_eq!(store.get("fontSize").expect("fontSize"), json!(16));
        assert_eq!(
            store.get("homePage").expect("homePage"),
            json!("https://start.example/")
        );
    }

    #[test]
    fn subscribers_fire_after_commit() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = open_store(&dir);

        let theme_hits = Arc::new(AtomicUsize::new(0));
        let any_hits = Arc::new(AtomicUsize::new(0));

        let theme_counter = Arc::clone(&theme_hits);
        store.on_key_change("theme", move |_key, value| {
            assert_eq!(value, &Value::String("dark".to_string()));
            theme_counter.fetch_add(1, Ordering::SeqCst);
        });
        let any_counter = Arc::clone(&any_hits);
        store.on_any_change(move |_key, _value| {
            any_counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set("theme", json!("dark")).expect("set theme");
        store.set("fontSize", json!(18)).expect("set fontSize");

        assert_eq!(theme_hits.load(Ordering::SeqCst), 1);
        assert_eq!(any_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn api_key_is_obfuscated_at_rest_and_readable_in_memory() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("preferences.json");
        {
            let mut store = PreferenceStore::open(&path).expect("open");
            store
                .set(API_KEY_PREF, json!("pplx-secret-token"))
                .expect("set api key");
        }

        let raw = std::fs::read_to_string(&path).expect("read file");
        assert!(!raw.contains("pplx-secret-token"));
        assert!(raw.contains("obf1:"));

        let store = PreferenceStore::open(&path).expect("reopen");
        assert_eq!(
            store.get(API_KEY_PREF).expect("get api key"),
            json!("pplx-secret-token")
        );
    }

    #[test]
    fn obfuscation_round_trips() {
        let encoded = obfuscate("abc123");
        assert_ne!(encoded, "abc123");
        assert_eq!(deobfuscate(&encoded).as_deref(), Some("abc123"));
        assert_eq!(deobfuscate("not-obfuscated"), None);
    }

    #[test]
    fn deobfuscate_rejects_non_hex_payloads() {
        // Multibyte UTF-8 after the prefix can pass the even-length check
        // but must not be sliced as hex.
        assert_eq!(deobfuscate("obf1:€€"), None);
        assert_eq!(deobfuscate("obf1:zz"), None);
        assert_eq!(deobfuscate("obf1:abc"), None);
    }

    #[test]
    fn corrupted_stored_api_key_does_not_prevent_open() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, r#"{"perplexityApiKey": "obf1:€€"}"#).expect("write file");

        let store = PreferenceStore::open(&path).expect("open tolerates corrupted key");
        // The undecodable value is kept verbatim rather than crashing open.
        assert_eq!(
            store.get(API_KEY_PREF).expect("get api key"),
            json!("obf1:€€")
        );
    }
}
