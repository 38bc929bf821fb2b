use adapter::{BackendConfig, RestConfig};
use config::ConfigError;
use domain::Viewer;
use engine::SyncSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const ENV_PREFIX: &str = "THREADSYNC_";

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub store: StoreSettings,
    pub backend: BackendSettings,
    pub sync: SyncSection,
    pub viewer: ViewerSettings,
    pub thread: ThreadSettings,
}

#[derive(Deserialize, Clone)]
pub struct StoreSettings {
    pub url: String,
}

#[derive(Deserialize, Clone)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BackendSettings {
    Memory,
    Rest {
        base_url: String,
        timeout_secs: u64,
        token: Option<String>,
    },
}

#[derive(Deserialize, Clone)]
pub struct SyncSection {
    pub pending_expiry_ms: u64,
    pub dedup_skew_secs: u64,
}

#[derive(Deserialize, Clone)]
pub struct ViewerSettings {
    pub id: String,
    pub name: String,
    pub handle: String,
    pub avatar: Option<String>,
}

#[derive(Deserialize, Clone)]
pub struct ThreadSettings {
    pub id: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());
        let env_map = remap_env_vars(std::env::vars());
        let env_json = serde_json::to_string(&env_map)
            .map_err(|e| ConfigError::Message(format!("Environment not serializable: {}", e)))?;

        let s = config::Config::builder()
            .set_default("store.url", "sqlite://data/threadsync.db")?
            .set_default("backend.mode", "memory")?
            .set_default("backend.timeout_secs", 10)?
            .set_default("sync.pending_expiry_ms", 5000)?
            .set_default("sync.dedup_skew_secs", 60)?
            .set_default("viewer.id", "local-user")?
            .set_default("viewer.name", "Me")?
            .set_default("viewer.handle", "me")?
            .set_default("thread.id", "demo-thread")?
            .add_source(config::File::with_name("threadsync").required(false))
            .add_source(
                config::File::with_name(&format!("threadsync.{}", run_mode)).required(false),
            )
            .add_source(config::File::from_str(&env_json, config::FileFormat::Json))
            .build()?;

        s.try_deserialize()
    }
}

impl BackendSettings {
    pub fn to_config(&self) -> BackendConfig {
        match self {
            BackendSettings::Memory => BackendConfig::Memory,
            BackendSettings::Rest {
                base_url,
                timeout_secs,
                token,
            } => BackendConfig::Rest(RestConfig {
                base_url: base_url.clone(),
                timeout: Duration::from_secs(*timeout_secs),
                token: token.clone(),
            }),
        }
    }
}

impl SyncSection {
    pub fn to_settings(&self) -> SyncSettings {
        SyncSettings {
            pending_expiry: Duration::from_millis(self.pending_expiry_ms),
            dedup_skew: Duration::from_secs(self.dedup_skew_secs),
        }
    }
}

impl ViewerSettings {
    pub fn to_viewer(&self) -> Viewer {
        Viewer {
            id: self.id.clone(),
            name: self.name.clone(),
            handle: self.handle.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// `THREADSYNC_SYNC__PENDING_EXPIRY_MS` → `sync.pending_expiry_ms`
fn remap_env_vars(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
    vars.filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .map(|(k, v)| {
            let new_key = k
                .trim_start_matches(ENV_PREFIX)
                .replace("__", ".")
                .to_lowercase();
            (new_key, v)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_keys_are_nested_and_lowercased() {
        let vars = vec![
            ("THREADSYNC_BACKEND__MODE".to_string(), "rest".to_string()),
            ("THREADSYNC_VIEWER__ID".to_string(), "u42".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let map = remap_env_vars(vars.into_iter());
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("backend.mode").map(String::as_str), Some("rest"));
        assert_eq!(map.get("viewer.id").map(String::as_str), Some("u42"));
    }

    #[test]
    fn test_backend_settings_from_json() {
        let rest: BackendSettings = serde_json::from_str(
            r#"{"mode":"rest","base_url":"http://localhost:8080/api","timeout_secs":3}"#,
        )
        .unwrap();
        match rest.to_config() {
            BackendConfig::Rest(cfg) => {
                assert_eq!(cfg.base_url, "http://localhost:8080/api");
                assert_eq!(cfg.timeout, Duration::from_secs(3));
                assert!(cfg.token.is_none());
            }
            BackendConfig::Memory => panic!("expected rest backend"),
        }

        let memory: BackendSettings =
            serde_json::from_str(r#"{"mode":"memory","timeout_secs":10}"#).unwrap();
        assert!(matches!(memory.to_config(), BackendConfig::Memory));
    }
}
