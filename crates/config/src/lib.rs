//! Configuration resolution: process environment, then `.env`, then an
//! optional `secrets.json` file. Matches the precedence the coordinator
//! has always used so a deployment's existing env vars and dotenv files
//! keep working unmodified.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error("failed to read secrets file {path}: {source}")]
    SecretsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse secrets file {path}: {source}")]
    SecretsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    Gemini,
    OpenaiRealtime,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: String,
    pub mongo_url: String,
    pub mongo_db_name: String,
    pub redis_url: Option<String>,

    pub jwt_secret: String,
    pub jwt_algorithm: String,
    pub jwt_expire_minutes: i64,

    pub ai_provider: AiProvider,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,

    pub max_latency_ms: u64,
    pub max_jitter_ms: u64,

    pub supported_languages: Vec<String>,
    pub cors_origins: Vec<String>,

    pub bind_addr: String,
}

impl Settings {
    fn from_layered(raw: &config::Config, secrets: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| -> Option<String> {
            raw.get_string(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| secrets.get(key).cloned())
        };
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let ai_provider = match get_or("ai_provider", "gemini").as_str() {
            "gemini" => AiProvider::Gemini,
            "openai_realtime" => AiProvider::OpenaiRealtime,
            other => {
                return Err(ConfigError::Invalid {
                    field: "ai_provider",
                    reason: format!("unknown provider `{other}`, expected gemini|openai_realtime"),
                });
            }
        };

        let supported_languages = get("supported_languages")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|| vec!["ja".into(), "en".into(), "zh".into(), "vi".into()]);

        let cors_origins = get("cors_origins")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|| vec!["*".into()]);

        let max_latency_ms: u64 = get("max_latency_ms")
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| ConfigError::Invalid {
                field: "max_latency_ms",
                reason: "not an integer".into(),
            })?
            .unwrap_or(1200);

        let max_jitter_ms: u64 = get("max_jitter_ms")
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| ConfigError::Invalid {
                field: "max_jitter_ms",
                reason: "not an integer".into(),
            })?
            .unwrap_or(200);

        let jwt_expire_minutes: i64 = get("jwt_expire_minutes")
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| ConfigError::Invalid {
                field: "jwt_expire_minutes",
                reason: "not an integer".into(),
            })?
            .unwrap_or(60 * 24);

        Ok(Settings {
            env: get_or("env", "development"),
            mongo_url: get_or("mongo_url", "mongodb://localhost:27017"),
            mongo_db_name: get_or("mongo_db_name", "lams"),
            redis_url: get("redis_url"),
            jwt_secret: get("jwt_secret").ok_or(ConfigError::Missing("jwt_secret"))?,
            jwt_algorithm: get_or("jwt_algorithm", "HS256"),
            jwt_expire_minutes,
            ai_provider,
            gemini_api_key: get("gemini_api_key"),
            gemini_base_url: get_or("gemini_base_url", "https://generativelanguage.googleapis.com"),
            gemini_model: get_or("gemini_model", "gemini-2.0-flash"),
            openai_api_key: get("openai_api_key"),
            openai_base_url: get_or("openai_base_url", "https://api.openai.com/v1"),
            openai_model: get_or("openai_model", "gpt-4o-realtime-preview"),
            max_latency_ms,
            max_jitter_ms,
            supported_languages,
            cors_origins,
            bind_addr: get_or("bind_addr", "0.0.0.0:8080"),
        })
    }

    pub fn ai_api_key(&self) -> Option<&str> {
        match self.ai_provider {
            AiProvider::Gemini => self.gemini_api_key.as_deref(),
            AiProvider::OpenaiRealtime => self.openai_api_key.as_deref(),
        }
    }
}

/// Search order for a `secrets.json` file, matching the original
/// service's `_load_secrets_json`: an explicit `SECRETS_JSON_PATH` env
/// var, then the current working directory, then `./backend`, then the
/// workspace root.
fn secrets_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(explicit) = std::env::var("SECRETS_JSON_PATH") {
        candidates.push(PathBuf::from(explicit));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("secrets.json"));
        candidates.push(cwd.join("backend").join("secrets.json"));
        if let Some(parent) = cwd.parent() {
            candidates.push(parent.join("secrets.json"));
        }
    }
    candidates
}

fn load_secrets_json() -> Result<HashMap<String, String>, ConfigError> {
    for path in secrets_file_candidates() {
        if !path.is_file() {
            continue;
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::SecretsFile {
            path: path.clone(),
            source,
        })?;
        let parsed: HashMap<String, String> =
            serde_json::from_str(&contents).map_err(|source| ConfigError::SecretsParse { path, source })?;
        return Ok(parsed);
    }
    Ok(HashMap::new())
}

/// Loads settings with env > `.env` > `secrets.json` precedence.
/// `dotenvy` only fills variables not already set in the process
/// environment, so an already-exported `JWT_SECRET` always wins.
pub fn load() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let raw = config::Config::builder()
        .add_source(config::Environment::default().try_parsing(true))
        .build()?;

    let secrets = load_secrets_json()?;
    Settings::from_layered(&raw, &secrets)
}

/// Loads settings the same way `load()` does but from an explicit
/// directory, used by integration tests that stage their own
/// `secrets.json` under a temp dir.
pub fn load_from(dir: &Path) -> Result<Settings, ConfigError> {
    let env_path = dir.join(".env");
    if env_path.is_file() {
        let _ = dotenvy::from_path(&env_path);
    }
    let raw = config::Config::builder()
        .add_source(config::Environment::default().try_parsing(true))
        .build()?;
    let secrets_path = dir.join("secrets.json");
    let secrets = if secrets_path.is_file() {
        let contents = std::fs::read_to_string(&secrets_path).map_err(|source| ConfigError::SecretsFile {
            path: secrets_path.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::SecretsParse {
            path: secrets_path,
            source,
        })?
    } else {
        HashMap::new()
    };
    Settings::from_layered(&raw, &secrets)
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Cached singleton accessor, mirroring the original's
/// `lru_cache`-wrapped `get_settings()`. Panics on first call if
/// loading fails, since the process cannot serve traffic without
/// configuration; callers that want to handle the error should call
/// [`load`] directly instead.
pub fn get_settings() -> &'static Settings {
    SETTINGS.get_or_init(|| load().expect("failed to load configuration"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_unset() {
        let dir = tempfile_dir();
        std::fs::write(dir.join(".env"), "JWT_SECRET=test-secret\n").unwrap();
        let settings = load_from(&dir).unwrap();
        assert_eq!(settings.max_latency_ms, 1200);
        assert_eq!(settings.max_jitter_ms, 200);
        assert_eq!(settings.supported_languages, vec!["ja", "en", "zh", "vi"]);
        assert_eq!(settings.ai_provider, AiProvider::Gemini);
    }

    #[test]
    fn secrets_file_backfills_api_key() {
        let dir = tempfile_dir();
        std::fs::write(dir.join(".env"), "JWT_SECRET=test-secret\n").unwrap();
        let mut secrets_file = std::fs::File::create(dir.join("secrets.json")).unwrap();
        write!(secrets_file, r#"{{"gemini_api_key": "from-secrets-file"}}"#).unwrap();
        let settings = load_from(&dir).unwrap();
        assert_eq!(settings.gemini_api_key.as_deref(), Some("from-secrets-file"));
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lams-config-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
