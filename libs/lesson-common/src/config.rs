// Process configuration shared by the worker and the API, read from the environment

use crate::runners::DEFAULT_RUNNERS_PATH;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub curriculum_dir: PathBuf,
    pub runners_path: PathBuf,
    pub locales_dir: PathBuf,
    pub api_addr: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        Self {
            redis_url: get("REDIS_URL", "redis://127.0.0.1:6379"),
            curriculum_dir: PathBuf::from(get("CURRICULUM_DIR", "curriculum")),
            runners_path: PathBuf::from(get("RUNNERS_CONFIG", DEFAULT_RUNNERS_PATH)),
            locales_dir: PathBuf::from(get("LOCALES_DIR", "locales")),
            api_addr: get("API_ADDR", "0.0.0.0:3000"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.runners_path, PathBuf::from("config/runners.json"));
        assert_eq!(config.api_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(|key| match key {
            "CURRICULUM_DIR" => Some("/srv/curriculum".to_string()),
            _ => None,
        });
        assert_eq!(config.curriculum_dir, PathBuf::from("/srv/curriculum"));
        assert_eq!(config.locales_dir, PathBuf::from("locales"));
    }
}
