// Runtime configuration for the dao_insure service.
// Layering: serialized defaults, then dao_insure.toml, then DAO_INSURE_* env.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{InsureError, InsureResult};

pub const DEFAULT_CONFIG_FILE: &str = "dao_insure.toml";
pub const CONFIG_PATH_ENV: &str = "DAO_INSURE_CONFIG";
pub const ENV_PREFIX: &str = "DAO_INSURE_";

/// Longest session window accepted: one year.
pub const MAX_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_level: String,
    /// Browser origins allowed to call the JSON API with credentials
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie")]
    pub cookie_name: String,
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
    #[serde(default = "default_signin_path")]
    pub signin_path: String,
    #[serde(default = "default_home_path")]
    pub home_path: String,
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
    #[serde(default = "default_auth_paths")]
    pub auth_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    #[serde(default = "default_events_key")]
    pub storage_key: String,
}

fn default_cookie() -> String {
    "dao_insure_session".to_string()
}

fn default_ttl_hours() -> i64 {
    24
}

fn default_signin_path() -> String {
    "/signin".to_string()
}

fn default_home_path() -> String {
    "/".to_string()
}

fn default_public_paths() -> Vec<String> {
    ["/", "/about", "/signin", "/signup"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_auth_paths() -> Vec<String> {
    vec!["/signin".to_string(), "/signup".to_string()]
}

fn default_events_key() -> String {
    "dao_insure_events".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dao_insure")
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            cookie_name: default_cookie(),
            ttl_hours: default_ttl_hours(),
            signin_path: default_signin_path(),
            home_path: default_home_path(),
            public_paths: default_public_paths(),
            auth_paths: default_auth_paths(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            storage_key: default_events_key(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            cors_origins: default_cors_origins(),
            session: SessionConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Path of the sled database holding the event blob
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("local_storage")
    }

    pub fn validate(&self) -> InsureResult<()> {
        if self.port == 0 {
            return Err(InsureError::validation("port", "must be non-zero"));
        }
        if self.session.ttl_hours <= 0 {
            return Err(InsureError::validation(
                "session.ttl_hours",
                "must be positive",
            ));
        }
        if self.session.ttl_hours > MAX_TTL_HOURS {
            return Err(InsureError::validation(
                "session.ttl_hours",
                format!("must be at most {MAX_TTL_HOURS}"),
            ));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(InsureError::validation(
                "session.cookie_name",
                "cannot be empty",
            ));
        }
        if self.events.storage_key.trim().is_empty() {
            return Err(InsureError::validation(
                "events.storage_key",
                "cannot be empty",
            ));
        }

        let paths = self
            .session
            .public_paths
            .iter()
            .chain(self.session.auth_paths.iter())
            .chain([&self.session.signin_path, &self.session.home_path]);
        for path in paths {
            if !path.starts_with('/') {
                return Err(InsureError::validation(
                    "session",
                    format!("path '{path}' must start with '/'"),
                ));
            }
        }

        for origin in &self.cors_origins {
            if origin == "*" || !(origin.starts_with("http://") || origin.starts_with("https://")) {
                return Err(InsureError::validation(
                    "cors_origins",
                    format!("'{origin}' must be an explicit http(s) origin"),
                ));
            }
        }
        Ok(())
    }
}

fn figment_for(file: Option<&str>) -> Figment {
    let file = file
        .map(str::to_string)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

    Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate the configuration.
///
/// `file` overrides `DAO_INSURE_CONFIG`; a missing file is not an error.
/// Nested keys come from env with a double underscore, e.g.
/// `DAO_INSURE_SESSION__TTL_HOURS=12`.
pub fn load_config(file: Option<&str>) -> InsureResult<AppConfig> {
    let config: AppConfig = figment_for(file).extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.session.ttl_hours, 24);
        assert_eq!(cfg.session.signin_path, "/signin");
        assert_eq!(cfg.events.storage_key, "dao_insure_events");
        assert!(cfg.session.public_paths.contains(&"/about".to_string()));
    }

    #[test]
    fn toml_and_env_layers_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                port = 9090

                [session]
                cookie_name = "sess"
                "#,
            )?;
            jail.set_env("DAO_INSURE_HOST", "0.0.0.0");
            jail.set_env("DAO_INSURE_SESSION__TTL_HOURS", "12");

            let cfg = load_config(Some("custom.toml")).expect("config loads");
            assert_eq!(cfg.port, 9090);
            assert_eq!(cfg.host, "0.0.0.0");
            assert_eq!(cfg.session.cookie_name, "sess");
            assert_eq!(cfg.session.ttl_hours, 12);
            assert_eq!(cfg.session.signin_path, "/signin");
            Ok(())
        });
    }

    #[test]
    fn zero_ttl_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("DAO_INSURE_SESSION__TTL_HOURS", "0");
            let err = load_config(Some("missing.toml")).unwrap_err();
            assert!(err.to_string().contains("ttl_hours"));
            Ok(())
        });
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("DAO_INSURE_SESSION__TTL_HOURS", "3000000000000");
            let err = load_config(Some("missing.toml")).unwrap_err();
            assert!(err.to_string().contains("ttl_hours"));
            Ok(())
        });

        let mut cfg = AppConfig::default();
        cfg.session.ttl_hours = MAX_TTL_HOURS;
        assert!(cfg.validate().is_ok());
        cfg.session.ttl_hours = MAX_TTL_HOURS + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn wildcard_cors_origin_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.cors_origins = vec!["*".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut cfg = AppConfig::default();
        cfg.session.public_paths.push("about".to_string());
        assert!(cfg.validate().is_err());
    }
}
