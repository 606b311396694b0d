use std::{collections::HashMap, fs, path::PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_url: String,
    /// Where the session token lives; `None` picks the platform data dir.
    pub session_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            session_file: None,
        }
    }
}

/// Defaults, overridden by `bleepo.toml` in the working directory,
/// overridden by `BLEEPO_*` environment variables. The `--server-url` flag
/// wins over all of these.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("bleepo.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_file_values(&mut settings, &file_cfg);
        }
    }

    if let Ok(v) = std::env::var("BLEEPO_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("BLEEPO_SESSION_FILE") {
        settings.session_file = Some(PathBuf::from(v));
    }

    settings
}

fn apply_file_values(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("server_url") {
        settings.server_url = v.clone();
    }
    if let Some(v) = file_cfg.get("session_file") {
        settings.session_file = Some(PathBuf::from(v));
    }
}
