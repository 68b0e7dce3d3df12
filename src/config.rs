use serde::{Deserialize, Serialize};
use std::{
  env,
  fs,
  path::{Path, PathBuf},
};

use crate::types::{DEFAULT_MAX_CONCURRENT_COMPLETIONS, OPENROUTER_API_URL};

pub const CONFIG_PATH_VAR: &str = "PROMPT_ARENA_CONFIG";
pub const API_KEY_VAR: &str = "OPENROUTER_API_KEY";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
  pub listen_addr: String,
  pub openrouter_api_key: String,
  pub openrouter_base_url: String,
  pub request_timeout_secs: u64,
  pub max_concurrent_completions: usize,
  pub temperature: f32,
  pub max_tokens: u32,
  /// JSON snapshot file for the store; memory only when unset.
  pub data_path: Option<String>,
  pub log_dir: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    AppConfig {
      listen_addr: "127.0.0.1:5000".to_string(),
      openrouter_api_key: String::new(),
      openrouter_base_url: OPENROUTER_API_URL.to_string(),
      request_timeout_secs: 60,
      max_concurrent_completions: DEFAULT_MAX_CONCURRENT_COMPLETIONS,
      temperature: 0.7,
      max_tokens: 1000,
      data_path: None,
      log_dir: "logs".to_string(),
    }
  }
}

impl AppConfig {
  /// The OpenRouter key from the config file or the environment.
  pub fn api_key(&self) -> Result<String, String> {
    let key = self.openrouter_api_key.trim();
    if key.is_empty() {
      return required_env_var(API_KEY_VAR);
    }
    Ok(key.to_string())
  }

  pub fn validate(&self) -> Result<(), String> {
    if self.listen_addr.trim().is_empty() {
      return Err("listenAddr must not be empty.".to_string());
    }
    if self.max_concurrent_completions == 0 {
      return Err("maxConcurrentCompletions must be at least 1.".to_string());
    }
    if self.request_timeout_secs == 0 {
      return Err("requestTimeoutSecs must be at least 1.".to_string());
    }
    if !(0.0..=2.0).contains(&self.temperature) {
      return Err(format!("temperature {} is outside 0.0..=2.0.", self.temperature));
    }
    Ok(())
  }

  pub fn data_path(&self) -> Option<PathBuf> {
    self
      .data_path
      .as_deref()
      .map(str::trim)
      .filter(|path| !path.is_empty())
      .map(PathBuf::from)
  }
}

pub fn config_path() -> PathBuf {
  env_default(CONFIG_PATH_VAR)
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("config.json"))
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>, String> {
  match env_default(key) {
    Some(raw) => raw
      .parse::<T>()
      .map(Some)
      .map_err(|_| format!("{key}={raw} is not a valid number.")),
    None => Ok(None),
  }
}

/// Fills empty text fields from the environment; numeric variables override
/// the file when set.
pub fn apply_env_defaults(mut config: AppConfig) -> Result<AppConfig, String> {
  if config.openrouter_api_key.trim().is_empty() {
    if let Some(value) = env_default(API_KEY_VAR) {
      config.openrouter_api_key = value;
    }
  }
  if let Some(value) = env_default("LISTEN_ADDR") {
    if config.listen_addr.trim().is_empty() || config.listen_addr == AppConfig::default().listen_addr {
      config.listen_addr = value;
    }
  }
  if config.data_path().is_none() {
    if let Some(value) = env_default("DATA_PATH") {
      config.data_path = Some(value);
    }
  }
  if config.log_dir.trim().is_empty() || config.log_dir == AppConfig::default().log_dir {
    if let Some(value) = env_default("LOG_DIR") {
      config.log_dir = value;
    }
  }
  if let Some(value) = env_number::<usize>("MAX_CONCURRENT_COMPLETIONS")? {
    config.max_concurrent_completions = value;
  }
  if let Some(value) = env_number::<u64>("REQUEST_TIMEOUT_SECS")? {
    config.request_timeout_secs = value;
  }
  Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, String> {
  let config = if path.is_file() {
    let data = fs::read_to_string(path).map_err(|e| format!("read config {}: {e}", path.display()))?;
    serde_json::from_str::<AppConfig>(&data).map_err(|e| format!("parse config {}: {e}", path.display()))?
  } else {
    AppConfig::default()
  };
  let config = apply_env_defaults(config)?;
  config.validate()?;
  Ok(config)
}

pub fn load_config() -> Result<AppConfig, String> {
  load_config_from(&config_path())
}

/// Applies `KEY=value` lines from a dotenv file, leaving variables that are
/// already set alone. Returns how many were applied; a missing file applies none.
pub fn load_env_file(path: &Path) -> usize {
  let Ok(contents) = fs::read_to_string(path) else {
    return 0;
  };
  let mut applied = 0;
  for (key, value) in contents.lines().filter_map(parse_env_line) {
    if env::var_os(&key).is_some() {
      continue;
    }
    env::set_var(&key, value);
    applied += 1;
  }
  applied
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let line = line.trim();
  if line.starts_with('#') {
    return None;
  }
  let assignment = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
  let (key, value) = assignment.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  Some((key.to_string(), unquote(value.trim()).to_string()))
}

/// Quoted values are taken verbatim; bare values end at an inline `#`.
fn unquote(value: &str) -> &str {
  for quote in ['"', '\''] {
    if let Some(inner) = value.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote)) {
      return inner;
    }
  }
  match value.split_once('#') {
    Some((bare, _comment)) => bare.trim_end(),
    None => value,
  }
}

pub fn required_env_var(key: &str) -> Result<String, String> {
  env_default(key).ok_or_else(|| format!("{key} is missing or blank; set it in .env or the shell environment."))
}
