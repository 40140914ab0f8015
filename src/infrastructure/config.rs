//! Environment configuration

use log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL_ID: &str = "Llama-3.2-3B-Instruct-Q4_K_M";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `None` lets the engine initializer pick the first catalog entry.
    pub model_id: Option<String>,
    pub models_dir: PathBuf,
    pub context_size: usize,
    pub max_completion_tokens: usize,
    pub simulated_reply_delay: Duration,
    pub gpu_disabled: bool,
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model_id: Some(DEFAULT_MODEL_ID.to_owned()),
            models_dir: PathBuf::from("models"),
            context_size: 32_768,
            max_completion_tokens: 1024,
            simulated_reply_delay: Duration::from_millis(300),
            gpu_disabled: false,
            listen_addr: "0.0.0.0:3000".to_owned(),
        }
    }
}

impl Config {
    /// Reads `.env` (if any) and the process environment.
    pub fn from_env() -> Config {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Config {
        let defaults = Config::default();

        let model_id = match lookup("MODEL_ID") {
            Some(id) if id.trim().is_empty() => None,
            Some(id) => Some(id.trim().to_owned()),
            None => defaults.model_id,
        };

        Config {
            model_id,
            models_dir: lookup("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.models_dir),
            context_size: parse_or(&lookup, "CONTEXT_SIZE", defaults.context_size),
            max_completion_tokens: parse_or(
                &lookup,
                "MAX_COMPLETION_TOKENS",
                defaults.max_completion_tokens,
            ),
            simulated_reply_delay: Duration::from_millis(parse_or(
                &lookup,
                "SIMULATED_REPLY_DELAY_MS",
                defaults.simulated_reply_delay.as_millis() as u64,
            )),
            gpu_disabled: lookup("DISABLE_GPU")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.gpu_disabled),
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match T::from_str(raw.trim()) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid {key}='{raw}', falling back to default");
                default
            }
        },
        None => default,
    }
}
