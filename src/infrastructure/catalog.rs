//! Model catalog backed by a directory of GGUF files.

use crate::core::traits::{AppConfig, ModelRecord};
use anyhow::{Context, anyhow};
use std::path::{Path, PathBuf};

pub const MODEL_EXTENSION: &str = "gguf";

/// Lists `*.gguf` files in `dir`, sorted by file name.
///
/// The file stem is the model id.
pub async fn scan(dir: &Path) -> anyhow::Result<Vec<ModelRecord>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read models directory {}", dir.display()))?;

    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(MODEL_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        records.push(ModelRecord {
            model_id: Some(stem.to_owned()),
            model: Some(path.to_string_lossy().into_owned()),
        });
    }

    records.sort_by(|a, b| a.model_id.cmp(&b.model_id));
    Ok(records)
}

/// Finds the weights file for `model_id`.
///
/// An entry in `app_config` takes precedence; otherwise `model_id` is looked
/// up as `<models_dir>/<model_id>.gguf`, or used as a path directly.
pub fn resolve_model_path(
    model_id: &str,
    app_config: Option<&AppConfig>,
    models_dir: &Path,
) -> anyhow::Result<PathBuf> {
    if let Some(location) = app_config
        .and_then(|config| config.find(model_id))
        .and_then(|record| record.model.as_deref())
    {
        return Ok(PathBuf::from(location));
    }

    let in_dir = models_dir.join(format!("{model_id}.{MODEL_EXTENSION}"));
    if in_dir.exists() {
        return Ok(in_dir);
    }

    let direct = PathBuf::from(model_id);
    if direct.exists() {
        return Ok(direct);
    }

    Err(anyhow!(
        "model '{model_id}' not found in {}",
        models_dir.display()
    ))
}
