use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use phishguard_forest::{forest_hash_hex, load_forest_from_path};
use toml::Value;

fn main() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/phishguard.toml"));

    let (model_path, expected_hash) = parse_model_entry(&config_path)?;
    let resolved_path = resolve_model_path(&config_path, &model_path);

    let forest = load_forest_from_path(&resolved_path).with_context(|| {
        format!(
            "Failed to load forest from {} referenced in {}",
            resolved_path.display(),
            config_path.display()
        )
    })?;
    let actual_hash = forest_hash_hex(&forest)?;

    if !actual_hash.eq_ignore_ascii_case(&expected_hash) {
        bail!(
            "forest hash mismatch: expected {}, computed {} for {}",
            expected_hash,
            actual_hash,
            resolved_path.display()
        );
    }

    println!(
        "forest hash matches expected value {} for {} ({} trees)",
        actual_hash,
        resolved_path.display(),
        forest.num_trees()
    );
    Ok(())
}

fn parse_model_entry(config_path: &Path) -> Result<(PathBuf, String)> {
    let contents = fs::read_to_string(config_path)
        .with_context(|| format!("Unable to read config file at {}", config_path.display()))?;

    let value: Value = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse TOML at {}", config_path.display()))?;

    let model_path = value
        .get("model_path")
        .and_then(Value::as_str)
        .context("Missing model_path entry")?;

    let expected_hash = value
        .get("expected_model_hash")
        .and_then(Value::as_str)
        .context("Missing expected_model_hash entry")?
        .trim()
        .to_owned();

    Ok((PathBuf::from(model_path), expected_hash))
}

fn resolve_model_path(config_path: &Path, model_path: &Path) -> PathBuf {
    if model_path.is_absolute() {
        return model_path.to_path_buf();
    }

    let base = config_path.parent().unwrap_or_else(|| Path::new("."));
    let candidate = base.join(model_path);
    if candidate.exists() {
        return candidate;
    }

    model_path.to_path_buf()
}
