use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use phishguard_forest::{forest_hash_hex, load_forest_from_path};

fn main() -> Result<()> {
    let model_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: forest_hash <model_path>")?;

    let forest = load_forest_from_path(&model_path)
        .with_context(|| format!("Failed to load forest from {}", model_path.display()))?;

    let hash = forest_hash_hex(&forest)?;
    println!("{hash}");
    eprintln!(
        "{} trees, {} malformed leaves, needs >= {} features",
        forest.num_trees(),
        forest.malformed_leaves(),
        forest.min_feature_len()
    );
    Ok(())
}
