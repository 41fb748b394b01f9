use anyhow::{Context, Result};
use semver::{BuildMetadata, Version};

/// Crate version with optional build metadata appended (`0.3.0+abc123`).
pub fn version_string(metadata: Option<&str>) -> Result<String> {
    let mut v = Version::parse(env!("CARGO_PKG_VERSION")).context("parsing package version")?;
    if let Some(meta) = metadata.filter(|m| !m.is_empty()) {
        v.build = BuildMetadata::new(meta).with_context(|| format!("invalid build metadata: {}", meta))?;
    }
    Ok(v.to_string())
}

/// Build metadata baked in at compile time via `ROLLWATCH_BUILD_METADATA`.
pub fn build_metadata() -> Option<&'static str> {
    option_env!("ROLLWATCH_BUILD_METADATA")
}
