use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::core::models::SongRequest;

/// Read a song payload. `.json` files are parsed as JSON, anything else as
/// TOML. Unset fields take the studio defaults.
pub fn load_request(path: &Path) -> Result<SongRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let request: SongRequest = if is_json {
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON payload {}", path.display()))?
    } else {
        toml::from_str(&raw).with_context(|| format!("Invalid TOML payload {}", path.display()))?
    };

    if request.sections.is_empty() {
        bail!("Payload {} has no sections", path.display());
    }
    Ok(request)
}

/// Apply command-line overrides on top of a loaded payload.
pub fn apply_overrides(request: &mut SongRequest, model: Option<&str>, title: Option<&str>) {
    if let Some(model) = model {
        request.model = model.to_string();
    }
    if let Some(title) = title {
        request.title = title.to_string();
    }
}
