//! Chart loading from files and inline content.

use rstchart_core::model::{Chart, ModelError};
use serde_json::Value;
use std::path::Path;

/// Chart source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartFormat {
    Json,
    Yaml,
}

impl ChartFormat {
    /// Picks the format from a file extension. Anything that is not YAML is
    /// read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => ChartFormat::Yaml,
            _ => ChartFormat::Json,
        }
    }
}

/// Returns true if `src` looks like a chart file path rather than a chart name.
pub fn is_chart_path(src: &str) -> bool {
    let src = src.strip_prefix("file:").unwrap_or(src);
    let path = Path::new(src);
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("yaml") | Some("yml")
    )
}

/// Parses chart text.
pub fn parse_chart(text: &str, format: ChartFormat) -> Result<Chart, ModelError> {
    match format {
        ChartFormat::Json => Chart::from_json_str(text),
        ChartFormat::Yaml => Chart::from_yaml(text),
    }
}

/// Reads and compiles a chart file. A `file:` prefix is accepted.
pub fn load_chart(path: impl AsRef<Path>) -> Result<Chart, LoadError> {
    let path = path.as_ref();
    let path = path
        .to_str()
        .and_then(|s| s.strip_prefix("file:"))
        .map(Path::new)
        .unwrap_or(path);

    let text = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let chart = parse_chart(&text, ChartFormat::from_path(path))?;

    tracing::debug!(
        "Loaded chart (path={}, chart={}, states={})",
        path.display(),
        chart.name(),
        chart.state_count()
    );
    Ok(chart)
}

/// Compiles inline `<content>` of an invoke: either a chart definition object
/// or a string holding one in JSON or YAML.
pub fn chart_from_content(content: &Value) -> Result<Chart, ModelError> {
    match content {
        Value::String(text) => {
            let trimmed = text.trim_start();
            if trimmed.starts_with('{') {
                Chart::from_json_str(text)
            } else {
                Chart::from_yaml(text)
            }
        }
        other => Chart::from_json(other),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read chart '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl LoadError {
    pub fn error_code(&self) -> &'static str {
        match self {
            LoadError::Io { .. } => "IO_ERROR",
            LoadError::Model(e) => e.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const DOOR_YAML: &str = r#"
name: door
initial: closed
states:
  - id: closed
    transitions:
      - event: open
        target: opened
  - id: opened
"#;

    #[test]
    fn test_format_from_path() {
        assert_eq!(ChartFormat::from_path(Path::new("a.yml")), ChartFormat::Yaml);
        assert_eq!(ChartFormat::from_path(Path::new("a.json")), ChartFormat::Json);
        assert!(is_chart_path("file:charts/door.yaml"));
        assert!(!is_chart_path("door"));
    }

    #[test]
    fn test_load_chart_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("door.yaml");
        std::fs::write(&path, DOOR_YAML).unwrap();

        let chart = load_chart(&path).unwrap();
        assert_eq!(chart.name(), "door");
        assert!(chart.state_id("opened").is_some());

        let prefixed = format!("file:{}", path.display());
        assert_eq!(load_chart(&prefixed).unwrap().checksum(), chart.checksum());

        let missing = load_chart(dir.path().join("missing.json"));
        assert_eq!(missing.err().map(|e| e.error_code()), Some("IO_ERROR"));
    }

    #[test]
    fn test_chart_from_content() {
        let chart = chart_from_content(&json!({
            "name": "child",
            "states": [{"id": "only", "type": "final"}]
        }))
        .unwrap();
        assert_eq!(chart.name(), "child");

        let from_text = chart_from_content(&json!(DOOR_YAML)).unwrap();
        assert_eq!(from_text.name(), "door");

        assert!(chart_from_content(&json!(42)).is_err());
    }
}
