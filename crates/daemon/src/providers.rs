//! File-backed collaborator implementations.
//!
//! The pipeline reaches its external collaborators through traits; this
//! daemon backs the device directory and the rule store with a single JSON
//! definitions file, and the time-series sink with an append-only JSON-lines
//! file. The definitions file is re-read on every pull, so edits take effect
//! on the next refresh tick without a restart.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use poolsense_core::{AlarmRule, DeviceRecord, ReadingEvent};
use poolsense_pipeline::{DeviceDirectory, RuleProvider, RuleSnapshot, TimeSeriesSink};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Definitions file
// ---------------------------------------------------------------------------

/// On-disk shape of the definitions file:
/// `{"devices": [..], "rules": [..]}`.
#[derive(Debug, Default, Deserialize)]
struct DefinitionsFile {
    #[serde(default)]
    devices: Vec<DeviceRecord>,
    #[serde(default)]
    rules: Vec<AlarmRule>,
}

/// Device directory and rule store over one JSON definitions file.
pub struct FileDefinitions {
    path: PathBuf,
}

impl FileDefinitions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> anyhow::Result<DefinitionsFile> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read definitions file {}", self.path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse definitions file {}", self.path.display()))
    }
}

#[async_trait]
impl DeviceDirectory for FileDefinitions {
    async fn active_devices(&self) -> anyhow::Result<Vec<DeviceRecord>> {
        Ok(self.load().await?.devices)
    }
}

#[async_trait]
impl RuleProvider for FileDefinitions {
    async fn load_rules(&self) -> anyhow::Result<RuleSnapshot> {
        let definitions = self.load().await?;
        let device_names = definitions
            .devices
            .iter()
            .map(|d| (d.id.clone(), d.name.clone()))
            .collect();
        Ok(RuleSnapshot {
            rules: definitions.rules,
            device_names,
        })
    }
}

// ---------------------------------------------------------------------------
// Time-series sinks
// ---------------------------------------------------------------------------

/// Reading history as one JSON object per line, appended in arrival order.
pub struct JsonlSink {
    file: Mutex<tokio::fs::File>,
}

impl JsonlSink {
    /// Open (or create) the history file for appending.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open history file {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl TimeSeriesSink for JsonlSink {
    async fn append(&self, reading: &ReadingEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(reading)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Sink used when no history file is configured.
pub struct NullSink;

#[async_trait]
impl TimeSeriesSink for NullSink {
    async fn append(&self, _reading: &ReadingEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use poolsense_core::{DecodedValue, DeviceKind};

    const DEFINITIONS: &str = r#"{
        "devices": [
            {
                "id": "D1",
                "type": "Automatic SALT",
                "name": "Backyard pool",
                "access_token": "tok-1"
            }
        ],
        "rules": [
            {
                "id": "7f1aeab2-3c45-4f1e-9d0a-1b2c3d4e5f60",
                "name": "pH low",
                "device_id": "D1",
                "sensor": "4.182",
                "condition": "below",
                "threshold_min": 7.0,
                "cooldown_minutes": 60
            }
        ]
    }"#;

    fn reading(value: f64) -> ReadingEvent {
        ReadingEvent {
            device_id: "D1".to_string(),
            sensor: "4.182".to_string(),
            sensor_name: "pH".to_string(),
            value: DecodedValue::Number(value),
            unit: None,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn definitions_file_serves_devices_and_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poolsense.json");
        std::fs::write(&path, DEFINITIONS).unwrap();
        let definitions = FileDefinitions::new(&path);

        let devices = definitions.active_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "D1");
        assert_eq!(devices[0].kind, DeviceKind::AutomaticSalt);

        let snapshot = definitions.load_rules().await.unwrap();
        assert_eq!(snapshot.rules.len(), 1);
        assert_eq!(snapshot.rules[0].name, "pH low");
        assert_eq!(
            snapshot.device_names.get("D1").map(String::as_str),
            Some("Backyard pool")
        );
    }

    #[tokio::test]
    async fn edits_are_visible_on_the_next_pull() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poolsense.json");
        std::fs::write(&path, DEFINITIONS).unwrap();
        let definitions = FileDefinitions::new(&path);

        assert_eq!(definitions.load_rules().await.unwrap().rules.len(), 1);

        std::fs::write(&path, r#"{"devices": [], "rules": []}"#).unwrap();
        assert!(definitions.load_rules().await.unwrap().rules.is_empty());
    }

    #[tokio::test]
    async fn missing_or_malformed_definitions_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poolsense.json");
        let definitions = FileDefinitions::new(&path);

        assert!(definitions.active_devices().await.is_err());

        std::fs::write(&path, "{not json").unwrap();
        assert!(definitions.load_rules().await.is_err());
    }

    #[tokio::test]
    async fn jsonl_sink_appends_one_line_per_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");

        let sink = JsonlSink::open(&path).await.unwrap();
        sink.append(&reading(7.2)).await.unwrap();
        sink.append(&reading(7.1)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["device_id"], "D1");
        assert_eq!(first["value"], 7.2);
    }

    #[tokio::test]
    async fn reopening_the_history_keeps_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");

        let sink = JsonlSink::open(&path).await.unwrap();
        sink.append(&reading(7.2)).await.unwrap();
        drop(sink);

        let sink = JsonlSink::open(&path).await.unwrap();
        sink.append(&reading(7.1)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
