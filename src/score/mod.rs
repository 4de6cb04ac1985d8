pub mod graph;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ScoreError;

pub use graph::{Edge, Node, ScoreGraph};

/// A score as stored on disk.
///
/// Every field is optional here so a structurally incomplete file can be
/// reported instead of failing to parse.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ScoreDefinition {
    pub name: Option<String>,
    pub start: Option<String>,
    pub nodes: Option<BTreeMap<String, NodeDefinition>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct NodeDefinition {
    #[serde(default, alias = "frequency", skip_serializing_if = "Option::is_none")]
    pub pulse: Option<PulseDefinition>,
    #[serde(default, alias = "connections")]
    pub edges: Option<Vec<EdgeDefinition>>,
}

/// Either a period in milliseconds or an expression yielding the next delay.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum PulseDefinition {
    Period(f64),
    Expression(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EdgeDefinition {
    pub node: String,
    #[serde(alias = "treshold")]
    pub threshold: ThresholdDefinition,
}

/// `[low, high]`, or a bare lower bound meaning `[low, 1]`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(untagged)]
pub enum ThresholdDefinition {
    Range([f64; 2]),
    Floor(f64),
}

impl ThresholdDefinition {
    pub fn bounds(self) -> (f64, f64) {
        match self {
            ThresholdDefinition::Range([low, high]) => (low, high),
            ThresholdDefinition::Floor(low) => (low, 1.0),
        }
    }
}

/// The parts of a definition that must be present for a score to load.
pub struct ValidDefinition<'a> {
    pub name: &'a str,
    pub start: &'a str,
    pub nodes: &'a BTreeMap<String, NodeDefinition>,
}

impl ScoreDefinition {
    pub fn from_json(text: &str) -> Result<Self, ScoreError> {
        Ok(serde_json::from_str(text)?)
    }

    /// `None` when name, start or nodes is missing.
    pub fn validate(&self) -> Option<ValidDefinition<'_>> {
        Some(ValidDefinition {
            name: self.name.as_deref()?,
            start: self.start.as_deref()?,
            nodes: self.nodes.as_ref()?,
        })
    }
}

/// Where the controller gets its score from. Called on every reset.
pub trait ScoreSource: Send + Sync {
    /// `Ok(None)` means there is deliberately no score.
    fn load(&self) -> Result<Option<ScoreDefinition>, ScoreError>;

    /// Human-readable origin for log lines.
    fn describe(&self) -> String;
}

/// Reads a JSON score from disk each time it is loaded.
#[derive(Debug, Clone)]
pub struct FileScoreSource {
    path: PathBuf,
}

impl FileScoreSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScoreSource for FileScoreSource {
    fn load(&self) -> Result<Option<ScoreDefinition>, ScoreError> {
        let text = std::fs::read_to_string(&self.path)?;
        ScoreDefinition::from_json(&text).map(Some)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A score held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticScoreSource {
    definition: Option<ScoreDefinition>,
}

impl StaticScoreSource {
    pub fn new(definition: Option<ScoreDefinition>) -> Self {
        Self { definition }
    }
}

impl ScoreSource for StaticScoreSource {
    fn load(&self) -> Result<Option<ScoreDefinition>, ScoreError> {
        Ok(self.definition.clone())
    }

    fn describe(&self) -> String {
        "in-memory score".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCORE: &str = r#"{
        "name": "evening",
        "start": "calm",
        "nodes": {
            "calm": { "edges": [ { "node": "storm", "threshold": [0.5, 1.0] } ] },
            "storm": {
                "pulse": 250,
                "edges": [ { "node": "calm", "threshold": [0, 0.2] } ]
            },
            "drift": { "pulse": "1000 * (1 - density)", "edges": [] }
        }
    }"#;

    #[test]
    fn parses_score_shape() {
        let def = ScoreDefinition::from_json(SCORE).unwrap();
        let valid = def.validate().expect("complete score");
        assert_eq!(valid.name, "evening");
        assert_eq!(valid.start, "calm");
        assert_eq!(valid.nodes.len(), 3);
        assert_eq!(
            valid.nodes["storm"].pulse,
            Some(PulseDefinition::Period(250.0))
        );
        assert_eq!(
            valid.nodes["drift"].pulse,
            Some(PulseDefinition::Expression("1000 * (1 - density)".into()))
        );
    }

    #[test]
    fn accepts_legacy_spellings() {
        let def = ScoreDefinition::from_json(
            r#"{
                "name": "old",
                "start": "a",
                "nodes": {
                    "a": { "frequency": 500, "connections": [ { "node": "b", "treshold": 0.4 } ] },
                    "b": { "connections": [] }
                }
            }"#,
        )
        .unwrap();
        let nodes = def.nodes.unwrap();
        let edges = nodes["a"].edges.as_ref().unwrap();
        assert_eq!(edges[0].threshold.bounds(), (0.4, 1.0));
        assert_eq!(nodes["a"].pulse, Some(PulseDefinition::Period(500.0)));
    }

    #[test]
    fn missing_fields_fail_validation_not_parsing() {
        let def = ScoreDefinition::from_json(r#"{ "name": "x", "nodes": {} }"#).unwrap();
        assert!(def.validate().is_none());
        let def = ScoreDefinition::from_json(r#"{ "start": "a", "nodes": {} }"#).unwrap();
        assert!(def.validate().is_none());
    }

    #[test]
    fn node_without_edges_parses() {
        let def = ScoreDefinition::from_json(
            r#"{ "name": "x", "start": "a", "nodes": { "a": {} } }"#,
        )
        .unwrap();
        assert!(def.nodes.unwrap()["a"].edges.is_none());
    }

    #[test]
    fn file_source_reads_fresh_each_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{SCORE}").unwrap();
        let source = FileScoreSource::new(file.path());
        let first = source.load().unwrap().unwrap();
        assert_eq!(first.name.as_deref(), Some("evening"));

        std::fs::write(
            file.path(),
            r#"{ "name": "late", "start": "a", "nodes": { "a": { "edges": [] } } }"#,
        )
        .unwrap();
        let second = source.load().unwrap().unwrap();
        assert_eq!(second.name.as_deref(), Some("late"));
    }

    #[test]
    fn file_source_reports_errors() {
        let source = FileScoreSource::new("/definitely/not/here/score.json");
        assert!(matches!(source.load(), Err(ScoreError::Io(_))));

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{ not json").unwrap();
        let source = FileScoreSource::new(file.path());
        assert!(matches!(source.load(), Err(ScoreError::Json(_))));
    }
}
