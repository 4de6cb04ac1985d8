use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BrainError;
use crate::pulse::expr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub bind_address: IpAddr,
    pub udp_port: u16,
    /// Port participant devices listen on. 0 replies to whatever port they sent from.
    pub participant_port: u16,
    pub visualization_port: Option<u16>,
    pub score_path: PathBuf,
    pub participants: Vec<String>,
    pub analysis_interval_ms: u64,
    pub max_activity: u32,
    pub activity_threshold: f64,
    pub rest_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: 41234,
            participant_port: 7400,
            visualization_port: Some(9090),
            score_path: PathBuf::from("score.json"),
            participants: vec!["sam".to_string(), "andreas".to_string()],
            analysis_interval_ms: 250,
            max_activity: 20,
            activity_threshold: 0.1,
            rest_interval_ms: 10,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file. Absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, BrainError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BrainError::Settings(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| BrainError::Settings(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), BrainError> {
        if self.analysis_interval_ms == 0 {
            return Err(BrainError::Settings(
                "analysis_interval_ms must be greater than zero".into(),
            ));
        }
        if self.rest_interval_ms == 0 {
            return Err(BrainError::Settings(
                "rest_interval_ms must be greater than zero".into(),
            ));
        }
        if self.max_activity == 0 {
            return Err(BrainError::Settings(
                "max_activity must be greater than zero".into(),
            ));
        }
        if !self.activity_threshold.is_finite() {
            return Err(BrainError::Settings(
                "activity_threshold must be a finite number".into(),
            ));
        }
        if self.participants.is_empty() {
            return Err(BrainError::Settings("no participants configured".into()));
        }

        let mut seen = HashSet::new();
        for id in &self.participants {
            if !expr::is_variable_name(id) {
                return Err(BrainError::Settings(format!(
                    "participant id \"{id}\" must be an identifier and not one of {:?}",
                    expr::RESERVED
                )));
            }
            if !seen.insert(id.as_str()) {
                return Err(BrainError::Settings(format!(
                    "participant \"{id}\" is listed twice"
                )));
            }
        }
        Ok(())
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.udp_port)
    }

    pub fn visualization_addr(&self) -> Option<SocketAddr> {
        self.visualization_port
            .map(|port| SocketAddr::new(self.bind_address, port))
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.udp_addr().port(), 41234);
        assert_eq!(settings.visualization_addr().unwrap().port(), 9090);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{ "udp_port": 5000, "participants": ["ana"], "visualization_port": null }"#,
        )
        .unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.udp_port, 5000);
        assert_eq!(settings.participants, vec!["ana"]);
        assert_eq!(settings.visualization_port, None);
        assert_eq!(settings.max_activity, 20);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            Settings::load(Path::new("/no/such/brain.json")),
            Err(BrainError::Settings(_))
        ));
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            Settings { analysis_interval_ms: 0, ..Settings::default() },
            Settings { rest_interval_ms: 0, ..Settings::default() },
            Settings { max_activity: 0, ..Settings::default() },
            Settings { participants: vec![], ..Settings::default() },
            Settings { participants: vec!["sam".into(), "sam".into()], ..Settings::default() },
            Settings { participants: vec!["a/b".into()], ..Settings::default() },
            Settings { participants: vec!["sam-1".into()], ..Settings::default() },
            Settings { participants: vec!["sam".into(), "density".into()], ..Settings::default() },
            Settings { participants: vec!["random".into()], ..Settings::default() },
            Settings { activity_threshold: f64::NAN, ..Settings::default() },
        ];
        for settings in bad {
            assert!(settings.validate().is_err(), "{settings:?}");
        }
    }
}
