use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::LookupError;
use crate::signal::{Means, Parameter, SignalBuffer, Subchannel};

/// Saturating activity counter in `[0, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Activity {
    level: u32,
    max: u32,
}

impl Activity {
    pub fn new(max: u32) -> Self {
        Self { level: 0, max }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn charge(&mut self) {
        self.level = self.level.saturating_add(1).min(self.max);
    }

    pub fn uncharge(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub fn clear(&mut self) {
        self.level = 0;
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    endpoint: Option<SocketAddr>,
    last_message: Option<DateTime<Utc>>,
    signals: HashMap<Parameter, SignalBuffer>,
    pub activity: Activity,
}

impl Participant {
    pub fn new(id: impl Into<String>, max_activity: u32) -> Self {
        Self {
            id: id.into(),
            endpoint: None,
            last_message: None,
            signals: Parameter::ALL
                .iter()
                .map(|p| (*p, SignalBuffer::default()))
                .collect(),
            activity: Activity::new(max_activity),
        }
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    pub fn last_message(&self) -> Option<DateTime<Utc>> {
        self.last_message
    }

    pub fn signal(&self, parameter: Parameter) -> Option<&SignalBuffer> {
        self.signals.get(&parameter)
    }

    fn signal_mut(&mut self, parameter: Parameter) -> Result<&mut SignalBuffer, LookupError> {
        self.signals
            .get_mut(&parameter)
            .ok_or_else(|| LookupError::UnknownParameter(parameter.to_string()))
    }

    pub fn record(
        &mut self,
        parameter: Parameter,
        subchannel: Subchannel,
        value: f64,
    ) -> Result<(), LookupError> {
        self.signal_mut(parameter)?.record(subchannel, value);
        self.last_message = Some(Utc::now());
        Ok(())
    }

    pub fn drain(&mut self, parameter: Parameter) -> Result<Means, LookupError> {
        Ok(self.signal_mut(parameter)?.drain())
    }

    /// Latest emitted "post" volume value.
    pub fn latest_post(&self) -> f64 {
        self.signal(Parameter::Volume)
            .map(|s| s.last(Subchannel::Post))
            .unwrap_or(0.0)
    }

    fn reset(&mut self) {
        self.endpoint = None;
        self.last_message = None;
        for buffer in self.signals.values_mut() {
            *buffer = SignalBuffer::default();
        }
        self.activity.clear();
    }
}

/// Outcome of looking at the sender of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Learned {
    /// First message from this identity; the endpoint was recorded.
    New(SocketAddr),
    /// Endpoint was already known (possibly a different one).
    Known,
    /// The first segment is not a participant identity.
    Stranger,
}

/// The fixed set of participants for this session.
#[derive(Debug, Clone)]
pub struct ParticipantRegistry {
    // Order follows configuration so iteration is deterministic.
    participants: Vec<Participant>,
    max_activity: u32,
}

impl ParticipantRegistry {
    pub fn new<S: AsRef<str>>(ids: &[S], max_activity: u32) -> Self {
        let mut registry = Self {
            participants: Vec::new(),
            max_activity,
        };
        registry.register(ids);
        registry
    }

    /// Replace the participant set, dropping all learned endpoints and buffered state.
    pub fn register<S: AsRef<str>>(&mut self, ids: &[S]) {
        self.participants = ids
            .iter()
            .map(|id| Participant::new(id.as_ref(), self.max_activity))
            .collect();
    }

    /// Clear every participant in place.
    pub fn reset(&mut self) {
        for participant in &mut self.participants {
            participant.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn max_activity(&self) -> u32 {
        self.max_activity
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_ok()
    }

    pub fn get(&self, id: &str) -> Result<&Participant, LookupError> {
        self.participants
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| LookupError::UnknownParticipant(id.to_string()))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Participant, LookupError> {
        self.participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| LookupError::UnknownParticipant(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Participant> {
        self.participants.iter_mut()
    }

    /// Append a sample to a participant's buffer.
    pub fn record(
        &mut self,
        id: &str,
        parameter: &str,
        subchannel: &str,
        value: f64,
    ) -> Result<(), LookupError> {
        let parameter: Parameter = parameter.parse()?;
        let subchannel: Subchannel = subchannel.parse()?;
        self.get_mut(id)?.record(parameter, subchannel, value)
    }

    pub fn drain(&mut self, id: &str, parameter: Parameter) -> Result<Means, LookupError> {
        self.get_mut(id)?.drain(parameter)
    }

    /// Remember where `id` sends from, the first time only.
    pub fn learn(&mut self, id: &str, from: SocketAddr) -> Learned {
        match self.get_mut(id) {
            Ok(participant) if participant.endpoint.is_none() => {
                participant.endpoint = Some(from);
                Learned::New(from)
            }
            Ok(_) => Learned::Known,
            Err(_) => Learned::Stranger,
        }
    }

    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.participants.iter().filter_map(|p| p.endpoint).collect()
    }

    pub fn total_activity(&self) -> u64 {
        self.participants
            .iter()
            .map(|p| u64::from(p.activity.level()))
            .sum()
    }
}
