use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::time::Instant;

use crate::broadcast::{Dispatch, OutboundEvent};
use crate::density::DensityAggregator;
use crate::error::{GraphError, LookupError};
use crate::participants::{Learned, ParticipantRegistry};
use crate::pulse::expr::Scope;
use crate::pulse::{PulseTimer, Step};
use crate::score::{ScoreGraph, ScoreSource};
use crate::settings::Settings;
use crate::signal::{Parameter, Subchannel};

/// The knobs a session needs, taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub participants: Vec<String>,
    pub max_activity: u32,
    pub activity_threshold: f64,
    pub rest: Duration,
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            participants: settings.participants.clone(),
            max_activity: settings.max_activity,
            activity_threshold: settings.activity_threshold,
            rest: Duration::from_millis(settings.rest_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSnapshot {
    pub id: String,
    pub endpoint: Option<SocketAddr>,
    pub activity: u32,
    pub latest_post: f64,
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub score: Option<String>,
    pub node: Option<String>,
    pub density: f64,
    pub pulse_armed: bool,
    /// Triggers emitted since the current node was entered.
    pub triggers: u64,
    pub participants: Vec<ParticipantSnapshot>,
}

/// All mutable controller state. Owned by exactly one task.
pub struct Session {
    config: SessionConfig,
    registry: ParticipantRegistry,
    aggregator: DensityAggregator,
    graph: Option<Arc<ScoreGraph>>,
    current: Option<String>,
    entered_at: Instant,
    density: f64,
    announced_density: f64,
    pulse: Option<PulseTimer>,
    rng: StdRng,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: SessionConfig, rng: StdRng) -> Self {
        Self {
            registry: ParticipantRegistry::new(&config.participants, config.max_activity),
            aggregator: DensityAggregator::new(config.activity_threshold),
            config,
            graph: None,
            current: None,
            entered_at: Instant::now(),
            density: 0.0,
            announced_density: 0.0,
            pulse: None,
            rng,
        }
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn graph(&self) -> Option<&ScoreGraph> {
        self.graph.as_deref()
    }

    pub fn current_node(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn pulse(&self) -> Option<&PulseTimer> {
        self.pulse.as_ref()
    }

    pub fn pulse_deadline(&self) -> Option<Instant> {
        self.pulse.as_ref().map(|p| p.deadline)
    }

    /// Clear every participant, reload the score and enter its start node.
    ///
    /// A missing or incomplete score leaves the session without a node. An
    /// unresolvable start node is an error.
    pub fn reset(
        &mut self,
        source: &dyn ScoreSource,
        now: Instant,
    ) -> Result<Vec<Dispatch>, GraphError> {
        self.halt();
        self.registry.reset();
        self.density = 0.0;
        self.announced_density = 0.0;
        self.graph = None;

        let definition = match source.load() {
            Ok(Some(definition)) => definition,
            Ok(None) => {
                log::warn!("No score configured");
                return Ok(Vec::new());
            }
            Err(e) => {
                log::warn!("No valid score read from {}: {e}", source.describe());
                return Ok(Vec::new());
            }
        };

        let Some(graph) = ScoreGraph::from_definition(&definition) else {
            log::warn!("No valid score read or found in {}", source.describe());
            return Ok(Vec::new());
        };

        log::info!("Load score \"{}\" with {} nodes", graph.name, graph.len());
        graph.report();
        let start = graph.start.clone();
        self.graph = Some(Arc::new(graph));
        self.enter_node(&start, now)
    }

    /// Stop the pulse and forget the current node.
    pub fn halt(&mut self) {
        self.pulse = None;
        self.current = None;
    }

    /// Make `name` the current node. Any running pulse is cancelled first.
    pub fn enter_node(&mut self, name: &str, now: Instant) -> Result<Vec<Dispatch>, GraphError> {
        let graph = self
            .graph
            .clone()
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        let node = graph.node(name)?;
        node.edges()?;

        self.pulse = None;
        self.current = Some(name.to_string());
        self.entered_at = now;

        if let Some(pulse) = &node.pulse {
            let rest = self.config.rest;
            let first = pulse.step(|| self.scope(now), rest);
            self.pulse = Some(PulseTimer::arm(pulse.clone(), now, first));
        }

        log::info!("Enter node \"{name}\"");
        Ok(vec![Dispatch::everyone(OutboundEvent::node(name))])
    }

    /// One analysis period: activity and density. Call [`Session::advance`] next.
    pub fn analyse(&mut self) -> Vec<Dispatch> {
        let report = self.aggregator.tick(&mut self.registry);
        self.density = report.density;

        let mut out: Vec<Dispatch> = report
            .onsets()
            .map(|id| Dispatch::everyone(OutboundEvent::onset(id)))
            .collect();

        if self.density > 0.0 {
            log::debug!("Set density to {}", self.density);
            out.push(Dispatch::everyone(OutboundEvent::density(self.density)));
        } else if self.announced_density > 0.0 {
            out.push(Dispatch::everyone(OutboundEvent::density(0.0)));
        }
        self.announced_density = self.density;
        out
    }

    /// Take at most one transition for the current density.
    pub fn advance(&mut self, now: Instant) -> Result<Vec<Dispatch>, GraphError> {
        match self.next_node()? {
            Some(target) => self.enter_node(&target, now),
            None => Ok(Vec::new()),
        }
    }

    /// Target of the first edge of the current node whose range holds the density.
    fn next_node(&self) -> Result<Option<String>, GraphError> {
        let (Some(graph), Some(current)) = (&self.graph, &self.current) else {
            return Ok(None);
        };
        let node = graph.node(current)?;
        Ok(node.select(self.density).map(|edge| edge.target.clone()))
    }

    /// Fire the pulse if its deadline has passed, and re-arm it.
    pub fn fire_pulse(&mut self, now: Instant) -> Vec<Dispatch> {
        let Some(timer) = &self.pulse else {
            return Vec::new();
        };
        if timer.deadline > now {
            return Vec::new();
        }

        let pulse = timer.pulse.clone();
        let rest = self.config.rest;
        let step: Step = pulse.step(|| self.scope(now), rest);
        if let Some(timer) = self.pulse.as_mut() {
            timer.reschedule(now, step);
        }

        if step.emit {
            vec![Dispatch::everyone(OutboundEvent::trigger())]
        } else {
            Vec::new()
        }
    }

    /// Buffer a sample and echo it back out.
    pub fn record(
        &mut self,
        id: &str,
        parameter: &str,
        subchannel: &str,
        value: f64,
    ) -> Result<Vec<Dispatch>, LookupError> {
        let parameter: Parameter = parameter.parse()?;
        let subchannel: Subchannel = subchannel.parse()?;
        self.registry.get_mut(id)?.record(parameter, subchannel, value)?;
        Ok(vec![Dispatch::everyone(OutboundEvent::echo(
            id, parameter, subchannel, value,
        ))])
    }

    /// Note the sender of a message addressed under `id`. A newly learned
    /// participant is told the current node right away.
    pub fn learn(&mut self, id: &str, from: SocketAddr) -> Vec<Dispatch> {
        match self.registry.learn(id, from) {
            Learned::New(endpoint) => {
                log::info!("Found participant \"{id}\" at {endpoint}");
                self.current
                    .as_deref()
                    .map(|node| vec![Dispatch::to(endpoint, OutboundEvent::node(node))])
                    .unwrap_or_default()
            }
            Learned::Known | Learned::Stranger => Vec::new(),
        }
    }

    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.registry.endpoints()
    }

    fn scope(&mut self, now: Instant) -> Scope {
        Scope {
            elapsed: now.saturating_duration_since(self.entered_at).as_secs_f64(),
            density: self.density,
            random: self.rng.gen::<f64>(),
            participants: self
                .registry
                .iter()
                .map(|p| (p.id.clone(), p.latest_post()))
                .collect(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            score: self.graph.as_ref().map(|g| g.name.clone()),
            node: self.current.clone(),
            density: self.density,
            pulse_armed: self.pulse.is_some(),
            triggers: self.pulse.as_ref().map_or(0, |p| p.fired),
            participants: self
                .registry
                .iter()
                .map(|p| ParticipantSnapshot {
                    id: p.id.clone(),
                    endpoint: p.endpoint(),
                    activity: p.activity.level(),
                    latest_post: p.latest_post(),
                    last_message: p.last_message().map(|t| t.to_rfc3339()),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{ScoreDefinition, StaticScoreSource};
    use serde_json::json;

    fn config() -> SessionConfig {
        SessionConfig {
            participants: vec!["sam".into(), "andreas".into()],
            max_activity: 4,
            activity_threshold: 0.1,
            rest: Duration::from_millis(10),
        }
    }

    fn source(value: serde_json::Value) -> StaticScoreSource {
        let def: ScoreDefinition = serde_json::from_value(value).unwrap();
        StaticScoreSource::new(Some(def))
    }

    fn score() -> StaticScoreSource {
        source(json!({
            "name": "evening",
            "start": "calm",
            "nodes": {
                "calm": { "edges": [
                    { "node": "a", "threshold": [0.1, 0.3] },
                    { "node": "b", "threshold": [0.2, 0.5] }
                ] },
                "a": { "pulse": 100, "edges": [ { "node": "quiet", "threshold": [0, 0] } ] },
                "b": { "edges": [] },
                "quiet": { "edges": [] },
                "drift": { "pulse": "density * 1000", "edges": [] },
                "broken": { "edges": [ { "node": "ghost", "threshold": [0, 1] } ] },
                "stub": {}
            }
        }))
    }

    fn session() -> (Session, Instant) {
        let mut session = Session::with_rng(config(), StdRng::seed_from_u64(7));
        let now = Instant::now();
        session.reset(&score(), now).unwrap();
        (session, now)
    }

    fn tick(session: &mut Session, now: Instant) -> Vec<Dispatch> {
        let mut out = session.analyse();
        out.extend(session.advance(now).unwrap());
        out
    }

    fn addresses(dispatches: &[Dispatch]) -> Vec<String> {
        dispatches
            .iter()
            .map(|d| d.event.address(osc::Framing::Relative))
            .collect()
    }

    #[test]
    fn reset_enters_start_node() {
        let mut session = Session::new(config());
        let out = session.reset(&score(), Instant::now()).unwrap();
        assert_eq!(session.current_node(), Some("calm"));
        assert_eq!(out, vec![Dispatch::everyone(OutboundEvent::node("calm"))]);
    }

    #[test]
    fn reset_clears_activity_and_endpoints() {
        let (mut session, now) = session();
        session.learn("sam", "127.0.0.1:5000".parse().unwrap());
        session.record("sam", "volume", "post", 0.5).unwrap();
        tick(&mut session, now);
        assert!(session.registry().total_activity() > 0);

        let out = session.reset(&score(), now).unwrap();
        assert_eq!(session.registry().total_activity(), 0);
        assert!(session.endpoints().is_empty());
        assert_eq!(addresses(&out), vec!["brain/node"]);
        assert_eq!(session.current_node(), Some("calm"));
    }

    #[test]
    fn missing_score_is_not_fatal() {
        let mut session = Session::new(config());
        let out = session
            .reset(&StaticScoreSource::new(None), Instant::now())
            .unwrap();
        assert!(out.is_empty());
        assert!(session.current_node().is_none());

        let incomplete = source(json!({ "name": "x" }));
        assert!(session.reset(&incomplete, Instant::now()).unwrap().is_empty());
        assert!(session.graph().is_none());
    }

    #[test]
    fn unknown_start_node_is_fatal() {
        let mut session = Session::new(config());
        let bad = source(json!({ "name": "x", "start": "nope", "nodes": { "a": { "edges": [] } } }));
        assert_eq!(
            session.reset(&bad, Instant::now()).unwrap_err(),
            GraphError::UnknownNode("nope".into())
        );
    }

    #[test]
    fn entering_edgeless_node_is_fatal_and_keeps_state() {
        let (mut session, now) = session();
        assert_eq!(
            session.enter_node("stub", now).unwrap_err(),
            GraphError::MissingEdges("stub".into())
        );
        assert_eq!(session.current_node(), Some("calm"));
    }

    #[test]
    fn sam_charges_and_density_is_announced() {
        let (mut session, now) = session();
        session.record("sam", "volume", "post", 0.5).unwrap();
        let out = tick(&mut session, now);
        assert_eq!(session.registry().get("sam").unwrap().activity.level(), 1);
        let density = out
            .iter()
            .find(|d| d.event == OutboundEvent::density(session.density()))
            .expect("density broadcast");
        assert!(density.event.value.as_ref().unwrap().as_f64().unwrap() > 0.0);
    }

    #[test]
    fn silent_tick_announces_nothing() {
        let (mut session, now) = session();
        assert!(tick(&mut session, now).is_empty());
    }

    #[test]
    fn density_returning_to_zero_is_announced_once() {
        let (mut session, now) = session();
        session.enter_node("b", now).unwrap();
        session.record("sam", "volume", "post", 0.5).unwrap();
        tick(&mut session, now);
        let out = tick(&mut session, now);
        assert_eq!(out, vec![Dispatch::everyone(OutboundEvent::density(0.0))]);
        assert!(tick(&mut session, now).is_empty());
    }

    #[test]
    fn first_matching_edge_is_taken() {
        let (mut session, now) = session();
        // two participants, max 4: one charge is 0.125
        session.record("sam", "volume", "post", 1.0).unwrap();
        tick(&mut session, now);
        assert_eq!(session.current_node(), Some("a"));

        let (mut session, now) = self::session();
        session.record("sam", "volume", "post", 1.0).unwrap();
        session.record("andreas", "volume", "post", 1.0).unwrap();
        tick(&mut session, now);
        assert_eq!(session.density(), 0.25);
        assert_eq!(session.current_node(), Some("a"));
    }

    #[test]
    fn no_matching_edge_stays_put() {
        let (mut session, now) = session();
        let out = tick(&mut session, now);
        assert!(out.is_empty());
        assert_eq!(session.current_node(), Some("calm"));
    }

    #[test]
    fn transition_to_missing_node_is_an_error() {
        let (mut session, now) = session();
        session.enter_node("broken", now).unwrap();
        assert!(session.analyse().is_empty());
        assert_eq!(
            session.advance(now).unwrap_err(),
            GraphError::UnknownNode("ghost".into())
        );
    }

    #[test]
    fn failed_transition_keeps_the_density_announcement() {
        let (mut session, now) = session();
        session.enter_node("broken", now).unwrap();
        session.record("sam", "volume", "post", 1.0).unwrap();
        session.record("andreas", "volume", "pre", 1.0).unwrap();

        let out = session.analyse();
        assert_eq!(
            out,
            vec![
                Dispatch::everyone(OutboundEvent::onset("andreas")),
                Dispatch::everyone(OutboundEvent::density(0.125)),
            ]
        );
        assert!(session.advance(now).is_err());
        assert_eq!(session.density(), 0.125);
    }

    #[test]
    fn entering_a_node_cancels_the_previous_pulse() {
        let (mut session, now) = session();
        session.enter_node("a", now).unwrap();
        assert_eq!(
            session.pulse_deadline(),
            Some(now + Duration::from_millis(100))
        );
        session.enter_node("b", now).unwrap();
        assert!(session.pulse().is_none());
        assert!(session
            .fire_pulse(now + Duration::from_secs(10))
            .is_empty());
    }

    #[test]
    fn fixed_pulse_fires_and_rearms() {
        let (mut session, now) = session();
        session.enter_node("a", now).unwrap();
        assert!(session.fire_pulse(now + Duration::from_millis(50)).is_empty());

        let at = now + Duration::from_millis(100);
        assert_eq!(addresses(&session.fire_pulse(at)), vec!["brain/trigger"]);
        assert_eq!(session.pulse_deadline(), Some(at + Duration::from_millis(100)));
        assert_eq!(session.pulse().unwrap().fired, 1);
    }

    #[test]
    fn expression_pulse_rests_at_zero_delay() {
        let (mut session, now) = session();
        session.enter_node("drift", now).unwrap();
        // density is 0 -> delay 0 -> rest interval, no trigger
        assert_eq!(session.pulse_deadline(), Some(now + Duration::from_millis(10)));
        let at = now + Duration::from_millis(10);
        assert!(session.fire_pulse(at).is_empty());
        assert_eq!(session.pulse_deadline(), Some(at + Duration::from_millis(10)));
    }

    #[test]
    fn expression_pulse_follows_density() {
        let (mut session, now) = session();
        session.enter_node("drift", now).unwrap();
        session.record("sam", "volume", "post", 1.0).unwrap();
        tick(&mut session, now);
        assert_eq!(session.density(), 0.125);

        let at = now + Duration::from_millis(10);
        assert_eq!(addresses(&session.fire_pulse(at)), vec!["brain/trigger"]);
        assert_eq!(session.pulse_deadline(), Some(at + Duration::from_millis(125)));
    }

    #[test]
    fn unknown_participant_changes_nothing() {
        let (mut session, _) = session();
        let before = session.snapshot();
        assert_eq!(
            session.record("bob", "volume", "post", 0.5).unwrap_err(),
            LookupError::UnknownParticipant("bob".into())
        );
        let after = session.snapshot();
        assert_eq!(
            serde_json::to_value(&before).unwrap(),
            serde_json::to_value(&after).unwrap()
        );
    }

    #[test]
    fn record_echoes_sample() {
        let (mut session, _) = session();
        let out = session.record("sam", "volume", "post", 0.5).unwrap();
        assert_eq!(addresses(&out), vec!["sam/out/volume/post"]);
    }

    #[test]
    fn new_participant_is_told_the_current_node() {
        let (mut session, _) = session();
        let from: SocketAddr = "10.0.0.5:5000".parse().unwrap();
        let out = session.learn("sam", from);
        assert_eq!(out, vec![Dispatch::to(from, OutboundEvent::node("calm"))]);
        assert!(session.learn("sam", "10.0.0.6:5000".parse().unwrap()).is_empty());
        assert!(session.learn("bob", from).is_empty());
    }

    #[test]
    fn pre_channel_onset_is_broadcast() {
        let (mut session, now) = session();
        session.record("andreas", "volume", "pre", 0.9).unwrap();
        let out = tick(&mut session, now);
        assert_eq!(out, vec![Dispatch::everyone(OutboundEvent::onset("andreas"))]);
        assert_eq!(session.registry().total_activity(), 0);
    }
}
