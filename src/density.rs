use serde::Serialize;

use crate::participants::ParticipantRegistry;
use crate::signal::Parameter;

/// What happened to one participant during an analysis tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantTick {
    pub id: String,
    /// The "pre" mean crossed the threshold. Never touches the counter.
    pub onset: bool,
    /// +1 on charge, -1 on uncharge (0 when already saturated).
    pub delta: i32,
    pub activity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub participants: Vec<ParticipantTick>,
    pub density: f64,
}

impl TickReport {
    pub fn onsets(&self) -> impl Iterator<Item = &str> {
        self.participants
            .iter()
            .filter(|p| p.onset)
            .map(|p| p.id.as_str())
    }
}

/// Turns buffered samples into activity and activity into density.
#[derive(Debug, Clone, Copy)]
pub struct DensityAggregator {
    pub threshold: f64,
}

impl DensityAggregator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// One analysis period. Every participant is charged or uncharged before any
    /// activity is summed.
    pub fn tick(&self, registry: &mut ParticipantRegistry) -> TickReport {
        let mut participants = Vec::with_capacity(registry.len());

        for participant in registry.iter_mut() {
            let mut onset = false;
            let before = participant.activity.level();

            for parameter in Parameter::ALL {
                let Ok(means) = participant.drain(parameter) else {
                    continue;
                };
                if means.pre >= self.threshold {
                    onset = true;
                }
                if means.post >= self.threshold {
                    participant.activity.charge();
                } else {
                    participant.activity.uncharge();
                }
            }

            let after = participant.activity.level();
            participants.push(ParticipantTick {
                id: participant.id.clone(),
                onset,
                delta: after as i32 - before as i32,
                activity: after,
            });
        }

        let density = normalize(
            registry.total_activity(),
            registry.max_activity(),
            registry.len(),
        );

        TickReport {
            participants,
            density,
        }
    }
}

/// `sum / (max * count)`, kept inside `[0, 1]`.
pub fn normalize(sum: u64, max_activity: u32, participant_count: usize) -> f64 {
    let capacity = u64::from(max_activity) * participant_count as u64;
    if capacity == 0 {
        return 0.0;
    }
    (sum as f64 / capacity as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_stays_in_unit_interval() {
        for count in 0..6usize {
            for max in 0..6u32 {
                for sum in 0..=(max as u64 * count as u64 + 3) {
                    let d = normalize(sum, max, count);
                    assert!((0.0..=1.0).contains(&d), "sum={sum} max={max} count={count}");
                }
            }
        }
        assert_eq!(normalize(u64::MAX, 1, 1), 1.0);
    }

    #[test]
    fn single_loud_sample_charges_once() {
        let mut registry = ParticipantRegistry::new(&["sam", "andreas"], 4);
        registry.record("sam", "volume", "post", 0.5).unwrap();

        let report = DensityAggregator::new(0.1).tick(&mut registry);
        assert_eq!(registry.get("sam").unwrap().activity.level(), 1);
        assert_eq!(registry.get("andreas").unwrap().activity.level(), 0);
        assert!((report.density - 1.0 / 8.0).abs() < 1e-12);
        assert_eq!(report.participants[0].delta, 1);
        assert_eq!(report.participants[1].delta, 0);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut registry = ParticipantRegistry::new(&["sam"], 4);
        registry.record("sam", "volume", "post", 0.1).unwrap();
        DensityAggregator::new(0.1).tick(&mut registry);
        assert_eq!(registry.get("sam").unwrap().activity.level(), 1);
    }

    #[test]
    fn quiet_tick_uncharges() {
        let mut registry = ParticipantRegistry::new(&["sam"], 4);
        registry.record("sam", "volume", "post", 0.9).unwrap();
        let aggregator = DensityAggregator::new(0.1);
        aggregator.tick(&mut registry);
        registry.record("sam", "volume", "post", 0.01).unwrap();
        let report = aggregator.tick(&mut registry);
        assert_eq!(report.participants[0].delta, -1);
        assert_eq!(report.density, 0.0);
    }

    #[test]
    fn pre_channel_only_notifies() {
        let mut registry = ParticipantRegistry::new(&["sam"], 4);
        registry.record("sam", "volume", "pre", 0.8).unwrap();
        let report = DensityAggregator::new(0.1).tick(&mut registry);
        assert_eq!(report.onsets().collect::<Vec<_>>(), vec!["sam"]);
        assert_eq!(registry.get("sam").unwrap().activity.level(), 0);
        assert_eq!(report.density, 0.0);
    }

    #[test]
    fn full_activity_is_density_one() {
        let mut registry = ParticipantRegistry::new(&["sam"], 2);
        let aggregator = DensityAggregator::new(0.1);
        let mut density = 0.0;
        for _ in 0..5 {
            registry.record("sam", "volume", "post", 1.0).unwrap();
            density = aggregator.tick(&mut registry).density;
        }
        assert_eq!(density, 1.0);
    }
}
