//! # Temporal Smoothing
//!
//! Revises the raw per-epoch classification into a physiologically
//! plausible stage sequence. Real hypnograms do not flicker between stages
//! every 30 seconds, and some jumps (straight from Wake into deep N3) are
//! rare enough that a single epoch of weak evidence should not produce them.
//!
//! ## Approach:
//! A Viterbi dynamic program over the five-stage alphabet. Each candidate
//! sequence is priced as the sum of per-epoch negative log-probability and
//! a fixed transition-penalty term; the forward pass accumulates the
//! cheapest cost of ending each epoch in each stage, the backward pass
//! reconstructs the globally optimal path. This is deterministic and
//! globally optimal, unlike a greedy local fix. Cost ties are broken
//! toward the stage with the higher raw epoch probability.
//!
//! A final de-flicker pass applies the minimum-dwell rule: an isolated
//! single-epoch stage flanked by the same stage on both sides is folded
//! into its neighbors unless the classifier backed it with a
//! high-confidence margin.
//!
//! ## State machine view:
//! States are the five stage labels; the transition costs form a fixed
//! penalty matrix with a zero diagonal; the initial distribution favors
//! Wake (people are normally awake when they start a recording); the
//! terminal state is whatever the last epoch resolves to.

use crate::config::SmootherConfig;
use crate::staging::stage::{SleepStage, StageProbability, STAGE_COUNT};

/// Probabilities are floored here before taking logs, so a zero entry
/// costs a lot without becoming infinite.
const MIN_PROBABILITY: f64 = 1e-9;

/// Two costs within this of each other count as tied.
const COST_EPSILON: f64 = 1e-12;

/// Unscaled transition penalties, indexed `[from][to]` in stage order
/// (Wake, N1, N2, N3, REM). Diagonal zero; cross-stage values follow
/// physiological plausibility: descending one stage at a time is cheap,
/// skipping straight from Wake into N3 (or bouncing between N3 and REM)
/// is priced highest.
const BASE_PENALTIES: [[f64; STAGE_COUNT]; STAGE_COUNT] = [
    // from Wake
    [0.0, 0.4, 1.2, 3.0, 2.0],
    // from N1
    [0.3, 0.0, 0.3, 1.5, 1.0],
    // from N2
    [0.6, 0.5, 0.0, 0.4, 0.8],
    // from N3
    [1.2, 1.0, 0.3, 0.0, 2.5],
    // from REM
    [0.5, 0.6, 0.8, 2.5, 0.0],
];

/// The scaled transition cost table used by one smoothing run.
#[derive(Debug, Clone)]
pub struct TransitionMatrix {
    penalties: [[f64; STAGE_COUNT]; STAGE_COUNT],
}

impl TransitionMatrix {
    /// The physiological table, scaled. A scale of 0 disables transition
    /// smoothing entirely (the Viterbi path degenerates to per-epoch argmax).
    pub fn physiological(scale: f64) -> Self {
        let mut penalties = BASE_PENALTIES;
        for row in &mut penalties {
            for cell in row {
                *cell *= scale;
            }
        }
        Self { penalties }
    }

    pub fn penalty(&self, from: SleepStage, to: SleepStage) -> f64 {
        self.penalties[from.index()][to.index()]
    }
}

/// Smooths one night's probability sequence into final stage labels.
pub struct TemporalSmoother {
    transitions: TransitionMatrix,
    high_confidence_margin: f64,
    wake_start_cost: f64,
}

impl TemporalSmoother {
    pub fn new(config: &SmootherConfig) -> Self {
        Self {
            transitions: TransitionMatrix::physiological(config.penalty_scale),
            high_confidence_margin: config.high_confidence_margin,
            wake_start_cost: config.wake_start_cost,
        }
    }

    /// Produce the final stage sequence for an ordered probability sequence.
    ///
    /// Deterministic: identical input always yields an identical sequence.
    pub fn smooth(&self, probabilities: &[StageProbability]) -> Vec<SleepStage> {
        if probabilities.is_empty() {
            return Vec::new();
        }

        let path = self.viterbi(probabilities);
        self.deflicker(path, probabilities)
    }

    /// Forward cost accumulation and backward path reconstruction.
    fn viterbi(&self, probabilities: &[StageProbability]) -> Vec<SleepStage> {
        let n = probabilities.len();

        // cost[s]: cheapest total cost of any sequence ending in stage s
        let mut cost = [0.0; STAGE_COUNT];
        for (s, slot) in cost.iter_mut().enumerate() {
            *slot = emission(&probabilities[0], s)
                + if s == SleepStage::Wake.index() { 0.0 } else { self.wake_start_cost };
        }

        let mut backpointers: Vec<[usize; STAGE_COUNT]> = Vec::with_capacity(n);

        for t in 1..n {
            let mut next = [0.0; STAGE_COUNT];
            let mut back = [0; STAGE_COUNT];
            let prev_probs = probabilities[t - 1].values();

            for s in 0..STAGE_COUNT {
                let mut best_prev = 0;
                let mut best_cost = cost[0] + self.penalties_by_index(0, s);

                for p in 1..STAGE_COUNT {
                    let candidate = cost[p] + self.penalties_by_index(p, s);
                    if candidate < best_cost - COST_EPSILON {
                        best_cost = candidate;
                        best_prev = p;
                    } else if (candidate - best_cost).abs() <= COST_EPSILON
                        && prev_probs[p] > prev_probs[best_prev]
                    {
                        // Tied costs resolve toward the stage the classifier
                        // actually believed in more
                        best_prev = p;
                    }
                }

                next[s] = best_cost + emission(&probabilities[t], s);
                back[s] = best_prev;
            }

            cost = next;
            backpointers.push(back);
        }

        // Terminal state: cheapest total, ties toward the higher raw
        // probability of the last epoch
        let last_probs = probabilities[n - 1].values();
        let mut terminal = 0;
        for s in 1..STAGE_COUNT {
            if cost[s] < cost[terminal] - COST_EPSILON {
                terminal = s;
            } else if (cost[s] - cost[terminal]).abs() <= COST_EPSILON
                && last_probs[s] > last_probs[terminal]
            {
                terminal = s;
            }
        }

        let mut indices = vec![0; n];
        indices[n - 1] = terminal;
        for t in (1..n).rev() {
            indices[t - 1] = backpointers[t - 1][indices[t]];
        }

        indices
            .into_iter()
            .map(|i| SleepStage::from_index(i).unwrap_or(SleepStage::Wake))
            .collect()
    }

    /// Minimum-dwell cleanup: fold isolated single-epoch stages into their
    /// surroundings unless the classifier was confidently behind them.
    fn deflicker(
        &self,
        mut path: Vec<SleepStage>,
        probabilities: &[StageProbability],
    ) -> Vec<SleepStage> {
        if path.len() < 3 {
            return path;
        }

        for i in 1..path.len() - 1 {
            let neighbor = path[i - 1];
            if neighbor != path[i + 1] || path[i] == neighbor {
                continue;
            }

            let margin =
                probabilities[i].get(path[i]) - probabilities[i].get(neighbor);
            if margin <= self.high_confidence_margin {
                path[i] = neighbor;
            }
        }

        path
    }

    fn penalties_by_index(&self, from: usize, to: usize) -> f64 {
        self.transitions.penalties[from][to]
    }
}

/// Negative log-probability of stage index `s` for one epoch.
fn emission(probability: &StageProbability, s: usize) -> f64 {
    -probability.values()[s].max(MIN_PROBABILITY).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, SmootherConfig};
    use crate::staging::stage::SleepStage::*;

    fn smoother() -> TemporalSmoother {
        TemporalSmoother::new(&AppConfig::default().smoother)
    }

    /// Smoother with transition penalties disabled, so Viterbi degenerates
    /// to per-epoch argmax and only the de-flicker rule acts.
    fn argmax_smoother(high_confidence_margin: f64) -> TemporalSmoother {
        TemporalSmoother::new(&SmootherConfig {
            penalty_scale: 0.0,
            high_confidence_margin,
            wake_start_cost: 0.0,
        })
    }

    fn prob(wake: f64, n1: f64, n2: f64, n3: f64, rem: f64) -> StageProbability {
        StageProbability::new([wake, n1, n2, n3, rem])
    }

    fn mostly(stage: SleepStage, p: f64) -> StageProbability {
        let rest = (1.0 - p) / 4.0;
        let mut values = [rest; STAGE_COUNT];
        values[stage.index()] = p;
        StageProbability::new(values)
    }

    #[test]
    fn test_empty_and_single_epoch() {
        assert!(smoother().smooth(&[]).is_empty());
        assert_eq!(smoother().smooth(&[mostly(N2, 0.9)]), vec![N2]);
    }

    #[test]
    fn test_initial_distribution_favors_wake() {
        // A perfectly uninformative first epoch resolves to Wake
        let uniform = StageProbability::new([0.2; STAGE_COUNT]);
        assert_eq!(smoother().smooth(&[uniform]), vec![Wake]);
    }

    #[test]
    fn test_low_confidence_flicker_is_folded() {
        // [Wake, Wake, N2, Wake, N2, N2] with a weak isolated Wake
        let seq = [
            mostly(Wake, 0.9),
            mostly(Wake, 0.9),
            mostly(N2, 0.9),
            prob(0.52, 0.0, 0.48, 0.0, 0.0),
            mostly(N2, 0.9),
            mostly(N2, 0.9),
        ];
        let smoothed = argmax_smoother(0.35).smooth(&seq);
        assert_eq!(smoothed, vec![Wake, Wake, N2, N2, N2, N2]);
    }

    #[test]
    fn test_high_confidence_flicker_is_preserved() {
        let seq = [
            mostly(Wake, 0.9),
            mostly(Wake, 0.9),
            mostly(N2, 0.9),
            prob(0.95, 0.0, 0.03, 0.01, 0.01),
            mostly(N2, 0.9),
            mostly(N2, 0.9),
        ];
        let smoothed = argmax_smoother(0.35).smooth(&seq);
        assert_eq!(smoothed, vec![Wake, Wake, N2, Wake, N2, N2]);
    }

    #[test]
    fn test_weak_stage_blip_absorbed_by_transition_cost() {
        // One epoch leans N3 (0.45 vs 0.40) inside a stable N2 run; the
        // N2→N3→N2 round trip costs more than it saves
        let mut seq = vec![mostly(N2, 0.6); 6];
        seq[3] = prob(0.03, 0.06, 0.40, 0.45, 0.06);

        let smoothed = smoother().smooth(&seq);
        assert_eq!(smoothed, vec![N2; 6]);
    }

    #[test]
    fn test_implausible_jump_reroutes_to_plausible_stage() {
        // After solid Wake, an epoch weakly prefers N3 over N1. The direct
        // Wake→N3 jump is priced high enough that N1 wins.
        let seq = [mostly(Wake, 0.9), prob(0.05, 0.35, 0.1, 0.40, 0.1)];
        let smoothed = smoother().smooth(&seq);
        assert_eq!(smoothed, vec![Wake, N1]);
    }

    #[test]
    fn test_strong_evidence_overrides_transition_cost() {
        // Overwhelming N3 evidence goes through even from Wake
        let seq = [mostly(Wake, 0.9), mostly(N3, 0.99)];
        let smoothed = smoother().smooth(&seq);
        assert_eq!(smoothed, vec![Wake, N3]);
    }

    #[test]
    fn test_smoothing_is_deterministic() {
        let seq: Vec<StageProbability> = (0..100)
            .map(|i| match i % 7 {
                0 => mostly(Wake, 0.5),
                1 | 2 => mostly(N1, 0.45),
                3 | 4 => mostly(N2, 0.6),
                5 => mostly(N3, 0.5),
                _ => mostly(Rem, 0.55),
            })
            .collect();

        let a = smoother().smooth(&seq);
        let b = smoother().smooth(&seq);
        assert_eq!(a, b);
    }

    #[test]
    fn test_transition_matrix_diagonal_is_zero() {
        let matrix = TransitionMatrix::physiological(1.0);
        for stage in SleepStage::ALL {
            assert_eq!(matrix.penalty(stage, stage), 0.0);
        }
        // Scale passes through linearly
        let doubled = TransitionMatrix::physiological(2.0);
        assert_eq!(doubled.penalty(Wake, N3), 2.0 * matrix.penalty(Wake, N3));
    }

    #[test]
    fn test_zero_probability_does_not_panic() {
        let seq = [prob(1.0, 0.0, 0.0, 0.0, 0.0), prob(0.0, 0.0, 1.0, 0.0, 0.0)];
        let smoothed = smoother().smooth(&seq);
        assert_eq!(smoothed, vec![Wake, N2]);
    }
}
