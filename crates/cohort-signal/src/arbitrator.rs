//! Signal arbitration.
//!
//! `score(side) = sum(confidence_i * style_weight_i)` over the agents voting
//! for that side. The side wins if its score exceeds `min_score` and strictly
//! exceeds the other side; the resolved confidence is
//! `min(score / voters, max_confidence)`. Anything else resolves to hold.
//!
//! A short per-symbol history of winners flags rapid opposite-direction
//! flips. The flag is informational; it never changes the result.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cohort_core::{
    AgentId, AgentSignal, Clock, PositionSide, RejectReason, Rejection, Signal, Symbol,
};

use crate::config::ArbitratorConfig;

/// Confidence handed to arbitration, or `None` if the vote is too weak.
///
/// Non-finite values are dropped; everything else is clamped into
/// `[0, max_confidence]`.
#[must_use]
pub fn normalize_confidence(raw: f64, min_confidence: f64, max_confidence: f64) -> Option<f64> {
    if !raw.is_finite() {
        return None;
    }
    let clamped = raw.clamp(0.0, max_confidence);
    (clamped >= min_confidence).then_some(clamped)
}

/// Arbitration result for one symbol in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arbitration {
    pub symbol: Symbol,
    pub signal: Signal,
    pub confidence: f64,
    pub score_long: f64,
    pub score_short: f64,
    /// Non-hold votes considered.
    pub voters: usize,
    /// Agents that voted for the winning side.
    pub contributors: Vec<AgentId>,
    /// Winner is opposite to a winner inside the flip window.
    pub rapid_flip: bool,
    /// Set when the result is hold.
    pub conflict: Option<Rejection>,
}

impl Arbitration {
    #[must_use]
    pub fn direction(&self) -> Option<PositionSide> {
        self.signal.direction()
    }
}

/// Resolves competing agent votes per symbol.
pub struct SignalArbitrator {
    config: ArbitratorConfig,
    history: Mutex<HashMap<Symbol, VecDeque<(i64, PositionSide)>>>,
    clock: Arc<dyn Clock>,
}

impl SignalArbitrator {
    #[must_use]
    pub fn new(config: ArbitratorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            history: Mutex::new(HashMap::new()),
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ArbitratorConfig {
        &self.config
    }

    /// Resolve all votes collected for `symbol` this cycle.
    ///
    /// Votes for other symbols and hold votes are ignored.
    pub fn arbitrate(&self, symbol: &Symbol, signals: &[AgentSignal]) -> Arbitration {
        let weights = &self.config.style_weights;
        let mut score_long = 0.0;
        let mut score_short = 0.0;
        let mut long_agents = Vec::new();
        let mut short_agents = Vec::new();
        let mut voters = 0usize;

        for vote in signals.iter().filter(|s| &s.symbol == symbol) {
            let Some(side) = vote.signal.direction() else {
                continue;
            };
            voters += 1;
            let weighted = vote.confidence * weights.weight(vote.style);
            match side {
                PositionSide::Long => {
                    score_long += weighted;
                    long_agents.push(vote.agent_id.clone());
                }
                PositionSide::Short => {
                    score_short += weighted;
                    short_agents.push(vote.agent_id.clone());
                }
            }
        }

        let winner = if score_long > score_short && score_long > self.config.min_score {
            Some((PositionSide::Long, score_long, long_agents))
        } else if score_short > score_long && score_short > self.config.min_score {
            Some((PositionSide::Short, score_short, short_agents))
        } else {
            None
        };

        let Some((side, score, contributors)) = winner else {
            let message = if voters == 0 {
                "no directional votes".to_string()
            } else {
                format!(
                    "no winner: long {score_long:.3} vs short {score_short:.3} (min {})",
                    self.config.min_score
                )
            };
            debug!(%symbol, voters, score_long, score_short, "Arbitration resolved to hold");
            return Arbitration {
                symbol: symbol.clone(),
                signal: Signal::Hold,
                confidence: 0.0,
                score_long,
                score_short,
                voters,
                contributors: Vec::new(),
                rapid_flip: false,
                conflict: Some(Rejection::new(RejectReason::ArbitrationConflict, message)),
            };
        };

        let confidence = (score / voters as f64).min(self.config.max_confidence);
        let rapid_flip = self.record_winner(symbol, side);

        info!(
            %symbol,
            %side,
            confidence,
            score_long,
            score_short,
            voters,
            rapid_flip,
            "Arbitration resolved"
        );

        Arbitration {
            symbol: symbol.clone(),
            signal: side.into(),
            confidence,
            score_long,
            score_short,
            voters,
            contributors,
            rapid_flip,
            conflict: None,
        }
    }

    /// Push a winner into the flip history. Returns `true` on a rapid flip.
    fn record_winner(&self, symbol: &Symbol, side: PositionSide) -> bool {
        let now = self.clock.now_ms();
        let window_ms = (self.config.flip_window_secs as i64) * 1000;
        let mut history = self.history.lock();
        let entries = history.entry(symbol.clone()).or_default();

        while entries.front().is_some_and(|&(at, _)| now - at > window_ms) {
            entries.pop_front();
        }
        let flipped = entries.iter().any(|&(_, prev)| prev != side);
        if flipped {
            warn!(%symbol, %side, window_secs = self.config.flip_window_secs, "Rapid direction flip");
        }
        entries.push_back((now, side));
        flipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{ManualClock, StrategyStyle};
    use std::time::Duration;

    fn vote(agent: &str, signal: Signal, confidence: f64, style: StrategyStyle) -> AgentSignal {
        AgentSignal {
            agent_id: AgentId::new(agent),
            symbol: Symbol::new("BTCUSDT"),
            signal,
            confidence,
            style,
            timestamp_ms: 0,
        }
    }

    fn arbitrator() -> (Arc<ManualClock>, SignalArbitrator) {
        let clock = Arc::new(ManualClock::new(0));
        (
            clock.clone(),
            SignalArbitrator::new(ArbitratorConfig::default(), clock),
        )
    }

    #[test]
    fn test_weighted_long_beats_stronger_raw_short() {
        let (_, arb) = arbitrator();
        let votes = vec![
            vote("trend", Signal::Long, 0.9, StrategyStyle::TrendFollowing),
            vote("revert", Signal::Short, 0.95, StrategyStyle::MeanReversion),
        ];
        let result = arb.arbitrate(&Symbol::new("BTCUSDT"), &votes);

        assert_eq!(result.signal, Signal::Long);
        assert!((result.score_long - 1.08).abs() < 1e-9);
        assert!((result.score_short - 0.95).abs() < 1e-9);
        assert!((result.confidence - 0.54).abs() < 1e-9);
        assert_eq!(result.contributors, vec![AgentId::new("trend")]);
        assert!(result.conflict.is_none());
    }

    #[test]
    fn test_tie_resolves_to_hold() {
        let (_, arb) = arbitrator();
        let votes = vec![
            vote("a", Signal::Long, 0.8, StrategyStyle::Breakout),
            vote("b", Signal::Short, 0.8, StrategyStyle::Breakout),
        ];
        let result = arb.arbitrate(&Symbol::new("BTCUSDT"), &votes);
        assert_eq!(result.signal, Signal::Hold);
        assert_eq!(
            result.conflict.unwrap().reason,
            RejectReason::ArbitrationConflict
        );
    }

    #[test]
    fn test_weak_score_resolves_to_hold() {
        let (_, arb) = arbitrator();
        // 0.6 * 0.8 = 0.48, not above 0.5
        let votes = vec![vote("s", Signal::Short, 0.6, StrategyStyle::Scalping)];
        assert_eq!(arb.arbitrate(&Symbol::new("BTCUSDT"), &votes).signal, Signal::Hold);
    }

    #[test]
    fn test_confidence_capped() {
        let (_, arb) = arbitrator();
        let votes = vec![vote("t", Signal::Long, 1.0, StrategyStyle::TrendFollowing)];
        let result = arb.arbitrate(&Symbol::new("BTCUSDT"), &votes);
        assert_eq!(result.signal, Signal::Long);
        assert!((result.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_holds_and_other_symbols_ignored() {
        let (_, arb) = arbitrator();
        let mut other = vote("x", Signal::Short, 1.0, StrategyStyle::Momentum);
        other.symbol = Symbol::new("ETHUSDT");
        let votes = vec![
            vote("h", Signal::Hold, 0.0, StrategyStyle::Momentum),
            vote("m", Signal::Long, 0.7, StrategyStyle::Momentum),
            other,
        ];
        let result = arb.arbitrate(&Symbol::new("BTCUSDT"), &votes);
        assert_eq!(result.voters, 1);
        assert_eq!(result.signal, Signal::Long);
    }

    #[test]
    fn test_rapid_flip_flagged_not_blocked() {
        let (clock, arb) = arbitrator();
        let btc = Symbol::new("BTCUSDT");
        let long = vec![vote("a", Signal::Long, 0.9, StrategyStyle::Breakout)];
        let short = vec![vote("a", Signal::Short, 0.9, StrategyStyle::Breakout)];

        assert!(!arb.arbitrate(&btc, &long).rapid_flip);
        clock.advance(Duration::from_secs(30));
        let flipped = arb.arbitrate(&btc, &short);
        assert_eq!(flipped.signal, Signal::Short);
        assert!(flipped.rapid_flip);

        clock.advance(Duration::from_secs(61));
        assert!(!arb.arbitrate(&btc, &long).rapid_flip);
    }

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(0.2, 0.3, 0.95), None);
        assert_eq!(normalize_confidence(0.5, 0.3, 0.95), Some(0.5));
        assert_eq!(normalize_confidence(1.0, 0.3, 0.95), Some(0.95));
        assert_eq!(normalize_confidence(f64::NAN, 0.3, 0.95), None);
    }
}
