//! Arbitration configuration.

use serde::{Deserialize, Serialize};

use cohort_core::StrategyStyle;

use crate::error::{SignalError, SignalResult};

/// Per-style arbitration weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleWeights {
    #[serde(default = "default_trend_following")]
    pub trend_following: f64,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default = "default_one")]
    pub breakout: f64,
    #[serde(default = "default_one")]
    pub mean_reversion: f64,
    #[serde(default = "default_scalping")]
    pub scalping: f64,
}

fn default_trend_following() -> f64 {
    1.2
}

fn default_momentum() -> f64 {
    1.1
}

fn default_one() -> f64 {
    1.0
}

fn default_scalping() -> f64 {
    0.8
}

impl Default for StyleWeights {
    fn default() -> Self {
        Self {
            trend_following: default_trend_following(),
            momentum: default_momentum(),
            breakout: default_one(),
            mean_reversion: default_one(),
            scalping: default_scalping(),
        }
    }
}

impl StyleWeights {
    #[must_use]
    pub fn weight(&self, style: StrategyStyle) -> f64 {
        match style {
            StrategyStyle::TrendFollowing => self.trend_following,
            StrategyStyle::Momentum => self.momentum,
            StrategyStyle::Breakout => self.breakout,
            StrategyStyle::MeanReversion => self.mean_reversion,
            StrategyStyle::Scalping => self.scalping,
        }
    }

    fn all(&self) -> [(&'static str, f64); 5] {
        [
            ("trend_following", self.trend_following),
            ("momentum", self.momentum),
            ("breakout", self.breakout),
            ("mean_reversion", self.mean_reversion),
            ("scalping", self.scalping),
        ]
    }
}

/// Signal arbitrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitratorConfig {
    #[serde(default)]
    pub style_weights: StyleWeights,
    /// Winning score must exceed this. Default: 0.5.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Cap on the resolved confidence. Default: 0.95.
    #[serde(default = "default_max_confidence")]
    pub max_confidence: f64,
    /// Agent votes below this confidence are dropped before arbitration.
    /// Default: 0.3.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Window for flagging opposite-direction flips. Default: 60s.
    #[serde(default = "default_flip_window_secs")]
    pub flip_window_secs: u64,
}

fn default_min_score() -> f64 {
    0.5
}

fn default_max_confidence() -> f64 {
    0.95
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_flip_window_secs() -> u64 {
    60
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            style_weights: StyleWeights::default(),
            min_score: default_min_score(),
            max_confidence: default_max_confidence(),
            min_confidence: default_min_confidence(),
            flip_window_secs: default_flip_window_secs(),
        }
    }
}

impl ArbitratorConfig {
    pub fn validate(&self) -> SignalResult<()> {
        for (name, weight) in self.style_weights.all() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SignalError::InvalidConfig(format!(
                    "style weight {name} must be finite and >= 0, got {weight}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.max_confidence) || self.max_confidence == 0.0 {
            return Err(SignalError::InvalidConfig(format!(
                "max_confidence must be in (0, 1], got {}",
                self.max_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(SignalError::InvalidConfig(format!(
                "min_confidence must be in [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !self.min_score.is_finite() || self.min_score < 0.0 {
            return Err(SignalError::InvalidConfig(format!(
                "min_score must be >= 0, got {}",
                self.min_score
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weight_table() {
        let w = StyleWeights::default();
        assert_eq!(w.weight(StrategyStyle::TrendFollowing), 1.2);
        assert_eq!(w.weight(StrategyStyle::Momentum), 1.1);
        assert_eq!(w.weight(StrategyStyle::MeanReversion), 1.0);
        assert_eq!(w.weight(StrategyStyle::Scalping), 0.8);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ArbitratorConfig = toml::from_str(
            r#"
            min_score = 0.6
            [style_weights]
            scalping = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.min_score, 0.6);
        assert_eq!(config.style_weights.scalping, 0.5);
        assert_eq!(config.style_weights.trend_following, 1.2);
        assert_eq!(config.flip_window_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = ArbitratorConfig::default();
        config.style_weights.breakout = -1.0;
        assert!(config.validate().is_err());
    }
}
