use rotator_core::{Position, RotationConfig};
use std::collections::HashSet;

use crate::decision::RotationDecision;
use crate::scorer::{compare_ranked, OpportunityScore};

/// Decides whether capital in the held position should move to a better
/// scoring symbol.
#[derive(Debug, Clone)]
pub struct RotationCoordinator {
    config: RotationConfig,
}

impl RotationCoordinator {
    #[must_use]
    pub const fn new(config: RotationConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn margin(&self) -> f64 {
        self.config.margin
    }

    /// Compares the held symbol's score with the best other candidate.
    ///
    /// `excluded` lists symbols that cannot be rotated into (already held, or
    /// claimed by another rotation this tick). Returns `None` when rotation is
    /// disabled, the position is not open, the held symbol was not scored, or
    /// no candidate beats it by more than the margin.
    #[must_use]
    pub fn evaluate(
        &self,
        held: &Position,
        scores: &[OpportunityScore],
        excluded: &HashSet<String>,
    ) -> Option<RotationDecision> {
        if !self.config.enabled || !held.is_open() {
            return None;
        }

        let held_score = scores.iter().find(|s| s.symbol == held.symbol)?;

        let best = scores
            .iter()
            .filter(|s| s.symbol != held.symbol && !excluded.contains(&s.symbol))
            .filter(|s| s.score.is_finite())
            .min_by(|a, b| compare_ranked(a, b))?;

        let gap = best.score - held_score.score;
        if gap <= self.config.margin {
            tracing::debug!(
                symbol = %held.symbol,
                candidate = %best.symbol,
                gap,
                margin = self.config.margin,
                "Rotation candidate within margin, holding"
            );
            return None;
        }

        Some(RotationDecision {
            from_symbol: held.symbol.clone(),
            from_side: held.side,
            from_price: held_score.price,
            to_symbol: best.symbol.clone(),
            to_side: best.preferred_side,
            to_price: best.price,
            held_score: held_score.score,
            candidate_score: best.score,
        })
    }
}
