use serde::Serialize;
use tracing::warn;

use super::factor::{Direction, Factor};
use super::features::FeatureKind;
use super::narrator::narrate;
use crate::workflows::application::ApplicantContext;

pub const ADVERSE_COLOR: &str = "#E53E3E";
pub const FAVORABLE_COLOR: &str = "#48BB78";

/// Maps |magnitude| onto bar length. Only the drawn length is clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartScale {
    pub units_per_magnitude: f64,
    pub max_units: f64,
}

impl Default for ChartScale {
    fn default() -> Self {
        Self {
            units_per_magnitude: 100.0,
            max_units: 100.0,
        }
    }
}

impl ChartScale {
    fn length(&self, magnitude: f64) -> f64 {
        (magnitude.abs() * self.units_per_magnitude).min(self.max_units)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBar {
    pub feature: String,
    pub magnitude: f64,
    pub length: f64,
    pub direction: Direction,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeCard {
    pub feature: String,
    pub label: Option<&'static str>,
    pub statement: String,
    pub magnitude_label: String,
    pub direction: Direction,
}

/// Rendered breakdown of one decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "classification", rename_all = "snake_case")]
pub enum Explanation {
    PolicyRejection {
        statements: Vec<String>,
    },
    Attribution {
        chart: Vec<ChartBar>,
        cards: Vec<NarrativeCard>,
    },
}

impl Explanation {
    /// Magnitude chart; absent for policy rejections.
    pub fn chart(&self) -> Option<&[ChartBar]> {
        match self {
            Explanation::PolicyRejection { .. } => None,
            Explanation::Attribution { chart, .. } => Some(chart),
        }
    }

    pub fn statements(&self) -> Vec<&str> {
        match self {
            Explanation::PolicyRejection { statements } => {
                statements.iter().map(String::as_str).collect()
            }
            Explanation::Attribution { cards, .. } => {
                cards.iter().map(|card| card.statement.as_str()).collect()
            }
        }
    }

    /// Plain-text form used by the CLI and for equality checks across live and replayed views.
    pub fn to_text(&self) -> String {
        match self {
            Explanation::PolicyRejection { statements } => statements.join("\n"),
            Explanation::Attribution { cards, .. } => cards
                .iter()
                .map(|card| {
                    format!(
                        "{}: {} ({})",
                        card.feature, card.statement, card.magnitude_label
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Turns a decision's factors into an [`Explanation`]. Shared by the live result view and
/// history replay.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExplanationRenderer {
    scale: ChartScale,
}

impl ExplanationRenderer {
    pub fn new(scale: ChartScale) -> Self {
        Self { scale }
    }

    /// Renders factors in received order. Returns `None` when there is nothing to show.
    pub fn render(&self, factors: &[Factor], context: &ApplicantContext) -> Option<Explanation> {
        if factors.is_empty() {
            return None;
        }

        if factors.iter().any(Factor::is_policy) {
            self.render_policy(factors, context)
        } else {
            self.render_attribution(factors, context)
        }
    }

    fn render_policy(&self, factors: &[Factor], context: &ApplicantContext) -> Option<Explanation> {
        let mut statements = Vec::with_capacity(factors.len());
        for (index, factor) in factors.iter().enumerate() {
            match factor {
                Factor::Policy(_) => statements.push(narrate(factor, context)),
                Factor::Attribution(attribution) => warn!(
                    index,
                    feature = %attribution.feature,
                    "attribution factor in a policy rejection; skipping"
                ),
            }
        }

        Some(Explanation::PolicyRejection { statements })
    }

    fn render_attribution(
        &self,
        factors: &[Factor],
        context: &ApplicantContext,
    ) -> Option<Explanation> {
        let mut chart = Vec::with_capacity(factors.len());
        let mut cards = Vec::with_capacity(factors.len());

        for (index, factor) in factors.iter().enumerate() {
            let Factor::Attribution(attribution) = factor else {
                continue;
            };
            if !attribution.magnitude.is_finite() {
                warn!(index, feature = %attribution.feature, "skipping factor with non-finite magnitude");
                continue;
            }

            let direction = attribution.direction();
            chart.push(ChartBar {
                feature: attribution.feature.clone(),
                magnitude: attribution.magnitude,
                length: self.scale.length(attribution.magnitude),
                direction,
                color: color(direction),
            });
            cards.push(NarrativeCard {
                feature: attribution.feature.clone(),
                label: FeatureKind::resolve(&attribution.feature).map(FeatureKind::label),
                statement: narrate(factor, context),
                magnitude_label: magnitude_label(attribution.magnitude),
                direction,
            });
        }

        if cards.is_empty() {
            return None;
        }

        Some(Explanation::Attribution { chart, cards })
    }
}

/// Renders with the default chart scale.
pub fn render(factors: &[Factor], context: &ApplicantContext) -> Option<Explanation> {
    ExplanationRenderer::default().render(factors, context)
}

fn color(direction: Direction) -> &'static str {
    match direction {
        Direction::Adverse => ADVERSE_COLOR,
        Direction::Favorable => FAVORABLE_COLOR,
    }
}

fn magnitude_label(magnitude: f64) -> String {
    // -0.0 would otherwise print as "-0.000"
    let magnitude = if magnitude == 0.0 { 0.0 } else { magnitude };
    format!("{magnitude:+.3}")
}
