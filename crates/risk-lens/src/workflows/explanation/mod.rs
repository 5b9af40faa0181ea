//! Decision explanation: factor model, narration, and the rendered breakdown.

pub mod factor;
pub mod features;
pub mod narrator;
pub mod renderer;

pub use factor::{
    decode_factors, AttributionFactor, DecodedFactors, Direction, Factor, FactorSkip,
    PolicyFactor,
};
pub use features::FeatureKind;
pub use narrator::{narrate, FALLBACK_STATEMENT};
pub use renderer::{
    render, ChartBar, ChartScale, Explanation, ExplanationRenderer, NarrativeCard, ADVERSE_COLOR,
    FAVORABLE_COLOR,
};
