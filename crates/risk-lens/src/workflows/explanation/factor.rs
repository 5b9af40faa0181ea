use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// One contributing reason in a decision explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Factor {
    Policy(PolicyFactor),
    Attribution(AttributionFactor),
}

impl Factor {
    pub fn policy(reason: impl Into<String>) -> Self {
        Factor::Policy(PolicyFactor {
            reason: reason.into(),
        })
    }

    pub fn attribution(feature: impl Into<String>, magnitude: f64) -> Self {
        Factor::Attribution(AttributionFactor {
            feature: feature.into(),
            magnitude,
        })
    }

    pub fn is_policy(&self) -> bool {
        matches!(self, Factor::Policy(_))
    }
}

/// Deterministic rule rejection; never carries a magnitude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFactor {
    pub reason: String,
}

/// Signed model attribution. Positive magnitude raises predicted risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionFactor {
    pub feature: String,
    pub magnitude: f64,
}

impl AttributionFactor {
    pub fn direction(&self) -> Direction {
        if self.magnitude > 0.0 {
            Direction::Adverse
        } else {
            Direction::Favorable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Adverse,
    Favorable,
}

impl Direction {
    /// Impact wording from the applicant's point of view.
    pub fn impact(self) -> &'static str {
        match self {
            Direction::Adverse => "negative",
            Direction::Favorable => "positive",
        }
    }
}

/// A wire factor dropped during decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactorSkip {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedFactors {
    pub factors: Vec<Factor>,
    pub skipped: Vec<FactorSkip>,
}

/// Decodes the scoring service's `risk_factors` payload.
///
/// Accepts an array, a JSON-encoded string holding an array, or null. Malformed entries are
/// skipped individually; order of the surviving factors is preserved.
pub fn decode_factors(raw: &Value) -> DecodedFactors {
    let mut decoded = DecodedFactors::default();

    let entries = match raw {
        Value::Null => return decoded,
        Value::Array(entries) => entries.clone(),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Array(entries)) => entries,
            Ok(Value::Null) => return decoded,
            Ok(_) | Err(_) => {
                decoded.skip(0, "risk factor payload is not a JSON array".to_string());
                return decoded;
            }
        },
        _ => {
            decoded.skip(0, "risk factor payload is not a JSON array".to_string());
            return decoded;
        }
    };

    for (index, entry) in entries.iter().enumerate() {
        match decode_factor(entry) {
            Ok(factor) => decoded.factors.push(factor),
            Err(reason) => decoded.skip(index, reason),
        }
    }

    decoded
}

impl DecodedFactors {
    fn skip(&mut self, index: usize, reason: String) {
        warn!(index, %reason, "skipping malformed risk factor");
        self.skipped.push(FactorSkip { index, reason });
    }
}

fn decode_factor(value: &Value) -> Result<Factor, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "factor is not an object".to_string())?;

    let score = object.get("shap_score").or_else(|| object.get("magnitude"));
    let reason = object.get("reason");

    match (reason, score) {
        (Some(reason), None) => {
            let reason = reason
                .as_str()
                .ok_or_else(|| "policy reason is not a string".to_string())?;
            Ok(Factor::policy(reason))
        }
        (None, Some(score)) => decode_attribution(object, score),
        (Some(_), Some(_)) => Err("factor carries both a policy reason and a score".to_string()),
        (None, None) => Err("factor carries neither a policy reason nor a score".to_string()),
    }
}

fn decode_attribution(object: &Map<String, Value>, score: &Value) -> Result<Factor, String> {
    let feature = object
        .get("feature")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|feature| !feature.is_empty())
        .ok_or_else(|| "attribution factor is missing a feature name".to_string())?;

    let magnitude = score
        .as_f64()
        .filter(|magnitude| magnitude.is_finite())
        .ok_or_else(|| format!("attribution factor '{feature}' has a non-numeric score"))?;

    Ok(Factor::attribution(feature, magnitude))
}
