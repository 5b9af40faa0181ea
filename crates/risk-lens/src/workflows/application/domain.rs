use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflows::explanation::{decode_factors, Factor, FactorSkip};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Gender {
    #[default]
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    pub fn code(self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "M" | "MALE" => Some(Gender::Male),
            "F" | "FEMALE" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// Applicant values narrated against a decision. Numeric fields are zero when absent.
///
/// Serializes to the scoring service's application payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicantContext {
    pub full_name: String,
    pub income: f64,
    pub loan_amount: f64,
    pub credit_score: u32,
    pub age: u32,
    pub years_employed: u32,
    pub gender: Gender,
}

/// Service-defined verdict label. Approval is detected by substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verdict(pub String);

impl Verdict {
    pub fn label(&self) -> &str {
        &self.0
    }

    pub fn is_approved(&self) -> bool {
        self.0.contains("APPROVED")
    }
}

/// A scored application: verdict, risk score, ordered factors, and the echoed applicant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionResult {
    pub id: Option<i64>,
    pub verdict: Verdict,
    pub score: f64,
    pub factors: Vec<Factor>,
    pub created_at: Option<DateTime<Utc>>,
    pub applicant: ApplicantContext,
}

impl DecisionResult {
    pub fn is_approved(&self) -> bool {
        self.verdict.is_approved()
    }

    pub fn headline(&self) -> String {
        format!("CONFIDENCE SCORE: {:.1}/100", self.score)
    }

    /// Decodes the service's flat decision payload.
    ///
    /// Only a missing/invalid `status` fails the record; malformed factors are skipped and
    /// reported, absent applicant fields default to zero.
    pub fn from_wire(payload: Value) -> Result<DecodedDecision, serde_json::Error> {
        let wire: WireDecision = serde_json::from_value(payload)?;
        let decoded = decode_factors(&wire.risk_factors);

        let decision = DecisionResult {
            id: wire.id,
            verdict: Verdict(wire.status),
            score: wire.risk_score.filter(|score| score.is_finite()).unwrap_or(0.0),
            factors: decoded.factors,
            created_at: wire.created_at.as_deref().and_then(parse_timestamp),
            applicant: ApplicantContext {
                full_name: wire.full_name.unwrap_or_default(),
                income: amount(wire.income),
                loan_amount: amount(wire.loan_amount),
                credit_score: whole(wire.credit_score),
                age: whole(wire.age),
                years_employed: whole(wire.years_employed),
                gender: wire
                    .gender
                    .as_deref()
                    .and_then(Gender::parse)
                    .unwrap_or_default(),
            },
        };

        Ok(DecodedDecision {
            decision,
            skipped: decoded.skipped,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedDecision {
    pub decision: DecisionResult,
    pub skipped: Vec<FactorSkip>,
}

#[derive(Debug, Deserialize)]
struct WireDecision {
    #[serde(default)]
    id: Option<i64>,
    status: String,
    #[serde(default)]
    risk_score: Option<f64>,
    #[serde(default)]
    risk_factors: Value,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    income: Option<f64>,
    #[serde(default)]
    loan_amount: Option<f64>,
    #[serde(default)]
    credit_score: Option<f64>,
    #[serde(default)]
    age: Option<f64>,
    #[serde(default)]
    years_employed: Option<f64>,
    #[serde(default)]
    gender: Option<String>,
}

fn amount(value: Option<f64>) -> f64 {
    value
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(0.0)
}

fn whole(value: Option<f64>) -> u32 {
    let value = amount(value).round();
    if value >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        value as u32
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_flat_service_payload() {
        let payload = json!({
            "id": 17,
            "status": "APPROVED",
            "risk_score": 82.5,
            "risk_factors": [{ "feature": "AMT_INCOME_TOTAL", "shap_score": -0.1 }],
            "created_at": "2025-03-04T10:15:30.123456",
            "full_name": "Asha Rao",
            "income": 20000.0,
            "loan_amount": 150000.0,
            "credit_score": 712,
            "age": 29,
            "years_employed": 4,
            "gender": "F"
        });

        let decoded = DecisionResult::from_wire(payload).expect("decodes");
        let decision = decoded.decision;

        assert_eq!(decision.id, Some(17));
        assert!(decision.is_approved());
        assert_eq!(decision.headline(), "CONFIDENCE SCORE: 82.5/100");
        assert_eq!(decision.factors.len(), 1);
        assert_eq!(decision.applicant.credit_score, 712);
        assert_eq!(decision.applicant.gender, Gender::Female);
        assert!(decision.created_at.is_some());
        assert!(decoded.skipped.is_empty());
    }

    #[test]
    fn missing_applicant_fields_default_to_zero() {
        let decoded = DecisionResult::from_wire(json!({
            "status": "REJECTED_HIGH_RISK",
            "risk_factors": null,
            "income": null
        }))
        .expect("decodes");

        assert!(!decoded.decision.is_approved());
        assert_eq!(decoded.decision.applicant, ApplicantContext::default());
        assert!(decoded.decision.factors.is_empty());
    }

    #[test]
    fn gender_codes_parse_back() {
        for gender in [Gender::Male, Gender::Female] {
            assert_eq!(Gender::parse(gender.code()), Some(gender));
        }
        assert_eq!(Gender::parse(" female "), Some(Gender::Female));
        assert_eq!(Gender::parse("x"), None);
    }

    #[test]
    fn status_is_required() {
        assert!(DecisionResult::from_wire(json!({ "risk_score": 10.0 })).is_err());
    }

    #[test]
    fn applicant_context_serializes_to_submission_payload() {
        let context = ApplicantContext {
            full_name: "Asha Rao".to_string(),
            income: 20000.0,
            loan_amount: 150000.0,
            credit_score: 712,
            age: 29,
            years_employed: 4,
            gender: Gender::Female,
        };
        let payload = serde_json::to_value(&context).expect("serializes");
        assert_eq!(payload["gender"], "F");
        assert_eq!(payload["credit_score"], 712);
    }
}
