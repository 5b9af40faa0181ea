//! Applicant-specific sentences for individual decision factors.
//!
//! Monthly figures quoted here are presentation approximations (annual income / 12,
//! loan amount / 12). They do not reproduce the scoring model's own arithmetic.

use tracing::warn;

use super::factor::{AttributionFactor, Direction, Factor};
use super::features::FeatureKind;
use crate::workflows::application::ApplicantContext;

pub const POLICY_PREFIX: &str = "Application rejected by policy: ";
pub const FALLBACK_STATEMENT: &str = "This factor contributed to the risk decision.";

const MONTHS_PER_YEAR: f64 = 12.0;
const NOT_PROVIDED: &str = "not provided";

#[derive(Debug, thiserror::Error)]
pub(crate) enum NarrationError {
    #[error("magnitude {0} is not a finite number")]
    NonFiniteMagnitude(f64),
    #[error("applicant {0} is not a finite number")]
    NonFiniteContext(&'static str),
}

/// Renders one factor as a sentence. Never fails: formatting problems degrade to
/// [`FALLBACK_STATEMENT`].
pub fn narrate(factor: &Factor, context: &ApplicantContext) -> String {
    match factor {
        Factor::Policy(policy) => format!("{POLICY_PREFIX}{}", policy.reason),
        Factor::Attribution(attribution) => match narrate_attribution(attribution, context) {
            Ok(statement) => statement,
            Err(err) => {
                warn!(feature = %attribution.feature, %err, "narration fell back to generic statement");
                FALLBACK_STATEMENT.to_string()
            }
        },
    }
}

fn narrate_attribution(
    factor: &AttributionFactor,
    context: &ApplicantContext,
) -> Result<String, NarrationError> {
    if !factor.magnitude.is_finite() {
        return Err(NarrationError::NonFiniteMagnitude(factor.magnitude));
    }

    let direction = factor.direction();
    let Some(kind) = FeatureKind::resolve(&factor.feature) else {
        return Ok(format!(
            "{} value had a {} impact on the risk model.",
            factor.feature.trim(),
            direction.impact()
        ));
    };

    let figures = Figures::from_context(context)?;
    Ok(statement(kind, direction, &figures))
}

/// Validated context values in display form.
struct Figures {
    income: f64,
    loan_amount: f64,
    credit_score: u32,
    age: u32,
    years_employed: u32,
}

impl Figures {
    fn from_context(context: &ApplicantContext) -> Result<Self, NarrationError> {
        if !context.income.is_finite() {
            return Err(NarrationError::NonFiniteContext("income"));
        }
        if !context.loan_amount.is_finite() {
            return Err(NarrationError::NonFiniteContext("loan amount"));
        }

        Ok(Self {
            income: context.income,
            loan_amount: context.loan_amount,
            credit_score: context.credit_score,
            age: context.age,
            years_employed: context.years_employed,
        })
    }

    fn monthly_income(&self) -> f64 {
        self.income / MONTHS_PER_YEAR
    }

    fn monthly_obligation(&self) -> f64 {
        self.loan_amount / MONTHS_PER_YEAR
    }
}

fn statement(kind: FeatureKind, direction: Direction, figures: &Figures) -> String {
    let adverse = direction == Direction::Adverse;
    match kind {
        FeatureKind::Income => {
            let income = money(figures.income);
            if adverse {
                format!("Declared annual income ({income}) falls below the optimal threshold for a loan of this size.")
            } else {
                format!("Declared annual income ({income}) provides a strong financial buffer for the requested loan.")
            }
        }
        FeatureKind::LoanAmount => {
            let loan = money(figures.loan_amount);
            let income = money(figures.income);
            if adverse {
                format!("Requested loan amount ({loan}) is high relative to declared annual income ({income}).")
            } else {
                format!("Requested loan amount ({loan}) sits within a manageable range for declared annual income ({income}).")
            }
        }
        FeatureKind::Annuity => annuity_statement(adverse, figures),
        FeatureKind::Age => {
            let age = whole(figures.age, "years");
            if adverse {
                format!("Applicant age ({age}) falls within a statistically higher-risk band.")
            } else {
                format!("Applicant age ({age}) falls within a statistically lower-risk band.")
            }
        }
        FeatureKind::YearsEmployed => {
            let tenure = tenure(figures.years_employed);
            if adverse {
                format!("Employment history ({tenure}) is short or unstable.")
            } else {
                format!("Employment history ({tenure}) indicates good job stability.")
            }
        }
        FeatureKind::CreditScore => {
            let score = whole(figures.credit_score, "");
            if adverse {
                format!("Credit score ({score}) indicates elevated repayment risk.")
            } else {
                format!("Credit score ({score}) reflects a reliable repayment record.")
            }
        }
        FeatureKind::Gender => {
            if adverse {
                "Demographic statistical adjustment increased the assessed risk.".to_string()
            } else {
                "Demographic statistical adjustment lowered the assessed risk.".to_string()
            }
        }
        FeatureKind::ContractType => {
            if adverse {
                "Loan contract type increased the assessed risk.".to_string()
            } else {
                "Loan contract type lowered the assessed risk.".to_string()
            }
        }
    }
}

fn annuity_statement(adverse: bool, figures: &Figures) -> String {
    let obligation = money(figures.monthly_obligation());
    let monthly_income = money(figures.monthly_income());

    let mut sentence = if adverse {
        format!(
            "Estimated monthly obligation ({obligation}, approximated as loan amount / 12) is too high relative to monthly income ({monthly_income}, annual income / 12)."
        )
    } else {
        format!(
            "Estimated monthly obligation ({obligation}, approximated as loan amount / 12) is comfortably covered by monthly income ({monthly_income}, annual income / 12)."
        )
    };

    if figures.monthly_income() > 0.0 && figures.monthly_obligation() > 0.0 {
        let share = figures.monthly_obligation() / figures.monthly_income() * 100.0;
        sentence.push_str(&format!(
            " That is roughly {}% of monthly income.",
            group_thousands(share.round() as u64)
        ));
    }

    sentence
}

/// Whole rupees with comma grouping, or "not provided" for absent values.
pub fn money(value: f64) -> String {
    if !value.is_finite() || value <= 0.0 {
        return NOT_PROVIDED.to_string();
    }
    format!("₹{}", group_thousands(value.round() as u64))
}

fn whole(value: u32, unit: &str) -> String {
    match (value, unit) {
        (0, _) => NOT_PROVIDED.to_string(),
        (value, "") => group_thousands(u64::from(value)),
        (value, unit) => format!("{value} {unit}"),
    }
}

fn tenure(years: u32) -> String {
    match years {
        1 => "1 year".to_string(),
        years => format!("{years} years"),
    }
}

pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (position, ch) in digits.chars().enumerate() {
        if position > 0 && (digits.len() - position) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
