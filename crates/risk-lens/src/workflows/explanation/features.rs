use serde::{Deserialize, Serialize};

/// Canonical model features the narrator has a dedicated statement for.
///
/// Incoming names are normalized once through [`FeatureKind::resolve`]; everything past
/// that point dispatches on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Income,
    LoanAmount,
    Annuity,
    Age,
    YearsEmployed,
    CreditScore,
    Gender,
    ContractType,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 8] = [
        FeatureKind::Income,
        FeatureKind::LoanAmount,
        FeatureKind::Annuity,
        FeatureKind::Age,
        FeatureKind::YearsEmployed,
        FeatureKind::CreditScore,
        FeatureKind::Gender,
        FeatureKind::ContractType,
    ];

    /// Maps a model column name or form-field synonym onto its canonical feature.
    pub fn resolve(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "AMT_INCOME_TOTAL" | "INCOME" | "ANNUAL_INCOME" => Some(Self::Income),
            "AMT_CREDIT" | "LOAN_AMOUNT" | "CREDIT_AMOUNT" => Some(Self::LoanAmount),
            "AMT_ANNUITY" | "ANNUITY" | "EMI" | "MONTHLY_OBLIGATION" => Some(Self::Annuity),
            "AGE_YEARS" | "AGE" => Some(Self::Age),
            "YEARS_EMPLOYED" | "EMPLOYMENT_YEARS" => Some(Self::YearsEmployed),
            "CREDIT_SCORE" | "CIBIL_SCORE" | "BUREAU_SCORE" => Some(Self::CreditScore),
            "CODE_GENDER" | "GENDER" => Some(Self::Gender),
            "NAME_CONTRACT_TYPE" | "CONTRACT_TYPE" => Some(Self::ContractType),
            _ => None,
        }
    }

    /// Column name used by the scoring model.
    pub fn model_name(self) -> &'static str {
        match self {
            FeatureKind::Income => "AMT_INCOME_TOTAL",
            FeatureKind::LoanAmount => "AMT_CREDIT",
            FeatureKind::Annuity => "AMT_ANNUITY",
            FeatureKind::Age => "AGE_YEARS",
            FeatureKind::YearsEmployed => "YEARS_EMPLOYED",
            FeatureKind::CreditScore => "CREDIT_SCORE",
            FeatureKind::Gender => "CODE_GENDER",
            FeatureKind::ContractType => "NAME_CONTRACT_TYPE",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FeatureKind::Income => "Income",
            FeatureKind::LoanAmount => "Loan amount",
            FeatureKind::Annuity => "Monthly obligation",
            FeatureKind::Age => "Age",
            FeatureKind::YearsEmployed => "Employment history",
            FeatureKind::CreditScore => "Credit score",
            FeatureKind::Gender => "Demographics",
            FeatureKind::ContractType => "Contract type",
        }
    }
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|ch| match ch {
            ' ' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}
