use serde::{Deserialize, Serialize};

use super::domain::{ApplicantContext, Gender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    FullName,
    Income,
    LoanAmount,
    CreditScore,
    Age,
    YearsEmployed,
    Gender,
}

impl FormField {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "full_name" => Some(Self::FullName),
            "income" => Some(Self::Income),
            "loan_amount" => Some(Self::LoanAmount),
            "credit_score" => Some(Self::CreditScore),
            "age" => Some(Self::Age),
            "years_employed" => Some(Self::YearsEmployed),
            "gender" => Some(Self::Gender),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FormField::FullName => "full_name",
            FormField::Income => "income",
            FormField::LoanAmount => "loan_amount",
            FormField::CreditScore => "credit_score",
            FormField::Age => "age",
            FormField::YearsEmployed => "years_employed",
            FormField::Gender => "gender",
        }
    }
}

/// A single user edit.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEdit {
    FullName(String),
    Income(f64),
    LoanAmount(f64),
    CreditScore(u32),
    Age(u32),
    YearsEmployed(u32),
    Gender(Gender),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldEditError {
    #[error("unknown form field '{0}'")]
    UnknownField(String),
    #[error("{field} must be a non-negative number, got '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("gender must be M or F, got '{0}'")]
    InvalidGender(String),
}

impl FieldEdit {
    pub fn field(&self) -> FormField {
        match self {
            FieldEdit::FullName(_) => FormField::FullName,
            FieldEdit::Income(_) => FormField::Income,
            FieldEdit::LoanAmount(_) => FormField::LoanAmount,
            FieldEdit::CreditScore(_) => FormField::CreditScore,
            FieldEdit::Age(_) => FormField::Age,
            FieldEdit::YearsEmployed(_) => FormField::YearsEmployed,
            FieldEdit::Gender(_) => FormField::Gender,
        }
    }

    /// Parses raw input the way the form receives it. Blank numeric input reads as zero.
    pub fn parse(field: &str, raw: &str) -> Result<Self, FieldEditError> {
        let field =
            FormField::parse(field).ok_or_else(|| FieldEditError::UnknownField(field.to_string()))?;

        match field {
            FormField::FullName => Ok(FieldEdit::FullName(raw.trim().to_string())),
            FormField::Gender => Gender::parse(raw)
                .map(FieldEdit::Gender)
                .ok_or_else(|| FieldEditError::InvalidGender(raw.to_string())),
            FormField::Income => parse_amount(field, raw).map(FieldEdit::Income),
            FormField::LoanAmount => parse_amount(field, raw).map(FieldEdit::LoanAmount),
            FormField::CreditScore => parse_whole(field, raw).map(FieldEdit::CreditScore),
            FormField::Age => parse_whole(field, raw).map(FieldEdit::Age),
            FormField::YearsEmployed => parse_whole(field, raw).map(FieldEdit::YearsEmployed),
        }
    }
}

fn parse_amount(field: FormField, raw: &str) -> Result<f64, FieldEditError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| FieldEditError::InvalidNumber {
            field: field.name(),
            value: raw.to_string(),
        })
}

fn parse_whole(field: FormField, raw: &str) -> Result<u32, FieldEditError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<u32>()
        .map_err(|_| FieldEditError::InvalidNumber {
            field: field.name(),
            value: raw.to_string(),
        })
}

/// Who last wrote an auto-fillable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    #[default]
    Manual,
    Bureau,
    Statement,
}

impl FieldSource {
    /// Auto-filled values are shown as verified until the user overwrites them.
    pub fn is_verified(self) -> bool {
        !matches!(self, FieldSource::Manual)
    }
}

/// Live, mutable form state with provenance for the two auto-fillable fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ApplicationForm {
    values: ApplicantContext,
    income_source: FieldSource,
    credit_score_source: FieldSource,
}

impl ApplicationForm {
    pub fn values(&self) -> &ApplicantContext {
        &self.values
    }

    /// Immutable copy handed to submission and narration.
    pub fn snapshot(&self) -> ApplicantContext {
        self.values.clone()
    }

    pub fn source(&self, field: FormField) -> FieldSource {
        match field {
            FormField::Income => self.income_source,
            FormField::CreditScore => self.credit_score_source,
            _ => FieldSource::Manual,
        }
    }

    pub(crate) fn apply(&mut self, edit: FieldEdit) {
        match edit {
            FieldEdit::FullName(name) => self.values.full_name = name,
            FieldEdit::Income(income) => {
                self.values.income = income;
                self.income_source = FieldSource::Manual;
            }
            FieldEdit::LoanAmount(amount) => self.values.loan_amount = amount,
            FieldEdit::CreditScore(score) => {
                self.values.credit_score = score;
                self.credit_score_source = FieldSource::Manual;
            }
            FieldEdit::Age(age) => self.values.age = age,
            FieldEdit::YearsEmployed(years) => self.values.years_employed = years,
            FieldEdit::Gender(gender) => self.values.gender = gender,
        }
    }

    pub(crate) fn fill_credit_score_from_bureau(&mut self, score: u32) {
        self.values.credit_score = score;
        self.credit_score_source = FieldSource::Bureau;
    }

    pub(crate) fn fill_income_from_statement(&mut self, income: f64) {
        self.values.income = income;
        self.income_source = FieldSource::Statement;
    }
}
