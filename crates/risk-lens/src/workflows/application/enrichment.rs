//! Optional side channels that pre-fill parts of the form: a simulated bureau lookup and a
//! bank-statement analysis upload.
//!
//! The bureau channel only writes `credit_score` and the statement channel only writes
//! `income`, so their completions can interleave in any order.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::form::FormField;
use super::session::RequestTag;
use crate::config::ServiceConfig;
use crate::gateway::{dispatch, CreditGateway, DispatchError, StatementAnalysis};
use crate::workflows::explanation::narrator::{group_thousands, money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Bureau,
    Statement,
}

impl Channel {
    /// The single form field this channel is allowed to write.
    pub fn field(self) -> FormField {
        match self {
            Channel::Bureau => FormField::CreditScore,
            Channel::Statement => FormField::Income,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Bureau => "bureau",
            Channel::Statement => "statement",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BureauOutcome {
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementOutcome {
    pub estimated_salary: f64,
    pub average_balance: f64,
    pub cheque_bounces: u32,
    pub gambling_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    Bureau(BureauOutcome),
    Statement(StatementOutcome),
}

impl EnrichmentOutcome {
    pub fn notification(&self) -> Notification {
        match self {
            EnrichmentOutcome::Bureau(outcome) => Notification::success(
                "Bureau Data Received",
                format!("TransUnion Score: {}", outcome.score),
            ),
            EnrichmentOutcome::Statement(outcome) => Notification::success(
                "Statement Verified",
                format!(
                    "Salary: {} | Avg Bal: {} | Bounces: {}",
                    money(outcome.estimated_salary),
                    money(outcome.average_balance),
                    group_thousands(u64::from(outcome.cheque_bounces))
                ),
            ),
        }
    }
}

/// Local, recoverable enrichment failure. The form stays editable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelFailure {
    #[error("statement rejected before upload: {detail}")]
    InvalidStatement { detail: String },
    #[error("statement analysis could not verify the account")]
    Unverified,
    #[error("{channel} service error: {detail}")]
    Gateway { channel: Channel, detail: String },
    #[error("{channel} request timed out")]
    TimedOut { channel: Channel },
    #[error("{channel} request was interrupted")]
    Interrupted { channel: Channel },
}

impl ChannelFailure {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelFailure::InvalidStatement { .. } | ChannelFailure::Unverified => {
                Channel::Statement
            }
            ChannelFailure::Gateway { channel, .. }
            | ChannelFailure::TimedOut { channel }
            | ChannelFailure::Interrupted { channel } => *channel,
        }
    }

    pub fn notification(&self) -> Notification {
        match self.channel() {
            Channel::Statement => Notification::error("Upload Failed", self.to_string()),
            Channel::Bureau => Notification::error("Bureau Fetch Failed", self.to_string()),
        }
    }

    fn from_dispatch(channel: Channel, err: DispatchError) -> Self {
        match err {
            DispatchError::TimedOut(_) => ChannelFailure::TimedOut { channel },
            DispatchError::Interrupted => ChannelFailure::Interrupted { channel },
            DispatchError::Gateway(err) => ChannelFailure::Gateway {
                channel,
                detail: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Error,
}

/// Toast-style message for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl Notification {
    fn success(title: &str, description: String) -> Self {
        Self {
            title: title.to_string(),
            description,
            severity: Severity::Success,
        }
    }

    fn error(title: &str, description: String) -> Self {
        Self {
            title: title.to_string(),
            description,
            severity: Severity::Error,
        }
    }
}

/// Per-channel state as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    Idle,
    Pending {
        request: RequestTag,
    },
    Completed {
        outcome: EnrichmentOutcome,
    },
    Failed {
        failure: ChannelFailure,
    },
}

impl ChannelStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, ChannelStatus::Pending { .. })
    }

    pub(crate) fn pending_request(&self) -> Option<RequestTag> {
        match self {
            ChannelStatus::Pending { request } => Some(*request),
            _ => None,
        }
    }

    pub fn notification(&self) -> Option<Notification> {
        match self {
            ChannelStatus::Idle => None,
            ChannelStatus::Pending { .. } => None,
            ChannelStatus::Completed { outcome } => Some(outcome.notification()),
            ChannelStatus::Failed { failure } => Some(failure.notification()),
        }
    }
}

/// A completed channel request, carrying the tag it was issued under.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentCompletion {
    pub request: RequestTag,
    pub channel: Channel,
    pub result: Result<EnrichmentOutcome, ChannelFailure>,
}

/// User-selected bank statement.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementUpload {
    pub file_name: String,
    pub content_type: mime::Mime,
    pub bytes: Vec<u8>,
}

impl StatementUpload {
    pub fn csv(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: mime::TEXT_CSV,
            bytes,
        }
    }
}

const DATE_COLUMNS: &[&str] = &["date", "txn_date", "transaction_date", "valuedt"];
const AMOUNT_COLUMNS: &[&str] = &["amount", "txn_amount", "transaction_amount"];
const TYPE_COLUMNS: &[&str] = &["type", "txn_type", "dr_cr", "drcr"];
const NARRATION_COLUMNS: &[&str] = &["narration", "description", "particulars", "remarks"];

/// Checks the statement header before anything is sent.
///
/// Split `withdrawalamt`/`depositamt` columns stand in for both `amount` and `type`.
pub fn preflight_statement(upload: &StatementUpload) -> Result<(), ChannelFailure> {
    if upload.content_type.subtype() != mime::CSV {
        return Err(ChannelFailure::InvalidStatement {
            detail: format!("expected a CSV file, got {}", upload.content_type),
        });
    }
    if upload.bytes.is_empty() {
        return Err(ChannelFailure::InvalidStatement {
            detail: "statement file is empty".to_string(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(upload.bytes.as_slice());
    let headers = reader
        .headers()
        .map_err(|err| ChannelFailure::InvalidStatement {
            detail: format!("could not read CSV header: {err}"),
        })?;

    let columns: Vec<String> = headers
        .iter()
        .map(|column| column.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
        .collect();
    let has_any = |variants: &[&str]| {
        variants
            .iter()
            .any(|variant| columns.iter().any(|column| column == variant))
    };

    let split_amounts = has_any(&["withdrawalamt"]) && has_any(&["depositamt"]);
    let mut missing = Vec::new();
    if !has_any(DATE_COLUMNS) {
        missing.push("date");
    }
    if !has_any(AMOUNT_COLUMNS) && !split_amounts {
        missing.push("amount");
    }
    if !has_any(TYPE_COLUMNS) && !split_amounts {
        missing.push("type");
    }
    if !has_any(NARRATION_COLUMNS) {
        missing.push("narration");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ChannelFailure::InvalidStatement {
            detail: format!("CSV missing columns: {}", missing.join(", ")),
        })
    }
}

/// Simulated bureau lookup parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BureauSimulation {
    pub delay: Duration,
    pub score: u32,
}

/// Runs the enrichment channels. Futures it returns never borrow the session, so both
/// channels can be awaited together and applied in whichever order they finish.
pub struct EnrichmentCoordinator<G> {
    gateway: Arc<G>,
    bureau: BureauSimulation,
    timeout: Duration,
}

impl<G> EnrichmentCoordinator<G>
where
    G: CreditGateway + 'static,
{
    pub fn new(gateway: Arc<G>, bureau: BureauSimulation, timeout: Duration) -> Self {
        Self {
            gateway,
            bureau,
            timeout,
        }
    }

    pub fn from_config(gateway: Arc<G>, config: &ServiceConfig) -> Self {
        Self::new(
            gateway,
            BureauSimulation {
                delay: config.bureau_delay,
                score: config.bureau_score,
            },
            config.request_timeout,
        )
    }

    pub fn fetch_bureau(
        &self,
        request: RequestTag,
    ) -> impl Future<Output = EnrichmentCompletion> + Send + 'static {
        let BureauSimulation { delay, score } = self.bureau;
        async move {
            debug!(?request, "bureau lookup started");
            tokio::time::sleep(delay).await;
            EnrichmentCompletion {
                request,
                channel: Channel::Bureau,
                result: Ok(EnrichmentOutcome::Bureau(BureauOutcome { score })),
            }
        }
    }

    pub fn analyze_statement(
        &self,
        request: RequestTag,
        upload: StatementUpload,
    ) -> impl Future<Output = EnrichmentCompletion> + Send + 'static {
        let gateway = Arc::clone(&self.gateway);
        let timeout = self.timeout;
        async move {
            let result = analyze(gateway, upload, timeout).await;
            EnrichmentCompletion {
                request,
                channel: Channel::Statement,
                result,
            }
        }
    }
}

async fn analyze<G>(
    gateway: Arc<G>,
    upload: StatementUpload,
    timeout: Duration,
) -> Result<EnrichmentOutcome, ChannelFailure>
where
    G: CreditGateway + 'static,
{
    preflight_statement(&upload)?;

    let file_name = upload.file_name.clone();
    let analysis: StatementAnalysis =
        dispatch(timeout, move || gateway.analyze_statement(&upload))
            .await
            .map_err(|err| ChannelFailure::from_dispatch(Channel::Statement, err))?;

    if !analysis.is_verified {
        return Err(ChannelFailure::Unverified);
    }

    info!(file = %file_name, "statement analysis received");
    Ok(EnrichmentOutcome::Statement(StatementOutcome {
        estimated_salary: analysis.estimated_salary,
        average_balance: analysis.average_balance,
        cheque_bounces: analysis.cheque_bounces,
        gambling_count: analysis.gambling_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(contents: &str) -> StatementUpload {
        StatementUpload::csv("statement.csv", contents.as_bytes().to_vec())
    }

    #[test]
    fn preflight_accepts_standard_and_synonym_headers() {
        assert!(preflight_statement(&upload("date,amount,type,narration\n")).is_ok());
        assert!(preflight_statement(&upload(
            "Txn_Date, Transaction_Amount ,DR_CR,Particulars\n"
        ))
        .is_ok());
    }

    #[test]
    fn preflight_accepts_split_amount_columns() {
        let statement = "Date,Narration,Chq/Ref.No.,WithdrawalAmt,DepositAmt,ClosingBalance\n";
        assert!(preflight_statement(&upload(statement)).is_ok());
    }

    #[test]
    fn preflight_names_missing_columns() {
        match preflight_statement(&upload("date,amount\n")) {
            Err(ChannelFailure::InvalidStatement { detail }) => {
                assert_eq!(detail, "CSV missing columns: type, narration")
            }
            other => panic!("expected invalid statement, got {other:?}"),
        }
        assert!(matches!(
            preflight_statement(&upload("")),
            Err(ChannelFailure::InvalidStatement { .. })
        ));
    }

    #[test]
    fn preflight_rejects_non_csv_uploads() {
        let pdf = StatementUpload {
            file_name: "statement.pdf".to_string(),
            content_type: "application/pdf".parse().expect("valid mime"),
            bytes: b"%PDF-1.7".to_vec(),
        };
        match preflight_statement(&pdf) {
            Err(ChannelFailure::InvalidStatement { detail }) => {
                assert_eq!(detail, "expected a CSV file, got application/pdf")
            }
            other => panic!("expected invalid statement, got {other:?}"),
        }
    }

    #[test]
    fn statement_notification_summarizes_analysis() {
        let outcome = EnrichmentOutcome::Statement(StatementOutcome {
            estimated_salary: 85_000.0,
            average_balance: 41_250.6,
            cheque_bounces: 2,
            gambling_count: 0,
        });
        let notification = outcome.notification();
        assert_eq!(notification.title, "Statement Verified");
        assert_eq!(
            notification.description,
            "Salary: ₹85,000 | Avg Bal: ₹41,251 | Bounces: 2"
        );
    }

    #[test]
    fn failures_know_their_channel() {
        assert_eq!(ChannelFailure::Unverified.channel(), Channel::Statement);
        let timed_out = ChannelFailure::TimedOut {
            channel: Channel::Bureau,
        };
        assert_eq!(timed_out.notification().title, "Bureau Fetch Failed");
        assert_eq!(timed_out.to_string(), "bureau request timed out");
    }
}
