//! Boundary to the remote scoring, statement-analysis, history and auth services.
//!
//! Every call is blocking and runs on tokio's blocking pool through [`dispatch`], so the
//! workflow's own flow is only suspended while a request is in flight.

mod http;

pub use http::HttpCreditGateway;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflows::application::{ApplicantContext, DecisionResult, StatementUpload};

/// Consumed service contracts. Implementations must be shareable across blocking tasks.
pub trait CreditGateway: Send + Sync {
    fn register(&self, registration: &Registration) -> Result<RegistrationOutcome, GatewayError>;
    fn login(&self, credentials: &Credentials) -> Result<AccessToken, GatewayError>;
    fn analyze_statement(&self, upload: &StatementUpload)
        -> Result<StatementAnalysis, GatewayError>;
    fn submit_application(
        &self,
        application: &ApplicantContext,
    ) -> Result<DecisionResult, GatewayError>;
    fn loan_history(&self) -> Result<Vec<DecisionResult>, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Bearer credential returned by `login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
}

/// Raw statement-analysis payload as returned by the analysis service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementAnalysis {
    pub estimated_salary: f64,
    pub average_balance: f64,
    pub cheque_bounces: u32,
    pub gambling_count: u32,
    pub is_verified: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("service responded with status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("credentials rejected by the service")]
    Unauthorized,
    #[error("malformed service response: {0}")]
    Decode(String),
}

/// Outcome of running a gateway call under a deadline.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("request timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("request task was interrupted")]
    Interrupted,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Runs a blocking gateway call off the async executor and bounds it by `timeout`.
///
/// A call that outlives the deadline keeps running on the blocking pool, but its result is
/// dropped.
pub async fn dispatch<T, F>(timeout: Duration, call: F) -> Result<T, DispatchError>
where
    F: FnOnce() -> Result<T, GatewayError> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(call);
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(DispatchError::TimedOut(timeout)),
        Ok(Err(_)) => Err(DispatchError::Interrupted),
        Ok(Ok(result)) => result.map_err(DispatchError::from),
    }
}
