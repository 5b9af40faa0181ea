use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use risk_lens::gateway::{
    AccessToken, CreditGateway, Credentials, GatewayError, Registration, RegistrationOutcome,
    StatementAnalysis,
};
use risk_lens::workflows::application::{
    ApplicantContext, ApplicationSession, ApplicationWorkflow, DecisionResult, HistoryBrowser,
    StatementUpload, Verdict,
};
use risk_lens::workflows::explanation::{ExplanationRenderer, Factor};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Per-process BFF state: one workflow driver, one session, one history view.
///
/// Locks are only held between awaits, never across them.
pub(crate) struct RiskLensState<G> {
    pub(crate) workflow: Arc<ApplicationWorkflow<G>>,
    pub(crate) session: Arc<Mutex<ApplicationSession>>,
    pub(crate) history: Arc<Mutex<HistoryBrowser<G>>>,
    pub(crate) request_timeout: Duration,
}

impl<G> Clone for RiskLensState<G> {
    fn clone(&self) -> Self {
        Self {
            workflow: Arc::clone(&self.workflow),
            session: Arc::clone(&self.session),
            history: Arc::clone(&self.history),
            request_timeout: self.request_timeout,
        }
    }
}

impl<G> RiskLensState<G>
where
    G: CreditGateway + 'static,
{
    pub(crate) fn new(workflow: ApplicationWorkflow<G>, request_timeout: Duration) -> Self {
        let history = HistoryBrowser::new(
            Arc::clone(workflow.gateway()),
            *workflow.renderer(),
            request_timeout,
        );
        Self {
            workflow: Arc::new(workflow),
            session: Arc::new(Mutex::new(ApplicationSession::new())),
            history: Arc::new(Mutex::new(history)),
            request_timeout,
        }
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, ApplicationSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn history(&self) -> MutexGuard<'_, HistoryBrowser<G>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn renderer(&self) -> &ExplanationRenderer {
        self.workflow.renderer()
    }
}

pub(crate) const MINIMUM_CREDIT_SCORE: u32 = 650;
pub(crate) const MAXIMUM_LOAN_TO_INCOME: f64 = 10.0;

#[derive(Default)]
struct DemoLedger {
    users: HashMap<String, String>,
    decisions: Vec<DecisionResult>,
    next_id: i64,
}

/// In-process stand-in for the remote credit service.
///
/// Applies the two hard policy rules, otherwise produces a fixed linear attribution so
/// demos and route tests are deterministic.
#[derive(Default, Clone)]
pub(crate) struct DemoCreditGateway {
    ledger: Arc<Mutex<DemoLedger>>,
    statement: Arc<Mutex<Option<StatementAnalysis>>>,
    latency: Duration,
}

impl DemoCreditGateway {
    #[cfg(test)]
    pub(crate) fn with_statement(analysis: StatementAnalysis) -> Self {
        let gateway = Self::default();
        *gateway
            .statement
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(analysis);
        gateway
    }

    #[cfg(test)]
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn wait(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }

    fn ledger(&self) -> MutexGuard<'_, DemoLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn demo_statement_analysis() -> StatementAnalysis {
    StatementAnalysis {
        estimated_salary: 85_000.0,
        average_balance: 41_250.0,
        cheque_bounces: 0,
        gambling_count: 0,
        is_verified: true,
    }
}

impl CreditGateway for DemoCreditGateway {
    fn register(&self, registration: &Registration) -> Result<RegistrationOutcome, GatewayError> {
        let mut ledger = self.ledger();
        if ledger.users.contains_key(&registration.email) {
            return Ok(RegistrationOutcome::AlreadyExists);
        }
        ledger
            .users
            .insert(registration.email.clone(), registration.password.clone());
        Ok(RegistrationOutcome::Created)
    }

    fn login(&self, credentials: &Credentials) -> Result<AccessToken, GatewayError> {
        let ledger = self.ledger();
        match ledger.users.get(&credentials.username) {
            Some(password) if *password == credentials.password => Ok(AccessToken {
                access_token: format!("demo-{}", credentials.username),
                token_type: "bearer".to_string(),
            }),
            _ => Err(GatewayError::Unauthorized),
        }
    }

    fn analyze_statement(
        &self,
        _upload: &StatementUpload,
    ) -> Result<StatementAnalysis, GatewayError> {
        self.wait();
        let scripted = self
            .statement
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(scripted.unwrap_or_else(demo_statement_analysis))
    }

    fn submit_application(
        &self,
        application: &ApplicantContext,
    ) -> Result<DecisionResult, GatewayError> {
        self.wait();
        let (verdict, score, factors) = score_application(application);
        let mut ledger = self.ledger();
        ledger.next_id += 1;
        let decision = DecisionResult {
            id: Some(ledger.next_id),
            verdict: Verdict(verdict.to_string()),
            score,
            factors,
            created_at: Some(Utc::now()),
            applicant: application.clone(),
        };
        ledger.decisions.push(decision.clone());
        Ok(decision)
    }

    fn loan_history(&self) -> Result<Vec<DecisionResult>, GatewayError> {
        Ok(self.ledger().decisions.iter().rev().cloned().collect())
    }
}

fn score_application(application: &ApplicantContext) -> (&'static str, f64, Vec<Factor>) {
    if application.credit_score < MINIMUM_CREDIT_SCORE {
        return (
            "REJECTED_POLICY",
            0.0,
            vec![Factor::policy(format!(
                "Credit Score below policy threshold ({MINIMUM_CREDIT_SCORE})."
            ))],
        );
    }
    let max_loan_limit = application.income * MAXIMUM_LOAN_TO_INCOME;
    if application.loan_amount > max_loan_limit {
        return (
            "REJECTED_POLICY",
            0.0,
            vec![Factor::policy(format!(
                "Loan amount exceeds 10x monthly income limit. Max allowed: {max_loan_limit:?}"
            ))],
        );
    }

    let income = application.income.max(1.0);
    let terms = [
        ("AMT_INCOME_TOTAL", signed((50_000.0 - income) / 50_000.0, 0.30)),
        (
            "AMT_CREDIT",
            signed(application.loan_amount / income / 5.0 - 1.0, 0.20),
        ),
        (
            "CREDIT_SCORE",
            signed((700.0 - f64::from(application.credit_score)) / 100.0, 0.25),
        ),
        (
            "YEARS_EMPLOYED",
            signed((3.0 - f64::from(application.years_employed)) / 10.0, 0.15),
        ),
        (
            "AGE_YEARS",
            signed((30.0 - f64::from(application.age)) / 30.0, 0.10),
        ),
    ];

    let risk = (0.5 + terms.iter().map(|(_, magnitude)| magnitude).sum::<f64>()).clamp(0.0, 1.0);
    let score = ((1.0 - risk) * 1000.0).round() / 10.0;
    let verdict = if score >= 50.0 {
        "APPROVED"
    } else {
        "REJECTED_HIGH_RISK"
    };

    let mut ranked = terms.to_vec();
    ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    let factors = ranked
        .into_iter()
        .map(|(feature, magnitude)| Factor::attribution(feature, magnitude))
        .collect();

    (verdict, score, factors)
}

fn signed(ratio: f64, weight: f64) -> f64 {
    (ratio.clamp(-1.0, 1.0) * weight * 1000.0).round() / 1000.0
}
