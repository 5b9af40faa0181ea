use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::gateway::{
    AccessToken, CreditGateway, Credentials, GatewayError, Registration, RegistrationOutcome,
    StatementAnalysis,
};
use crate::workflows::application::{
    ApplicantContext, ApplicationWorkflow, BureauSimulation, DecisionResult, Gender,
    StatementUpload, Verdict,
};
use crate::workflows::explanation::{ExplanationRenderer, Factor};

pub(super) const BUREAU_SCORE: u32 = 780;

/// In-memory gateway whose answers are scripted per test.
#[derive(Default)]
pub(super) struct ScriptedGateway {
    analysis: Mutex<Option<StatementAnalysis>>,
    decision: Mutex<Option<DecisionResult>>,
    history: Mutex<Option<Vec<DecisionResult>>>,
    latency: Duration,
    submissions: Mutex<Vec<ApplicantContext>>,
    uploads: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn with_analysis(self, analysis: StatementAnalysis) -> Self {
        *self.analysis.lock().expect("analysis lock") = Some(analysis);
        self
    }

    pub(super) fn with_decision(self, decision: DecisionResult) -> Self {
        *self.decision.lock().expect("decision lock") = Some(decision);
        self
    }

    pub(super) fn with_history(self, history: Vec<DecisionResult>) -> Self {
        *self.history.lock().expect("history lock") = Some(history);
        self
    }

    pub(super) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(super) fn submissions(&self) -> Vec<ApplicantContext> {
        self.submissions.lock().expect("submissions lock").clone()
    }

    pub(super) fn uploads(&self) -> Vec<String> {
        self.uploads.lock().expect("uploads lock").clone()
    }

    fn wait(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }
}

fn offline(service: &str) -> GatewayError {
    GatewayError::Transport(format!("{service} unreachable"))
}

impl CreditGateway for ScriptedGateway {
    fn register(&self, _registration: &Registration) -> Result<RegistrationOutcome, GatewayError> {
        Ok(RegistrationOutcome::Created)
    }

    fn login(&self, credentials: &Credentials) -> Result<AccessToken, GatewayError> {
        Ok(AccessToken {
            access_token: format!("token-{}", credentials.username),
            token_type: "bearer".to_string(),
        })
    }

    fn analyze_statement(
        &self,
        upload: &StatementUpload,
    ) -> Result<StatementAnalysis, GatewayError> {
        self.wait();
        self.uploads
            .lock()
            .expect("uploads lock")
            .push(upload.file_name.clone());
        self.analysis
            .lock()
            .expect("analysis lock")
            .clone()
            .ok_or_else(|| offline("statement analysis"))
    }

    fn submit_application(
        &self,
        application: &ApplicantContext,
    ) -> Result<DecisionResult, GatewayError> {
        self.wait();
        self.submissions
            .lock()
            .expect("submissions lock")
            .push(application.clone());
        let mut decision = self
            .decision
            .lock()
            .expect("decision lock")
            .clone()
            .ok_or(GatewayError::Status {
                status: 503,
                detail: "scoring offline".to_string(),
            })?;
        decision.applicant = application.clone();
        Ok(decision)
    }

    fn loan_history(&self) -> Result<Vec<DecisionResult>, GatewayError> {
        self.wait();
        self.history
            .lock()
            .expect("history lock")
            .clone()
            .ok_or_else(|| offline("history"))
    }
}

pub(super) fn workflow(gateway: &Arc<ScriptedGateway>) -> ApplicationWorkflow<ScriptedGateway> {
    workflow_with_timeout(gateway, Duration::from_secs(2))
}

pub(super) fn workflow_with_timeout(
    gateway: &Arc<ScriptedGateway>,
    timeout: Duration,
) -> ApplicationWorkflow<ScriptedGateway> {
    ApplicationWorkflow::with_parts(
        Arc::clone(gateway),
        BureauSimulation {
            delay: Duration::from_millis(5),
            score: BUREAU_SCORE,
        },
        timeout,
        ExplanationRenderer::default(),
    )
}

pub(super) fn verified_analysis(salary: f64) -> StatementAnalysis {
    StatementAnalysis {
        estimated_salary: salary,
        average_balance: 41_250.0,
        cheque_bounces: 1,
        gambling_count: 0,
        is_verified: true,
    }
}

pub(super) fn statement_csv() -> StatementUpload {
    StatementUpload::csv(
        "march.csv",
        b"Date,Amount,Type,Narration\n2025-03-01,85000,CR,SALARY ACME\n".to_vec(),
    )
}

pub(super) fn applicant() -> ApplicantContext {
    ApplicantContext {
        full_name: "Asha Rao".to_string(),
        income: 20_000.0,
        loan_amount: 150_000.0,
        credit_score: 712,
        age: 29,
        years_employed: 4,
        gender: Gender::Female,
    }
}

pub(super) fn approved_decision() -> DecisionResult {
    DecisionResult {
        id: Some(41),
        verdict: Verdict("APPROVED".to_string()),
        score: 82.5,
        factors: vec![
            Factor::attribution("AMT_INCOME_TOTAL", 0.42),
            Factor::attribution("AMT_CREDIT", -0.1),
            Factor::attribution("AGE_YEARS", -0.05),
        ],
        created_at: None,
        applicant: ApplicantContext::default(),
    }
}

pub(super) fn policy_decision() -> DecisionResult {
    DecisionResult {
        id: Some(42),
        verdict: Verdict("REJECTED_POLICY".to_string()),
        score: 0.0,
        factors: vec![Factor::policy("Credit Score below policy threshold (650).")],
        created_at: None,
        applicant: ApplicantContext {
            credit_score: 590,
            ..applicant()
        },
    }
}
