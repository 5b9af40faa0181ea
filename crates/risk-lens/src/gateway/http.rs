use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use ureq::http::{Response, StatusCode};
use ureq::{Agent, Body};

use super::{
    AccessToken, CreditGateway, Credentials, GatewayError, Registration, RegistrationOutcome,
    StatementAnalysis,
};
use crate::config::ServiceConfig;
use crate::workflows::application::{ApplicantContext, DecisionResult, StatementUpload};

/// Blocking HTTP adapter for the remote credit service.
///
/// The bearer token obtained from [`CreditGateway::login`] is remembered and attached to
/// every later call.
pub struct HttpCreditGateway {
    agent: Agent,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpCreditGateway {
    pub fn new(config: &ServiceConfig) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(config.request_timeout))
            .http_status_as_error(false)
            .build();

        Self {
            agent: Agent::new_with_config(agent_config),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.remember_token(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorization(&self) -> Option<String> {
        self.token
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|token| format!("Bearer {token}")))
    }

    fn remember_token(&self, token: String) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token);
        }
    }
}

impl CreditGateway for HttpCreditGateway {
    fn register(&self, registration: &Registration) -> Result<RegistrationOutcome, GatewayError> {
        let response = self
            .agent
            .post(self.url("/register"))
            .send_json(registration)
            .map_err(transport)?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT => Ok(RegistrationOutcome::AlreadyExists),
            _ => {
                read_json::<Value>(response)?;
                Ok(RegistrationOutcome::Created)
            }
        }
    }

    fn login(&self, credentials: &Credentials) -> Result<AccessToken, GatewayError> {
        let response = self
            .agent
            .post(self.url("/login"))
            .send_form([
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .map_err(transport)?;

        let token: AccessToken = read_json(response)?;
        self.remember_token(token.access_token.clone());
        Ok(token)
    }

    fn analyze_statement(
        &self,
        upload: &StatementUpload,
    ) -> Result<StatementAnalysis, GatewayError> {
        let boundary = multipart_boundary();
        let body = multipart_body(&boundary, upload);
        debug!(file = %upload.file_name, bytes = upload.bytes.len(), "uploading bank statement");

        let mut request = self
            .agent
            .post(self.url("/analyze-statement-file"))
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            );
        if let Some(authorization) = self.authorization() {
            request = request.header("Authorization", authorization);
        }

        let response = request.send(&body[..]).map_err(transport)?;
        read_json(response)
    }

    fn submit_application(
        &self,
        application: &ApplicantContext,
    ) -> Result<DecisionResult, GatewayError> {
        let mut request = self.agent.post(self.url("/apply"));
        if let Some(authorization) = self.authorization() {
            request = request.header("Authorization", authorization);
        }

        let response = request.send_json(application).map_err(transport)?;
        let payload: Value = read_json(response)?;
        let decoded = DecisionResult::from_wire(payload)
            .map_err(|err| GatewayError::Decode(err.to_string()))?;
        Ok(decoded.decision)
    }

    fn loan_history(&self) -> Result<Vec<DecisionResult>, GatewayError> {
        let mut request = self.agent.get(self.url("/loan-history"));
        if let Some(authorization) = self.authorization() {
            request = request.header("Authorization", authorization);
        }

        let response = request.call().map_err(transport)?;
        let payload: Vec<Value> = read_json(response)?;

        let mut records = Vec::with_capacity(payload.len());
        for (index, entry) in payload.into_iter().enumerate() {
            match DecisionResult::from_wire(entry) {
                Ok(decoded) => records.push(decoded.decision),
                Err(err) => warn!(index, %err, "dropping undecodable history record"),
            }
        }
        Ok(records)
    }
}

fn transport(err: ureq::Error) -> GatewayError {
    GatewayError::Transport(err.to_string())
}

fn read_json<T: DeserializeOwned>(mut response: Response<Body>) -> Result<T, GatewayError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(GatewayError::Unauthorized);
    }
    if !status.is_success() {
        let detail = response
            .body_mut()
            .read_to_string()
            .unwrap_or_else(|_| status.to_string());
        return Err(GatewayError::Status {
            status: status.as_u16(),
            detail,
        });
    }

    response
        .body_mut()
        .read_json::<T>()
        .map_err(|err| GatewayError::Decode(err.to_string()))
}

fn multipart_boundary() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    format!("risk-lens-{nanos:x}")
}

fn multipart_body(boundary: &str, upload: &StatementUpload) -> Vec<u8> {
    let file_name = upload.file_name.replace(['"', '\r', '\n'], "");
    let mut body = Vec::with_capacity(upload.bytes.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {}\r\n\r\n",
            upload.content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(&upload.bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_wraps_file_part() {
        let upload = StatementUpload::csv("march \"final\".csv", b"date,amount\n".to_vec());
        let body = multipart_body("b0undary", &upload);
        let text = String::from_utf8(body).expect("utf8 body");

        assert!(text.starts_with("--b0undary\r\n"));
        assert!(text.contains("filename=\"march final.csv\""));
        assert!(text.contains("Content-Type: text/csv"));
        assert!(text.contains("date,amount\n"));
        assert!(text.ends_with("\r\n--b0undary--\r\n"));
    }

    #[test]
    fn url_joins_without_double_slashes() {
        let gateway = HttpCreditGateway::new(&ServiceConfig {
            base_url: "http://scoring.local/".to_string(),
            ..ServiceConfig::default()
        });
        assert_eq!(gateway.url("/apply"), "http://scoring.local/apply");
    }

    #[test]
    fn remembered_token_becomes_bearer_header() {
        let gateway = HttpCreditGateway::new(&ServiceConfig::default()).with_token("abc123");
        assert_eq!(gateway.authorization().as_deref(), Some("Bearer abc123"));
    }
}
