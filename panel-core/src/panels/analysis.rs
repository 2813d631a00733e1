//! Clients for the analysis API gateway: code check, problem analysis, and
//! student-code analysis. Each route takes one JSON body and answers with a
//! `{status, result, message?}` envelope.

use serde::{Serialize, de::DeserializeOwned};

use crate::config::Config;
use crate::error::{CoreResult, PanelError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{
    CodeCheckRequest, CodeCheckResponse, ProblemAnalysisRequest, ProblemAnalysisResponse,
    StudentCodeAnalysisRequest, StudentCodeAnalysisResponse,
};

pub const CODE_CHECK_PATH: &str = "/api/code-check";
pub const PROBLEM_ANALYSIS_PATH: &str = "/api/problem-analysis";
pub const STUDENT_ANALYSIS_PATH: &str = "/api/student-code-analysis";

#[derive(Debug, Clone)]
pub struct AnalysisClient {
    http: HttpClient,
    gateway_url: String,
}

impl AnalysisClient {
    pub fn new(http: HttpClient, gateway_url: impl Into<String>) -> Self {
        Self {
            http,
            gateway_url: gateway_url.into(),
        }
    }

    pub fn from_config(http: HttpClient, cfg: &Config) -> Self {
        Self::new(http, &cfg.endpoints.gateway_url)
    }

    pub async fn code_check(&self, req: &CodeCheckRequest) -> CoreResult<CodeCheckResponse> {
        require("code", &req.code)?;
        self.post("code_check", CODE_CHECK_PATH, req).await
    }

    pub async fn problem_analysis(&self, req: &ProblemAnalysisRequest) -> CoreResult<ProblemAnalysisResponse> {
        require("problem_description", &req.problem_description)?;
        self.post("problem_analysis", PROBLEM_ANALYSIS_PATH, req).await
    }

    pub async fn student_code_analysis(
        &self,
        req: &StudentCodeAnalysisRequest,
    ) -> CoreResult<StudentCodeAnalysisResponse> {
        require("student_code", &req.student_code)?;
        require("problem_description", &req.problem_description)?;
        self.post("student_code_analysis", STUDENT_ANALYSIS_PATH, req).await
    }

    async fn post<T, R>(&self, endpoint: &str, path: &str, body: &T) -> CoreResult<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.gateway_url.trim_end_matches('/'), path);
        let ctx = RequestCtx::endpoint(endpoint);
        let (resp, _request_id, latency_ms) = self.http.post_json::<_, R>(&url, body, &[], &ctx).await?;
        tracing::info!(endpoint, latency_ms, "analysis response received");
        Ok(resp)
    }
}

fn require(field: &'static str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(PanelError::EmptyInput { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    fn client(server: &MockServer) -> AnalysisClient {
        AnalysisClient::new(HttpClient::new_default().unwrap(), format!("{}/", server.base_url()))
    }

    #[tokio::test]
    async fn code_check_sends_defaults() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/api/code-check").json_body(json!({
                "code": "int main(){}",
                "language": "C++14",
                "model": "deepseek/deepseek-chat"
            }));
            then.status(200)
                .json_body(json!({"status": "success", "result": "looks fine"}));
        });
        let resp = client(&server)
            .code_check(&CodeCheckRequest::new("int main(){}"))
            .await
            .unwrap();
        assert_eq!(resp.status, "success");
        assert_eq!(resp.result, "looks fine");
        assert_eq!(resp.message, None);
        m.assert();
    }

    #[tokio::test]
    async fn problem_analysis_decodes_result() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/api/problem-analysis");
            then.status(200).json_body(json!({
                "status": "success",
                "result": {
                    "problem_code": "P1001",
                    "simplified_description": "add two numbers",
                    "edge_cases": "overflow",
                    "possible_errors": "int vs long",
                    "solutions": [{"lang": "cpp"}],
                    "std_code": "..."
                },
                "message": "ok"
            }));
        });
        let resp = client(&server)
            .problem_analysis(&ProblemAnalysisRequest {
                problem_code: "P1001".into(),
                problem_description: "a+b".into(),
            })
            .await
            .unwrap();
        assert_eq!(resp.result.simplified_description, "add two numbers");
        assert_eq!(resp.result.solutions.len(), 1);
        assert_eq!(resp.message.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn student_analysis_gateway_failure_is_unavailable() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/api/student-code-analysis");
            then.status(500).json_body(json!({"detail": "boom"}));
        });
        let err = client(&server)
            .student_code_analysis(&StudentCodeAnalysisRequest {
                problem_id: "7".into(),
                student_code: "print(1)".into(),
                problem_description: "print 2".into(),
                submission_history: vec![],
            })
            .await
            .unwrap_err();
        assert!(
            matches!(err, PanelError::Unavailable { ref endpoint } if endpoint == "student_code_analysis")
        );
    }

    #[tokio::test]
    async fn blank_fields_rejected_before_request() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST);
            then.status(200);
        });
        let c = client(&server);

        let err = c.code_check(&CodeCheckRequest::new(" ")).await.unwrap_err();
        assert!(matches!(err, PanelError::EmptyInput { field: "code" }));

        let err = c
            .problem_analysis(&ProblemAnalysisRequest {
                problem_code: "P1".into(),
                problem_description: "".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::EmptyInput { field: "problem_description" }));

        let err = c
            .student_code_analysis(&StudentCodeAnalysisRequest {
                problem_id: "1".into(),
                student_code: "\n".into(),
                problem_description: "d".into(),
                submission_history: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::EmptyInput { field: "student_code" }));
        m.assert_hits(0);
    }
}
