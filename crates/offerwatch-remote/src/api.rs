use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::RemoteError;
use crate::transport::{HttpRequest, HttpResponse, Method, Transport};

/// Web API interface holding the trade offer methods.
pub const ECON_SERVICE: &str = "IEconService";

/// Web API interface holding the item metadata methods.
pub const ECONOMY_INTERFACE: &str = "ISteamEconomy";

/// Credentials for the remote service. Obtaining them is the caller's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    /// Community session id echoed in every community form post.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub api_base: String,
    pub community_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: "https://api.steampowered.com".to_string(),
            community_base: "https://steamcommunity.com".to_string(),
        }
    }
}

/// Thin client over a [`Transport`] that knows how the remote reports
/// failures: HTTP status, the `x-eresult` header, `strError` bodies and
/// session expiry.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    endpoints: Endpoints,
}

fn parse_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or(Value::Null)
}

/// Split `"Message (26)"` into the message and its result code.
fn split_result_code(text: &str) -> (String, Option<u32>) {
    let trimmed = text.trim();
    if let Some(open) = trimmed.rfind(" (") {
        if let Some(code) = trimmed[open + 2..]
            .strip_suffix(')')
            .and_then(|c| c.parse().ok())
        {
            return (trimmed[..open].to_string(), Some(code));
        }
    }
    (trimmed.to_string(), None)
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            endpoints: Endpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn session_id(&self) -> &str {
        self.credentials.session_id.as_deref().unwrap_or_default()
    }

    pub fn community_url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoints.community_base)
    }

    /// Call a web API method. `params` go in the query string for GET and
    /// in the form body for POST.
    pub async fn call(
        &self,
        method: Method,
        interface: &str,
        name: &str,
        version: u32,
        params: Vec<(String, String)>,
    ) -> Result<Value, RemoteError> {
        let url = format!(
            "{}/{interface}/{name}/v{version}/",
            self.endpoints.api_base
        );
        let mut request = match method {
            Method::Get => HttpRequest::get(url),
            Method::Post => HttpRequest::post(url),
        };

        let auth = match (&self.credentials.api_key, &self.credentials.access_token) {
            (Some(key), _) => ("key", key.as_str()),
            (None, Some(token)) => ("access_token", token.as_str()),
            (None, None) => return Err(RemoteError::MissingCredentials),
        };
        let pairs = params
            .into_iter()
            .chain(std::iter::once((auth.0.to_string(), auth.1.to_string())));
        for (key, value) in pairs {
            request = match method {
                Method::Get => request.query(&key, value),
                Method::Post => request.form(&key, value),
            };
        }

        debug!(interface, method = name, "Web API call");
        let response = self.transport.request(request).await?;
        Self::classify_api(response)
    }

    /// GET on the trade offer service, version 1.
    pub async fn econ_get(
        &self,
        name: &str,
        params: Vec<(String, String)>,
    ) -> Result<Value, RemoteError> {
        self.call(Method::Get, ECON_SERVICE, name, 1, params).await
    }

    fn classify_api(response: HttpResponse) -> Result<Value, RemoteError> {
        if response.body.contains("Access is denied") {
            return Err(RemoteError::SessionExpired(format!(
                "HTTP error {}",
                response.status
            )));
        }
        if response.status != 200 {
            return Err(RemoteError::Transport(format!(
                "HTTP error {}",
                response.status
            )));
        }

        let body = parse_body(&response.body);
        let eresult = response
            .header("x-eresult")
            .and_then(|v| v.trim().parse::<u32>().ok());
        let eresult = match eresult {
            // Fail with a non-empty body still carries usable data.
            Some(2) if Self::has_payload(&body) => Some(1),
            other => other,
        };
        if let Some(code) = eresult.filter(|code| *code != 1) {
            return Err(RemoteError::Rejected {
                eresult: Some(code),
                message: format!("EResult {code}"),
            });
        }

        if !body.is_object() {
            return Err(RemoteError::Protocol("Invalid API response".to_string()));
        }
        Ok(body)
    }

    fn has_payload(body: &Value) -> bool {
        let Some(object) = body.as_object() else {
            return false;
        };
        object.len() > 1
            || object
                .get("response")
                .and_then(Value::as_object)
                .is_some_and(|r| !r.is_empty())
    }

    /// Form POST to a community page that answers with JSON.
    /// `session_status` is the status code the page uses for a lost session.
    pub async fn community_post(
        &self,
        path: &str,
        referer: &str,
        form: Vec<(String, String)>,
        session_status: u16,
    ) -> Result<Value, RemoteError> {
        let mut request = HttpRequest::post(self.community_url(path)).header("Referer", referer);
        for (key, value) in form {
            request = request.form(&key, value);
        }

        debug!(path, "Community post");
        let response = self.transport.request(request).await?;
        if response.status == session_status {
            return Err(RemoteError::SessionExpired(format!(
                "HTTP error {}",
                response.status
            )));
        }
        if response.status != 200 {
            return Err(RemoteError::Transport(format!(
                "HTTP error {}",
                response.status
            )));
        }

        let body = parse_body(&response.body);
        if !body.is_object() {
            return Err(RemoteError::Protocol("Malformed JSON response".to_string()));
        }
        if let Some(text) = body.get("strError").and_then(Value::as_str) {
            let (message, eresult) = split_result_code(text);
            return Err(RemoteError::Rejected { eresult, message });
        }
        Ok(body)
    }

    /// GET a community page and return its markup.
    pub async fn community_get(&self, path: &str) -> Result<String, RemoteError> {
        let response = self
            .transport
            .request(HttpRequest::get(self.community_url(path)))
            .await?;
        if response.status != 200 {
            return Err(RemoteError::Transport(format!(
                "HTTP error {}",
                response.status
            )));
        }
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;
    use serde_json::json;

    fn client(transport: Arc<MockTransport>) -> ApiClient {
        ApiClient::new(
            transport,
            Credentials {
                api_key: Some("KEY".to_string()),
                ..Credentials::default()
            },
        )
    }

    #[tokio::test]
    async fn call_passes_key_and_params() {
        let transport = Arc::new(MockTransport::always(HttpResponse::ok_json(
            &json!({"response": {}}),
        )));
        let api = client(transport.clone());
        api.econ_get("GetTradeOffers", vec![("cursor".into(), "0".into())])
            .await
            .unwrap();

        let request = &transport.requests()[0];
        assert_eq!(
            request.url,
            "https://api.steampowered.com/IEconService/GetTradeOffers/v1/"
        );
        assert_eq!(request.query_param("key"), Some("KEY"));
        assert_eq!(request.query_param("cursor"), Some("0"));
    }

    #[tokio::test]
    async fn access_token_used_without_key() {
        let transport = Arc::new(MockTransport::always(HttpResponse::ok_json(&json!({}))));
        let api = ApiClient::new(
            transport.clone(),
            Credentials {
                access_token: Some("TOKEN".to_string()),
                ..Credentials::default()
            },
        );
        api.econ_get("GetTradeOffers", Vec::new()).await.unwrap();
        assert_eq!(transport.requests()[0].query_param("access_token"), Some("TOKEN"));
    }

    #[tokio::test]
    async fn missing_credentials() {
        let transport = Arc::new(MockTransport::always(HttpResponse::ok_json(&json!({}))));
        let api = ApiClient::new(transport.clone(), Credentials::default());
        let err = api.econ_get("GetTradeOffers", Vec::new()).await.unwrap_err();
        assert!(matches!(err, RemoteError::MissingCredentials));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn http_error_and_access_denied() {
        let api = client(Arc::new(MockTransport::always(HttpResponse::new(500, "oops"))));
        let err = api.econ_get("X", Vec::new()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Transport(ref m) if m == "HTTP error 500"));

        let api = client(Arc::new(MockTransport::always(HttpResponse::new(
            403,
            "<h1>Access is denied</h1>",
        ))));
        assert!(api.econ_get("X", Vec::new()).await.unwrap_err().is_session_expired());
    }

    #[tokio::test]
    async fn eresult_header_classification() {
        let rejected = client(Arc::new(MockTransport::always(
            HttpResponse::ok_json(&json!({"response": {}})).with_header("x-eresult", 15),
        )));
        assert!(matches!(
            rejected.econ_get("X", Vec::new()).await.unwrap_err(),
            RemoteError::Rejected { eresult: Some(15), .. }
        ));

        let empty_fail = client(Arc::new(MockTransport::always(
            HttpResponse::ok_json(&json!({"response": {}})).with_header("x-eresult", 2),
        )));
        assert!(empty_fail.econ_get("X", Vec::new()).await.is_err());

        let fail_with_data = client(Arc::new(MockTransport::always(
            HttpResponse::ok_json(&json!({"response": {"offer": {}}})).with_header("x-eresult", 2),
        )));
        assert!(fail_with_data.econ_get("X", Vec::new()).await.is_ok());
    }

    #[tokio::test]
    async fn non_object_body_is_protocol_error() {
        let api = client(Arc::new(MockTransport::always(HttpResponse::new(200, "[1]"))));
        assert!(matches!(
            api.econ_get("X", Vec::new()).await.unwrap_err(),
            RemoteError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn community_post_errors() {
        let api = client(Arc::new(MockTransport::always(HttpResponse::new(401, ""))));
        assert!(api
            .community_post("/tradeoffer/1/cancel", "r", Vec::new(), 401)
            .await
            .unwrap_err()
            .is_session_expired());

        let api = client(Arc::new(MockTransport::always(HttpResponse::ok_json(
            &json!({"strError": "There was an error sending your trade offer. (26)"}),
        ))));
        match api
            .community_post("/tradeoffer/new/send", "r", Vec::new(), 401)
            .await
            .unwrap_err()
        {
            RemoteError::Rejected { eresult, message } => {
                assert_eq!(eresult, Some(26));
                assert_eq!(message, "There was an error sending your trade offer.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn result_code_split() {
        assert_eq!(split_result_code("Oops"), ("Oops".to_string(), None));
        assert_eq!(split_result_code("Oops (x)"), ("Oops (x)".to_string(), None));
    }
}
