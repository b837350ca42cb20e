//! Blocking HTTP seam
//!
//! Fetchers talk to the platform through [`Transport`]. [`HttpTransport`] is
//! the real client; [`ScriptedTransport`] replays canned responses in order
//! and records what was asked of it.

use crate::config::ExplorerConfig;
use crate::error::{classify_status, classify_transport, ExplorerError, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Status and raw body of one HTTP exchange
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        HttpResponse::new(status, body.to_string())
    }

    /// Check the status, then parse the body as JSON
    pub fn into_json(self, endpoint: &str) -> Result<Value> {
        classify_status(endpoint, self.status, &self.body)?;

        let mut body = self.body;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(ExplorerError::schema(endpoint, "response body is empty"));
        }
        simd_json::serde::from_slice::<Value>(&mut body).map_err(|e| {
            ExplorerError::schema(endpoint, format!("response body is not valid JSON: {}", e))
        })
    }
}

/// Sends one request and waits for the full response
pub trait Transport {
    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &BTreeMap<String, String>,
    ) -> Result<HttpResponse>;

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &BTreeMap<String, String>,
    ) -> Result<HttpResponse> {
        (**self).get(url, query, headers)
    }

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<HttpResponse> {
        (**self).post_json(url, body, headers)
    }
}

/// reqwest's blocking client
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Option<Duration>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ExplorerError::request("http client", None, e.to_string()))?;
        Ok(HttpTransport { client })
    }

    pub fn from_config(config: &ExplorerConfig) -> Result<Self> {
        Self::new(config.connect_timeout, config.request_timeout)
    }

    fn execute(&self, url: &str, mut request: reqwest::blocking::RequestBuilder, headers: &BTreeMap<String, String>) -> Result<HttpResponse> {
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().map_err(|e| classify_transport(url, &e))?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(|e| classify_transport(url, &e))?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &BTreeMap<String, String>,
    ) -> Result<HttpResponse> {
        self.execute(url, self.client.get(url).query(query), headers)
    }

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<HttpResponse> {
        self.execute(url, self.client.post(url).json(body), headers)
    }
}

/// A request as seen by [`ScriptedTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl RecordedRequest {
    /// Value of the first query parameter named `key`
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Replays queued responses in order; fails once the queue runs dry
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: RefCell<VecDeque<Result<HttpResponse>>>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        ScriptedTransport::default()
    }

    pub fn respond(self, response: HttpResponse) -> Self {
        self.responses.borrow_mut().push_back(Ok(response));
        self
    }

    pub fn respond_json(self, status: u16, body: Value) -> Self {
        self.respond(HttpResponse::json(status, &body))
    }

    pub fn fail(self, error: ExplorerError) -> Self {
        self.responses.borrow_mut().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }

    fn next(&self, request: RecordedRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.requests.borrow_mut().push(request);
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ExplorerError::request(url, None, "no scripted response left")))
    }
}

impl Transport for ScriptedTransport {
    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &BTreeMap<String, String>,
    ) -> Result<HttpResponse> {
        self.next(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            query: query.to_vec(),
            body: None,
            headers: headers.clone(),
        })
    }

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<HttpResponse> {
        self.next(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            query: Vec::new(),
            body: Some(body.clone()),
            headers: headers.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_into_json_parses_body() {
        let response = HttpResponse::json(200, &json!({"result": [1, 2]}));
        let value = response.into_json("/core/devices").unwrap();
        assert_eq!(value["result"][1], 2);
    }

    #[test]
    fn test_into_json_rejects_bad_status_first() {
        let response = HttpResponse::new(503, "not json at all");
        let err = response.into_json("/core/devices").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Request);
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_into_json_rejects_non_json() {
        let err = HttpResponse::new(200, "<html></html>").into_json("/core/devices").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let err = HttpResponse::new(200, "  ").into_json("/core/devices").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_scripted_transport_replays_in_order() {
        let transport = ScriptedTransport::new()
            .respond_json(200, json!({"n": 1}))
            .respond_json(500, json!({"n": 2}));
        let headers = BTreeMap::new();

        let first = transport.get("http://x/a", &[("page".into(), "0".into())], &headers).unwrap();
        assert_eq!(first.status, 200);
        let second = transport.post_json("http://x/b", &json!({"q": 1}), &headers).unwrap();
        assert_eq!(second.status, 500);
        assert!(transport.get("http://x/c", &[], &headers).is_err());

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].param("page"), Some("0"));
        assert_eq!(requests[1].method, "POST");
        assert_eq!(requests[1].body, Some(json!({"q": 1})));
    }
}
