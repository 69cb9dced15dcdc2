//! Request view consumed by the security pipeline

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::security::authn::Claims;

/// Framework-independent view of an inbound request
///
/// Header names are stored lowercase. `body`, `query` and `params` are
/// replaced with their sanitized form by the input validation check.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityRequest {
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub body: Value,
    pub query: Value,
    pub params: Value,

    /// Verified token claims, attached by the authentication check
    pub identity: Option<Claims>,
}

impl SecurityRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            client_ip: client_ip.into(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            body: json!({}),
            query: json!({}),
            params: json!({}),
            identity: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Parse a `Cookie` header value into the cookie map
    pub fn parse_cookies(&mut self, header: &str) {
        for pair in header.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }
    }

    /// Copy of the request safe to persist: credentials and cookies removed
    pub fn sanitized_snapshot(&self) -> Value {
        let headers: HashMap<&str, &str> = self
            .headers
            .iter()
            .filter(|(name, _)| name.as_str() != "authorization" && name.as_str() != "cookie")
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        json!({
            "method": self.method,
            "path": self.path,
            "client_ip": self.client_ip,
            "headers": headers,
            "body": self.body,
            "query": self.query,
            "params": self.params,
        })
    }
}
