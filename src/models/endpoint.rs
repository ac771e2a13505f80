use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// HTTP method of a discovered endpoint. Only GET and POST are produced by
/// the crawler; anything else is normalized away during CSV parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered endpoint. Identity is `(method, url)`; parameter names are
/// union-merged when the same endpoint is reported more than once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub method: HttpMethod,
    pub parameters: BTreeSet<String>,
    pub post_data: Option<String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            url: url.into(),
            method,
            parameters: BTreeSet::new(),
            post_data: None,
        }
    }

    pub fn key(&self) -> (HttpMethod, &str) {
        (self.method, &self.url)
    }

    pub fn merge_parameters<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.parameters.extend(names);
    }
}

/// Where a parameter travels in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Query,
    Body,
}

/// A single testable parameter. Identity is `(endpoint, name)` where the
/// endpoint identity is `(method, url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub endpoint_url: String,
    pub method: HttpMethod,
    pub name: String,
    pub location: ParamLocation,
    pub testable: bool,
}

impl Parameter {
    pub fn key(&self) -> (HttpMethod, &str, &str) {
        (self.method, &self.endpoint_url, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parameter_merge() {
        let mut ep = Endpoint::new("http://example.com/search", HttpMethod::Get);
        ep.merge_parameters(vec!["q".to_string(), "page".to_string()]);
        ep.merge_parameters(vec!["q".to_string(), "sort".to_string()]);
        assert_eq!(ep.parameters.len(), 3);
        assert!(ep.parameters.contains("sort"));
    }

    #[test]
    fn test_endpoint_key_distinguishes_method() {
        let get = Endpoint::new("http://example.com/login", HttpMethod::Get);
        let post = Endpoint::new("http://example.com/login", HttpMethod::Post);
        assert_ne!(get.key(), post.key());
    }

    #[test]
    fn test_method_serialization() {
        let json = serde_json::to_string(&HttpMethod::Post).unwrap();
        assert_eq!(json, "\"POST\"");
        let parsed: HttpMethod = serde_json::from_str("\"GET\"").unwrap();
        assert_eq!(parsed, HttpMethod::Get);
    }
}
