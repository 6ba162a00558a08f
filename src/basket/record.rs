//! Captured-request snapshot and search predicate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header name to ordered values, as captured from the wire.
///
/// Duplicate values are preserved in arrival order. Names carry the canonical
/// `Title-Case` form used on the wire rather than hyper's lowercase
/// normalization, so stored requests read like the client sent them.
pub type Headers = HashMap<String, Vec<String>>;

/// Collected data of a single HTTP request; immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestData {
    /// Capture time, milliseconds since epoch.
    pub date: i64,
    #[serde(rename = "headers")]
    pub header: Headers,
    pub content_length: i64,
    pub body: String,
    pub method: String,
    pub path: String,
    pub query: String,
}

impl RequestData {
    /// Builds a snapshot from the pieces of an inbound hyper request with an
    /// already collected body.
    pub fn from_parts(
        method: &hyper::Method,
        uri: &hyper::Uri,
        headers: &hyper::HeaderMap,
        body: String,
    ) -> Self {
        let mut header: Headers = HashMap::new();
        for (name, value) in headers.iter() {
            header
                .entry(canonical_header_name(name.as_str()))
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let content_length = headers
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(body.len() as i64);

        Self {
            date: chrono::Utc::now().timestamp_millis(),
            header,
            content_length,
            body,
            method: method.to_string(),
            path: uri.path().to_string(),
            query: uri.query().unwrap_or("").to_string(),
        }
    }

    /// Checks if the request matches the search criteria.
    ///
    /// `scope` selects the fields to search: `body`, `query` or `headers`;
    /// any other value (including `any`) searches all three. Matching is a
    /// byte-exact, case-sensitive substring test; an empty `query` matches
    /// every request.
    pub fn matches(&self, query: &str, scope: &str) -> bool {
        let (in_body, in_query, in_headers) = match scope {
            "body" => (true, false, false),
            "query" => (false, true, false),
            "headers" => (false, false, true),
            _ => (true, true, true),
        };

        if in_body && self.body.contains(query) {
            return true;
        }

        if in_query && self.query.contains(query) {
            return true;
        }

        if in_headers {
            for values in self.header.values() {
                if values.iter().any(|v| v.contains(query)) {
                    return true;
                }
            }
        }

        false
    }
}

/// Converts a lowercase header name to its canonical `Title-Case` form.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_request() -> RequestData {
        let mut header = Headers::new();
        header.insert(
            "Content-Type".to_string(),
            vec!["application/json".to_string()],
        );
        header.insert(
            "Accept".to_string(),
            vec!["text/html".to_string(), "application/json".to_string()],
        );

        RequestData {
            date: 0,
            header,
            content_length: 21,
            body: r#"{ "user": "tester" }"#.to_string(),
            method: "POST".to_string(),
            path: "/test/demo".to_string(),
            query: "name=abc&version=12".to_string(),
        }
    }

    #[test]
    fn test_matches_body() {
        let req = test_request();
        assert!(req.matches("tester", "body"));
        assert!(!req.matches("name=abc", "body"));
        assert!(!req.matches("html", "body"));
    }

    #[test]
    fn test_matches_query() {
        let req = test_request();
        assert!(req.matches("version=12", "query"));
        assert!(!req.matches("tester", "query"));
    }

    #[test]
    fn test_matches_headers() {
        let req = test_request();
        assert!(req.matches("application/json", "headers"));
        assert!(req.matches("text/html", "headers"));
        assert!(!req.matches("tester", "headers"));
    }

    #[test]
    fn test_matches_any() {
        let req = test_request();
        assert!(req.matches("tester", "any"));
        assert!(req.matches("version", ""));
        assert!(req.matches("html", "anything-else"));
        assert!(!req.matches("nope", "any"));
    }

    #[test]
    fn test_matches_is_case_sensitive() {
        let req = test_request();
        assert!(!req.matches("Tester", "body"));
    }

    #[test]
    fn test_matches_empty_query() {
        let req = test_request();
        assert!(req.matches("", "any"));
        assert!(req.matches("", "headers"));
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x-do-not-forward"), "X-Do-Not-Forward");
        assert_eq!(canonical_header_name("te"), "Te");
    }

    #[test]
    fn test_from_parts() {
        let method = hyper::Method::POST;
        let uri: hyper::Uri = "http://localhost/test/demo?name=abc&version=12"
            .parse()
            .unwrap();
        let mut headers = hyper::HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        headers.append("accept", "text/html".parse().unwrap());
        headers.append("accept", "application/json".parse().unwrap());

        let data = RequestData::from_parts(&method, &uri, &headers, "hello".to_string());
        assert_eq!(data.method, "POST");
        assert_eq!(data.path, "/test/demo");
        assert_eq!(data.query, "name=abc&version=12");
        assert_eq!(data.body, "hello");
        assert_eq!(data.content_length, 5);
        assert_eq!(
            data.header.get("Content-Type"),
            Some(&vec!["text/plain".to_string()])
        );
        assert_eq!(
            data.header.get("Accept"),
            Some(&vec![
                "text/html".to_string(),
                "application/json".to_string()
            ])
        );
        assert!(data.date > 0);
    }
}
