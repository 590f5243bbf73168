//! Caller identity extracted from the inbound request.

use std::collections::BTreeMap;

use axum::http::HeaderMap;

/// Header carrying a caller id when no bearer token is present.
pub const CALLER_HEADER: &str = "x-relay-caller";

/// Who is asking, as far as the HTTP layer can tell.
///
/// Handed to every registry resolver and authorization callback. The
/// endpoint does not authenticate anything itself; callbacks decide what
/// `caller` means.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Bearer token or `x-relay-caller` value.
    pub caller: Option<String>,
    /// Request headers with UTF-8 values, lowercased names.
    pub headers: BTreeMap<String, String>,
}

impl RequestContext {
    /// Context for an anonymous caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context for a named caller.
    pub fn for_caller(caller: impl Into<String>) -> Self {
        Self {
            caller: Some(caller.into()),
            headers: BTreeMap::new(),
        }
    }

    /// Build from request headers.
    ///
    /// `Authorization: Bearer <token>` wins over `x-relay-caller`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let collected: BTreeMap<String, String> = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let bearer = collected
            .get("authorization")
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let caller = bearer.or_else(|| {
            collected
                .get(CALLER_HEADER)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        });

        Self {
            caller,
            headers: collected,
        }
    }

    /// Header value by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
