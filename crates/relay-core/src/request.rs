//! Subscription request wire shape and normalizer.
//!
//! Inbound bodies are parsed loosely as JSON and then normalized:
//! - `channel` must be a non-empty string (surrounding whitespace trimmed)
//! - `topics`, when present, must be an array of strings (duplicates dropped,
//!   first occurrence wins)
//! - `params` keeps only string/number/boolean/null values; nested arrays and
//!   objects are dropped, and a non-object `params` is ignored entirely

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A primitive request parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(serde_json::Number),
    /// JSON string.
    String(String),
}

impl ParamValue {
    /// Convert a JSON value, dropping arrays and objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

/// Request parameters, keyed and ordered by name.
pub type Params = BTreeMap<String, ParamValue>;

/// A normalized subscription request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Requested channel name.
    pub channel: String,
    /// Requested topics; `None` means every topic on the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    /// Primitive parameters forwarded to registry resolvers and callbacks.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Params,
}

impl SubscriptionRequest {
    /// Request every topic on `channel`.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            topics: None,
            params: Params::new(),
        }
    }

    /// Restrict the request to `topics`.
    #[must_use]
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    /// Attach one parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let _ = self.params.insert(key.into(), value.into());
        self
    }

    /// Parse and normalize a raw request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, RequestError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| RequestError::MalformedJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Normalize an already-parsed JSON body.
    pub fn from_value(value: Value) -> Result<Self, RequestError> {
        let Value::Object(mut body) = value else {
            return Err(RequestError::NotAnObject);
        };

        let channel = match body.remove("channel") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_owned(),
            _ => return Err(RequestError::MissingChannel),
        };

        let topics = match body.remove("topics") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                let mut topics: Vec<String> = Vec::with_capacity(items.len());
                for item in items {
                    let Value::String(topic) = item else {
                        return Err(RequestError::InvalidTopics);
                    };
                    if !topics.contains(&topic) {
                        topics.push(topic);
                    }
                }
                Some(topics)
            }
            Some(_) => return Err(RequestError::InvalidTopics),
        };

        let params = match body.remove("params") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| ParamValue::from_json(v).map(|p| (k.clone(), p)))
                .collect(),
            _ => Params::new(),
        };

        Ok(Self {
            channel,
            topics,
            params,
        })
    }

    /// A string parameter by name.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(ParamValue::as_str)
    }
}

/// Why a request body was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The body was not parseable JSON.
    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),
    /// The body parsed but was not a JSON object.
    #[error("request body must be a JSON object")]
    NotAnObject,
    /// `channel` was absent, not a string, or blank.
    #[error("`channel` must be a non-empty string")]
    MissingChannel,
    /// `topics` was present but not an array of strings.
    #[error("`topics` must be an array of strings")]
    InvalidTopics,
}
