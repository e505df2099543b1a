use crate::transport::Outcome;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

pub const DEFAULT_EXISTS_STATUSES: [u16; 4] = [400, 401, 409, 422];

/// Statuses that prove an endpoint exists even though it rejected the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u16>", into = "Vec<u16>")]
pub struct ExistsSet(BTreeSet<u16>);

impl ExistsSet {
    /// 2xx, 403 and 404 have fixed classifications and are rejected here.
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Result<Self> {
        let mut set = BTreeSet::new();
        for status in statuses {
            if !(100..=599).contains(&status) {
                bail!("status {status} is not a valid HTTP status");
            }
            if (200..300).contains(&status) || status == 403 || status == 404 {
                bail!("status {status} cannot be used as an endpoint-exists status");
            }
            set.insert(status);
        }
        Ok(Self(set))
    }

    pub fn contains(&self, status: u16) -> bool {
        self.0.contains(&status)
    }

    pub fn statuses(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl Default for ExistsSet {
    fn default() -> Self {
        Self(DEFAULT_EXISTS_STATUSES.into_iter().collect())
    }
}

impl TryFrom<Vec<u16>> for ExistsSet {
    type Error = anyhow::Error;

    fn try_from(v: Vec<u16>) -> Result<Self> {
        ExistsSet::new(v)
    }
}

impl From<ExistsSet> for Vec<u16> {
    fn from(s: ExistsSet) -> Self {
        s.0.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeResult {
    Success {
        status: u16,
        body: Value,
    },
    ExpectedFailure {
        status: u16,
        body: Value,
    },
    NotFound,
    Forbidden,
    ConnectionRefused {
        message: String,
    },
    UnknownError {
        status: Option<u16>,
        message: String,
        timed_out: bool,
    },
}

impl ProbeResult {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeResult::Success { .. } => "success",
            ProbeResult::ExpectedFailure { .. } => "expected_failure",
            ProbeResult::NotFound => "not_found",
            ProbeResult::Forbidden => "forbidden",
            ProbeResult::ConnectionRefused { .. } => "connection_refused",
            ProbeResult::UnknownError { .. } => "unknown_error",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProbeResult::Success { status, .. } | ProbeResult::ExpectedFailure { status, .. } => {
                Some(*status)
            }
            ProbeResult::NotFound => Some(404),
            ProbeResult::Forbidden => Some(403),
            ProbeResult::ConnectionRefused { .. } => None,
            ProbeResult::UnknownError { status, .. } => *status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeResult::Success { .. })
    }

    /// Success, an exists-set rejection and 403 all prove the route is there.
    pub fn proves_existence(&self) -> bool {
        matches!(
            self,
            ProbeResult::Success { .. }
                | ProbeResult::ExpectedFailure { .. }
                | ProbeResult::Forbidden
        )
    }

    /// The part of the outcome worth showing next to the label.
    pub fn fragment(&self) -> Option<String> {
        match self {
            ProbeResult::Success { body, .. } | ProbeResult::ExpectedFailure { body, .. } => {
                match body {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                }
            }
            ProbeResult::NotFound | ProbeResult::Forbidden => None,
            ProbeResult::ConnectionRefused { message } => Some(message.clone()),
            ProbeResult::UnknownError {
                message, timed_out, ..
            } => {
                if *timed_out {
                    Some(format!("timed out: {message}"))
                } else {
                    Some(message.clone())
                }
            }
        }
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Some(status) => write!(f, "{} {}", self.label(), status),
            None => f.write_str(self.label()),
        }
    }
}

/// Labels accepted by [`ProbeResult::label`], in declaration order.
pub const LABELS: [&str; 6] = [
    "success",
    "expected_failure",
    "not_found",
    "forbidden",
    "connection_refused",
    "unknown_error",
];

pub fn is_label(s: &str) -> bool {
    LABELS.contains(&s)
}

/// Maps one transport outcome to a result. Pure; no I/O.
pub fn classify(outcome: &Outcome, exists: &ExistsSet) -> ProbeResult {
    match outcome {
        Outcome::ConnectFailed { message } => ProbeResult::ConnectionRefused {
            message: message.clone(),
        },
        Outcome::TimedOut { message } => ProbeResult::UnknownError {
            status: None,
            message: message.clone(),
            timed_out: true,
        },
        Outcome::Failed { message } => ProbeResult::UnknownError {
            status: None,
            message: message.clone(),
            timed_out: false,
        },
        Outcome::Response { status, body } => classify_status(*status, body, exists),
    }
}

pub fn classify_status(status: u16, body: &str, exists: &ExistsSet) -> ProbeResult {
    if exists.contains(status) {
        return ProbeResult::ExpectedFailure {
            status,
            body: lenient_body(body),
        };
    }

    match status {
        403 => ProbeResult::Forbidden,
        404 => ProbeResult::NotFound,
        200..=299 => match strict_body(body) {
            Ok(body) => ProbeResult::Success { status, body },
            Err(e) => ProbeResult::UnknownError {
                status: Some(status),
                message: format!("unparseable body: {e}"),
                timed_out: false,
            },
        },
        _ => {
            let body = body.trim();
            let message = if body.is_empty() {
                format!("unexpected status {status}")
            } else {
                format!("unexpected status {status}: {body}")
            };
            ProbeResult::UnknownError {
                status: Some(status),
                message,
                timed_out: false,
            }
        }
    }
}

fn strict_body(body: &str) -> serde_json::Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
}

fn lenient_body(body: &str) -> Value {
    strict_body(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
