use crate::candidate::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub method: Method,
    pub url: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

/// Raw transport result before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Response { status: u16, body: String },
    ConnectFailed { message: String },
    TimedOut { message: String },
    Failed { message: String },
}
