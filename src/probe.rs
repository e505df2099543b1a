use crate::{
    candidate::Candidate,
    classify::{self, ExistsSet, ProbeResult},
    transport::{http::HttpSettings, HttpTransport, Outcome, ProbeRequest, Transport},
    util::join_url,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOptions {
    pub timeout_ms: u64,
    pub stop_on_first_success: bool,
    pub stop_on_connection_refused: bool,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub exists: ExistsSet,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            stop_on_first_success: false,
            stop_on_connection_refused: true,
            auth_token: None,
            exists: ExistsSet::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    ConnectionRefused,
    FirstSuccess,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub candidate: Candidate,
    pub result: ProbeResult,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub success: usize,
    pub expected_failure: usize,
    pub forbidden: usize,
    pub not_found: usize,
    pub connection_refused: usize,
    pub unknown_error: usize,
}

/// Ordered record of one sweep: one attempt per candidate tried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSession {
    pub base_url: String,
    attempts: Vec<Attempt>,
    halted: Option<HaltReason>,
}

impl ProbeSession {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            attempts: Vec::new(),
            halted: None,
        }
    }

    fn push(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn halted(&self) -> Option<HaltReason> {
        self.halted
    }

    pub fn results(&self) -> impl Iterator<Item = &ProbeResult> {
        self.attempts.iter().map(|a| &a.result)
    }

    pub fn first_success(&self) -> Option<(&Candidate, u16, &Value)> {
        self.attempts.iter().find_map(|a| match &a.result {
            ProbeResult::Success { status, body } => Some((&a.candidate, *status, body)),
            _ => None,
        })
    }

    pub fn existing_endpoints(&self) -> Vec<&Candidate> {
        self.attempts
            .iter()
            .filter(|a| a.result.proves_existence())
            .map(|a| &a.candidate)
            .collect()
    }

    /// `token` field of the first successful body, as a login returns it.
    pub fn bearer_token(&self) -> Option<&str> {
        let (_, _, body) = self.first_success()?;
        body.get("token").and_then(Value::as_str)
    }

    pub fn counts(&self) -> Counts {
        let mut c = Counts::default();
        for r in self.results() {
            match r {
                ProbeResult::Success { .. } => c.success += 1,
                ProbeResult::ExpectedFailure { .. } => c.expected_failure += 1,
                ProbeResult::Forbidden => c.forbidden += 1,
                ProbeResult::NotFound => c.not_found += 1,
                ProbeResult::ConnectionRefused { .. } => c.connection_refused += 1,
                ProbeResult::UnknownError { .. } => c.unknown_error += 1,
            }
        }
        c
    }
}

/// Sweeps `candidates` against `base_url` over a fresh HTTP transport.
pub fn run(base_url: &str, candidates: &[Candidate], options: &ProbeOptions) -> ProbeSession {
    if candidates.is_empty() {
        return ProbeSession::new(base_url);
    }
    match HttpTransport::new(&HttpSettings::default()) {
        Ok(transport) => run_with(&transport, base_url, candidates, options),
        Err(e) => {
            warn!("http transport unavailable: {e:#}");
            let transport = Unavailable(format!("{e:#}"));
            run_with(&transport, base_url, candidates, options)
        }
    }
}

/// Stands in when no HTTP client could be built: every request fails locally.
struct Unavailable(String);

impl Transport for Unavailable {
    fn send(&self, _req: &ProbeRequest) -> Outcome {
        Outcome::Failed {
            message: self.0.clone(),
        }
    }
}

pub fn run_with(
    transport: &dyn Transport,
    base_url: &str,
    candidates: &[Candidate],
    options: &ProbeOptions,
) -> ProbeSession {
    let mut session = ProbeSession::new(base_url);
    let timeout = Duration::from_millis(options.timeout_ms);

    for (i, candidate) in candidates.iter().enumerate() {
        let req = ProbeRequest {
            method: candidate.method,
            url: join_url(base_url, &candidate.path),
            body: candidate.body.clone(),
            bearer_token: options.auth_token.clone(),
            timeout,
        };

        let started = Instant::now();
        let outcome = transport.send(&req);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let result = classify::classify(&outcome, &options.exists);

        info!(
            "probe {}/{} {} -> {} ({}ms)",
            i + 1,
            candidates.len(),
            candidate.label(),
            result,
            elapsed_ms
        );

        let halt = match &result {
            ProbeResult::ConnectionRefused { message } if options.stop_on_connection_refused => {
                warn!("server unreachable at {base_url}: {message}");
                Some(HaltReason::ConnectionRefused)
            }
            ProbeResult::Success { .. } if options.stop_on_first_success => {
                Some(HaltReason::FirstSuccess)
            }
            _ => None,
        };

        session.push(Attempt {
            candidate: candidate.clone(),
            result,
            elapsed_ms,
        });

        if let Some(reason) = halt {
            if session.len() < candidates.len() {
                debug!(
                    "halting sweep after {} of {} candidates: {:?}",
                    session.len(),
                    candidates.len(),
                    reason
                );
                session.halted = Some(reason);
            }
            break;
        }
    }

    session
}
