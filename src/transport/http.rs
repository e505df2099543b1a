use super::{types::*, Transport};
use crate::candidate::Method;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::collections::HashMap;
use std::error::Error as _;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub use_system_proxy: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("endpoint-probe/{}", env!("CARGO_PKG_VERSION")),
            use_system_proxy: false,
        }
    }
}

/// Blocking HTTP transport. Clients are cached per connect budget and reused.
pub struct HttpTransport {
    settings: HttpSettings,
    clients: Mutex<HashMap<Duration, Client>>,
}

impl HttpTransport {
    /// Builds the client for the default budget up front so TLS or resolver
    /// setup problems surface here rather than on the first request.
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let connect = connect_budget(DEFAULT_TIMEOUT);
        let client = build_client(settings, connect)?;
        Ok(Self {
            settings: settings.clone(),
            clients: Mutex::new(HashMap::from([(connect, client)])),
        })
    }

    fn client_for(&self, timeout: Duration) -> Result<Client> {
        let connect = connect_budget(timeout);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&connect) {
            return Ok(client.clone());
        }
        let client = build_client(&self.settings, connect)?;
        clients.insert(connect, client.clone());
        Ok(client)
    }
}

fn build_client(settings: &HttpSettings, connect_timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.clone())
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none());
    if !settings.use_system_proxy {
        builder = builder.no_proxy();
    }
    builder
        .build()
        .with_context(|| format!("building http client (connect timeout {connect_timeout:?})"))
}

// The connect phase gets 90% of the request budget, so a host that drops SYNs
// expires as a connect error before the total timeout fires.
fn connect_budget(timeout: Duration) -> Duration {
    timeout
        .saturating_sub(timeout / 10)
        .max(Duration::from_millis(1))
}

impl Transport for HttpTransport {
    fn send(&self, req: &ProbeRequest) -> Outcome {
        debug!(
            "http {} {} timeout={:?} auth={}",
            req.method,
            req.url,
            req.timeout,
            req.bearer_token.is_some()
        );

        let client = match self.client_for(req.timeout) {
            Ok(client) => client,
            Err(e) => {
                warn!("no http client for {}: {e:#}", req.url);
                return Outcome::Failed {
                    message: format!("{e:#}"),
                };
            }
        };

        let mut rb = client
            .request(to_reqwest(req.method), &req.url)
            .timeout(req.timeout)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = &req.body {
            rb = rb.json(body);
        }
        if let Some(token) = &req.bearer_token {
            rb = rb.bearer_auth(token);
        }

        let resp = match rb.send() {
            Ok(resp) => resp,
            Err(e) => return outcome_from_error(&e),
        };
        let status = resp.status().as_u16();
        match resp.text() {
            Ok(body) => Outcome::Response { status, body },
            Err(e) => outcome_from_error(&e),
        }
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

// Connect errors win over timeouts: a connect timeout means the host is unreachable.
fn outcome_from_error(e: &reqwest::Error) -> Outcome {
    let message = error_chain(e);
    if e.is_connect() {
        Outcome::ConnectFailed { message }
    } else if e.is_timeout() {
        Outcome::TimedOut { message }
    } else {
        Outcome::Failed { message }
    }
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}
