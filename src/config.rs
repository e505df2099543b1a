use crate::{
    candidate::{self, Bindings, Candidate, Method},
    classify::ExistsSet,
    probe::ProbeOptions,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub probe: Probe,
    #[serde(default)]
    pub suites: Vec<Suite>,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()
            .with_context(|| format!("validating config: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.base_url.trim().is_empty() {
            bail!("target.base_url is empty");
        }
        if self.probe.timeout_ms == 0 {
            bail!("probe.timeout_ms must be > 0");
        }

        let mut seen = BTreeSet::new();
        for suite in &self.suites {
            if suite.name.trim().is_empty() {
                bail!("suite with empty name");
            }
            if suite.paths.is_empty() {
                bail!("suite {} has no paths", suite.name);
            }
            if suite.timeout_ms == Some(0) {
                bail!("suite {} timeout_ms must be > 0", suite.name);
            }
            if let Some(from) = &suite.use_token_from {
                if !seen.contains(from.as_str()) {
                    bail!(
                        "suite {} takes its token from {}, which is not an earlier suite",
                        suite.name,
                        from
                    );
                }
            }
            if !seen.insert(suite.name.as_str()) {
                bail!("duplicate suite name: {}", suite.name);
            }
        }
        Ok(())
    }

    pub fn suite(&self, name: &str) -> Result<&Suite> {
        self.suites
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| anyhow!("unknown suite: {name}"))
    }

    /// Static bearer token: `target.auth_token`, else the env var it names.
    pub fn auth_token(&self) -> Option<String> {
        if !self.target.auth_token.is_empty() {
            return Some(self.target.auth_token.clone());
        }
        if self.target.auth_token_env.is_empty() {
            return None;
        }
        std::env::var(&self.target.auth_token_env)
            .ok()
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub base_url: String,
    pub auth_token: String,
    pub auth_token_env: String,
    pub use_system_proxy: bool,
}
impl Default for Target {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            auth_token: "".into(),
            auth_token_env: "ENDPOINT_PROBE_TOKEN".into(),
            use_system_proxy: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Probe {
    pub timeout_ms: u64,
    pub stop_on_first_success: bool,
    pub stop_on_connection_refused: bool,
    pub exists_statuses: ExistsSet,
}
impl Default for Probe {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            stop_on_first_success: false,
            stop_on_connection_refused: true,
            exists_statuses: ExistsSet::default(),
        }
    }
}

/// A named candidate generator: every path crossed with every binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suite {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: Method,
    pub paths: Vec<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub bindings: Vec<Bindings>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub stop_on_first_success: Option<bool>,
    #[serde(default)]
    pub stop_on_connection_refused: Option<bool>,
    #[serde(default)]
    pub exists_statuses: Option<ExistsSet>,
    /// Name of an earlier suite whose first success carries a `token`.
    #[serde(default)]
    pub use_token_from: Option<String>,
}

fn default_method() -> Method {
    Method::Get
}

impl Suite {
    pub fn candidates(&self) -> Result<Vec<Candidate>> {
        candidate::expand(self.method, &self.paths, self.body.as_ref(), &self.bindings)
            .with_context(|| format!("expanding suite {}", self.name))
    }

    /// Suite overrides layered on the global probe section.
    pub fn options(&self, probe: &Probe, auth_token: Option<String>) -> ProbeOptions {
        ProbeOptions {
            timeout_ms: self.timeout_ms.unwrap_or(probe.timeout_ms),
            stop_on_first_success: self
                .stop_on_first_success
                .unwrap_or(probe.stop_on_first_success),
            stop_on_connection_refused: self
                .stop_on_connection_refused
                .unwrap_or(probe.stop_on_connection_refused),
            auth_token,
            exists: self
                .exists_statuses
                .clone()
                .unwrap_or_else(|| probe.exists_statuses.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub out_dir: String,
    pub write_report_json: bool,
    pub print_summary: bool,
    pub fragment_chars: usize,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            write_report_json: true,
            print_summary: true,
            fragment_chars: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
