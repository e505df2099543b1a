use crate::{
    classify,
    config::{Config, Suite},
    probe,
    report::{self, SweepReport},
    transport::{http::HttpSettings, HttpTransport},
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "endpoint-probe")]
#[command(about = "Sequential endpoint and credential discovery probe for JSON HTTP APIs")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./endpoint-probe.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print every suite's expanded candidates and effective options.
    Check {},
    /// Classify a status/body pair without touching the network.
    Classify {
        #[arg(long)]
        status: u16,
        #[arg(long, default_value = "")]
        body: String,
        /// Use this suite's exists statuses instead of the global ones.
        #[arg(long)]
        suite: Option<String>,
    },
    /// Run suites against the target, in config order.
    Sweep {
        /// Suites to run; all when omitted.
        #[arg(long = "suite")]
        suites: Vec<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    match &args.cmd {
        Command::Check {} => check(&cfg),
        Command::Classify { status, body, suite } => {
            classify_cmd(&cfg, *status, body, suite.as_deref())
        }
        Command::Sweep {
            suites,
            base_url,
            token,
            out_dir,
        } => sweep(
            &cfg,
            suites,
            base_url.as_deref(),
            token.as_deref(),
            out_dir.as_deref(),
        ),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["endpoint-probe.toml", "endpoint-probe.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Summaries go to stdout; logs stay on stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    Some(PathBuf::from(&cfg.output.out_dir).join("endpoint-probe.log"))
}

fn check(cfg: &Config) -> Result<()> {
    let mut suites = Vec::new();
    for suite in &cfg.suites {
        let candidates = suite.candidates()?;
        suites.push(serde_json::json!({
            "name": suite.name,
            "options": suite.options(&cfg.probe, None),
            "use_token_from": suite.use_token_from,
            "plan_digest": report::plan_digest(&candidates),
            "candidates": candidates,
        }));
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "base_url": cfg.target.base_url,
            "suites": suites,
        }))?
    );
    Ok(())
}

fn classify_cmd(cfg: &Config, status: u16, body: &str, suite: Option<&str>) -> Result<()> {
    let exists = match suite {
        Some(name) => cfg.suite(name)?.options(&cfg.probe, None).exists,
        None => cfg.probe.exists_statuses.clone(),
    };
    let result = classify::classify_status(status, body, &exists);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status": status,
            "exists_statuses": exists,
            "result": result,
        }))?
    );
    Ok(())
}

fn sweep(
    cfg: &Config,
    names: &[String],
    base_url: Option<&str>,
    token: Option<&str>,
    out_override: Option<&Path>,
) -> Result<()> {
    let suites: Vec<&Suite> = if names.is_empty() {
        cfg.suites.iter().collect()
    } else {
        names
            .iter()
            .map(|n| cfg.suite(n))
            .collect::<Result<_>>()?
    };
    if suites.is_empty() {
        bail!("no suites configured");
    }

    let base_url = base_url.unwrap_or(cfg.target.base_url.as_str());
    if base_url.trim().is_empty() {
        bail!("base URL is empty");
    }
    let static_token = token.map(str::to_string).or_else(|| cfg.auth_token());
    let out_dir = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.output.out_dir));

    let transport = HttpTransport::new(&HttpSettings {
        use_system_proxy: cfg.target.use_system_proxy,
        ..HttpSettings::default()
    })?;

    let mut harvested: BTreeMap<&str, String> = BTreeMap::new();

    for suite in suites {
        let candidates = suite.candidates()?;
        let token = match &suite.use_token_from {
            Some(from) => match harvested.get(from.as_str()) {
                Some(t) => Some(t.clone()),
                None => {
                    warn!(
                        "suite {} wants a token from {}, but none was harvested",
                        suite.name, from
                    );
                    static_token.clone()
                }
            },
            None => static_token.clone(),
        };
        let options = suite.options(&cfg.probe, token);

        info!(
            "sweep suite={} base_url={} candidates={}",
            suite.name,
            base_url,
            candidates.len()
        );

        let started = now_rfc3339();
        let session = probe::run_with(&transport, base_url, &candidates, &options);
        let finished = now_rfc3339();

        let counts = session.counts();
        info!(
            "suite={} attempted={} halted={:?} success={} expected_failure={} forbidden={} not_found={} refused={} unknown={}",
            suite.name,
            session.len(),
            session.halted(),
            counts.success,
            counts.expected_failure,
            counts.forbidden,
            counts.not_found,
            counts.connection_refused,
            counts.unknown_error
        );

        if let Some(t) = session.bearer_token() {
            harvested.insert(suite.name.as_str(), t.to_string());
        }

        if cfg.output.print_summary {
            println!("# {} @ {}", suite.name, base_url);
            for line in report::summary(&session, cfg.output.fragment_chars) {
                println!("{line}");
            }
        }

        if cfg.output.write_report_json {
            ensure_dir(&out_dir)?;
            let report = SweepReport::build(
                &suite.name,
                &candidates,
                &session,
                started,
                finished,
                cfg.output.fragment_chars,
            );
            let path = out_dir.join(format!("{}.report.json", suite.name));
            std::fs::write(&path, serde_json::to_string_pretty(&report)?)
                .with_context(|| format!("writing report: {}", path.display()))?;
            info!("report written to {}", path.display());
        }
    }

    Ok(())
}
