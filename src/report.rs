use crate::{
    candidate::{Candidate, Method},
    classify::{self, ProbeResult},
    probe::{Attempt, Counts, HaltReason, ProbeSession},
    util::{sha256_hex, truncate_chars},
};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

const ARROW: &str = " -> ";
const FRAGMENT_SEP: &str = " | ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub suite: String,
    pub base_url: String,
    pub plan_digest: String,
    pub started: String,
    pub finished: String,
    pub halted: Option<HaltReason>,
    pub counts: Counts,
    pub attempts: Vec<AttemptReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReport {
    pub index: usize,
    pub line: String,
    pub elapsed_ms: u64,
    pub candidate: Candidate,
    pub result: ProbeResult,
}

impl SweepReport {
    pub fn build(
        suite: &str,
        candidates: &[Candidate],
        session: &ProbeSession,
        started: String,
        finished: String,
        fragment_chars: usize,
    ) -> Self {
        Self {
            suite: suite.to_string(),
            base_url: session.base_url.clone(),
            plan_digest: plan_digest(candidates),
            started,
            finished,
            halted: session.halted(),
            counts: session.counts(),
            attempts: session
                .attempts()
                .iter()
                .enumerate()
                .map(|(index, a)| AttemptReport {
                    index,
                    line: summary_line(a, fragment_chars),
                    elapsed_ms: a.elapsed_ms,
                    candidate: a.candidate.clone(),
                    result: a.result.clone(),
                })
                .collect(),
        }
    }
}

/// SHA-256 over the candidate list, so two reports can be checked for the same plan.
pub fn plan_digest(candidates: &[Candidate]) -> String {
    let raw = serde_json::to_vec(candidates).unwrap_or_default();
    sha256_hex(&raw)
}

pub fn summary_line(attempt: &Attempt, fragment_chars: usize) -> String {
    let mut line = format!("{}{}{}", attempt.candidate.label(), ARROW, attempt.result);
    if let Some(fragment) = attempt.result.fragment() {
        let fragment = fragment.replace(['\r', '\n'], " ");
        if fragment_chars > 0 && !fragment.is_empty() {
            line.push_str(FRAGMENT_SEP);
            line.push_str(&truncate_chars(&fragment, fragment_chars));
        }
    }
    line
}

pub fn summary(session: &ProbeSession, fragment_chars: usize) -> Vec<String> {
    session
        .attempts()
        .iter()
        .map(|a| summary_line(a, fragment_chars))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryLine {
    pub method: Method,
    pub path: String,
    pub label: String,
    pub status: Option<u16>,
}

pub fn parse_summary_line(line: &str) -> Result<SummaryLine> {
    // The outcome arrow is the first one followed by a known label; paths may contain arrows too.
    let (head, tail) = line
        .match_indices(ARROW)
        .map(|(i, _)| (&line[..i], &line[i + ARROW.len()..]))
        .find(|(_, tail)| {
            tail.split_whitespace()
                .next()
                .is_some_and(classify::is_label)
        })
        .ok_or_else(|| anyhow!("no '{}' followed by a classification in: {line}", ARROW.trim()))?;
    let (method, path) = head
        .split_once(' ')
        .ok_or_else(|| anyhow!("missing path in summary line: {line}"))?;
    let method =
        Method::parse(method).ok_or_else(|| anyhow!("unknown method {method:?} in: {line}"))?;

    let outcome = tail.split_once(FRAGMENT_SEP).map_or(tail, |(o, _)| o);
    let mut parts = outcome.split_whitespace();
    let label = parts
        .next()
        .ok_or_else(|| anyhow!("missing classification in: {line}"))?;
    let status = match parts.next() {
        Some(s) => Some(
            s.parse::<u16>()
                .map_err(|_| anyhow!("bad status {s:?} in: {line}"))?,
        ),
        None => None,
    };

    Ok(SummaryLine {
        method,
        path: path.to_string(),
        label: label.to_string(),
        status,
    })
}

pub fn parse_summary(text: &str) -> Result<Vec<SummaryLine>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_summary_line)
        .collect()
}
