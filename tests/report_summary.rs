use endpoint_probe::{
    candidate::{Candidate, Method},
    probe::{run_with, ProbeOptions, ProbeSession},
    report::{parse_summary, parse_summary_line, plan_digest, summary, SweepReport},
    transport::{Outcome, ProbeRequest, Transport},
};
use serde_json::json;

/// Answers by path suffix: `/NNN` returns status NNN with a JSON body.
struct ByStatus;

impl Transport for ByStatus {
    fn send(&self, req: &ProbeRequest) -> Outcome {
        let code = req.url.rsplit('/').next().unwrap_or("");
        match code.parse::<u16>() {
            Ok(status) => Outcome::Response {
                status,
                body: format!(r#"{{"status":{status},"detail":"line one\nline two"}}"#),
            },
            Err(_) => Outcome::TimedOut {
                message: "operation timed out".into(),
            },
        }
    }
}

fn sweep(paths: &[&str]) -> (Vec<Candidate>, ProbeSession) {
    let candidates: Vec<Candidate> = paths.iter().map(|p| Candidate::get(*p)).collect();
    let session = run_with(&ByStatus, "http://api.test", &candidates, &ProbeOptions::default());
    (candidates, session)
}

#[test]
fn one_line_per_attempt_in_order() {
    let (_, session) = sweep(&["/x/404", "/x/401", "/x/200", "/x/403", "/x/slow", "/x/500"]);
    let lines = summary(&session, 40);
    assert_eq!(lines.len(), session.len());
    assert_eq!(lines[0], "GET /x/404 -> not_found 404");
    assert!(lines[1].starts_with("GET /x/401 -> expected_failure 401 | {"));
    assert!(lines[4].contains("unknown_error | timed out: operation timed out"));

    let parsed = parse_summary(&lines.join("\n")).unwrap();
    assert_eq!(parsed.len(), session.len());
    for (line, attempt) in parsed.iter().zip(session.attempts()) {
        assert_eq!(line.method, attempt.candidate.method);
        assert_eq!(line.path, attempt.candidate.path);
        assert_eq!(line.label, attempt.result.label());
        assert_eq!(line.status, attempt.result.status());
    }
}

#[test]
fn fragments_are_single_line_and_truncated() {
    let (_, session) = sweep(&["/x/401"]);
    let line = &summary(&session, 10)[0];
    assert!(!line.contains('\n'));
    assert!(line.ends_with("..."));

    let bare = &summary(&session, 0)[0];
    assert_eq!(bare, "GET /x/401 -> expected_failure 401");
}

#[test]
fn parse_rejects_garbage() {
    assert!(parse_summary_line("nothing to see").is_err());
    assert!(parse_summary_line("FETCH /x -> success 200").is_err());
    assert!(parse_summary_line("GET /x -> maybe 200").is_err());
    assert!(parse_summary_line("GET /x -> success abc").is_err());

    let ok = parse_summary_line("POST /api/auth/login -> connection_refused | tcp connect error").unwrap();
    assert_eq!(ok.method, Method::Post);
    assert_eq!(ok.status, None);
}

#[test]
fn report_carries_counts_and_digest() {
    let (candidates, session) = sweep(&["/x/404", "/x/422", "/x/200"]);
    let report = SweepReport::build(
        "routes",
        &candidates,
        &session,
        "2026-01-01T00:00:00Z".into(),
        "2026-01-01T00:00:01Z".into(),
        80,
    );
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.counts.not_found, 1);
    assert_eq!(report.counts.expected_failure, 1);
    assert_eq!(report.counts.success, 1);
    assert_eq!(report.plan_digest, plan_digest(&candidates));
    assert_eq!(report.plan_digest.len(), 64);

    let v = serde_json::to_value(&report).unwrap();
    assert_eq!(v["attempts"][2]["result"]["kind"], json!("success"));
    assert_eq!(v["halted"], serde_json::Value::Null);
}

#[test]
fn digest_tracks_plan_changes() {
    let a = vec![Candidate::get("/a")];
    let b = vec![Candidate::get("/b")];
    assert_eq!(plan_digest(&a), plan_digest(&a.clone()));
    assert_ne!(plan_digest(&a), plan_digest(&b));
}

#[test]
fn arrows_inside_paths_and_fragments_survive_parsing() {
    let (_, session) = sweep(&["/docs/a -> b/401", "/x/404"]);
    let lines = summary(&session, 200);
    assert!(lines[0].contains(" -> expected_failure 401 | "));

    let parsed = parse_summary(&lines.join("\n")).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].path, "/docs/a -> b/401");
    assert_eq!(parsed[0].label, "expected_failure");
    assert_eq!(parsed[0].status, Some(401));
    assert_eq!(parsed[1].path, "/x/404");

    let line = parse_summary_line("GET /a -> success 200 | {\"next\":\"x -> y\"}").unwrap();
    assert_eq!(line.path, "/a");
    assert_eq!(line.status, Some(200));
}
