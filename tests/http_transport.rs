use endpoint_probe::{
    candidate::Candidate,
    classify::ProbeResult,
    probe::{run_with, HaltReason, ProbeOptions},
    transport::{http::HttpSettings, HttpTransport},
};
use serde_json::json;
use socket2::{Domain, Socket, Type};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

/// Reads one request and returns (request line, headers, body).
fn read_request(stream: &TcpStream) -> (String, Vec<String>, String) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).unwrap();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let line = line.trim_end().to_string();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap();
            }
        }
        headers.push(line);
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).unwrap();
    (
        request_line.trim_end().to_string(),
        headers,
        String::from_utf8(body).unwrap(),
    )
}

fn respond(mut stream: TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        302 => "Found",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Status",
    };
    let location = if status == 302 {
        "Location: /api/auth/me\r\n"
    } else {
        ""
    };
    let resp = format!(
        "HTTP/1.1 {status} {reason}\r\n{location}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(resp.as_bytes()).unwrap();
    stream.flush().unwrap();
}

/// Serves `n` requests, answering by path, and hands back what it saw.
fn serve(n: usize) -> (String, thread::JoinHandle<Vec<(String, Vec<String>, String)>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for stream in listener.incoming().take(n) {
            let stream = stream.unwrap();
            let (line, headers, body) = read_request(&stream);
            let path = line.split_whitespace().nth(1).unwrap_or("").to_string();
            match path.as_str() {
                "/auth/login" => respond(stream, 401, r#"{"message":"Invalid credentials"}"#),
                "/api/auth/me" => respond(stream, 200, r#"{"user":{"role":"admin"}}"#),
                "/login" => respond(stream, 302, ""),
                _ => respond(stream, 404, r#"{"message":"Not Found"}"#),
            }
            seen.push((line, headers, body));
        }
        seen
    });
    (base, handle)
}

fn transport() -> HttpTransport {
    HttpTransport::new(&HttpSettings::default()).unwrap()
}

/// A loopback listener with a zero-length, already full accept queue: further
/// SYNs are dropped, so connects hang. `None` when the kernel keeps accepting.
fn stalled_listener() -> Option<(Socket, SocketAddr, Vec<TcpStream>)> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    socket.bind(&addr.into()).unwrap();
    socket.listen(0).unwrap();
    let addr = socket.local_addr().unwrap().as_socket().unwrap();

    let mut held = Vec::new();
    for _ in 0..16 {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => held.push(stream),
            Err(_) => return Some((socket, addr, held)),
        }
    }
    None
}

#[test]
fn unreachable_server_is_connection_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let base = format!("http://127.0.0.1:{port}");
    let candidates = vec![Candidate::get("/api/health"), Candidate::get("/health")];
    let options = ProbeOptions {
        timeout_ms: 3000,
        ..ProbeOptions::default()
    };

    let s = run_with(&transport(), &base, &candidates, &options);
    assert_eq!(s.len(), 1);
    assert!(matches!(
        s.attempts()[0].result,
        ProbeResult::ConnectionRefused { .. }
    ));
    assert_eq!(s.halted(), Some(HaltReason::ConnectionRefused));
}

#[test]
fn live_sweep_classifies_in_order() {
    let (base, server) = serve(2);
    let body = json!({"email": "probe@example.com", "password": "nope"});
    let candidates = vec![
        Candidate::post("/api/auth/login", body.clone()),
        Candidate::post("/auth/login", body.clone()),
    ];

    let s = run_with(&transport(), &base, &candidates, &ProbeOptions::default());
    let seen = server.join().unwrap();

    assert_eq!(s.len(), 2);
    assert_eq!(s.attempts()[0].result, ProbeResult::NotFound);
    assert_eq!(
        s.attempts()[1].result,
        ProbeResult::ExpectedFailure {
            status: 401,
            body: json!({"message": "Invalid credentials"}),
        }
    );

    assert_eq!(seen[0].0, "POST /api/auth/login HTTP/1.1");
    let sent: serde_json::Value = serde_json::from_str(&seen[1].2).unwrap();
    assert_eq!(sent, body);
    assert!(seen[1].1.iter().any(|h| h.eq_ignore_ascii_case("content-type: application/json")));
}

#[test]
fn bearer_token_is_sent() {
    let (base, server) = serve(1);
    let options = ProbeOptions {
        auth_token: Some("abc.def".into()),
        ..ProbeOptions::default()
    };

    let s = run_with(&transport(), &base, &[Candidate::get("/api/auth/me")], &options);
    let seen = server.join().unwrap();

    assert!(s.attempts()[0].result.is_success());
    assert!(seen[0]
        .1
        .iter()
        .any(|h| h.eq_ignore_ascii_case("authorization: Bearer abc.def")));
}

#[test]
fn stalled_handshake_is_connection_refused() {
    let Some((_socket, addr, _held)) = stalled_listener() else {
        eprintln!("accept queue never filled; skipping");
        return;
    };
    let base = format!("http://{addr}");
    let candidates = vec![
        Candidate::get("/a"),
        Candidate::get("/b"),
        Candidate::get("/c"),
    ];
    let options = ProbeOptions {
        timeout_ms: 1000,
        ..ProbeOptions::default()
    };

    let started = Instant::now();
    let s = run_with(&transport(), &base, &candidates, &options);
    let elapsed = started.elapsed();

    assert_eq!(s.len(), 1);
    assert!(matches!(
        s.attempts()[0].result,
        ProbeResult::ConnectionRefused { .. }
    ));
    assert_eq!(s.halted(), Some(HaltReason::ConnectionRefused));
    let attempt_ms = s.attempts()[0].elapsed_ms;
    assert!((500..=1500).contains(&attempt_ms), "elapsed_ms={attempt_ms}");
    assert!(elapsed < Duration::from_millis(2500), "sweep took {elapsed:?}");
}

#[test]
fn silent_server_times_out_without_halting() {
    // Never accepted, but the kernel completes the handshake from the backlog.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let candidates = vec![Candidate::get("/a"), Candidate::get("/b")];
    let options = ProbeOptions {
        timeout_ms: 400,
        ..ProbeOptions::default()
    };

    let s = run_with(&transport(), &base, &candidates, &options);

    assert_eq!(s.len(), 2);
    assert_eq!(s.halted(), None);
    for attempt in s.attempts() {
        assert!(
            matches!(
                attempt.result,
                ProbeResult::UnknownError {
                    status: None,
                    timed_out: true,
                    ..
                }
            ),
            "{:?}",
            attempt.result
        );
        assert!(attempt.elapsed_ms >= 300, "elapsed_ms={}", attempt.elapsed_ms);
    }
    drop(listener);
}

#[test]
fn redirects_are_reported_not_followed() {
    let (base, server) = serve(1);

    let s = run_with(&transport(), &base, &[Candidate::get("/login")], &ProbeOptions::default());
    let seen = server.join().unwrap();

    assert_eq!(seen.len(), 1);
    assert!(matches!(
        s.attempts()[0].result,
        ProbeResult::UnknownError {
            status: Some(302),
            ..
        }
    ));
}
