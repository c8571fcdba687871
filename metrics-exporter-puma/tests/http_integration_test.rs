use std::{
    collections::HashMap,
    io::{self, BufRead as _, BufReader, Write as _},
    net::{SocketAddr, TcpListener},
    sync::mpsc,
    thread,
    time::Duration,
};

use metrics_exporter_puma::{
    ContainerIdentity, ControlAppSource, FetchError, HttpFetcher, IdentityResolver, SourceError,
    StatsSource, ECS_METADATA_URI_VAR,
};

/// Serves a single HTTP/1.1 response, and reports the request line that was received.
fn serve_once(status: &'static str, body: &'static str, delay: Duration) -> (SocketAddr, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                break;
            }
        }
        tx.send(request_line.trim_end().to_string()).unwrap();

        thread::sleep(delay);

        let mut stream = stream;
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes());
    });

    (addr, rx)
}

fn hostname(name: &'static str) -> impl Fn() -> io::Result<String> + Send {
    move || Ok(name.to_string())
}

#[test]
fn fetches_body() {
    let (addr, requests) = serve_once("200 OK", r#"{"running":2}"#, Duration::ZERO);

    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
    let body = fetcher.get(&format!("http://{addr}/v4/metadata")).unwrap();

    assert_eq!(body, r#"{"running":2}"#);
    assert_eq!(requests.recv().unwrap(), "GET /v4/metadata HTTP/1.1");
}

#[test]
fn non_success_status_is_an_error() {
    let (addr, _requests) = serve_once("503 Service Unavailable", "", Duration::ZERO);

    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
    let result = fetcher.get(&format!("http://{addr}/"));

    assert!(matches!(result, Err(FetchError::Status { status: 503 })));
}

#[test]
fn slow_server_times_out() {
    let (addr, _requests) = serve_once("200 OK", "{}", Duration::from_secs(2));

    let fetcher = HttpFetcher::new(Duration::from_millis(100)).unwrap();
    let result = fetcher.get(&format!("http://{addr}/"));

    assert!(matches!(result, Err(FetchError::Timeout(timeout)) if timeout == Duration::from_millis(100)));
}

#[test]
fn control_app_source_sends_token() {
    let (addr, requests) = serve_once("200 OK", r#"{"backlog":0}"#, Duration::ZERO);

    let mut source =
        ControlAppSource::new(&format!("tcp://{addr}"), Some("s3cr3t"), Duration::from_secs(5)).unwrap();
    let stats = source.fetch().unwrap();

    assert_eq!(stats, r#"{"backlog":0}"#);
    assert_eq!(requests.recv().unwrap(), "GET /stats?token=s3cr3t HTTP/1.1");
}

#[test]
fn control_app_source_reports_fetch_errors() {
    let (addr, _requests) = serve_once("403 Forbidden", "", Duration::ZERO);

    let mut source = ControlAppSource::new(&format!("http://{addr}"), None, Duration::from_secs(5)).unwrap();
    let result = source.fetch();

    assert!(matches!(result, Err(SourceError::Fetch(FetchError::Status { status: 403 }))));
}

#[test]
fn container_identity_from_ecs_metadata() {
    let (addr, _requests) = serve_once(
        "200 OK",
        r#"{"DockerId":"abc","ContainerARN":"arn:aws:ecs:us-east-1:123456789012:container/cluster/task/def456"}"#,
        Duration::ZERO,
    );

    let env = HashMap::from([(ECS_METADATA_URI_VAR.to_string(), format!("http://{addr}/v4"))]);
    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
    let mut identity = ContainerIdentity::new(env, fetcher, hostname("fallback-host"));

    assert_eq!(identity.resolve().as_deref(), Some("def456"));
}

#[test]
fn container_identity_falls_back_when_metadata_is_unreachable() {
    // Bind and immediately drop a listener, so that the port is very likely closed.
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

    let env = HashMap::from([(ECS_METADATA_URI_VAR.to_string(), format!("http://{addr}/v4"))]);
    let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
    let mut identity = ContainerIdentity::new(env, fetcher, hostname("web-1\n"));

    assert_eq!(identity.resolve().as_deref(), Some("web-1"));
}
