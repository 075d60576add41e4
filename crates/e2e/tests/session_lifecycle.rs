//! Session lifecycle against an in-process WebDriver endpoint
//!
//! The endpoint answers the handful of commands a session issues and records
//! every request line, so tests can count how often a session was deleted.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crudcheck_common::ConvergencePoller;
use crudcheck_e2e::scenarios::{DeleteContact, Scenario, ScenarioContext};
use crudcheck_e2e::table::TableView;
use crudcheck_e2e::webdriver::ELEMENT_KEY;
use crudcheck_e2e::{Credentials, E2eError, Session, SessionConfig};
use serde_json::{json, Value};

struct Request {
    method: String,
    path: String,
    body: Value,
}

struct Reply {
    status: u16,
    body: Value,
}

impl Reply {
    fn value(value: Value) -> Self {
        Self {
            status: 200,
            body: json!({ "value": value }),
        }
    }

    fn null() -> Self {
        Self::value(Value::Null)
    }

    fn error(status: u16, error: &str, message: &str) -> Self {
        Self {
            status,
            body: json!({ "value": { "error": error, "message": message, "stacktrace": "" } }),
        }
    }
}

type Handler = dyn Fn(&Request) -> Reply + Send + Sync;

struct FakeDriver {
    endpoint: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeDriver {
    fn start(handler: impl Fn(&Request) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let endpoint = format!("http://{}", listener.local_addr().expect("local_addr"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let log = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let handler = handler.clone();
                let log = log.clone();
                thread::spawn(move || serve(stream, handler.as_ref(), &log));
            }
        });

        Self { endpoint, requests }
    }

    /// Number of recorded requests equal to `line`, e.g. `DELETE /session/s1`
    fn count(&self, line: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| *r == line).count()
    }
}

/// Answer keep-alive HTTP/1.1 requests on one connection until it closes
fn serve(stream: TcpStream, handler: &Handler, log: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream);
    loop {
        let mut request_line = String::new();
        match reader.read_line(&mut request_line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();

        let mut length = 0;
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).unwrap_or(0) == 0 {
                return;
            }
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    length = value.trim().parse().unwrap_or(0);
                }
            }
        }

        let mut body = vec![0; length];
        if reader.read_exact(&mut body).is_err() {
            return;
        }
        let body = serde_json::from_slice(&body).unwrap_or(Value::Null);

        log.lock().unwrap().push(format!("{} {}", method, path));
        let reply = handler(&Request { method, path, body });

        let payload = reply.body.to_string();
        let response = format!(
            "HTTP/1.1 {} Fake\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
            reply.status,
            payload.len(),
            payload
        );
        if reader.get_mut().write_all(response.as_bytes()).is_err() {
            return;
        }
    }
}

fn element(id: &str) -> Value {
    json!({ ELEMENT_KEY: id })
}

/// A browser that creates session `s1`, finds every element as `e1`, and
/// never leaves the login page
fn browser(req: &Request) -> Reply {
    match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/session") => Reply::value(json!({ "sessionId": "s1", "capabilities": {} })),
        ("POST", "/session/s1/element") => Reply::value(element("e1")),
        ("GET", "/session/s1/url") => Reply::value(json!("http://app.test/login.php")),
        _ => Reply::null(),
    }
}

fn config(driver: &FakeDriver) -> SessionConfig {
    SessionConfig {
        webdriver_url: driver.endpoint.clone(),
        base_url: "http://app.test".to_string(),
        login_timeout: Duration::from_millis(300),
        poller: ConvergencePoller::new(3, Duration::from_millis(10)),
        ..SessionConfig::default()
    }
}

#[test]
fn open_failure_after_creation_deletes_session() {
    let driver = FakeDriver::start(|req| {
        if req.path == "/session/s1/timeouts" {
            Reply::error(400, "invalid argument", "implicit wait out of range")
        } else {
            browser(req)
        }
    });

    let err = Session::open(config(&driver)).unwrap_err();
    assert!(matches!(err, E2eError::WebDriver { ref error, .. } if error == "invalid argument"));
    assert_eq!(driver.count("DELETE /session/s1"), 1);
}

#[test]
fn close_deletes_session_once() {
    let driver = FakeDriver::start(browser);

    let session = Session::open(config(&driver)).unwrap();
    assert_eq!(session.id(), Some("s1"));
    session.close().unwrap();

    assert_eq!(driver.count("DELETE /session/s1"), 1);
}

#[test]
fn drop_deletes_session_once() {
    let driver = FakeDriver::start(browser);

    {
        let _session = Session::open(config(&driver)).unwrap();
    }

    assert_eq!(driver.count("DELETE /session/s1"), 1);
}

#[test]
fn login_that_never_redirects_times_out() {
    let driver = FakeDriver::start(browser);
    let config = config(&driver);
    let expected_checks = config.login_poller().max_attempts();

    let err = Session::open(config)
        .unwrap()
        .authenticate(&Credentials::new("admin", "wrong"))
        .unwrap_err();

    match err {
        E2eError::AuthenticationTimeout { url, attempts } => {
            assert_eq!(url, "http://app.test/login.php");
            assert_eq!(attempts, expected_checks);
        }
        other => panic!("expected an authentication timeout, got {}", other),
    }
    assert_eq!(driver.count("POST /session/s1/element/e1/value"), 2);
    assert_eq!(driver.count("POST /session/s1/element/e1/click"), 1);
    assert_eq!(driver.count("DELETE /session/s1"), 1);
}

#[test]
fn login_that_redirects_authenticates() {
    let driver = FakeDriver::start(|req| match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/session/s1/url") => Reply::value(json!("http://app.test/index.php")),
        _ => browser(req),
    });

    let session = Session::open(config(&driver))
        .unwrap()
        .authenticate(&Credentials::new("admin", "nimda666!"))
        .unwrap();
    assert!(session.is_authenticated());
    session.close().unwrap();

    assert_eq!(driver.count("POST /session/s1/url"), 1);
    assert_eq!(driver.count("DELETE /session/s1"), 1);
}

/// Table with a one-cell placeholder row `r0` and one contact row `r1`
fn contact_table(req: &Request) -> Reply {
    let using_tag = |tag: &str| req.body["value"] == tag;
    match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/session/s1/elements") => Reply::value(json!([element("r0"), element("r1")])),
        ("POST", "/session/s1/element/r0/elements") => Reply::value(json!([element("p0")])),
        ("POST", "/session/s1/element/r1/elements") if using_tag("td") => {
            Reply::value(json!([element("c1"), element("c2")]))
        }
        ("POST", "/session/s1/element/r1/elements") if using_tag("a") => {
            Reply::value(json!([element("a1"), element("a2")]))
        }
        ("GET", "/session/s1/element/a1/property/href") => {
            Reply::value(json!("http://app.test/update.php?id=1"))
        }
        ("GET", "/session/s1/element/a2/property/href") => {
            Reply::value(json!("http://app.test/delete.php?id=1"))
        }
        _ => browser(req),
    }
}

#[test]
fn row_link_skips_placeholder_rows() {
    let driver = FakeDriver::start(contact_table);
    let session = Session::open(config(&driver)).unwrap();
    let table = TableView::new(&session);

    assert_eq!(
        table.row_link(0, "delete.php").unwrap().as_deref(),
        Some("http://app.test/delete.php?id=1")
    );
    assert_eq!(table.row_link(1, "delete.php").unwrap(), None);
}

#[test]
fn row_link_propagates_stale_row() {
    let driver = FakeDriver::start(|req| {
        if req.path == "/session/s1/element/r0/elements" {
            Reply::error(404, "stale element reference", "element is not attached to the page document")
        } else {
            contact_table(req)
        }
    });
    let session = Session::open(config(&driver)).unwrap();

    let err = TableView::new(&session).row_link(0, "delete.php").unwrap_err();
    assert!(matches!(err, E2eError::WebDriver { ref error, .. } if error == "stale element reference"));
}

#[test]
fn delete_refuses_row_without_name() {
    let driver = FakeDriver::start(|req| {
        let selector = req.body["value"].as_str().unwrap_or_default();
        match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/session/s1/elements") if selector == "table thead th" => {
                Reply::value(json!([element("h1"), element("h2")]))
            }
            ("POST", "/session/s1/elements") => Reply::value(json!([element("r1")])),
            ("POST", "/session/s1/element/r1/elements") => Reply::value(json!([element("c1"), element("c2")])),
            ("GET", "/session/s1/element/h1/text") => Reply::value(json!("#")),
            ("GET", "/session/s1/element/h2/text") => Reply::value(json!("Email")),
            ("GET", "/session/s1/element/c1/text") => Reply::value(json!("1")),
            ("GET", "/session/s1/element/c2/text") => Reply::value(json!("a@x")),
            _ => browser(req),
        }
    });
    let session = Session::open(config(&driver)).unwrap();
    let ctx = ScenarioContext::new(&session, ConvergencePoller::new(2, Duration::from_millis(10)));

    let err = DeleteContact.run(&ctx).unwrap_err();
    assert!(matches!(err, E2eError::AssertionFailed(ref msg) if msg.contains("no name")));
    assert_eq!(driver.count("GET /session/s1/element/r1/property/href"), 0);
}
