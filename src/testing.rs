//! Loopback HTTP server used by the store and catalog tests.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Scripted reply for the next accepted connection.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    Respond(u16, String),
    DelayRespond(Duration, u16, String),
}

impl Behavior {
    fn into_parts(self) -> (Duration, u16, String) {
        match self {
            Behavior::Respond(status, body) => (Duration::ZERO, status, body),
            Behavior::DelayRespond(delay, status, body) => (delay, status, body),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordedRequest {
    pub(crate) request_line: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: String,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn method(&self) -> &str {
        self.request_line.split_whitespace().next().unwrap_or("")
    }

    pub(crate) fn target(&self) -> &str {
        self.request_line.split_whitespace().nth(1).unwrap_or("")
    }

    pub(crate) fn json_body(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body should be JSON")
    }
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Behavior>>,
    accepted: AtomicUsize,
    recorded: Mutex<Vec<RecordedRequest>>,
    stop: AtomicBool,
}

/// Serves `behaviors` in accept order; later connections get `200 {}`.
pub(crate) struct TestServer {
    pub(crate) base_url: String,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl TestServer {
    pub(crate) fn spawn(behaviors: Vec<Behavior>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind loopback listener");
        listener
            .set_nonblocking(true)
            .expect("nonblocking loopback listener");
        let base_url = format!(
            "http://{}",
            listener.local_addr().expect("loopback listener address")
        );
        let shared = Arc::new(Shared {
            script: Mutex::new(behaviors.into()),
            ..Shared::default()
        });
        let acceptor = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || accept_loop(listener, shared))
        };

        Self {
            base_url,
            shared,
            acceptor: Some(acceptor),
        }
    }

    pub(crate) fn request_count(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.recorded.lock().expect("recorded lock").clone()
    }

    /// Polls until `count` requests were fully recorded or the deadline passes.
    pub(crate) fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<RecordedRequest> {
        let deadline = Instant::now() + timeout;
        loop {
            let requests = self.requests();
            if requests.len() >= count || Instant::now() >= deadline {
                return requests;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                shared.accepted.fetch_add(1, Ordering::SeqCst);
                let behavior = shared
                    .script
                    .lock()
                    .expect("script lock")
                    .pop_front()
                    .unwrap_or_else(|| Behavior::Respond(200, "{}".to_string()));
                let shared = Arc::clone(&shared);
                thread::spawn(move || handle_connection(&stream, behavior, &shared));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return,
        }
    }
}

fn handle_connection(stream: &TcpStream, behavior: Behavior, shared: &Shared) {
    let request = read_request(stream).unwrap_or_default();
    shared.recorded.lock().expect("recorded lock").push(request);
    let (delay, status, body) = behavior.into_parts();
    if !delay.is_zero() {
        thread::sleep(delay);
    }
    let _ = write_response(stream, status, &body);
}

fn read_request(stream: &TcpStream) -> io::Result<RecordedRequest> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(500)))?;
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut request = RecordedRequest {
        request_line: request_line.trim_end().to_string(),
        headers,
        body: String::new(),
    };
    let length = request
        .header("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body)?;
    request.body = String::from_utf8_lossy(&body).into_owned();
    Ok(request)
}

fn write_response(mut stream: &TcpStream, status: u16, body: &str) -> io::Result<()> {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ if status >= 500 => "Server Error",
        _ => "Client Error",
    };
    write!(
        stream,
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()
}
