#![allow(dead_code)]

//! Test support: mock mirrors on loopback aliases and a tiny blocking-style
//! HTTP client, all running on the current-thread runtime inside a
//! `LocalSet`.

use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task;
use tokio::time;

use pachub::{Config, Server};

/// How a mock mirror answers one `HEAD` request.
#[derive(Clone, Debug)]
pub struct Answer {
    status: u16,
    reason: &'static str,
    headers: Vec<(String, String)>,
    delay: Option<Duration>,
    hang: bool,
}

pub fn answer(status: u16, reason: &'static str) -> Answer {
    Answer {
        status,
        reason,
        headers: Vec::new(),
        delay: None,
        hang: false,
    }
}

pub fn found(content_length: u64) -> Answer {
    answer(200, "OK").content_length(content_length)
}

pub fn missing() -> Answer {
    answer(404, "Not Found")
}

/// Accept the request and never answer it.
pub fn hang() -> Answer {
    let mut answer = answer(0, "");
    answer.hang = true;
    answer
}

impl Answer {
    pub fn content_length(mut self, length: u64) -> Answer {
        self.headers
            .push(("Content-Length".to_owned(), length.to_string()));
        self
    }

    pub fn last_modified(mut self, when: SystemTime) -> Answer {
        self.headers
            .push(("Last-Modified".to_owned(), httpdate::fmt_http_date(when)));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Answer {
        self.delay = Some(delay);
        self
    }
}

/// Starts a mock mirror on `ip` (a loopback alias such as `127.0.0.2`, so
/// the hub never mistakes the test client for a peer). `on_head` maps a
/// request path to an answer.
pub async fn mock_mirror<F>(ip: &str, on_head: F) -> SocketAddr
where
    F: Fn(&str) -> Answer + 'static,
{
    let listener = TcpListener::bind((ip, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let on_head: Rc<dyn Fn(&str) -> Answer> = Rc::new(on_head);
    task::spawn_local(async move {
        loop {
            let (sock, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            task::spawn_local(mirror_conn(sock, on_head.clone()));
        }
    });
    addr
}

async fn mirror_conn(mut sock: TcpStream, on_head: Rc<dyn Fn(&str) -> Answer>) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        while let Some(end) = terminator(&buf) {
            let head = String::from_utf8(buf[..end].to_vec()).unwrap();
            buf.drain(..end + 4);
            let path = head
                .split_whitespace()
                .nth(1)
                .expect("request line has a path")
                .to_owned();

            let answer = on_head(&path);
            if answer.hang {
                time::sleep(Duration::from_secs(3600)).await;
                return;
            }
            if let Some(delay) = answer.delay {
                time::sleep(delay).await;
            }
            let mut resp = format!("HTTP/1.1 {} {}\r\n", answer.status, answer.reason);
            for (name, value) in &answer.headers {
                resp.push_str(&format!("{}: {}\r\n", name, value));
            }
            resp.push_str("\r\n");
            if sock.write_all(resp.as_bytes()).await.is_err() {
                return;
            }
        }
        match sock.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Binds a hub for `config` (use port 0) and serves it in the background.
pub async fn start_hub(config: Config) -> SocketAddr {
    let server = Server::bind(&config).await.unwrap();
    let addr = server.local_addr();
    task::spawn_local(async move {
        let _ = server.run().await;
    });
    addr
}

/// One parsed response off a client connection.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A sequential HTTP/1.1 client; supports writing several pipelined
/// requests before reading any response.
pub struct Client {
    sock: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    pub async fn connect(hub: SocketAddr) -> Client {
        let addr = SocketAddr::from(([127, 0, 0, 1], hub.port()));
        Client {
            sock: TcpStream::connect(addr).await.unwrap(),
            buf: Vec::new(),
        }
    }

    pub async fn send(&mut self, raw: &str) {
        self.sock.write_all(raw.as_bytes()).await.unwrap();
    }

    pub async fn get(&mut self, path: &str) {
        self.send(&format!("GET {} HTTP/1.1\r\nHost: hub\r\n\r\n", path))
            .await;
    }

    pub async fn read_response(&mut self) -> Response {
        let head_end = loop {
            match terminator(&self.buf) {
                Some(end) => break end,
                None => self.fill().await,
            }
        };
        let head = String::from_utf8(self.buf[..head_end].to_vec()).unwrap();
        self.buf.drain(..head_end + 4);

        let mut lines = head.split("\r\n");
        let status_line = lines.next().expect("status line");
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts.next();
        let status = parts.next().expect("status code").parse().unwrap();
        let reason = parts.next().unwrap_or("").to_owned();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| {
                let colon = line.find(':')?;
                Some((
                    line[..colon].trim().to_owned(),
                    line[colon + 1..].trim().to_owned(),
                ))
            })
            .collect();

        let length: usize = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .map(|(_, value)| value.parse().unwrap())
            .unwrap_or(0);
        while self.buf.len() < length {
            self.fill().await;
        }
        let body = String::from_utf8(self.buf[..length].to_vec()).unwrap();
        self.buf.drain(..length);

        Response {
            status,
            reason,
            headers,
            body,
        }
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.sock.read(&mut chunk).await.unwrap();
        assert!(n > 0, "hub closed the connection early");
        self.buf.extend_from_slice(&chunk[..n]);
    }
}

/// Fetches the status page and asserts it contains every needle.
pub async fn assert_status_page(hub: SocketAddr, needles: &[&str]) {
    let mut client = Client::connect(hub).await;
    client.get("/").await;
    let response = client.read_response().await;
    assert_eq!(response.status, 200);
    for needle in needles {
        assert!(
            response.body.contains(needle),
            "status page missing {:?}:\n{}",
            needle,
            response.body
        );
    }
}
