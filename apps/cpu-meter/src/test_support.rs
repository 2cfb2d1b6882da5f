use crate::config::UploadConfig;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;
use url::Url;

pub fn test_upload_config(api_base: Url) -> UploadConfig {
    UploadConfig {
        api_base,
        access_token: "test-token".to_string(),
        device_id: "test-device".to_string(),
        timeout: Duration::from_secs(5),
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: String,
}

impl CapturedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

/// One-shot HTTP/1.1 listener that answers `expected` requests with `status`.
pub struct LoopbackServer {
    pub base: Url,
    handle: JoinHandle<Vec<CapturedRequest>>,
}

impl LoopbackServer {
    pub fn spawn(status: u16, expected: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let handle = std::thread::spawn(move || {
            let mut captured = Vec::with_capacity(expected);
            for _ in 0..expected {
                let (mut stream, _) = listener.accept().expect("accept");
                captured.push(read_request(&mut stream));
                let response = format!(
                    "HTTP/1.1 {status} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                stream.write_all(response.as_bytes()).expect("write response");
            }
            captured
        });
        Self {
            base: Url::parse(&format!("http://{addr}")).expect("loopback url"),
            handle,
        }
    }

    pub fn finish(self) -> Vec<CapturedRequest> {
        self.handle.join().expect("loopback server panicked")
    }
}

fn read_request(stream: &mut TcpStream) -> CapturedRequest {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).expect("read request head");
        assert!(n > 0, "connection closed before request head");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let request = CapturedRequest {
        head,
        body: String::new(),
    };
    let content_length = request
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).expect("read request body");
        assert!(n > 0, "connection closed before request body");
        body.extend_from_slice(&chunk[..n]);
    }

    CapturedRequest {
        body: String::from_utf8_lossy(&body).to_string(),
        ..request
    }
}
