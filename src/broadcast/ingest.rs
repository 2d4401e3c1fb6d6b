use super::PublishError;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_HEADERS: usize = 32;
const TOPICS_PATH: &str = "/topics/";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to read request: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("method `{0}` not allowed; use POST")]
    MethodNotAllowed(String),
    #[error("no topic at `{0}`; expected /topics/<topic>")]
    NotFound(String),
    #[error("content-length is required")]
    LengthRequired,
    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("body is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl IngestError {
    fn status_line(&self) -> &'static str {
        match self {
            IngestError::Io(_) | IngestError::Malformed(_) | IngestError::InvalidJson(_) => {
                "400 Bad Request"
            }
            IngestError::MethodNotAllowed(_) => "405 Method Not Allowed",
            IngestError::NotFound(_) => "404 Not Found",
            IngestError::LengthRequired => "411 Length Required",
            IngestError::TooLarge { .. } => "413 Payload Too Large",
            IngestError::Publish(_) => "503 Service Unavailable",
        }
    }
}

/// One envelope posted to `POST /topics/<topic>`.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Value,
}

/// Reads a single publish request; the connection carries nothing else.
pub fn read_publish_request(stream: &mut TcpStream) -> Result<PublishRequest, IngestError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0_u8; 4096];
    loop {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Err(IngestError::Malformed(
                "connection closed before headers ended".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..read]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        let head_len = match request
            .parse(&buf)
            .map_err(|err| IngestError::Malformed(err.to_string()))?
        {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial if buf.len() > MAX_HEAD_BYTES => {
                return Err(IngestError::TooLarge {
                    limit: MAX_HEAD_BYTES,
                })
            }
            httparse::Status::Partial => continue,
        };

        let method = request.method.unwrap_or_default();
        if method != "POST" {
            return Err(IngestError::MethodNotAllowed(method.to_string()));
        }
        let path = request.path.unwrap_or_default();
        let topic = topic_from_path(path)?;
        let length = content_length(request.headers)?;
        if length > MAX_BODY_BYTES {
            return Err(IngestError::TooLarge {
                limit: MAX_BODY_BYTES,
            });
        }

        let mut body = buf.split_off(head_len);
        body.truncate(length);
        if body.len() < length {
            let mut rest = vec![0_u8; length - body.len()];
            stream.read_exact(&mut rest)?;
            body.extend_from_slice(&rest);
        }
        let payload = serde_json::from_slice(&body)?;
        return Ok(PublishRequest { topic, payload });
    }
}

fn topic_from_path(path: &str) -> Result<String, IngestError> {
    let encoded = path
        .strip_prefix(TOPICS_PATH)
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .ok_or_else(|| IngestError::NotFound(path.to_string()))?;
    urlencoding::decode(encoded)
        .map(|topic| topic.into_owned())
        .map_err(|err| IngestError::Malformed(format!("topic is not utf-8: {err}")))
}

fn content_length(headers: &[httparse::Header<'_>]) -> Result<usize, IngestError> {
    let header = headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case("content-length"))
        .ok_or(IngestError::LengthRequired)?;
    std::str::from_utf8(header.value)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .ok_or_else(|| IngestError::Malformed("content-length is not a number".to_string()))
}

pub fn write_accepted(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")?;
    stream.flush()
}

pub fn write_rejected(stream: &mut TcpStream, err: &IngestError) -> std::io::Result<()> {
    let body = err.to_string();
    let response = format!(
        "HTTP/1.1 {}\r\nConnection: close\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
        err.status_line(),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}
