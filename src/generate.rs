//! Streaming completion proxy for the runtime's `POST /api/generate`.
//!
//! [`CompletionProxy::generate`] returns a lazy stream of text fragments.
//! The runtime answers with one JSON object per line; each parsed
//! `response` is yielded as soon as its line is complete. Malformed lines
//! are skipped. The stream ends on `"done": true` or when the connection
//! closes.
//!
//! There is no separate error channel: a connection failure, a non-2xx
//! status, or an `{"error": ...}` line becomes a single terminal fragment
//! starting with `Error:`. Dropping the stream closes the connection.

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Prefix of fragments that report a failure instead of generated text.
pub const ERROR_PREFIX: &str = "Error:";

pub struct CompletionProxy {
    http: reqwest::Client,
    endpoint: Arc<str>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

enum Line {
    Skip,
    Fragment(String),
    Final(Option<String>),
}

enum Phase {
    Connect(reqwest::RequestBuilder),
    Read {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        buffer: Vec<u8>,
    },
    Done,
}

impl CompletionProxy {
    pub fn new(endpoint: &str, model: &str) -> anyhow::Result<Self> {
        // Connect bound only; generation itself may take minutes.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            endpoint: Arc::from(endpoint.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Stream the completion of `prompt`. Finite and not restartable.
    pub fn generate(&self, prompt: &str) -> BoxStream<'static, String> {
        let request = self
            .http
            .post(format!("{}/api/generate", self.endpoint))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": true,
            }));
        let endpoint = Arc::clone(&self.endpoint);

        stream::unfold(Phase::Connect(request), move |phase| {
            let endpoint = Arc::clone(&endpoint);
            async move { step(phase, &endpoint).await }
        })
        .boxed()
    }
}

async fn step(mut phase: Phase, endpoint: &str) -> Option<(String, Phase)> {
    loop {
        phase = match phase {
            Phase::Done => return None,

            Phase::Connect(request) => match request.send().await {
                Err(e) if e.is_connect() || e.is_timeout() => {
                    tracing::warn!(endpoint, error = %e, "generation endpoint unreachable");
                    return Some((
                        format!(
                            "{} could not connect to the model runtime at {}. Is it running?",
                            ERROR_PREFIX, endpoint
                        ),
                        Phase::Done,
                    ));
                }
                Err(e) => return Some((format!("{} {}", ERROR_PREFIX, e), Phase::Done)),
                Ok(resp) if !resp.status().is_success() => {
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    return Some((
                        format!(
                            "{} runtime returned {}: {}",
                            ERROR_PREFIX,
                            status,
                            detail.trim()
                        ),
                        Phase::Done,
                    ));
                }
                Ok(resp) => Phase::Read {
                    body: resp.bytes_stream().boxed(),
                    buffer: Vec::new(),
                },
            },

            Phase::Read {
                mut body,
                mut buffer,
            } => {
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_line(&line) {
                        Line::Skip => continue,
                        Line::Fragment(text) => return Some((text, Phase::Read { body, buffer })),
                        Line::Final(Some(text)) => return Some((text, Phase::Done)),
                        Line::Final(None) => return None,
                    }
                }
                match body.next().await {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(&bytes);
                        Phase::Read { body, buffer }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "generation stream interrupted");
                        return Some((format!("{} {}", ERROR_PREFIX, e), Phase::Done));
                    }
                    // Connection closed; a final line may lack its newline.
                    None => {
                        return match parse_line(&buffer) {
                            Line::Fragment(text) | Line::Final(Some(text)) => Some((text, Phase::Done)),
                            Line::Skip | Line::Final(None) => None,
                        };
                    }
                }
            }
        };
    }
}

fn parse_line(raw: &[u8]) -> Line {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        return Line::Skip;
    }
    let chunk: GenerateChunk = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed generation line");
            return Line::Skip;
        }
    };
    if let Some(err) = chunk.error {
        return Line::Final(Some(format!("{} {}", ERROR_PREFIX, err)));
    }
    let fragment = chunk.response.filter(|r| !r.is_empty());
    if chunk.done {
        Line::Final(fragment)
    } else {
        fragment.map(Line::Fragment).unwrap_or(Line::Skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(line: &str) -> Option<String> {
        match parse_line(line.as_bytes()) {
            Line::Fragment(t) => Some(t),
            _ => None,
        }
    }

    #[test]
    fn parses_response_fragment() {
        assert_eq!(
            fragment(r#"{"model":"m","response":"Hel","done":false}"#).as_deref(),
            Some("Hel")
        );
    }

    #[test]
    fn malformed_and_empty_lines_are_skipped() {
        assert!(matches!(parse_line(b"{not json"), Line::Skip));
        assert!(matches!(parse_line(b"   \n"), Line::Skip));
        assert!(matches!(parse_line(br#"{"response":"","done":false}"#), Line::Skip));
    }

    #[test]
    fn done_line_is_final() {
        assert!(matches!(parse_line(br#"{"response":"","done":true}"#), Line::Final(None)));
        match parse_line(br#"{"response":"!","done":true}"#) {
            Line::Final(Some(t)) => assert_eq!(t, "!"),
            _ => panic!("expected final fragment"),
        }
    }

    #[test]
    fn error_line_becomes_terminal_fragment() {
        match parse_line(br#"{"error":"model 'x' not found"}"#) {
            Line::Final(Some(t)) => {
                assert!(t.starts_with(ERROR_PREFIX));
                assert!(t.contains("not found"));
            }
            _ => panic!("expected final error"),
        }
    }
}
