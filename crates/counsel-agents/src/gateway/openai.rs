//! OpenAI-compatible chat completion adapter with SSE streaming.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use super::{CallPurpose, CompletionGateway, CompletionRequest, TextStream};
use crate::config::CompletionConfig;
use crate::errors::GatewayError;

pub struct OpenAiCompletionGateway {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl OpenAiCompletionGateway {
    pub fn new(config: CompletionConfig) -> Result<Self, GatewayError> {
        if config.api_key.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "completion api key is not set".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn model_and_temperature(&self, purpose: CallPurpose) -> (&str, f32) {
        match purpose {
            CallPurpose::Triage => (&self.config.triage_model, self.config.triage_temperature),
            CallPurpose::Generate => (
                &self.config.generation_model,
                self.config.generation_temperature,
            ),
            _ => (&self.config.stage_model, self.config.stage_temperature),
        }
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let (model, temperature) = self.model_and_temperature(request.purpose);
        json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt}
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": temperature,
            "stream": stream,
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, GatewayError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionGateway for OpenAiCompletionGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GatewayError> {
        let body = self.body(&request, false);
        let response = self.send(&body).await?;
        let json: Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GatewayError::Decode("missing choices[0].message.content".into()))?;
        debug!(purpose = %request.purpose, chars = content.len(), "completion received");
        Ok(content.to_string())
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, GatewayError> {
        let body = self.body(&request, true);
        let response = self.send(&body).await?;
        Ok(sse_deltas(response.bytes_stream()))
    }
}

/// One parsed `data:` line of a chat completion stream.
#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseEvent, GatewayError> {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }
    let json: Value =
        serde_json::from_str(data).map_err(|e| GatewayError::Decode(format!("sse chunk: {e}")))?;
    match json["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Ok(SseEvent::Delta(text.to_string())),
        _ => Ok(SseEvent::Skip),
    }
}

struct SseState<S> {
    inner: Pin<Box<S>>,
    buf: Vec<u8>,
    pending: VecDeque<Result<String, GatewayError>>,
    done: bool,
}

impl<S> SseState<S> {
    /// Parse every complete line in the buffer.
    fn drain_lines(&mut self, flush: bool) {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.push_line(&line);
        }
        if flush && !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        if self.done {
            return;
        }
        let line = String::from_utf8_lossy(raw);
        match parse_sse_line(line.trim_end_matches('\n')) {
            Ok(SseEvent::Delta(text)) => self.pending.push_back(Ok(text)),
            Ok(SseEvent::Done) => self.done = true,
            Ok(SseEvent::Skip) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.done = true;
            }
        }
    }
}

/// Turn a raw SSE byte stream into content deltas.
///
/// Lines are split on raw bytes before decoding so multi-byte characters
/// split across network chunks stay intact.
pub(crate) fn sse_deltas<S, B>(inner: S) -> TextStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        inner: Box::pin(inner),
        buf: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };
    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(chunk.as_ref());
                    st.drain_lines(false);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(GatewayError::from(e)), st));
                }
                None => {
                    st.drain_lines(true);
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}
