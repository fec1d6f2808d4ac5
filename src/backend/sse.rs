//! Incremental parser for OpenAI-style streamed completions.
//!
//! Wire format, one event per line:
//! `data: {"choices":[{"delta":{"content":"He"}}]}` ... `data: [DONE]`

use futures::stream::{self, Stream, StreamExt};
use std::fmt::Display;
use std::pin::Pin;
use tracing::{debug, warn};

use super::DeltaStream;
use crate::error::ParleyError;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, PartialEq)]
enum LineEvent {
    Skip,
    Done,
    Delta(String),
    Malformed(String),
}

fn parse_line(line: &[u8]) -> LineEvent {
    let line = String::from_utf8_lossy(line);
    let Some(data) = line.trim().strip_prefix(DATA_PREFIX) else {
        return LineEvent::Skip;
    };
    let data = data.trim();
    if data == DONE_SENTINEL {
        return LineEvent::Done;
    }

    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(event) => match event["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => LineEvent::Delta(content.to_string()),
            _ => LineEvent::Skip,
        },
        Err(e) => LineEvent::Malformed(format!("unparseable stream event: {}", e)),
    }
}

struct RelayState<S> {
    body: Pin<Box<S>>,
    buf: Vec<u8>,
    eof: bool,
    finished: bool,
}

/// Turn a raw response body into the content deltas it carries.
///
/// Lines without the `data:` prefix are ignored and `data: [DONE]` ends the
/// sequence. A transport error or an unparseable event yields one error and
/// then ends the sequence.
pub fn content_deltas<S, B, E>(body: S) -> DeltaStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = RelayState {
        body: Box::pin(body),
        buf: Vec::new(),
        eof: false,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }

        loop {
            let line = match st.buf.iter().position(|b| *b == b'\n') {
                Some(end) => Some(st.buf.drain(..=end).collect::<Vec<u8>>()),
                // The body may end without a trailing newline.
                None if st.eof && !st.buf.is_empty() => Some(std::mem::take(&mut st.buf)),
                None if st.eof => return None,
                None => None,
            };

            if let Some(line) = line {
                match parse_line(&line) {
                    LineEvent::Skip => continue,
                    LineEvent::Done => {
                        debug!("Stream finished");
                        return None;
                    }
                    LineEvent::Delta(delta) => return Some((Ok(delta), st)),
                    LineEvent::Malformed(reason) => {
                        warn!("Aborting stream: {}", reason);
                        st.finished = true;
                        return Some((Err(ParleyError::backend(reason)), st));
                    }
                }
            }

            match st.body.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    warn!("Upstream stream error: {}", e);
                    st.finished = true;
                    return Some((
                        Err(ParleyError::BackendUnreachable(format!("stream interrupted: {}", e))),
                        st,
                    ));
                }
                None => st.eof = true,
            }
        }
    })
    .boxed()
}
