//! Line splitting for streamed HTTP bodies
//!
//! Both Ollama (newline-delimited JSON) and OpenAI-compatible servers
//! (server-sent events) stream line-oriented bodies whose lines may be split
//! across arbitrary chunk boundaries, including in the middle of a multi-byte
//! UTF-8 sequence. Bytes are buffered until a full line is available, up to
//! [`MAX_LINE_LENGTH`].

use std::fmt::Display;
use std::ops::ControlFlow;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::traits::StreamingToken;

/// Longest line a provider may send before the body is abandoned
pub(crate) const MAX_LINE_LENGTH: usize = 10 * 1024 * 1024;

/// What a single body line means to the backend that parses it
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LineEvent {
    /// A chunk of reply text
    Token(String),
    /// Line carries nothing to forward (keep-alives, role headers, empty deltas)
    Skip,
    /// Provider signalled the end of the reply
    Done,
    /// Provider reported an error
    Error(String),
}

/// Accumulates body chunks and yields complete lines
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and drain every complete, non-blank line
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whether the unterminated tail has outgrown [`MAX_LINE_LENGTH`]
    pub(crate) fn is_overflowing(&self) -> bool {
        self.buffer.len() > MAX_LINE_LENGTH
    }

    /// Take whatever is left once the body ends without a trailing newline
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Forward a line-oriented response body into a token channel
///
/// Every line goes through `parse`. The channel receives one
/// [`StreamingToken::Token`] per text chunk followed by exactly one
/// [`StreamingToken::Complete`] or [`StreamingToken::Error`]. A body that ends
/// before the provider's completion marker is reported as an error rather
/// than as a short reply. Returns early when the receiver is dropped.
pub(crate) async fn pump_lines<S, B, E, F>(
    mut body: S,
    tx: mpsc::Sender<StreamingToken>,
    mut parse: F,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&str) -> LineEvent,
{
    let mut lines = LineBuffer::default();
    let mut full_response = String::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                return;
            }
        };

        for line in lines.push(chunk.as_ref()) {
            if dispatch(parse(&line), &tx, &mut full_response)
                .await
                .is_break()
            {
                return;
            }
        }

        if lines.is_overflowing() {
            let _ = tx
                .send(StreamingToken::Error(format!(
                    "response line exceeds {MAX_LINE_LENGTH} bytes"
                )))
                .await;
            return;
        }
    }

    if let Some(line) = lines.finish() {
        if dispatch(parse(&line), &tx, &mut full_response)
            .await
            .is_break()
        {
            return;
        }
    }

    let _ = tx
        .send(StreamingToken::Error(
            "response body ended before completion".to_string(),
        ))
        .await;
}

async fn dispatch(
    event: LineEvent,
    tx: &mpsc::Sender<StreamingToken>,
    full_response: &mut String,
) -> ControlFlow<()> {
    match event {
        LineEvent::Token(token) => {
            full_response.push_str(&token);
            if tx.send(StreamingToken::Token(token)).await.is_err() {
                // Receiver dropped, stop streaming
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }
        LineEvent::Skip => ControlFlow::Continue(()),
        LineEvent::Done => {
            let _ = tx
                .send(StreamingToken::Complete {
                    message: std::mem::take(full_response),
                })
                .await;
            ControlFlow::Break(())
        }
        LineEvent::Error(e) => {
            let _ = tx.send(StreamingToken::Error(e)).await;
            ControlFlow::Break(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_across_chunks() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"{\"a\":").is_empty());
        assert_eq!(buf.push(b"1}\n{\"b\""), vec!["{\"a\":1}".to_string()]);
        assert_eq!(buf.push(b":2}\n\n"), vec!["{\"b\":2}".to_string()]);
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_split_multibyte_character() {
        let text = "héllo\n".as_bytes();
        let mut buf = LineBuffer::default();
        // Split inside the two-byte 'é'
        assert!(buf.push(&text[..2]).is_empty());
        assert_eq!(buf.push(&text[2..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn test_finish_returns_unterminated_line() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"data: [DONE]").is_empty());
        assert_eq!(buf.finish(), Some("data: [DONE]".to_string()));
        assert_eq!(buf.finish(), None);
    }

    fn parse_plain(line: &str) -> LineEvent {
        match line {
            "END" => LineEvent::Done,
            "" => LineEvent::Skip,
            l if l.starts_with("ERR ") => LineEvent::Error(l[4..].to_string()),
            l => LineEvent::Token(l.to_string()),
        }
    }

    async fn collect(chunks: Vec<Result<Vec<u8>, std::io::Error>>) -> Vec<StreamingToken> {
        let (tx, mut rx) = mpsc::channel(16);
        pump_lines(futures::stream::iter(chunks), tx, parse_plain).await;

        let mut tokens = Vec::new();
        while let Some(token) = rx.recv().await {
            tokens.push(token);
        }
        tokens
    }

    #[tokio::test]
    async fn test_tokens_then_complete() {
        let tokens = collect(vec![Ok(b"Hel\nl".to_vec()), Ok(b"o\nEND\n".to_vec())]).await;
        assert_eq!(
            tokens,
            vec![
                StreamingToken::Token("Hel".into()),
                StreamingToken::Token("lo".into()),
                StreamingToken::Complete {
                    message: "Hello".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_body_error_after_tokens() {
        let tokens = collect(vec![
            Ok(b"Hi\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ])
        .await;
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], StreamingToken::Token("Hi".into()));
        assert!(matches!(tokens[1], StreamingToken::Error(_)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let tokens = collect(vec![Ok(b"Hi\n".to_vec())]).await;
        assert_eq!(
            tokens,
            vec![
                StreamingToken::Token("Hi".into()),
                StreamingToken::Error("response body ended before completion".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_provider_error_line() {
        let tokens = collect(vec![Ok(b"ERR model not found\n".to_vec())]).await;
        assert_eq!(
            tokens,
            vec![StreamingToken::Error("model not found".into())]
        );
    }

    #[test]
    fn test_overflow_counts_only_the_unterminated_tail() {
        let mut buf = LineBuffer::default();
        let mut chunk = vec![b'x'; MAX_LINE_LENGTH];
        chunk.push(b'\n');
        assert_eq!(buf.push(&chunk).len(), 1);
        assert!(!buf.is_overflowing());

        buf.push(&vec![b'y'; MAX_LINE_LENGTH + 1]);
        assert!(buf.is_overflowing());
    }

    #[tokio::test]
    async fn test_endless_line_is_an_error() {
        let mut chunks = vec![Ok(b"Hi\n".to_vec())];
        chunks.push(Ok(vec![b'x'; MAX_LINE_LENGTH]));
        chunks.push(Ok(b"more".to_vec()));
        chunks.push(Ok(b"\nEND\n".to_vec()));

        let tokens = collect(chunks).await;
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], StreamingToken::Token("Hi".into()));
        assert_eq!(
            tokens[1],
            StreamingToken::Error(format!("response line exceeds {MAX_LINE_LENGTH} bytes"))
        );
    }

    #[tokio::test]
    async fn test_unterminated_done_marker() {
        let tokens = collect(vec![Ok(b"a\nEND".to_vec())]).await;
        assert_eq!(
            tokens,
            vec![
                StreamingToken::Token("a".into()),
                StreamingToken::Complete { message: "a".into() },
            ]
        );
    }
}
