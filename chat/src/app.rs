//! Chat App
//!
//! The interactive loop: read a line, stream the reply, echo it, repeat.
//! Input and output are generic so the loop runs against stdin/stdout in
//! the binary and against in-memory buffers in tests.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use gateway_core::{ChatSession, ChatTransport, FragmentSource, GatewayError, Role, SessionState};

/// Shown before each line of input
pub const PROMPT: &str = "> ";

/// How a chat ended
#[derive(Debug)]
pub enum Outcome {
    /// Input was empty or exhausted
    Finished,
    /// A reply failed; the error has already been shown
    Failed(GatewayError),
}

impl Outcome {
    /// Whether the chat ended because of an error
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Interactive chat over a line reader and a display writer
pub struct ChatApp<R, W> {
    input: R,
    output: W,
    session: ChatSession,
}

impl<R, W> ChatApp<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create an app with a fresh session
    pub fn new(input: R, output: W) -> Self {
        Self::with_session(input, output, ChatSession::new())
    }

    /// Create an app around an existing session
    pub fn with_session(input: R, output: W, session: ChatSession) -> Self {
        Self {
            input,
            output,
            session,
        }
    }

    /// The conversation so far
    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Give back the display writer
    pub fn into_output(self) -> W {
        self.output
    }

    /// Run rounds until the input ends or a reply fails
    ///
    /// Cancelling `cancel` stops the reply in progress, which ends the chat
    /// like any other error.
    ///
    /// # Errors
    ///
    /// Only I/O errors on the input or display. Gateway errors are shown to
    /// the user and returned as [`Outcome::Failed`].
    pub async fn run(
        &mut self,
        transport: &dyn ChatTransport,
        cancel: CancellationToken,
    ) -> anyhow::Result<Outcome> {
        loop {
            self.write(PROMPT).await?;

            let mut line = String::new();
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                read = self.input.read_line(&mut line) => { read?; }
            }

            let Some(turns) = self.session.begin_round(line.trim_end_matches(['\r', '\n'])) else {
                tracing::debug!(rounds = self.session.rounds(), "Input ended");
                self.write("\n").await?;
                return Ok(Outcome::Finished);
            };

            let round = self.session.rounds();
            tracing::debug!(round, turns = turns.len(), "Sending conversation");

            let result = match transport.stream_chat(&turns, cancel.child_token()).await {
                Ok(source) => self.stream_reply(source).await?,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    self.session.finish_round();
                    self.write("\n").await?;
                }
                Err(e) => {
                    self.session.fail();
                    tracing::warn!(round, error = %e, "Reply failed");
                    self.report(&e).await?;
                    return Ok(Outcome::Failed(e));
                }
            }
            debug_assert_eq!(self.session.state(), SessionState::Idle);
        }
    }

    /// Echo fragments until the stream ends; the inner result is the stream's
    async fn stream_reply(
        &mut self,
        mut source: Box<dyn FragmentSource>,
    ) -> anyhow::Result<Result<(), GatewayError>> {
        while let Some(item) = source.next_fragment().await {
            match item {
                Ok(fragment) => {
                    if let Some(text) = self.session.apply(&fragment) {
                        self.write(text).await?;
                    }
                }
                Err(e) => return Ok(Err(e)),
            }
        }
        Ok(Ok(()))
    }

    async fn report(&mut self, error: &GatewayError) -> anyhow::Result<()> {
        if !self.session.reply().is_empty() {
            self.write("\n").await?;
        }
        self.write(&format!("error: {error}\n")).await
    }

    async fn write(&mut self, text: &str) -> anyhow::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}

/// Stream the reply to a single prompt into `output`
///
/// # Errors
///
/// Only I/O errors on `output`; gateway errors are written out and returned
/// as [`Outcome::Failed`].
pub async fn run_prompt<W>(
    transport: &dyn ChatTransport,
    prompt: &str,
    output: &mut W,
    cancel: CancellationToken,
) -> anyhow::Result<Outcome>
where
    W: AsyncWrite + Unpin,
{
    let mut source = match transport.stream_prompt(prompt, cancel).await {
        Ok(source) => source,
        Err(e) => {
            output.write_all(format!("error: {e}\n").as_bytes()).await?;
            output.flush().await?;
            return Ok(Outcome::Failed(e));
        }
    };

    let mut wrote = false;
    while let Some(item) = source.next_fragment().await {
        match item {
            Ok(fragment) if fragment.role == Role::Assistant => {
                output.write_all(fragment.text.as_bytes()).await?;
                output.flush().await?;
                wrote |= !fragment.text.is_empty();
            }
            Ok(_) => {}
            Err(e) => {
                let lead = if wrote { "\n" } else { "" };
                output
                    .write_all(format!("{lead}error: {e}\n").as_bytes())
                    .await?;
                output.flush().await?;
                return Ok(Outcome::Failed(e));
            }
        }
    }

    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(Outcome::Finished)
}
