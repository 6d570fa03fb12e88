//! Interactive Reviewer
//!
//! The two primitives the approval flow needs from a human: show some text,
//! and read one line back. Waiting for the line honours a cancellation token.
//! Input typed before a cancellation is kept and completes the next answer.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::approval::ApprovalError;

/// Human (or stand-in) answering review prompts
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Show a labelled block of text
    async fn display(&self, label: &str, text: &str) -> Result<(), ApprovalError>;

    /// Ask for one line of input, blocking until answered or cancelled
    async fn ask_line(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, ApprovalError>;
}

/// Reviewer over a line-oriented text stream (a terminal in practice)
pub struct ConsoleReviewer<R, W> {
    input: Mutex<LineInput<R>>,
    writer: Mutex<W>,
}

struct LineInput<R> {
    reader: R,
    /// Bytes of a line not yet terminated
    partial: Vec<u8>,
}

impl<R, W> ConsoleReviewer<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            input: Mutex::new(LineInput {
                reader,
                partial: Vec::new(),
            }),
            writer: Mutex::new(writer),
        }
    }

    async fn write_text(&self, text: &str) -> Result<(), ApprovalError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl ConsoleReviewer<BufReader<tokio::fs::File>, tokio::fs::File> {
    /// Open a terminal device for both reading and writing
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let input = tokio::fs::File::open(path).await?;
        let output = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        Ok(Self::new(BufReader::new(input), output))
    }
}

#[async_trait]
impl<R, W> Reviewer for ConsoleReviewer<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn display(&self, label: &str, text: &str) -> Result<(), ApprovalError> {
        self.write_text(&format!("\n[{}]\n{}\n", label, text)).await
    }

    async fn ask_line(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, ApprovalError> {
        self.write_text(&format!("{} ", prompt)).await?;

        // read_until leaves partially read bytes in `partial` if dropped
        let read = async {
            let mut input = self.input.lock().await;
            let LineInput { reader, partial } = &mut *input;
            let n = reader.read_until(b'\n', partial).await?;
            if n == 0 && partial.is_empty() {
                return Err(ApprovalError::ReviewerClosed);
            }
            let line = String::from_utf8_lossy(&partial[..])
                .trim_end_matches(['\r', '\n'])
                .to_string();
            partial.clear();
            Ok::<_, ApprovalError>(line)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApprovalError::Cancelled),
            result = read => result,
        }
    }
}
