//! Operator Confirmation
//!
//! Cleanup asks before destroying anything. The questions go through the
//! [`Confirm`] trait so tests can script the answers.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum ConfirmError {
    #[error("failed to read answer: {0}")]
    Io(#[from] std::io::Error),

    #[error("input closed before an answer was given")]
    Eof,
}

/// A yes/no question with its accepted tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub yes: &'static str,
    pub no: &'static str,
}

impl Question {
    /// Asked when every key revocation failed
    pub fn abort_after_revocations() -> Self {
        Self {
            text: "All delete api key calls failed, Do you want to terminate?".into(),
            yes: "y",
            no: "n",
        }
    }

    pub fn commit() -> Self {
        Self {
            text: "Do you want to COMMIT transaction. All deleted data can not be restored once deleted?".into(),
            yes: "yes",
            no: "no",
        }
    }

    pub fn reconfirm() -> Self {
        Self {
            text: "Reconfirm. Do you want to COMMIT transaction. All deleted data can not be restored once deleted?"
                .into(),
            yes: "yes",
            no: "no",
        }
    }

    /// Prompt line as shown to the operator
    pub fn prompt(&self) -> String {
        format!("{} ({}/{}) ", self.text, self.yes, self.no)
    }

    /// `None` for anything other than the two tokens
    pub fn parse(&self, answer: &str) -> Option<bool> {
        let answer = answer.trim().to_ascii_lowercase();
        if answer == self.yes {
            Some(true)
        } else if answer == self.no {
            Some(false)
        } else {
            None
        }
    }
}

/// Asks the operator a question
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, question: &Question) -> Result<bool, ConfirmError>;
}

/// Line-oriented confirmation over a reader/writer pair
pub struct TerminalConfirm<R, W> {
    io: Mutex<(R, W)>,
}

impl TerminalConfirm<BufReader<Stdin>, Stdout> {
    /// Prompt on stdout, read stdin
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> TerminalConfirm<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

#[async_trait]
impl<R, W> Confirm for TerminalConfirm<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&self, question: &Question) -> Result<bool, ConfirmError> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;
        let prompt = question.prompt();

        loop {
            writer.write_all(prompt.as_bytes()).await?;
            writer.flush().await?;

            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Err(ConfirmError::Eof);
            }
            match question.parse(&line) {
                Some(answer) => return Ok(answer),
                None => {
                    let hint = format!("Please answer {} or {}\n", question.yes, question.no);
                    writer.write_all(hint.as_bytes()).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(input: &'static [u8]) -> TerminalConfirm<&'static [u8], tokio::io::Sink> {
        TerminalConfirm::new(input, tokio::io::sink())
    }

    #[test]
    fn test_parse_tokens() {
        let q = Question::commit();
        assert_eq!(q.parse("yes\n"), Some(true));
        assert_eq!(q.parse("  NO "), Some(false));
        assert_eq!(q.parse("y"), None);

        let abort = Question::abort_after_revocations();
        assert_eq!(abort.parse("y"), Some(true));
        assert_eq!(abort.parse("yes"), None);
    }

    #[test]
    fn test_prompt_shows_tokens() {
        assert!(Question::abort_after_revocations().prompt().ends_with("(y/n) "));
        assert!(Question::reconfirm().prompt().starts_with("Reconfirm."));
    }

    #[tokio::test]
    async fn test_reprompts_on_malformed_input() {
        let confirm = scripted(b"maybe\n\nyes\n");
        assert!(confirm.confirm(&Question::commit()).await.unwrap());
    }

    #[tokio::test]
    async fn test_answers_are_read_in_sequence() {
        let confirm = scripted(b"yes\nno\n");
        assert!(confirm.confirm(&Question::commit()).await.unwrap());
        assert!(!confirm.confirm(&Question::reconfirm()).await.unwrap());
    }

    #[tokio::test]
    async fn test_eof_is_an_error() {
        let confirm = scripted(b"maybe\n");
        let err = confirm.confirm(&Question::commit()).await.unwrap_err();
        assert!(matches!(err, ConfirmError::Eof));
    }

    #[tokio::test]
    async fn test_read_failure_is_an_error() {
        let reader = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            .build();
        let confirm = TerminalConfirm::new(BufReader::new(reader), tokio::io::sink());
        let err = confirm.confirm(&Question::commit()).await.unwrap_err();
        assert!(matches!(err, ConfirmError::Io(_)));
    }
}
