//! Operator prompts: the only point where a human can interject in a run.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

/// Ask the operator one question and get one line back.
///
/// Implementations return an empty string when no answer is available,
/// which every caller treats as "no".
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn get_user_input(&self, prompt: &str) -> String;
}

// ─── Channel-backed prompt ───────────────────────────────────────────────────

/// A question waiting for a frontend to answer it.
#[derive(Debug)]
pub struct PromptRequest {
    pub text: String,
    pub respond_to: oneshot::Sender<String>,
}

/// Forwards prompts to a UI over a channel and awaits the reply.
pub struct ChannelPrompt {
    requests: mpsc::Sender<PromptRequest>,
}

impl ChannelPrompt {
    /// Create the prompt and the receiver a frontend drains.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PromptRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { requests: tx }, rx)
    }
}

#[async_trait]
impl OperatorPrompt for ChannelPrompt {
    async fn get_user_input(&self, prompt: &str) -> String {
        let (respond_to, response) = oneshot::channel();
        let request = PromptRequest {
            text: prompt.to_string(),
            respond_to,
        };
        if self.requests.send(request).await.is_err() {
            tracing::warn!("operator prompt channel closed, treating as no answer");
            return String::new();
        }
        match response.await {
            Ok(answer) => answer.trim().to_string(),
            Err(_) => {
                tracing::warn!("operator prompt dropped without an answer");
                String::new()
            }
        }
    }
}

// ─── Terminal prompt ─────────────────────────────────────────────────────────

/// Reads answers from stdin; for terminal hosts.
#[derive(Debug, Default)]
pub struct StdinPrompt;

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn get_user_input(&self, prompt: &str) -> String {
        let mut stdout = tokio::io::stdout();
        let _ = stdout.write_all(prompt.as_bytes()).await;
        let _ = stdout.flush().await;

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(_) => line.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read operator input");
                String::new()
            }
        }
    }
}

/// `y` / `yes` (any case, surrounding whitespace ignored).
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_prompt_round_trip() {
        let (prompt, mut rx) = ChannelPrompt::new(1);
        let frontend = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert!(request.text.contains("Approve"));
            request.respond_to.send("  yes \n".to_string()).unwrap();
        });
        let answer = prompt.get_user_input("Approve NETWORK for fetch? [y/N]: ").await;
        frontend.await.unwrap();
        assert_eq!(answer, "yes");
    }

    #[tokio::test]
    async fn test_channel_prompt_closed_is_empty_answer() {
        let (prompt, rx) = ChannelPrompt::new(1);
        drop(rx);
        assert_eq!(prompt.get_user_input("?").await, "");
    }

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("Y"));
        assert!(is_affirmative(" yes "));
        assert!(!is_affirmative("yeah"));
        assert!(!is_affirmative(""));
    }
}
