//! Decisions the engine needs from a human.
//!
//! The engine never renders anything. When it needs a choice (retry a locked
//! file, confirm a redundant download) it sends a [`PromptRequest`] down a
//! channel and waits for the front-end to answer it.

use crate::locks::ProcessInfo;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub enum Prompt {
    /// The installed build is already the latest known one.
    ConfirmRedownload { installed: String, latest: String },
    /// A file operation failed, most likely because another process holds
    /// the file open. Accepting retries the operation.
    FileLocked {
        action: &'static str,
        path: PathBuf,
        error: String,
        process: Option<ProcessInfo>,
    },
}

impl Prompt {
    /// One-line question suitable for a modal dialog.
    pub fn message(&self) -> String {
        match self {
            Prompt::ConfirmRedownload { installed, latest } => format!(
                "Build {} is installed and the latest build is {}. Download it again?",
                installed, latest
            ),
            Prompt::FileLocked {
                action,
                path,
                error,
                process,
            } => {
                let holder = match process {
                    Some(p) => format!("It is in use by {} (pid {}).", p.name, p.pid),
                    None => "The process using it could not be identified.".to_string(),
                };
                format!(
                    "Could not {} {}: {}. {} Close it and retry?",
                    action,
                    path.display(),
                    error,
                    holder
                )
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// A pending question plus the channel its answer goes back on.
#[derive(Debug)]
pub struct PromptRequest {
    pub prompt: Prompt,
    reply: oneshot::Sender<Decision>,
}

impl PromptRequest {
    pub fn answer(self, decision: Decision) {
        let _ = self.reply.send(decision);
    }
}

#[derive(Debug, Clone)]
pub struct Prompter {
    tx: Option<mpsc::UnboundedSender<PromptRequest>>,
    fixed: Decision,
}

impl Prompter {
    /// Prompter backed by a channel; the receiver belongs to the front-end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PromptRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                fixed: Decision::Reject,
            },
            rx,
        )
    }

    /// Prompter answering every question with the same decision, for
    /// headless runs.
    pub fn fixed(decision: Decision) -> Self {
        Self { tx: None, fixed: decision }
    }

    /// Ask and wait. A front-end that went away counts as a rejection.
    pub async fn ask(&self, prompt: Prompt) -> Decision {
        crate::debug::log(&format!("Prompt: {}", prompt.message()));

        let Some(tx) = &self.tx else {
            return self.fixed;
        };

        let (reply, answer) = oneshot::channel();
        if tx.send(PromptRequest { prompt, reply }).is_err() {
            return Decision::Reject;
        }

        let decision = answer.await.unwrap_or(Decision::Reject);
        crate::debug::log(&format!("Prompt answered: {:?}", decision));
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_prompter_returns_front_end_answer() {
        let (prompter, mut rx) = Prompter::channel();

        let responder = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert!(matches!(request.prompt, Prompt::ConfirmRedownload { .. }));
            request.answer(Decision::Accept);
        });

        let decision = prompter
            .ask(Prompt::ConfirmRedownload {
                installed: "11000".into(),
                latest: "11000".into(),
            })
            .await;

        responder.await.unwrap();
        assert_eq!(decision, Decision::Accept);
    }

    #[tokio::test]
    async fn dropped_request_counts_as_reject() {
        let (prompter, mut rx) = Prompter::channel();

        let responder = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            drop(request);
        });

        let decision = prompter
            .ask(Prompt::ConfirmRedownload {
                installed: "1".into(),
                latest: "1".into(),
            })
            .await;

        responder.await.unwrap();
        assert_eq!(decision, Decision::Reject);
    }

    #[tokio::test]
    async fn fixed_prompter_never_blocks() {
        let prompter = Prompter::fixed(Decision::Accept);
        let decision = prompter
            .ask(Prompt::FileLocked {
                action: "delete",
                path: PathBuf::from("save"),
                error: "denied".into(),
                process: None,
            })
            .await;
        assert_eq!(decision, Decision::Accept);
    }

    #[test]
    fn locked_file_message_names_the_process() {
        let prompt = Prompt::FileLocked {
            action: "move",
            path: PathBuf::from("cataclysm-tiles.exe"),
            error: "Access is denied".into(),
            process: Some(ProcessInfo {
                pid: 42,
                name: "cataclysm-tiles".into(),
            }),
        };
        let message = prompt.message();
        assert!(message.contains("pid 42"));
        assert!(message.contains("cataclysm-tiles"));
    }
}
