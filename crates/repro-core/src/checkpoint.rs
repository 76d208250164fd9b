//! Human-in-the-loop ambiguity checkpoint
//!
//! An explicit request/response channel between the planning engine and
//! whatever front-end talks to the user:
//! - The engine side ([`HumanCheckpoint`]) sends an ordered question set
//!   and suspends until answers, cancellation, or the caller's timeout
//! - The user side ([`CheckpointEndpoint`]) receives [`QuestionRequest`]s
//!   and answers them, or abandons the run
//!
//! Cancellation goes through a shared `CancellationToken`.

use crate::error::CheckpointError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Question put to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguityQuestion {
    /// Question text
    pub text: String,
    /// Why the question matters for the implementation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AmbiguityQuestion {
    /// Create question
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: None,
        }
    }

    /// With context
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Opaque answer text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserAnswer(pub String);

impl UserAnswer {
    /// Create answer
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Answer text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Question paired with its answer, in question order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    /// The question
    pub question: AmbiguityQuestion,
    /// The user's answer
    pub answer: UserAnswer,
}

/// Pending question set handed to the user side
#[derive(Debug)]
pub struct QuestionRequest {
    questions: Vec<AmbiguityQuestion>,
    reply: oneshot::Sender<Vec<UserAnswer>>,
}

impl QuestionRequest {
    /// Questions, in order
    #[inline]
    #[must_use]
    pub fn questions(&self) -> &[AmbiguityQuestion] {
        &self.questions
    }

    /// Send answers, one per question, in question order.
    ///
    /// # Errors
    /// `CheckpointError::Disconnected` if the engine stopped waiting
    pub fn answer(self, answers: Vec<UserAnswer>) -> Result<(), CheckpointError> {
        self.reply
            .send(answers)
            .map_err(|_| CheckpointError::Disconnected)
    }
}

/// Create a connected checkpoint pair
#[must_use]
pub fn checkpoint_channel() -> (HumanCheckpoint, CheckpointEndpoint) {
    let (tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    (
        HumanCheckpoint {
            requests: tx,
            cancel: cancel.clone(),
        },
        CheckpointEndpoint {
            requests: rx,
            cancel,
        },
    )
}

/// Engine side of the checkpoint
#[derive(Debug, Clone)]
pub struct HumanCheckpoint {
    requests: mpsc::Sender<QuestionRequest>,
    cancel: CancellationToken,
}

impl HumanCheckpoint {
    /// Ask the user and wait for answers.
    ///
    /// `timeout` bounds only the wait for answers; `None` waits until
    /// answered or cancelled.
    ///
    /// # Errors
    /// - `CheckpointError::Abandoned` if the token is cancelled
    /// - `CheckpointError::Disconnected` if the user side went away
    /// - `CheckpointError::TimedOut` if the window closed
    /// - `CheckpointError::AnswerMismatch` if counts differ
    pub async fn ask(
        &self,
        questions: Vec<AmbiguityQuestion>,
        timeout: Option<Duration>,
    ) -> Result<Vec<AnsweredQuestion>, CheckpointError> {
        if self.cancel.is_cancelled() {
            return Err(CheckpointError::Abandoned);
        }

        let (reply, response) = oneshot::channel();
        let request = QuestionRequest {
            questions: questions.clone(),
            reply,
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(CheckpointError::Abandoned),
            sent = self.requests.send(request) => {
                sent.map_err(|_| CheckpointError::Disconnected)?;
            }
        }
        tracing::info!(questions = questions.len(), "Awaiting checkpoint answers");

        let answers = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(CheckpointError::Abandoned),
            answers = wait_for_answers(response, timeout) => answers?,
        };

        if answers.len() != questions.len() {
            return Err(CheckpointError::AnswerMismatch {
                expected: questions.len(),
                actual: answers.len(),
            });
        }

        Ok(questions
            .into_iter()
            .zip(answers)
            .map(|(question, answer)| AnsweredQuestion { question, answer })
            .collect())
    }

    /// Token that abandons the checkpoint when cancelled
    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

async fn wait_for_answers(
    response: oneshot::Receiver<Vec<UserAnswer>>,
    timeout: Option<Duration>,
) -> Result<Vec<UserAnswer>, CheckpointError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, response)
            .await
            .map_err(|_| CheckpointError::TimedOut(limit))?
            .map_err(|_| CheckpointError::Disconnected),
        None => response.await.map_err(|_| CheckpointError::Disconnected),
    }
}

/// User side of the checkpoint
#[derive(Debug)]
pub struct CheckpointEndpoint {
    requests: mpsc::Receiver<QuestionRequest>,
    cancel: CancellationToken,
}

impl CheckpointEndpoint {
    /// Next question set; `None` once the engine side is gone
    pub async fn next_request(&mut self) -> Option<QuestionRequest> {
        self.requests.recv().await
    }

    /// Abandon any current or future wait
    pub fn abandon(&self) {
        self.cancel.cancel();
    }

    /// Token shared with the engine side
    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn questions() -> Vec<AmbiguityQuestion> {
        vec![
            AmbiguityQuestion::new("Which dataset?"),
            AmbiguityQuestion::new("How many layers?").with_context("section 4 is unclear"),
        ]
    }

    #[tokio::test]
    async fn answers_are_paired_in_order() {
        let (checkpoint, mut endpoint) = checkpoint_channel();
        let user = tokio::spawn(async move {
            let request = endpoint.next_request().await.unwrap();
            assert_eq!(request.questions().len(), 2);
            request
                .answer(vec![UserAnswer::new("MNIST"), UserAnswer::new("6")])
                .unwrap();
        });

        let answered = checkpoint.ask(questions(), None).await.unwrap();
        user.await.unwrap();
        assert_eq!(answered[0].answer.as_str(), "MNIST");
        assert_eq!(answered[1].question.text, "How many layers?");
    }

    #[tokio::test]
    async fn answer_count_must_match() {
        let (checkpoint, mut endpoint) = checkpoint_channel();
        tokio::spawn(async move {
            let request = endpoint.next_request().await.unwrap();
            request.answer(vec![UserAnswer::new("only one")]).ok();
        });
        let err = checkpoint.ask(questions(), None).await.unwrap_err();
        assert_eq!(err, CheckpointError::AnswerMismatch { expected: 2, actual: 1 });
    }

    #[tokio::test]
    async fn abandon_interrupts_wait() {
        let (checkpoint, mut endpoint) = checkpoint_channel();
        tokio::spawn(async move {
            let _request = endpoint.next_request().await.unwrap();
            endpoint.abandon();
            // keep the request alive so the wait is not a disconnect
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let err = checkpoint.ask(questions(), None).await.unwrap_err();
        assert_eq!(err, CheckpointError::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn window_can_time_out() {
        let (checkpoint, mut endpoint) = checkpoint_channel();
        tokio::spawn(async move {
            let _request = endpoint.next_request().await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let err = checkpoint
            .ask(questions(), Some(Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert_eq!(err, CheckpointError::TimedOut(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn dropped_endpoint_is_a_disconnect() {
        let (checkpoint, endpoint) = checkpoint_channel();
        drop(endpoint);
        let err = checkpoint.ask(questions(), None).await.unwrap_err();
        assert_eq!(err, CheckpointError::Disconnected);
    }
}
