//! Drives one answer stream from citations to its terminal event

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::generation::{PromptBuilder, SYSTEM_PROMPT};
use crate::providers::{CompletionProvider, TokenStream};
use crate::resilience::with_timeout;
use crate::types::{Citation, ContextChunk, StreamEvent};

/// Lifecycle of one answer stream
///
/// `NotStarted → Streaming → {Done | Errored}`. A stream only exists once the
/// request was admitted, so every failure from here on is reported in-band as
/// an `error` frame. `NotStarted → Errored` belongs to the request handler:
/// anything that fails before [`ChatStreamCoordinator::start`] is answered
/// with a status-coded JSON error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotStarted,
    Streaming,
    Done,
    Errored,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }
}

/// Ordered answer events for one request
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Turns a completion provider's token stream into ordered answer events
pub struct ChatStreamCoordinator {
    completion: Arc<dyn CompletionProvider>,
    completion_timeout: Duration,
}

struct Driver {
    state: StreamState,
    citations: Vec<Citation>,
    completion: Arc<dyn CompletionProvider>,
    user_prompt: String,
    tokens: Option<TokenStream>,
    deadline: Instant,
    timeout: Duration,
    deltas: usize,
}

impl ChatStreamCoordinator {
    pub fn new(completion: Arc<dyn CompletionProvider>, completion_timeout: Duration) -> Self {
        Self {
            completion,
            completion_timeout,
        }
    }

    /// Build the event stream for one admitted question
    ///
    /// Citations are the first event and do not wait on the completion
    /// provider, which is only called once they have been yielded. The
    /// completion deadline starts at that point and covers the whole token
    /// stream. Dropping the returned stream drops the provider's stream.
    pub fn start(&self, question: &str, context: &[ContextChunk]) -> EventStream {
        let driver = Driver {
            state: StreamState::NotStarted,
            citations: context.iter().map(Citation::from).collect(),
            completion: Arc::clone(&self.completion),
            user_prompt: PromptBuilder::build_user_prompt(question, context),
            tokens: None,
            deadline: Instant::now() + self.completion_timeout,
            timeout: self.completion_timeout,
            deltas: 0,
        };

        stream::unfold(driver, next_event).boxed()
    }
}

/// Advance the driver by one event; `None` once a terminal event was sent
async fn next_event(mut driver: Driver) -> Option<(StreamEvent, Driver)> {
    match driver.state {
        StreamState::NotStarted => {
            driver.state = StreamState::Streaming;
            driver.deadline = Instant::now() + driver.timeout;
            let citations = std::mem::take(&mut driver.citations);
            Some((StreamEvent::Citations { citations }, driver))
        }
        StreamState::Streaming => {
            if driver.tokens.is_none() {
                let opened =
                    open_completion(&driver.completion, &driver.user_prompt, driver.deadline).await;
                match opened {
                    Ok(tokens) => driver.tokens = Some(tokens),
                    Err(e) => {
                        tracing::error!(
                            "Failed to start completion with {} ({}): {}",
                            driver.completion.name(),
                            driver.completion.model(),
                            e
                        );
                        return Some(fail(driver, &e));
                    }
                }
            }

            loop {
                let next = match driver.tokens.as_mut() {
                    Some(tokens) => tokio::time::timeout_at(driver.deadline, tokens.next()).await,
                    None => return None,
                };
                let event = match next {
                    Ok(Some(Ok(delta))) if delta.is_empty() => continue,
                    Ok(Some(Ok(delta))) => {
                        driver.deltas += 1;
                        StreamEvent::Delta { delta }
                    }
                    Ok(Some(Err(e))) => {
                        tracing::warn!("Completion stream failed after {} deltas: {}", driver.deltas, e);
                        return Some(fail(driver, &e));
                    }
                    Ok(None) => {
                        tracing::info!("Answer stream complete ({} deltas)", driver.deltas);
                        driver.state = StreamState::Done;
                        driver.tokens = None;
                        StreamEvent::Done
                    }
                    Err(_) => {
                        tracing::warn!("Completion deadline passed after {} deltas", driver.deltas);
                        let e = Error::timeout("completion", driver.timeout);
                        return Some(fail(driver, &e));
                    }
                };
                return Some((event, driver));
            }
        }
        StreamState::Done | StreamState::Errored => None,
    }
}

/// Ask the provider for its token stream within what is left of the deadline
async fn open_completion(
    completion: &Arc<dyn CompletionProvider>,
    user_prompt: &str,
    deadline: Instant,
) -> Result<TokenStream> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    with_timeout(
        completion.stream_complete(SYSTEM_PROMPT, user_prompt),
        remaining,
        "completion",
    )
    .await
}

fn fail(mut driver: Driver, error: &Error) -> (StreamEvent, Driver) {
    driver.state = StreamState::Errored;
    driver.tokens = None;
    (
        StreamEvent::Error {
            error: error.public_message(),
        },
        driver,
    )
}
