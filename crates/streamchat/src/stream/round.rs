//! One chat round: user message in, streamed assistant reply out.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use super::error::{ErrorKind, RoundError};
use super::events::{RoundState, StreamEvent};
use crate::completion::{CompletionClient, CompletionError};
use crate::markdown::{html_escape, render_markdown};
use crate::session::{ChatTurn, Session};

/// Capacity of the channel between a round and its SSE response.
pub const DEFAULT_EVENT_BUFFER: usize = 16;

/// How a round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The reply finished. `reply` is the raw text, `html` the rendered form.
    Completed { reply: String, html: String },
    /// The round took the error path; the user saw `kind.user_message()`.
    Failed(ErrorKind),
    /// The client went away before the round finished.
    Cancelled,
}

impl RoundOutcome {
    /// Terminal state matching this outcome.
    pub fn state(&self) -> RoundState {
        match self {
            RoundOutcome::Completed { .. } => RoundState::Closed,
            RoundOutcome::Failed(_) => RoundState::Errored,
            RoundOutcome::Cancelled => RoundState::Cancelled,
        }
    }
}

/// Why a round stopped early.
enum Interrupt {
    Failed(RoundError),
    Cancelled,
}

impl From<CompletionError> for Interrupt {
    fn from(err: CompletionError) -> Self {
        Interrupt::Failed(err.into())
    }
}

/// Reject messages that are blank. Accepted text is kept verbatim.
pub fn validate_message(message: &str) -> Result<String, RoundError> {
    if message.trim().is_empty() {
        return Err(RoundError::Validation("message is empty".into()));
    }
    Ok(message.to_string())
}

/// Drives one round for one session.
///
/// A `StreamSession` is single-use: [`StreamSession::run`] and
/// [`StreamSession::complete`] consume it.
pub struct StreamSession {
    session: Arc<Session>,
    client: Option<Arc<dyn CompletionClient>>,
    message: String,
    timeout: Duration,
    state: RoundState,
}

impl StreamSession {
    /// Prepare a round. Fails with [`RoundError::Validation`] on an empty
    /// message.
    pub fn new(
        session: Arc<Session>,
        client: Option<Arc<dyn CompletionClient>>,
        message: &str,
        timeout: Duration,
    ) -> Result<Self, RoundError> {
        let message = validate_message(message)?;
        Ok(Self {
            session,
            client,
            message,
            timeout,
            state: RoundState::Idle,
        })
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stream the round into `events`.
    ///
    /// Emits zero or more `Token`, then one `Replace`, then one `Close`. If
    /// `events` is closed the upstream stream is dropped and the round ends
    /// `Cancelled` without an assistant turn.
    pub async fn run(mut self, events: mpsc::Sender<StreamEvent>) -> RoundOutcome {
        let _round = tokio::select! {
            guard = self.session.begin_round() => guard,
            _ = events.closed() => {
                debug!(session_id = %self.session.id(), "Client left while round was queued");
                self.transition(RoundState::Cancelled);
                return RoundOutcome::Cancelled;
            }
        };

        let history = self.start().await;
        match self.drive(&history, &events).await {
            Ok(reply) => {
                if events.is_closed() {
                    return self.cancelled();
                }
                self.transition(RoundState::Finalizing);
                let html = self.finish(&reply).await;
                // The reply is recorded; a client leaving now only misses the swap.
                let _ = events.send(StreamEvent::Replace(html.clone())).await;
                let _ = events.send(StreamEvent::Close).await;
                self.transition(RoundState::Closed);
                RoundOutcome::Completed { reply, html }
            }
            Err(Interrupt::Cancelled) => self.cancelled(),
            Err(Interrupt::Failed(err)) => {
                let kind = self.fail(&err);
                let _ = events.send(StreamEvent::Replace(error_html(kind))).await;
                let _ = events.send(StreamEvent::Close).await;
                RoundOutcome::Failed(kind)
            }
        }
    }

    /// Run the round with a single-shot completion and no token events.
    ///
    /// History is updated with the same rules as [`StreamSession::run`].
    pub async fn complete(mut self) -> RoundOutcome {
        let _round = self.session.begin_round().await;
        let history = self.start().await;

        let result = match self.client.clone() {
            None => Err(RoundError::NotConfigured),
            Some(client) => {
                let deadline = Instant::now() + self.timeout;
                match timeout_at(deadline, client.complete(&history, &self.message)).await {
                    Ok(Ok(reply)) => Ok(reply),
                    Ok(Err(err)) => Err(err.into()),
                    Err(_) => Err(CompletionError::Timeout(self.timeout).into()),
                }
            }
        };

        match result {
            Ok(reply) => {
                self.transition(RoundState::Finalizing);
                let html = self.finish(&reply).await;
                self.transition(RoundState::Closed);
                RoundOutcome::Completed { reply, html }
            }
            Err(err) => RoundOutcome::Failed(self.fail(&err)),
        }
    }

    /// Record the user turn and return the history before it.
    async fn start(&mut self) -> Vec<ChatTurn> {
        let history = self.session.history().await;
        self.session.push(ChatTurn::user(self.message.clone())).await;
        self.transition(RoundState::AwaitingFirstToken);
        history
    }

    async fn drive(
        &mut self,
        history: &[ChatTurn],
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<String, Interrupt> {
        let client = self
            .client
            .clone()
            .ok_or(Interrupt::Failed(RoundError::NotConfigured))?;

        let deadline = Instant::now() + self.timeout;
        let mut fragments = tokio::select! {
            opened = timeout_at(deadline, client.stream(history, &self.message)) => match opened {
                Ok(result) => result?,
                Err(_) => return Err(CompletionError::Timeout(self.timeout).into()),
            },
            _ = events.closed() => return Err(Interrupt::Cancelled),
        };

        let mut buffer = String::new();
        loop {
            let next = tokio::select! {
                next = timeout_at(deadline, fragments.next()) => next,
                _ = events.closed() => return Err(Interrupt::Cancelled),
            };
            let fragment = match next {
                Err(_) => return Err(CompletionError::Timeout(self.timeout).into()),
                Ok(None) => break,
                Ok(Some(item)) => item?,
            };
            if fragment.is_empty() {
                continue;
            }

            buffer.push_str(&fragment);
            if self.state == RoundState::AwaitingFirstToken {
                self.transition(RoundState::Streaming);
            }
            if events.send(StreamEvent::Token(buffer.clone())).await.is_err() {
                return Err(Interrupt::Cancelled);
            }
        }

        Ok(buffer)
    }

    /// Render the reply and record the assistant turn.
    async fn finish(&self, reply: &str) -> String {
        let html = render_markdown(reply).await;
        self.session.push(ChatTurn::assistant(reply)).await;
        info!(
            session_id = %self.session.id(),
            chars = reply.len(),
            "Chat round completed"
        );
        html
    }

    fn fail(&mut self, err: &RoundError) -> ErrorKind {
        let kind = err.kind();
        warn!(
            session_id = %self.session.id(),
            state = %self.state,
            kind = ?kind,
            error = %err,
            "Chat round failed"
        );
        self.transition(RoundState::Errored);
        kind
    }

    fn cancelled(&mut self) -> RoundOutcome {
        debug!(session_id = %self.session.id(), state = %self.state, "Chat round cancelled");
        self.transition(RoundState::Cancelled);
        RoundOutcome::Cancelled
    }

    fn transition(&mut self, next: RoundState) {
        if self.state.is_terminal() {
            warn!(from = %self.state, to = %next, "Ignoring transition out of terminal state");
            return;
        }
        debug!(from = %self.state, to = %next, "Round state");
        self.state = next;
    }
}

/// Bubble content shown when a round fails.
pub fn error_html(kind: ErrorKind) -> String {
    format!(r#"<p class="error">{}</p>"#, html_escape(kind.user_message()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedClient;
    use crate::session::{ChatRole, InMemorySessionStore, SessionStore};

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn collect(round: StreamSession) -> (RoundOutcome, Vec<StreamEvent>) {
        let (tx, mut rx) = mpsc::channel(DEFAULT_EVENT_BUFFER);
        let handle = tokio::spawn(round.run(tx));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (handle.await.unwrap(), events)
    }

    fn client(fragments: &[&str]) -> Option<Arc<dyn CompletionClient>> {
        Some(Arc::new(ScriptedClient::new(fragments.iter().copied())))
    }

    fn strip_tags(html: &str) -> String {
        let mut out = String::new();
        let mut in_tag = false;
        for c in html.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                c if !in_tag => out.push(c),
                _ => {}
            }
        }
        out.trim().to_string()
    }

    #[tokio::test]
    async fn test_two_plus_two_round() {
        let store = InMemorySessionStore::new();
        let session = store.get_or_create("s1").await;
        let round = StreamSession::new(
            session.clone(),
            client(&["The", " answer", " is", " 4."]),
            "2+2?",
            TIMEOUT,
        )
        .unwrap();
        assert_eq!(round.state(), RoundState::Idle);

        let (outcome, events) = collect(round).await;

        assert_eq!(
            &events[..4],
            &[
                StreamEvent::Token("The".into()),
                StreamEvent::Token("The answer".into()),
                StreamEvent::Token("The answer is".into()),
                StreamEvent::Token("The answer is 4.".into()),
            ]
        );
        let StreamEvent::Replace(html) = &events[4] else {
            panic!("expected replace, got {:?}", events[4]);
        };
        assert_eq!(strip_tags(html), "The answer is 4.");
        assert_eq!(events[5], StreamEvent::Close);
        assert_eq!(events.len(), 6);
        assert_eq!(outcome.state(), RoundState::Closed);

        assert_eq!(
            session.history().await,
            vec![
                ChatTurn::user("2+2?"),
                ChatTurn::assistant("The answer is 4."),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_client_takes_configuration_error_path() {
        let store = InMemorySessionStore::new();
        let session = store.get_or_create("s1").await;
        let round = StreamSession::new(session.clone(), None, "hello", TIMEOUT).unwrap();

        let (outcome, events) = collect(round).await;

        assert_eq!(outcome, RoundOutcome::Failed(ErrorKind::Configuration));
        assert_eq!(
            events,
            vec![
                StreamEvent::Replace(error_html(ErrorKind::Configuration)),
                StreamEvent::Close,
            ]
        );
        assert!(error_html(ErrorKind::Configuration).contains("OPENAI_API_KEY"));
        assert_eq!(session.history().await, vec![ChatTurn::user("hello")]);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let session = Arc::new(Session::new("s1"));
        let err = StreamSession::new(session.clone(), client(&["x"]), "   \n", TIMEOUT)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(session.turn_count().await, 0);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_only_user_turn() {
        let session = Arc::new(Session::new("s1"));
        let scripted = ScriptedClient::new(["partial", " reply"]).failing_after("connection reset");
        let round =
            StreamSession::new(session.clone(), Some(Arc::new(scripted)), "hi", TIMEOUT).unwrap();

        let (outcome, events) = collect(round).await;

        assert_eq!(outcome, RoundOutcome::Failed(ErrorKind::Provider));
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], StreamEvent::Token("partial reply".into()));
        let StreamEvent::Replace(html) = &events[2] else {
            panic!("expected replace");
        };
        assert!(!html.contains("connection reset"));
        assert_eq!(events[3], StreamEvent::Close);
        assert_eq!(session.history().await, vec![ChatTurn::user("hi")]);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let session = Arc::new(Session::new("s1"));
        let scripted = ScriptedClient::new(["never"]).failing_to_connect("503 upstream");
        let round =
            StreamSession::new(session.clone(), Some(Arc::new(scripted)), "hi", TIMEOUT).unwrap();

        let (outcome, events) = collect(round).await;

        assert_eq!(outcome, RoundOutcome::Failed(ErrorKind::Provider));
        assert_eq!(
            events,
            vec![
                StreamEvent::Replace(error_html(ErrorKind::Provider)),
                StreamEvent::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_fragments_are_skipped() {
        let session = Arc::new(Session::new("s1"));
        let round =
            StreamSession::new(session.clone(), client(&["", "a", "", "b"]), "x", TIMEOUT).unwrap();

        let (_, events) = collect(round).await;

        assert_eq!(events[0], StreamEvent::Token("a".into()));
        assert_eq!(events[1], StreamEvent::Token("ab".into()));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_timeout_is_a_provider_error() {
        let session = Arc::new(Session::new("s1"));
        let slow = ScriptedClient::new(["late"]).with_delay(Duration::from_millis(500));
        let round = StreamSession::new(
            session.clone(),
            Some(Arc::new(slow)),
            "x",
            Duration::from_millis(20),
        )
        .unwrap();

        let (outcome, events) = collect(round).await;

        assert_eq!(outcome, RoundOutcome::Failed(ErrorKind::Provider));
        assert_eq!(events.last(), Some(&StreamEvent::Close));
        assert_eq!(session.turn_count().await, 1);
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_round() {
        let session = Arc::new(Session::new("s1"));
        let slow = ScriptedClient::new(["one", " two", " three"])
            .with_delay(Duration::from_millis(50));
        let round =
            StreamSession::new(session.clone(), Some(Arc::new(slow)), "x", TIMEOUT).unwrap();

        let (tx, mut rx) = mpsc::channel(DEFAULT_EVENT_BUFFER);
        let handle = tokio::spawn(round.run(tx));
        assert_eq!(rx.recv().await, Some(StreamEvent::Token("one".into())));
        drop(rx);

        assert_eq!(handle.await.unwrap(), RoundOutcome::Cancelled);
        assert_eq!(session.history().await, vec![ChatTurn::user("x")]);
    }

    #[tokio::test]
    async fn test_rounds_alternate_history() {
        let session = Arc::new(Session::new("s1"));
        let scripted: Arc<dyn CompletionClient> = Arc::new(ScriptedClient::echo());

        for message in ["first", "second", "third"] {
            let round =
                StreamSession::new(session.clone(), Some(scripted.clone()), message, TIMEOUT)
                    .unwrap();
            let (outcome, _) = collect(round).await;
            assert_eq!(outcome.state(), RoundState::Closed);
        }

        let history = session.history().await;
        assert_eq!(history.len(), 6);
        for (index, turn) in history.iter().enumerate() {
            let expected = if index % 2 == 0 {
                ChatRole::User
            } else {
                ChatRole::Assistant
            };
            assert_eq!(turn.role, expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_rounds_are_serialized() {
        let session = Arc::new(Session::new("s1"));
        let slow: Arc<dyn CompletionClient> =
            Arc::new(ScriptedClient::echo().with_delay(Duration::from_millis(10)));

        let a = StreamSession::new(session.clone(), Some(slow.clone()), "alpha beta", TIMEOUT)
            .unwrap();
        let b = StreamSession::new(session.clone(), Some(slow.clone()), "gamma delta", TIMEOUT)
            .unwrap();
        let (first, second) = tokio::join!(collect(a), collect(b));
        assert_eq!(first.0.state(), RoundState::Closed);
        assert_eq!(second.0.state(), RoundState::Closed);

        let history = session.history().await;
        assert_eq!(history.len(), 4);
        assert!(history[0].is_user());
        assert_eq!(history[1].text, history[0].text);
        assert!(history[2].is_user());
        assert_eq!(history[3].text, history[2].text);
    }

    #[tokio::test]
    async fn test_prior_history_is_sent_without_the_new_prompt() {
        let session = Arc::new(Session::new("s1"));
        let scripted = Arc::new(ScriptedClient::new(["ok"]));
        let dyn_client: Arc<dyn CompletionClient> = scripted.clone();

        for message in ["one", "two"] {
            let round =
                StreamSession::new(session.clone(), Some(dyn_client.clone()), message, TIMEOUT)
                    .unwrap();
            collect(round).await;
        }

        let requests = scripted.requests().await;
        assert!(requests[0].history.is_empty());
        assert_eq!(
            requests[1].history,
            vec![ChatTurn::user("one"), ChatTurn::assistant("ok")]
        );
        assert_eq!(requests[1].prompt, "two");
    }

    #[tokio::test]
    async fn test_message_whitespace_is_preserved() {
        let session = Arc::new(Session::new("s1"));
        let scripted = Arc::new(ScriptedClient::new(["ok"]));
        let dyn_client: Arc<dyn CompletionClient> = scripted.clone();
        let message = "    fn main() {}\n";

        let round = StreamSession::new(session.clone(), Some(dyn_client), message, TIMEOUT).unwrap();
        assert_eq!(round.message(), message);
        collect(round).await;

        assert_eq!(session.history().await[0], ChatTurn::user(message));
        assert_eq!(scripted.requests().await[0].prompt, message);
    }

    #[tokio::test]
    async fn test_single_shot_complete() {
        let session = Arc::new(Session::new("s1"));
        let round = StreamSession::new(session.clone(), client(&["**4**"]), "2+2?", TIMEOUT)
            .unwrap();

        let RoundOutcome::Completed { reply, html } = round.complete().await else {
            panic!("expected completion");
        };
        assert_eq!(reply, "**4**");
        assert!(html.contains("<strong>4</strong>"));
        assert_eq!(session.turn_count().await, 2);
    }

    #[tokio::test]
    async fn test_single_shot_without_client() {
        let session = Arc::new(Session::new("s1"));
        let round = StreamSession::new(session.clone(), None, "hi", TIMEOUT).unwrap();
        assert_eq!(
            round.complete().await,
            RoundOutcome::Failed(ErrorKind::Configuration)
        );
        assert_eq!(session.turn_count().await, 1);
    }
}
