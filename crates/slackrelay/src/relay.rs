//! Relay orchestrator.
//!
//! One inbound webhook request flows through these stages:
//!
//! ```text
//!  POST /slack/events
//!       │  RequestVerifier::verify            reject → 401
//!       ▼
//!  event::normalize                           malformed → 400
//!       ├─ Challenge → echoed back, done
//!       ▼
//!  filter::decide
//!       ├─ ignore → ack, done
//!       ▼
//!  EventDeduplicator                          redelivery → ack, done
//!       ▼
//!  ack returned to the caller ─────────────── everything below runs detached
//!       ▼
//!  DelayPolicy::wait
//!       ▼
//!  CompletionClient::complete                 paced, bounded throttle retry
//!       ▼
//!  Dispatcher::deliver / deliver_fallback
//!       ▼
//!  RelayReport → logs + report channel
//! ```
//!
//! Nothing after the ack can reach the webhook caller.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};
use ulid::Ulid;

use crate::dedup::EventDeduplicator;
use crate::delay::DelayPolicy;
use crate::delivery::{DeliveryOutcome, Dispatcher};
use crate::event::{Event, NormalizeError, Normalized, normalize};
use crate::filter::{FilterPolicy, FilterReason, decide};
use crate::llm::{CompletionClient, CompletionRequest};
use crate::verify::{AcceptAll, RequestVerifier};

// ============================================================================
// Types
// ============================================================================

/// Static relay behaviour, fixed at startup.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub filter: FilterPolicy,
    pub delay: DelayPolicy,
    pub system_prompt: String,
    pub max_tokens: Option<u32>,
    pub dedup_ttl: Duration,
}

/// What the webhook caller is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Echo this token as the whole response.
    Challenge(String),
    Ignored(FilterReason),
    /// Already accepted once; no new work started.
    Duplicate,
    /// A background run was started.
    Accepted { run_id: Ulid },
}

/// Failures reported synchronously, before any ack.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("request verification failed")]
    Unauthorized,

    #[error("malformed request: {0}")]
    Malformed(#[from] NormalizeError),
}

/// Final record of one background run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub run_id: Ulid,
    pub channel_id: String,
    pub thread_id: Option<String>,
    /// Why no generated reply was available, if it wasn't.
    pub completion_error: Option<String>,
    pub outcome: DeliveryOutcome,
}

// ============================================================================
// RelayEngine
// ============================================================================

pub struct RelayEngine {
    settings: RelaySettings,
    completion: CompletionClient,
    dispatcher: Dispatcher,
    verifier: Arc<dyn RequestVerifier>,
    dedup: EventDeduplicator,
    tracker: TaskTracker,
    reports: Option<mpsc::UnboundedSender<RelayReport>>,
}

impl RelayEngine {
    pub fn new(settings: RelaySettings, completion: CompletionClient, dispatcher: Dispatcher) -> Self {
        let dedup = EventDeduplicator::new(settings.dedup_ttl);
        Self {
            settings,
            completion,
            dispatcher,
            verifier: Arc::new(AcceptAll),
            dedup,
            tracker: TaskTracker::new(),
            reports: None,
        }
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn RequestVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Also send every [`RelayReport`] to `reports`.
    #[must_use]
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<RelayReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Handle one webhook request up to the acknowledgment.
    ///
    /// Accepted events continue on a detached task; this returns as soon as
    /// that task is spawned. Must be called from within a Tokio runtime.
    pub fn receive(self: &Arc<Self>, headers: &HeaderMap, body: &[u8]) -> Result<Ack, RelayError> {
        if !self.verifier.verify(headers, body) {
            warn!("Rejected webhook request: verification failed");
            return Err(RelayError::Unauthorized);
        }

        let event = match normalize(body, &self.settings.filter.mention)? {
            Normalized::Challenge(token) => {
                info!("Answering url_verification challenge");
                return Ok(Ack::Challenge(token));
            }
            Normalized::Event(event) => event,
        };

        let decision = decide(&event, &self.settings.filter);
        if !decision.respond {
            debug!(reason = %decision.reason, channel = %event.channel_id, "Event ignored");
            return Ok(Ack::Ignored(decision.reason));
        }

        if let Some(event_id) = event.event_id.as_deref()
            && self.dedup.check_and_mark(event_id)
        {
            info!(event_id, "Ignoring redelivered event");
            return Ok(Ack::Duplicate);
        }

        let run_id = Ulid::new();
        let span = info_span!("relay", %run_id, channel = %event.channel_id);
        let engine = Arc::clone(self);
        self.tracker
            .spawn(async move { engine.run(run_id, event).await }.instrument(span));

        Ok(Ack::Accepted { run_id })
    }

    /// Post-ack half of a relay: delay, complete, deliver, report.
    async fn run(&self, run_id: Ulid, event: Event) {
        let delay = self.settings.delay.delay_for_text(&event.text);
        info!(delay_ms = delay.as_millis() as u64, "Relay accepted, delaying reply");
        self.settings.delay.wait(delay).await;

        let request = CompletionRequest {
            system_prompt: self.settings.system_prompt.clone(),
            user_text: self.settings.filter.mention.strip(&event.text),
            max_tokens: self.settings.max_tokens,
        };
        let thread_id = self.dispatcher.reply_thread(&event);

        let (completion_error, outcome) = match self.completion.complete(&request).await {
            Ok(reply) => (
                None,
                self.dispatcher
                    .deliver(&event.channel_id, thread_id, &reply)
                    .await,
            ),
            Err(e) => {
                warn!(error = %e, "No reply generated, sending fallback");
                (
                    Some(e.to_string()),
                    self.dispatcher
                        .deliver_fallback(&event.channel_id, thread_id)
                        .await,
                )
            }
        };

        match &outcome {
            DeliveryOutcome::Dropped { cause } => error!(%cause, "Relay dropped"),
            other => info!(outcome = %other, "Relay finished"),
        }

        if let Some(reports) = &self.reports {
            let _ = reports.send(RelayReport {
                run_id,
                channel_id: event.channel_id.clone(),
                thread_id: thread_id.map(str::to_string),
                completion_error,
                outcome,
            });
        }
    }

    /// Number of background runs still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting new runs and wait up to `grace` for in-flight ones.
    ///
    /// Returns `false` if some runs were still going when `grace` ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight relays");
        }
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryError, MessagePoster};
    use crate::event::MentionToken;
    use crate::llm::{
        ChatRequest, ChatResponse, Choice, LLMError, LLMProvider, RateLimiter, ResponseMessage,
        RetryPolicy, Role,
    };
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use slackrelay_protocol::PostMessage;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct FakeProvider {
        reply: Result<&'static str, u16>,
        requests: Mutex<Vec<(Instant, ChatRequest)>>,
    }

    #[async_trait]
    impl LLMProvider for FakeProvider {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
            self.requests.lock().unwrap().push((Instant::now(), request));
            match self.reply {
                Ok(text) => Ok(ChatResponse {
                    id: "chatcmpl".to_string(),
                    choices: vec![Choice {
                        index: 0,
                        message: ResponseMessage {
                            role: Role::Assistant,
                            content: Some(text.to_string()),
                        },
                        finish_reason: None,
                    }],
                    usage: None,
                }),
                Err(status) => Err(LLMError::Api {
                    status,
                    message: "nope".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakePoster {
        posts: Mutex<Vec<PostMessage>>,
    }

    #[async_trait]
    impl MessagePoster for FakePoster {
        async fn post_message(&self, message: &PostMessage) -> Result<(), DeliveryError> {
            self.posts.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct DenyAll(AtomicUsize);

    impl RequestVerifier for DenyAll {
        fn verify(&self, _headers: &HeaderMap, _body: &[u8]) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    struct Harness {
        engine: Arc<RelayEngine>,
        provider: Arc<FakeProvider>,
        poster: Arc<FakePoster>,
        reports: mpsc::UnboundedReceiver<RelayReport>,
    }

    fn harness(reply: Result<&'static str, u16>) -> Harness {
        let provider = Arc::new(FakeProvider {
            reply,
            requests: Mutex::new(Vec::new()),
        });
        let poster = Arc::new(FakePoster::default());
        let completion = CompletionClient::new(
            provider.clone(),
            Arc::new(RateLimiter::new(Duration::from_secs(10))),
            "gpt-test",
            None,
            RetryPolicy {
                backoff: Duration::from_secs(1),
                max_retries: 5,
                timeout: Duration::from_secs(10),
            },
        );
        let dispatcher = Dispatcher::new(
            poster.clone(),
            "There was an issue processing your request.",
            true,
        );
        let settings = RelaySettings {
            filter: FilterPolicy {
                mention_gating: true,
                mention: MentionToken::for_user("UBOT"),
            },
            delay: DelayPolicy::default(),
            system_prompt: "You are an IT Support Agent.".to_string(),
            max_tokens: Some(50),
            dedup_ttl: Duration::from_secs(600),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(RelayEngine::new(settings, completion, dispatcher).with_reports(tx));
        Harness {
            engine,
            provider,
            poster,
            reports: rx,
        }
    }

    fn mention_body(event_id: &str, text: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": "event_callback",
            "event_id": event_id,
            "event": {
                "type": "app_mention",
                "text": text,
                "channel": "C1",
                "user": "U1",
                "ts": "1700000000.000100"
            }
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_is_echoed_without_work() {
        let h = harness(Ok("unused"));
        let ack = h
            .engine
            .receive(
                &HeaderMap::new(),
                br#"{"type":"url_verification","challenge":"abc123"}"#,
            )
            .unwrap();
        assert_eq!(ack, Ack::Challenge("abc123".to_string()));
        assert_eq!(h.engine.in_flight(), 0);
        assert!(h.provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_event_acks_without_work() {
        let h = harness(Ok("unused"));
        let ack = h
            .engine
            .receive(&HeaderMap::new(), &mention_body("Ev1", "no mention here"))
            .unwrap();
        assert_eq!(ack, Ack::Ignored(FilterReason::NotMentioned));
        assert_eq!(h.engine.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_body_is_rejected() {
        let h = harness(Ok("unused"));
        let err = h.engine.receive(&HeaderMap::new(), b"{oops").unwrap_err();
        assert!(matches!(err, RelayError::Malformed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verifier_runs_first() {
        let mut h = harness(Ok("unused"));
        let verifier = Arc::new(DenyAll(AtomicUsize::new(0)));
        let engine = Arc::into_inner(h.engine).unwrap().with_verifier(verifier.clone());
        h.engine = Arc::new(engine);

        let mut headers = HeaderMap::new();
        headers.insert("x-slack-signature", HeaderValue::from_static("v0=bad"));
        let err = h.engine.receive(&headers, b"not even json").unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized));
        assert_eq!(verifier.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_event_acks_before_reply() {
        let mut h = harness(Ok("Use the self-service portal."));
        let started = Instant::now();
        let ack = h
            .engine
            .receive(
                &HeaderMap::new(),
                &mention_body("Ev1", "<@UBOT> reset my password"),
            )
            .unwrap();
        assert!(matches!(ack, Ack::Accepted { .. }));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(h.poster.posts.lock().unwrap().is_empty());

        let report = h.reports.recv().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Sent);
        assert_eq!(report.channel_id, "C1");
        assert_eq!(report.thread_id.as_deref(), Some("1700000000.000100"));
        assert!(report.completion_error.is_none());

        let requests = h.provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        // 25 characters, below the lower bound
        assert!(requests[0].0 - started >= Duration::from_secs(30));
        assert_eq!(requests[0].1.messages[0].content, "You are an IT Support Agent.");
        assert_eq!(requests[0].1.messages[1].content, "reset my password");
        assert_eq!(requests[0].1.max_tokens, Some(50));

        let posts = h.poster.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].channel, "C1");
        assert_eq!(posts[0].thread_ts.as_deref(), Some("1700000000.000100"));
        assert_eq!(posts[0].text, "Use the self-service portal.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_failure_sends_fallback() {
        let mut h = harness(Err(500));
        h.engine
            .receive(&HeaderMap::new(), &mention_body("Ev1", "<@UBOT> help"))
            .unwrap();

        let report = h.reports.recv().await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::SentFallback);
        assert!(report.completion_error.unwrap().contains("500"));

        let posts = h.poster.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "There was an issue processing your request.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_is_acked_as_duplicate() {
        let mut h = harness(Ok("hi"));
        let body = mention_body("Ev1", "<@UBOT> hello");
        assert!(matches!(
            h.engine.receive(&HeaderMap::new(), &body).unwrap(),
            Ack::Accepted { .. }
        ));
        assert_eq!(
            h.engine.receive(&HeaderMap::new(), &body).unwrap(),
            Ack::Duplicate
        );

        h.reports.recv().await.unwrap();
        assert_eq!(h.poster.posts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_runs() {
        let h = harness(Ok("hi"));
        h.engine
            .receive(&HeaderMap::new(), &mention_body("Ev1", "<@UBOT> hello"))
            .unwrap();
        assert_eq!(h.engine.in_flight(), 1);

        assert!(h.engine.shutdown(Duration::from_secs(300)).await);
        assert_eq!(h.engine.in_flight(), 0);
        assert_eq!(h.poster.posts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_gives_up_after_grace() {
        let h = harness(Ok("hi"));
        h.engine
            .receive(&HeaderMap::new(), &mention_body("Ev1", "<@UBOT> hello"))
            .unwrap();

        assert!(!h.engine.shutdown(Duration::from_secs(5)).await);
        assert!(h.poster.posts.lock().unwrap().is_empty());
    }
}
