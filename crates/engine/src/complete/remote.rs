//! Completion by an AI backend.
//!
//! The provider sends the file and cursor as JSON through a
//! [`CompletionTransport`] and expects a JSON object with a `suggestions`
//! array in return. The request runs on a worker thread so that the caller
//! waits at most for the configured timeout, however the transport behaves.

use std::{
    fmt::Debug,
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use aurion_errors::{location::Location, transport};
use serde::{Deserialize, Serialize};

use crate::complete::{CompletionProvider, FileContext, Suggestion};

/// A way of delivering a request body to the backend and returning its
/// response body.
///
/// Transports own the endpoint and any credentials it needs.
pub trait CompletionTransport: Debug + Send + Sync {
    /// Sends `body` and returns the response body.
    ///
    /// # Errors
    ///
    /// - [`transport::Error`] if the exchange fails for any reason.
    fn send(&self, body: &str, timeout: Duration) -> transport::Result<String>;
}

/// The body of a completion request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CompletionRequest<'a> {
    pub path:    &'a str,
    pub content: &'a str,
    pub cursor:  Option<Location>,
}

/// The body of a completion response.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

/// Completes by asking a remote backend.
#[derive(Clone, Debug)]
pub struct RemoteCompletion {
    transport: Arc<dyn CompletionTransport>,
    timeout:   Duration,
}

impl RemoteCompletion {
    #[must_use]
    pub fn new(transport: Arc<dyn CompletionTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Asks the backend for completions, failing if it cannot answer in time.
    ///
    /// # Errors
    ///
    /// - [`transport::Error::Timeout`] if no answer arrives within the timeout.
    /// - [`transport::Error::MalformedResponse`] if the answer is not a valid
    ///   completion response.
    /// - Any error of the transport itself.
    pub fn request(&self, context: &FileContext) -> transport::Result<Vec<Suggestion>> {
        let body = serde_json::to_string(&CompletionRequest {
            path:    &context.path,
            content: &context.content,
            cursor:  context.cursor,
        })
        .map_err(|e| transport::Error::MalformedResponse(e.to_string()))?;

        let (sender, receiver) = mpsc::channel();
        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        thread::spawn(move || {
            // The receiver is gone if we already timed out.
            let _ = sender.send(transport.send(&body, timeout));
        });

        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let response = receiver
            .recv_timeout(self.timeout)
            .map_err(|_| transport::Error::Timeout(timeout_ms))??;

        let response: CompletionResponse = serde_json::from_str(&response)
            .map_err(|e| transport::Error::MalformedResponse(e.to_string()))?;
        let mut suggestions = response
            .suggestions
            .into_iter()
            .map(|s| Suggestion::new(s.title, s.snippet, s.score))
            .collect::<Vec<_>>();
        suggestions.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(suggestions)
    }
}

impl CompletionProvider for RemoteCompletion {
    fn complete(&self, context: &FileContext) -> Vec<Suggestion> {
        let _span = tracing::debug_span!("remote_completion", path = %context.path).entered();
        self.request(context).unwrap_or_else(|error| {
            tracing::warn!(%error, "completion backend failed, offering no suggestions");
            Vec::new()
        })
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use aurion_errors::transport;

    use crate::complete::{
        remote::{CompletionTransport, RemoteCompletion},
        CompletionProvider,
        FileContext,
    };

    #[derive(Debug)]
    struct Canned(transport::Result<String>);

    impl CompletionTransport for Canned {
        fn send(&self, _: &str, _: Duration) -> transport::Result<String> {
            self.0.clone()
        }
    }

    #[derive(Debug)]
    struct Stalled;

    impl CompletionTransport for Stalled {
        fn send(&self, _: &str, _: Duration) -> transport::Result<String> {
            thread::sleep(Duration::from_secs(5));
            Ok("{}".to_string())
        }
    }

    #[test]
    fn clamps_and_orders_backend_suggestions() -> anyhow::Result<()> {
        let body = r#"{"suggestions": [
            {"title": "low", "snippet": "a", "score": -1.0},
            {"title": "high", "snippet": "b", "score": 3.5}
        ]}"#;
        let remote = RemoteCompletion::new(Arc::new(Canned(Ok(body.to_string()))), Duration::from_secs(1));
        let suggestions = remote.request(&FileContext::new("a.aur", ""))?;

        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].title, "high");
        assert_eq!(suggestions[0].score, 1.0);
        assert_eq!(suggestions[1].score, 0.0);

        Ok(())
    }

    #[test]
    fn failures_produce_no_suggestions() {
        let context = FileContext::new("a.aur", "contract A {}");
        for reply in [Err(transport::Error::Status(500)), Ok("not json".to_string())] {
            let remote = RemoteCompletion::new(Arc::new(Canned(reply)), Duration::from_secs(1));
            assert!(remote.complete(&context).is_empty());
        }
    }

    #[test]
    fn stalled_backends_are_abandoned_after_the_timeout() {
        let remote = RemoteCompletion::new(Arc::new(Stalled), Duration::from_millis(50));
        let started = Instant::now();

        assert_eq!(
            remote.request(&FileContext::new("a.aur", "")),
            Err(transport::Error::Timeout(50))
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
