//! Test Support
//!
//! A scriptable [`CompletionClient`] used across the unit tests. Behaviors
//! are scripted per model name: one-shot scripts queue ahead of a sticky
//! default, and every call is recorded so tests can assert ordering and
//! prompt contents. A `Slow` script honors the call deadline the way the
//! real transport does, returning a timeout error when the deadline is
//! shorter than the scripted delay.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::catalog::ModelDescriptor;
use crate::error::TransportError;
use crate::transport::{Completion, CompletionCall, CompletionClient};

/// Virtual latency reported by plain scripted replies.
const SCRIPTED_LATENCY: Duration = Duration::from_millis(5);

/// One scripted transport behavior.
#[derive(Clone, Debug)]
pub enum Scripted {
    /// Succeed immediately, reporting `latency` without actually waiting.
    Reply { content: String, latency: Duration },
    /// Fail immediately.
    Fail(TransportError),
    /// Succeed after really waiting `delay`, or time out when the call
    /// deadline is shorter.
    Slow { content: String, delay: Duration },
}

impl Scripted {
    pub fn reply(content: impl Into<String>) -> Self {
        Self::Reply {
            content: content.into(),
            latency: SCRIPTED_LATENCY,
        }
    }

    pub fn reply_with_latency(content: impl Into<String>, latency: Duration) -> Self {
        Self::Reply {
            content: content.into(),
            latency,
        }
    }

    pub fn fail(error: TransportError) -> Self {
        Self::Fail(error)
    }

    pub fn slow(content: impl Into<String>, delay: Duration) -> Self {
        Self::Slow {
            content: content.into(),
            delay,
        }
    }
}

/// A recorded transport call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    pub model: String,
    pub prompt: String,
}

#[derive(Debug, Default)]
struct ScriptState {
    queued: HashMap<String, VecDeque<Scripted>>,
    defaults: HashMap<String, Scripted>,
    history: Vec<CallRecord>,
}

/// Scriptable completion client with a full call history.
///
/// Calls resolve against the model's queued scripts first, then its
/// default; a model with neither fails with a network error so that a
/// test never silently succeeds against an unscripted model.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    state: Mutex<ScriptState>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot script for `model`.
    pub fn push(&self, model: &str, script: Scripted) {
        self.state
            .lock()
            .queued
            .entry(model.to_string())
            .or_default()
            .push_back(script);
    }

    /// Set the sticky script used once `model`'s queue is empty.
    pub fn set_default(&self, model: &str, script: Scripted) {
        self.state.lock().defaults.insert(model.to_string(), script);
    }

    /// Shorthand: every call to `model` succeeds with `content`.
    pub fn reply_with(&self, model: &str, content: &str) {
        self.set_default(model, Scripted::reply(content));
    }

    /// Shorthand: every call to `model` fails with `error`.
    pub fn fail_with(&self, model: &str, error: TransportError) {
        self.set_default(model, Scripted::fail(error));
    }

    pub fn call_count(&self, model: &str) -> usize {
        self.state
            .lock()
            .history
            .iter()
            .filter(|c| c.model == model)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().history.clone()
    }

    /// Prompts sent to `model`, in call order.
    pub fn prompts_for(&self, model: &str) -> Vec<String> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|c| c.model == model)
            .map(|c| c.prompt.clone())
            .collect()
    }

    pub fn assert_call_order(&self, expected: &[&str]) {
        let actual: Vec<String> = self
            .state
            .lock()
            .history
            .iter()
            .map(|c| c.model.clone())
            .collect();
        assert_eq!(actual, expected, "transport call order mismatch");
    }

    pub fn assert_not_called(&self, model: &str) {
        assert_eq!(
            self.call_count(model),
            0,
            "expected no transport calls to '{model}'"
        );
    }

    /// Record the call and pick its script in one locked step.
    fn resolve(&self, model: &str, prompt: &str) -> Option<Scripted> {
        let mut state = self.state.lock();
        state.history.push(CallRecord {
            model: model.to_string(),
            prompt: prompt.to_string(),
        });
        if let Some(queue) = state.queued.get_mut(model) {
            if let Some(script) = queue.pop_front() {
                return Some(script);
            }
        }
        state.defaults.get(model).cloned()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        call: &CompletionCall,
    ) -> Result<Completion, TransportError> {
        match self.resolve(&model.name, &call.prompt) {
            Some(Scripted::Reply { content, latency }) => Ok(Completion {
                content,
                model: model.name.clone(),
                latency,
                tokens_used: None,
            }),
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Slow { content, delay }) => {
                if delay >= call.timeout {
                    tokio::time::sleep(call.timeout).await;
                    Err(TransportError::Timeout {
                        timeout: call.timeout,
                    })
                } else {
                    tokio::time::sleep(delay).await;
                    Ok(Completion {
                        content,
                        model: model.name.clone(),
                        latency: delay,
                        tokens_used: None,
                    })
                }
            }
            None => Err(TransportError::Network(format!(
                "no script for model '{}'",
                model.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelRole;

    fn descriptor(name: &str) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            provider: "test".to_string(),
            role: ModelRole::Primary,
            max_tokens: 64,
            temperature: 0.0,
            context_window: 4096,
        }
    }

    #[tokio::test]
    async fn test_queued_scripts_run_before_default() {
        let client = ScriptedClient::new();
        client.push("m", Scripted::fail(TransportError::Network("first".into())));
        client.reply_with("m", "default");

        let call = CompletionCall::new("hi", Duration::from_secs(1));
        let first = client.complete(&descriptor("m"), &call).await;
        let second = client.complete(&descriptor("m"), &call).await;

        assert!(first.is_err());
        assert_eq!(second.unwrap().content, "default");
        assert_eq!(client.call_count("m"), 2);
    }

    #[tokio::test]
    async fn test_unscripted_model_fails() {
        let client = ScriptedClient::new();
        let call = CompletionCall::new("hi", Duration::from_secs(1));

        let result = client.complete(&descriptor("ghost"), &call).await;

        assert_eq!(
            result.unwrap_err(),
            TransportError::Network("no script for model 'ghost'".into())
        );
    }

    #[tokio::test]
    async fn test_reply_latency_is_virtual() {
        let client = ScriptedClient::new();
        client.set_default(
            "m",
            Scripted::reply_with_latency("fast", Duration::from_secs(30)),
        );
        let call = CompletionCall::new("hi", Duration::from_secs(1));

        // Returns immediately even though the reported latency is large.
        let completion = client.complete(&descriptor("m"), &call).await.unwrap();

        assert_eq!(completion.latency, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_script_times_out_against_deadline() {
        let client = ScriptedClient::new();
        client.set_default("m", Scripted::slow("late", Duration::from_secs(10)));
        let call = CompletionCall::new("hi", Duration::from_millis(100));

        let result = client.complete(&descriptor("m"), &call).await;

        assert_eq!(
            result.unwrap_err(),
            TransportError::Timeout {
                timeout: Duration::from_millis(100)
            }
        );
    }

    #[tokio::test]
    async fn test_history_records_prompts() {
        let client = ScriptedClient::new();
        client.reply_with("m", "ok");
        let call = CompletionCall::new("what is 2+2", Duration::from_secs(1));
        let _ = client.complete(&descriptor("m"), &call).await;

        assert_eq!(client.prompts_for("m"), vec!["what is 2+2"]);
        assert_eq!(
            client.calls(),
            vec![CallRecord {
                model: "m".into(),
                prompt: "what is 2+2".into()
            }]
        );
    }
}
