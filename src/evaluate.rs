//! Response Evaluator
//!
//! Scores two or more successful responses to the same prompt by asking a
//! designated judge model to rate each one, then returns the highest-rated
//! response. Evaluation is strictly best-effort: an unparseable rating
//! becomes the neutral score, a failed judge call never fails the request,
//! and exact ties resolve to the first candidate in input order so repeated
//! runs stay deterministic.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::catalog::ModelDescriptor;
use crate::dispatch::ModelResponse;
use crate::error::ErrorKind;
use crate::transport::{CompletionCall, CompletionClient};

/// Score assigned when the judge replies with something unparseable.
pub const NEUTRAL_SCORE: f64 = 5.0;

/// Compares candidate responses using a judge model.
pub struct ResponseEvaluator {
    transport: Arc<dyn CompletionClient>,
    judge: ModelDescriptor,
    timeout: Duration,
}

impl ResponseEvaluator {
    pub fn new(
        transport: Arc<dyn CompletionClient>,
        judge: ModelDescriptor,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            judge,
            timeout,
        }
    }

    pub fn judge_model(&self) -> &str {
        &self.judge.name
    }

    /// Pick the best of `candidates` (all successful responses to
    /// `prompt`). The winner carries its score; when every judge call
    /// fails, the first candidate comes back unscored.
    pub async fn select_best(
        &self,
        prompt: &str,
        candidates: Vec<ModelResponse>,
    ) -> ModelResponse {
        if candidates.len() < 2 {
            // Degenerate input; nothing to compare.
            return candidates.into_iter().next().unwrap_or_else(|| {
                ModelResponse::failed(self.judge.name.clone(), ErrorKind::InvalidOutput, Duration::ZERO)
            });
        }

        let mut scored: Vec<(ModelResponse, Option<f64>)> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let score = self.judge(prompt, &candidate).await;
            scored.push((candidate, score));
        }

        if scored.iter().all(|(_, score)| score.is_none()) {
            warn!(
                judge = %self.judge.name,
                "every judge call failed; returning first candidate unscored"
            );
            return scored.swap_remove(0).0;
        }

        // Strictly-greater comparison keeps the first candidate on ties.
        let mut winner = 0;
        let mut best = f64::MIN;
        for (index, (_, score)) in scored.iter().enumerate() {
            let effective = score.unwrap_or(NEUTRAL_SCORE);
            if effective > best {
                winner = index;
                best = effective;
            }
        }

        let (mut response, _) = scored.swap_remove(winner);
        debug!(
            model = %response.model_name,
            score = best,
            "evaluator selected response"
        );
        response.score = Some(best);
        response
    }

    /// One judge call for one candidate. `None` means the call itself
    /// failed; an unparseable reply still yields the neutral score.
    async fn judge(&self, prompt: &str, candidate: &ModelResponse) -> Option<f64> {
        let call = CompletionCall::new(rating_prompt(prompt, &candidate.content), self.timeout);
        match self.transport.complete(&self.judge, &call).await {
            Ok(completion) => {
                let score = parse_score(&completion.content).unwrap_or(NEUTRAL_SCORE);
                debug!(
                    judge = %self.judge.name,
                    candidate = %candidate.model_name,
                    score,
                    "candidate scored"
                );
                Some(score)
            }
            Err(err) => {
                warn!(
                    judge = %self.judge.name,
                    candidate = %candidate.model_name,
                    error = %err,
                    "judge call failed"
                );
                None
            }
        }
    }
}

fn rating_prompt(task: &str, answer: &str) -> String {
    format!(
        "You are scoring one answer to a task.\n\
         \n\
         Task:\n{task}\n\
         \n\
         Answer:\n{answer}\n\
         \n\
         Rate the answer from 0 to 10 considering quality, relevance, \
         completeness, and efficiency. Reply with a single number and \
         nothing else."
    )
}

/// First numeric token of the judge's reply, clamped to `[0, 10]`.
pub fn parse_score(text: &str) -> Option<f64> {
    text.split(|c: char| !c.is_ascii_digit() && c != '.')
        .filter(|token| !token.is_empty())
        .find_map(|token| token.parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 10.0))
}
