use super::expression::ValueSource;
use super::sequence::SequenceMediator;
use super::split::{scoped_property, TargetSequence};
use super::{handle_fault, Outcome};
use crate::aggregation::{AggregateTracker, CompletedAggregate, CompletionCondition, OfferResult};
use crate::constants::properties::{
    AGGREGATE_CORRELATION, AGGREGATE_SIZE, AGGREGATE_TIMED_OUT, MESSAGE_SEQUENCE,
};
use crate::mediation::MediationEnv;
use crate::message::MessageContext;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_ENCLOSING: &str = "parts";

#[derive(Debug)]
struct AggregateInner {
    id: Option<String>,
    correlation: Option<ValueSource>,
    expression: Option<String>,
    enclosing: String,
    on_complete: TargetSequence,
    tracker: AggregateTracker,
    destroyed: AtomicBool,
}

/// Collects correlated messages and forwards one merged message
///
/// Parked messages return `Stop`. The message that completes the group (or
/// the timer that expires it) builds the merged message on the first part's
/// context, with payload `{ <enclosing>: [parts...] }`, and runs
/// `on_complete` with it.
#[derive(Debug, Clone)]
pub struct AggregateMediator {
    inner: Arc<AggregateInner>,
}

impl AggregateMediator {
    pub fn new(condition: CompletionCondition, on_complete: TargetSequence) -> Self {
        Self::build(None, None, None, DEFAULT_ENCLOSING.to_string(), condition, on_complete)
    }

    /// Full constructor used by the factory
    pub fn build(
        id: Option<String>,
        correlation: Option<ValueSource>,
        expression: Option<String>,
        enclosing: String,
        condition: CompletionCondition,
        on_complete: TargetSequence,
    ) -> Self {
        let tracker = AggregateTracker::new(condition)
            .with_sequence_property(scoped_property(MESSAGE_SEQUENCE, id.as_deref()));
        Self {
            inner: Arc::new(AggregateInner {
                id,
                correlation,
                expression,
                enclosing,
                on_complete,
                tracker,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn with_inline_sequence(condition: CompletionCondition, sequence: SequenceMediator) -> Self {
        Self::new(condition, TargetSequence::Inline(Arc::new(sequence)))
    }

    pub fn tracker(&self) -> &AggregateTracker {
        &self.inner.tracker
    }

    pub fn on_complete(&self) -> OnComplete<'_> {
        OnComplete(&self.inner.on_complete)
    }

    pub fn destroy(&self) {
        if !self.inner.destroyed.swap(true, Ordering::AcqRel) {
            debug!(
                id = ?self.inner.id,
                parked = self.inner.tracker.active_count(),
                "Aggregate mediator destroyed"
            );
        }
    }

    fn correlation_key(&self, ctx: &MessageContext) -> Option<String> {
        match &self.inner.correlation {
            Some(source) => source.evaluate_string(ctx),
            None => ctx
                .get_property_string(&scoped_property(AGGREGATE_CORRELATION, self.inner.id.as_deref()))
                .or_else(|| ctx.correlation_key.clone()),
        }
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        let Some(key) = self.correlation_key(ctx) else {
            debug!(
                message_id = %ctx.message_id(),
                "No correlation for message, passing through aggregate"
            );
            return Outcome::Continue;
        };

        match self.inner.tracker.offer(&key, ctx.clone()) {
            OfferResult::Parked { size, created } => {
                debug!(correlation = %key, size = size, "Message parked for aggregation");
                if created {
                    self.schedule_timeout(&key, env);
                }
            }
            OfferResult::Completed(completed) => {
                self.inner.complete(completed, env);
            }
            OfferResult::Rejected(rejected) => {
                warn!(
                    correlation = %key,
                    message_id = %rejected.message_id(),
                    "⚠️ Aggregate full, message discarded"
                );
            }
        }
        Outcome::Stop
    }

    fn schedule_timeout(&self, key: &str, env: &MediationEnv) {
        let Some(timeout) = self.inner.tracker.condition().timeout else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(correlation = %key, "No runtime for aggregate timer, relying on sweeps");
            return;
        };

        let inner = Arc::clone(&self.inner);
        let env = env.clone();
        let key = key.to_string();
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let result = tokio::task::spawn_blocking(move || {
                if let Some(completed) = inner.tracker.complete_if_expired(&key) {
                    inner.complete(completed, &env);
                }
            })
            .await;
            if let Err(e) = result {
                error!(error = %e, "❌ Aggregate timeout task failed");
            }
        });
    }

    /// Complete every expired aggregate now; returns how many were completed
    pub fn sweep_expired(&self, env: &MediationEnv) -> usize {
        let completed = self.inner.tracker.complete_expired(Instant::now());
        let count = completed.len();
        for aggregate in completed {
            self.inner.complete(aggregate, env);
        }
        count
    }

    /// Periodically sweep expired aggregates until the mediator is destroyed
    pub fn spawn_sweeper(&self, env: MediationEnv, interval: Duration) -> JoinHandle<()> {
        let mediator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if mediator.inner.destroyed.load(Ordering::Acquire) {
                    break;
                }
                let sweeper = mediator.clone();
                let env = env.clone();
                match tokio::task::spawn_blocking(move || sweeper.sweep_expired(&env)).await {
                    Ok(0) => {}
                    Ok(count) => debug!(completed = count, "Aggregate sweep completed"),
                    Err(e) => error!(error = %e, "❌ Aggregate sweep failed"),
                }
            }
        })
    }
}

/// Borrowed view of the completion target, used for reference collection
#[derive(Debug)]
pub struct OnComplete<'a>(&'a TargetSequence);

impl OnComplete<'_> {
    pub fn collect_references(&self, out: &mut Vec<String>) {
        match self.0 {
            TargetSequence::Named(name) => out.push(name.clone()),
            TargetSequence::Inline(sequence) => sequence.collect_references(out),
        }
    }
}

impl AggregateInner {
    fn merge(&self, completed: CompletedAggregate) -> Option<MessageContext> {
        let CompletedAggregate {
            correlation,
            messages,
            timed_out,
        } = completed;
        let size = messages.len();
        let mut parts = Vec::with_capacity(size);
        let mut first: Option<MessageContext> = None;

        for message in messages {
            let part = match &self.expression {
                Some(pointer) => message.payload.pointer(pointer).cloned(),
                None => Some(message.payload.clone()),
            };
            match part {
                Some(part) => parts.push(part),
                None => debug!(
                    correlation = %correlation,
                    message_id = %message.message_id(),
                    "Aggregation expression matched nothing, part skipped"
                ),
            }
            if first.is_none() {
                first = Some(message);
            }
        }

        let mut merged = first?;
        let mut body = Map::new();
        body.insert(self.enclosing.clone(), Value::Array(parts));
        merged.payload = Value::Object(body);
        merged.set_property(AGGREGATE_SIZE, size);
        merged.set_property(AGGREGATE_TIMED_OUT, timed_out);
        Some(merged)
    }

    fn complete(&self, completed: CompletedAggregate, env: &MediationEnv) {
        let correlation = completed.correlation.clone();
        let timed_out = completed.timed_out;
        let Some(mut merged) = self.merge(completed) else {
            return;
        };

        let sequence = match &self.on_complete {
            TargetSequence::Inline(sequence) => Arc::clone(sequence),
            TargetSequence::Named(name) => match env.config().get_sequence(name) {
                Ok(sequence) => sequence,
                Err(e) => {
                    error!(
                        correlation = %correlation,
                        error = %e,
                        "❌ Aggregate completion sequence unavailable, merged message dropped"
                    );
                    return;
                }
            },
        };

        info!(
            correlation = %correlation,
            message_id = %merged.message_id(),
            timed_out = timed_out,
            "📦 Dispatching merged aggregate"
        );

        let outcome = match sequence.mediate(&mut merged, env) {
            Outcome::Fault(fault) => handle_fault(&mut merged, env, fault),
            outcome => outcome,
        };
        if let Outcome::Fault(fault) = outcome {
            error!(
                correlation = %correlation,
                code = %fault.code,
                error = %fault.message,
                "❌ Aggregate completion faulted without a handler"
            );
        }
    }
}
