use async_trait::async_trait;
use common::domain::{
    with_timeout, CreateEventInput, CreateOutcome, DomainResult, Envelope, EnvelopeHandler,
    EventRepository, ExpressionEvaluator, ListRulesByTagsInput, Rule, RuleEventProducer,
    RuleFiring, RuleRepository,
};
use common::pipeline_metrics::{EmitOutcome, PipelineMetrics};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

/// Matches a point against tenant rules and emits one event per firing rule.
///
/// Flow:
/// 1. Look up active rules by tenant, attribute and device tags
/// 2. For every candidate, concurrently: evaluate, record the event, publish
///
/// Only a failed lookup is returned as an error. Everything after it is
/// rule-local: a failure is logged and metered and never affects siblings.
pub struct RuleEvaluationService {
    rules: Arc<dyn RuleRepository>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    events: Arc<dyn EventRepository>,
    producer: Arc<dyn RuleEventProducer>,
    metrics: Arc<dyn PipelineMetrics>,
    call_timeout: Duration,
}

impl RuleEvaluationService {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        events: Arc<dyn EventRepository>,
        producer: Arc<dyn RuleEventProducer>,
        metrics: Arc<dyn PipelineMetrics>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            rules,
            evaluator,
            events,
            producer,
            metrics,
            call_timeout,
        }
    }

    async fn process_rule(&self, envelope: &Envelope, rule: Rule) -> EmitOutcome {
        match self.evaluator.evaluate(envelope, &rule.expression) {
            Ok(true) => {}
            Ok(false) => {
                debug!("expression did not match");
                return EmitOutcome::NotMatched;
            }
            Err(e) => {
                warn!(error = %e, expression = %rule.expression, "rule evaluation failed");
                return EmitOutcome::EvaluationFailed;
            }
        }

        let input = CreateEventInput::for_firing(envelope, &rule);
        match with_timeout(
            "create_event",
            self.call_timeout,
            self.events.create_event(input),
        )
        .await
        {
            Ok(CreateOutcome::Created) => {}
            Ok(CreateOutcome::AlreadyExists) => {
                info!("event already recorded, skipping publish");
                return EmitOutcome::Duplicate;
            }
            Err(e) => {
                error!(error = %e, "failed to record event");
                return EmitOutcome::StoreFailed;
            }
        }

        let firing = RuleFiring {
            envelope: envelope.clone(),
            rule,
        };
        match with_timeout(
            "publish_rule_event",
            self.call_timeout,
            self.producer.publish_rule_event(&firing),
        )
        .await
        {
            Ok(()) => {
                debug!("rule event published");
                EmitOutcome::Emitted
            }
            Err(e) => {
                error!(error = %e, "failed to publish rule event");
                EmitOutcome::PublishFailed
            }
        }
    }
}

#[async_trait]
impl EnvelopeHandler for RuleEvaluationService {
    #[instrument(skip_all, fields(attribute = %envelope.attribute))]
    async fn handle(&self, envelope: Envelope) -> DomainResult<()> {
        let candidates = with_timeout(
            "list_by_tags",
            self.call_timeout,
            self.rules.list_by_tags(ListRulesByTagsInput {
                tenant_id: envelope.tenant_id().to_string(),
                attribute: envelope.attribute.clone(),
                device_tags: envelope.device.tags.clone(),
            }),
        )
        .await?;

        if candidates.is_empty() {
            debug!("no candidate rules");
            return Ok(());
        }

        debug!(candidates = candidates.len(), "evaluating candidate rules");

        let evaluations = candidates.into_iter().map(|rule| {
            let span = info_span!("evaluate_rule", rule_id = %rule.rule_id);
            self.process_rule(&envelope, rule).instrument(span)
        });

        for outcome in join_all(evaluations).await {
            self.metrics.record_emit(outcome);
        }

        Ok(())
    }
}
