use crate::domain::envelope::Envelope;
use crate::domain::outcome::{CreateOutcome, MAX_IDENTIFIER_LEN};
use crate::domain::result::DomainResult;
use crate::domain::rule::Rule;
use crate::domain::time::truncate_to_millis;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use garde::Validate;

/// Durable record of a rule firing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub tenant_id: String,
    pub device_id: String,
    pub rule_id: String,
    pub created_at: DateTime<Utc>,
    pub trace_id: String,
}

/// Input for recording a rule firing.
///
/// `(tenant_id, device_id, rule_id, created_at)` is the dedup tuple.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct CreateEventInput {
    #[garde(length(min = 1, max = MAX_IDENTIFIER_LEN))]
    pub tenant_id: String,
    #[garde(length(min = 1, max = MAX_IDENTIFIER_LEN))]
    pub device_id: String,
    #[garde(length(min = 1, max = MAX_IDENTIFIER_LEN))]
    pub rule_id: String,
    #[garde(skip)]
    pub created_at: DateTime<Utc>,
    #[garde(length(max = MAX_IDENTIFIER_LEN))]
    pub trace_id: String,
}

impl CreateEventInput {
    /// Build the record for `rule` firing on `envelope`, truncating the
    /// measurement timestamp to milliseconds.
    pub fn for_firing(envelope: &Envelope, rule: &Rule) -> Self {
        Self {
            tenant_id: envelope.tenant_id().to_string(),
            device_id: envelope.device_id().to_string(),
            rule_id: rule.rule_id.clone(),
            created_at: truncate_to_millis(envelope.occurred_at),
            trace_id: envelope.trace_id.clone(),
        }
    }
}

impl From<CreateEventInput> for Event {
    fn from(input: CreateEventInput) -> Self {
        Event {
            tenant_id: input.tenant_id,
            device_id: input.device_id,
            rule_id: input.rule_id,
            created_at: input.created_at,
            trace_id: input.trace_id,
        }
    }
}

/// Idempotent event store.
///
/// A uniqueness violation on the dedup tuple is reported as
/// [`CreateOutcome::AlreadyExists`], never as an error. Oversized fields are
/// rejected with `DomainError::InvalidFormat`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create_event(&self, input: CreateEventInput) -> DomainResult<CreateOutcome>;
}

/// Output published for every newly recorded rule firing
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFiring {
    pub envelope: Envelope,
    pub rule: Rule,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RuleEventProducer: Send + Sync {
    async fn publish_rule_event(&self, firing: &RuleFiring) -> DomainResult<()>;
}
