use crate::domain::{
    AccumulatedPoint, CreateEventInput, CreateOutcome, CreatePointInput, DomainError,
    DomainResult, Event, EventRepository, ListRulesByTagsInput, PointRepository, Rule,
    RuleRepository,
};
use crate::validation::validate_record;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Rule store held in memory; applies the same filter as the SQL query
#[derive(Clone, Default)]
pub struct InMemoryRuleRepository {
    rules: Arc<RwLock<Vec<Rule>>>,
    fail_lookups: Arc<AtomicBool>,
}

impl InMemoryRuleRepository {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: Arc::new(RwLock::new(rules)),
            fail_lookups: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn insert(&self, rule: Rule) {
        self.rules.write().await.push(rule);
    }

    /// Make lookups fail as if the store were unreachable
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn list_by_tags(&self, input: ListRulesByTagsInput) -> DomainResult<Vec<Rule>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(DomainError::RepositoryError(anyhow::anyhow!(
                "rule store unavailable"
            )));
        }

        let rules = self.rules.read().await;
        Ok(rules
            .iter()
            .filter(|rule| rule.tenant_id == input.tenant_id)
            .filter(|rule| rule.matches(&input.attribute, &input.device_tags))
            .cloned()
            .collect())
    }
}

type EventKey = (String, String, String, DateTime<Utc>);

/// Event store keyed by the dedup tuple
#[derive(Clone, Default)]
pub struct InMemoryEventRepository {
    events: Arc<RwLock<HashMap<EventKey, Event>>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn create_event(&self, input: CreateEventInput) -> DomainResult<CreateOutcome> {
        validate_record(&input)?;

        let key = (
            input.tenant_id.clone(),
            input.device_id.clone(),
            input.rule_id.clone(),
            input.created_at,
        );

        let mut events = self.events.write().await;
        if events.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        events.insert(key, Event::from(input));
        Ok(CreateOutcome::Created)
    }
}

type PointKey = (String, String, String, DateTime<Utc>);

#[derive(Clone, Default)]
pub struct InMemoryPointRepository {
    points: Arc<RwLock<HashMap<PointKey, AccumulatedPoint>>>,
}

impl InMemoryPointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn points(&self) -> Vec<AccumulatedPoint> {
        self.points.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.points.read().await.len()
    }
}

#[async_trait]
impl PointRepository for InMemoryPointRepository {
    async fn create_point(&self, input: CreatePointInput) -> DomainResult<CreateOutcome> {
        validate_record(&input)?;

        let key = (
            input.tenant_id.clone(),
            input.device_id.clone(),
            input.attribute.clone(),
            input.occurred_at,
        );

        let mut points = self.points.write().await;
        if points.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        points.insert(key, AccumulatedPoint::from(input));
        Ok(CreateOutcome::Created)
    }
}
