use crate::domain::{
    CreateEventInput, CreateOutcome, DomainError, DomainResult, EventRepository,
};
use crate::postgres::{is_unique_violation, PostgresClient};
use crate::validation::validate_record;
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Event store on the read-write pool.
///
/// Relies on `UNIQUE (tenant_id, device_id, rule_id, created_at)`; racing
/// workers and redeliveries both end in [`CreateOutcome::AlreadyExists`].
#[derive(Clone)]
pub struct PostgresEventRepository {
    client: PostgresClient,
}

impl PostgresEventRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    #[instrument(skip(self, input), fields(rule_id = %input.rule_id))]
    async fn create_event(&self, input: CreateEventInput) -> DomainResult<CreateOutcome> {
        validate_record(&input)?;

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let result = conn
            .execute(
                "INSERT INTO events (tenant_id, device_id, rule_id, created_at, trace_id)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &input.tenant_id,
                    &input.device_id,
                    &input.rule_id,
                    &input.created_at,
                    &input.trace_id,
                ],
            )
            .await;

        match result {
            Ok(_) => {
                debug!("event recorded");
                Ok(CreateOutcome::Created)
            }
            Err(e) if is_unique_violation(&e) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(DomainError::RepositoryError(e.into())),
        }
    }
}
