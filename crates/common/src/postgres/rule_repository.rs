use crate::domain::{DomainError, DomainResult, ListRulesByTagsInput, Rule, RuleRepository};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tokio_postgres::Row;
use tracing::{debug, instrument};

/// Rule lookup over the read-only pool
#[derive(Clone)]
pub struct PostgresRuleRepository {
    client: PostgresClient,
}

impl PostgresRuleRepository {
    pub fn new(read_only: PostgresClient) -> Self {
        Self { client: read_only }
    }
}

fn row_to_rule(row: &Row) -> DomainResult<Rule> {
    let status: String = row
        .try_get("status")
        .map_err(|e| DomainError::RepositoryError(e.into()))?;
    let get = |column: &str| -> DomainResult<String> {
        row.try_get(column)
            .map_err(|e| DomainError::RepositoryError(e.into()))
    };

    Ok(Rule {
        rule_id: get("rule_id")?,
        tenant_id: get("tenant_id")?,
        status: status.parse()?,
        device_tag: get("device_tag")?,
        attribute: get("attribute")?,
        expression: get("expression")?,
    })
}

#[async_trait]
impl RuleRepository for PostgresRuleRepository {
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, attribute = %input.attribute))]
    async fn list_by_tags(&self, input: ListRulesByTagsInput) -> DomainResult<Vec<Rule>> {
        if input.device_tags.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                "SELECT rule_id, tenant_id, status, device_tag, attribute, expression
                 FROM rules
                 WHERE tenant_id = $1
                   AND attribute = $2
                   AND device_tag = ANY($3)
                   AND status = 'active'",
                &[&input.tenant_id, &input.attribute, &input.device_tags],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let rules = rows.iter().map(row_to_rule).collect::<DomainResult<Vec<_>>>()?;
        debug!(count = rules.len(), "listed candidate rules");
        Ok(rules)
    }
}
