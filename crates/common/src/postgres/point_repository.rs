use crate::domain::{
    CreateOutcome, CreatePointInput, DomainError, DomainResult, PointRepository, PointValue,
};
use crate::postgres::{is_unique_violation, PostgresClient};
use crate::validation::validate_record;
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Typed columns of `accumulated_points`; exactly one is set per row
#[derive(Debug, Default, PartialEq)]
struct ValueColumns<'a> {
    int_value: Option<i64>,
    float_value: Option<f64>,
    string_value: Option<&'a str>,
    bool_value: Option<bool>,
    bytes_value: Option<&'a [u8]>,
}

fn value_columns(value: &PointValue) -> ValueColumns<'_> {
    let mut columns = ValueColumns::default();
    match value {
        PointValue::Int(v) => columns.int_value = Some(*v),
        PointValue::Float(v) => columns.float_value = Some(*v),
        PointValue::String(v) => columns.string_value = Some(v.as_str()),
        PointValue::Bool(v) => columns.bool_value = Some(*v),
        PointValue::Bytes(v) => columns.bytes_value = Some(v.as_slice()),
    }
    columns
}

/// Point store on the read-write pool, deduplicated by
/// `UNIQUE (tenant_id, device_id, attribute, occurred_at)`
#[derive(Clone)]
pub struct PostgresPointRepository {
    client: PostgresClient,
}

impl PostgresPointRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PointRepository for PostgresPointRepository {
    #[instrument(skip(self, input), fields(attribute = %input.attribute, kind = input.value.kind()))]
    async fn create_point(&self, input: CreatePointInput) -> DomainResult<CreateOutcome> {
        validate_record(&input)?;

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let columns = value_columns(&input.value);
        let kind = input.value.kind();

        let result = conn
            .execute(
                "INSERT INTO accumulated_points (
                    tenant_id, device_id, attribute, occurred_at, trace_id, value_kind,
                    int_value, float_value, string_value, bool_value, bytes_value
                 )
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &input.tenant_id,
                    &input.device_id,
                    &input.attribute,
                    &input.occurred_at,
                    &input.trace_id,
                    &kind,
                    &columns.int_value,
                    &columns.float_value,
                    &columns.string_value,
                    &columns.bool_value,
                    &columns.bytes_value,
                ],
            )
            .await;

        match result {
            Ok(_) => {
                debug!("point accumulated");
                Ok(CreateOutcome::Created)
            }
            Err(e) if is_unique_violation(&e) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(DomainError::RepositoryError(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_columns_sets_exactly_one() {
        assert_eq!(
            value_columns(&PointValue::Float(1.5)),
            ValueColumns {
                float_value: Some(1.5),
                ..Default::default()
            }
        );
        assert_eq!(
            value_columns(&PointValue::Bytes(vec![1, 2])),
            ValueColumns {
                bytes_value: Some(&[1u8, 2][..]),
                ..Default::default()
            }
        );
    }
}
