use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    Active,
    Inactive,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Active => "active",
            RuleStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RuleStatus::Active),
            "inactive" => Ok(RuleStatus::Inactive),
            other => Err(DomainError::InvalidRuleStatus(other.to_string())),
        }
    }
}

/// Tenant-defined rule reacting to one attribute on devices carrying one tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub rule_id: String,
    pub tenant_id: String,
    pub status: RuleStatus,
    pub device_tag: String,
    pub attribute: String,
    pub expression: String,
}

impl Rule {
    /// Whether this rule applies to a point with `attribute` on a device with `tags`.
    pub fn matches(&self, attribute: &str, tags: &[String]) -> bool {
        self.status == RuleStatus::Active
            && self.attribute == attribute
            && tags.iter().any(|tag| tag == &self.device_tag)
    }
}

/// Input for listing candidate rules for a point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRulesByTagsInput {
    pub tenant_id: String,
    pub attribute: String,
    pub device_tags: Vec<String>,
}

/// Read-only rule lookup.
///
/// Implementations return only active rules of the tenant whose attribute
/// equals `attribute` and whose device tag is one of `device_tags`. No order is
/// guaranteed.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn list_by_tags(&self, input: ListRulesByTagsInput) -> DomainResult<Vec<Rule>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(status: RuleStatus) -> Rule {
        Rule {
            rule_id: "rule-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            status,
            device_tag: "motion".to_string(),
            attribute: "motion".to_string(),
            expression: "true".to_string(),
        }
    }

    #[test]
    fn test_rule_status_round_trip_through_str() {
        assert_eq!("active".parse::<RuleStatus>().unwrap(), RuleStatus::Active);
        assert_eq!(
            "inactive".parse::<RuleStatus>().unwrap(),
            RuleStatus::Inactive
        );
        assert!(matches!(
            "paused".parse::<RuleStatus>(),
            Err(DomainError::InvalidRuleStatus(_))
        ));
    }

    #[test]
    fn test_matches_requires_tag_attribute_and_active() {
        let tags = vec!["door".to_string(), "motion".to_string()];

        assert!(rule(RuleStatus::Active).matches("motion", &tags));
        assert!(!rule(RuleStatus::Inactive).matches("motion", &tags));
        assert!(!rule(RuleStatus::Active).matches("temperature", &tags));
        assert!(!rule(RuleStatus::Active).matches("motion", &["door".to_string()]));
    }
}
