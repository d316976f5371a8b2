use crate::domain::envelope::Envelope;
use crate::domain::result::DomainResult;

/// Boolean rule language.
///
/// `Err` is rule-local: the caller skips the rule and keeps evaluating its
/// siblings.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, envelope: &Envelope, expression: &str) -> DomainResult<bool>;
}
