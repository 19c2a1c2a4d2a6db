//! Configuration for entity-backed endpoints.
//!
//! Deserialized from the `entity` section of the host's config file.
//! Every field has a default, so an empty section is valid.

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Page size bounds for list methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryLimits {
    /// Page size when the request carries no `limit` (default: 10)
    pub default_limit: u32,
    /// Largest accepted `limit` (default: 100)
    pub max_limit: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
        }
    }
}

impl QueryLimits {
    #[must_use]
    pub fn with_default_limit(mut self, default_limit: u32) -> Self {
        self.default_limit = default_limit;
        self
    }

    #[must_use]
    pub fn with_max_limit(mut self, max_limit: u32) -> Self {
        self.max_limit = max_limit;
        self
    }

    /// # Errors
    /// `QueryError::InvalidLimit` when either bound is zero or the default
    /// exceeds the maximum.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.max_limit == 0 || self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(QueryError::InvalidLimit {
                max: self.max_limit,
            });
        }
        Ok(())
    }

    /// Validate a client supplied limit.
    ///
    /// # Errors
    /// `QueryError::InvalidLimit` unless `0 < requested <= max_limit`.
    pub fn check_limit(&self, requested: i64) -> Result<u32, QueryError> {
        u32::try_from(requested)
            .ok()
            .filter(|limit| *limit > 0 && *limit <= self.max_limit)
            .ok_or(QueryError::InvalidLimit {
                max: self.max_limit,
            })
    }

    /// Page size to fetch for an optional requested limit.
    #[must_use]
    pub fn effective(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .min(self.max_limit)
            .max(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntityConfig {
    pub query: QueryLimits,
}

impl EntityConfig {
    /// # Errors
    /// See [`QueryLimits::validate`].
    pub fn validate(&self) -> Result<(), QueryError> {
        self.query.validate()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let limits = QueryLimits::default();
        assert_eq!(limits.default_limit, 10);
        assert_eq!(limits.max_limit, 100);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn check_limit_bounds() {
        let limits = QueryLimits::default().with_max_limit(5);
        assert_eq!(limits.check_limit(5), Ok(5));
        assert_eq!(limits.check_limit(1), Ok(1));
        assert_eq!(limits.check_limit(6), Err(QueryError::InvalidLimit { max: 5 }));
        assert!(limits.check_limit(0).is_err());
        assert!(limits.check_limit(-1).is_err());
        assert!(limits.check_limit(i64::MAX).is_err());
    }

    #[test]
    fn effective_page_size() {
        let limits = QueryLimits::default().with_default_limit(3).with_max_limit(7);
        assert_eq!(limits.effective(None), 3);
        assert_eq!(limits.effective(Some(5)), 5);
        assert_eq!(limits.effective(Some(50)), 7);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert!(QueryLimits::default().with_max_limit(0).validate().is_err());
        assert!(
            QueryLimits::default()
                .with_default_limit(20)
                .with_max_limit(10)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn deserializes_partial_sections() {
        let cfg: EntityConfig =
            serde_json::from_str(r#"{"query": {"max_limit": 50}}"#).unwrap();
        assert_eq!(cfg.query.max_limit, 50);
        assert_eq!(cfg.query.default_limit, 10);
        assert!(serde_json::from_str::<EntityConfig>(r#"{"query": {"bogus": 1}}"#).is_err());
    }
}
