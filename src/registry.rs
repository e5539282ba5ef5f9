//! Known field/policy registry.
//!
//! Maps tokenizable field names to service policy names and holds the set of
//! policy names recognised inside records. Built once at startup from
//! [`RegistryConfig`](crate::config::RegistryConfig).

use std::collections::HashSet;

use crate::config::RegistryConfig;
use crate::error::{ProtectionError, Result};

#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    /// field name → policy name, sorted by field name (taken from a `BTreeMap`)
    fields: Vec<(String, String)>,
    policies: HashSet<String>,
}

impl PolicyRegistry {
    /// Build and cross-check the registry.
    ///
    /// Every field must map to a policy present in the policy set.
    pub fn new(
        fields: impl IntoIterator<Item = (String, String)>,
        policies: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let policies: HashSet<String> = policies.into_iter().collect();
        let mut field_list: Vec<(String, String)> = Vec::new();

        for (field, policy) in fields {
            if !policies.contains(&policy) {
                return Err(ProtectionError::Config(format!(
                    "field '{}' maps to unknown policy '{}'",
                    field, policy
                )));
            }
            if field_list.iter().any(|(existing, _)| existing == &field) {
                return Err(ProtectionError::Config(format!(
                    "field '{}' registered twice",
                    field
                )));
            }
            field_list.push((field, policy));
        }

        Ok(Self {
            fields: field_list,
            policies,
        })
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        Self::new(
            config
                .fields
                .iter()
                .map(|(field, policy)| (field.clone(), policy.clone())),
            config.policies.iter().cloned(),
        )
    }

    /// Policy used when tokenizing `field`
    pub fn policy_for_field(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, policy)| policy.as_str())
    }

    pub fn is_policy(&self, name: &str) -> bool {
        self.policies.contains(name)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        let config = RegistryConfig::default();
        Self {
            fields: config.fields.into_iter().collect(),
            policies: config.policies.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_matches_known_fields() {
        let registry = PolicyRegistry::default();
        assert_eq!(registry.policy_for_field("dob"), Some("DOB"));
        assert_eq!(registry.policy_for_field("firstNm"), Some("firstName"));
        assert_eq!(registry.policy_for_field("lastNm"), Some("lastName"));
        assert_eq!(registry.policy_for_field("ssn"), Some("SSN"));
        assert_eq!(registry.policy_for_field("email"), None);

        assert!(registry.is_policy("OtherID"));
        assert!(!registry.is_policy("otherid"));
        assert_eq!(registry.policy_count(), 5);
    }

    #[test]
    fn rejects_field_with_unknown_policy() {
        let err = PolicyRegistry::new(
            vec![("dob".to_string(), "Birthday".to_string())],
            vec!["DOB".to_string()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown policy 'Birthday'"));
    }

    #[test]
    fn rejects_duplicate_field() {
        let err = PolicyRegistry::new(
            vec![
                ("dob".to_string(), "DOB".to_string()),
                ("dob".to_string(), "DOB".to_string()),
            ],
            vec!["DOB".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, ProtectionError::Config(_)));
    }

    #[test]
    fn config_fields_are_held_sorted_by_name() {
        let config: RegistryConfig = serde_yaml::from_str(
            "fields:\n  zip: OtherID\n  acct: OtherID\n  mid: OtherID\npolicies: [OtherID]\n",
        )
        .unwrap();
        let registry = PolicyRegistry::from_config(&config).unwrap();

        let names: Vec<&str> = registry.fields.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(names, vec!["acct", "mid", "zip"]);
    }
}
