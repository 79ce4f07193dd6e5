//! Relationship Registry
//!
//! The static, declarative table driving every deletion: for one primary
//! entity type, each collection holding a reference to it, where that
//! reference lives, and what happens to the referencing record when the
//! primary goes away. Built once at startup, passed by reference into each
//! component; never looked up through a global.

use crate::error::DeletionError;
use crate::store::FieldRef;
use serde::{Deserialize, Serialize};

/// What happens to a referencing record when its primary is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
    /// Delete the referencing record along with the primary
    Cascade,
    /// Keep the record, replace the reference with a redaction stamp
    Preserve,
    /// Keep the record, strip only the dangling reference
    Cleanup,
}

/// One declared relationship between the primary collection and a
/// referencing collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRule {
    /// Collection holding the primary entity
    pub source_collection: String,
    /// Collection holding records that point at the primary
    pub referencing_collection: String,
    /// Where the reference lives, resolved once at build time
    pub field: FieldRef,
    pub policy: ReferencePolicy,
}

impl RelationshipRule {
    /// Dot-addressed path of the reference, for reports and logs
    pub fn display_path(&self) -> String {
        self.field.display_path()
    }
}

/// Immutable, ordered rule set for one primary entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRegistry {
    pub primary_collection: String,
    rules: Vec<RelationshipRule>,
}

impl RelationshipRegistry {
    pub fn builder(primary_collection: &str) -> RegistryBuilder {
        RegistryBuilder {
            primary_collection: primary_collection.to_string(),
            rules: Vec::new(),
        }
    }

    /// Rules in declaration order; the executor applies them in this order
    pub fn rules(&self) -> &[RelationshipRule] {
        &self.rules
    }

    /// Rules restricted to a set of referencing collections; `None` means all
    pub fn rules_for<'a>(
        &'a self,
        collections: Option<&'a [String]>,
    ) -> impl Iterator<Item = &'a RelationshipRule> {
        self.rules.iter().filter(move |rule| match collections {
            Some(names) => names
                .iter()
                .any(|name| name == &rule.referencing_collection),
            None => true,
        })
    }
}

/// Builds a validated registry at process start
pub struct RegistryBuilder {
    primary_collection: String,
    rules: Vec<RelationshipRule>,
}

impl RegistryBuilder {
    pub fn rule(
        mut self,
        referencing_collection: &str,
        field: FieldRef,
        policy: ReferencePolicy,
    ) -> Self {
        self.rules.push(RelationshipRule {
            source_collection: self.primary_collection.clone(),
            referencing_collection: referencing_collection.to_string(),
            field,
            policy,
        });
        self
    }

    /// Shorthand for a CASCADE rule on a scalar field path
    pub fn cascade(self, referencing_collection: &str, field_path: &str) -> Self {
        self.rule(
            referencing_collection,
            FieldRef::scalar(field_path),
            ReferencePolicy::Cascade,
        )
    }

    /// Shorthand for a PRESERVE rule on a scalar field path
    pub fn preserve(self, referencing_collection: &str, field_path: &str) -> Self {
        self.rule(
            referencing_collection,
            FieldRef::scalar(field_path),
            ReferencePolicy::Preserve,
        )
    }

    /// Shorthand for a CLEANUP rule on a scalar field path
    pub fn cleanup(self, referencing_collection: &str, field_path: &str) -> Self {
        self.rule(
            referencing_collection,
            FieldRef::scalar(field_path),
            ReferencePolicy::Cleanup,
        )
    }

    pub fn build(self) -> Result<RelationshipRegistry, DeletionError> {
        if self.primary_collection.is_empty() {
            return Err(DeletionError::Registry(
                "primary collection name must not be empty".to_string(),
            ));
        }
        if self.rules.is_empty() {
            return Err(DeletionError::Registry(format!(
                "no relationship rules declared for '{}'",
                self.primary_collection
            )));
        }
        for rule in &self.rules {
            if rule.referencing_collection == self.primary_collection {
                return Err(DeletionError::Registry(format!(
                    "'{}' cannot reference itself",
                    self.primary_collection
                )));
            }
        }
        Ok(RelationshipRegistry {
            primary_collection: self.primary_collection,
            rules: self.rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_declaration_order() {
        let registry = RelationshipRegistry::builder("persons")
            .cascade("notes", "personId")
            .cleanup("sessions", "refs.pId")
            .rule(
                "sessions",
                FieldRef::array_member("attendees", "studentId"),
                ReferencePolicy::Preserve,
            )
            .build()
            .unwrap();

        let collections: Vec<_> = registry
            .rules()
            .iter()
            .map(|rule| rule.referencing_collection.as_str())
            .collect();
        assert_eq!(collections, vec!["notes", "sessions", "sessions"]);
        assert_eq!(registry.rules()[1].display_path(), "refs.pId");
    }

    #[test]
    fn test_empty_registry_is_rejected() {
        let result = RelationshipRegistry::builder("persons").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let result = RelationshipRegistry::builder("persons")
            .cascade("persons", "managerId")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rules_for_filters_by_collection() {
        let registry = RelationshipRegistry::builder("persons")
            .cascade("notes", "personId")
            .cleanup("sessions", "refs.pId")
            .build()
            .unwrap();

        let filter = vec!["sessions".to_string()];
        let matched: Vec<_> = registry.rules_for(Some(&filter)).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].referencing_collection, "sessions");
    }
}
