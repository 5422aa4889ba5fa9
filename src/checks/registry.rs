//! Checker definitions and the registry of checker functions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use cbwatch_types::{CheckerDefinition, ClusterSnapshot, WrappedCheckerResult};
use thiserror::Error;

use crate::checks::builtin;
use crate::error::DefinitionError;

const EMBEDDED_DEFINITIONS: &str = include_str!("checkers.json");

/// Error raised by a checker function.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Cached REST data the checker needs was not fetched.
    #[error("{endpoint} data is unavailable: {reason}")]
    MissingData {
        endpoint: &'static str,
        reason: String,
    },

    #[error("{0}")]
    Failed(String),
}

/// Signature shared by every checker function.
pub type CheckerFn =
    Arc<dyn Fn(&ClusterSnapshot) -> Result<Vec<WrappedCheckerResult>, CheckError> + Send + Sync>;

/// Read-only table of every known checker, keyed by name.
///
/// Includes checkers that only node agents run, so that results and
/// dismissals for them can be validated too.
#[derive(Debug, Clone, Default)]
pub struct CheckerDefinitions {
    definitions: Arc<BTreeMap<String, CheckerDefinition>>,
}

impl CheckerDefinitions {
    /// The table compiled into the binary.
    pub fn embedded() -> Result<Self, DefinitionError> {
        Self::from_json(EMBEDDED_DEFINITIONS)
    }

    /// Parse a JSON array of definitions.
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        let list: Vec<CheckerDefinition> = serde_json::from_str(json)?;
        Ok(Self::from_definitions(list))
    }

    pub fn from_definitions(list: impl IntoIterator<Item = CheckerDefinition>) -> Self {
        let definitions = list.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self {
            definitions: Arc::new(definitions),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CheckerDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckerDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// A checker function paired with its definition.
#[derive(Clone)]
pub struct Checker {
    pub definition: CheckerDefinition,
    run: CheckerFn,
}

impl Checker {
    pub fn new<F>(definition: CheckerDefinition, run: F) -> Self
    where
        F: Fn(&ClusterSnapshot) -> Result<Vec<WrappedCheckerResult>, CheckError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            definition,
            run: Arc::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn run(&self, cluster: &ClusterSnapshot) -> Result<Vec<WrappedCheckerResult>, CheckError> {
        (self.run)(cluster)
    }
}

impl fmt::Debug for Checker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checker")
            .field("name", &self.definition.name)
            .field("min_version", &self.definition.min_version)
            .finish()
    }
}

/// The set of checkers run against every cluster snapshot.
///
/// Built once at startup and handed to the scheduler; nothing mutates it
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct CheckerRegistry {
    checkers: BTreeMap<String, Checker>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the built-in API checkers.
    ///
    /// Fails if a built-in checker has no entry in `definitions`.
    pub fn builtin(definitions: &CheckerDefinitions) -> Result<Self, DefinitionError> {
        let mut registry = Self::new();
        for (name, run) in builtin::all() {
            let definition = definitions
                .get(name)
                .cloned()
                .ok_or_else(|| DefinitionError::Missing(name.to_string()))?;
            registry.register(Checker::new(definition, run));
        }
        Ok(registry)
    }

    /// Add a checker, replacing any checker with the same name.
    pub fn register(&mut self, checker: Checker) {
        self.checkers.insert(checker.name().to_string(), checker);
    }

    pub fn with(mut self, checker: Checker) -> Self {
        self.register(checker);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Checker> {
        self.checkers.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Checker> {
        self.checkers.values()
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbwatch_types::{CheckerType, ServerVersion};

    #[test]
    fn test_embedded_definitions_parse() {
        let definitions = CheckerDefinitions::embedded().unwrap();

        let empty_group = definitions.get("emptyGroup").unwrap();
        assert_eq!(empty_group.min_version, Some(ServerVersion::new(6, 5, 0)));
        assert_eq!(
            definitions.get("oomKills").unwrap().checker_type,
            CheckerType::Log
        );
    }

    #[test]
    fn test_builtin_registry_covers_every_builtin() {
        let definitions = CheckerDefinitions::embedded().unwrap();
        let registry = CheckerRegistry::builtin(&definitions).unwrap();

        assert_eq!(registry.len(), builtin::all().len());
        assert!(registry.get("nodeSwapUsage").is_some());
        // Agent-only checkers are known but not run by the engine.
        assert!(registry.get("THP").is_none());
    }

    #[test]
    fn test_builtin_fails_without_definition() {
        let definitions = CheckerDefinitions::from_definitions(Vec::new());
        assert!(matches!(
            CheckerRegistry::builtin(&definitions),
            Err(DefinitionError::Missing(_))
        ));
    }

    #[test]
    fn test_register_replaces_by_name() {
        let definition = CheckerDefinition {
            name: "custom".to_string(),
            ..Default::default()
        };
        let registry = CheckerRegistry::new()
            .with(Checker::new(definition.clone(), |_| Ok(Vec::new())))
            .with(Checker::new(definition, |_| Err(CheckError::Failed("boom".into()))));

        assert_eq!(registry.len(), 1);
        let snapshot = ClusterSnapshot::new("c1", "one");
        assert!(registry.get("custom").unwrap().run(&snapshot).is_err());
    }
}
