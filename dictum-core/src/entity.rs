//! Entity definitions and the explicit entity registry
//!
//! Entities are resolved by name through factories registered once at
//! startup. Each resolution yields a fresh instance with columns at their
//! defaults.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::column::{ColumnDescriptor, ColumnSet};
use crate::error::ConfigError;
use crate::operation::{AccessFlags, Operation};
use crate::status::IgnorePolicy;

/// Declarative description of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDefinition {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub procs: BTreeSet<String>,
    pub views: BTreeSet<String>,
    pub actions: BTreeSet<String>,
    pub description_column: Option<String>,
    pub insert_policy: IgnorePolicy,
    pub public_access: AccessFlags,
    pub public_members: BTreeSet<String>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            procs: BTreeSet::new(),
            views: BTreeSet::new(),
            actions: BTreeSet::new(),
            description_column: None,
            insert_policy: IgnorePolicy::none(),
            public_access: AccessFlags::empty(),
            public_members: BTreeSet::new(),
        }
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    pub fn proc(mut self, name: impl Into<String>) -> Self {
        self.procs.insert(name.into());
        self
    }

    pub fn view(mut self, name: impl Into<String>) -> Self {
        self.views.insert(name.into());
        self
    }

    pub fn action(mut self, name: impl Into<String>) -> Self {
        self.actions.insert(name.into());
        self
    }

    pub fn description(mut self, column: impl Into<String>) -> Self {
        self.description_column = Some(column.into());
        self
    }

    pub fn insert_policy(mut self, policy: IgnorePolicy) -> Self {
        self.insert_policy = policy;
        self
    }

    /// Expose `access` on the anonymous route. Named members listed in
    /// `members` are the only procs/views/actions reachable there.
    pub fn public(mut self, access: AccessFlags, members: &[&str]) -> Self {
        self.public_access = access;
        self.public_members = members.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Ignore policy applied when aggregating `operation`.
    pub fn policy_for(&self, operation: Operation) -> IgnorePolicy {
        match operation {
            Operation::Insert => self.insert_policy.clone(),
            _ => IgnorePolicy::none(),
        }
    }

    fn members(&self, operation: Operation) -> Option<(&'static str, &BTreeSet<String>)> {
        match operation {
            Operation::Proc | Operation::Process | Operation::Import => Some(("procedure", &self.procs)),
            Operation::View => Some(("view", &self.views)),
            Operation::Action => Some(("action", &self.actions)),
            _ => None,
        }
    }

    /// Check that `subname` names a declared member for `operation`.
    ///
    /// `import` may omit the sub-name; rows then go through insert/update.
    pub fn check_member(&self, operation: Operation, subname: Option<&str>) -> Result<(), ConfigError> {
        let Some((kind, declared)) = self.members(operation) else {
            return Ok(());
        };
        match subname {
            None if operation.requires_subname() => Err(ConfigError::MissingSubname {
                entity: self.name.clone(),
                operation: operation.to_string(),
            }),
            None => Ok(()),
            Some(name) if declared.contains(name) => Ok(()),
            Some(name) => Err(ConfigError::UnknownMember {
                entity: self.name.clone(),
                kind,
                name: name.to_string(),
            }),
        }
    }

    /// Whether `operation` may run on the anonymous route.
    pub fn allows_public(&self, operation: Operation, subname: Option<&str>) -> bool {
        if !self.public_access.contains(operation.access_flag()) {
            return false;
        }
        if !operation.requires_subname() {
            return true;
        }
        subname.is_some_and(|name| self.public_members.contains(name))
    }
}

/// An entity bound to one request, carrying mutable column state.
#[derive(Debug, Clone)]
pub struct EntityInstance {
    definition: Arc<EntityDefinition>,
    columns: ColumnSet,
}

impl EntityInstance {
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        let columns = definition.columns.iter().cloned().collect();
        Self { definition, columns }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut ColumnSet {
        &mut self.columns
    }
}

type EntityFactory = Arc<dyn Fn() -> EntityDefinition + Send + Sync>;

/// Name to factory map, keyed case-insensitively.
#[derive(Clone, Default)]
pub struct EntityRegistry {
    factories: HashMap<String, EntityFactory>,
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("EntityRegistry").field("entities", &names).finish()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_with<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> EntityDefinition + Send + Sync + 'static,
    {
        self.factories.insert(name.to_ascii_lowercase(), Arc::new(factory));
        self
    }

    pub fn register(&mut self, definition: EntityDefinition) -> &mut Self {
        let name = definition.name.clone();
        let shared = Arc::new(definition);
        self.register_with(&name, move || (*shared).clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build a fresh instance of `name`.
    pub fn resolve(&self, name: &str) -> Result<EntityInstance, ConfigError> {
        self.factories
            .get(&name.to_ascii_lowercase())
            .map(|factory| EntityInstance::new(Arc::new(factory())))
            .ok_or_else(|| ConfigError::UnknownEntity {
                entity: name.to_string(),
            })
    }
}
