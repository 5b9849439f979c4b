use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Condition, ConditionError};

/// Maps condition function names to fresh, uninitialized instances.
pub trait ConditionFactory: Send + Sync {
    fn supported_names(&self) -> Vec<String>;

    /// Returns `None` when the name is not provided by this factory.
    fn instantiate(&self, name: &str) -> Option<Box<dyn Condition>>;

    /// Instantiates and initializes the named condition.
    fn create(&self, name: &str, args: &[String]) -> Result<Arc<dyn Condition>, ConditionError> {
        let mut condition = self
            .instantiate(name)
            .ok_or_else(|| ConditionError::Unknown(name.to_string()))?;
        condition.initialize(args)?;
        Ok(Arc::from(condition))
    }
}

type Constructor = Arc<dyn Fn() -> Box<dyn Condition> + Send + Sync>;

/// A factory populated at startup with one constructor per name.
#[derive(Default, Clone)]
pub struct ConditionRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, constructor: F) -> Result<(), ConditionError>
    where
        F: Fn() -> Box<dyn Condition> + Send + Sync + 'static,
    {
        if self.constructors.contains_key(name) {
            return Err(ConditionError::Duplicate(name.to_string()));
        }
        self.constructors
            .insert(name.to_string(), Arc::new(constructor));
        Ok(())
    }
}

impl ConditionFactory for ConditionRegistry {
    fn supported_names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    fn instantiate(&self, name: &str) -> Option<Box<dyn Condition>> {
        self.constructors.get(name).map(|constructor| constructor())
    }
}

/// Serves names from several factories. No name may be provided twice.
pub struct CompositeConditionFactory {
    factories: Vec<Arc<dyn ConditionFactory>>,
    owners: BTreeMap<String, usize>,
}

impl CompositeConditionFactory {
    pub fn new(factories: Vec<Arc<dyn ConditionFactory>>) -> Result<Self, ConditionError> {
        let mut owners = BTreeMap::new();
        for (index, factory) in factories.iter().enumerate() {
            for name in factory.supported_names() {
                if owners.insert(name.clone(), index).is_some() {
                    return Err(ConditionError::Duplicate(name));
                }
            }
        }
        Ok(CompositeConditionFactory { factories, owners })
    }
}

impl ConditionFactory for CompositeConditionFactory {
    fn supported_names(&self) -> Vec<String> {
        self.owners.keys().cloned().collect()
    }

    fn instantiate(&self, name: &str) -> Option<Box<dyn Condition>> {
        let index = self.owners.get(name)?;
        self.factories[*index].instantiate(name)
    }
}
