//! Boolean predicates over a request, annotated with how long their answer
//! may be cached.

use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::context::DiversionContext;

mod combinators;
mod factory;
mod property;

pub use combinators::{And, Not, Or};
pub use factory::{CompositeConditionFactory, ConditionFactory, ConditionRegistry};
pub use property::{ArityCondition, PropertyCondition};

/// How long a computed answer stays valid.
///
/// Forms a meet-semilattice under [`CacheLevel::merge`]: `Reload` is the
/// identity and `None` absorbs everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheLevel {
    /// Must be recomputed on every read.
    None,
    /// Stable for the lifetime of one request.
    Request,
    /// Stable until the next configuration reload.
    Reload,
}

impl CacheLevel {
    pub fn merge(self, other: CacheLevel) -> CacheLevel {
        match (self, other) {
            (CacheLevel::None, _) | (_, CacheLevel::None) => CacheLevel::None,
            (CacheLevel::Request, _) | (_, CacheLevel::Request) => CacheLevel::Request,
            (CacheLevel::Reload, CacheLevel::Reload) => CacheLevel::Reload,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("expected between {min} and {max} arguments, got {actual}")]
    Arity {
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown condition function: {0}")]
    Unknown(String),

    #[error("condition function {0} is provided by more than one factory")]
    Duplicate(String),
}

/// A predicate that decides whether a request is eligible for a segment or a
/// modifier.
///
/// Instances are created uninitialized by a [`ConditionFactory`], configured
/// once with [`Condition::initialize`] and then shared read-only between
/// threads.
pub trait Condition: Send + Sync + fmt::Debug {
    fn initialize(&mut self, _args: &[String]) -> Result<(), ConditionError> {
        Ok(())
    }

    fn evaluate(&self, ctx: &dyn DiversionContext) -> bool;

    /// How volatile the answer of [`Condition::evaluate`] is for a single request.
    fn cache_level(&self) -> CacheLevel;
}

/// A condition with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct Constant(pub bool);

impl Condition for Constant {
    fn evaluate(&self, _ctx: &dyn DiversionContext) -> bool {
        self.0
    }

    fn cache_level(&self) -> CacheLevel {
        CacheLevel::Reload
    }
}

static TRUE: LazyLock<Arc<dyn Condition>> = LazyLock::new(|| Arc::new(Constant(true)));
static FALSE: LazyLock<Arc<dyn Condition>> = LazyLock::new(|| Arc::new(Constant(false)));

pub fn always_true() -> Arc<dyn Condition> {
    TRUE.clone()
}

pub fn always_false() -> Arc<dyn Condition> {
    FALSE.clone()
}
