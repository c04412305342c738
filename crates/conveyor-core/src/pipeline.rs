//! Pipeline and stage definitions.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::action::Action;
use crate::validate;

/// An ordered group of actions dispatched concurrently.
///
/// A stage completes only when every action in it has finished; the next
/// stage never starts unless all of them succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }
}

/// An immutable deployment pipeline definition.
///
/// Constructed once through [`Pipeline::new`], which runs the
/// construction-time checker; stage order is total and fixed from then on.
/// Deserialization goes through the same checker, so a reconstructed
/// definition is as valid as a freshly built one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PipelineDef")]
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
}

/// Raw shape a pipeline deserializes from before validation.
#[derive(Deserialize)]
struct PipelineDef {
    name: String,
    stages: Vec<Stage>,
}

impl TryFrom<PipelineDef> for Pipeline {
    type Error = crate::Error;

    fn try_from(def: PipelineDef) -> Result<Self> {
        Pipeline::new(def.name, def.stages)
    }
}

impl Pipeline {
    /// Build and validate a pipeline definition.
    ///
    /// Every structural rule is checked here, statically: unique action and
    /// stage names, single-producer artifacts, inputs produced in strictly
    /// earlier stages, and variable references that name a declared export
    /// of a strictly earlier build action. A broken reference fails with
    /// [`Error::UnresolvedVariableReference`](crate::Error) now instead of
    /// surfacing mid-run.
    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Result<Self> {
        let pipeline = Self {
            name: name.into(),
            stages,
        };
        validate::check(&pipeline)?;
        Ok(pipeline)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Index of the stage containing the named action.
    pub fn stage_of(&self, action: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.actions.iter().any(|a| a.name == action))
    }

    /// Look up an action by name.
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.stages
            .iter()
            .flat_map(|stage| stage.actions.iter())
            .find(|a| a.name == name)
    }
}
