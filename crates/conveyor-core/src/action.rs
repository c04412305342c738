//! Pipeline actions: the units of work a stage dispatches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::build::BuildSpec;
use crate::deploy::DeployTarget;
use crate::repository::RepositoryRef;

/// A named unit of pipeline work. Names are unique across a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub spec: ActionSpec,
}

impl Action {
    pub fn new(name: impl Into<String>, spec: ActionSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self.spec {
            ActionSpec::Source { .. } => ActionKind::Source,
            ActionSpec::Build { .. } => ActionKind::Build,
            ActionSpec::Deploy { .. } => ActionKind::Deploy,
        }
    }

    /// Artifact names this action consumes.
    pub fn inputs(&self) -> &[String] {
        match &self.spec {
            ActionSpec::Source { .. } => &[],
            ActionSpec::Build { inputs, .. } | ActionSpec::Deploy { inputs, .. } => inputs,
        }
    }

    /// Artifact names this action produces.
    pub fn outputs(&self) -> Vec<&str> {
        match &self.spec {
            ActionSpec::Source { output, .. } => vec![output.as_str()],
            ActionSpec::Build { outputs, .. } => outputs.iter().map(String::as_str).collect(),
            ActionSpec::Deploy { .. } => Vec::new(),
        }
    }

    /// Variable names this action promises to export.
    pub fn exports(&self) -> &[String] {
        match &self.spec {
            ActionSpec::Build { exports, .. } => exports,
            _ => &[],
        }
    }
}

/// What an action does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionSpec {
    /// Fetch source from an upstream repository.
    Source {
        repository: RepositoryRef,
        /// Name of the artifact this action produces.
        output: String,
    },
    /// Run an external build over input artifacts.
    Build {
        build: BuildSpec,
        inputs: Vec<String>,
        outputs: Vec<String>,
        /// Variable names this action promises to export.
        exports: Vec<String>,
    },
    /// Deploy input artifacts with a parameter map.
    Deploy {
        target: DeployTarget,
        inputs: Vec<String>,
        parameters: BTreeMap<String, ParamValue>,
    },
}

/// The kind of work an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Source,
    Build,
    Deploy,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Source => write!(f, "source"),
            ActionKind::Build => write!(f, "build"),
            ActionKind::Deploy => write!(f, "deploy"),
        }
    }
}

/// A deploy parameter value: a literal, or a reference to a variable
/// exported by a build action in an earlier stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    Literal(String),
    Variable(VariableRef),
}

/// Points at a variable exported by a named earlier action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRef {
    /// Name of the producing action.
    pub action: String,
    /// Name of the exported variable.
    pub variable: String,
}

impl VariableRef {
    pub fn new(action: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            variable: variable.into(),
        }
    }
}
