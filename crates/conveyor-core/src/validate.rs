//! Construction-time checks for pipeline definitions.
//!
//! Everything here is static. A pipeline that passes [`check`] cannot hit
//! an unresolved reference at run time; the only reference failure left is
//! a build that breaks its export contract, which is a run-time
//! `MissingExportedVariable`.

use std::collections::{HashMap, HashSet};

use crate::action::{ActionSpec, ParamValue};
use crate::pipeline::Pipeline;
use crate::{Error, Result};

pub(crate) fn check(pipeline: &Pipeline) -> Result<()> {
    let mut stage_names: HashSet<&str> = HashSet::new();
    // action name -> stage index
    let mut action_stage: HashMap<&str, usize> = HashMap::new();
    // artifact name -> (producing stage index, producing action)
    let mut producers: HashMap<&str, (usize, &str)> = HashMap::new();
    // action name -> declared export names
    let mut exports: HashMap<&str, HashSet<&str>> = HashMap::new();

    for (idx, stage) in pipeline.stages().iter().enumerate() {
        if !stage_names.insert(stage.name.as_str()) {
            return Err(Error::InvalidDefinition(format!(
                "duplicate stage name '{}'",
                stage.name
            )));
        }

        for action in &stage.actions {
            if action_stage.insert(action.name.as_str(), idx).is_some() {
                return Err(Error::InvalidDefinition(format!(
                    "duplicate action name '{}'",
                    action.name
                )));
            }

            // A build transforms artifacts; one that consumes nothing is a
            // definition mistake (the source kind exists for that).
            if let ActionSpec::Build { inputs, .. } = &action.spec {
                if inputs.is_empty() {
                    return Err(Error::InvalidDefinition(format!(
                        "build action '{}' consumes no input artifact",
                        action.name
                    )));
                }
            }

            for output in action.outputs() {
                if let Some((_, other)) = producers.insert(output, (idx, action.name.as_str())) {
                    return Err(Error::InvalidDefinition(format!(
                        "artifact '{}' has two producers: '{}' and '{}'",
                        output, other, action.name
                    )));
                }
            }

            let declared: HashSet<&str> = action.exports().iter().map(String::as_str).collect();
            if declared.len() != action.exports().len() {
                return Err(Error::InvalidDefinition(format!(
                    "action '{}' declares a duplicate export",
                    action.name
                )));
            }
            if !declared.is_empty() {
                exports.insert(action.name.as_str(), declared);
            }
        }
    }

    // Second pass: inputs and variable references must resolve strictly
    // backwards, now that every producer is known.
    for (idx, stage) in pipeline.stages().iter().enumerate() {
        for action in &stage.actions {
            for input in action.inputs() {
                match producers.get(input.as_str()) {
                    None => {
                        return Err(Error::InvalidDefinition(format!(
                            "action '{}' consumes artifact '{}' which is never produced",
                            action.name, input
                        )));
                    }
                    Some((producer_idx, producer)) if *producer_idx >= idx => {
                        return Err(Error::InvalidDefinition(format!(
                            "action '{}' consumes artifact '{}' produced by '{}' in the same or a later stage",
                            action.name, input, producer
                        )));
                    }
                    _ => {}
                }
            }

            let ActionSpec::Deploy { parameters, .. } = &action.spec else {
                continue;
            };
            for (param, value) in parameters {
                let ParamValue::Variable(vref) = value else {
                    continue;
                };
                let unresolved = |reason: String| Error::UnresolvedVariableReference {
                    action: action.name.clone(),
                    producer: vref.action.clone(),
                    variable: vref.variable.clone(),
                    reason,
                };

                let Some(&producer_idx) = action_stage.get(vref.action.as_str()) else {
                    return Err(unresolved(format!(
                        "parameter '{param}' references an action that does not exist"
                    )));
                };
                if producer_idx >= idx {
                    return Err(unresolved(format!(
                        "parameter '{param}' references an action that is not in an earlier stage"
                    )));
                }
                let declares = exports
                    .get(vref.action.as_str())
                    .is_some_and(|d| d.contains(vref.variable.as_str()));
                if !declares {
                    return Err(unresolved(format!(
                        "parameter '{param}' references a variable the action does not export"
                    )));
                }
            }
        }
    }

    Ok(())
}
