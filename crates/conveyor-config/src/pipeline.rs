//! Pipeline definition parsing.
//!
//! The definition format mirrors the model one-to-one: a `pipeline` name,
//! `stage` blocks in execution order, and one child node per action.
//! Deploy `param` values may reference an earlier build action's export as
//! `${action.variable}`; anything else is a literal.

use crate::{ConfigError, ConfigResult};
use conveyor_core::action::{Action, ActionSpec, ParamValue, VariableRef};
use conveyor_core::build::BuildSpec;
use conveyor_core::deploy::DeployTarget;
use conveyor_core::pipeline::{Pipeline, Stage};
use conveyor_core::repository::RepositoryRef;
use conveyor_core::secret::SecretHandle;
use kdl::{KdlDocument, KdlNode};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

// Matches a whole-value variable reference: ${action.variable}
static VAR_REF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{([A-Za-z_][A-Za-z0-9_-]*)\.([A-Za-z_][A-Za-z0-9_]*)\}$").unwrap()
});

/// Parse a pipeline definition from KDL text.
pub fn parse_pipeline(kdl: &str) -> ConfigResult<Pipeline> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut stages = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "pipeline" => {
                name = first_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("pipeline name".to_string()))?;
            }
            "stage" => {
                stages.push(parse_stage(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("pipeline name".to_string()));
    }

    Ok(Pipeline::new(name, stages)?)
}

fn parse_stage(node: &KdlNode) -> ConfigResult<Stage> {
    let name =
        first_arg(node).ok_or_else(|| ConfigError::MissingField("stage name".to_string()))?;

    let mut actions = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "source" => actions.push(parse_source(child)?),
                "build" => actions.push(parse_build(child)?),
                "deploy" => actions.push(parse_deploy(child)?),
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("stage '{name}'"),
                        message: format!("unknown action kind '{other}'"),
                    });
                }
            }
        }
    }

    Ok(Stage::new(name, actions))
}

fn parse_source(node: &KdlNode) -> ConfigResult<Action> {
    let name = first_arg(node)
        .ok_or_else(|| ConfigError::MissingField("source action name".to_string()))?;

    let mut repository = None;
    let mut output = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "github" => {
                    let field = |key: &str| {
                        prop(child, key).ok_or_else(|| {
                            ConfigError::MissingField(format!("github {key} in source '{name}'"))
                        })
                    };
                    repository = Some(RepositoryRef::new(
                        field("owner")?,
                        field("repo")?,
                        field("branch")?,
                        SecretHandle::new(field("token")?),
                    ));
                }
                "output" => output = first_arg(child),
                _ => {}
            }
        }
    }

    Ok(Action::new(
        name.clone(),
        ActionSpec::Source {
            repository: repository.ok_or_else(|| {
                ConfigError::MissingField(format!("repository for source '{name}'"))
            })?,
            output: output
                .ok_or_else(|| ConfigError::MissingField(format!("output for source '{name}'")))?,
        },
    ))
}

fn parse_build(node: &KdlNode) -> ConfigResult<Action> {
    let name = first_arg(node)
        .ok_or_else(|| ConfigError::MissingField("build action name".to_string()))?;

    let mut build = BuildSpec::default();
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut exports = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let arg = first_arg(child);
            match child.name().value() {
                "input" => inputs.extend(arg),
                "output" => outputs.extend(arg),
                "export" => exports.extend(arg),
                "install" => build.install.extend(arg),
                "pre" => build.pre_build.extend(arg),
                "run" => build.build.extend(arg),
                "post" => build.post_build.extend(arg),
                "artifacts" => build.artifact_base_dir = prop(child, "base-dir"),
                _ => {}
            }
        }
    }

    Ok(Action::new(
        name,
        ActionSpec::Build {
            build,
            inputs,
            outputs,
            exports,
        },
    ))
}

fn parse_deploy(node: &KdlNode) -> ConfigResult<Action> {
    let name = first_arg(node)
        .ok_or_else(|| ConfigError::MissingField("deploy action name".to_string()))?;

    let mut inputs = Vec::new();
    let mut template = None;
    let mut target = None;
    let mut parameters = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "input" => inputs.extend(first_arg(child)),
                "template" => template = first_arg(child),
                "target" => target = first_arg(child),
                "param" => {
                    let args: Vec<&str> = string_args(child).collect();
                    let &[param, value] = args.as_slice() else {
                        return Err(ConfigError::InvalidValue {
                            field: format!("param in deploy '{name}'"),
                            message: "expected a name and a value".to_string(),
                        });
                    };
                    parameters.insert(param.to_string(), parse_param_value(value));
                }
                _ => {}
            }
        }
    }

    Ok(Action::new(
        name.clone(),
        ActionSpec::Deploy {
            target: DeployTarget::new(
                template.ok_or_else(|| {
                    ConfigError::MissingField(format!("template for deploy '{name}'"))
                })?,
                target.ok_or_else(|| {
                    ConfigError::MissingField(format!("target for deploy '{name}'"))
                })?,
            ),
            inputs,
            parameters,
        },
    ))
}

/// `${action.variable}` becomes a reference; everything else is a literal.
fn parse_param_value(value: &str) -> ParamValue {
    match VAR_REF_REGEX.captures(value) {
        Some(caps) => ParamValue::Variable(VariableRef::new(&caps[1], &caps[2])),
        None => ParamValue::Literal(value.to_string()),
    }
}

/// Positional string arguments of a node, in order.
fn string_args(node: &KdlNode) -> impl Iterator<Item = &str> {
    node.entries()
        .iter()
        .filter(|entry| entry.name().is_none())
        .filter_map(|entry| entry.value().as_string())
}

fn first_arg(node: &KdlNode) -> Option<String> {
    string_args(node).next().map(str::to_string)
}

fn prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name).and_then(|v| v.as_string()).map(str::to_string)
}
