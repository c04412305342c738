//! Run-scoped exported-variable table.

use std::collections::{BTreeMap, HashMap};

use conveyor_core::action::ParamValue;
use conveyor_core::{Error, Result};

/// Exported variables captured during one run, keyed by producing action.
///
/// Build actions write their exports here when their stage completes;
/// deploy actions read immediately before they execute. Stage sequencing
/// makes every write happen before any read, so the table needs no lock.
#[derive(Debug, Default)]
pub struct VariableTable {
    values: HashMap<String, HashMap<String, String>>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the exports of a completed build action.
    pub fn record(&mut self, action: &str, exports: &HashMap<String, String>) {
        self.values
            .entry(action.to_string())
            .or_default()
            .extend(exports.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Look up one exported value.
    pub fn get(&self, action: &str, variable: &str) -> Option<&str> {
        self.values
            .get(action)
            .and_then(|vars| vars.get(variable))
            .map(String::as_str)
    }

    /// Substitute every variable reference in a deploy action's parameter
    /// map, immediately before the action executes.
    ///
    /// A reference whose value never materialized fails with
    /// [`Error::MissingExportedVariable`]; that is fatal to the action, not
    /// something the resolver recovers from.
    pub fn resolve(
        &self,
        action: &str,
        parameters: &BTreeMap<String, ParamValue>,
    ) -> Result<BTreeMap<String, String>> {
        parameters
            .iter()
            .map(|(name, value)| match value {
                ParamValue::Literal(literal) => Ok((name.clone(), literal.clone())),
                ParamValue::Variable(vref) => self
                    .get(&vref.action, &vref.variable)
                    .map(|resolved| (name.clone(), resolved.to_string()))
                    .ok_or_else(|| Error::MissingExportedVariable {
                        action: action.to_string(),
                        producer: vref.action.clone(),
                        variable: vref.variable.clone(),
                    }),
            })
            .collect()
    }
}
