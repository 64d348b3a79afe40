//! Parameter resolution: `tie` and `inject`.
//!
//! `tie` turns a test's parameter request into a [`ParameterSet`] whose
//! every member carries a condition for each index dimension. `inject`
//! then overlays the forecast type and lead time of one combination.

use crate::constants::{ANONYMOUS_PARAMETER_PREFIX, INDEX_KEYS, default_index_value, keys};
use crate::error::{GridCheckError, Result};
use crate::models::{Condition, ParameterDefinition, ParameterRequest};
use chrono::Duration;
use tracing::debug;

/// Ordered, name-unique collection of resolved parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    parameters: Vec<ParameterDefinition>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter; a later one with the same name replaces the earlier
    pub fn insert(&mut self, parameter: ParameterDefinition) {
        match self.parameters.iter_mut().find(|p| p.name == parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.parameters.push(parameter),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.parameters.iter()
    }

    pub fn as_slice(&self) -> &[ParameterDefinition] {
        &self.parameters
    }
}

/// Resolves parameter requests for one run
///
/// Owns the counter used to name parameters that are requested by inline
/// conditions only, so names are unique and reproducible within a run.
#[derive(Debug, Default)]
pub struct ParameterResolver {
    anonymous_count: usize,
}

impl ParameterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select and complete the parameters a test asks for
    pub fn tie(
        &mut self,
        request: &ParameterRequest,
        available: &[ParameterDefinition],
    ) -> Result<ParameterSet> {
        let mut set = ParameterSet::new();

        for name in &request.names {
            let parameter = available
                .iter()
                .find(|p| &p.name == name)
                .ok_or_else(|| GridCheckError::UndefinedParameter { name: name.clone() })?;
            set.insert(parameter.clone());
        }

        if set.is_empty() {
            if request.conditions.is_empty() {
                return Err(GridCheckError::configuration(
                    "test parameters need 'Names' or 'Grib2MetaData'",
                ));
            }
            let name = format!("{ANONYMOUS_PARAMETER_PREFIX}{}", self.anonymous_count);
            self.anonymous_count += 1;
            set.insert(ParameterDefinition::new(name, request.conditions.clone()));
        } else {
            for parameter in &mut set.parameters {
                for condition in &request.conditions {
                    parameter.set_condition(&condition.key, condition.value);
                }
            }
        }

        for parameter in &mut set.parameters {
            for key in INDEX_KEYS {
                if parameter.condition(key).is_none() {
                    parameter
                        .conditions
                        .push(Condition::new(key, default_index_value(key)));
                }
            }
        }

        Ok(set)
    }
}

/// Overlay axis conditions onto every parameter of the set
///
/// An `endStep` override is shifted back by the parameter's lag, in whole
/// hours truncated toward zero.
pub fn inject(set: &mut ParameterSet, overrides: &[Condition]) {
    for injected in overrides {
        for parameter in &mut set.parameters {
            let value = match (injected.key.as_str(), injected.value, parameter.lag) {
                (keys::END_STEP, Some(step), Some(lag)) => {
                    let lagged = (Duration::hours(step) - lag).num_hours();
                    debug!("Lagging {} step {} to {}", parameter.name, step, lagged);
                    Some(lagged)
                }
                _ => injected.value,
            };
            parameter.set_condition(&injected.key, value);
        }
    }
}
