//! Stage inputs with strictness enforcement.

use crate::errors::UndeclaredDependencyError;
use std::collections::{HashMap, HashSet};

/// An immutable view of the outputs of stages upstream of the current one.
///
/// In strict mode only ancestors may be read. Reading anything else is a
/// wiring bug and returns an error instead of silently yielding `None`.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    outputs: HashMap<String, HashMap<String, serde_json::Value>>,
    ancestors: HashSet<String>,
    stage_name: String,
    strict: bool,
}

impl StageInputs {
    /// Creates new stage inputs.
    #[must_use]
    pub fn new(
        outputs: HashMap<String, HashMap<String, serde_json::Value>>,
        ancestors: HashSet<String>,
        stage_name: impl Into<String>,
        strict: bool,
    ) -> Self {
        Self {
            outputs,
            ancestors,
            stage_name: stage_name.into(),
            strict,
        }
    }

    fn check(&self, stage: &str) -> Result<(), UndeclaredDependencyError> {
        if self.strict && !self.ancestors.contains(stage) {
            return Err(UndeclaredDependencyError::new(&self.stage_name, stage));
        }
        Ok(())
    }

    /// Gets output from a specific stage.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredDependencyError` in strict mode if the stage
    /// is not upstream of the current one.
    pub fn get(
        &self,
        stage: &str,
    ) -> Result<Option<&HashMap<String, serde_json::Value>>, UndeclaredDependencyError> {
        self.check(stage)?;
        Ok(self.outputs.get(stage))
    }

    /// Gets a specific value from a stage's output.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredDependencyError` in strict mode if the stage
    /// is not upstream of the current one.
    pub fn get_value(
        &self,
        stage: &str,
        key: &str,
    ) -> Result<Option<&serde_json::Value>, UndeclaredDependencyError> {
        self.check(stage)?;
        Ok(self.outputs.get(stage).and_then(|o| o.get(key)))
    }

    /// Gets a string value from a stage's output.
    ///
    /// # Errors
    ///
    /// Same as [`StageInputs::get_value`].
    pub fn get_str(&self, stage: &str, key: &str) -> Result<Option<&str>, UndeclaredDependencyError> {
        Ok(self.get_value(stage, key)?.and_then(serde_json::Value::as_str))
    }

    /// Checks if output exists for a stage.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.outputs.contains_key(stage)
    }

    /// Returns the stages whose outputs may be read.
    #[must_use]
    pub fn ancestors(&self) -> &HashSet<String> {
        &self.ancestors
    }
}
