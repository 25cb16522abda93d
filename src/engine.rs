use crate::db::Value;
use crate::error::Result;
use crate::funcs::{BuiltinFunctionParser, FunctionParser};
use crate::plan::{Operator, PlanBuilder};
use crate::query::QueryModel;
use crate::storage::Storage;
use log::info;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Instant;

/// Opaque authorization handle, passed through to storage when readers are acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    principal: String,
}

impl SecurityContext {
    pub fn new(principal: &str) -> Self {
        Self {
            principal: principal.to_string(),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::new("admin")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    security: SecurityContext,
    bind_variables: FxHashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(security: SecurityContext) -> Self {
        Self {
            security,
            bind_variables: Default::default(),
        }
    }

    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    /// Binds `:name` (the leading colon is optional).
    pub fn with_bind_variable(mut self, name: &str, value: Value) -> Self {
        self.bind_variables
            .insert(name.trim_start_matches(':').to_ascii_lowercase(), value);
        self
    }

    pub fn bind_variable(&self, name: &str) -> Option<&Value> {
        self.bind_variables
            .get(&name.trim_start_matches(':').to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Forces the map-backed join variants even when the joined side supports random access.
    pub full_fat_joins: bool,
    pub map_key_capacity: usize,
    pub sort_key_capacity: usize,
    pub latest_by_row_count: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            full_fat_joins: false,
            map_key_capacity: 2048,
            sort_key_capacity: 1024,
            latest_by_row_count: 1000,
        }
    }
}

/// Entry point: compiles query models against a storage.
pub struct Engine {
    storage: Rc<dyn Storage>,
    function_parser: Rc<dyn FunctionParser>,
    config: PlannerConfig,
}

impl Engine {
    pub fn new(storage: Rc<dyn Storage>) -> Self {
        Self {
            storage,
            function_parser: Rc::new(BuiltinFunctionParser),
            config: Default::default(),
        }
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_function_parser(mut self, function_parser: Rc<dyn FunctionParser>) -> Self {
        self.function_parser = function_parser;
        self
    }

    pub fn with_full_fat_joins(mut self, full_fat_joins: bool) -> Self {
        self.config.full_fat_joins = full_fat_joins;
        self
    }

    pub fn set_full_fat_joins(&mut self, full_fat_joins: bool) -> &mut Self {
        self.config.full_fat_joins = full_fat_joins;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Builds the operator tree for `model`. Every compilation gets its own builder, so the
    /// engine can be shared between sessions.
    pub fn compile(&self, model: &QueryModel, ctx: &ExecutionContext) -> Result<Operator> {
        let now = Instant::now();
        let mut builder = PlanBuilder::new(
            self.storage.clone(),
            self.function_parser.clone(),
            self.config.clone(),
        );
        let plan = builder.generate(model, ctx)?;
        info!("Compiled plan in {} us", now.elapsed().as_micros());
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bind_variables_ignore_prefix_and_case() {
        let ctx = ExecutionContext::default().with_bind_variable(":Lim", Value::Long(5));
        assert_eq!(ctx.bind_variable("lim"), Some(&Value::Long(5)));
        assert_eq!(ctx.bind_variable(":LIM"), Some(&Value::Long(5)));
        assert_eq!(ctx.security().principal(), "admin");
    }

    #[test]
    fn config_defaults() {
        let config = PlannerConfig::default();
        assert!(!config.full_fat_joins);
        let engine = Engine::new(Rc::new(crate::storage::MemStorage::new())).with_full_fat_joins(true);
        assert!(engine.config().full_fat_joins);
    }
}
