//! Language to runtime lookup

use crate::config::EngineConfig;
#[cfg(feature = "javascript")]
use crate::runtime::JavaScriptRuntime;
#[cfg(feature = "python")]
use crate::runtime::PythonRuntime;
use crate::runtime::Runtime;
#[cfg(feature = "typescript")]
use crate::runtime::TypeScriptRuntime;
use polyrun_common::Language;
use std::collections::HashMap;
use std::sync::Arc;

/// Runtimes available to the dispatcher, keyed by language
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    runtimes: HashMap<Language, Arc<dyn Runtime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every runtime compiled into this build
    #[cfg_attr(
        not(any(feature = "javascript", feature = "python")),
        allow(unused_variables)
    )]
    pub fn from_config(config: &EngineConfig) -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "javascript")]
        registry.register(Arc::new(JavaScriptRuntime::with_limits(config.limits.clone())));

        #[cfg(feature = "typescript")]
        registry.register(Arc::new(TypeScriptRuntime::with_limits(config.limits.clone())));

        #[cfg(feature = "python")]
        registry.register(Arc::new(PythonRuntime::new(
            config.python.clone(),
            config.limits.clone(),
        )));

        registry
    }

    /// Add a runtime under its own language, replacing any previous one
    pub fn register(&mut self, runtime: Arc<dyn Runtime>) {
        tracing::debug!(runtime = runtime.name(), language = %runtime.language(), "Registering runtime");
        self.runtimes.insert(runtime.language(), runtime);
    }

    pub fn get(&self, language: &Language) -> Option<Arc<dyn Runtime>> {
        self.runtimes.get(language).cloned()
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.runtimes.keys().cloned().collect();
        languages.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        languages
    }

    pub fn runtimes(&self) -> impl Iterator<Item = &Arc<dyn Runtime>> {
        self.runtimes.values()
    }
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("languages", &self.languages())
            .finish()
    }
}
