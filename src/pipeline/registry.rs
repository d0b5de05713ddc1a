//! Module registry - type names to constructors
//!
//! The registry maps the `type` of a module descriptor (`control.seq`,
//! `sink.http`, ...) to the function that builds it. All registrations happen
//! while the registry is being assembled; once it is shared behind an `Arc`
//! it is read-only.
//!
//! Composition modules receive a [`Builder`] so they can construct their
//! children through the same registry. The builder tracks nesting depth and
//! refuses to go deeper than [`MAX_DEPTH`], which stops a self-referential
//! configuration from recursing without bound.
//!
//! A [validating](Builder::validating) builder runs every constructor for its
//! configuration checks only. Constructors skip side effects such as opening
//! files or binding listeners, and the modules it returns are never wired.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;

use super::{Module, ModuleContext};
use crate::config::module::ModuleDescriptor;
use crate::error::ConfigError;

/// Maximum nesting of composition modules.
pub const MAX_DEPTH: usize = 32;

/// Builds a module from its context and configuration.
pub type Constructor =
    fn(Arc<ModuleContext>, &Value, &Builder) -> Result<Arc<dyn Module>, ConfigError>;

pub struct Registry {
    constructors: HashMap<&'static str, Constructor>,
    /// Per-type counters used to name unnamed modules.
    counters: Mutex<HashMap<String, usize>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry holding every module type shipped with the crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::control::register(&mut registry);
        crate::sink::register(&mut registry);
        crate::source::register(&mut registry);
        registry
    }

    /// Register a constructor.
    ///
    /// # Panics
    /// Panics if `module_type` is already registered.
    pub fn register(&mut self, module_type: &'static str, constructor: Constructor) {
        if self.constructors.insert(module_type, constructor).is_some() {
            panic!("module {module_type:?} already registered");
        }
    }

    pub fn contains(&self, module_type: &str) -> bool {
        self.constructors.contains_key(module_type)
    }

    /// Registered type names, sorted.
    pub fn available_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.constructors.keys().copied().collect();
        types.sort_unstable();
        types
    }

    fn next_name(&self, module_type: &str) -> String {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let n = counters.entry(module_type.to_string()).or_insert(0);
        let name = format!("{module_type}.{n}");
        *n += 1;
        name
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// Process-wide registry with the builtin module types.
pub fn global() -> Arc<Registry> {
    GLOBAL
        .get_or_init(|| Arc::new(Registry::with_builtins()))
        .clone()
}

/// Constructs modules through a registry, one nesting level at a time.
#[derive(Clone)]
pub struct Builder {
    registry: Arc<Registry>,
    depth: usize,
    validating: bool,
}

impl Builder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            depth: 0,
            validating: false,
        }
    }

    /// A builder for checking configuration without side effects.
    pub fn validating(&self) -> Self {
        Self {
            validating: true,
            ..self.clone()
        }
    }

    pub fn is_validating(&self) -> bool {
        self.validating
    }

    /// Builder over the process-wide registry.
    pub fn global() -> Self {
        Self::new(global())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Construct a module of `module_type` with an explicit context.
    pub fn create(
        &self,
        module_type: &str,
        ctx: ModuleContext,
        config: &Value,
    ) -> Result<Arc<dyn Module>, ConfigError> {
        if self.depth >= MAX_DEPTH {
            return Err(ConfigError::TooDeep(MAX_DEPTH));
        }
        let constructor = self
            .registry
            .constructors
            .get(module_type)
            .ok_or_else(|| ConfigError::ModuleNotFound(module_type.to_string()))?;

        let nested = Builder {
            depth: self.depth + 1,
            ..self.clone()
        };
        constructor(Arc::new(ctx), config, &nested).map_err(|e| ConfigError::Create {
            module_type: module_type.to_string(),
            source: Box::new(e),
        })
    }

    /// Construct a module from a `{"type", "name"?, ...}` descriptor.
    pub fn build(&self, descriptor: &Value) -> Result<Arc<dyn Module>, ConfigError> {
        let descriptor = ModuleDescriptor::from_value(descriptor)?;
        let name = match descriptor.name {
            Some(name) => name,
            None => self.registry.next_name(&descriptor.module_type),
        };
        let ctx = ModuleContext::new(name, descriptor.module_type.clone());
        self.create(&descriptor.module_type, ctx, &descriptor.config)
    }

    /// Construct every module of a descriptor list, in order.
    pub fn build_all(&self, descriptors: &Value) -> Result<Vec<Arc<dyn Module>>, ConfigError> {
        match descriptors {
            Value::Array(items) => items.iter().map(|d| self.build(d)).collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(ConfigError::invalid(format!(
                "expected a list of modules, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::identity::Identity;
    use serde_json::json;

    fn failing(
        _ctx: Arc<ModuleContext>,
        _config: &Value,
        _builder: &Builder,
    ) -> Result<Arc<dyn Module>, ConfigError> {
        Err(ConfigError::MissingField("target_url"))
    }

    fn identity(
        ctx: Arc<ModuleContext>,
        _config: &Value,
        _builder: &Builder,
    ) -> Result<Arc<dyn Module>, ConfigError> {
        Ok(Identity::new(ctx))
    }

    /// Builds whatever descriptor it is configured with, one level deeper.
    fn nest(
        _ctx: Arc<ModuleContext>,
        config: &Value,
        builder: &Builder,
    ) -> Result<Arc<dyn Module>, ConfigError> {
        builder.build(config)
    }

    /// Fails only when built for validation.
    fn side_effect_free(
        ctx: Arc<ModuleContext>,
        _config: &Value,
        builder: &Builder,
    ) -> Result<Arc<dyn Module>, ConfigError> {
        if builder.is_validating() {
            return Err(ConfigError::invalid("validating"));
        }
        Ok(Identity::new(ctx))
    }

    fn registry() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry.register("test.side_effect_free", side_effect_free);
        registry.register("test.failing", failing);
        registry.register("test.identity", identity);
        registry.register("test.nest", nest);
        Arc::new(registry)
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut registry = Registry::new();
        registry.register("test.identity", identity);
        registry.register("test.identity", identity);
    }

    #[test]
    fn unknown_type_is_reported() {
        let builder = Builder::new(registry());
        let err = builder.build(&json!({"type": "sink.nowhere"})).err().unwrap();
        assert_eq!(err.to_string(), "module \"sink.nowhere\" does not exist");
    }

    #[test]
    fn constructor_error_carries_type() {
        let builder = Builder::new(registry());
        let err = builder.build(&json!({"type": "test.failing"})).err().unwrap();
        assert!(matches!(err, ConfigError::Create { ref module_type, .. } if module_type == "test.failing"));
    }

    #[tokio::test]
    async fn unnamed_modules_get_numbered_names() {
        let builder = Builder::new(registry());
        let a = builder.build(&json!({"type": "test.identity"})).unwrap();
        let b = builder.build(&json!({"type": "test.identity"})).unwrap();
        let c = builder
            .build(&json!({"type": "test.identity", "name": "custom"}))
            .unwrap();

        assert_eq!(a.context().name(), "test.identity.0");
        assert_eq!(b.context().name(), "test.identity.1");
        assert_eq!(c.context().name(), "custom");
        assert_eq!(c.context().module_type(), "test.identity");
    }

    #[tokio::test]
    async fn nesting_depth_is_capped() {
        let builder = Builder::new(registry());

        let mut descriptor = json!({"type": "test.identity"});
        for _ in 0..MAX_DEPTH - 1 {
            descriptor = json!({"type": "test.nest", "config": descriptor});
        }
        assert!(builder.build(&descriptor).is_ok());

        let too_deep = json!({"type": "test.nest", "config": descriptor});
        let mut err = builder.build(&too_deep).err().unwrap();
        while let ConfigError::Create { source, .. } = err {
            err = *source;
        }
        assert!(matches!(err, ConfigError::TooDeep(MAX_DEPTH)));
    }

    #[tokio::test]
    async fn validating_reaches_nested_constructors() {
        let builder = Builder::new(registry());
        let descriptor = json!({"type": "test.nest", "config": {"type": "test.side_effect_free"}});

        assert!(!builder.is_validating());
        assert!(builder.build(&descriptor).is_ok());
        let err = builder.validating().build(&descriptor).err().unwrap();
        assert!(err.to_string().contains("validating"));
    }

    #[test]
    fn builtins_are_registered() {
        let registry = Registry::with_builtins();
        for module_type in [
            "control.seq",
            "control.fanout",
            "control.split_by",
            "control.decouple",
            "control.rate_limit",
            "control.identity",
            "control.filter",
            "sink.http",
            "sink.file",
            "source.http",
        ] {
            assert!(registry.contains(module_type), "{module_type} missing");
        }
    }
}
