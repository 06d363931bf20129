//! Plugin registry: type name → implementation, plus alias tables.
//!
//! Types are registered explicitly (the built-ins through
//! [`PluginRegistry::with_builtin`]) and resolved at most once each; the
//! first resolution fixes the type's [`AliasTable`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::collector::Plugin;
use crate::collector::memcached::MemcachedPlugin;
use crate::collector::mysql::MysqlPlugin;
use crate::collector::nginx::{NginxCombinedPlugin, NginxPlugin};

/// Builds a fresh, uninitialized plugin.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Registry lookup errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Unknown plugin type, alias or graph index.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up.
        kind: &'static str,
        /// The missing key.
        name: String,
    },

    /// A type with this name is already registered.
    #[error("plugin type '{0}' already registered")]
    Duplicate(String),

    /// Declared aliases do not form a bijection over the graphs.
    #[error("plugin type '{name}' has invalid aliases: {reason}")]
    InvalidAliases {
        /// Plugin type name.
        name: String,
        /// What is wrong with the list.
        reason: String,
    },
}

/// Static description of a plugin type.
#[derive(Clone)]
pub struct PluginDescriptor {
    name: String,
    num_graphs: usize,
    aliases: Option<Vec<String>>,
    factory: PluginFactory,
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("num_graphs", &self.num_graphs)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

impl PluginDescriptor {
    /// Describe a type producing `num_graphs` images per period.
    pub fn new<F>(name: impl Into<String>, num_graphs: usize, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            num_graphs,
            aliases: None,
            factory: Arc::new(factory),
        }
    }

    /// Name the graphs; the list must have exactly `num_graphs` unique entries.
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = Some(aliases.into_iter().map(Into::into).collect());
        self
    }

    /// Type name used in configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Images rendered per period.
    pub fn num_graphs(&self) -> usize {
        self.num_graphs
    }
}

/// Bijection between graph indices `0..num_graphs` and their names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTable {
    names: Vec<String>,
}

impl AliasTable {
    /// Positional names `"0"`, `"1"`, ...
    pub fn positional(num_graphs: usize) -> Self {
        Self {
            names: (0..num_graphs).map(|i| i.to_string()).collect(),
        }
    }

    /// Explicit names, one per graph.
    ///
    /// # Errors
    /// `InvalidAliases` on a length mismatch or a repeated name.
    pub fn explicit(
        type_name: &str,
        num_graphs: usize,
        aliases: &[String],
    ) -> Result<Self, RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidAliases {
            name: type_name.to_string(),
            reason,
        };

        if aliases.len() != num_graphs {
            return Err(invalid(format!(
                "{} aliases for {} graphs",
                aliases.len(),
                num_graphs
            )));
        }

        let mut seen = HashSet::new();
        for alias in aliases {
            if !seen.insert(alias.as_str()) {
                return Err(invalid(format!("duplicate alias '{alias}'")));
            }
        }

        Ok(Self {
            names: aliases.to_vec(),
        })
    }

    /// Graph index for `alias`.
    pub fn index_of(&self, alias: &str) -> Result<usize, RegistryError> {
        self.names
            .iter()
            .position(|name| name == alias)
            .ok_or_else(|| RegistryError::NotFound {
                kind: "alias",
                name: alias.to_string(),
            })
    }

    /// Name of graph `index`.
    pub fn alias_of(&self, index: usize) -> Result<&str, RegistryError> {
        self.names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| RegistryError::NotFound {
                kind: "graph index",
                name: index.to_string(),
            })
    }

    /// Number of graphs.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True for a type without graphs.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// A type resolved once, with its alias table fixed.
#[derive(Debug)]
pub struct ResolvedPlugin {
    descriptor: PluginDescriptor,
    aliases: Arc<AliasTable>,
}

impl ResolvedPlugin {
    /// Type name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Images rendered per period.
    pub fn num_graphs(&self) -> usize {
        self.descriptor.num_graphs
    }

    /// Alias table shared by all instances of this type.
    pub fn aliases(&self) -> &Arc<AliasTable> {
        &self.aliases
    }

    /// Build a new, uninitialized plugin of this type.
    pub fn instantiate(&self) -> Box<dyn Plugin> {
        (self.descriptor.factory)()
    }
}

/// Explicit registry of plugin types, owned by the orchestrator.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    available: HashMap<String, PluginDescriptor>,
    resolved: BTreeMap<String, Arc<ResolvedPlugin>>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the bundled plugin types.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for descriptor in builtin_descriptors() {
            registry
                .register(descriptor)
                .expect("built-in plugin types are unique");
        }
        registry
    }

    /// Make a type available for resolution.
    ///
    /// # Errors
    /// `Duplicate` if the name is taken.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<(), RegistryError> {
        if self.available.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        tracing::debug!(plugin_type = %descriptor.name, "Plugin type registered");
        self.available.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.available.contains_key(name)
    }

    /// Resolve `name`, building its alias table on first use.
    ///
    /// # Errors
    /// `NotFound` for an unregistered type, `InvalidAliases` for a bad alias list.
    pub fn resolve(&mut self, name: &str) -> Result<Arc<ResolvedPlugin>, RegistryError> {
        if let Some(resolved) = self.resolved.get(name) {
            return Ok(Arc::clone(resolved));
        }

        let descriptor = self
            .available
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                kind: "plugin type",
                name: name.to_string(),
            })?;

        let aliases = match &descriptor.aliases {
            Some(aliases) => AliasTable::explicit(name, descriptor.num_graphs, aliases)?,
            None => AliasTable::positional(descriptor.num_graphs),
        };

        let resolved = Arc::new(ResolvedPlugin {
            descriptor,
            aliases: Arc::new(aliases),
        });
        self.resolved.insert(name.to_string(), Arc::clone(&resolved));
        tracing::info!(plugin_type = %name, graphs = resolved.num_graphs(), "Plugin type loaded");
        Ok(resolved)
    }

    /// Resolved types, sorted by name.
    pub fn resolved(&self) -> impl Iterator<Item = &Arc<ResolvedPlugin>> {
        self.resolved.values()
    }
}

fn builtin_descriptors() -> Vec<PluginDescriptor> {
    vec![
        PluginDescriptor::new("memcached", 4, || Box::new(MemcachedPlugin::default())),
        PluginDescriptor::new("mysql", 4, || Box::new(MysqlPlugin::default()))
            .with_aliases(["queries", "qcache", "handler", "io"]),
        PluginDescriptor::new("nginx", 2, || Box::new(NginxPlugin::default())),
        PluginDescriptor::new("nginxcombined", 1, || {
            Box::new(NginxCombinedPlugin::default())
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorError, RawSample};
    use crate::render::RenderContext;

    struct Dummy;

    #[async_trait::async_trait]
    impl Plugin for Dummy {
        async fn poll(&self) -> Result<RawSample, CollectorError> {
            Err(CollectorError::Unsupported("poll".to_string()))
        }

        fn render_specs(&self, _ctx: &RenderContext) -> Vec<Vec<String>> {
            Vec::new()
        }
    }

    #[test]
    fn test_alias_table_is_bijective() {
        let mut registry = PluginRegistry::with_builtin();
        let mysql = registry.resolve("mysql").unwrap();
        let aliases = mysql.aliases();

        for (index, alias) in ["queries", "qcache", "handler", "io"].iter().enumerate() {
            assert_eq!(aliases.index_of(alias).unwrap(), index);
            assert_eq!(aliases.alias_of(index).unwrap(), *alias);
        }
        assert!(matches!(
            aliases.index_of("threads"),
            Err(RegistryError::NotFound { kind: "alias", .. })
        ));
        assert!(aliases.alias_of(4).is_err());
    }

    #[test]
    fn test_builtin_types_registered() {
        let registry = PluginRegistry::with_builtin();
        let names: Vec<_> = builtin_descriptors()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["memcached", "mysql", "nginx", "nginxcombined"]);
        assert!(names.iter().all(|name| registry.contains(name)));
    }

    #[test]
    fn test_positional_aliases() {
        let mut registry = PluginRegistry::with_builtin();
        let nginx = registry.resolve("nginx").unwrap();
        assert_eq!(nginx.aliases().iter().collect::<Vec<_>>(), vec!["0", "1"]);
        assert_eq!(nginx.aliases().index_of("1").unwrap(), 1);
    }

    #[test]
    fn test_resolve_is_memoized() {
        let mut registry = PluginRegistry::with_builtin();
        let first = registry.resolve("memcached").unwrap();
        let second = registry.resolve("memcached").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(first.aliases(), second.aliases()));
    }

    #[test]
    fn test_unknown_type() {
        let mut registry = PluginRegistry::with_builtin();
        let err = registry.resolve("redis").unwrap_err();
        assert_eq!(err.to_string(), "plugin type 'redis' not found");
    }

    #[test]
    fn test_resolved_sorted_by_name() {
        let mut registry = PluginRegistry::with_builtin();
        for name in ["nginx", "memcached", "mysql"] {
            registry.resolve(name).unwrap();
        }
        let names: Vec<_> = registry.resolved().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["memcached", "mysql", "nginx"]);
    }

    #[test]
    fn test_register_duplicate_and_bad_aliases() {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::new("dummy", 2, || Box::new(Dummy)))
            .unwrap();
        assert!(matches!(
            registry.register(PluginDescriptor::new("dummy", 1, || Box::new(Dummy))),
            Err(RegistryError::Duplicate(_))
        ));

        registry
            .register(PluginDescriptor::new("short", 2, || Box::new(Dummy)).with_aliases(["a"]))
            .unwrap();
        assert!(matches!(
            registry.resolve("short"),
            Err(RegistryError::InvalidAliases { .. })
        ));

        registry
            .register(
                PluginDescriptor::new("twice", 2, || Box::new(Dummy)).with_aliases(["a", "a"]),
            )
            .unwrap();
        assert!(registry.resolve("twice").is_err());
    }
}
