//! Requires-graph resolution.
//!
//! The resolution engine is a seam: `UnitGraphResolver` only composes the
//! finder chain and hands it to a `ResolutionEngine`. The bundled
//! `RequiresClosureEngine` covers the requires closure, cycle rejection and
//! readability; it does not bind services or derive automatic modules.

use crate::finder::{ComposedFinder, ModuleFinder, ModuleReference};
use crate::platform::PlatformCatalog;
use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("module {name} not found{}", .required_by.as_ref().map(|by| format!(", required by {by}")).unwrap_or_default())]
    Unresolved {
        name: String,
        required_by: Option<String>,
    },
    #[error("cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("two versions of module {name} found in {} ({})", .first.display(), .second.display())]
    Duplicate {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct ResolvedModule {
    pub reference: ModuleReference,
    pub reads: IndexSet<String>,
}

impl ResolvedModule {
    pub fn name(&self) -> &str {
        self.reference.name()
    }
}

/// Result of one resolution: participating modules in discovery order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedGraph {
    modules: IndexMap<String, ResolvedModule>,
}

impl ResolvedGraph {
    pub fn find(&self, name: &str) -> Option<&ResolvedModule> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ResolvedModule> {
        self.modules.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

pub trait ResolutionEngine: Send + Sync {
    fn resolve(
        &self,
        finder: &dyn ModuleFinder,
        roots: &BTreeSet<String>,
    ) -> Result<ResolvedGraph, ResolutionError>;
}

/// Breadth-first requires closure with cycle detection.
///
/// `requires static` edges are not followed, but a module still reads a
/// statically required module when that module is resolved anyway.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequiresClosureEngine;

impl ResolutionEngine for RequiresClosureEngine {
    fn resolve(
        &self,
        finder: &dyn ModuleFinder,
        roots: &BTreeSet<String>,
    ) -> Result<ResolvedGraph, ResolutionError> {
        let mut selected: IndexMap<String, ModuleReference> = IndexMap::new();
        let mut queue: VecDeque<(String, Option<String>)> =
            roots.iter().map(|root| (root.clone(), None)).collect();

        while let Some((name, required_by)) = queue.pop_front() {
            if selected.contains_key(&name) {
                continue;
            }
            let reference = finder
                .find(&name)
                .ok_or_else(|| ResolutionError::Unresolved {
                    name: name.clone(),
                    required_by: required_by.clone(),
                })?;
            for requires in &reference.descriptor.requires {
                if requires.modifiers.is_static || selected.contains_key(&requires.name) {
                    continue;
                }
                queue.push_back((requires.name.clone(), Some(name.clone())));
            }
            trace!(module = %name, "selected module");
            selected.insert(name, reference);
        }

        detect_cycles(&selected)?;

        let mut implied_cache: HashMap<String, IndexSet<String>> = HashMap::new();
        let mut modules = IndexMap::with_capacity(selected.len());
        for (name, reference) in &selected {
            let mut reads = IndexSet::new();
            for requires in &reference.descriptor.requires {
                if !selected.contains_key(&requires.name) {
                    continue;
                }
                reads.insert(requires.name.clone());
                reads.extend(implied_readability(
                    &requires.name,
                    &selected,
                    &mut implied_cache,
                ));
            }
            modules.insert(
                name.clone(),
                ResolvedModule {
                    reference: reference.clone(),
                    reads,
                },
            );
        }

        debug!(roots = roots.len(), modules = modules.len(), "resolved requires graph");
        Ok(ResolvedGraph { modules })
    }
}

/// Modules readable by anything that reads `name`, through chains of
/// `requires transitive`. The graph is acyclic at this point.
fn implied_readability(
    name: &str,
    selected: &IndexMap<String, ModuleReference>,
    cache: &mut HashMap<String, IndexSet<String>>,
) -> IndexSet<String> {
    if let Some(cached) = cache.get(name) {
        return cached.clone();
    }
    let mut implied = IndexSet::new();
    if let Some(reference) = selected.get(name) {
        for requires in &reference.descriptor.requires {
            if !requires.modifiers.transitive || !selected.contains_key(&requires.name) {
                continue;
            }
            implied.insert(requires.name.clone());
            implied.extend(implied_readability(&requires.name, selected, cache));
        }
    }
    cache.insert(name.to_string(), implied.clone());
    implied
}

fn detect_cycles(selected: &IndexMap<String, ModuleReference>) -> Result<(), ResolutionError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        selected: &IndexMap<String, ModuleReference>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Result<(), ResolutionError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|entry| entry == name).unwrap_or(0);
                let mut path = stack[start..].to_vec();
                path.push(name.to_string());
                return Err(ResolutionError::Cycle { path });
            }
            None => {}
        }

        marks.insert(name.to_string(), Mark::Visiting);
        stack.push(name.to_string());
        if let Some(reference) = selected.get(name) {
            for requires in &reference.descriptor.requires {
                if selected.contains_key(&requires.name) {
                    visit(&requires.name, selected, marks, stack)?;
                }
            }
        }
        stack.pop();
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    for name in selected.keys() {
        visit(name, selected, &mut marks, &mut stack)?;
    }
    Ok(())
}

/// Ordered finder chain. Precedence, highest first: override path, platform
/// catalog, application module path, extra paths.
#[derive(Default)]
pub struct FinderChain {
    override_path: Option<Arc<dyn ModuleFinder>>,
    platform: Option<Arc<PlatformCatalog>>,
    application: Option<Arc<dyn ModuleFinder>>,
    extra: Option<Arc<dyn ModuleFinder>>,
}

impl FinderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, finder: Arc<dyn ModuleFinder>) -> Self {
        self.override_path = Some(finder);
        self
    }

    pub fn with_platform(mut self, platform: Arc<PlatformCatalog>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_application(mut self, finder: Arc<dyn ModuleFinder>) -> Self {
        self.application = Some(finder);
        self
    }

    pub fn with_extra(mut self, finder: Arc<dyn ModuleFinder>) -> Self {
        self.extra = Some(finder);
        self
    }

    pub fn compose(self) -> ComposedFinder {
        let mut composed = ComposedFinder::new();
        if let Some(finder) = self.override_path {
            composed = composed.then(finder);
        }
        if let Some(platform) = self.platform {
            composed = composed.then(platform);
        }
        if let Some(finder) = self.application {
            composed = composed.then(finder);
        }
        if let Some(finder) = self.extra {
            composed = composed.then(finder);
        }
        composed
    }
}

/// Resolves root names against the composed finder chain.
pub struct UnitGraphResolver {
    finder: ComposedFinder,
    engine: Box<dyn ResolutionEngine>,
}

impl UnitGraphResolver {
    pub fn new(chain: FinderChain, engine: Box<dyn ResolutionEngine>) -> Self {
        Self {
            finder: chain.compose(),
            engine,
        }
    }

    pub fn finder(&self) -> &ComposedFinder {
        &self.finder
    }

    pub fn resolve(&self, roots: &BTreeSet<String>) -> Result<ResolvedGraph, ResolutionError> {
        self.engine.resolve(&self.finder, roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ModuleDescriptor, Requires};
    use crate::finder::ModuleLocation;

    struct StaticFinder(IndexMap<String, ModuleReference>);

    impl StaticFinder {
        fn new(descriptors: Vec<ModuleDescriptor>) -> Self {
            Self(
                descriptors
                    .into_iter()
                    .map(|descriptor| {
                        (
                            descriptor.name.clone(),
                            ModuleReference {
                                location: ModuleLocation::Path(PathBuf::from(format!(
                                    "/mods/{}.jar",
                                    descriptor.name
                                ))),
                                descriptor,
                            },
                        )
                    })
                    .collect(),
            )
        }
    }

    impl ModuleFinder for StaticFinder {
        fn find(&self, name: &str) -> Option<ModuleReference> {
            self.0.get(name).cloned()
        }

        fn find_all(&self) -> Vec<ModuleReference> {
            self.0.values().cloned().collect()
        }
    }

    fn module(name: &str, requires: &[Requires]) -> ModuleDescriptor {
        let mut descriptor = ModuleDescriptor::new(name);
        descriptor.requires = requires.to_vec();
        descriptor
    }

    fn roots(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn resolves_transitive_requires_closure() {
        let finder = StaticFinder::new(vec![
            module("a", &[Requires::new("b")]),
            module("b", &[Requires::new("c")]),
            module("c", &[]),
            module("unrelated", &[]),
        ]);
        let graph = RequiresClosureEngine
            .resolve(&finder, &roots(&["a"]))
            .expect("resolve");
        let names: BTreeSet<_> = graph.names().collect();
        assert_eq!(names, BTreeSet::from(["a", "b", "c"]));
    }

    #[test]
    fn reads_follow_requires_transitive() {
        let finder = StaticFinder::new(vec![
            module("app", &[Requires::new("api")]),
            module("api", &[Requires::transitive("model")]),
            module("model", &[Requires::transitive("base")]),
            module("base", &[]),
        ]);
        let graph = RequiresClosureEngine
            .resolve(&finder, &roots(&["app"]))
            .unwrap();
        let reads: Vec<_> = graph
            .find("app")
            .unwrap()
            .reads
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(reads, vec!["api", "model", "base"]);
        assert!(graph.find("base").unwrap().reads.is_empty());
    }

    #[test]
    fn static_requires_are_not_followed() {
        let mut optional = Requires::new("optional");
        optional.modifiers.is_static = true;
        let finder = StaticFinder::new(vec![module("app", &[optional])]);
        let graph = RequiresClosureEngine
            .resolve(&finder, &roots(&["app"]))
            .expect("static requires do not need to be present");
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn missing_module_reports_requiring_module() {
        let finder = StaticFinder::new(vec![module("a", &[Requires::new("ghost")])]);
        let error = RequiresClosureEngine
            .resolve(&finder, &roots(&["a"]))
            .unwrap_err();
        match error {
            ResolutionError::Unresolved { name, required_by } => {
                assert_eq!(name, "ghost");
                assert_eq!(required_by.as_deref(), Some("a"));
            }
            other => panic!("expected unresolved error, got {other:?}"),
        }
    }

    #[test]
    fn cycles_are_rejected() {
        let finder = StaticFinder::new(vec![
            module("a", &[Requires::new("b")]),
            module("b", &[Requires::new("c")]),
            module("c", &[Requires::new("a")]),
        ]);
        let error = RequiresClosureEngine
            .resolve(&finder, &roots(&["a"]))
            .unwrap_err();
        match error {
            ResolutionError::Cycle { path } => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn chain_prefers_override_over_application() {
        let override_finder = StaticFinder::new(vec![module("x", &[Requires::new("y")])]);
        let application = StaticFinder::new(vec![module("x", &[]), module("y", &[])]);
        let resolver = UnitGraphResolver::new(
            FinderChain::new()
                .with_application(Arc::new(application))
                .with_override(Arc::new(override_finder)),
            Box::new(RequiresClosureEngine),
        );
        let graph = resolver.resolve(&roots(&["x"])).unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.find("x").unwrap().reads.contains("y"));
    }
}
