//! # Module registry and dependency graph.
//!
//! The registry owns every registered [`Module`] in registration order and resolves declared
//! dependency names into graph edges.
//!
//! ## Architecture
//! ```text
//! register(name, spec) ──► modules: Vec<Arc<Module>>   (last write wins on name clash)
//!
//! resolve():
//!   for module in modules
//!     ├─► dep name ─► lookup ─► Arc<Module>        (unknown → UnknownDependency)
//!     └─► dep.dependents.push(Weak(module))
//! ```
//!
//! ## Rules
//! - One registry per runtime; modules are never removed.
//! - Registering after resolution replaces or appends the module and resolves its edges
//!   immediately; such a module is not prepared by the running runtime.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::core::module::{Graph, Module, ModuleSpec};
use crate::core::shared::Shared;
use crate::error::RuntimeError;

pub(crate) struct Registry {
    modules: RwLock<Vec<Arc<Module>>>,
    resolved: AtomicBool,
}

impl Registry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            modules: RwLock::new(Vec::new()),
            resolved: AtomicBool::new(false),
        })
    }

    /// Creates and stores a module. A name clash replaces the earlier entry.
    pub(crate) fn register(
        self: &Arc<Self>,
        name: &str,
        spec: ModuleSpec,
        shared: Arc<Shared>,
    ) -> Arc<Module> {
        let module = Arc::new(Module::new(name, spec, shared, Arc::downgrade(self)));
        {
            let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
            match modules.iter().position(|m| m.name() == name) {
                Some(pos) => {
                    warn!(module = name, "module registered twice; replacing earlier entry");
                    modules[pos] = Arc::clone(&module);
                }
                None => modules.push(Arc::clone(&module)),
            }
        }
        if self.resolved.load(Ordering::Acquire) {
            if let Err(e) = self.resolve() {
                warn!(module = name, error = %e, "late registration left the graph unresolved");
            }
        }
        module
    }

    /// Returns the module with the given name.
    pub(crate) fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }

    /// Returns all modules in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Module>> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.modules.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Resolves dependency names into graph edges (idempotent).
    pub(crate) fn resolve(&self) -> Result<(), RuntimeError> {
        let modules = self.snapshot();
        let mut edges: Vec<Vec<Arc<Module>>> = Vec::with_capacity(modules.len());
        for module in &modules {
            let mut deps = Vec::with_capacity(module.dep_names.len());
            for dep_name in &module.dep_names {
                let dep = modules
                    .iter()
                    .find(|m| m.name() == dep_name)
                    .ok_or_else(|| RuntimeError::UnknownDependency {
                        module: module.name().to_string(),
                        dependency: dep_name.clone(),
                    })?;
                deps.push(Arc::clone(dep));
            }
            edges.push(deps);
        }

        for module in &modules {
            *module.graph.write().unwrap_or_else(|e| e.into_inner()) = Graph::default();
        }
        for (module, deps) in modules.iter().zip(edges) {
            for dep in &deps {
                dep.graph
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .dependents
                    .push(Arc::downgrade(module));
            }
            module.graph.write().unwrap_or_else(|e| e.into_inner()).deps = deps;
        }
        self.resolved.store(true, Ordering::Release);
        Ok(())
    }

    /// Renders the dependency graph as an indented tree.
    ///
    /// Roots are modules nobody depends on; children are dependencies. A node already on the
    /// current path is printed with a `(cycle)` marker and not expanded.
    pub(crate) fn render_graph(&self) -> String {
        let modules = self.snapshot();
        let mut out = String::new();
        let mut roots: Vec<&Arc<Module>> =
            modules.iter().filter(|m| m.dependents().is_empty()).collect();
        if roots.is_empty() {
            roots = modules.iter().collect();
        }
        for root in roots {
            let mut path = HashSet::new();
            render_node(root, 0, &mut path, &mut out);
        }
        out
    }
}

fn render_node(module: &Arc<Module>, depth: usize, path: &mut HashSet<String>, out: &mut String) {
    let indent = "  ".repeat(depth);
    if !path.insert(module.name().to_string()) {
        let _ = writeln!(out, "{indent}{} (cycle)", module.name());
        return;
    }
    let _ = writeln!(out, "{indent}{} [{}]", module.name(), module.status());
    for dep in module.deps() {
        render_node(&dep, depth + 1, path, out);
    }
    path.remove(module.name());
}
