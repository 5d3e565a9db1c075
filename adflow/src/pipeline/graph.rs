//! Declared stage dependencies and their execution order.

use crate::core::StageId;
use crate::errors::AdflowError;
use std::collections::{BTreeMap, HashSet};

/// A validated, acyclic set of stages with a deterministic execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGraph {
    dependencies: BTreeMap<StageId, Vec<StageId>>,
    execution_order: Vec<StageId>,
}

impl StageGraph {
    /// Starts declaring a graph.
    #[must_use]
    pub fn builder() -> StageGraphBuilder {
        StageGraphBuilder::default()
    }

    /// The standard creative pipeline: a linear chain through every stage.
    pub fn standard() -> Result<Self, AdflowError> {
        Self::builder()
            .stage(StageId::Copywriting, &[])
            .stage(StageId::BackgroundRemoval, &[StageId::Copywriting])
            .stage(StageId::BackgroundGeneration, &[StageId::BackgroundRemoval])
            .stage(StageId::LightingComposite, &[StageId::BackgroundGeneration])
            .stage(StageId::Compose, &[StageId::LightingComposite])
            .stage(StageId::Upscale, &[StageId::Compose])
            .build()
    }

    /// Stages in the order they execute.
    #[must_use]
    pub fn execution_order(&self) -> &[StageId] {
        &self.execution_order
    }

    /// Number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.execution_order.len()
    }

    /// Returns true if the graph declares the stage.
    #[must_use]
    pub fn contains(&self, stage: StageId) -> bool {
        self.dependencies.contains_key(&stage)
    }

    /// Direct dependencies of a stage.
    #[must_use]
    pub fn dependencies(&self, stage: StageId) -> &[StageId] {
        self.dependencies.get(&stage).map_or(&[], Vec::as_slice)
    }

    /// Every stage that transitively depends on `stage`.
    #[must_use]
    pub fn dependents(&self, stage: StageId) -> Vec<StageId> {
        let mut blocked: HashSet<StageId> = HashSet::from([stage]);
        let mut out = Vec::new();
        for candidate in &self.execution_order {
            if self
                .dependencies(*candidate)
                .iter()
                .any(|d| blocked.contains(d))
            {
                blocked.insert(*candidate);
                out.push(*candidate);
            }
        }
        out
    }
}

/// Declares stages and their dependencies.
#[derive(Debug, Default)]
pub struct StageGraphBuilder {
    declared: Vec<(StageId, Vec<StageId>)>,
}

impl StageGraphBuilder {
    /// Declares a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageId, dependencies: &[StageId]) -> Self {
        self.declared.push((stage, dependencies.to_vec()));
        self
    }

    /// Validates the declarations and computes the execution order.
    ///
    /// Fails on duplicate stages, dependencies on undeclared stages and
    /// cycles.
    pub fn build(self) -> Result<StageGraph, AdflowError> {
        let mut dependencies = BTreeMap::new();
        let mut declaration_order = Vec::new();
        for (stage, deps) in self.declared {
            if dependencies.insert(stage, deps).is_some() {
                return Err(AdflowError::Configuration(format!(
                    "stage '{stage}' declared twice"
                )));
            }
            declaration_order.push(stage);
        }

        for (stage, deps) in &dependencies {
            for dep in deps {
                if !dependencies.contains_key(dep) {
                    return Err(AdflowError::Configuration(format!(
                        "stage '{stage}' depends on undeclared stage '{dep}'"
                    )));
                }
            }
        }

        if let Some(cycle) = find_cycle(&dependencies, &declaration_order) {
            let path: Vec<_> = cycle.iter().map(StageId::as_str).collect();
            return Err(AdflowError::Configuration(format!(
                "dependency cycle detected: {}",
                path.join(" -> ")
            )));
        }

        let execution_order = topological_sort(&dependencies, &declaration_order);
        Ok(StageGraph {
            dependencies,
            execution_order,
        })
    }
}

fn find_cycle(
    dependencies: &BTreeMap<StageId, Vec<StageId>>,
    order: &[StageId],
) -> Option<Vec<StageId>> {
    fn dfs(
        node: StageId,
        dependencies: &BTreeMap<StageId, Vec<StageId>>,
        visited: &mut HashSet<StageId>,
        path: &mut Vec<StageId>,
    ) -> Option<Vec<StageId>> {
        visited.insert(node);
        path.push(node);
        for dep in dependencies.get(&node).into_iter().flatten() {
            if let Some(start) = path.iter().position(|n| n == dep) {
                let mut cycle = path[start..].to_vec();
                cycle.push(*dep);
                return Some(cycle);
            }
            if !visited.contains(dep) {
                if let Some(cycle) = dfs(*dep, dependencies, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }

    let mut visited = HashSet::new();
    for stage in order {
        if !visited.contains(stage) {
            let mut path = Vec::new();
            if let Some(cycle) = dfs(*stage, dependencies, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn topological_sort(
    dependencies: &BTreeMap<StageId, Vec<StageId>>,
    order: &[StageId],
) -> Vec<StageId> {
    fn visit(
        node: StageId,
        dependencies: &BTreeMap<StageId, Vec<StageId>>,
        visited: &mut HashSet<StageId>,
        result: &mut Vec<StageId>,
    ) {
        if !visited.insert(node) {
            return;
        }
        for dep in dependencies.get(&node).into_iter().flatten() {
            visit(*dep, dependencies, visited, result);
        }
        result.push(node);
    }

    let mut visited = HashSet::new();
    let mut result = Vec::new();
    for stage in order {
        visit(*stage, dependencies, &mut visited, &mut result);
    }
    result
}
