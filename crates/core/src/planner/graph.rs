//! Index-addressed view of a plan's dependency structure.
//!
//! A [`PlanGraph`] is built once per plan and never outlives the turn. Steps are
//! addressed by [`StepIndex`] so schedulers can keep per-step state in flat
//! vectors instead of id-keyed maps.

use std::collections::BTreeMap;

use crate::domain::plan::{ExecutionPlan, StepIndex};
use crate::errors::PlanStructureError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanGraph {
    dependencies: Vec<Vec<StepIndex>>,
    dependents: Vec<Vec<StepIndex>>,
    priorities: Vec<u32>,
}

impl PlanGraph {
    pub fn build(plan: &ExecutionPlan) -> Result<Self, PlanStructureError> {
        plan.validate_structure()?;

        let len = plan.steps.len();
        let mut dependencies = vec![Vec::new(); len];
        let mut dependents = vec![Vec::new(); len];

        for (position, step) in plan.steps.iter().enumerate() {
            for dependency in &step.dependencies {
                // validate_structure guarantees every dependency resolves
                let Some(dependency_index) = plan.index_of(dependency) else {
                    return Err(PlanStructureError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                };
                if !dependencies[position].contains(&dependency_index) {
                    dependencies[position].push(dependency_index);
                    dependents[dependency_index.0].push(StepIndex(position));
                }
            }
        }

        let priorities = plan.steps.iter().map(|step| step.priority).collect();
        Ok(Self { dependencies, dependents, priorities })
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = StepIndex> {
        (0..self.len()).map(StepIndex)
    }

    pub fn dependencies(&self, index: StepIndex) -> &[StepIndex] {
        self.dependencies.get(index.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, index: StepIndex) -> &[StepIndex] {
        self.dependents.get(index.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roots(&self) -> Vec<StepIndex> {
        self.indices().filter(|index| self.dependencies(*index).is_empty()).collect()
    }

    /// Kahn ordering; ties resolve to plan order.
    pub fn topological_order(&self) -> Vec<StepIndex> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: Vec<StepIndex> = self.roots();
        let mut order = Vec::with_capacity(self.len());

        while !ready.is_empty() {
            ready.sort_unstable_by(|left, right| right.cmp(left));
            let Some(next) = ready.pop() else { break };
            order.push(next);
            for dependent in self.dependents(next) {
                remaining[dependent.0] -= 1;
                if remaining[dependent.0] == 0 {
                    ready.push(*dependent);
                }
            }
        }

        order
    }

    /// Length of the longest dependency chain ending at each step; roots are depth 0.
    pub fn depths(&self) -> Vec<u32> {
        let mut depths = vec![0_u32; self.len()];
        for index in self.topological_order() {
            let depth = self
                .dependencies(index)
                .iter()
                .map(|dependency| depths[dependency.0].saturating_add(1))
                .max()
                .unwrap_or(0);
            depths[index.0] = depth;
        }
        depths
    }

    /// Steps grouped by declared priority, ascending.
    pub fn waves(&self) -> Vec<Vec<StepIndex>> {
        let mut waves: BTreeMap<u32, Vec<StepIndex>> = BTreeMap::new();
        for index in self.indices() {
            waves.entry(self.priorities[index.0]).or_default().push(index);
        }
        waves.into_values().collect()
    }

    /// True when every dependency sits in a strictly earlier wave than its dependent.
    pub fn waves_are_ordered(&self) -> bool {
        self.indices().all(|index| {
            let priority = self.priorities[index.0];
            self.dependencies(index).iter().all(|dependency| self.priorities[dependency.0] < priority)
        })
    }

    /// Longest weighted path through the graph, using `cost_of` per step.
    pub fn critical_path<F>(&self, mut cost_of: F) -> u64
    where
        F: FnMut(StepIndex) -> u64,
    {
        let mut finish = vec![0_u64; self.len()];
        for index in self.topological_order() {
            let start = self
                .dependencies(index)
                .iter()
                .map(|dependency| finish[dependency.0])
                .max()
                .unwrap_or(0);
            finish[index.0] = start.saturating_add(cost_of(index));
        }
        finish.into_iter().max().unwrap_or(0)
    }
}
