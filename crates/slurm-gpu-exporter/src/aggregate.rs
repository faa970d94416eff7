//! Reconciliation of GPU inventory with job allocations.

use std::collections::BTreeMap;

use tracing::debug;
use tracing::warn;

use crate::slurm::allocation::NodeAllocation;
use crate::slurm::GpuInventory;
use crate::slurm::GpuKey;

/// Allocation figures for one (node, model).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuUsage {
    pub alloc: f64,
    pub idle: f64,
    pub total: f64,
    /// `alloc / total`, or `0.0` for nodes without GPUs.
    pub utilization: f64,
}

impl GpuUsage {
    pub fn new(alloc: f64, total: f64) -> Self {
        let utilization = if total > 0.0 { alloc / total } else { 0.0 };
        Self {
            alloc,
            idle: total - alloc,
            total,
            utilization,
        }
    }
}

/// Computes per-(node, model) usage from the inventory and the per-node allocation view.
///
/// Allocation whose descriptor named a model installed on the node is attributed to that
/// model. Everything else on the node goes to its first model in sorted order, which is exact
/// for single-model nodes. Allocated nodes missing from the inventory are skipped.
pub fn node_model_usage(
    inventory: &GpuInventory,
    allocations: &BTreeMap<String, NodeAllocation>,
) -> BTreeMap<GpuKey, GpuUsage> {
    let mut allocated: BTreeMap<GpuKey, f64> =
        inventory.iter().map(|(key, _)| (key.clone(), 0.0)).collect();

    for (node, allocation) in allocations {
        let Some(fallback_model) = inventory.models_on(node).next() else {
            warn!(
                node = %node,
                alloc = allocation.total,
                "Allocated node missing from GPU inventory, skipping"
            );
            continue;
        };

        let mut unattributed = allocation.unattributed;
        for (model, count) in &allocation.by_model {
            match allocated.get_mut(&GpuKey::new(node.as_str(), model.as_str())) {
                Some(alloc) => *alloc += count,
                None => {
                    debug!(
                        node = %node,
                        model = %model,
                        "Allocated model not installed on node, attributing to {fallback_model}"
                    );
                    unattributed += count;
                }
            }
        }

        if unattributed > 0.0 {
            if let Some(alloc) = allocated.get_mut(&GpuKey::new(node.as_str(), fallback_model)) {
                *alloc += unattributed;
            }
        }
    }

    inventory
        .iter()
        .map(|(key, total)| {
            let alloc = allocated.get(key).copied().unwrap_or_default();
            (key.clone(), GpuUsage::new(alloc, total))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::slurm::allocation::parse_allocations;
    use crate::slurm::allocation::per_node;

    fn usage(sinfo: &str, squeue: &str) -> BTreeMap<GpuKey, GpuUsage> {
        let inventory = GpuInventory::parse(sinfo);
        let jobs = parse_allocations(squeue);
        node_model_usage(&inventory, &per_node(&jobs))
    }

    #[test]
    fn reconciles_inventory_with_allocations() {
        let usage = usage(
            "node01 gpu:v100:4\nnode02 gpu:v100:2\n",
            "j1|alice|node01|gpu:v100:3\n",
        );

        assert_eq!(
            usage[&GpuKey::new("node01", "v100")],
            GpuUsage {
                alloc: 3.0,
                idle: 1.0,
                total: 4.0,
                utilization: 0.75,
            }
        );
        assert_eq!(
            usage[&GpuKey::new("node02", "v100")],
            GpuUsage {
                alloc: 0.0,
                idle: 2.0,
                total: 2.0,
                utilization: 0.0,
            }
        );
    }

    #[test]
    fn alloc_plus_idle_equals_total() {
        let usage = usage(
            "node01 gpu:v100:4\nnode02 gpu:a100:8\nnode03 gpu:a100:2,gpu:v100:2\n",
            "j1|alice|node01|gpu:v100:1\n\
             j2|bob|node[01-02]|gpu:2\n\
             j3|carol|node03|gpu:a100:1\n\
             j4|dave|node02|gpu:a100:3\n",
        );

        for (key, usage) in &usage {
            assert!(usage.total > 0.0);
            assert!(
                (usage.alloc + usage.idle - usage.total).abs() < 1e-9,
                "{key}: {usage:?}"
            );
        }
    }

    #[test]
    fn zero_total_yields_zero_utilization() {
        let usage = usage("node01 gpu:v100:0\n", "j1|alice|node01|gpu:v100:1\n");

        let node = usage[&GpuKey::new("node01", "v100")];
        assert_eq!(node.utilization, 0.0);
        assert!(node.utilization.is_finite());
        assert_eq!(node.idle, -1.0);
    }

    #[test]
    fn skips_allocations_on_unknown_nodes() {
        let usage = usage("node01 gpu:v100:4\n", "j1|alice|ghost|gpu:v100:2\n");

        assert_eq!(usage.len(), 1);
        assert_eq!(usage[&GpuKey::new("node01", "v100")].alloc, 0.0);
    }

    #[test]
    fn attributes_named_models_on_mixed_nodes() {
        let usage = usage(
            "node03 gpu:a100:2,gpu:v100:2\n",
            "j1|alice|node03|gpu:v100:2\nj2|bob|node03|gpu:a100:1\n",
        );

        assert_eq!(usage[&GpuKey::new("node03", "v100")].alloc, 2.0);
        assert_eq!(usage[&GpuKey::new("node03", "a100")].alloc, 1.0);
    }

    #[test]
    fn unnamed_or_unknown_models_fall_back_to_first_model() {
        let usage = usage(
            "node03 gpu:v100:2,gpu:a100:2\n",
            "j1|alice|node03|gpu:1\nj2|bob|node03|gpu:h100:1\n",
        );

        assert_eq!(usage[&GpuKey::new("node03", "a100")].alloc, 2.0);
        assert_eq!(usage[&GpuKey::new("node03", "v100")].alloc, 0.0);
    }

    #[test]
    fn identical_input_yields_identical_usage() {
        let sinfo = "node01 gpu:v100:4\nnode02 gpu:v100:2\n";
        let squeue = "j1|alice|node01|gpu:v100:3\nj2|bob|node02|gpu:v100:1\n";

        assert_eq!(usage(sinfo, squeue), usage(sinfo, squeue));
    }
}
