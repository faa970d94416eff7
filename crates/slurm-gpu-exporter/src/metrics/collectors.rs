//! Pull-based Prometheus collectors over a [`ClusterSnapshot`].
//!
//! Every collector resets its gauges and recomputes them from the snapshot on each
//! `collect()`, so nothing survives from one gather to the next.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::core::Desc;
use prometheus::proto::MetricFamily;
use prometheus::GaugeVec;
use prometheus::Opts;

use crate::aggregate::node_model_usage;
use crate::slurm::allocation::per_node;
use crate::slurm::allocation::per_user;
use crate::slurm::allocation::per_user_node;
use crate::slurm::ClusterSnapshot;

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    GaugeVec::new(Opts::new(name, help), labels)
}

fn describe<'a>(gauges: &[&'a GaugeVec]) -> Vec<&'a Desc> {
    gauges.iter().flat_map(|gauge| gauge.desc()).collect()
}

fn gather(gauges: &[&GaugeVec]) -> Vec<MetricFamily> {
    gauges.iter().flat_map(|gauge| gauge.collect()).collect()
}

fn reset(gauges: &[&GaugeVec]) {
    for gauge in gauges {
        gauge.reset();
    }
}

/// `slurm_gpus_{alloc,idle,total,utilization}{node,model}`.
pub struct NodeGpuCollector {
    snapshot: Arc<ClusterSnapshot>,
    alloc: GaugeVec,
    idle: GaugeVec,
    total: GaugeVec,
    utilization: GaugeVec,
}

impl NodeGpuCollector {
    pub fn new(snapshot: Arc<ClusterSnapshot>) -> prometheus::Result<Self> {
        let labels = ["node", "model"];
        Ok(Self {
            snapshot,
            alloc: gauge_vec("slurm_gpus_alloc", "Allocated GPUs", &labels)?,
            idle: gauge_vec("slurm_gpus_idle", "Idle GPUs", &labels)?,
            total: gauge_vec("slurm_gpus_total", "Total GPUs", &labels)?,
            utilization: gauge_vec(
                "slurm_gpus_utilization",
                "Total GPU utilization",
                &labels,
            )?,
        })
    }

    fn gauges(&self) -> [&GaugeVec; 4] {
        [&self.alloc, &self.idle, &self.total, &self.utilization]
    }
}

impl Collector for NodeGpuCollector {
    fn desc(&self) -> Vec<&Desc> {
        describe(&self.gauges())
    }

    fn collect(&self) -> Vec<MetricFamily> {
        reset(&self.gauges());
        let (Some(inventory), Some(jobs)) = (&self.snapshot.inventory, &self.snapshot.jobs) else {
            return Vec::new();
        };

        for (key, usage) in node_model_usage(inventory, &per_node(jobs)) {
            let labels = [key.node.as_str(), key.model.as_str()];
            self.alloc.with_label_values(&labels).set(usage.alloc);
            self.idle.with_label_values(&labels).set(usage.idle);
            self.total.with_label_values(&labels).set(usage.total);
            self.utilization
                .with_label_values(&labels)
                .set(usage.utilization);
        }
        gather(&self.gauges())
    }
}

/// `slurm_gpus_alloc_user{user}` plus `slurm_gpus_node{user,node}` carrying the last node seen
/// for the user.
pub struct UserGpuCollector {
    snapshot: Arc<ClusterSnapshot>,
    alloc: GaugeVec,
    node: GaugeVec,
}

impl UserGpuCollector {
    pub fn new(snapshot: Arc<ClusterSnapshot>) -> prometheus::Result<Self> {
        Ok(Self {
            snapshot,
            alloc: gauge_vec("slurm_gpus_alloc_user", "Allocated GPUs", &["user"])?,
            node: gauge_vec("slurm_gpus_node", "Allocated node", &["user", "node"])?,
        })
    }

    fn gauges(&self) -> [&GaugeVec; 2] {
        [&self.alloc, &self.node]
    }
}

impl Collector for UserGpuCollector {
    fn desc(&self) -> Vec<&Desc> {
        describe(&self.gauges())
    }

    fn collect(&self) -> Vec<MetricFamily> {
        reset(&self.gauges());
        let Some(jobs) = &self.snapshot.jobs else {
            return Vec::new();
        };

        for (user, allocation) in per_user(jobs) {
            self.alloc.with_label_values(&[user.as_str()]).set(allocation.alloc);
            self.node
                .with_label_values(&[user.as_str(), allocation.node.as_str()])
                .set(1.0);
        }
        gather(&self.gauges())
    }
}

/// `slurm_gpus_alloc_user{user,node}`.
pub struct UserNodeGpuCollector {
    snapshot: Arc<ClusterSnapshot>,
    alloc: GaugeVec,
}

impl UserNodeGpuCollector {
    pub fn new(snapshot: Arc<ClusterSnapshot>) -> prometheus::Result<Self> {
        Ok(Self {
            snapshot,
            alloc: gauge_vec(
                "slurm_gpus_alloc_user",
                "Allocated GPUs",
                &["user", "node"],
            )?,
        })
    }
}

impl Collector for UserNodeGpuCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.alloc.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.alloc.reset();
        let Some(jobs) = &self.snapshot.jobs else {
            return Vec::new();
        };

        for ((user, node), alloc) in per_user_node(jobs) {
            self.alloc
                .with_label_values(&[user.as_str(), node.as_str()])
                .set(alloc);
        }
        self.alloc.collect()
    }
}

/// Exporter self-metrics: outcome and duration of each scheduler command.
pub struct CommandStatusCollector {
    snapshot: Arc<ClusterSnapshot>,
    success: GaugeVec,
    duration: GaugeVec,
}

impl CommandStatusCollector {
    pub fn new(snapshot: Arc<ClusterSnapshot>) -> prometheus::Result<Self> {
        Ok(Self {
            snapshot,
            success: gauge_vec(
                "slurm_gpus_exporter_command_success",
                "Whether the scheduler command succeeded during this scrape",
                &["command"],
            )?,
            duration: gauge_vec(
                "slurm_gpus_exporter_command_duration_seconds",
                "Time spent running the scheduler command during this scrape",
                &["command"],
            )?,
        })
    }

    fn gauges(&self) -> [&GaugeVec; 2] {
        [&self.success, &self.duration]
    }
}

impl Collector for CommandStatusCollector {
    fn desc(&self) -> Vec<&Desc> {
        describe(&self.gauges())
    }

    fn collect(&self) -> Vec<MetricFamily> {
        reset(&self.gauges());
        for status in &self.snapshot.statuses {
            let labels = [status.command];
            self.success
                .with_label_values(&labels)
                .set(if status.success { 1.0 } else { 0.0 });
            self.duration
                .with_label_values(&labels)
                .set(status.duration.as_secs_f64());
        }
        gather(&self.gauges())
    }
}
