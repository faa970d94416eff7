//! Per-job GPU allocations parsed from `squeue -a -r -h -o "%j|%u|%R|%b"`, and the
//! node, user and (user, node) views folded from them.

use std::collections::BTreeMap;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::warn;

use super::descriptor;
use super::descriptor::GpuBinding;
use super::hostlist;
use super::ParseError;

const FIELD_DELIMITER: char = '|';

/// One running job's GPU binding.
#[derive(Debug, Clone, PartialEq)]
pub struct JobAllocation {
    pub job: String,
    pub user: String,
    /// Expanded node list; the GPU bindings apply to each node.
    pub nodes: Vec<String>,
    pub gpus: Vec<GpuBinding>,
}

impl JobAllocation {
    /// GPUs bound on each node of the job.
    pub fn gpus_per_node(&self) -> f64 {
        self.gpus.iter().map(|binding| binding.count).sum()
    }
}

/// Parses `squeue` output into allocation records.
///
/// Lines without the field delimiter are not data and are ignored. Jobs without GPUs or
/// without nodes (pending) are skipped quietly; malformed lines are skipped with a warning.
pub fn parse_allocations(output: &str) -> Vec<JobAllocation> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.contains(FIELD_DELIMITER))
        .filter_map(|line| match parse_line(line) {
            Ok(allocation) => allocation,
            Err(report) => {
                warn!(line, "Skipping malformed squeue line: {report:#}");
                None
            }
        })
        .collect()
}

fn parse_line(line: &str) -> Result<Option<JobAllocation>, Report<ParseError>> {
    // Split from the right: job names are free-form and may contain the delimiter.
    let mut fields = line.rsplitn(4, FIELD_DELIMITER).map(str::trim);
    let gres = fields.next().ok_or_else(|| missing("descriptor", line))?;
    let nodelist = non_empty(fields.next()).ok_or_else(|| missing("node", line))?;
    let user = non_empty(fields.next()).ok_or_else(|| missing("user", line))?;
    let job = fields.next().ok_or_else(|| missing("job", line))?;

    if descriptor::is_unset(gres) {
        debug!(job, user, "Job has no generic resources");
        return Ok(None);
    }
    if nodelist.starts_with('(') {
        debug!(job, user, reason = nodelist, "Job holds no nodes");
        return Ok(None);
    }

    let gpus = descriptor::decode_gpu_bindings(gres).change_context_lazy(|| {
        ParseError::InvalidDescriptor {
            line: line.to_string(),
        }
    })?;
    let nodes = hostlist::expand(nodelist).change_context_lazy(|| {
        ParseError::InvalidNodeList {
            line: line.to_string(),
        }
    })?;
    if nodes.is_empty() {
        return Err(missing("node", line));
    }

    Ok(Some(JobAllocation {
        job: job.to_string(),
        user: user.to_string(),
        nodes,
        gpus,
    }))
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.filter(|field| !field.is_empty())
}

fn missing(field: &'static str, line: &str) -> Report<ParseError> {
    Report::new(ParseError::MissingField {
        field,
        line: line.to_string(),
    })
}

/// GPUs allocated on one node across all jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAllocation {
    pub total: f64,
    /// Share of `total` whose descriptor named a model.
    pub by_model: BTreeMap<String, f64>,
    /// Share of `total` whose descriptor named no model.
    pub unattributed: f64,
}

/// GPUs allocated to one user across all their nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAllocation {
    pub alloc: f64,
    /// Last node seen for the user. Users spanning several nodes report only one.
    pub node: String,
}

/// Sums allocations per node, regardless of user.
pub fn per_node(jobs: &[JobAllocation]) -> BTreeMap<String, NodeAllocation> {
    let mut nodes: BTreeMap<String, NodeAllocation> = BTreeMap::new();
    for job in jobs {
        for node in &job.nodes {
            let entry = nodes.entry(node.clone()).or_default();
            for binding in &job.gpus {
                entry.total += binding.count;
                match &binding.model {
                    Some(model) => {
                        *entry.by_model.entry(model.clone()).or_insert(0.0) += binding.count;
                    }
                    None => entry.unattributed += binding.count,
                }
            }
        }
    }
    nodes
}

/// Sums allocations per user across all their nodes.
pub fn per_user(jobs: &[JobAllocation]) -> BTreeMap<String, UserAllocation> {
    let mut users: BTreeMap<String, UserAllocation> = BTreeMap::new();
    for job in jobs {
        let entry = users.entry(job.user.clone()).or_default();
        entry.alloc += job.gpus_per_node() * job.nodes.len() as f64;
        if let Some(node) = job.nodes.last() {
            entry.node.clone_from(node);
        }
    }
    users
}

/// Sums allocations per exact (user, node) pair.
pub fn per_user_node(jobs: &[JobAllocation]) -> BTreeMap<(String, String), f64> {
    let mut pairs: BTreeMap<(String, String), f64> = BTreeMap::new();
    for job in jobs {
        let gpus = job.gpus_per_node();
        for node in &job.nodes {
            *pairs.entry((job.user.clone(), node.clone())).or_insert(0.0) += gpus;
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn single_line_feeds_node_and_user_views() {
        let jobs = parse_allocations("job1|alice|node01|gpu:v100:1\n");

        assert_eq!(jobs.len(), 1);
        assert_eq!(per_node(&jobs)["node01"].total, 1.0);
        assert_eq!(per_user(&jobs)["alice"].alloc, 1.0);
        assert_eq!(
            per_user_node(&jobs)[&("alice".to_string(), "node01".to_string())],
            1.0
        );
    }

    #[test]
    fn skips_malformed_descriptor_without_affecting_other_lines() {
        let output = "j1|alice|node01|badformat\n\
                      j2|bob|node01|gres/gpu:v100:2\n\
                      j3|carol|node02|gres:gpu:1\n";
        let jobs = parse_allocations(output);

        assert_eq!(jobs.len(), 2);
        let nodes = per_node(&jobs);
        assert_eq!(nodes["node01"].total, 2.0);
        assert_eq!(nodes["node02"].total, 1.0);
        assert!(!per_user(&jobs).contains_key("alice"));
    }

    #[test]
    fn ignores_non_data_and_unbound_lines() {
        let output = "\n\
                      some banner\n\
                      j1|alice|(Priority)|gres/gpu:1\n\
                      j2|alice|node01|N/A\n\
                      j3||node01|gpu:1\n\
                      j4|dave|node02|gpu:v100:1\n";
        let jobs = parse_allocations(output);

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].user, "dave");
    }

    #[test]
    fn job_names_may_contain_the_delimiter() {
        let jobs = parse_allocations("train|v2|alice|node01|gpu:a100:2\n");

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job, "train|v2");
        assert_eq!(jobs[0].user, "alice");
    }

    #[test]
    fn tolerates_leading_whitespace_from_format_string() {
        let jobs = parse_allocations(" j1|alice|node01|gpu:v100:1\n");

        assert_eq!(jobs[0].job, "j1");
    }

    #[test]
    fn multi_node_jobs_count_on_every_node() {
        let jobs = parse_allocations("mpi|alice|node[01-02]|gres/gpu:v100:4\n");

        let nodes = per_node(&jobs);
        assert_eq!(nodes["node01"].total, 4.0);
        assert_eq!(nodes["node02"].total, 4.0);
        assert_eq!(per_user(&jobs)["alice"].alloc, 8.0);
        assert_eq!(per_user_node(&jobs).len(), 2);
    }

    #[test]
    fn node_view_splits_named_and_unnamed_models() {
        let jobs = parse_allocations("j1|alice|node01|gpu:v100:1\nj2|bob|node01|gpu:2\n");

        let node = &per_node(&jobs)["node01"];
        assert_eq!(node.total, 3.0);
        assert_eq!(node.by_model["v100"], 1.0);
        assert_eq!(node.unattributed, 2.0);
    }

    #[test]
    fn user_on_two_nodes_combines_alloc_and_keeps_pairs_distinct() {
        let output = "j1|alice|node01|gpu:v100:1\nj2|alice|node02|gpu:v100:2\n";
        let jobs = parse_allocations(output);

        let users = per_user(&jobs);
        assert_eq!(users["alice"].alloc, 3.0);
        assert!(["node01", "node02"].contains(&users["alice"].node.as_str()));

        let pairs = per_user_node(&jobs);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[&("alice".to_string(), "node01".to_string())], 1.0);
        assert_eq!(pairs[&("alice".to_string(), "node02".to_string())], 2.0);
    }

    #[test]
    fn reparsing_identical_input_yields_identical_views() {
        let output = "j1|alice|node01|gpu:v100:1\nj2|bob|node[01-02]|gpu:v100:2\n";

        let first = parse_allocations(output);
        let second = parse_allocations(output);
        assert_eq!(first, second);
        assert_eq!(per_node(&first), per_node(&second));
        assert_eq!(per_user(&first), per_user(&second));
        assert_eq!(per_user_node(&first), per_user_node(&second));
    }

    #[test]
    fn reports_invalid_node_list() {
        let report = parse_line("j1|alice|node[01-|gpu:1").expect_err("bad node list");

        assert!(matches!(
            report.current_context(),
            ParseError::InvalidNodeList { .. }
        ));
    }
}
