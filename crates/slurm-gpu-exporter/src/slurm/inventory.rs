//! Per-node GPU inventory parsed from `sinfo -h -o "%n %G"`.

use std::collections::BTreeMap;
use std::fmt;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::warn;

use super::descriptor;
use super::ParseError;

/// Model label used when a node advertises GPUs without a type (`gpu:4`).
pub const UNKNOWN_MODEL: &str = "unknown";

/// Identifies the GPUs of one model on one node, rendered as `<node>:<model>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuKey {
    pub node: String,
    pub model: String,
}

impl GpuKey {
    pub fn new(node: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for GpuKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.model)
    }
}

/// Total GPU count per (node, model), rebuilt from scratch on every scrape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuInventory {
    totals: BTreeMap<GpuKey, f64>,
}

impl GpuInventory {
    /// Parses `sinfo` output, skipping blank lines, GPU-less nodes and malformed lines.
    ///
    /// Slurm lists a node once per partition it belongs to; repeated lines for the same node
    /// replace each other rather than adding up.
    pub fn parse(output: &str) -> Self {
        let mut totals = BTreeMap::new();

        for line in output.lines() {
            let line = line.trim().trim_matches('"').trim();
            if line.is_empty() {
                continue;
            }

            match parse_line(line) {
                Ok(entries) => {
                    for (key, total) in entries {
                        if let Some(previous) = totals.insert(key.clone(), total) {
                            if previous != total {
                                debug!(
                                    gpu = %key,
                                    previous,
                                    total,
                                    "GPU total changed between sinfo lines"
                                );
                            }
                        }
                    }
                }
                Err(report) => {
                    warn!(line, "Skipping malformed sinfo line: {report:#}");
                }
            }
        }

        Self { totals }
    }

    pub fn get(&self, node: &str, model: &str) -> Option<f64> {
        self.totals.get(&GpuKey::new(node, model)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GpuKey, f64)> {
        self.totals.iter().map(|(key, total)| (key, *total))
    }

    /// GPU models installed on `node`, in sorted order.
    pub fn models_on<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.totals
            .keys()
            .filter(move |key| key.node == node)
            .map(|key| key.model.as_str())
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

impl FromIterator<(GpuKey, f64)> for GpuInventory {
    fn from_iter<I: IntoIterator<Item = (GpuKey, f64)>>(iter: I) -> Self {
        Self {
            totals: iter.into_iter().collect(),
        }
    }
}

/// Parses `<node> <gres>` into one entry per GPU model; GPUs of the same model on one line
/// (split across sockets) are summed.
fn parse_line(line: &str) -> Result<BTreeMap<GpuKey, f64>, Report<ParseError>> {
    let mut fields = line.split_whitespace();
    let node = fields.next().ok_or_else(|| missing("node", line))?;
    let gres = fields.next().ok_or_else(|| missing("gres", line))?;

    let mut entries = BTreeMap::new();
    if descriptor::is_unset(gres) {
        debug!(node, "Node has no generic resources");
        return Ok(entries);
    }

    let bindings = descriptor::decode_gpu_bindings(gres).change_context_lazy(|| {
        ParseError::InvalidDescriptor {
            line: line.to_string(),
        }
    })?;

    for binding in bindings {
        let model = binding.model.unwrap_or_else(|| UNKNOWN_MODEL.to_string());
        *entries.entry(GpuKey::new(node, model)).or_insert(0.0) += binding.count;
    }
    Ok(entries)
}

fn missing(field: &'static str, line: &str) -> Report<ParseError> {
    Report::new(ParseError::MissingField {
        field,
        line: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn parses_node_model_totals() {
        let inventory = GpuInventory::parse("node01 gpu:v100:4\nnode02 gpu:v100:2\n");

        assert_eq!(inventory.get("node01", "v100"), Some(4.0));
        assert_eq!(inventory.get("node02", "v100"), Some(2.0));
        assert_eq!(inventory.len(), 2);
        let keys: Vec<String> = inventory.iter().map(|(key, _)| key.to_string()).collect();
        assert_eq!(keys, vec!["node01:v100", "node02:v100"]);
    }

    #[test]
    fn trims_quotes_and_socket_annotations() {
        let inventory = GpuInventory::parse("\"node01 gpu:a100:8(S:0-1)\"\n");

        assert_eq!(inventory.get("node01", "a100"), Some(8.0));
    }

    #[test]
    fn reads_count_before_numeric_socket_spec() {
        let inventory = GpuInventory::parse("node01 gpu:v100:4:S:0\nnode02 gpu:a100:8:0\n");

        assert_eq!(inventory.get("node01", "v100"), Some(4.0));
        assert_eq!(inventory.get("node02", "a100"), Some(8.0));
        let keys: Vec<String> = inventory.iter().map(|(key, _)| key.to_string()).collect();
        assert_eq!(keys, vec!["node01:v100", "node02:a100"]);
    }

    #[test]
    fn splits_nodes_with_several_models() {
        let inventory = GpuInventory::parse("node03 gpu:v100:2,gpu:a100:4,mps:400\n");

        assert_eq!(inventory.get("node03", "v100"), Some(2.0));
        assert_eq!(inventory.get("node03", "a100"), Some(4.0));
        assert_eq!(
            inventory.models_on("node03").collect::<Vec<_>>(),
            vec!["a100", "v100"]
        );
    }

    #[test]
    fn sums_same_model_within_a_line() {
        let inventory = GpuInventory::parse("node04 gpu:a100:2(S:0),gpu:a100:2(S:1)\n");

        assert_eq!(inventory.get("node04", "a100"), Some(4.0));
    }

    #[test]
    fn records_untyped_gpus_under_unknown_model() {
        let inventory = GpuInventory::parse("node05 gpu:4\n");

        assert_eq!(inventory.get("node05", UNKNOWN_MODEL), Some(4.0));
    }

    #[test]
    fn deduplicates_nodes_listed_per_partition() {
        let inventory = GpuInventory::parse("node01 gpu:v100:4\nnode01 gpu:v100:4\n");

        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.get("node01", "v100"), Some(4.0));
    }

    #[test]
    fn skips_blank_gpu_less_and_malformed_lines() {
        let output = "\n\
                      cpu01 (null)\n\
                      node01 gpu:v100:many\n\
                      lonely-node\n\
                      node02 gpu:v100:2\n\
                      \n";
        let inventory = GpuInventory::parse(output);

        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.get("node02", "v100"), Some(2.0));
        assert!(!inventory.models_on("cpu01").any(|_| true));
    }

    #[test]
    fn reports_missing_descriptor_field() {
        let report = parse_line("lonely-node").expect_err("no gres field");

        assert_eq!(
            *report.current_context(),
            ParseError::MissingField {
                field: "gres",
                line: "lonely-node".to_string(),
            }
        );
    }

    #[test]
    fn empty_output_yields_empty_inventory() {
        assert!(GpuInventory::parse("").is_empty());
    }
}
