//! Decoding of Slurm generic resource binding descriptors.
//!
//! Both `sinfo %G` and `squeue %b` print descriptors such as `gpu:v100:4`, `gres/gpu:a100:2`,
//! `gres:gpu:2` or `cpu:4/gpu:a100:2`. GPU segments are located by their `gpu` tag, never by
//! position, since Slurm does not guarantee the order of resource types.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

const GPU_TAG: &str = "gpu";
const GRES_TAG: &str = "gres";

/// Values Slurm prints when a node or job has no generic resources at all.
const UNSET_DESCRIPTORS: [&str; 3] = ["", "N/A", "(null)"];

/// Errors raised while decoding a descriptor.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[display("No GPU segment in descriptor `{descriptor}`")]
    MissingGpuSegment { descriptor: String },
    #[display("GPU segment `{segment}` has no count")]
    MalformedSegment { segment: String },
    #[display("Invalid GPU count `{value}` in segment `{segment}`")]
    InvalidCount { segment: String, value: String },
}

impl Error for DescriptorError {}

/// A single GPU binding extracted from a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuBinding {
    /// GPU model, when the descriptor names one (`gpu:v100:2`).
    pub model: Option<String>,
    pub count: f64,
}

/// Returns true when Slurm reported no generic resources for the node or job.
pub fn is_unset(descriptor: &str) -> bool {
    UNSET_DESCRIPTORS.contains(&descriptor.trim())
}

/// Decodes every GPU binding in `descriptor`.
///
/// Segments are separated by `/` or `,`. Parenthesised annotations such as socket affinity
/// (`gpu:v100:4(S:0-1)`) or device indices (`gpu:a100:2(IDX:0,2)`) are ignored.
///
/// # Errors
///
/// - [`DescriptorError::MissingGpuSegment`] if no segment carries the `gpu` tag
/// - [`DescriptorError::MalformedSegment`] if a GPU segment has nothing after its tag
/// - [`DescriptorError::InvalidCount`] if the count field is not a finite, non-negative number
pub fn decode_gpu_bindings(descriptor: &str) -> Result<Vec<GpuBinding>, Report<DescriptorError>> {
    let stripped = strip_annotations(descriptor);
    let mut bindings = Vec::new();

    for segment in stripped
        .split(['/', ','])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
    {
        let Some(fields) = gpu_fields(segment) else {
            continue;
        };
        bindings.push(parse_binding(segment, &fields)?);
    }

    if bindings.is_empty() {
        return Err(Report::new(DescriptorError::MissingGpuSegment {
            descriptor: descriptor.to_string(),
        }));
    }

    Ok(bindings)
}

/// Decodes the total GPU count bound by `descriptor`.
///
/// # Errors
///
/// Same as [`decode_gpu_bindings`].
pub fn decode_gpu_count(descriptor: &str) -> Result<f64, Report<DescriptorError>> {
    Ok(decode_gpu_bindings(descriptor)?
        .iter()
        .map(|binding| binding.count)
        .sum())
}

/// Removes every parenthesised group, including nested ones.
fn strip_annotations(descriptor: &str) -> String {
    let mut depth = 0usize;
    descriptor
        .chars()
        .filter(|c| match c {
            '(' => {
                depth += 1;
                false
            }
            ')' => {
                depth = depth.saturating_sub(1);
                false
            }
            _ => depth == 0,
        })
        .collect()
}

/// Returns the colon separated fields following the `gpu` tag, or `None` for other resources.
fn gpu_fields(segment: &str) -> Option<Vec<&str>> {
    let mut fields = segment.split(':').peekable();
    if fields.peek() == Some(&GRES_TAG) {
        fields.next();
    }
    if fields.next()? != GPU_TAG {
        return None;
    }
    Some(fields.collect())
}

fn parse_binding(segment: &str, fields: &[&str]) -> Result<GpuBinding, Report<DescriptorError>> {
    // gpu:<model>:<count>:<socket-spec>, where the socket spec may itself end in a number
    if let [model, count, _, ..] = fields {
        if let Some(count) = parse_count(count) {
            return Ok(GpuBinding {
                model: Some(model.to_string()),
                count,
            });
        }
    }

    let Some((last, rest)) = fields.split_last() else {
        return Err(Report::new(DescriptorError::MalformedSegment {
            segment: segment.to_string(),
        }));
    };

    match parse_count(last) {
        Some(count) => Ok(GpuBinding {
            model: (!rest.is_empty()).then(|| rest.join(":")),
            count,
        }),
        None => Err(Report::new(DescriptorError::InvalidCount {
            segment: segment.to_string(),
            value: last.to_string(),
        })),
    }
}

fn parse_count(field: &str) -> Option<f64> {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|count| count.is_finite() && *count >= 0.0)
}
