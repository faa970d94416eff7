//! Expansion of Slurm compact host lists such as `node[01-03,07],gpu-a[1-2]`.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Upper bound on the number of hosts a single expression may expand to.
const MAX_HOSTS: usize = 65_536;

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum HostlistError {
    #[display("Unbalanced brackets in host list `{expression}`")]
    UnbalancedBrackets { expression: String },
    #[display("Invalid range `{range}` in host list `{expression}`")]
    InvalidRange { expression: String, range: String },
    #[display("Host list `{expression}` expands to more than {MAX_HOSTS} hosts")]
    TooManyHosts { expression: String },
}

impl Error for HostlistError {}

/// Expands a compact host list into individual host names, preserving order and zero padding.
///
/// # Errors
///
/// - [`HostlistError::UnbalancedBrackets`] if a `[` has no matching `]` or vice versa
/// - [`HostlistError::InvalidRange`] if a bracket range is not numeric or descending
/// - [`HostlistError::TooManyHosts`] if the expansion exceeds the host limit
pub fn expand(expression: &str) -> Result<Vec<String>, Report<HostlistError>> {
    let mut hosts = Vec::new();
    for item in split_top_level(expression)? {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        hosts.extend(expand_item(expression, item)?);
        if hosts.len() > MAX_HOSTS {
            return Err(too_many_hosts(expression));
        }
    }
    Ok(hosts)
}

/// Splits on commas that are not inside brackets.
fn split_top_level(expression: &str) -> Result<Vec<&str>, Report<HostlistError>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (index, c) in expression.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| unbalanced(expression))?;
            }
            ',' if depth == 0 => {
                items.push(&expression[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(unbalanced(expression));
    }
    items.push(&expression[start..]);
    Ok(items)
}

/// Expands one host item, which may contain several bracket groups (`rack[1-2]-n[01-02]`).
fn expand_item(expression: &str, item: &str) -> Result<Vec<String>, Report<HostlistError>> {
    let Some(open) = item.find('[') else {
        if item.contains(']') {
            return Err(unbalanced(expression));
        }
        return Ok(vec![item.to_string()]);
    };
    let close = item[open..]
        .find(']')
        .map(|offset| open + offset)
        .ok_or_else(|| unbalanced(expression))?;

    let prefix = &item[..open];
    let suffixes = expand_item(expression, &item[close + 1..])?;

    let mut hosts = Vec::new();
    for range in item[open + 1..close].split(',') {
        for index in expand_range(expression, range.trim())? {
            for suffix in &suffixes {
                hosts.push(format!("{prefix}{index}{suffix}"));
                if hosts.len() > MAX_HOSTS {
                    return Err(too_many_hosts(expression));
                }
            }
        }
    }
    Ok(hosts)
}

/// Expands `07` or `01-03` into zero padded indices.
fn expand_range(expression: &str, range: &str) -> Result<Vec<String>, Report<HostlistError>> {
    let invalid = || {
        Report::new(HostlistError::InvalidRange {
            expression: expression.to_string(),
            range: range.to_string(),
        })
    };

    let (start, end) = range.split_once('-').unwrap_or((range, range));
    let width = start.len();
    let first: u64 = start.parse().map_err(|_| invalid())?;
    let last: u64 = end.parse().map_err(|_| invalid())?;
    if last < first {
        return Err(invalid());
    }
    if last - first >= MAX_HOSTS as u64 {
        return Err(too_many_hosts(expression));
    }

    Ok((first..=last)
        .map(|index| format!("{index:0width$}"))
        .collect())
}

fn unbalanced(expression: &str) -> Report<HostlistError> {
    Report::new(HostlistError::UnbalancedBrackets {
        expression: expression.to_string(),
    })
}

fn too_many_hosts(expression: &str) -> Report<HostlistError> {
    Report::new(HostlistError::TooManyHosts {
        expression: expression.to_string(),
    })
}
