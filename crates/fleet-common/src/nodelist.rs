//! Slurm hostlist expansion (`gpu[01-03,07],login1` → `gpu01 gpu02 gpu03 gpu07 login1`).

use crate::error::{FleetError, Result};

/// Expand a compressed Slurm node list into individual hostnames, preserving order.
///
/// Each comma-separated entry may carry at most one bracket group. Numeric ranges keep
/// the zero padding of their lower bound.
pub fn expand(nodelist: &str) -> Result<Vec<String>> {
    let nodelist = nodelist.trim();
    if nodelist.is_empty() {
        return Err(FleetError::InvalidNodeList(nodelist.to_string()));
    }

    let mut out = Vec::new();
    for entry in split_top_level(nodelist)? {
        expand_entry(entry, nodelist, &mut out)?;
    }
    Ok(out)
}

fn split_top_level(s: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        if !(0..=1).contains(&depth) {
            return Err(FleetError::InvalidNodeList(s.to_string()));
        }
    }
    if depth != 0 {
        return Err(FleetError::InvalidNodeList(s.to_string()));
    }
    parts.push(&s[start..]);
    Ok(parts)
}

fn expand_entry(entry: &str, whole: &str, out: &mut Vec<String>) -> Result<()> {
    let invalid = || FleetError::InvalidNodeList(whole.to_string());
    let entry = entry.trim();
    if entry.is_empty() {
        return Err(invalid());
    }

    let Some(open) = entry.find('[') else {
        out.push(entry.to_string());
        return Ok(());
    };
    let close = entry.find(']').ok_or_else(invalid)?;
    let (prefix, rest) = entry.split_at(open);
    let content = &rest[1..close - open];
    let suffix = &entry[close + 1..];
    if suffix.contains('[') || content.is_empty() {
        return Err(invalid());
    }

    for item in content.split(',') {
        match item.split_once('-') {
            Some((lo, hi)) => {
                let start: u32 = lo.parse().map_err(|_| invalid())?;
                let end: u32 = hi.parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                let width = lo.len();
                for n in start..=end {
                    out.push(format!("{prefix}{n:0width$}{suffix}"));
                }
            }
            None => {
                if item.is_empty() {
                    return Err(invalid());
                }
                out.push(format!("{prefix}{item}{suffix}"));
            }
        }
    }
    Ok(())
}
