// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Slurm compressed node lists, e.g. `nid[02357-02359,02400],login1`.

const MAX_EXPANDED_HOSTS: usize = 65_536;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostlistError {
    #[error("unbalanced brackets in host list: {0}")]
    Unbalanced(String),
    #[error("invalid range '{0}' in host list")]
    InvalidRange(String),
    #[error("host list expands to more than {MAX_EXPANDED_HOSTS} hosts")]
    TooLarge,
}

/// Expand a node list into individual host names, preserving order.
pub fn expand_hostlist(input: &str) -> Result<Vec<String>, HostlistError> {
    let mut hosts = Vec::new();
    for item in split_top_level(input.trim())? {
        if item.is_empty() {
            continue;
        }
        expand_item(item, &mut hosts)?;
        if hosts.len() > MAX_EXPANDED_HOSTS {
            return Err(HostlistError::TooLarge);
        }
    }
    Ok(hosts)
}

/// First host of a node list; empty while the job has no allocation.
/// Only the leading entry is expanded, so list size does not matter.
pub fn first_host(input: &str) -> Result<String, HostlistError> {
    match split_top_level(input.trim())?
        .into_iter()
        .find(|item| !item.is_empty())
    {
        Some(item) => first_of_item(item),
        None => Ok(String::new()),
    }
}

fn first_of_item(item: &str) -> Result<String, HostlistError> {
    let Some(open) = item.find('[') else {
        return Ok(item.to_string());
    };
    let close = item[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| HostlistError::Unbalanced(item.to_string()))?;
    let part = item[open + 1..close].split(',').next().unwrap_or_default();
    let value = range_start(part.trim())?;
    first_of_item(&format!("{}{value}{}", &item[..open], &item[close + 1..]))
}

fn range_start(part: &str) -> Result<&str, HostlistError> {
    let invalid = || HostlistError::InvalidRange(part.to_string());
    let Some((lo, hi)) = part.split_once('-') else {
        return if part.is_empty() { Err(invalid()) } else { Ok(part) };
    };
    let start: u64 = lo.parse().map_err(|_| invalid())?;
    let end: u64 = hi.parse().map_err(|_| invalid())?;
    if end < start {
        return Err(invalid());
    }
    Ok(lo)
}

/// Split on commas that are not inside brackets.
fn split_top_level(input: &str) -> Result<Vec<&str>, HostlistError> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| HostlistError::Unbalanced(input.to_string()))?;
            }
            ',' if depth == 0 => {
                items.push(input[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(HostlistError::Unbalanced(input.to_string()));
    }
    items.push(input[start..].trim());
    Ok(items)
}

fn expand_item(item: &str, out: &mut Vec<String>) -> Result<(), HostlistError> {
    let Some(open) = item.find('[') else {
        out.push(item.to_string());
        return Ok(());
    };
    let close = item[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| HostlistError::Unbalanced(item.to_string()))?;
    let prefix = &item[..open];
    let suffix = &item[close + 1..];

    for part in item[open + 1..close].split(',') {
        for value in expand_range(part.trim())? {
            // The suffix may carry further bracket groups.
            expand_item(&format!("{prefix}{value}{suffix}"), out)?;
            if out.len() > MAX_EXPANDED_HOSTS {
                return Err(HostlistError::TooLarge);
            }
        }
    }
    Ok(())
}

fn expand_range(part: &str) -> Result<Vec<String>, HostlistError> {
    let invalid = || HostlistError::InvalidRange(part.to_string());
    let Some((lo, hi)) = part.split_once('-') else {
        if part.is_empty() {
            return Err(invalid());
        }
        return Ok(vec![part.to_string()]);
    };
    let width = lo.len();
    let lo: u64 = lo.parse().map_err(|_| invalid())?;
    let hi: u64 = hi.parse().map_err(|_| invalid())?;
    if hi < lo || (hi - lo) as usize >= MAX_EXPANDED_HOSTS {
        return Err(invalid());
    }
    Ok((lo..=hi).map(|n| format!("{n:0width$}")).collect())
}
