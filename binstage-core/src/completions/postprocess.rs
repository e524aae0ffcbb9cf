//! Line filters for captured completion output.

use regex::Regex;

use super::types::PostProcessRule;
use crate::error::{Result, StageError};

/// Applies `rules` in order. Line endings of kept lines are preserved.
pub fn apply(content: &str, rules: &[PostProcessRule]) -> Result<String> {
    let mut current = content.to_string();
    for rule in rules {
        current = apply_rule(&current, rule)?;
    }
    Ok(current)
}

fn apply_rule(content: &str, rule: &PostProcessRule) -> Result<String> {
    match rule {
        PostProcessRule::RemoveLinesContaining { patterns } => Ok(retain_lines(content, |line| {
            !patterns.iter().any(|p| line.contains(p.as_str()))
        })),
        PostProcessRule::RemoveLinesMatching { patterns } => {
            let regexes = patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|source| StageError::Pattern {
                        pattern: p.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(retain_lines(content, |line| {
                !regexes.iter().any(|re| re.is_match(line))
            }))
        }
    }
}

fn retain_lines(content: &str, keep: impl Fn(&str) -> bool) -> String {
    content
        .split_inclusive('\n')
        .filter(|line| keep(line.trim_end_matches(['\r', '\n'])))
        .collect()
}
