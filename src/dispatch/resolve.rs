//! Ordered command lookup for one target node.
//!
//! Lookup order, first match wins:
//! 1. node id (decimal string)
//! 2. exact display name
//! 3. normalized display name (both sides normalized)
//!
//! Blank commands count as absent.

use serde::Serialize;

use crate::model::{CommandMap, Node};

/// Which key of the command map matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKey {
    Id,
    Name,
    NormalizedName,
}

/// A command selected for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand<'a> {
    pub key: CommandKey,
    /// The map key that matched, as written in the map.
    pub matched: &'a str,
    pub command: &'a str,
}

/// Canonical name form: trimmed and Unicode-lowercased.
///
/// ```
/// use switchboard::dispatch::normalize_name;
///
/// assert_eq!(normalize_name("  Wall-Ä "), "wall-ä");
/// ```
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Resolves the command for `node`.
pub fn resolve_command<'a>(commands: &'a CommandMap, node: &Node) -> Option<ResolvedCommand<'a>> {
    let usable = |(k, v): (&'a String, &'a String)| {
        (!v.trim().is_empty()).then_some((k.as_str(), v.as_str()))
    };

    if let Some((matched, command)) = commands
        .get_key_value(&node.id.to_string())
        .and_then(usable)
    {
        return Some(ResolvedCommand {
            key: CommandKey::Id,
            matched,
            command,
        });
    }

    if let Some((matched, command)) = commands
        .get_key_value(node.name.as_str())
        .and_then(usable)
    {
        return Some(ResolvedCommand {
            key: CommandKey::Name,
            matched,
            command,
        });
    }

    let target = normalize_name(&node.name);
    commands
        .iter()
        .filter(|(k, _)| normalize_name(k) == target)
        .find_map(usable)
        .map(|(matched, command)| ResolvedCommand {
            key: CommandKey::NormalizedName,
            matched,
            command,
        })
}
