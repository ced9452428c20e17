//! Script types and data structures.

use std::fmt;

/// Lifecycle state of a registered script.
///
/// A name with no record is unloaded. Faulted is only ever entered through
/// the error handler's threshold, and only a reload leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// Compiled and registered, not ticking.
    Loaded,
    /// Receiving `on_tick` every host tick.
    Enabled,
    /// Registered but excluded from tick dispatch.
    Disabled,
    /// Force-disabled by the circuit breaker; requires a reload.
    Faulted,
}

impl fmt::Display for ScriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScriptState::Loaded => "loaded",
            ScriptState::Enabled => "enabled",
            ScriptState::Disabled => "disabled",
            ScriptState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Result of a single `on_tick` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The script wants to keep ticking.
    Continue,
    /// The script reported it is done; the registry disables it.
    Finished,
    /// The invocation faulted and was routed to the error handler.
    Failed,
}

/// Script metadata parsed from the leading Lua comment block.
///
/// ```lua
/// -- @name Ore Miner
/// -- @description Mines the nearest iron vein
/// -- @version 1.2.0
/// -- @author kit
/// -- @category gathering
/// -- @dependencies pathing, banking
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptMetadata {
    /// Display name (@name).
    pub name: Option<String>,
    /// Description (@description).
    pub description: Option<String>,
    /// Version string (@version).
    pub version: Option<String>,
    /// Author (@author).
    pub author: Option<String>,
    /// Category (@category).
    pub category: Option<String>,
    /// Declared script dependencies (@dependencies, comma-separated).
    pub dependencies: Vec<String>,
}

impl ScriptMetadata {
    /// Parse metadata from the leading comment block of a script source.
    ///
    /// Parsing stops at the first non-comment, non-blank line.
    pub fn parse(source: &str) -> Self {
        let mut metadata = Self::default();

        for line in source.lines() {
            let line = line.trim();
            if !line.starts_with("--") {
                if !line.is_empty() {
                    break;
                }
                continue;
            }

            let comment = line.trim_start_matches("--").trim();

            if let Some(value) = comment.strip_prefix("@name ") {
                metadata.name = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix("@description ") {
                metadata.description = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix("@version ") {
                metadata.version = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix("@author ") {
                metadata.author = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix("@category ") {
                metadata.category = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix("@dependencies ") {
                metadata.dependencies = value
                    .split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect();
            }
        }

        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_full() {
        let source = r#"-- @name Ore Miner
-- @description Mines the nearest iron vein
-- @version 1.2.0
-- @author kit
-- @category gathering
-- @dependencies pathing, banking

function on_tick()
end
"#;

        let metadata = ScriptMetadata::parse(source);
        assert_eq!(metadata.name, Some("Ore Miner".to_string()));
        assert_eq!(
            metadata.description,
            Some("Mines the nearest iron vein".to_string())
        );
        assert_eq!(metadata.version, Some("1.2.0".to_string()));
        assert_eq!(metadata.author, Some("kit".to_string()));
        assert_eq!(metadata.category, Some("gathering".to_string()));
        assert_eq!(metadata.dependencies, vec!["pathing", "banking"]);
    }

    #[test]
    fn test_parse_metadata_partial() {
        let source = r#"-- @name Fisher
-- @author kit

function on_tick()
end
"#;

        let metadata = ScriptMetadata::parse(source);
        assert_eq!(metadata.name, Some("Fisher".to_string()));
        assert_eq!(metadata.author, Some("kit".to_string()));
        assert!(metadata.description.is_none());
        assert!(metadata.version.is_none());
        assert!(metadata.dependencies.is_empty());
    }

    #[test]
    fn test_parse_metadata_empty() {
        let metadata = ScriptMetadata::parse("function on_tick() end");
        assert_eq!(metadata, ScriptMetadata::default());
    }

    #[test]
    fn test_parse_metadata_stops_at_code() {
        let source = r#"-- @name First
local x = 1
-- @name Second
"#;

        let metadata = ScriptMetadata::parse(source);
        assert_eq!(metadata.name, Some("First".to_string()));
    }

    #[test]
    fn test_parse_dependencies_trimmed() {
        let source = "-- @dependencies  pathing ,  , banking \n";

        let metadata = ScriptMetadata::parse(source);
        assert_eq!(metadata.dependencies, vec!["pathing", "banking"]);
    }

    #[test]
    fn test_parse_metadata_allows_blank_lines() {
        let source = "\n\n-- @name Spaced\n";

        let metadata = ScriptMetadata::parse(source);
        assert_eq!(metadata.name, Some("Spaced".to_string()));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ScriptState::Loaded.to_string(), "loaded");
        assert_eq!(ScriptState::Enabled.to_string(), "enabled");
        assert_eq!(ScriptState::Disabled.to_string(), "disabled");
        assert_eq!(ScriptState::Faulted.to_string(), "faulted");
    }
}
