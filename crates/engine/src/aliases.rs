//! Service-name normalization.
//!
//! Plans name services loosely ("gh", "Slack", "weather-mcp"). Normalization
//! trims and lower-cases the request, then tries, in order: an exact
//! case-insensitive match against the available services, the alias table,
//! and finally the name with service markers stripped.

use std::collections::BTreeMap;

const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("gh", "github"),
    ("git-hub", "github"),
    ("gcal", "google-calendar"),
    ("calendar", "google-calendar"),
    ("gmail", "google-mail"),
    ("mail", "google-mail"),
    ("drive", "google-drive"),
    ("gdrive", "google-drive"),
    ("sheets", "google-sheets"),
    ("docs", "google-docs"),
    ("ms-teams", "teams"),
    ("msteams", "teams"),
    ("x", "twitter"),
];

const STRIPPABLE: &[&str] = &["-mcp", "_mcp", "-server", "_server", "-api", "_api", "-service", "_service"];

#[derive(Debug, Clone)]
pub struct ServiceAliases {
    table: BTreeMap<String, String>,
}

impl Default for ServiceAliases {
    fn default() -> Self {
        Self {
            table: BUILTIN_ALIASES
                .iter()
                .map(|(a, c)| (a.to_string(), c.to_string()))
                .collect(),
        }
    }
}

impl ServiceAliases {
    /// Builtin aliases extended (and overridden) by `extra`.
    pub fn with_extra<'a>(mut self, extra: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (alias, canonical) in extra {
            self.table.insert(alias.trim().to_lowercase(), canonical.trim().to_string());
        }
        self
    }

    pub fn canonical(&self, alias: &str) -> Option<&str> {
        self.table.get(&alias.trim().to_lowercase()).map(String::as_str)
    }

    /// Canonical spelling of `requested` among `available`, if any.
    ///
    /// When nothing matches, the trimmed lower-cased request is returned
    /// so the caller can report it; the engine treats it as unknown.
    pub fn normalize(&self, requested: &str, available: &[&str]) -> String {
        let lower = requested.trim().to_lowercase();
        let find = |name: &str| {
            available
                .iter()
                .find(|s| s.eq_ignore_ascii_case(name))
                .map(|s| s.to_string())
        };

        if let Some(found) = find(&lower) {
            return found;
        }
        if let Some(found) = self.canonical(&lower).and_then(find) {
            return found;
        }
        for marker in STRIPPABLE {
            if let Some(stem) = lower.strip_suffix(marker) {
                if let Some(found) = find(stem).or_else(|| self.canonical(stem).and_then(find)) {
                    return found;
                }
            }
        }
        self.canonical(&lower).map(str::to_string).unwrap_or(lower)
    }

    /// Alias names whose canonical service is one of `available`.
    pub fn aliases_of(&self, available: &[&str]) -> Vec<&str> {
        self.table
            .iter()
            .filter(|(_, canonical)| available.iter().any(|s| s.eq_ignore_ascii_case(canonical)))
            .map(|(alias, _)| alias.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVAILABLE: &[&str] = &["github", "google-calendar", "Slack", "weather"];

    #[test]
    fn exact_match_keeps_canonical_spelling() {
        let aliases = ServiceAliases::default();
        assert_eq!(aliases.normalize(" slack ", AVAILABLE), "Slack");
        assert_eq!(aliases.normalize("GITHUB", AVAILABLE), "github");
    }

    #[test]
    fn builtin_aliases() {
        let aliases = ServiceAliases::default();
        assert_eq!(aliases.normalize("gh", AVAILABLE), "github");
        assert_eq!(aliases.normalize("gcal", AVAILABLE), "google-calendar");
    }

    #[test]
    fn markers_are_stripped() {
        let aliases = ServiceAliases::default();
        assert_eq!(aliases.normalize("weather-mcp", AVAILABLE), "weather");
        assert_eq!(aliases.normalize("gh_server", AVAILABLE), "github");
    }

    #[test]
    fn configured_aliases_extend_builtins() {
        let extra = BTreeMap::from([("forecast".to_string(), "weather".to_string())]);
        let aliases = ServiceAliases::default().with_extra(&extra);
        assert_eq!(aliases.normalize("Forecast", AVAILABLE), "weather");
        assert_eq!(aliases.normalize("gh", AVAILABLE), "github");
    }

    #[test]
    fn unknown_names_are_reported_lowercased() {
        let aliases = ServiceAliases::default();
        assert_eq!(aliases.normalize("Jira", AVAILABLE), "jira");
    }

    #[test]
    fn aliases_of_available_services() {
        let aliases = ServiceAliases::default();
        let names = aliases.aliases_of(&["github", "Teams"]);
        assert_eq!(names, vec!["gh", "git-hub", "ms-teams", "msteams"]);
        assert!(aliases.aliases_of(&["jira"]).is_empty());
    }
}
