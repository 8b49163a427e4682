//! Naming heuristics for the action/service field swap.
//!
//! The oracle sometimes writes the service name into the action field and
//! the tool name into the service field. These pure checks decide when to
//! swap them back. They are a bounded pattern table, not a grammar: keep
//! every rule here so a stricter plan schema can replace them in one place.

/// Substituted when a plan names a service but no action. The resolver
/// treats it like any unknown tool name and re-selects from the catalog.
pub const DEFAULT_ACTION: &str = "auto_select";

const SERVICE_MARKERS: &[&str] = &[
    "-mcp", "_mcp", "mcp-", "mcp_", "-server", "_server", "-api", "_api", "-service", "_service",
];

const ACTION_PREFIXES: &[&str] = &[
    "get", "list", "create", "update", "delete", "send", "post", "fetch", "search", "read", "write", "add",
    "remove", "set", "find", "query", "run", "execute", "upload", "download",
];

/// How a plan's name fields were corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCorrection {
    Unchanged,
    Swapped,
    DefaultAction,
}

fn is_known(name: &str, known_services: &[&str]) -> bool {
    known_services.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Does `name` look like a capability service name? Only known names and
/// names carrying a service marker qualify; a bare kebab-case word such as
/// `summarize-trend` does not.
pub fn is_service_like(name: &str, known_services: &[&str]) -> bool {
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return false;
    }
    if is_known(name, known_services) {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    SERVICE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Does `name` look like a tool/action name?
pub fn is_action_like(name: &str, known_services: &[&str]) -> bool {
    let name = name.trim();
    if name.is_empty() || is_known(name, known_services) {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    if ACTION_PREFIXES.iter().any(|p| lower.starts_with(p)) && !lower.contains('-') {
        return true;
    }
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Swap transposed fields, or fill a missing action, in place.
pub fn correct_fields(action: &mut String, service: &mut String, known_services: &[&str]) -> FieldCorrection {
    let mut correction = FieldCorrection::Unchanged;

    let service_blank = service.trim().is_empty();
    if is_service_like(action, known_services) && (service_blank || is_action_like(service, known_services)) {
        std::mem::swap(action, service);
        correction = FieldCorrection::Swapped;
    }

    if action.trim().is_empty() && !service.trim().is_empty() {
        *action = DEFAULT_ACTION.to_string();
        correction = FieldCorrection::DefaultAction;
    }

    correction
}
