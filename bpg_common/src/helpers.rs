//! Small parsing helpers shared by the gateway crates.

/// Interprets an environment-style boolean. Unrecognised values fall back to `default` rather
/// than erroring, since these flags only gate optional behaviour.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
