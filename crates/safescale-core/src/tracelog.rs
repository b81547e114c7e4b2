//! Optional trace categories.
//!
//! Verbose tracing of some subsystems is opt-in: the `SAFESCALE_OPTIONAL_LOGS`
//! environment variable holds a comma-separated list of category names
//! (e.g. `controller,stack.openstack`). The variable is read once per
//! process.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Environment variable listing the enabled optional trace categories.
pub const OPTIONAL_LOGS_ENV: &str = "SAFESCALE_OPTIONAL_LOGS";

fn enabled_categories() -> &'static HashSet<String> {
    static CATEGORIES: OnceLock<HashSet<String>> = OnceLock::new();
    CATEGORIES.get_or_init(|| {
        std::env::var(OPTIONAL_LOGS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(|c| c.trim().to_ascii_lowercase())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    })
}

/// Whether the given optional trace category is enabled.
#[must_use]
pub fn trace_enabled(category: &str) -> bool {
    let categories = enabled_categories();
    categories.contains("*") || categories.contains(&category.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_env_disables_everything() {
        // The variable is not set in the test environment.
        assert!(!trace_enabled("controller"));
        assert!(!trace_enabled(""));
    }
}
