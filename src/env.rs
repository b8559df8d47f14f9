//! Process-wide switches read once from the environment.

use std::env;
use std::sync::OnceLock;

static FUSE_RS_EAGER: OnceLock<bool> = OnceLock::new();
static FUSE_RS_DUMP_SOURCE: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn flag(cell: &OnceLock<bool>, name: &str) -> bool {
    *cell.get_or_init(|| match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// `FUSE_RS_EAGER`: fused calls run the body op by op instead of compiling.
pub(crate) fn eager_enabled() -> bool {
    flag(&FUSE_RS_EAGER, "FUSE_RS_EAGER")
}

/// `FUSE_RS_DUMP_SOURCE`: generated kernel source is logged at debug level.
pub(crate) fn dump_source_enabled() -> bool {
    flag(&FUSE_RS_DUMP_SOURCE, "FUSE_RS_DUMP_SOURCE")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("1"));
        assert!(parse_bool(" TRUE "));
        assert!(parse_bool("on"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
        assert!(!parse_bool("maybe"));
    }
}
