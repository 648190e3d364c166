use std::path::PathBuf;

use dirs_next::home_dir;

/// Expands a leading `~` to the user's home directory and trims surrounding whitespace.
///
/// Workflow locations and config overrides are often typed by hand, so both
/// `~/jobs/export.yaml` and the Windows-style `~\jobs\export.yaml` are accepted.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if trimmed == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = trimmed.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_plain_paths_untouched() {
        assert_eq!(expand_tilde("  jobs/export.yaml "), PathBuf::from("jobs/export.yaml"));
    }

    #[test]
    fn expands_home_prefix() {
        let Some(home) = home_dir() else {
            return;
        };
        assert_eq!(expand_tilde("~/jobs/export.yaml"), home.join("jobs/export.yaml"));
        assert_eq!(expand_tilde("~"), home);
    }
}
