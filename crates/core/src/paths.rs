use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".tabscope"))
            .unwrap_or_else(|| PathBuf::from(".tabscope"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn records_dir(&self) -> PathBuf {
        self.base.join("records")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-tab record directory under `records_dir`. Target ids are sanitised so
/// they are always a single path component.
pub fn tab_dir(records_dir: &Path, tab_id: &str) -> PathBuf {
    records_dir.join(sanitize_component(tab_id))
}

pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '.' | ' ' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
