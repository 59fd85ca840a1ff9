//! Source discovery and classification

use anyhow::{Context, Result};
use glob_match::glob_match;
use serde::Serialize;
use tracing::{debug, info};

use super::key::FileType;
use super::routing::RoutingTable;
use super::source::{join_path, SourceEntry, SourceSession};

/// One source file to land
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub file_type: FileType,
    pub source_path: String,
    pub file_name: String,
}

/// Lists the source directory and keeps files that match a pattern and carry
/// a recognized file type
#[derive(Debug, Clone)]
pub struct Extractor {
    base_dir: String,
    patterns: Vec<String>,
    routing: RoutingTable,
    require_route: bool,
}

impl Extractor {
    pub fn new(
        base_dir: impl Into<String>,
        patterns: Vec<String>,
        routing: RoutingTable,
        require_route: bool,
    ) -> Self {
        let patterns = patterns
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            base_dir: base_dir.into(),
            patterns,
            routing,
            require_route,
        }
    }

    pub fn matches_pattern(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| glob_match(p, name))
    }

    /// File type of a source name, if it is one we handle
    pub fn classify(&self, name: &str) -> Option<FileType> {
        let file_type = FileType::from_source_name(name)?;
        if self.require_route && !self.routing.contains(&file_type) {
            return None;
        }
        Some(file_type)
    }

    /// Filter a listing into work items, sorted by source path
    pub fn select(&self, entries: Vec<SourceEntry>) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = entries
            .into_iter()
            .filter(|e| !e.is_directory && self.matches_pattern(&e.name))
            .filter_map(|e| {
                let Some(file_type) = self.classify(&e.name) else {
                    debug!(name = %e.name, "Skipping unrecognized source file");
                    return None;
                };
                Some(WorkItem {
                    file_type,
                    source_path: join_path(&self.base_dir, &e.name),
                    file_name: e.name,
                })
            })
            .collect();

        items.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        items.dedup_by(|a, b| a.source_path == b.source_path);
        items
    }

    pub async fn discover(&self, session: &dyn SourceSession) -> Result<Vec<WorkItem>> {
        let entries = session
            .list(&self.base_dir)
            .await
            .with_context(|| format!("Failed to list source directory {}", self.base_dir))?;

        let listed = entries.len();
        let items = self.select(entries);
        info!(
            base_dir = %self.base_dir,
            listed,
            selected = items.len(),
            "Discovered source files"
        );
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(require_route: bool) -> Extractor {
        Extractor::new(
            "/outgoing",
            vec!["*.csv".to_string(), "  ".to_string()],
            RoutingTable::default(),
            require_route,
        )
    }

    #[test]
    fn test_select_filters_and_sorts() {
        let entries = vec![
            SourceEntry::file("providers_2025-11-15.csv", Some(10)),
            SourceEntry::file("payments_2025-11-15.csv", Some(10)),
            SourceEntry::file("payments_2025-11-15.txt", Some(10)),
            SourceEntry::file("claims_2025-11-15.csv", Some(10)),
            SourceEntry::file("_2025-11-15.csv", Some(10)),
            SourceEntry::directory("archive.csv"),
        ];

        let items = extractor(true).select(entries);
        let paths: Vec<&str> = items.iter().map(|i| i.source_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/outgoing/payments_2025-11-15.csv", "/outgoing/providers_2025-11-15.csv"]
        );
        assert_eq!(items[0].file_type.as_str(), "payments");
    }

    #[test]
    fn test_unrouted_types_kept_when_route_not_required() {
        let items = extractor(false).select(vec![SourceEntry::file("claims_2025-11-15.csv", None)]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].file_type.as_str(), "claims");
    }

    #[test]
    fn test_blank_patterns_match_nothing() {
        let extractor = Extractor::new("/", vec![" ".to_string()], RoutingTable::default(), true);
        assert!(!extractor.matches_pattern("payments_2025-11-15.csv"));
    }
}
