//! Static routing from file type to warehouse destination

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::key::{FileType, KeyError};

/// Dataset that receives raw partner tables unless configured otherwise
pub const DEFAULT_DATASET: &str = "raw_lifefile";

/// Warehouse table reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// file_type -> destination table. An unmapped type is treated exactly like
/// an unrecognized one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    dataset: String,
    tables: BTreeMap<FileType, String>,
}

impl RoutingTable {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            tables: BTreeMap::new(),
        }
    }

    pub fn with_route(mut self, file_type: FileType, table: impl Into<String>) -> Self {
        self.tables.insert(file_type, table.into());
        self
    }

    /// Parse `payments:payments_raw,providers:providers_raw`
    pub fn parse(dataset: impl Into<String>, routes: &str) -> Result<Self, KeyError> {
        let mut table = Self::new(dataset);
        for pair in routes.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (file_type, target) = pair
                .split_once(':')
                .ok_or_else(|| KeyError::InvalidFileType(pair.to_string()))?;
            let target = target.trim();
            if target.is_empty() {
                return Err(KeyError::InvalidFileType(pair.to_string()));
            }
            table = table.with_route(FileType::new(file_type)?, target);
        }
        Ok(table)
    }

    pub fn resolve(&self, file_type: &FileType) -> Option<Destination> {
        self.tables.get(file_type).map(|table| Destination {
            dataset: self.dataset.clone(),
            table: table.clone(),
        })
    }

    pub fn contains(&self, file_type: &FileType) -> bool {
        self.tables.contains_key(file_type)
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn file_types(&self) -> impl Iterator<Item = &FileType> {
        self.tables.keys()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        let mut tables = BTreeMap::new();
        for (file_type, table) in [("payments", "payments_raw"), ("providers", "providers_raw")] {
            if let Ok(ft) = FileType::new(file_type) {
                tables.insert(ft, table.to_string());
            }
        }
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes() {
        let routes = RoutingTable::default();
        let dest = routes.resolve(&FileType::new("payments").unwrap()).unwrap();
        assert_eq!(dest.to_string(), "raw_lifefile.payments_raw");
        assert!(routes.resolve(&FileType::new("claims").unwrap()).is_none());
    }

    #[test]
    fn test_parse_routes() {
        let routes = RoutingTable::parse("raw_partner", " claims:claims_raw , refunds:refunds_raw,").unwrap();
        assert_eq!(routes.file_types().count(), 2);
        assert_eq!(
            routes.resolve(&FileType::new("claims").unwrap()),
            Some(Destination {
                dataset: "raw_partner".to_string(),
                table: "claims_raw".to_string(),
            })
        );
        assert!(RoutingTable::parse("raw", "claims").is_err());
        assert!(RoutingTable::parse("raw", "claims:").is_err());
    }
}
