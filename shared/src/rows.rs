use std::fmt;
use std::str::FromStr;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The four tables that take part in bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Servers,
    Applications,
    Services,
    Dependencies,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Servers,
        EntityKind::Applications,
        EntityKind::Services,
        EntityKind::Dependencies,
    ];

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Servers => "servers",
            EntityKind::Applications => "applications",
            EntityKind::Services => "services",
            EntityKind::Dependencies => "dependencies",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "servers" | "server" => Ok(EntityKind::Servers),
            "applications" | "application" => Ok(EntityKind::Applications),
            "services" | "service" => Ok(EntityKind::Services),
            "dependencies" | "dependency" => Ok(EntityKind::Dependencies),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// A flat tabular record: ordered column names with textual cells.
/// `None` is SQL NULL / an empty CSV cell.
///
/// Serializes as a JSON object whose keys keep column order. On input, numeric
/// and boolean JSON values are accepted and kept as their text form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    cells: Vec<(String, Option<String>)>,
}

impl FlatRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: Option<String>) {
        self.cells.push((column.into(), value));
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(column, Some(value.into()));
        self
    }

    /// Cell value, treating a missing column, NULL and blank text alike.
    /// Non-blank values are returned as stored, surrounding whitespace included.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_deref())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for FlatRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FlatRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = FlatRow;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a flat object of column names to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FlatRow, A::Error> {
                let mut row = FlatRow::new();
                while let Some((name, value)) =
                    access.next_entry::<String, serde_json::Value>()?
                {
                    let cell = match value {
                        serde_json::Value::Null => None,
                        serde_json::Value::String(s) => Some(s),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        serde_json::Value::Bool(b) => Some(b.to_string()),
                        _ => {
                            return Err(de::Error::custom(format!(
                                "column {name} must be a scalar"
                            )))
                        }
                    };
                    row.push(name, cell);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Outcome of a best-effort import batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: usize,
    /// Rows whose unique key already exists
    pub skipped: usize,
    /// One message per rejected row
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_row_keeps_column_order() {
        let row = FlatRow::new()
            .with("id", "3")
            .with("hostname", "web-01")
            .with("cpu_cores", "4");

        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"id":"3","hostname":"web-01","cpu_cores":"4"}"#);
    }

    #[test]
    fn test_flat_row_accepts_scalars() {
        let row: FlatRow =
            serde_json::from_str(r#"{"hostname": "db-01", "cpu_cores": 8, "notes": null}"#)
                .unwrap();

        assert_eq!(row.get("cpu_cores"), Some("8"));
        assert_eq!(row.get("notes"), None);
        assert_eq!(row.columns().collect::<Vec<_>>(), ["hostname", "cpu_cores", "notes"]);

        let nested = serde_json::from_str::<FlatRow>(r#"{"tags": ["a"]}"#);
        assert!(nested.is_err());
    }

    #[test]
    fn test_blank_cells_read_as_missing() {
        let row = FlatRow::new()
            .with("owner", "   ")
            .with("notes", "  indented\n");
        assert_eq!(row.get("owner"), None);
        assert_eq!(row.get("absent"), None);
        assert_eq!(row.get("notes"), Some("  indented\n"));
    }

    #[test]
    fn test_entity_kind_parses_singular_and_plural() {
        assert_eq!("servers".parse::<EntityKind>().unwrap(), EntityKind::Servers);
        assert_eq!("dependency".parse::<EntityKind>().unwrap(), EntityKind::Dependencies);
        assert!("discovery_history".parse::<EntityKind>().is_err());
    }
}
