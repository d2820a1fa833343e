//! Catalog entities, raw rows and the persisted monitoring observation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Farm as loaded from the administrative catalog (`fincas`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Farm {
    pub id: Uuid,
    pub name: String,
    /// GeoJSON polygon, kept opaque: ingestion never reads it
    pub boundary: Option<serde_json::Value>,
}

/// Block (sector) of a farm (`bloques`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Block {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub name: String,
    pub plant_count: Option<i32>,
    pub sample_pct: Option<f64>,
    pub sample_count: Option<i32>,
}

/// One decoded cell. Header presence varies per source file, so rows stay
/// dynamic until the validator extracts typed fields from them.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Empty,
}

impl Cell {
    /// String form used by every coercion. Integral numbers print without a
    /// fractional part so a serial date cell `44200.0` reads as `44200`.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => format_number(*n),
            Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
            Cell::Empty => String::new(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Empty => true,
            Cell::Number(_) | Cell::Date(_) => false,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// A decoded input line: header -> cell, in source column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, Cell)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, header: impl Into<String>, cell: Cell) {
        self.cells.push((header.into(), cell));
    }

    /// Exact header lookup (first column carrying that header)
    pub fn get(&self, header: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, c)| c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.cells.iter().map(|(h, c)| (h.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<H: Into<String>> FromIterator<(H, Cell)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (H, Cell)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().map(|(h, c)| (h.into(), c)).collect(),
        }
    }
}

/// Maximum presence units a single plant sample can show across the five
/// organ categories (12 units each).
pub const SEVERITY_UNITS: f64 = 60.0;

/// A validated monitoring observation ready for upsert (`monitoreos`).
///
/// Counts are always `>= 0`, coordinates are inside the geographic range and
/// `fingerprint` is derived from the other fields by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub farm_id: Uuid,
    pub block_id: Option<Uuid>,
    pub lat: f64,
    pub lon: f64,
    pub technician: Option<String>,
    pub shoots: i32,
    pub mature_leaves: i32,
    pub fruits: i32,
    pub flower_buds: i32,
    pub buds: i32,
    pub fingerprint: String,
}

impl Observation {
    pub fn total_positive(&self) -> i64 {
        [
            self.shoots,
            self.mature_leaves,
            self.fruits,
            self.flower_buds,
            self.buds,
        ]
        .iter()
        .map(|&c| i64::from(c))
        .sum()
    }

    /// Severity percentage used by the dashboard views, capped at 100
    pub fn severity_pct(&self) -> f64 {
        ((self.total_positive() as f64 / SEVERITY_UNITS) * 100.0).min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(counts: [i32; 5]) -> Observation {
        Observation {
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            farm_id: Uuid::nil(),
            block_id: None,
            lat: 19.6,
            lon: -71.3,
            technician: None,
            shoots: counts[0],
            mature_leaves: counts[1],
            fruits: counts[2],
            flower_buds: counts[3],
            buds: counts[4],
            fingerprint: String::new(),
        }
    }

    #[test]
    fn test_cell_text_forms() {
        assert_eq!(Cell::Number(44200.0).as_text(), "44200");
        assert_eq!(Cell::Number(19.5).as_text(), "19.5");
        assert_eq!(Cell::Empty.as_text(), "");
        assert_eq!(
            Cell::Date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()).as_text(),
            "2024-03-05"
        );
    }

    #[test]
    fn test_cell_blank() {
        assert!(Cell::Text("   ".into()).is_blank());
        assert!(Cell::Empty.is_blank());
        assert!(!Cell::Number(0.0).is_blank());
    }

    #[test]
    fn test_raw_row_exact_lookup_keeps_first() {
        let row: RawRow = vec![
            ("Finca", Cell::Text("A".into())),
            ("Finca", Cell::Text("B".into())),
        ]
        .into_iter()
        .collect();
        assert_eq!(row.get("Finca"), Some(&Cell::Text("A".into())));
        assert_eq!(row.get("finca"), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_severity() {
        assert_eq!(observation([0, 0, 0, 0, 0]).severity_pct(), 0.0);
        assert_eq!(observation([6, 6, 6, 6, 6]).severity_pct(), 50.0);
        assert_eq!(observation([12, 12, 12, 12, 40]).severity_pct(), 100.0);
    }
}
