//! Row validation and normalization.
//!
//! Each raw row goes through a fixed sequence of checks; the first failing
//! check rejects the row with one reason and the remaining checks are skipped.
//! Row problems are returned as data, never as errors.

use std::fmt;

use serde::Serialize;

use crate::catalog::{CatalogResolver, FarmMatch};
use crate::model::{Cell, Observation, RawRow};
use crate::normalize::{normalize_text, parse_date_flexible, parse_iso_date, to_float, to_int};

/// Source line of the header row
pub const HEADER_LINE: usize = 1;
/// Source line of the first data row; row index 0 is reported as this line
pub const FIRST_DATA_LINE: usize = HEADER_LINE + 1;

/// Separator between fingerprint components
pub const FINGERPRINT_DELIMITER: &str = "|";

// =============================================================================
// HEADER SYNONYMS
// =============================================================================

/// Logical input fields, each with its accepted header spellings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    Farm,
    Block,
    Latitude,
    Longitude,
    Technician,
    Shoots,
    MatureLeaves,
    Fruits,
    FlowerBuds,
    Buds,
}

impl Field {
    /// Accepted headers in match priority order. The numbered forms are the
    /// column names of the EpiCollect field-app export.
    pub fn synonyms(&self) -> &'static [&'static str] {
        match self {
            Field::Date => &["Fecha", "FECHA", "date", "DATE", "1_Fecha"],
            Field::Farm => &["Finca", "FINCA", "Farm", "FARM", "4_Finca"],
            Field::Block => &["Bloque", "BLOQUE", "Block", "BLOCK", "5_BloqueSector"],
            Field::Latitude => &[
                "Lat",
                "LAT",
                "Latitud",
                "LATITUD",
                "Latitude",
                "LATITUDE",
                "lat_6_Geolocalizacin",
            ],
            Field::Longitude => &[
                "Lon",
                "LON",
                "Longitud",
                "LONGITUD",
                "Lng",
                "LNG",
                "Longitude",
                "LONGITUDE",
                "long_6_Geolocalizacin",
            ],
            Field::Technician => &[
                "Técnico",
                "Tecnico",
                "TECNICO",
                "Tecnico/a",
                "TECNICO/A",
                "Tecnician",
                "Technician",
                "3_Técnico",
                "3_Tcnico",
            ],
            Field::Shoots => &["Brotes", "BROTES", "brotes_pos", "BROTES_POS", "10_Brotes_hojas"],
            Field::MatureLeaves => &[
                "Hojas",
                "HOJAS",
                "Hojas_adultas",
                "HOJAS_ADULTAS",
                "hojas_adultas_pos",
                "HOJAS_ADULTAS_POS",
                "11_Hojas_adultas",
            ],
            Field::Fruits => &[
                "Limones",
                "LIMONES",
                "limones_pos",
                "LIMONES_POS",
                "12_Brotes_limones",
            ],
            Field::FlowerBuds => &[
                "Botones",
                "BOTONES",
                "botones_pos",
                "BOTONES_POS",
                "13_Botone_florales",
            ],
            Field::Buds => &["Yemas", "YEMAS", "yemas_pos", "YEMAS_POS", "14_Yemas"],
        }
    }
}

/// Two passes: exact header match in synonym order, then normalized match in
/// row column order. Extra columns are ignored.
pub fn pick<'a>(row: &'a RawRow, synonyms: &[&str]) -> Option<&'a Cell> {
    if let Some(cell) = synonyms.iter().find_map(|s| row.get(s)) {
        return Some(cell);
    }
    let wanted: Vec<String> = synonyms.iter().map(|s| normalize_text(s)).collect();
    row.iter()
        .find(|(header, _)| {
            let key = normalize_text(header);
            wanted.iter().any(|w| *w == key)
        })
        .map(|(_, cell)| cell)
}

// =============================================================================
// OUTCOMES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidDate,
    FarmNotFound,
    FarmAmbiguous,
    InvalidCoordinates,
    BlockNotFound,
}

impl RejectReason {
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::InvalidDate => "invalid date",
            RejectReason::FarmNotFound => "farm not found in catalog",
            RejectReason::FarmAmbiguous => "farm name is ambiguous in catalog",
            RejectReason::InvalidCoordinates => "invalid lat/lon",
            RejectReason::BlockNotFound => "block not found for that farm",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A row that did not make it, reported back to the operator only
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    /// Source line (header is line 1)
    pub row_number: usize,
    pub reason: RejectReason,
    pub raw_value: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub valid: Vec<Observation>,
    pub errors: Vec<Rejection>,
}

impl ValidationReport {
    pub fn total(&self) -> usize {
        self.valid.len() + self.errors.len()
    }
}

/// First `limit` rejections for display plus how many were left out
pub fn display_errors(errors: &[Rejection], limit: usize) -> (&[Rejection], usize) {
    let shown = &errors[..errors.len().min(limit)];
    (shown, errors.len() - shown.len())
}

// =============================================================================
// VALIDATION
// =============================================================================

pub fn validate_rows(rows: &[RawRow], catalog: &CatalogResolver) -> ValidationReport {
    let mut report = ValidationReport::default();
    for (idx, row) in rows.iter().enumerate() {
        match validate_row(row, catalog) {
            Ok(observation) => report.valid.push(observation),
            Err((reason, raw_value)) => report.errors.push(Rejection {
                row_number: idx + FIRST_DATA_LINE,
                reason,
                raw_value,
            }),
        }
    }
    report
}

fn validate_row(
    row: &RawRow,
    catalog: &CatalogResolver,
) -> Result<Observation, (RejectReason, String)> {
    let empty = Cell::Empty;
    let field = |f: Field| pick(row, f.synonyms()).unwrap_or(&empty);

    let date_raw = field(Field::Date);
    let date = parse_date_flexible(date_raw)
        .and_then(|iso| parse_iso_date(&iso))
        .ok_or_else(|| (RejectReason::InvalidDate, date_raw.as_text()))?;

    let farm_raw = field(Field::Farm).as_text();
    let farm = match catalog.resolve_farm(&farm_raw) {
        FarmMatch::Found(farm) => farm,
        FarmMatch::Ambiguous => return Err((RejectReason::FarmAmbiguous, farm_raw)),
        FarmMatch::NotFound => return Err((RejectReason::FarmNotFound, farm_raw)),
    };

    let (lat_raw, lon_raw) = (field(Field::Latitude), field(Field::Longitude));
    let (lat, lon) = (to_float(lat_raw), to_float(lon_raw));
    if !valid_coordinates(lat, lon) {
        return Err((
            RejectReason::InvalidCoordinates,
            format!("lat={} lon={}", lat_raw.as_text(), lon_raw.as_text()),
        ));
    }

    let block_raw = field(Field::Block);
    let block_id = if block_raw.is_blank() {
        None
    } else {
        let name = block_raw.as_text();
        match catalog.resolve_block(farm.id, &name) {
            Some(id) => Some(id),
            None => return Err((RejectReason::BlockNotFound, name)),
        }
    };

    let technician = Some(field(Field::Technician).as_text().trim().to_string())
        .filter(|t| !t.is_empty());

    let count = |f: Field| clamp_count(to_int(field(f), 0));

    let mut observation = Observation {
        date,
        farm_id: farm.id,
        block_id,
        lat,
        lon,
        technician,
        shoots: count(Field::Shoots),
        mature_leaves: count(Field::MatureLeaves),
        fruits: count(Field::Fruits),
        flower_buds: count(Field::FlowerBuds),
        buds: count(Field::Buds),
        fingerprint: String::new(),
    };
    observation.fingerprint = fingerprint(&observation);
    Ok(observation)
}

fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}

/// Negative counts become 0; they are never a rejection
fn clamp_count(n: i64) -> i32 {
    n.clamp(0, i64::from(i32::MAX)) as i32
}

/// Dedup key: date, farm, block, coordinates at 6 decimals and the
/// normalized technician, joined with [`FINGERPRINT_DELIMITER`].
pub fn fingerprint(o: &Observation) -> String {
    [
        o.date.format("%Y-%m-%d").to_string(),
        o.farm_id.to_string(),
        o.block_id.map(|b| b.to_string()).unwrap_or_default(),
        fixed6(o.lat),
        fixed6(o.lon),
        normalize_text(o.technician.as_deref().unwrap_or("")),
    ]
    .join(FINGERPRINT_DELIMITER)
}

fn fixed6(v: f64) -> String {
    let s = format!("{:.6}", v);
    // -0.0000001 rounds to "-0.000000"; keep one spelling of zero
    if s.trim_start_matches('-').bytes().all(|b| b == b'0' || b == b'.') {
        "0.000000".to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Block, Farm};
    use std::collections::HashMap;
    use uuid::Uuid;

    const NORTE: u128 = 1;
    const CEMENTERIO: u128 = 2;
    const BLOQUE_3: u128 = 10;

    fn catalog() -> CatalogResolver {
        let farms = vec![
            Farm {
                id: Uuid::from_u128(NORTE),
                name: "Finca Norte".into(),
                boundary: None,
            },
            Farm {
                id: Uuid::from_u128(CEMENTERIO),
                name: "B. Cementerio".into(),
                boundary: None,
            },
        ];
        let mut blocks = HashMap::new();
        blocks.insert(
            Uuid::from_u128(NORTE),
            vec![Block {
                id: Uuid::from_u128(BLOQUE_3),
                farm_id: Uuid::from_u128(NORTE),
                name: "Bloque 3".into(),
                plant_count: Some(120),
                sample_pct: Some(10.0),
                sample_count: Some(12),
            }],
        );
        CatalogResolver::build(farms, blocks)
    }

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(h, v)| {
                let cell = if v.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(v.to_string())
                };
                (*h, cell)
            })
            .collect()
    }

    fn good_row() -> RawRow {
        row(&[
            ("Fecha", "05/03/2024"),
            ("Finca", "Finca Norte"),
            ("Bloque", "Bloque 3"),
            ("Lat", "19.649244"),
            ("Lon", "-71.294723"),
            ("Técnico", "Samuel Jiménez"),
            ("Brotes", "1"),
            ("Hojas", "11"),
            ("Limones", "0"),
            ("Botones", "2"),
            ("Yemas", "-3"),
        ])
    }

    // -------------------------------------------------------------------------
    // FIELD EXTRACTION
    // -------------------------------------------------------------------------

    #[test]
    fn test_pick_exact_then_normalized() {
        let r = row(&[("fecha ", "a"), ("FECHA", "b")]);
        assert_eq!(pick(&r, Field::Date.synonyms()), Some(&Cell::Text("b".into())));

        let r = row(&[("  latitúd ", "19.5")]);
        assert_eq!(pick(&r, Field::Latitude.synonyms()), Some(&Cell::Text("19.5".into())));

        let r = row(&[("TÉCNICO", "Ana")]);
        assert_eq!(pick(&r, Field::Technician.synonyms()), Some(&Cell::Text("Ana".into())));

        let r = row(&[("Observaciones", "x")]);
        assert_eq!(pick(&r, Field::Farm.synonyms()), None);
    }

    #[test]
    fn test_pick_epicollect_headers() {
        let r = row(&[("4_Finca", "B. Cementerio"), ("lat_6_Geolocalizacin", "19.6")]);
        assert!(pick(&r, Field::Farm.synonyms()).is_some());
        assert!(pick(&r, Field::Latitude.synonyms()).is_some());
    }

    // -------------------------------------------------------------------------
    // VALID ROWS
    // -------------------------------------------------------------------------

    #[test]
    fn test_valid_row_fields() {
        let report = validate_rows(&[good_row()], &catalog());
        assert!(report.errors.is_empty());
        let o = &report.valid[0];
        assert_eq!(o.date.to_string(), "2024-03-05");
        assert_eq!(o.farm_id, Uuid::from_u128(NORTE));
        assert_eq!(o.block_id, Some(Uuid::from_u128(BLOQUE_3)));
        assert_eq!(o.technician.as_deref(), Some("Samuel Jiménez"));
        assert_eq!(
            (o.shoots, o.mature_leaves, o.fruits, o.flower_buds, o.buds),
            (1, 11, 0, 2, 0)
        );
    }

    #[test]
    fn test_fingerprint_shape() {
        let report = validate_rows(&[good_row()], &catalog());
        let expected = format!(
            "2024-03-05|{}|{}|19.649244|-71.294723|SAMUEL JIMENEZ",
            Uuid::from_u128(NORTE),
            Uuid::from_u128(BLOQUE_3)
        );
        assert_eq!(report.valid[0].fingerprint, expected);
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let rows = vec![good_row(), good_row()];
        let first = validate_rows(&rows, &catalog());
        let second = validate_rows(&rows, &catalog());
        let a: Vec<_> = first.valid.iter().map(|o| o.fingerprint.clone()).collect();
        let b: Vec<_> = second.valid.iter().map(|o| o.fingerprint.clone()).collect();
        assert_eq!(a, b);
        assert_eq!(a[0], a[1]);
    }

    #[test]
    fn test_fingerprint_rounds_coordinates_and_folds_technician() {
        let a = row(&[
            ("Fecha", "2024-03-05"),
            ("Finca", "Finca Norte"),
            ("Lat", "19.6492441"),
            ("Lon", "-71.2947229"),
            ("Tecnico", "  samuel   jimenez "),
        ]);
        let b = row(&[
            ("Fecha", "05/03/2024"),
            ("Finca", "FINCA NORTE"),
            ("Lat", "19,649244"),
            ("Lon", "-71.294723"),
            ("Técnico", "Samuel Jiménez"),
        ]);
        let report = validate_rows(&[a, b], &catalog());
        assert_eq!(report.valid.len(), 2);
        assert_eq!(report.valid[0].fingerprint, report.valid[1].fingerprint);
    }

    #[test]
    fn test_empty_block_is_farm_level() {
        let r = row(&[
            ("Fecha", "2024-03-05"),
            ("Finca", "Finca Norte"),
            ("Bloque", "   "),
            ("Lat", "19.6"),
            ("Lon", "-71.3"),
        ]);
        let report = validate_rows(&[r], &catalog());
        assert_eq!(report.valid[0].block_id, None);
        assert!(report.valid[0].fingerprint.contains("||"));
        assert_eq!(report.valid[0].technician, None);
    }

    #[test]
    fn test_block_number_alias() {
        let by_number: RawRow = good_row()
            .iter()
            .map(|(h, c)| {
                if h == "Bloque" {
                    (h, Cell::Text("3".into()))
                } else {
                    (h, c.clone())
                }
            })
            .collect();
        let report = validate_rows(&[good_row(), by_number], &catalog());
        assert_eq!(report.valid.len(), 2);
        assert_eq!(report.valid[0].block_id, report.valid[1].block_id);
    }

    #[test]
    fn test_farm_match_is_fuzzy() {
        let r = row(&[
            ("Fecha", "2024-03-05"),
            ("Finca", "  finca norte  "),
            ("Lat", "19.6"),
            ("Lon", "-71.3"),
        ]);
        let report = validate_rows(&[r], &catalog());
        assert_eq!(report.valid[0].farm_id, Uuid::from_u128(NORTE));
    }

    #[test]
    fn test_counts_coerced_leniently() {
        let r = row(&[
            ("Fecha", "2024-03-05"),
            ("Finca", "Finca Norte"),
            ("Lat", "19.6"),
            ("Lon", "-71.3"),
            ("Brotes", "abc"),
            ("Hojas", "-5"),
            ("Limones", "4.9"),
        ]);
        let o = &validate_rows(&[r], &catalog()).valid[0];
        assert_eq!((o.shoots, o.mature_leaves, o.fruits, o.flower_buds, o.buds), (0, 0, 4, 0, 0));
    }

    #[test]
    fn test_native_cells() {
        let r: RawRow = vec![
            ("Fecha", Cell::Number(44200.0)),
            ("Finca", Cell::Text("Finca Norte".into())),
            ("Lat", Cell::Number(19.6)),
            ("Lon", Cell::Number(-71.3)),
            ("Brotes", Cell::Number(3.0)),
        ]
        .into_iter()
        .collect();
        let o = &validate_rows(&[r], &catalog()).valid[0];
        assert_eq!(o.date.to_string(), "2021-01-04");
        assert_eq!(o.shoots, 3);
    }

    // -------------------------------------------------------------------------
    // REJECTIONS
    // -------------------------------------------------------------------------

    #[test]
    fn test_reject_invalid_date() {
        let mut r = row(&[("Fecha", "2024-02-30"), ("Finca", "Finca Norte")]);
        let report = validate_rows(&[r.clone()], &catalog());
        assert_eq!(report.errors[0].reason, RejectReason::InvalidDate);
        assert_eq!(report.errors[0].raw_value, "2024-02-30");

        r = row(&[("Finca", "Finca Norte")]);
        let report = validate_rows(&[r], &catalog());
        assert_eq!(report.errors[0].reason.to_string(), "invalid date");
        assert_eq!(report.errors[0].raw_value, "");
    }

    #[test]
    fn test_reject_unknown_farm() {
        let r = row(&[("Fecha", "2024-03-05"), ("Finca", "Finca Sur"), ("Lat", "95")]);
        let report = validate_rows(&[r], &catalog());
        // farm is checked before coordinates
        assert_eq!(report.errors[0].reason.to_string(), "farm not found in catalog");
        assert_eq!(report.errors[0].raw_value, "Finca Sur");
    }

    #[test]
    fn test_reject_latitude_out_of_range() {
        let r = row(&[
            ("Fecha", "2024-03-05"),
            ("Finca", "Finca Norte"),
            ("Lat", "95"),
            ("Lon", "-71.3"),
        ]);
        let report = validate_rows(&[r], &catalog());
        assert!(report.valid.is_empty());
        assert_eq!(report.errors[0].reason.to_string(), "invalid lat/lon");
        assert_eq!(report.errors[0].raw_value, "lat=95 lon=-71.3");
    }

    #[test]
    fn test_reject_missing_or_bad_longitude() {
        for lon in ["", "west", "180.5"] {
            let r = row(&[
                ("Fecha", "2024-03-05"),
                ("Finca", "Finca Norte"),
                ("Lat", "19.6"),
                ("Lon", lon),
            ]);
            let report = validate_rows(&[r], &catalog());
            assert_eq!(report.errors[0].reason, RejectReason::InvalidCoordinates, "lon={lon}");
        }
    }

    #[test]
    fn test_reject_block_of_other_farm() {
        let r = row(&[
            ("Fecha", "2024-03-05"),
            ("Finca", "B. Cementerio"),
            ("Bloque", "Bloque 3"),
            ("Lat", "19.6"),
            ("Lon", "-71.3"),
        ]);
        let report = validate_rows(&[r], &catalog());
        assert_eq!(report.errors[0].reason.to_string(), "block not found for that farm");
        assert_eq!(report.errors[0].raw_value, "Bloque 3");
    }

    #[test]
    fn test_reject_ambiguous_farm() {
        let farms = vec![
            Farm {
                id: Uuid::from_u128(1),
                name: "Finca Norte".into(),
                boundary: None,
            },
            Farm {
                id: Uuid::from_u128(2),
                name: "FINCA NORTE ".into(),
                boundary: None,
            },
        ];
        let catalog = CatalogResolver::build(farms, HashMap::new());
        let report = validate_rows(&[good_row()], &catalog);
        assert_eq!(report.errors[0].reason, RejectReason::FarmAmbiguous);
    }

    // -------------------------------------------------------------------------
    // END TO END
    // -------------------------------------------------------------------------

    #[test]
    fn test_ten_rows_two_rejections_with_line_numbers() {
        let mut rows: Vec<RawRow> = (0..10).map(|_| good_row()).collect();
        rows[2] = row(&[("Fecha", "not a date"), ("Finca", "Finca Norte")]);
        rows[6] = row(&[
            ("Fecha", "2024-03-05"),
            ("Finca", "Finca Fantasma"),
            ("Lat", "19.6"),
            ("Lon", "-71.3"),
        ]);

        let report = validate_rows(&rows, &catalog());
        assert_eq!(report.valid.len(), 8);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.total(), 10);
        assert_eq!(report.errors[0].row_number, 4);
        assert_eq!(report.errors[0].reason, RejectReason::InvalidDate);
        assert_eq!(report.errors[1].row_number, 8);
        assert_eq!(report.errors[1].reason, RejectReason::FarmNotFound);
    }

    #[test]
    fn test_display_errors_cap() {
        let errors: Vec<Rejection> = (0..7)
            .map(|i| Rejection {
                row_number: i + FIRST_DATA_LINE,
                reason: RejectReason::InvalidDate,
                raw_value: String::new(),
            })
            .collect();
        let (shown, rest) = display_errors(&errors, 5);
        assert_eq!((shown.len(), rest), (5, 2));
        let (shown, rest) = display_errors(&errors, 500);
        assert_eq!((shown.len(), rest), (7, 0));
    }

    #[test]
    fn test_fixed6_single_zero_spelling() {
        assert_eq!(fixed6(-0.0), "0.000000");
        assert_eq!(fixed6(-0.0000001), "0.000000");
        assert_eq!(fixed6(-71.5), "-71.500000");
    }
}
