//! Line parser for tab-separated install records.
//!
//! Expected layout: `category<TAB>id<TAB>lat<TAB>lon<TAB>app,ids`.
//!
//! Parsing is lenient about optional fields: unreadable coordinates fall back
//! to 0.0 and unreadable app ids are dropped one by one. Both cases still yield
//! a record, tagged as [`ParseOutcome::Degraded`] so callers can tell it apart
//! from a clean parse. Only a wrong field count or a missing category/id makes
//! the line unusable.

use std::fmt;

use super::Record;

const FIELD_DELIMITER: char = '\t';
const APP_ID_DELIMITER: char = ',';
const FIELD_COUNT: usize = 5;

/// Result of parsing a single line. Every line yields exactly one outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Every field parsed.
    Valid(Record),
    /// Usable record with defaulted or partially dropped optional fields.
    Degraded(Record, Vec<Degradation>),
    /// The line cannot produce a record.
    Malformed(MalformedReason),
}

impl ParseOutcome {
    /// The parsed record, if any.
    pub fn into_record(self) -> Option<Record> {
        match self {
            ParseOutcome::Valid(record) | ParseOutcome::Degraded(record, _) => Some(record),
            ParseOutcome::Malformed(_) => None,
        }
    }
}

/// An optional field that could not be read as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
    /// Latitude was not a number; 0.0 was used.
    InvalidLatitude(String),
    /// Longitude was not a number; 0.0 was used.
    InvalidLongitude(String),
    /// Some app ids were not unsigned integers and were dropped.
    InvalidAppIds { dropped: usize },
}

/// Why a line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    FieldCount { found: usize },
    EmptyCategory,
    EmptyId,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::FieldCount { found } => {
                write!(f, "expected {FIELD_COUNT} fields, found {found}")
            }
            MalformedReason::EmptyCategory => write!(f, "empty device type"),
            MalformedReason::EmptyId => write!(f, "empty device id"),
        }
    }
}

/// Parse one input line.
///
/// Trailing whitespace, TABs included, is dropped before splitting, so an empty
/// last field makes the line short. Leading TABs are kept and delimit an empty
/// device type.
pub fn parse_line(line: &str) -> ParseOutcome {
    let fields: Vec<&str> = line
        .trim_start_matches(|c: char| c != FIELD_DELIMITER && c.is_whitespace())
        .trim_end()
        .split(FIELD_DELIMITER)
        .collect();
    let [category, id, lat, lon, raw_apps] = fields[..] else {
        return ParseOutcome::Malformed(MalformedReason::FieldCount {
            found: fields.len(),
        });
    };

    let category = category.trim();
    let id = id.trim();
    if category.is_empty() {
        return ParseOutcome::Malformed(MalformedReason::EmptyCategory);
    }
    if id.is_empty() {
        return ParseOutcome::Malformed(MalformedReason::EmptyId);
    }

    let mut degradations = Vec::new();

    let lat = parse_coordinate(lat).unwrap_or_else(|| {
        degradations.push(Degradation::InvalidLatitude(lat.to_string()));
        0.0
    });
    let lon = parse_coordinate(lon).unwrap_or_else(|| {
        degradations.push(Degradation::InvalidLongitude(lon.to_string()));
        0.0
    });

    let (app_ids, dropped) = parse_app_ids(raw_apps);
    if dropped > 0 {
        degradations.push(Degradation::InvalidAppIds { dropped });
    }

    let record = Record {
        category: category.to_string(),
        id: id.to_string(),
        lat,
        lon,
        app_ids,
    };

    if degradations.is_empty() {
        ParseOutcome::Valid(record)
    } else {
        ParseOutcome::Degraded(record, degradations)
    }
}

fn parse_coordinate(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Returns the parsed ids in input order and the number of tokens dropped.
/// Empty tokens (`1,,2` or a trailing comma) are skipped without counting.
fn parse_app_ids(raw: &str) -> (Vec<u32>, usize) {
    let mut dropped = 0;
    let ids = raw
        .split(APP_ID_DELIMITER)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<u32>() {
            Ok(id) => Some(id),
            Err(_) => {
                dropped += 1;
                None
            }
        })
        .collect();
    (ids, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(line: &str) -> Record {
        match parse_line(line) {
            ParseOutcome::Valid(record) => record,
            other => panic!("expected valid record for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_well_formed_line() {
        let record = valid("idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23");
        assert_eq!(record.category, "idfa");
        assert_eq!(record.id, "1rfw452y52g2gq4g");
        assert_eq!(record.lat, 55.55);
        assert_eq!(record.lon, 42.42);
        assert_eq!(record.app_ids, vec![1423, 43, 567, 3, 7, 23]);
    }

    #[test]
    fn test_surrounding_whitespace_and_crlf_ignored() {
        let record = valid("  gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424\r\n");
        assert_eq!(record.category, "gaid");
        assert_eq!(record.app_ids, vec![7423, 424]);
    }

    #[test]
    fn test_too_few_fields() {
        for line in ["", "idfa", "idfa\tid", "idfa\tid\t1.0\t2.0"] {
            assert!(
                matches!(
                    parse_line(line),
                    ParseOutcome::Malformed(MalformedReason::FieldCount { .. })
                ),
                "line {line:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_too_many_fields() {
        assert_eq!(
            parse_line("idfa\tid\t1\t2\t3\textra"),
            ParseOutcome::Malformed(MalformedReason::FieldCount { found: 6 })
        );
    }

    #[test]
    fn test_empty_category_or_id() {
        assert_eq!(
            parse_line("\tid\t1\t2\t3"),
            ParseOutcome::Malformed(MalformedReason::EmptyCategory)
        );
        assert_eq!(
            parse_line(" \tid\t1\t2\t3"),
            ParseOutcome::Malformed(MalformedReason::EmptyCategory)
        );
        assert_eq!(
            parse_line("idfa\t \t1\t2\t3"),
            ParseOutcome::Malformed(MalformedReason::EmptyId)
        );
        assert_eq!(
            parse_line("idfa\t\t1\t2\t3"),
            ParseOutcome::Malformed(MalformedReason::EmptyId)
        );
    }

    #[test]
    fn test_empty_trailing_app_field_is_short() {
        for line in ["dvid\tid\t1.0\t2.0\t", "dvid\tid\t1.0\t2.0\t \r\n"] {
            assert_eq!(
                parse_line(line),
                ParseOutcome::Malformed(MalformedReason::FieldCount { found: 4 }),
                "line {line:?} should be short"
            );
        }
    }

    #[test]
    fn test_separator_only_app_field_has_no_apps() {
        let record = valid("dvid\tid\t1.0\t2.0\t,");
        assert!(record.app_ids.is_empty());
    }

    #[test]
    fn test_bad_app_ids_dropped_individually() {
        match parse_line("idfa\tid\t1.0\t2.0\t1,x,3,-4,99999999999") {
            ParseOutcome::Degraded(record, degradations) => {
                assert_eq!(record.app_ids, vec![1, 3]);
                assert_eq!(degradations, vec![Degradation::InvalidAppIds { dropped: 3 }]);
            }
            other => panic!("expected degraded record, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_app_tokens_are_not_degradation() {
        let record = valid("idfa\tid\t1.0\t2.0\t1,,2,");
        assert_eq!(record.app_ids, vec![1, 2]);
    }

    #[test]
    fn test_bad_coordinates_default_to_zero() {
        match parse_line("gaid\tid\tnorth\tNaN\t9") {
            ParseOutcome::Degraded(record, degradations) => {
                assert_eq!(record.lat, 0.0);
                assert_eq!(record.lon, 0.0);
                assert_eq!(record.app_ids, vec![9]);
                assert_eq!(
                    degradations,
                    vec![
                        Degradation::InvalidLatitude("north".to_string()),
                        Degradation::InvalidLongitude("NaN".to_string()),
                    ]
                );
            }
            other => panic!("expected degraded record, got {other:?}"),
        }
    }

    #[test]
    fn test_into_record() {
        assert!(parse_line("idfa\tid\t1\t2\t3").into_record().is_some());
        assert!(parse_line("idfa").into_record().is_none());
    }

    #[test]
    fn test_malformed_reason_display() {
        assert_eq!(
            MalformedReason::FieldCount { found: 2 }.to_string(),
            "expected 5 fields, found 2"
        );
    }
}
