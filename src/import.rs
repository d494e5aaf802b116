use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::db::create_player;
use crate::error::AppError;
use crate::models::NewPlayer;
use crate::validation::{normalize_phone, parse_age};

#[derive(Debug, Deserialize)]
struct CsvPlayerRow {
    name: Option<String>,
    age: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImportedPlayer {
    pub id: i64,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ImportReport {
    pub created: Vec<ImportedPlayer>,
    pub errors: Vec<RowError>,
}

/// A row that parsed cleanly, or why it did not.
pub type ParsedRow = (u64, Result<NewPlayer, String>);

/// Parses the whole upload up front. Header names are matched case-insensitively;
/// unknown columns are ignored.
pub fn parse_players_csv(contents: &str) -> Result<Vec<ParsedRow>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let headers: csv::StringRecord = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    if !headers.iter().any(|h| h == "name") {
        return Err(AppError::Validation(
            "CSV must have a 'name' column".to_string(),
        ));
    }
    reader.set_headers(headers.clone());

    let mut rows = Vec::new();
    for result in reader.records() {
        match result {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                let parsed = record
                    .deserialize::<CsvPlayerRow>(Some(&headers))
                    .map_err(|e| e.to_string())
                    .and_then(validate_row);
                rows.push((line, parsed));
            }
            Err(err) => {
                let line = err.position().map(|p| p.line()).unwrap_or_default();
                rows.push((line, Err(describe_csv_error(&err))));
            }
        }
    }

    Ok(rows)
}

fn describe_csv_error(err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {} fields but found {}", expected_len, len),
        _ => err.to_string(),
    }
}

fn row_message(error: AppError) -> String {
    match error {
        AppError::Validation(msg) => msg,
        other => other.to_string(),
    }
}

fn validate_row(row: CsvPlayerRow) -> Result<NewPlayer, String> {
    let name = row.name.unwrap_or_default();
    if name.trim().is_empty() {
        return Err("missing name".to_string());
    }

    let age = parse_age(row.age.as_deref()).map_err(row_message)?;
    let phone = normalize_phone(row.phone.as_deref().unwrap_or_default()).map_err(row_message)?;

    Ok(NewPlayer {
        name: name.trim().to_string(),
        age,
        phone,
    })
}

/// Best-effort import: every good row becomes a player, every bad row becomes
/// an entry in the report. Nothing is rolled back.
#[instrument(skip(pool, contents))]
pub async fn import_players(pool: &Pool<Sqlite>, contents: &str) -> Result<ImportReport, AppError> {
    let rows = parse_players_csv(contents)?;
    let mut report = ImportReport::default();

    for (line, parsed) in rows {
        match parsed {
            Ok(new_player) => match create_player(pool, &new_player).await {
                Ok(player) => report.created.push(ImportedPlayer {
                    id: player.id,
                    name: player.name,
                    code: player.code,
                }),
                Err(err) => {
                    warn!(line, error = %err, "Failed to import row");
                    report.errors.push(RowError {
                        line,
                        message: err.to_string(),
                    });
                }
            },
            Err(message) => report.errors.push(RowError { line, message }),
        }
    }

    info!(
        created = report.created.len(),
        rejected = report.errors.len(),
        "Imported players"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_with_mixed_header_case() {
        let rows = parse_players_csv("Name,AGE,Phone\nJane Doe,12,555-123-4567\nSam Lee,,\n")
            .expect("Failed to parse CSV");

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].1,
            Ok(NewPlayer {
                name: "Jane Doe".to_string(),
                age: Some(12),
                phone: Some("5551234567".to_string()),
            })
        );
        assert_eq!(
            rows[1].1,
            Ok(NewPlayer {
                name: "Sam Lee".to_string(),
                age: None,
                phone: None,
            })
        );
    }

    #[test]
    fn bad_rows_carry_line_numbers() {
        let rows = parse_players_csv("name,age\nAna,9\n,10\nBo,ten\nCy,11,extra\n")
            .expect("Failed to parse CSV");

        let errors: Vec<(u64, String)> = rows
            .iter()
            .filter_map(|(line, r)| r.as_ref().err().map(|m| (*line, m.clone())))
            .collect();

        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], (3, "missing name".to_string()));
        assert_eq!(errors[1], (4, "invalid age 'ten'".to_string()));
        assert_eq!(errors[2].0, 5);
        assert!(errors[2].1.contains("expected 2 fields"));
    }

    #[test]
    fn extra_columns_are_ignored() {
        let rows = parse_players_csv("name,team,age\nJo,Red Sox,14\n").expect("Failed to parse CSV");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.as_ref().map(|p| p.age), Ok(Some(14)));
    }

    #[test]
    fn missing_name_column_is_rejected() {
        let result = parse_players_csv("player,age\nJo,14\n");
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
