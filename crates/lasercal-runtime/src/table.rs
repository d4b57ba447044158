//! [`ResultTable`] – rows captured during a scan and their CSV form.
//!
//! Each line is `timestamp, axis_1, …, axis_N, sensor_1, …, sensor_M` with
//! RFC 3339 timestamps.  The table is written once, when the scan finishes.

use std::io;
use std::path::Path;

use csv::WriterBuilder;
use lasercal_types::{CalError, DataRow};
use serde::{Deserialize, Serialize};

/// Delimiter and header options for [`ResultTable::write_csv`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvFormat {
    pub delimiter: u8,
    /// Emit a `timestamp, <axis names>, <sensor headers>` line first.
    pub header: bool,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            header: false,
        }
    }
}

/// Fixed-width table of [`DataRow`]s.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    axis_names: Vec<String>,
    sensor_headers: Vec<String>,
    rows: Vec<DataRow>,
}

impl ResultTable {
    pub fn new(axis_names: Vec<String>, sensor_headers: Vec<String>) -> Self {
        Self {
            axis_names,
            sensor_headers,
            rows: Vec::new(),
        }
    }

    /// Column names including the leading `timestamp`.
    pub fn headers(&self) -> Vec<String> {
        std::iter::once("timestamp".to_string())
            .chain(self.axis_names.iter().cloned())
            .chain(self.sensor_headers.iter().cloned())
            .collect()
    }

    /// Number of value columns every row must have.
    pub fn width(&self) -> usize {
        self.axis_names.len() + self.sensor_headers.len()
    }

    /// Append a row.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::RowShape`] when the row's axis or sensor part does
    /// not match the table's columns.
    pub fn push(&mut self, row: DataRow) -> Result<(), CalError> {
        if row.axis_values.len() != self.axis_names.len()
            || row.sensor_values.len() != self.sensor_headers.len()
        {
            return Err(CalError::RowShape {
                expected: self.width(),
                actual: row.width(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Serialise every row to `writer`.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from `writer`.
    pub fn write_to<W: io::Write>(&self, writer: W, format: &CsvFormat) -> csv::Result<()> {
        let mut out = WriterBuilder::new()
            .delimiter(format.delimiter)
            .has_headers(false)
            .from_writer(writer);

        if format.header {
            out.write_record(self.headers())?;
        }
        for row in &self.rows {
            let record = std::iter::once(row.timestamp.to_rfc3339()).chain(
                row.axis_values
                    .iter()
                    .chain(row.sensor_values.iter())
                    .map(f64::to_string),
            );
            out.write_record(record)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Write the table to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::Persistence`] when the file cannot be created or
    /// written.
    pub fn write_csv(&self, path: &Path, format: &CsvFormat) -> Result<(), CalError> {
        let persistence = |details: String| CalError::Persistence {
            path: path.display().to_string(),
            details,
        };
        let file = std::fs::File::create(path).map_err(|e| persistence(e.to_string()))?;
        self.write_to(file, format)
            .map_err(|e| persistence(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn table() -> ResultTable {
        ResultTable::new(
            vec!["x".to_string(), "power".to_string()],
            vec!["Camera X".to_string()],
        )
    }

    fn row(axes: Vec<f64>, sensor: Vec<f64>) -> DataRow {
        DataRow {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            axis_values: axes,
            sensor_values: sensor,
        }
    }

    #[test]
    fn push_rejects_mismatched_rows() {
        let mut t = table();
        assert!(t.push(row(vec![1.0, 2.0], vec![3.0])).is_ok());
        assert_eq!(
            t.push(row(vec![1.0], vec![3.0, 4.0])),
            Err(CalError::RowShape {
                expected: 3,
                actual: 3
            })
        );
        assert_eq!(
            t.push(row(vec![1.0, 2.0], vec![])),
            Err(CalError::RowShape {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn csv_lines_follow_column_order() {
        let mut t = table();
        t.push(row(vec![0.5, 1.0], vec![12.0])).unwrap();
        t.push(row(vec![1.5, 0.25], vec![-3.0])).unwrap();

        let mut buf = Vec::new();
        t.write_to(&mut buf, &CsvFormat::default()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "2024-05-01T12:00:00+00:00,0.5,1,12",
                "2024-05-01T12:00:00+00:00,1.5,0.25,-3",
            ]
        );
    }

    #[test]
    fn header_and_delimiter_options() {
        let mut t = table();
        t.push(row(vec![1.0, 2.0], vec![3.0])).unwrap();
        let format = CsvFormat {
            delimiter: b'\t',
            header: true,
        };
        let mut buf = Vec::new();
        t.write_to(&mut buf, &format).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("timestamp\tx\tpower\tCamera X"));
        assert_eq!(lines.next().map(|l| l.split('\t').count()), Some(4));
    }

    #[test]
    fn write_csv_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.csv");
        let mut t = table();
        t.push(row(vec![1.0, 2.0], vec![3.0])).unwrap();
        t.write_csv(&path, &CsvFormat::default()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 1);
        assert!(written.ends_with("1,2,3\n"));
    }

    #[test]
    fn unwritable_destination_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("scan.csv");
        let err = table().write_csv(&path, &CsvFormat::default()).unwrap_err();
        assert!(matches!(err, CalError::Persistence { .. }));
    }
}
