use std::{
    io::{Read, Write},
    path::Path,
};

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;

use crate::error::{ForecastError, ForecastResult};

/// Column-oriented numeric table holding one site's records. Missing cells are `NaN`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteFrame {
    columns: IndexMap<String, Vec<f64>>,
    rows: usize,
}

impl SiteFrame {
    /// Builds a frame from named columns of equal length.
    pub fn from_columns<I, S>(columns: I) -> ForecastResult<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut frame = Self::default();
        let mut first = true;
        for (name, values) in columns {
            if first {
                frame.rows = values.len();
                first = false;
            }
            frame.insert_column(name, values)?;
        }
        Ok(frame)
    }

    /// Reads a CSV file. Header names and cells are trimmed; empty or non-numeric cells become `NaN`.
    pub fn read_csv(path: impl AsRef<Path>) -> ForecastResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// Reads CSV from any reader.
    pub fn from_reader<R: Read>(reader: R) -> ForecastResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|name| name.trim().to_string())
            .collect();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (idx, column) in columns.iter_mut().enumerate() {
                column.push(parse_cell(record.get(idx).unwrap_or("")));
            }
        }
        let rows = columns.first().map_or(0, Vec::len);
        let mut frame = Self {
            columns: IndexMap::with_capacity(headers.len()),
            rows,
        };
        for (name, values) in headers.into_iter().zip(columns) {
            if frame.columns.contains_key(&name) {
                return Err(ForecastError::Schema(format!("duplicate column {name:?}")));
            }
            frame.columns.insert(name, values);
        }
        Ok(frame)
    }

    /// Writes the frame as CSV; `NaN` cells are written empty.
    pub fn write_csv<W: Write>(&self, writer: W) -> ForecastResult<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(self.columns.keys())?;
        for row in 0..self.rows {
            writer.write_record(self.columns.values().map(|column| format_cell(column[row])))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows
    }

    /// Whether the frame has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Column names in file order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Whether a column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Borrowed column values.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Mutable column values.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut [f64]> {
        self.columns.get_mut(name).map(Vec::as_mut_slice)
    }

    /// Inserts or replaces a column; its length must match the frame.
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> ForecastResult<()> {
        let name = name.into();
        if self.columns.is_empty() && self.rows == 0 {
            self.rows = values.len();
        }
        if values.len() != self.rows {
            return Err(ForecastError::Schema(format!(
                "column {name:?} has {} rows, frame has {}",
                values.len(),
                self.rows
            )));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Removes a column, keeping the order of the others.
    pub fn remove_column(&mut self, name: &str) -> Option<Vec<f64>> {
        self.columns.shift_remove(name)
    }

    /// Keeps the rows whose flag is `true`.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.rows);
        for column in self.columns.values_mut() {
            let mut flags = keep.iter();
            column.retain(|_| flags.next().copied().unwrap_or(false));
        }
        self.rows = keep.iter().filter(|flag| **flag).count();
    }

    /// New frame made of the given rows, in the given order.
    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| (name.clone(), rows.iter().map(|&row| values[row]).collect()))
            .collect();
        Self {
            columns,
            rows: rows.len(),
        }
    }

    /// Stacks frames vertically. The column set is the ordered union; absent cells are `NaN`.
    #[must_use]
    pub fn concat(frames: &[&Self]) -> Self {
        let mut names: Vec<&str> = Vec::new();
        for frame in frames {
            for name in frame.column_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        let rows: usize = frames.iter().map(|frame| frame.len()).sum();
        let mut columns = IndexMap::with_capacity(names.len());
        for name in names {
            let mut values = Vec::with_capacity(rows);
            for frame in frames {
                match frame.column(name) {
                    Some(column) => values.extend_from_slice(column),
                    None => values.extend(std::iter::repeat(f64::NAN).take(frame.len())),
                }
            }
            columns.insert(name.to_string(), values);
        }
        Self { columns, rows }
    }

    /// Timestamps built from the four time columns, `None` per row when unresolvable.
    /// Returns `None` when any time column is absent.
    #[must_use]
    pub fn timestamps(&self, time_columns: &[String]) -> Option<Vec<Option<NaiveDateTime>>> {
        let parts: Vec<&[f64]> = time_columns
            .iter()
            .map(|name| self.column(name))
            .collect::<Option<_>>()?;
        if parts.len() != 4 {
            return None;
        }
        Some(
            (0..self.rows)
                .map(|row| {
                    timestamp_from_parts([parts[0][row], parts[1][row], parts[2][row], parts[3][row]])
                })
                .collect(),
        )
    }

    /// Drops rows without a resolvable timestamp and sorts the rest chronologically. Of rows
    /// sharing a timestamp only the last one in input order is kept, so timestamps are unique
    /// afterwards. Frames lacking any time column are left untouched. Returns the number of
    /// dropped rows, duplicates included.
    pub fn index_by_time(&mut self, time_columns: &[String]) -> usize {
        let Some(stamps) = self.timestamps(time_columns) else {
            return 0;
        };
        let mut order: Vec<(usize, NaiveDateTime)> = stamps
            .into_iter()
            .enumerate()
            .filter_map(|(row, stamp)| stamp.map(|stamp| (row, stamp)))
            .collect();
        order.sort_by_key(|(_, stamp)| *stamp);
        let rows: Vec<usize> = order
            .iter()
            .enumerate()
            .filter(|(pos, (_, stamp))| {
                !matches!(order.get(pos + 1), Some((_, next)) if next == stamp)
            })
            .map(|(_, (row, _))| *row)
            .collect();
        let dropped = self.rows - rows.len();
        *self = self.select_rows(&rows);
        dropped
    }
}

/// Builds an hourly timestamp from `[year, month, day, hour]`; non-integral or invalid parts yield `None`.
#[must_use]
pub fn timestamp_from_parts(parts: [f64; 4]) -> Option<NaiveDateTime> {
    if parts.iter().any(|part| !part.is_finite() || part.fract() != 0.0 || *part < 0.0) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let [year, month, day, hour] = parts.map(|part| part as i64);
    let date = NaiveDate::from_ymd_opt(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
    )?;
    date.and_hms_opt(u32::try_from(hour).ok()?, 0, 0)
}

fn parse_cell(raw: &str) -> f64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return f64::NAN;
    }
    raw.parse::<f64>().unwrap_or(f64::NAN)
}

fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}
