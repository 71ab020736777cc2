//! Interval records and their row codec.
//!
//! Rows have the shape `KEY,START[,END]` with ISO dates. The same shape is used
//! for the source table and for the per-key accumulation files, so a store can
//! be read back with the decoder that parsed the input.

use chrono::NaiveDate;
use std::cmp::Ordering;

use super::reader::Record;
use crate::config::DATE_FORMAT;
use crate::error::{Error, Result};

/// One activation/deactivation span of a key
///
/// `end == None` means the interval is still open.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interval {
    pub key: String,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl Interval {
    pub fn new(key: impl Into<String>, start: NaiveDate, end: Option<NaiveDate>) -> Self {
        Self {
            key: key.into(),
            start,
            end,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// True when `older` ends exactly on the day this interval starts
    pub fn continues(&self, older: &Interval) -> bool {
        older.end == Some(self.start)
    }

    /// Absorb an older, touching interval: earliest start, this interval's end
    pub fn absorb(&mut self, older: &Interval) {
        debug_assert!(self.continues(older));
        self.start = self.start.min(older.start);
    }

    /// Most-recent-first ordering
    ///
    /// Open intervals come first (latest start first), then closed intervals by
    /// end descending, then start descending. An interval whose end is on or
    /// before another's start therefore always sorts after it.
    pub fn recency_cmp(&self, other: &Interval) -> Ordering {
        let by_end = match (self.end, other.end) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => b.cmp(&a),
        };

        by_end
            .then_with(|| other.start.cmp(&self.start))
            .then_with(|| self.key.cmp(&other.key))
    }

    /// Decode a raw table row
    pub fn decode(record: &Record) -> Result<Self> {
        let parse_error = |reason: String| Error::RecordParse {
            line: record.line,
            reason,
        };

        if record.fields.len() < 2 {
            return Err(parse_error(format!(
                "expected at least 2 fields (key, start date), found {}",
                record.fields.len()
            )));
        }

        let key = record.fields[0].trim();
        if key.is_empty() {
            return Err(parse_error("key is empty".to_string()));
        }

        let start = parse_date(record.fields[1].trim())
            .map_err(|e| parse_error(format!("invalid start date: {e}")))?;

        let end = match record.fields.get(2).map(|f| f.trim()) {
            None | Some("") => None,
            Some(raw) => Some(
                parse_date(raw).map_err(|e| parse_error(format!("invalid end date: {e}")))?,
            ),
        };

        Ok(Self {
            key: key.to_string(),
            start,
            end,
        })
    }

    /// Encode as a row; open intervals get an empty third field
    pub fn encode(&self) -> [String; 3] {
        [
            self.key.clone(),
            self.start.format(DATE_FORMAT).to_string(),
            self.end
                .map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default(),
        ]
    }
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| format!("'{raw}' ({e})"))
}

#[cfg(test)]
pub(crate) fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
}
