use core::fmt;
use core::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use bodega_core::{DomainError, DomainResult, ValueObject};

const MIN_WIDTH: usize = 4;

/// Movement reference number, `PREFIX-YYYYMMDD-####`.
///
/// The sequence restarts every day per (tenant, prefix); allocation is the
/// infra sequencer's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReferenceNumber {
    prefix: String,
    date: NaiveDate,
    sequence: u32,
    width: usize,
}

impl ValueObject for ReferenceNumber {}

impl ReferenceNumber {
    pub fn new(prefix: &str, date: NaiveDate, sequence: u32, width: usize) -> DomainResult<Self> {
        let prefix = prefix.trim().to_uppercase();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "reference prefix must be letters only: {prefix:?}"
            )));
        }
        if sequence == 0 {
            return Err(DomainError::validation("reference sequence starts at 1"));
        }
        let digits = sequence.to_string().len();
        Ok(Self {
            prefix,
            date,
            sequence,
            width: width.max(MIN_WIDTH).max(digits),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for ReferenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:0width$}",
            self.prefix,
            self.date.format("%Y%m%d"),
            self.sequence,
            width = self.width
        )
    }
}

impl FromStr for ReferenceNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("malformed reference number: {s}"));

        let mut parts = s.trim().split('-');
        let (Some(prefix), Some(date), Some(sequence), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        if date.len() != 8 || sequence.len() < MIN_WIDTH {
            return Err(invalid());
        }
        if !sequence.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let date = NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| invalid())?;
        let width = sequence.len();
        let sequence = sequence.parse::<u32>().map_err(|_| invalid())?;

        Self::new(prefix, date, sequence, width)
    }
}

impl TryFrom<String> for ReferenceNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReferenceNumber> for String {
    fn from(value: ReferenceNumber) -> Self {
        value.to_string()
    }
}
