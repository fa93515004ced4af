//! Request numbers of the form `NNNNN/KL-PL/<P|C>/MM/YY`.
//!
//! The serial restarts every calendar year. Month and year are taken in the
//! plant's local offset, not UTC. Numbers are minted inside the same sled
//! transaction that records the approval, so two approvals racing for the
//! first number of the day cannot both win.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};

use crate::error::{ValidationError, WorkflowError};
use crate::types::WasteForm;

pub const REQUEST_NUMBER_LIMIT: u32 = 99_999;
const ISSUER: &str = "KL-PL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumber {
    pub serial: u32,
    pub form: WasteForm,
    pub month: u32,
    pub year: i32,
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:05}/{}/{}/{:02}/{:02}",
            self.serial,
            ISSUER,
            self.form.code(),
            self.month,
            self.year.rem_euclid(100)
        )
    }
}

impl FromStr for SequenceNumber {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidSequenceNumber(s.to_string());
        let digits = |part: &str, len: usize| part.len() == len && part.bytes().all(|b| b.is_ascii_digit());

        let parts: Vec<&str> = s.split('/').collect();
        let [serial, issuer, form, month, year] = parts[..] else {
            return Err(invalid());
        };
        if !digits(serial, 5) || issuer != ISSUER || !digits(month, 2) || !digits(year, 2) {
            return Err(invalid());
        }

        let mut form_chars = form.chars();
        let form = match (form_chars.next(), form_chars.next()) {
            (Some(c), None) => WasteForm::from_code(c).ok_or_else(invalid)?,
            _ => return Err(invalid()),
        };
        let serial: u32 = serial.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let year: i32 = year.parse().map_err(|_| invalid())?;

        if serial == 0 || !(1..=12).contains(&month) {
            return Err(invalid());
        }

        Ok(Self {
            serial,
            form,
            month,
            year: 2000 + year,
        })
    }
}

pub fn is_valid(number: &str) -> bool {
    number.parse::<SequenceNumber>().is_ok()
}

pub fn counter_key(year: i32) -> String {
    format!("seq/{year}")
}

fn abort<T>(err: WorkflowError) -> ConflictableTransactionResult<T, WorkflowError> {
    Err(ConflictableTransactionError::Abort(err))
}

/// Claims the next serial for the year of `issued_at` and records the
/// number as issued to `owner`.
pub fn next_sequence_number(
    counters: &TransactionalTree,
    numbers: &TransactionalTree,
    issued_at: DateTime<FixedOffset>,
    form: WasteForm,
    owner: &str,
) -> ConflictableTransactionResult<SequenceNumber, WorkflowError> {
    let year = issued_at.year();
    let key = counter_key(year);

    let last = match counters.get(key.as_bytes())? {
        Some(bytes) => match <[u8; 4]>::try_from(bytes.as_ref()) {
            Ok(raw) => u32::from_be_bytes(raw),
            Err(_) => return abort(WorkflowError::Codec(format!("corrupt counter {key}"))),
        },
        None => 0,
    };

    let serial = last + 1;
    if serial > REQUEST_NUMBER_LIMIT {
        return abort(WorkflowError::NumberingConflict(format!(
            "yearly limit of {REQUEST_NUMBER_LIMIT} reached for {year}"
        )));
    }

    let number = SequenceNumber {
        serial,
        form,
        month: issued_at.month(),
        year,
    };
    let text = number.to_string();
    if numbers.get(text.as_bytes())?.is_some() {
        return abort(WorkflowError::NumberingConflict(format!("{text} was already issued")));
    }

    counters.insert(key.as_bytes(), serial.to_be_bytes().to_vec())?;
    numbers.insert(text.as_bytes(), owner.as_bytes())?;

    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sled::Transactional;
    use sled::transaction::TransactionError;
    use tempfile::tempdir;

    fn jakarta(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
    }

    #[test]
    fn format_and_parse() {
        let n = SequenceNumber {
            serial: 42,
            form: WasteForm::Liquid,
            month: 3,
            year: 2025,
        };
        assert_eq!(n.to_string(), "00042/KL-PL/C/03/25");
        assert_eq!("00042/KL-PL/C/03/25".parse::<SequenceNumber>().unwrap(), n);

        for bad in [
            "",
            "42/KL-PL/C/03/25",
            "00042/KL-PL/X/03/25",
            "00042/KL-PL/C/13/25",
            "00042/XX-PL/C/03/25",
            "00000/KL-PL/P/03/25",
            "00042/KL-PL/PC/03/25",
            "00042/KL-PL/C/03/25/1",
        ] {
            assert!(!is_valid(bad), "{bad}");
        }
    }

    #[test]
    fn serial_per_year_in_local_time() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let counters = db.open_tree("counters").unwrap();
        let numbers = db.open_tree("numbers").unwrap();

        let issue = |at: DateTime<FixedOffset>, form: WasteForm, owner: &str| {
            (&counters, &numbers)
                .transaction(|(c, n)| next_sequence_number(c, n, at, form, owner))
                .map(|n| n.to_string())
        };

        assert_eq!(issue(jakarta(2025, 1, 5, 9), WasteForm::Solid, "a").unwrap(), "00001/KL-PL/P/01/25");
        assert_eq!(issue(jakarta(2025, 12, 31, 23), WasteForm::Liquid, "b").unwrap(), "00002/KL-PL/C/12/25");
        // 00:30 on 1 January in Jakarta is still 31 December in UTC
        let new_year = jakarta(2026, 1, 1, 0) + chrono::Duration::minutes(30);
        assert_eq!(issue(new_year, WasteForm::Solid, "c").unwrap(), "00001/KL-PL/P/01/26");
    }

    #[test]
    fn limit_is_a_conflict() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let counters = db.open_tree("counters").unwrap();
        let numbers = db.open_tree("numbers").unwrap();
        counters
            .insert(counter_key(2025).as_bytes(), REQUEST_NUMBER_LIMIT.to_be_bytes().to_vec())
            .unwrap();

        let result = (&counters, &numbers)
            .transaction(|(c, n)| next_sequence_number(c, n, jakarta(2025, 6, 1, 8), WasteForm::Solid, "a"));

        match result {
            Err(TransactionError::Abort(err)) => {
                assert!(matches!(err, WorkflowError::NumberingConflict(_)));
                assert!(err.is_retryable());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn issued_number_is_never_reissued() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let counters = db.open_tree("counters").unwrap();
        let numbers = db.open_tree("numbers").unwrap();
        numbers.insert("00001/KL-PL/P/06/25".as_bytes(), "old".as_bytes()).unwrap();

        let result = (&counters, &numbers)
            .transaction(|(c, n)| next_sequence_number(c, n, jakarta(2025, 6, 1, 8), WasteForm::Solid, "a"));
        assert!(matches!(result, Err(TransactionError::Abort(WorkflowError::NumberingConflict(_)))));
    }
}
