//! Drafts for new requests and signing events. Fields are set one by one
//! and checked together by `validate_and_finalise`.
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::entity::VerificationOfficers;
use crate::error::ValidationError;
use crate::roles::normalize_department;
use crate::types::{ActingContext, WasteForm};

#[derive(Debug, Default, Clone)]
pub struct RequestDraft {
    pub department: Option<String>,
    pub category_name: Option<String>,
    pub food_product: bool,
    pub waste_form: Option<WasteForm>,
}

/// A request draft that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFields {
    pub department: String,
    pub category_name: String,
    pub food_product: bool,
    pub waste_form: WasteForm,
}

impl RequestDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }
    pub fn set_category(mut self, category_name: &str) -> Self {
        self.category_name = Some(category_name.to_string());
        self
    }
    pub fn set_food_product(mut self, food_product: bool) -> Self {
        self.food_product = food_product;
        self
    }
    pub fn set_waste_form(mut self, form: WasteForm) -> Self {
        self.waste_form = Some(form);
        self
    }

    /// The department defaults to that of the person the request is
    /// raised for.
    pub fn validate_and_finalise(&self, acting: &ActingContext) -> Result<RequestFields, ValidationError> {
        let department = non_blank(self.department.as_deref())
            .or_else(|| non_blank(acting.effective().department.as_deref()))
            .map(normalize_department)
            .ok_or(ValidationError::MissingField("department"))?;
        let category_name = non_blank(self.category_name.as_deref())
            .map(str::to_string)
            .ok_or(ValidationError::MissingField("category"))?;
        let waste_form = self.waste_form.ok_or(ValidationError::MissingField("waste_form"))?;

        Ok(RequestFields {
            department,
            category_name,
            food_product: self.food_product,
            waste_form,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct EventDraft {
    pub department: Option<String>,
    pub verification_date: Option<String>,
    pub verification_time: Option<String>,
    pub location: Option<String>,
    pub officers: VerificationOfficers,
    /// Requests to link. Empty means every completed, unlinked request.
    pub requests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub department: String,
    pub verification_date: NaiveDate,
    pub verification_time: DateTime<Utc>,
    pub location: String,
    pub officers: VerificationOfficers,
    pub requests: Vec<String>,
}

impl EventDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }
    pub fn set_verification_date(mut self, date: &str) -> Self {
        self.verification_date = Some(date.to_string());
        self
    }
    pub fn set_verification_time(mut self, time: &str) -> Self {
        self.verification_time = Some(time.to_string());
        self
    }
    pub fn set_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }
    pub fn set_officers(mut self, officers: VerificationOfficers) -> Self {
        self.officers = officers;
        self
    }
    pub fn link_request(mut self, request_id: &str) -> Self {
        self.requests.push(request_id.to_string());
        self
    }

    /// Local times are read in `offset`.
    pub fn validate_and_finalise(&self, offset: FixedOffset) -> Result<EventFields, ValidationError> {
        let department = non_blank(self.department.as_deref())
            .map(normalize_department)
            .ok_or(ValidationError::MissingField("department"))?;
        let date = non_blank(self.verification_date.as_deref())
            .ok_or(ValidationError::MissingField("verification_date"))?;
        let time = non_blank(self.verification_time.as_deref())
            .ok_or(ValidationError::MissingField("verification_time"))?;
        let location = non_blank(self.location.as_deref())
            .map(str::to_string)
            .ok_or(ValidationError::MissingField("location"))?;

        let mut requests = self.requests.clone();
        requests.sort();
        requests.dedup();

        Ok(EventFields {
            department,
            verification_date: parse_verification_date(date)?,
            verification_time: parse_verification_time(time, offset)?,
            location,
            officers: self.officers.clone(),
            requests,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn parse_verification_date(date: &str) -> Result<NaiveDate, ValidationError> {
    let date = date.trim();
    if date.len() != 10 {
        return Err(ValidationError::InvalidDate(date.to_string()));
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate(date.to_string()))
}

const LOCAL_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parses an ISO datetime. Values without an offset are local to `offset`.
/// Form widgets sometimes append a second `:00`; that suffix is dropped.
pub fn parse_verification_time(time: &str, offset: FixedOffset) -> Result<DateTime<Utc>, ValidationError> {
    let invalid = || ValidationError::InvalidTime(time.to_string());
    let trimmed = time.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let repaired = match trimmed.strip_suffix(":00") {
        Some(head) if trimmed.matches(':').count() == 3 => head,
        _ => trimmed,
    };

    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(repaired, fmt).ok())
        .ok_or_else(invalid)?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;

    fn jakarta() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    #[test]
    fn request_department_defaults_to_acting_identity() {
        let acting = ActingContext::new(Identity::new("1", "A").with_department("pr1"));
        let fields = RequestDraft::new()
            .set_category("Recall")
            .set_food_product(true)
            .set_waste_form(WasteForm::Solid)
            .validate_and_finalise(&acting)
            .unwrap();
        assert_eq!(fields.department, "PR1");

        let err = RequestDraft::new()
            .set_department("PR1")
            .set_waste_form(WasteForm::Solid)
            .validate_and_finalise(&acting)
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("category"));
    }

    #[test]
    fn event_fields_are_required() {
        let err = EventDraft::new()
            .set_department("PR1")
            .set_verification_date("2025-09-26")
            .set_verification_time("2025-09-26T15:09")
            .validate_and_finalise(jakarta())
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("location"));

        let fields = EventDraft::new()
            .set_department("pr1")
            .set_verification_date("2025-09-26")
            .set_verification_time("2025-09-26T15:09")
            .set_location("TPS B3")
            .link_request("b")
            .link_request("a")
            .link_request("b")
            .validate_and_finalise(jakarta())
            .unwrap();
        assert_eq!(fields.requests, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(fields.verification_date.to_string(), "2025-09-26");
    }

    #[test]
    fn dates_must_be_iso() {
        assert!(parse_verification_date("2025-09-26").is_ok());
        assert!(parse_verification_date("26/09/2025").is_err());
        assert!(parse_verification_date("2025-9-26").is_err());
        assert!(parse_verification_date("2025-02-30").is_err());
    }

    #[test]
    fn times_are_local_and_repaired() {
        let expected = Utc.with_ymd_and_hms(2025, 9, 26, 8, 9, 52).unwrap();

        assert_eq!(parse_verification_time("2025-09-26T15:09:52", jakarta()).unwrap(), expected);
        assert_eq!(parse_verification_time("2025-09-26T15:09:52:00", jakarta()).unwrap(), expected);
        assert_eq!(parse_verification_time("2025-09-26T15:09:52+07:00", jakarta()).unwrap(), expected);
        assert_eq!(
            parse_verification_time("2025-09-26 15:09", jakarta()).unwrap(),
            Utc.with_ymd_and_hms(2025, 9, 26, 8, 9, 0).unwrap()
        );
        assert!(parse_verification_time("15:09", jakarta()).is_err());
        assert!(parse_verification_time("yesterday", jakarta()).is_err());
    }
}
