//! Shared value types: timestamps, identities and entity status
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Snapshot of a person as known at the moment they acted. Org data changes
/// over time, so history keeps these copies rather than references.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Identity {
    #[n(0)]
    pub id: String, // employee number in the org directory
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub title: Option<String>,
    #[n(3)]
    pub department: Option<String>,
    #[n(4)]
    pub job_level: Option<u8>,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            title: None,
            department: None,
            job_level: None,
        }
    }
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }
    pub fn with_job_level(mut self, job_level: u8) -> Self {
        self.job_level = Some(job_level);
        self
    }
}

/// Who is performing an action. `authorizer` holds the grants that are
/// checked; `acting_as` is the identity the action is performed on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ActingContext {
    #[n(0)]
    pub authorizer: Identity,
    #[n(1)]
    pub acting_as: Option<Identity>,
}

impl ActingContext {
    pub fn new(authorizer: Identity) -> Self {
        Self {
            authorizer,
            acting_as: None,
        }
    }
    pub fn on_behalf_of(mut self, identity: Identity) -> Self {
        self.acting_as = Some(identity);
        self
    }
    /// The identity whose name the action is recorded under.
    pub fn effective(&self) -> &Identity {
        self.acting_as.as_ref().unwrap_or(&self.authorizer)
    }
    /// True if either side of the context is `id`.
    pub fn involves(&self, id: &str) -> bool {
        self.authorizer.id == id || self.acting_as.as_ref().is_some_and(|a| a.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Status {
    #[n(0)]
    Draft,
    #[n(1)]
    InProgress,
    #[n(2)]
    Completed,
    #[n(3)]
    Rejected,
}

/// Physical form of the waste. Drives the form code in request numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum WasteForm {
    #[n(0)]
    Solid, // "Padat"
    #[n(1)]
    Liquid, // "Cair"
}

impl WasteForm {
    pub fn code(&self) -> char {
        match self {
            WasteForm::Solid => 'P',
            WasteForm::Liquid => 'C',
        }
    }
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'P' => Some(WasteForm::Solid),
            'C' => Some(WasteForm::Liquid),
            _ => None,
        }
    }
    /// Accepts the labels used on the request form.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "padat" | "solid" => Some(WasteForm::Solid),
            "cair" | "liquid" => Some(WasteForm::Liquid),
            _ => None,
        }
    }
}
