//! Core leave request record, draft builder and date helpers
use super::chain::{ApprovalChain, ChainConfig};
use super::error::{LeaveError, TransitionError, ValidationError};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

pub const MIN_REASON_LEN: usize = 3;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash)]
pub enum LeaveType {
    #[n(0)]
    SickLeave,
    #[n(1)]
    CasualLeave,
    #[n(2)]
    AnnualLeave,
    #[n(3)]
    MaternityLeave,
    #[n(4)]
    PaternityLeave,
    #[n(5)]
    UnpaidLeave,
    #[n(6)]
    Custom(#[n(0)] String),
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaveStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct TimeStamp(DateTime<Utc>);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct LeaveDate(NaiveDate);

/// Reference to a proof document held by the document store.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef(#[n(0)] pub String);

/// Inclusive window used to filter requests that touch a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: LeaveDate,
    pub end: LeaveDate,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LeaveRequest {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub employee_id: String,
    #[n(2)]
    pub leave_type: LeaveType,
    #[n(3)]
    pub start_date: LeaveDate,
    #[n(4)]
    pub end_date: LeaveDate,
    #[n(5)]
    pub total_days: u32,
    #[n(6)]
    pub reason: String,
    #[n(7)]
    pub document: Option<DocumentRef>,
    #[n(8)]
    pub status: LeaveStatus,
    #[n(9)]
    pub approval_chain: ApprovalChain,
    #[n(10)]
    pub rejection_reason: Option<String>, // system rejections only
    #[n(11)]
    pub system_rejected_by: Option<String>,
    #[n(12)]
    pub created_at: TimeStamp,
    #[n(13)]
    pub updated_at: TimeStamp,
    #[n(14)]
    pub version: u64,
}

// Draft as typed by the employee. Nothing here is trusted until validated.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LeaveDraft {
    employee_id: Option<String>,
    leave_type: Option<LeaveType>,
    start_date: Option<LeaveDate>,
    end_date: Option<LeaveDate>,
    reason: Option<String>,
}

/// A draft that passed validation, with the day count computed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidDraft {
    pub employee_id: String,
    pub leave_type: LeaveType,
    pub start_date: LeaveDate,
    pub end_date: LeaveDate,
    pub total_days: u32,
    pub reason: String,
}

impl LeaveType {
    /// Resolve a dropdown value. "Other" only resolves together with a non-empty label.
    pub fn resolve(value: &str, custom_label: Option<&str>) -> Result<Self, ValidationError> {
        match normalise(value).as_str() {
            "other" | "custom" => LeaveType::custom(custom_label.unwrap_or_default()),
            _ => value.parse(),
        }
    }

    pub fn custom(label: &str) -> Result<Self, ValidationError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ValidationError::EmptyCustomLabel);
        }
        Ok(LeaveType::Custom(label.to_string()))
    }

    pub fn label(&self) -> &str {
        match self {
            LeaveType::SickLeave => "Sick Leave",
            LeaveType::CasualLeave => "Casual Leave",
            LeaveType::AnnualLeave => "Annual Leave",
            LeaveType::MaternityLeave => "Maternity Leave",
            LeaveType::PaternityLeave => "Paternity Leave",
            LeaveType::UnpaidLeave => "Unpaid Leave",
            LeaveType::Custom(label) => label,
        }
    }
}

impl FromStr for LeaveType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalise(s).trim_end_matches("leave") {
            "sick" => Ok(LeaveType::SickLeave),
            "casual" => Ok(LeaveType::CasualLeave),
            "annual" => Ok(LeaveType::AnnualLeave),
            "maternity" => Ok(LeaveType::MaternityLeave),
            "paternity" => Ok(LeaveType::PaternityLeave),
            "unpaid" => Ok(LeaveType::UnpaidLeave),
            "other" | "custom" => Err(ValidationError::EmptyCustomLabel),
            _ => Err(ValidationError::UnknownLeaveType(s.to_string())),
        }
    }
}

impl fmt::Display for LeaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl LeaveStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LeaveStatus::Pending)
    }
}

impl fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaveStatus::Pending => write!(f, "Pending"),
            LeaveStatus::Approved => write!(f, "Approved"),
            LeaveStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

impl FromStr for LeaveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(LeaveStatus::Pending),
            "approved" => Ok(LeaveStatus::Approved),
            "rejected" => Ok(LeaveStatus::Rejected),
            _ => Err(format!("Invalid leave status: {}", s)),
        }
    }
}

impl TimeStamp {
    pub fn now() -> Self {
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

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl LeaveDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }
    pub fn to_naive(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for LeaveDate {
    fn from(value: NaiveDate) -> Self {
        LeaveDate(value)
    }
}

impl FromStr for LeaveDate {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(LeaveDate)
            .map_err(|_| ValidationError::InvalidDate(s.to_string()))
    }
}

impl fmt::Display for LeaveDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Inclusive number of calendar days between two dates, never below 1.
pub fn total_days(start: LeaveDate, end: LeaveDate) -> u32 {
    let span = (end.0 - start.0).num_days().max(0) + 1;
    u32::try_from(span).unwrap_or(u32::MAX)
}

impl DateRange {
    pub fn new(start: LeaveDate, end: LeaveDate) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidDateRange);
        }
        Ok(Self { start, end })
    }
    pub fn overlaps(&self, start: LeaveDate, end: LeaveDate) -> bool {
        start <= self.end && end >= self.start
    }
}

impl LeaveDraft {
    /// Construct an empty draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_employee(mut self, employee_id: &str) -> Self {
        self.employee_id = Some(employee_id.to_string());
        self
    }
    pub fn set_leave_type(mut self, leave_type: LeaveType) -> Self {
        self.leave_type = Some(leave_type);
        self
    }
    pub fn set_start_date(mut self, date: LeaveDate) -> Self {
        self.start_date = Some(date);
        self
    }
    pub fn set_end_date(mut self, date: LeaveDate) -> Self {
        self.end_date = Some(date);
        self
    }
    pub fn set_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    // Checks every field and recomputes the day count.
    pub fn validate(&self) -> Result<ValidDraft, ValidationError> {
        let employee_id = self
            .employee_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::MissingField("employee_id"))?;
        let leave_type = self
            .leave_type
            .clone()
            .ok_or(ValidationError::MissingField("leave_type"))?;
        if let LeaveType::Custom(label) = &leave_type {
            if label.trim().is_empty() {
                return Err(ValidationError::EmptyCustomLabel);
            }
        }
        let start_date = self
            .start_date
            .ok_or(ValidationError::MissingField("start_date"))?;
        let end_date = self
            .end_date
            .ok_or(ValidationError::MissingField("end_date"))?;
        if end_date < start_date {
            return Err(ValidationError::InvalidDateRange);
        }
        let reason = self.reason.as_deref().unwrap_or_default().trim();
        if reason.chars().count() < MIN_REASON_LEN {
            return Err(ValidationError::ReasonTooShort {
                min: MIN_REASON_LEN,
            });
        }

        Ok(ValidDraft {
            employee_id: employee_id.to_string(),
            leave_type,
            start_date,
            end_date,
            total_days: total_days(start_date, end_date),
            reason: reason.to_string(),
        })
    }
}

impl LeaveRequest {
    /// A freshly submitted request: Pending, with every configured stage Pending.
    pub fn submit(
        id: String,
        draft: ValidDraft,
        chain: &ChainConfig,
        document: Option<DocumentRef>,
        now: TimeStamp,
    ) -> Self {
        Self {
            id,
            employee_id: draft.employee_id,
            leave_type: draft.leave_type,
            start_date: draft.start_date,
            end_date: draft.end_date,
            total_days: draft.total_days,
            reason: draft.reason,
            document,
            status: LeaveStatus::Pending,
            approval_chain: ApprovalChain::from_config(chain),
            rejection_reason: None,
            system_rejected_by: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Employee edit. Only allowed before any approver has acted.
    pub fn amend(
        &mut self,
        employee_id: &str,
        draft: ValidDraft,
        now: TimeStamp,
    ) -> Result<(), LeaveError> {
        self.ensure_pending()?;
        let employee_id = employee_id.trim();
        if self.employee_id != employee_id || draft.employee_id != employee_id {
            return Err(TransitionError::NotOwner.into());
        }
        if self.approval_chain.any_acted() {
            return Err(TransitionError::AmendLocked.into());
        }
        self.leave_type = draft.leave_type;
        self.start_date = draft.start_date;
        self.end_date = draft.end_date;
        self.total_days = draft.total_days;
        self.reason = draft.reason;
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn ensure_pending(&self) -> Result<(), LeaveError> {
        if self.status.is_terminal() {
            return Err(LeaveError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn overlaps(&self, range: &DateRange) -> bool {
        range.overlaps(self.start_date, self.end_date)
    }
}

fn normalise(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .collect::<String>()
        .to_lowercase()
}

impl<C> minicbor::Encode<C> for TimeStamp {
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

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

// Dates are stored as days since 0001-01-01.
impl<C> minicbor::Encode<C> for LeaveDate {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        use chrono::Datelike;
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for LeaveDate {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(LeaveDate)
            .ok_or(minicbor::decode::Error::message("day count out of range"))
    }
}
