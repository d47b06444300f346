use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};

/// How often a report recurs, encoded as a single character in the report
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecurrenceType {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
    /// Submitted at an arbitrary point in time rather than for a calendar
    /// period.
    OnDemand,
}

impl RecurrenceType {
    pub fn from_char(value: char) -> Option<Self> {
        match value {
            'D' => Some(RecurrenceType::Daily),
            'W' => Some(RecurrenceType::Weekly),
            'M' => Some(RecurrenceType::Monthly),
            'Q' => Some(RecurrenceType::Quarterly),
            'S' => Some(RecurrenceType::HalfYearly),
            'Y' => Some(RecurrenceType::Yearly),
            'X' => Some(RecurrenceType::OnDemand),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            RecurrenceType::Daily => 'D',
            RecurrenceType::Weekly => 'W',
            RecurrenceType::Monthly => 'M',
            RecurrenceType::Quarterly => 'Q',
            RecurrenceType::HalfYearly => 'S',
            RecurrenceType::Yearly => 'Y',
            RecurrenceType::OnDemand => 'X',
        }
    }
}

/// A declared reporting period resolved against the report's recurrence
/// type. Parsing is strict about the textual shape: `2017-1` is a valid
/// quarter but never a valid month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingPeriod {
    pub recurrence: RecurrenceType,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// The declared period string, e.g. `2017-12`.
    pub info: String,
    pub year: Option<i32>,
    pub period: Option<u32>,
}

impl ReportingPeriod {
    pub fn parse(info: &str, recurrence: RecurrenceType) -> Option<Self> {
        match recurrence {
            RecurrenceType::Daily => {
                let date = parse_strict_date(info)?;
                Some(Self {
                    recurrence,
                    start: date,
                    end: date,
                    info: info.to_string(),
                    year: Some(date.year()),
                    period: None,
                })
            }
            RecurrenceType::Weekly => {
                let (year, week) = split_year_period(info, 2)?;
                if week == 0 || week > week_count(year) {
                    return None;
                }
                let start = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
                let end = start + chrono::Days::new(6);
                Some(Self {
                    recurrence,
                    start,
                    end,
                    info: info.to_string(),
                    year: Some(year),
                    period: Some(week),
                })
            }
            RecurrenceType::Monthly => {
                let (year, month) = split_year_period(info, 2)?;
                if month == 0 || month > 12 {
                    return None;
                }
                let start = NaiveDate::from_ymd_opt(year, month, 1)?;
                let end = last_day_of_month(year, month)?;
                Some(Self {
                    recurrence,
                    start,
                    end,
                    info: info.to_string(),
                    year: Some(year),
                    period: Some(month),
                })
            }
            RecurrenceType::Quarterly => {
                let (year, quarter) = split_year_period(info, 1)?;
                if quarter == 0 || quarter > 4 {
                    return None;
                }
                let first_month = 1 + (quarter - 1) * 3;
                let start = NaiveDate::from_ymd_opt(year, first_month, 1)?;
                let end = last_day_of_month(year, first_month + 2)?;
                Some(Self {
                    recurrence,
                    start,
                    end,
                    info: info.to_string(),
                    year: Some(year),
                    period: Some(quarter),
                })
            }
            RecurrenceType::HalfYearly => {
                let (year, half) = split_year_period(info, 1)?;
                if half == 0 || half > 2 {
                    return None;
                }
                let first_month = 1 + (half - 1) * 6;
                let start = NaiveDate::from_ymd_opt(year, first_month, 1)?;
                let end = last_day_of_month(year, first_month + 5)?;
                Some(Self {
                    recurrence,
                    start,
                    end,
                    info: info.to_string(),
                    year: Some(year),
                    period: Some(half),
                })
            }
            RecurrenceType::Yearly => {
                if info.len() != 4 || !all_digits(info) {
                    return None;
                }
                let year: i32 = info.parse().ok()?;
                Some(Self {
                    recurrence,
                    start: NaiveDate::from_ymd_opt(year, 1, 1)?,
                    end: NaiveDate::from_ymd_opt(year, 12, 31)?,
                    info: info.to_string(),
                    year: Some(year),
                    period: None,
                })
            }
            RecurrenceType::OnDemand => {
                let moment = NaiveDateTime::parse_from_str(info, "%Y-%m-%d %H:%M:%S").ok()?;
                let date = moment.date();
                Some(Self {
                    recurrence,
                    start: date,
                    end: date,
                    info: info.to_string(),
                    year: None,
                    period: None,
                })
            }
        }
    }

    /// Human-readable rendering of the period.
    pub fn label(&self) -> String {
        match self.recurrence {
            RecurrenceType::Daily => format!("Day {}", self.end.format("%d. %m. %Y.")),
            RecurrenceType::Weekly => {
                format!("Week {}/{}", self.period.unwrap_or(0), self.year.unwrap_or(0))
            }
            RecurrenceType::Monthly => {
                format!("Month {}/{}", self.period.unwrap_or(0), self.year.unwrap_or(0))
            }
            RecurrenceType::Quarterly => format!(
                "Quarter {}/{}",
                self.period.unwrap_or(0),
                self.year.unwrap_or(0)
            ),
            RecurrenceType::HalfYearly => format!(
                "{}. semester of {}",
                self.period.unwrap_or(0),
                self.year.unwrap_or(0)
            ),
            RecurrenceType::Yearly => format!("year {}", self.year.unwrap_or(0)),
            RecurrenceType::OnDemand => self.info.clone(),
        }
    }

    /// Derives the declared period string back from a period's final date.
    /// The inverse of `parse` for every recurrence with a calendar shape.
    pub fn to_info(end: NaiveDate, recurrence: RecurrenceType) -> String {
        match recurrence {
            RecurrenceType::Daily => end.format("%Y-%m-%d").to_string(),
            RecurrenceType::Weekly => {
                let week = end.iso_week();
                format!("{}-{:02}", week.year(), week.week())
            }
            RecurrenceType::Monthly => format!("{}-{:02}", end.year(), end.month()),
            RecurrenceType::Quarterly => format!("{}-{}", end.year(), (end.month() - 1) / 3 + 1),
            RecurrenceType::HalfYearly => {
                format!("{}-{}", end.year(), if end.month() < 7 { 1 } else { 2 })
            }
            RecurrenceType::Yearly => end.format("%Y").to_string(),
            RecurrenceType::OnDemand => String::new(),
        }
    }
}

/// Number of ISO-8601 weeks in a year (52 or 53).
pub fn week_count(year: i32) -> u32 {
    NaiveDate::from_ymd_opt(year, 12, 28)
        .map(|date| date.iso_week().week())
        .unwrap_or(52)
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// Parses `YYYY-MM-DD` with every component zero-padded.
fn parse_strict_date(info: &str) -> Option<NaiveDate> {
    let mut parts = info.split('-');
    let year = parts.next()?;
    let month = parts.next()?;
    let day = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if year.len() != 4 || month.len() != 2 || day.len() != 2 {
        return None;
    }
    if ![year, month, day].into_iter().all(all_digits) {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Splits `YYYY-P` where `P` has exactly `period_digits` digits.
fn split_year_period(info: &str, period_digits: usize) -> Option<(i32, u32)> {
    let (year_part, period_part) = info.split_once('-')?;
    if year_part.len() != 4 || !all_digits(year_part) {
        return None;
    }
    if period_part.len() != period_digits || !all_digits(period_part) {
        return None;
    }
    Some((year_part.parse().ok()?, period_part.parse().ok()?))
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    next.pred_opt()
}
