use chrono::{Datelike, Duration, NaiveDate, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// A `BYDAY` entry such as `MO`, `2TU` or `-1FR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdaySpec {
    pub ordinal: Option<i32>,
    pub weekday: Weekday,
}

impl WeekdaySpec {
    fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() < 2 {
            return None;
        }
        let (ordinal, day) = value.split_at(value.len() - 2);
        let weekday = match day.to_ascii_uppercase().as_str() {
            "MO" => Weekday::Mon,
            "TU" => Weekday::Tue,
            "WE" => Weekday::Wed,
            "TH" => Weekday::Thu,
            "FR" => Weekday::Fri,
            "SA" => Weekday::Sat,
            "SU" => Weekday::Sun,
            _ => return None,
        };
        let ordinal = match ordinal {
            "" => None,
            n => Some(n.trim_start_matches('+').parse::<i32>().ok()?).filter(|n| *n != 0),
        };
        Some(Self { ordinal, weekday })
    }

    /// Whether `date` is this weekday, at this position within its month.
    fn matches_in_month(&self, date: NaiveDate) -> bool {
        if date.weekday() != self.weekday {
            return false;
        }
        match self.ordinal {
            None => true,
            Some(n) if n > 0 => ((date.day() as i32 - 1) / 7 + 1) == n,
            Some(n) => ((days_in_month(date) as i32 - date.day() as i32) / 7 + 1) == -n,
        }
    }
}

/// The subset of RFC 5545 `RRULE` understood by the calendar adapter.
///
/// Rules only answer "does the series have an occurrence on this date"; they
/// never enumerate the series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub freq: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    /// Raw `UNTIL` value; its time zone depends on the owning event.
    pub until: Option<String>,
    pub by_day: Vec<WeekdaySpec>,
    pub by_month_day: Vec<i32>,
    pub by_month: Vec<u32>,
}

impl Rule {
    pub fn parse(value: &str) -> Result<Self, String> {
        let mut freq = None;
        let mut rule = Rule {
            freq: Frequency::Daily,
            interval: 1,
            count: None,
            until: None,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
        };

        for part in value.split(';').filter(|p| !p.trim().is_empty()) {
            let (name, val) = part
                .split_once('=')
                .ok_or_else(|| format!("malformed RRULE part '{}'", part))?;
            match name.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match val.trim().to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        "YEARLY" => Frequency::Yearly,
                        other => return Err(format!("unsupported frequency {}", other)),
                    })
                }
                "INTERVAL" => {
                    rule.interval = val
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| format!("invalid INTERVAL '{}'", val))?
                        .max(1)
                }
                "COUNT" => {
                    rule.count = Some(
                        val.trim()
                            .parse::<u32>()
                            .map_err(|_| format!("invalid COUNT '{}'", val))?,
                    )
                }
                "UNTIL" => rule.until = Some(val.trim().to_string()),
                "BYDAY" => {
                    rule.by_day = val
                        .split(',')
                        .map(|d| WeekdaySpec::parse(d).ok_or_else(|| format!("invalid BYDAY '{}'", d)))
                        .collect::<Result<_, _>>()?
                }
                "BYMONTHDAY" => {
                    rule.by_month_day = val
                        .split(',')
                        .map(|d| {
                            d.trim()
                                .parse::<i32>()
                                .map_err(|_| format!("invalid BYMONTHDAY '{}'", d))
                        })
                        .collect::<Result<_, _>>()?
                }
                "BYMONTH" => {
                    rule.by_month = val
                        .split(',')
                        .map(|m| {
                            m.trim()
                                .parse::<u32>()
                                .map_err(|_| format!("invalid BYMONTH '{}'", m))
                        })
                        .collect::<Result<_, _>>()?
                }
                // WKST and the remaining BY* parts do not change daily answers
                // for the rules we accept.
                _ => {}
            }
        }

        rule.freq = freq.ok_or_else(|| "RRULE without FREQ".to_string())?;
        Ok(rule)
    }

    /// Whether the pattern places an occurrence on `date`, ignoring COUNT
    /// and UNTIL. The series start date always counts as an occurrence.
    pub fn matches(&self, start: NaiveDate, date: NaiveDate) -> bool {
        if date < start {
            return false;
        }
        if date == start {
            return true;
        }
        if !self.by_month.is_empty() && !self.by_month.contains(&date.month()) {
            return false;
        }

        let interval = self.interval.max(1) as i64;
        match self.freq {
            Frequency::Daily => {
                (date - start).num_days() % interval == 0
                    && (self.by_day.is_empty()
                        || self.by_day.iter().any(|d| d.weekday == date.weekday()))
                    && (self.by_month_day.is_empty()
                        || self.by_month_day.iter().any(|n| month_day_matches(date, *n)))
            }
            Frequency::Weekly => {
                let weeks = (week_start(date) - week_start(start)).num_days() / 7;
                let weekday_ok = if self.by_day.is_empty() {
                    date.weekday() == start.weekday()
                } else {
                    self.by_day.iter().any(|d| d.weekday == date.weekday())
                };
                weeks % interval == 0 && weekday_ok
            }
            Frequency::Monthly => {
                let months = month_index(date) - month_index(start);
                months % interval == 0 && self.day_in_month_matches(start, date)
            }
            Frequency::Yearly => {
                let years = (date.year() - start.year()) as i64;
                let month_ok = if self.by_month.is_empty() {
                    date.month() == start.month()
                } else {
                    true
                };
                years % interval == 0 && month_ok && self.day_in_month_matches(start, date)
            }
        }
    }

    /// Whether an occurrence on `date` falls within COUNT.
    ///
    /// Walks forward from the start one day at a time. The walk ends at
    /// `date` or at the first occurrence past COUNT, whichever comes first,
    /// so it never covers more days than the series has been running.
    pub fn within_count(&self, start: NaiveDate, date: NaiveDate) -> bool {
        let Some(count) = self.count else {
            return true;
        };
        let mut seen = 0u32;
        let mut day = start;
        while day <= date {
            if self.matches(start, day) {
                seen += 1;
                if seen > count {
                    return false;
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        seen > 0
    }

    fn day_in_month_matches(&self, start: NaiveDate, date: NaiveDate) -> bool {
        let by_month_day = (!self.by_month_day.is_empty())
            .then(|| self.by_month_day.iter().any(|n| month_day_matches(date, *n)));
        let by_day = (!self.by_day.is_empty())
            .then(|| self.by_day.iter().any(|d| d.matches_in_month(date)));

        match (by_month_day, by_day) {
            (None, None) => date.day() == start.day(),
            (a, b) => a.unwrap_or(true) && b.unwrap_or(true),
        }
    }
}

fn month_day_matches(date: NaiveDate, n: i32) -> bool {
    if n > 0 {
        date.day() as i32 == n
    } else {
        days_in_month(date) as i32 - date.day() as i32 + 1 == -n
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_ordinal_weekdays() {
        let rule = Rule::parse("FREQ=MONTHLY;BYDAY=2TU,-1FR,+1MO").unwrap();
        assert_eq!(rule.freq, Frequency::Monthly);
        assert_eq!(
            rule.by_day,
            vec![
                WeekdaySpec { ordinal: Some(2), weekday: Weekday::Tue },
                WeekdaySpec { ordinal: Some(-1), weekday: Weekday::Fri },
                WeekdaySpec { ordinal: Some(1), weekday: Weekday::Mon },
            ]
        );
    }

    #[test]
    fn rejects_unsupported_frequency() {
        assert!(Rule::parse("FREQ=HOURLY").unwrap_err().contains("HOURLY"));
        assert!(Rule::parse("INTERVAL=2").is_err());
    }

    #[test]
    fn daily_interval() {
        let rule = Rule::parse("FREQ=DAILY;INTERVAL=3").unwrap();
        let start = d(2024, 3, 1);
        assert!(rule.matches(start, d(2024, 3, 4)));
        assert!(!rule.matches(start, d(2024, 3, 5)));
        assert!(!rule.matches(start, d(2024, 2, 27)));
    }

    #[test]
    fn biweekly_on_several_days() {
        // 2024-03-04 is a Monday.
        let rule = Rule::parse("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE,FR").unwrap();
        let start = d(2024, 3, 4);
        assert!(rule.matches(start, d(2024, 3, 6)));
        assert!(rule.matches(start, d(2024, 3, 8)));
        assert!(!rule.matches(start, d(2024, 3, 11)));
        assert!(rule.matches(start, d(2024, 3, 18)));
        assert!(!rule.matches(start, d(2024, 3, 19)));
    }

    #[test]
    fn monthly_ordinal_weekdays() {
        let second_tuesday = Rule::parse("FREQ=MONTHLY;BYDAY=2TU").unwrap();
        assert!(second_tuesday.matches(d(2024, 1, 9), d(2024, 3, 12)));
        assert!(!second_tuesday.matches(d(2024, 1, 9), d(2024, 3, 5)));

        let last_friday = Rule::parse("FREQ=MONTHLY;BYDAY=-1FR").unwrap();
        assert!(last_friday.matches(d(2024, 1, 26), d(2024, 3, 29)));
        assert!(!last_friday.matches(d(2024, 1, 26), d(2024, 3, 22)));
    }

    #[test]
    fn monthly_by_month_day_and_default_day() {
        let last_day = Rule::parse("FREQ=MONTHLY;BYMONTHDAY=-1").unwrap();
        assert!(last_day.matches(d(2024, 1, 31), d(2024, 2, 29)));

        let plain = Rule::parse("FREQ=MONTHLY").unwrap();
        assert!(plain.matches(d(2024, 1, 31), d(2024, 3, 31)));
        // February has no 31st, so that month is skipped.
        assert!(!plain.matches(d(2024, 1, 31), d(2024, 2, 29)));
    }

    #[test]
    fn yearly_anniversary() {
        let rule = Rule::parse("FREQ=YEARLY").unwrap();
        assert!(rule.matches(d(2020, 3, 15), d(2024, 3, 15)));
        assert!(!rule.matches(d(2020, 3, 15), d(2024, 4, 15)));
    }

    #[test]
    fn count_limits_occurrences() {
        let rule = Rule::parse("FREQ=DAILY;COUNT=5").unwrap();
        let start = d(2024, 3, 1);
        assert!(rule.within_count(start, d(2024, 3, 5)));
        assert!(!rule.within_count(start, d(2024, 3, 6)));
    }

    #[test]
    fn finished_count_series_decides_far_future_dates() {
        let rule = Rule::parse("FREQ=WEEKLY;COUNT=3").unwrap();
        let start = d(2000, 1, 3);
        assert!(rule.within_count(start, d(2000, 1, 17)));
        assert!(!rule.within_count(start, d(2099, 12, 28)));
    }
}
