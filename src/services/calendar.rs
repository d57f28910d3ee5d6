use std::collections::HashMap;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use chrono::{Duration as TimeDelta, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use ical::parser::ical::component::IcalEvent;
use ical::property::Property;
use ical::IcalParser;

use crate::error::{BriefError, Result};
use crate::models::*;
use crate::services::recurrence::Rule;

const DEFAULT_EVENT_SECS: i64 = 3600;
const SECS_PER_DAY: i64 = 86_400;
/// How far back a recurring series is checked for occurrences that are
/// still running on the requested day.
const MAX_LOOKBACK_DAYS: i64 = 366;

/// Fetches ICS feeds and reduces them to the events of one local day.
pub struct CalendarAdapter {
    client: reqwest::Client,
}

impl CalendarAdapter {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("WTFToday/1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| BriefError::Config(format!("failed to build calendar client: {}", e)))?;
        Ok(Self { client })
    }

    /// Events of `day` (local time), without `is_now`/`is_soon` set.
    pub async fn fetch(&self, source: &CalendarSource, day: NaiveDate) -> Result<Vec<CalendarEvent>> {
        let content = match source {
            CalendarSource::None => {
                return Err(BriefError::Config("no calendar source configured".to_string()))
            }
            CalendarSource::Url(url) => self.download(url).await?,
            CalendarSource::File(path) => read_file(path).await?,
        };
        parse_events(&content, day, &Local)
    }

    async fn download(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BriefError::Network(format!(
                "calendar feed returned {}",
                response.status()
            )));
        }
        Ok(response.text().await?)
    }
}

/// One-off parse of a local ICS file, annotated against the current time.
pub async fn preview_file(path: &Path, soon_window: Duration) -> Result<Vec<CalendarEvent>> {
    let content = read_file(path).await?;
    let now = Local::now();
    let mut events = parse_events(&content, now.date_naive(), &Local)?;
    annotate(&mut events, now.timestamp(), soon_window);
    Ok(events)
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        BriefError::Network(format!(
            "failed to read calendar file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Sets `is_now` (`start <= now < end`) and `is_soon` (starts within
/// `soon_window` and not yet started).
pub fn annotate(events: &mut [CalendarEvent], now: i64, soon_window: Duration) {
    let window = soon_window.as_secs() as i64;
    for event in events.iter_mut() {
        event.is_now = event.start_time <= now && now < event.end_time;
        event.is_soon = event.start_time > now && event.start_time - now <= window;
    }
}

/// Parses an ICS payload and returns the events that intersect `day` in the
/// `local` time zone, all-day events first and then by start time.
pub fn parse_events<L: TimeZone>(content: &str, day: NaiveDate, local: &L) -> Result<Vec<CalendarEvent>> {
    if !content.to_ascii_uppercase().contains("BEGIN:VCALENDAR") {
        return Err(BriefError::Parse("no VCALENDAR found in calendar data".to_string()));
    }

    let mut parsed = Vec::new();
    let mut skipped = 0usize;
    let mut calendars = 0usize;

    for calendar in IcalParser::new(BufReader::new(content.as_bytes())) {
        let calendar = match calendar {
            Ok(calendar) => calendar,
            Err(e) if calendars == 0 => {
                return Err(BriefError::Parse(format!("invalid calendar data: {}", e)));
            }
            Err(e) => {
                log::warn!("Ignoring trailing calendar data: {}", e);
                break;
            }
        };
        calendars += 1;

        for event in &calendar.events {
            match VEvent::from_ical(event) {
                Ok(event) => parsed.push(event),
                Err(reason) => {
                    skipped += 1;
                    log::warn!("Skipping calendar event: {}", reason);
                }
            }
        }
    }

    if calendars == 0 {
        return Err(BriefError::Parse("no VCALENDAR found in calendar data".to_string()));
    }
    if skipped > 0 {
        log::warn!("Skipped {} malformed calendar event(s)", skipped);
    }

    let window = DayWindow::new(day, local)
        .ok_or_else(|| BriefError::Parse(format!("cannot resolve local day {}", day)))?;

    let overrides: HashMap<&str, Vec<&IcsTime>> =
        parsed.iter().fold(HashMap::new(), |mut acc, event| {
            if let Some(id) = &event.recurrence_id {
                acc.entry(event.uid.as_str()).or_default().push(id);
            }
            acc
        });

    let mut best: HashMap<String, Candidate> = HashMap::new();
    for event in &parsed {
        if event.cancelled {
            continue;
        }
        let overridden = overrides.get(event.uid.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        for (start_time, end_time) in event.occurrences(&window, overridden, local) {
            let candidate = Candidate {
                is_override: event.recurrence_id.is_some(),
                sequence: event.sequence,
                event: event.to_calendar_event(start_time, end_time),
            };
            match best.get(&event.uid) {
                Some(existing) if existing.rank() >= candidate.rank() => {}
                _ => {
                    best.insert(event.uid.clone(), candidate);
                }
            }
        }
    }

    let mut events: Vec<CalendarEvent> = best.into_values().map(|c| c.event).collect();
    events.sort_by(|a, b| {
        b.all_day
            .cmp(&a.all_day)
            .then(a.start_time.cmp(&b.start_time))
            .then_with(|| a.summary.cmp(&b.summary))
    });
    Ok(events)
}

struct Candidate {
    is_override: bool,
    sequence: i64,
    event: CalendarEvent,
}

impl Candidate {
    fn rank(&self) -> (bool, i64) {
        (self.is_override, self.sequence)
    }
}

/// `[start, end)` of one local day in Unix seconds.
struct DayWindow {
    day: NaiveDate,
    start: i64,
    end: i64,
}

impl DayWindow {
    fn new<L: TimeZone>(day: NaiveDate, local: &L) -> Option<Self> {
        let next = day.succ_opt()?;
        Some(Self {
            day,
            start: resolve(local, day.and_time(NaiveTime::MIN))?,
            end: resolve(local, next.and_time(NaiveTime::MIN))?,
        })
    }

    fn intersects(&self, start: i64, end: i64) -> bool {
        start < self.end && (end > self.start || start >= self.start)
    }
}

/// A DTSTART/DTEND-style value in one of the four ICS forms.
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcsTime {
    Date(NaiveDate),
    Utc(NaiveDateTime),
    Zoned(NaiveDateTime, Tz),
    Floating(NaiveDateTime),
}

impl IcsTime {
    fn parse(value: &str, tzid: Option<&str>, date_only: bool) -> Option<Self> {
        let value = value.trim();
        if date_only || value.len() == 8 {
            return NaiveDate::parse_from_str(value, "%Y%m%d").ok().map(IcsTime::Date);
        }
        if let Some(utc) = value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
            return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
                .ok()
                .map(IcsTime::Utc);
        }
        let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
        match tzid.map(|t| t.trim_matches('"')) {
            Some(name) => match name.parse::<Tz>() {
                Ok(tz) => Some(IcsTime::Zoned(naive, tz)),
                Err(_) => {
                    log::debug!("Unknown TZID '{}', using local time", name);
                    Some(IcsTime::Floating(naive))
                }
            },
            None => Some(IcsTime::Floating(naive)),
        }
    }

    fn from_property(prop: &Property) -> Option<Self> {
        let value = prop.value.as_deref()?;
        let date_only = param(prop, "VALUE").map(|v| v.eq_ignore_ascii_case("DATE")).unwrap_or(false);
        Self::parse(value, param(prop, "TZID"), date_only)
    }

    fn is_date(&self) -> bool {
        matches!(self, IcsTime::Date(_))
    }

    fn date(&self) -> NaiveDate {
        match self {
            IcsTime::Date(d) => *d,
            IcsTime::Utc(n) | IcsTime::Zoned(n, _) | IcsTime::Floating(n) => n.date(),
        }
    }

    /// The same wall-clock time, in the same zone, on another date.
    fn on_date(&self, date: NaiveDate) -> Self {
        match self {
            IcsTime::Date(_) => IcsTime::Date(date),
            IcsTime::Utc(n) => IcsTime::Utc(date.and_time(n.time())),
            IcsTime::Zoned(n, tz) => IcsTime::Zoned(date.and_time(n.time()), *tz),
            IcsTime::Floating(n) => IcsTime::Floating(date.and_time(n.time())),
        }
    }

    /// Interprets a floating value in `tz`, the zone of the event it bounds.
    fn in_zone_of(self, other: &IcsTime) -> Self {
        match (self, other) {
            (IcsTime::Floating(n), IcsTime::Zoned(_, tz)) => IcsTime::Zoned(n, *tz),
            (IcsTime::Floating(n), IcsTime::Utc(_)) => IcsTime::Utc(n),
            (value, _) => value,
        }
    }

    fn timestamp<L: TimeZone>(&self, local: &L) -> Option<i64> {
        match self {
            IcsTime::Date(d) => resolve(local, d.and_time(NaiveTime::MIN)),
            IcsTime::Utc(n) => Some(n.and_utc().timestamp()),
            IcsTime::Zoned(n, tz) => resolve(tz, *n),
            IcsTime::Floating(n) => resolve(local, *n),
        }
    }

    fn same_instance<L: TimeZone>(&self, other: &IcsTime, local: &L) -> bool {
        if self.is_date() || other.is_date() {
            return self.date() == other.date();
        }
        match (self.timestamp(local), other.timestamp(local)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Local wall time to Unix seconds. A time skipped by a DST jump resolves
/// to the instant one hour later.
fn resolve<Z: TimeZone>(tz: &Z, naive: NaiveDateTime) -> Option<i64> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
        .map(|dt| dt.timestamp())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Span {
    Days(i64),
    Seconds(i64),
}

#[derive(Debug)]
struct VEvent {
    uid: String,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    url: Option<String>,
    start: IcsTime,
    end: Option<IcsTime>,
    duration: Option<TimeDelta>,
    rule: Option<Rule>,
    exdates: Vec<IcsTime>,
    recurrence_id: Option<IcsTime>,
    sequence: i64,
    cancelled: bool,
}

impl VEvent {
    fn from_ical(event: &IcalEvent) -> std::result::Result<Self, String> {
        let mut uid = None;
        let mut summary = None;
        let mut description = None;
        let mut location = None;
        let mut url = None;
        let mut start = None;
        let mut end = None;
        let mut duration = None;
        let mut rule = None;
        let mut exdates = Vec::new();
        let mut recurrence_id = None;
        let mut sequence = 0;
        let mut cancelled = false;

        for prop in &event.properties {
            let value = prop.value.as_deref().map(str::trim).filter(|v| !v.is_empty());
            match prop.name.to_ascii_uppercase().as_str() {
                "UID" => uid = value.map(str::to_string),
                "SUMMARY" => summary = value.map(unescape_text),
                "DESCRIPTION" => description = value.map(unescape_text),
                "LOCATION" => location = value.map(unescape_text),
                "URL" => url = value.map(str::to_string),
                "DTSTART" => {
                    start = Some(IcsTime::from_property(prop).ok_or_else(|| {
                        format!("unparseable DTSTART '{}'", value.unwrap_or_default())
                    })?)
                }
                "DTEND" => end = IcsTime::from_property(prop),
                "DURATION" => duration = value.and_then(parse_duration),
                "RRULE" => match value.map(Rule::parse) {
                    Some(Ok(parsed)) => rule = Some(parsed),
                    Some(Err(reason)) => {
                        log::warn!("Ignoring recurrence rule: {}", reason);
                    }
                    None => {}
                },
                "EXDATE" => {
                    let tzid = param(prop, "TZID");
                    let date_only = param(prop, "VALUE")
                        .map(|v| v.eq_ignore_ascii_case("DATE"))
                        .unwrap_or(false);
                    exdates.extend(
                        value
                            .into_iter()
                            .flat_map(|v| v.split(','))
                            .filter_map(|v| IcsTime::parse(v, tzid, date_only)),
                    );
                }
                "RECURRENCE-ID" => recurrence_id = IcsTime::from_property(prop),
                "SEQUENCE" => sequence = value.and_then(|v| v.parse().ok()).unwrap_or(0),
                "STATUS" => cancelled = value.map(|v| v.eq_ignore_ascii_case("CANCELLED")).unwrap_or(false),
                _ => {}
            }
        }

        let uid = uid.ok_or_else(|| "event without UID".to_string())?;
        let start = start.ok_or_else(|| format!("event {} has no DTSTART", uid))?;

        Ok(Self {
            uid,
            summary,
            description,
            location,
            url,
            start,
            end,
            duration,
            rule,
            exdates,
            recurrence_id,
            sequence,
            cancelled,
        })
    }

    fn span<L: TimeZone>(&self, local: &L) -> Span {
        if self.start.is_date() {
            let days = match (&self.end, &self.duration) {
                (Some(end), _) => (end.date() - self.start.date()).num_days(),
                (None, Some(duration)) => duration.num_days(),
                (None, None) => 1,
            };
            return Span::Days(days.max(1));
        }

        let secs = match (&self.end, &self.duration) {
            (Some(end), _) => match (self.start.timestamp(local), end.timestamp(local)) {
                (Some(s), Some(e)) => e - s,
                _ => DEFAULT_EVENT_SECS,
            },
            (None, Some(duration)) => duration.num_seconds(),
            (None, None) => DEFAULT_EVENT_SECS,
        };
        Span::Seconds(secs.max(0))
    }

    fn bounds<L: TimeZone>(&self, start: &IcsTime, span: Span, local: &L) -> Option<(i64, i64)> {
        match span {
            Span::Days(days) => {
                let first = start.date();
                let after = first + TimeDelta::days(days);
                Some((
                    resolve(local, first.and_time(NaiveTime::MIN))?,
                    resolve(local, after.and_time(NaiveTime::MIN))?,
                ))
            }
            Span::Seconds(secs) => {
                let s = start.timestamp(local)?;
                Some((s, s + secs))
            }
        }
    }

    /// `(start, end)` of every occurrence of this event intersecting the day.
    fn occurrences<L: TimeZone>(
        &self,
        window: &DayWindow,
        overridden: &[&IcsTime],
        local: &L,
    ) -> Vec<(i64, i64)> {
        let span = self.span(local);

        let Some(rule) = self.rule.as_ref().filter(|_| self.recurrence_id.is_none()) else {
            return self
                .bounds(&self.start, span, local)
                .filter(|(s, e)| window.intersects(*s, *e))
                .into_iter()
                .collect();
        };

        let span_days = match span {
            Span::Days(days) => days,
            Span::Seconds(secs) => secs / SECS_PER_DAY + 1,
        };
        let lookback = span_days.min(MAX_LOOKBACK_DAYS) + 1;

        let until = rule
            .until
            .as_deref()
            .and_then(|u| IcsTime::parse(u, None, false))
            .map(|u| u.in_zone_of(&self.start));

        let first = self.start.date();
        let mut found = Vec::new();
        let mut date = window.day - TimeDelta::days(lookback);
        let last = window.day + TimeDelta::days(1);

        while date <= last {
            if rule.matches(first, date) {
                let occurrence = self.start.on_date(date);
                let before_until = match &until {
                    None => true,
                    Some(IcsTime::Date(u)) => date <= *u,
                    Some(u) => match (occurrence.timestamp(local), u.timestamp(local)) {
                        (Some(o), Some(u)) => o <= u,
                        _ => true,
                    },
                };
                let excluded = self
                    .exdates
                    .iter()
                    .chain(overridden.iter().copied())
                    .any(|x| x.same_instance(&occurrence, local));

                if before_until && !excluded && rule.within_count(first, date) {
                    if let Some((s, e)) = self.bounds(&occurrence, span, local) {
                        if window.intersects(s, e) {
                            found.push((s, e));
                        }
                    }
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        found
    }

    fn to_calendar_event(&self, start_time: i64, end_time: i64) -> CalendarEvent {
        CalendarEvent {
            id: self.uid.clone(),
            summary: self.summary.clone().unwrap_or_else(|| "(No title)".to_string()),
            description: self.description.clone(),
            location: self.location.clone(),
            start_time,
            end_time,
            all_day: self.start.is_date(),
            html_link: self.url.clone(),
            is_now: false,
            is_soon: false,
        }
    }
}

fn param<'a>(prop: &'a Property, name: &str) -> Option<&'a str> {
    prop.params
        .as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

/// Parses the `[+-]PnW` / `[+-]PnDTnHnMnS` forms of an ICS duration.
fn parse_duration(value: &str) -> Option<TimeDelta> {
    let value = value.trim();
    let (negative, rest) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    let rest = rest.strip_prefix('P').or_else(|| rest.strip_prefix('p'))?;

    let mut total = 0i64;
    let mut number = String::new();
    let mut in_time = false;
    let mut saw_unit = false;
    for c in rest.chars() {
        match c.to_ascii_uppercase() {
            '0'..='9' => number.push(c),
            'T' => in_time = true,
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                total += n * match (unit, in_time) {
                    ('W', false) => 7 * SECS_PER_DAY,
                    ('D', false) => SECS_PER_DAY,
                    ('H', true) => 3600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                saw_unit = true;
            }
        }
    }
    if !saw_unit || !number.is_empty() {
        return None;
    }
    Some(TimeDelta::seconds(if negative { -total } else { total }))
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
