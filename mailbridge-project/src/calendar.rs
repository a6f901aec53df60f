//! Decoding `text/calendar` parts and locating a conferencing URL.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use icalendar::{Calendar, CalendarComponent, Component, EventLike};
use linkify::{LinkFinder, LinkKind};

use crate::error::{ProjectError, Result};

/// Hostnames recognized as conferencing-link providers; `join_url` is only
/// populated when a scanned URL's host matches one of these.
const KNOWN_CONFERENCING_HOSTS: &[&str] =
    &["zoom.us", "meet.google.com", "teams.microsoft.com", "teams.live.com", "webex.com"];

/// Structured fields decoded from one `VEVENT`, the Projector's input for
/// creating or updating a calendar page.
#[derive(Debug, Clone)]
pub struct CalendarInvite {
    pub event_uid: String,
    pub title: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub organizer: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub join_url: Option<String>,
}

/// Decode the first `VEVENT` found in a raw `text/calendar` part.
pub fn decode_invite(raw: &[u8]) -> Result<CalendarInvite> {
    let text = String::from_utf8_lossy(raw);
    let calendar: Calendar = text
        .parse()
        .map_err(|e: <Calendar as std::str::FromStr>::Err| ProjectError::Calendar(e.to_string()))?;

    let event = calendar
        .components
        .iter()
        .find_map(|component| match component {
            CalendarComponent::Event(event) => Some(event),
            _ => None,
        })
        .ok_or_else(|| ProjectError::Calendar("no VEVENT component present".to_string()))?;

    let event_uid = event
        .get_uid()
        .ok_or_else(|| ProjectError::Calendar("VEVENT missing UID".to_string()))?
        .to_string();
    let title = event.get_summary().unwrap_or_default().to_string();
    let location = event.get_location().map(str::to_string);
    let description = event.get_description().map(str::to_string);
    let organizer = event.properties().get("ORGANIZER").map(|p| p.value().trim_start_matches("mailto:").to_string());

    let (start, all_day_start) = event.properties().get("DTSTART").map_or((None, false), |p| parse_ics_datetime(p.value()));
    let (end, _) = event.properties().get("DTEND").map_or((None, false), |p| parse_ics_datetime(p.value()));

    let join_url = find_conferencing_url(description.as_deref().unwrap_or(""))
        .or_else(|| find_conferencing_url(location.as_deref().unwrap_or("")));

    Ok(CalendarInvite {
        event_uid,
        title,
        start,
        end,
        all_day: all_day_start,
        organizer,
        location,
        description,
        join_url,
    })
}

/// Parse an ICS `DTSTART`/`DTEND` value, which is either a bare date
/// (`YYYYMMDD`, all-day) or a date-time (`YYYYMMDDTHHMMSS[Z]`).
fn parse_ics_datetime(value: &str) -> (Option<DateTime<Utc>>, bool) {
    let value = value.trim_end_matches('Z');
    if value.len() == 8 {
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
            return (date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()), true);
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return (Some(dt.and_utc()), false);
    }
    (None, false)
}

/// Scan `text` for a URL whose host matches a known conferencing provider.
fn find_conferencing_url(text: &str) -> Option<String> {
    let mut finder = LinkFinder::new();
    finder.kinds(&[LinkKind::Url]);
    finder
        .links(text)
        .map(|link| link.as_str().to_string())
        .find(|url| KNOWN_CONFERENCING_HOSTS.iter().any(|host| url.contains(host)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_INVITE: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:u1\r\nSUMMARY:Planning sync\r\nDTSTART:20240101T120000Z\r\nDTEND:20240101T130000Z\r\nORGANIZER:mailto:alice@example.com\r\nLOCATION:Join via https://zoom.us/j/12345\r\nDESCRIPTION:Weekly planning.\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[test]
    fn decodes_core_event_fields() {
        let invite = decode_invite(SAMPLE_INVITE.as_bytes()).unwrap();
        assert_eq!(invite.event_uid, "u1");
        assert_eq!(invite.title, "Planning sync");
        assert!(!invite.all_day);
        assert_eq!(invite.organizer.as_deref(), Some("alice@example.com"));
        assert_eq!(invite.join_url.as_deref(), Some("https://zoom.us/j/12345"));
    }

    #[test]
    fn all_day_events_have_no_time_component() {
        let raw = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:u2\r\nSUMMARY:Holiday\r\nDTSTART:20240704\r\nDTEND:20240705\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let invite = decode_invite(raw.as_bytes()).unwrap();
        assert!(invite.all_day);
        assert!(invite.start.is_some());
    }

    #[test]
    fn missing_vevent_is_rejected() {
        let raw = "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n";
        assert!(decode_invite(raw.as_bytes()).is_err());
    }
}
