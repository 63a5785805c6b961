//! Parsing of remote XML responses.
//!
//! A response is only trusted once every element it opens, the root
//! included, has been closed. Anything shorter is reported as
//! [`Error::Truncated`]; a malformed body is [`Error::Parse`]. Comments,
//! processing instructions and whitespace after the root are ignored, a
//! second element is not.
//!
//! Every element carrying both a `DateTime` and a `Value` attribute is a
//! measurement, whatever its name or depth.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use sapwatch_types::{ChannelId, DataPoint};

use crate::error::{Error, Result};

const DATETIME_ATTR: &str = "DateTime";
const VALUE_ATTR: &str = "Value";

/// Parse a response body into points sorted ascending by instant.
///
/// # Example
///
/// ```
/// use sapwatch_core::xml::parse_response;
///
/// let body = r#"<response><v DateTime="2023-03-02T23:00:00Z" Value="4.49"/></response>"#;
/// let points = parse_response(body, 101).unwrap();
/// assert_eq!(points.len(), 1);
/// assert_eq!(points[0].value, 4.49);
/// ```
pub fn parse_response(body: &str, channel: ChannelId) -> Result<Vec<DataPoint>> {
    let truncated = || Error::Truncated {
        channel,
        received_bytes: body.len(),
    };

    let mut reader = Reader::from_str(body);
    let mut points = Vec::new();
    let mut depth = 0usize;
    let mut root_closed = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if root_closed {
                    return Err(element_after_root(&reader));
                }
                depth += 1;
                if let Some(point) = point_from_element(&e)? {
                    points.push(point);
                }
            }
            Ok(Event::Empty(e)) => {
                if root_closed {
                    return Err(element_after_root(&reader));
                }
                if let Some(point) = point_from_element(&e)? {
                    points.push(point);
                }
                root_closed = depth == 0;
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                root_closed = depth == 0;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            // Input ended inside a tag, comment or declaration
            Err(quick_xml::Error::Syntax(_)) if !root_closed => return Err(truncated()),
            Err(e) => {
                return Err(Error::Parse(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
        }
    }

    if !root_closed {
        return Err(truncated());
    }

    points.sort_by(|a, b| a.at.cmp(&b.at));
    Ok(points)
}

fn element_after_root(reader: &Reader<&[u8]>) -> Error {
    Error::Parse(format!(
        "element after root at byte {}",
        reader.buffer_position()
    ))
}

fn point_from_element(element: &BytesStart<'_>) -> Result<Option<DataPoint>> {
    let Some(raw_at) = attribute(element, DATETIME_ATTR)? else {
        return Ok(None);
    };
    let Some(raw_value) = attribute(element, VALUE_ATTR)? else {
        return Ok(None);
    };

    let Some(at) = parse_instant(&raw_at) else {
        debug!("Skipping value with unparseable instant {:?}", raw_at);
        return Ok(None);
    };

    match raw_value.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(DataPoint::new(at, value))),
        _ => {
            debug!("Skipping non-numeric value {:?} at {}", raw_value, raw_at);
            Ok(None)
        }
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| Error::Parse(format!("attribute {}: {}", name, e)))?;

    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::Parse(format!("attribute {}: {}", name, e)))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

/// Parse an instant. Values without an offset are taken as UTC.
pub(crate) fn parse_instant(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(at);
    }

    let naive = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    ];

    naive
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(raw, format).ok())
        .map(PrimitiveDateTime::assume_utc)
}
