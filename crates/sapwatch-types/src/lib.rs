//! Shared types for sapwatch plant-physiology telemetry.
//!
//! This crate provides the plain data types used by the remote data client
//! (sapwatch-core), the local store (sapwatch-store) and the sync service
//! (sapwatch-service).
//!
//! # Example
//!
//! ```
//! use sapwatch_types::{AggregationMode, FetchWindow};
//! use time::{Duration, OffsetDateTime};
//!
//! let end = OffsetDateTime::now_utc();
//! let window = FetchWindow::new("12345", end - Duration::days(14), end);
//! assert_eq!(AggregationMode::suggest_for_span(window.span()), AggregationMode::Hourly);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    AggregationMode, ChannelId, ChannelKind, DataPoint, FetchMetadata, FetchResult, FetchWindow,
    SensorDevice,
};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::{Duration, macros::datetime};

    proptest! {
        #[test]
        fn split_chunks_are_contiguous(span_days in 1i64..2000, chunk_days in 1i64..400) {
            let start = datetime!(2020-01-01 0:00 UTC);
            let window = FetchWindow::new("1", start, start + Duration::days(span_days));
            let chunks = window.split(Duration::days(chunk_days));

            prop_assert_eq!(chunks.first().map(|c| c.start), Some(window.start));
            prop_assert_eq!(chunks.last().map(|c| c.end), Some(window.end));
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
            for chunk in &chunks {
                prop_assert!(chunk.span() <= Duration::days(chunk_days));
                prop_assert!(!chunk.is_empty());
            }
        }

        #[test]
        fn suggested_mode_is_monotonic(a in 0i64..1000, b in 0i64..1000) {
            let (short, long) = if a <= b { (a, b) } else { (b, a) };
            let short_mode = AggregationMode::suggest_for_span(Duration::days(short));
            let long_mode = AggregationMode::suggest_for_span(Duration::days(long));
            let rank = |m: AggregationMode| m.bucket_width().unwrap_or(Duration::ZERO);
            prop_assert!(rank(short_mode) <= rank(long_mode));
        }
    }
}
