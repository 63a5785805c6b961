//! Bucket aggregation of sorted points.
//!
//! Buckets are anchored on data, not on the clock: a bucket opens at the
//! first point that does not fit the previous one and stays open while
//! points fall within one bucket width of its start. Each closed bucket
//! becomes one point at its midpoint carrying the mean of its values,
//! rounded to 3 decimals.

use time::Duration;

use sapwatch_types::{AggregationMode, DataPoint};

/// Aggregate points (sorted ascending) for the given mode.
///
/// Raw mode returns the points unchanged.
pub fn aggregate(points: &[DataPoint], mode: AggregationMode) -> Vec<DataPoint> {
    match mode.bucket_width() {
        None => points.to_vec(),
        Some(width) => bucket(points, width),
    }
}

struct OpenBucket {
    start: time::OffsetDateTime,
    sum: f64,
    count: usize,
}

impl OpenBucket {
    fn open(point: &DataPoint) -> Self {
        Self {
            start: point.at,
            sum: point.value,
            count: 1,
        }
    }

    fn close(self, width: Duration) -> DataPoint {
        let mean = self.sum / self.count as f64;
        DataPoint::new(self.start + width / 2, round3(mean))
    }
}

fn bucket(points: &[DataPoint], width: Duration) -> Vec<DataPoint> {
    let mut out = Vec::new();
    let mut open: Option<OpenBucket> = None;

    for point in points {
        match open.as_mut() {
            Some(current) if point.at - current.start < width => {
                current.sum += point.value;
                current.count += 1;
            }
            _ => {
                if let Some(done) = open.replace(OpenBucket::open(point)) {
                    out.push(done.close(width));
                }
            }
        }
    }

    if let Some(done) = open {
        out.push(done.close(width));
    }
    out
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn series(start: time::OffsetDateTime, step: Duration, values: &[f64]) -> Vec<DataPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| DataPoint::new(start + step * i as u32, *v))
            .collect()
    }

    #[test]
    fn test_raw_is_identity() {
        let points = series(
            datetime!(2023-01-01 0:00 UTC),
            Duration::minutes(5),
            &[1.0, 2.0, 3.0],
        );
        assert_eq!(aggregate(&points, AggregationMode::Raw), points);
    }

    #[test]
    fn test_hourly_single_bucket_at_midpoint() {
        let start = datetime!(2023-03-02 10:00 UTC);
        let values: Vec<f64> = (1..=12).map(f64::from).collect();
        let points = series(start, Duration::minutes(5), &values);

        let buckets = aggregate(&points, AggregationMode::Hourly);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].at, datetime!(2023-03-02 10:30 UTC));
        assert_eq!(buckets[0].value, 6.5);
    }

    #[test]
    fn test_bucket_closes_at_width() {
        let start = datetime!(2023-03-02 10:00 UTC);
        // Points at 10:00, 10:40 and 11:00; 11:00 is exactly one width away
        let points = vec![
            DataPoint::new(start, 1.0),
            DataPoint::new(start + Duration::minutes(40), 2.0),
            DataPoint::new(start + Duration::HOUR, 10.0),
        ];

        let buckets = aggregate(&points, AggregationMode::Hourly);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].value, 1.5);
        assert_eq!(buckets[1].at, datetime!(2023-03-02 11:30 UTC));
        assert_eq!(buckets[1].value, 10.0);
    }

    #[test]
    fn test_buckets_anchor_on_data_after_gap() {
        let points = vec![
            DataPoint::new(datetime!(2023-03-01 0:00 UTC), 1.0),
            DataPoint::new(datetime!(2023-03-03 7:13 UTC), 3.0),
        ];
        let buckets = aggregate(&points, AggregationMode::SixHourly);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[1].at, datetime!(2023-03-03 10:13 UTC));
    }

    #[test]
    fn test_mean_rounded_to_three_decimals() {
        let start = datetime!(2023-01-01 0:00 UTC);
        let points = series(start, Duration::minutes(10), &[1.0, 1.0, 1.0001, 2.0]);
        let buckets = aggregate(&points, AggregationMode::Daily);
        assert_eq!(buckets[0].value, 1.25);

        let thirds = series(start, Duration::minutes(10), &[1.0, 1.0, 2.0]);
        assert_eq!(aggregate(&thirds, AggregationMode::Weekly)[0].value, 1.333);
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(&[], AggregationMode::Daily).is_empty());
    }

    proptest::proptest! {
        #[test]
        fn buckets_are_sorted_and_fewer(
            gaps in proptest::collection::vec(0i64..20_000, 0..200),
            hourly in proptest::bool::ANY,
        ) {
            let mut at = datetime!(2023-01-01 0:00 UTC);
            let points: Vec<DataPoint> = gaps
                .iter()
                .map(|gap| {
                    at += Duration::seconds(*gap);
                    DataPoint::new(at, 1.0)
                })
                .collect();
            let mode = if hourly { AggregationMode::Hourly } else { AggregationMode::Daily };

            let buckets = aggregate(&points, mode);
            proptest::prop_assert!(buckets.len() <= points.len());
            for pair in buckets.windows(2) {
                proptest::prop_assert!(pair[0].at < pair[1].at);
            }
            for bucket in &buckets {
                proptest::prop_assert_eq!(bucket.value, 1.0);
            }
        }
    }
}
