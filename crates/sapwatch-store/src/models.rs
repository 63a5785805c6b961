//! Data models for stored data.

use sapwatch_types::SensorDevice;
use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;

/// A reading to merge into the store.
///
/// `None` values never overwrite stored ones.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    /// Instant of the measurement.
    pub at: OffsetDateTime,
    /// Device short code.
    pub sensor_code: String,
    /// Device display name.
    pub device_name: String,
    /// Plant the device is installed on.
    pub plant_id: Option<i64>,
    /// Stem diameter (mm).
    pub diameter: Option<f64>,
    /// Sap flow (g/h).
    pub sap_flow: Option<f64>,
    /// Whether the values passed validation.
    pub is_valid: bool,
    /// Whether the values were interpolated rather than measured.
    pub is_interpolated: bool,
}

impl NewReading {
    /// A valid, measured reading with no values yet.
    pub fn new(
        sensor_code: impl Into<String>,
        device_name: impl Into<String>,
        at: OffsetDateTime,
    ) -> Self {
        Self {
            at,
            sensor_code: sensor_code.into(),
            device_name: device_name.into(),
            plant_id: None,
            diameter: None,
            sap_flow: None,
            is_valid: true,
            is_interpolated: false,
        }
    }

    /// A reading keyed by the device's code and name.
    pub fn for_device(device: &SensorDevice, at: OffsetDateTime) -> Self {
        Self::new(&device.code, &device.name, at)
    }

    /// Set the diameter value.
    #[must_use]
    pub fn diameter(mut self, value: Option<f64>) -> Self {
        self.diameter = value;
        self
    }

    /// Set the sap flow value.
    #[must_use]
    pub fn sap_flow(mut self, value: Option<f64>) -> Self {
        self.sap_flow = value;
        self
    }

    /// Link the reading to a plant.
    #[must_use]
    pub fn plant(mut self, plant_id: i64) -> Self {
        self.plant_id = Some(plant_id);
        self
    }
}

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// Instant of the measurement.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    /// UTC time of day, `HH:MM:SS`.
    pub time_of_day: String,
    /// Sap flow (g/h).
    pub sap_flow: Option<f64>,
    /// Stem diameter (mm).
    pub diameter: Option<f64>,
    /// Device short code.
    pub sensor_code: String,
    /// Device display name.
    pub device_name: String,
    /// Plant row, if linked.
    pub plant_id: Option<i64>,
    pub is_valid: bool,
    pub is_interpolated: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A facility row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Facility {
    pub id: i64,
    pub name: String,
}

/// A plant row, one per device code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plant {
    pub id: i64,
    pub facility_id: i64,
    pub code: String,
    pub name: String,
}

/// Stored reading counts and range for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadingSummary {
    /// Number of stored readings.
    pub count: u64,
    /// Oldest stored instant.
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_at: Option<OffsetDateTime>,
    /// Newest stored instant (the sync cursor).
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_at: Option<OffsetDateTime>,
}

/// UTC `HH:MM:SS` of an instant.
pub fn time_of_day(at: OffsetDateTime) -> String {
    let utc = at.to_offset(time::UtcOffset::UTC);
    utc.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| format!("{:02}:{:02}:{:02}", utc.hour(), utc.minute(), utc.second()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_time_of_day_is_utc() {
        assert_eq!(time_of_day(datetime!(2023-03-02 23:05:09 UTC)), "23:05:09");
        assert_eq!(time_of_day(datetime!(2023-03-03 0:05 +1)), "23:05:00");
    }

    #[test]
    fn test_new_reading_builder() {
        let at = datetime!(2023-03-02 23:00 UTC);
        let reading = NewReading::new("D1", "Row 1", at)
            .diameter(Some(4.49))
            .plant(3);

        assert_eq!(reading.diameter, Some(4.49));
        assert_eq!(reading.sap_flow, None);
        assert_eq!(reading.plant_id, Some(3));
        assert!(reading.is_valid);
        assert!(!reading.is_interpolated);
    }
}
