//! # NMEA Sentence Constants
//!
//! Sentence heads, record type tags, field names and the "value absent"
//! sentinels shared by the decoder and the rollup engine.

/// Token separator inside a sentence
pub const NMEA_FIELD_SEPARATOR: char = ',';

/// Proprietary air data sentence head (temperature, humidity, pressure)
pub const PAD_SENTENCE_HEAD: &str = "$--PAD";

/// Recommended minimum navigation sentence heads
pub const RMC_SENTENCE_HEADS: [&str; 2] = ["$GPRMC", "$--RMC"];

/// Token count of a `$--PAD` sentence (head, t, h, p, checksum)
pub const PAD_TOKEN_COUNT: usize = 5;

/// Token count of an RMC sentence
pub const RMC_TOKEN_COUNT: usize = 13;

/// Length of a well-formed sentence head (`$` + talker + sentence code)
pub const SENTENCE_HEAD_LEN: usize = 6;

/// Record type of a navigation fix
pub const TYPE_RMC: &str = "RMC";

/// Record type of an environmental reading
pub const TYPE_PAD: &str = "PAD";

/// Prefix of generic numeric record types
pub const TYPE_RAW_PREFIX: &str = "RAW";

/// Record type of a generic sentence without a recognizable head
pub const TYPE_RAW_UNKNOWN: &str = "RAWUNKNOWN";

/// Record type returned alongside every decode failure
pub const TYPE_MALFORMED: &str = "MALFORMED";

/// Synthetic field carrying the device identifier
pub const FIELD_DEVICE_ID: &str = "deviceid";

pub const FIELD_LATITUDE: &str = "latitude";
pub const FIELD_LONGITUDE: &str = "longitude";
pub const FIELD_SPEED: &str = "speed";
pub const FIELD_TRUE_COURSE: &str = "truecourse";
pub const FIELD_MAGNETIC_VARIATION: &str = "magneticvariation";
pub const FIELD_TEMPERATURE: &str = "temperature";
pub const FIELD_HUMIDITY: &str = "humidity";
pub const FIELD_PRESSURE: &str = "pressure";

/// Speed / true course when the sentence leaves them empty
pub const ABSENT_COURSE_OR_SPEED: f64 = -1.0;

/// Magnetic variation when the sentence leaves it empty
pub const ABSENT_MAGNETIC_VARIATION: f64 = 1024.0;

/// 0 °C expressed in kelvin
pub const ZERO_CELSIUS_IN_KELVIN: f64 = 273.15;

/// RMC token positions
pub const RMC_STATUS_INDEX: usize = 2;
pub const RMC_LATITUDE_INDEX: usize = 3;
pub const RMC_LATITUDE_HEMISPHERE_INDEX: usize = 4;
pub const RMC_LONGITUDE_INDEX: usize = 5;
pub const RMC_LONGITUDE_HEMISPHERE_INDEX: usize = 6;
pub const RMC_SPEED_INDEX: usize = 7;
pub const RMC_TRUE_COURSE_INDEX: usize = 8;

/// Magnetic variation shares the true course token. Stored data depends on
/// this layout, so it is kept even though the variation itself lives at 10.
pub const RMC_MAGNETIC_VARIATION_INDEX: usize = RMC_TRUE_COURSE_INDEX;

/// Fix status token meaning "data valid"
pub const RMC_STATUS_VALID: &str = "A";

/// Returns true if `head` selects the RMC grammar
pub fn is_rmc_head(head: &str) -> bool {
    RMC_SENTENCE_HEADS.contains(&head)
}
