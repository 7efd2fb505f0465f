//! # NMEA Sentence Decoder
//!
//! Turns raw sentence text into a [`Record`].
//!
//! The first comma separated token selects the grammar:
//!
//! - `$--PAD`: proprietary air data (temperature, humidity, pressure)
//! - `$GPRMC` / `$--RMC`: navigation fix
//! - anything else: generic numeric sentence stored by token position
//!
//! Decoding is a pure function of its inputs apart from the wall clock
//! timestamp taken by [`decode`]; [`decode_at`] takes the timestamp as an
//! argument.

use thiserror::Error;

use super::protocol::*;
use super::record::Record;

/// A sentence that could not be turned into a usable record
///
/// The `MALFORMED` record is handed back together with the reason so the
/// caller can still report which device and second it came from.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct DecodeError {
    /// Record with type `MALFORMED`
    pub record: Record,
    /// Human readable failure reason
    pub reason: String,
}

impl DecodeError {
    fn new(record: Record, reason: impl Into<String>) -> Self {
        Self {
            record: Record { kind: TYPE_MALFORMED.to_string(), ..record },
            reason: reason.into(),
        }
    }
}

type DecodeResult = std::result::Result<Record, DecodeError>;

/// Decode a sentence, stamping it with the current second
///
/// # Arguments
///
/// * `sentence` - Raw sentence text, e.g. `$--PAD,20315,452,101325,*PP`
/// * `device_id` - Identifier of the device the sentence came from
///
/// # Errors
///
/// Returns a [`DecodeError`] carrying a `MALFORMED` record if the sentence
/// is empty or violates its grammar. Whitespace is not empty: `" "` is one
/// unrecognised token and decodes as `RAWUNKNOWN`.
///
/// # Examples
///
/// ```
/// use nmea_rollup::nmea::decoder::decode;
///
/// let record = decode("$--PAD,293150,500,101325,*PP", 0x76).unwrap();
/// assert_eq!(record.kind, "PAD");
/// ```
pub fn decode(sentence: &str, device_id: u32) -> DecodeResult {
    decode_at(sentence, device_id, chrono::Utc::now().timestamp())
}

/// Decode a sentence observed at `timestamp` (seconds since epoch)
pub fn decode_at(sentence: &str, device_id: u32, timestamp: i64) -> DecodeResult {
    let record = Record::new(timestamp, TYPE_MALFORMED, device_id);

    if sentence.is_empty() {
        return Err(DecodeError::new(record, "received empty NMEA sentence"));
    }

    let tokens: Vec<&str> = sentence.split(NMEA_FIELD_SEPARATOR).collect();
    match tokens[0] {
        PAD_SENTENCE_HEAD => decode_pad(&tokens, record),
        head if is_rmc_head(head) => decode_rmc(&tokens, record),
        _ => decode_raw(&tokens, record),
    }
}

/// `$--PAD,<milli kelvin>,<tenth %RH>,<pressure / 100>,*<checksum>`
fn decode_pad(tokens: &[&str], mut record: Record) -> DecodeResult {
    if tokens.len() != PAD_TOKEN_COUNT {
        return Err(DecodeError::new(
            record,
            format!("malformed PAD sentence received, length: {}", tokens.len()),
        ));
    }

    let Ok(temperature) = tokens[1].parse::<i64>() else {
        return Err(DecodeError::new(record, "could not parse temperature from PAD sentence"));
    };
    let Ok(humidity) = tokens[2].parse::<i64>() else {
        return Err(DecodeError::new(record, "could not parse humidity from PAD sentence"));
    };
    let Ok(pressure) = tokens[3].parse::<i64>() else {
        return Err(DecodeError::new(record, "could not parse pressure from PAD sentence"));
    };

    record.kind = TYPE_PAD.to_string();
    record.set(FIELD_TEMPERATURE, temperature as f64 / 1000.0 - ZERO_CELSIUS_IN_KELVIN);
    record.set(FIELD_HUMIDITY, humidity as f64 / 10.0);
    record.set(FIELD_PRESSURE, pressure as f64 / 100.0);
    Ok(record)
}

/// `$GPRMC,time,status,lat,N|S,lon,E|W,speed,course,date,variation,E|W,mode*cs`
fn decode_rmc(tokens: &[&str], mut record: Record) -> DecodeResult {
    if tokens.len() != RMC_TOKEN_COUNT {
        return Err(DecodeError::new(
            record,
            format!("malformed RMC sentence received, length: {}", tokens.len()),
        ));
    }

    if tokens[RMC_STATUS_INDEX] != RMC_STATUS_VALID {
        return Err(DecodeError::new(record, "gps fix not established"));
    }

    let Some(mut latitude) = parse_finite(tokens[RMC_LATITUDE_INDEX]) else {
        return Err(DecodeError::new(record, "could not parse latitude from RMC sentence"));
    };
    match tokens[RMC_LATITUDE_HEMISPHERE_INDEX] {
        "N" => {}
        "S" => latitude = -latitude,
        _ => return Err(DecodeError::new(record, "invalid latitude heading in RMC sentence")),
    }

    let Some(mut longitude) = parse_finite(tokens[RMC_LONGITUDE_INDEX]) else {
        return Err(DecodeError::new(record, "could not parse longitude from RMC sentence"));
    };
    match tokens[RMC_LONGITUDE_HEMISPHERE_INDEX] {
        "E" => {}
        "W" => longitude = -longitude,
        _ => return Err(DecodeError::new(record, "invalid longitude heading in RMC sentence")),
    }

    record.kind = TYPE_RMC.to_string();
    record.set(FIELD_LATITUDE, latitude);
    record.set(FIELD_LONGITUDE, longitude);
    record.set(
        FIELD_SPEED,
        optional_value(tokens[RMC_SPEED_INDEX], ABSENT_COURSE_OR_SPEED),
    );
    record.set(
        FIELD_TRUE_COURSE,
        optional_value(tokens[RMC_TRUE_COURSE_INDEX], ABSENT_COURSE_OR_SPEED),
    );
    record.set(
        FIELD_MAGNETIC_VARIATION,
        optional_value(tokens[RMC_MAGNETIC_VARIATION_INDEX], ABSENT_MAGNETIC_VARIATION),
    );
    Ok(record)
}

/// Any other sentence: numeric tokens keyed by their position
fn decode_raw(tokens: &[&str], mut record: Record) -> DecodeResult {
    let head = tokens[0];
    record.kind = match head.get(1..SENTENCE_HEAD_LEN - 1) {
        Some(code) if head.len() == SENTENCE_HEAD_LEN => format!("{TYPE_RAW_PREFIX}{code}"),
        _ => TYPE_RAW_UNKNOWN.to_string(),
    };

    for (index, token) in tokens.iter().enumerate() {
        if let Some(value) = parse_finite(token) {
            record.set(index.to_string(), value);
        }
    }
    Ok(record)
}

/// Parse an optional numeric token, falling back to the absence sentinel
fn optional_value(token: &str, absent: f64) -> f64 {
    parse_finite(token).unwrap_or(absent)
}

/// `NaN` and infinities parse as floats but cannot be stored or averaged
fn parse_finite(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: i64 = 1_600_000_000;
    const RMC_FULL: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W,A*6A";

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_decode_pad_reference_sentence() {
        let result = decode_at("$--PAD,20315,452,101325,*PP", 42, TS);
        assert!(result.is_ok(), "Decode failed: {:?}", result.err());

        let record = result.unwrap();
        assert_eq!(record.kind, TYPE_PAD);
        assert_eq!(record.timestamp, TS);
        assert_eq!(record.device_id(), 42);
        assert_close(record.get(FIELD_TEMPERATURE).unwrap(), -252.835);
        assert_close(record.get(FIELD_HUMIDITY).unwrap(), 45.2);
        assert_close(record.get(FIELD_PRESSURE).unwrap(), 1013.25);
    }

    #[test]
    fn test_decode_pad_formula() {
        for (t, h, p) in [(0i64, 0i64, 0i64), (293_150, 1000, 100_000), (-5, 7, 123_456)] {
            let sentence = format!("$--PAD,{},{},{},*PP", t, h, p);
            let record = decode_at(&sentence, 1, TS).unwrap();
            assert_close(record.get(FIELD_TEMPERATURE).unwrap(), t as f64 / 1000.0 - 273.15);
            assert_close(record.get(FIELD_HUMIDITY).unwrap(), h as f64 / 10.0);
            assert_close(record.get(FIELD_PRESSURE).unwrap(), p as f64 / 100.0);
        }
    }

    #[test]
    fn test_decode_pad_wrong_length() {
        let err = decode_at("$--PAD,20315,452,*PP", 42, TS).unwrap_err();
        assert!(err.record.is_malformed());
        assert!(err.reason.contains("length: 4"));
    }

    #[test]
    fn test_decode_pad_rejects_non_integer_fields() {
        for sentence in [
            "$--PAD,20.5,452,101325,*PP",
            "$--PAD,20315,,101325,*PP",
            "$--PAD,20315,452,abc,*PP",
        ] {
            let result = decode_at(sentence, 42, TS);
            assert!(result.is_err(), "expected failure for {}", sentence);
            let err = result.unwrap_err();
            assert_eq!(err.record.kind, TYPE_MALFORMED);
            // No partial record
            assert!(err.record.get(FIELD_TEMPERATURE).is_none());
        }
    }

    #[test]
    fn test_decode_rmc_full_sentence() {
        let record = decode_at(RMC_FULL, 65_536, TS).unwrap();

        assert_eq!(record.kind, TYPE_RMC);
        assert_close(record.get(FIELD_LATITUDE).unwrap(), 4807.038);
        assert_close(record.get(FIELD_LONGITUDE).unwrap(), 1131.0);
        assert_close(record.get(FIELD_SPEED).unwrap(), 22.4);
        assert_close(record.get(FIELD_TRUE_COURSE).unwrap(), 84.4);
        // Read from the true course token
        assert_close(record.get(FIELD_MAGNETIC_VARIATION).unwrap(), 84.4);
        assert_eq!(record.device_id(), 65_536);
    }

    #[test]
    fn test_decode_rmc_dash_talker_and_south_west() {
        let sentence = "$--RMC,123519,A,3345.100,S,07040.500,W,5.0,270.0,230394,,,A*00";
        let record = decode_at(sentence, 1, TS).unwrap();
        assert_close(record.get(FIELD_LATITUDE).unwrap(), -3345.1);
        assert_close(record.get(FIELD_LONGITUDE).unwrap(), -7040.5);
    }

    #[test]
    fn test_decode_rmc_rejects_missing_fix() {
        for status in ["V", "", "a"] {
            let sentence = format!(
                "$GPRMC,123519,{},4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W,A*6A",
                status
            );
            let err = decode_at(&sentence, 1, TS).unwrap_err();
            assert!(err.record.is_malformed());
            assert_eq!(err.reason, "gps fix not established");
        }
    }

    #[test]
    fn test_decode_rmc_rejects_bad_hemisphere() {
        let lat = "$GPRMC,123519,A,4807.038,X,01131.000,E,022.4,084.4,230394,003.1,W,A*6A";
        assert!(decode_at(lat, 1, TS).is_err());

        let lon = "$GPRMC,123519,A,4807.038,N,01131.000,N,022.4,084.4,230394,003.1,W,A*6A";
        assert!(decode_at(lon, 1, TS).is_err());
    }

    #[test]
    fn test_decode_rmc_rejects_bad_coordinates() {
        let sentence = "$GPRMC,123519,A,,N,01131.000,E,022.4,084.4,230394,003.1,W,A*6A";
        let err = decode_at(sentence, 1, TS).unwrap_err();
        assert!(err.reason.contains("latitude"));
    }

    #[test]
    fn test_decode_rmc_rejects_non_finite_coordinates() {
        let sentence = "$GPRMC,123519,A,NaN,N,01131.000,E,022.4,084.4,230394,003.1,W,A*6A";
        assert!(decode_at(sentence, 1, TS).is_err());
    }

    #[test]
    fn test_decode_rmc_wrong_length() {
        let sentence = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        let err = decode_at(sentence, 1, TS).unwrap_err();
        assert!(err.reason.contains("length: 12"));
    }

    #[test]
    fn test_decode_rmc_absent_values_use_sentinels() {
        let sentence = "$GPRMC,123519,A,4807.038,N,01131.000,E,,,230394,,,A*6A";
        let record = decode_at(sentence, 1, TS).unwrap();
        assert_eq!(record.get(FIELD_SPEED), Some(-1.0));
        assert_eq!(record.get(FIELD_TRUE_COURSE), Some(-1.0));
        assert_eq!(record.get(FIELD_MAGNETIC_VARIATION), Some(1024.0));
    }

    #[test]
    fn test_decode_rmc_unparsable_optional_values_use_sentinels() {
        let sentence = "$GPRMC,123519,A,4807.038,N,01131.000,E,fast,north,230394,,,A*6A";
        let record = decode_at(sentence, 1, TS).unwrap();
        assert_eq!(record.get(FIELD_SPEED), Some(-1.0));
        assert_eq!(record.get(FIELD_TRUE_COURSE), Some(-1.0));
        assert_eq!(record.get(FIELD_MAGNETIC_VARIATION), Some(1024.0));
    }

    #[test]
    fn test_decode_raw_sentence_type_and_fields() {
        let record = decode_at("$GPGGA,123519,4807.038,N,,1.5", 9, TS).unwrap();
        assert_eq!(record.kind, "RAWGPGG");
        assert_eq!(record.get("1"), Some(123519.0));
        assert_eq!(record.get("2"), Some(4807.038));
        assert_eq!(record.get("3"), None);
        assert_eq!(record.get("4"), None);
        assert_eq!(record.get("5"), Some(1.5));
        // Three positional values plus deviceid
        assert_eq!(record.fields.len(), 4);
    }

    #[test]
    fn test_decode_raw_unknown_head() {
        let record = decode_at("hello,1,2", 9, TS).unwrap();
        assert_eq!(record.kind, TYPE_RAW_UNKNOWN);
        assert_eq!(record.get("1"), Some(1.0));
        assert_eq!(record.get("2"), Some(2.0));
    }

    #[test]
    fn test_decode_raw_skips_non_finite_values() {
        let record = decode_at("$XXABC,NaN,inf,3", 9, TS).unwrap();
        assert_eq!(record.kind, "RAWXXAB");
        assert_eq!(record.get("1"), None);
        assert_eq!(record.get("2"), None);
        assert_eq!(record.get("3"), Some(3.0));
    }

    #[test]
    fn test_decode_empty_sentence_fails() {
        let err = decode_at("", 3, TS).unwrap_err();
        assert!(err.record.is_malformed());
        assert_eq!(err.record.device_id(), 3);
        assert_eq!(err.record.timestamp, TS);
    }

    #[test]
    fn test_decode_whitespace_sentence_is_raw_unknown() {
        let record = decode_at(" ", 3, TS).unwrap();
        assert_eq!(record.kind, TYPE_RAW_UNKNOWN);
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.device_id(), 3);
    }

    #[test]
    fn test_decode_stamps_current_time() {
        let before = chrono::Utc::now().timestamp();
        let record = decode("$--PAD,1,2,3,*PP", 1).unwrap();
        let after = chrono::Utc::now().timestamp();
        assert!(record.timestamp >= before && record.timestamp <= after);
    }
}
