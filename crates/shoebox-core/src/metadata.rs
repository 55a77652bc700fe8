use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Tag, Value};

use crate::sidecar;

/// GPS position in decimal degrees, altitude in meters above sea level.
///
/// Coordinates are normalized to the precision the sidecar stores (whole
/// degrees plus minutes at four decimals) so extracted and re-read records
/// compare equal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// Extracted per-item metadata. Absent fields stay None - never guessed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    pub capture_time: Option<DateTime<Utc>>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens_model: Option<String>,
    /// Shutter speed as written, e.g. "1/250"
    pub exposure_time: Option<String>,
    /// Aperture, e.g. "2.8"
    pub f_number: Option<String>,
    pub iso_speed: Option<u32>,
    /// Millimeters, e.g. "50.0"
    pub focal_length: Option<String>,
    pub gps: Option<GpsPosition>,
}

impl MetadataRecord {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether two records disagree on any field.
    pub fn differs(&self, other: &Self) -> bool {
        self != other
    }
}

/// Whether the file looks like something kamadak-exif can read.
pub fn has_exif_container(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map_or(false, |mime| mime.type_() == mime_guess::mime::IMAGE)
}

/// Read whatever EXIF the file exposes into a record.
///
/// A file without an EXIF container (or with one that fails to parse)
/// yields an empty record; only failing to open the file is an error.
pub fn extract(path: &Path) -> std::io::Result<MetadataRecord> {
    if !has_exif_container(path) {
        return Ok(MetadataRecord::default());
    }

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else {
        return Ok(MetadataRecord::default());
    };

    Ok(MetadataRecord {
        capture_time: capture_time_of(&exif),
        camera_make: ascii_field(&exif, Tag::Make),
        camera_model: ascii_field(&exif, Tag::Model),
        lens_model: ascii_field(&exif, Tag::LensModel),
        exposure_time: rational_field(&exif, Tag::ExposureTime).map(format_exposure),
        f_number: rational_field(&exif, Tag::FNumber).map(|r| format!("{:.1}", r.to_f64())),
        iso_speed: exif
            .get_field(Tag::PhotographicSensitivity, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0)),
        focal_length: rational_field(&exif, Tag::FocalLength).map(|r| format!("{:.1}", r.to_f64())),
        gps: gps_of(&exif),
    })
}

/// Capture timestamp alone, for the scanner's timestamp resolution.
pub fn exif_capture_time(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    capture_time_of(&exif)
}

fn capture_time_of(exif: &exif::Exif) -> Option<DateTime<Utc>> {
    let tags = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

    for tag in &tags {
        if let Some(field) = exif.get_field(*tag, In::PRIMARY) {
            if let Value::Ascii(ref vecs) = field.value {
                if let Some(bytes) = vecs.first() {
                    let raw = String::from_utf8_lossy(bytes);
                    if let Some(dt) = parse_exif_datetime(raw.trim()) {
                        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
                    }
                }
            }
        }
    }

    None
}

/// EXIF datetimes carry no timezone; they are taken as UTC as-is.
fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s
        .replace('-', ":")
        .replace('/', ":")
        .replace('\\', ":")
        .replace('.', ":");

    if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, "%Y:%m:%d %H:%M:%S") {
        return Some(dt);
    }

    if let Ok(d) = chrono::NaiveDate::parse_from_str(cleaned.split(' ').next()?, "%Y:%m:%d") {
        return d.and_hms_opt(0, 0, 0);
    }

    None
}

fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Ascii(ref vecs) = field.value {
        let s = String::from_utf8_lossy(vecs.first()?).trim().to_string();
        if !s.is_empty() {
            return Some(s);
        }
    }
    None
}

fn rational_field(exif: &exif::Exif, tag: Tag) -> Option<exif::Rational> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Rational(ref v) = field.value {
        return v.first().copied();
    }
    None
}

fn format_exposure(r: exif::Rational) -> String {
    if r.denom == 1 {
        format!("{}", r.num)
    } else {
        format!("{}/{}", r.num, r.denom)
    }
}

fn gps_of(exif: &exif::Exif) -> Option<GpsPosition> {
    let lat = dms_field(exif, Tag::GPSLatitude)?;
    let lon = dms_field(exif, Tag::GPSLongitude)?;
    let lat_sign = hemisphere_sign(exif, Tag::GPSLatitudeRef, 'S');
    let lon_sign = hemisphere_sign(exif, Tag::GPSLongitudeRef, 'W');

    let altitude = rational_field(exif, Tag::GPSAltitude).map(|r| {
        let below_sea = exif
            .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            == Some(1);
        let v = (r.to_f64() * 10.0).round() / 10.0;
        if below_sea {
            -v
        } else {
            v
        }
    });

    Some(GpsPosition {
        latitude: sidecar::normalize_coord(lat * lat_sign),
        longitude: sidecar::normalize_coord(lon * lon_sign),
        altitude,
    })
}

/// Degrees/minutes/seconds rationals to decimal degrees.
fn dms_field(exif: &exif::Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Rational(ref v) = field.value {
        let deg = v.first()?.to_f64();
        let min = v.get(1).map(|r| r.to_f64()).unwrap_or(0.0);
        let sec = v.get(2).map(|r| r.to_f64()).unwrap_or(0.0);
        return Some(deg + min / 60.0 + sec / 3600.0);
    }
    None
}

fn hemisphere_sign(exif: &exif::Exif, tag: Tag, negative: char) -> f64 {
    let is_negative = exif
        .get_field(tag, In::PRIMARY)
        .and_then(|f| {
            if let Value::Ascii(ref vecs) = f.value {
                vecs.first()
                    .and_then(|b| b.first())
                    .map(|c| (*c as char).eq_ignore_ascii_case(&negative))
            } else {
                None
            }
        })
        .unwrap_or(false);
    if is_negative {
        -1.0
    } else {
        1.0
    }
}
