use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::metadata::{GpsPosition, MetadataRecord};

pub const SIDECAR_EXT: &str = "xmp";

/// Sidecar path for a media file: same stem, `.xmp` extension.
/// The path planner keys collisions on the generated stem, so this mapping
/// stays one-to-one.
pub fn sidecar_path(media_path: &Path) -> PathBuf {
    media_path.with_extension(SIDECAR_EXT)
}

/// Render a minimal XMP packet containing only populated fields.
///
/// Field layout follows the standard xmp/tiff/exif/aux namespaces so any
/// XMP-aware viewer can read it back.
pub fn render(record: &MetadataRecord) -> String {
    let mut fields = String::new();

    if let Some(ts) = record.capture_time {
        push_field(&mut fields, "xmp:CreateDate", &format_datetime(ts));
    }
    if let Some(ref v) = record.camera_make {
        push_field(&mut fields, "tiff:Make", v);
    }
    if let Some(ref v) = record.camera_model {
        push_field(&mut fields, "tiff:Model", v);
    }
    if let Some(ref v) = record.lens_model {
        push_field(&mut fields, "aux:Lens", v);
    }
    if let Some(ref v) = record.exposure_time {
        push_field(&mut fields, "exif:ExposureTime", v);
    }
    if let Some(ref v) = record.f_number {
        push_field(&mut fields, "exif:FNumber", v);
    }
    if let Some(v) = record.iso_speed {
        push_field(&mut fields, "exif:ISOSpeedRatings", &v.to_string());
    }
    if let Some(ref v) = record.focal_length {
        push_field(&mut fields, "exif:FocalLength", v);
    }
    if let Some(gps) = record.gps {
        push_field(&mut fields, "exif:GPSLatitude", &format_coord(gps.latitude, 'N', 'S'));
        push_field(
            &mut fields,
            "exif:GPSLongitude",
            &format_coord(gps.longitude, 'E', 'W'),
        );
        if let Some(alt) = gps.altitude {
            push_field(&mut fields, "exif:GPSAltitude", &format!("{alt:.1}"));
        }
    }

    format!(
        "<?xpacket begin=\"\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n\
         <x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n\
         \x20<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n\
         \x20\x20<rdf:Description rdf:about=\"\"\n\
         \x20\x20\x20\x20xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\"\n\
         \x20\x20\x20\x20xmlns:tiff=\"http://ns.adobe.com/tiff/1.0/\"\n\
         \x20\x20\x20\x20xmlns:exif=\"http://ns.adobe.com/exif/1.0/\"\n\
         \x20\x20\x20\x20xmlns:aux=\"http://ns.adobe.com/exif/1.0/aux/\">\n\
         {fields}\
         \x20\x20</rdf:Description>\n\
         \x20</rdf:RDF>\n\
         </x:xmpmeta>\n\
         <?xpacket end=\"w\"?>\n"
    )
}

/// Parse a record back out of a packet `render` wrote. Unknown or missing
/// elements stay None; every field `render` emits round-trips losslessly.
pub fn parse(xml: &str) -> MetadataRecord {
    let gps = match (
        element(xml, "exif:GPSLatitude").and_then(|s| parse_coord(&s)),
        element(xml, "exif:GPSLongitude").and_then(|s| parse_coord(&s)),
    ) {
        (Some(latitude), Some(longitude)) => Some(GpsPosition {
            latitude,
            longitude,
            altitude: element(xml, "exif:GPSAltitude").and_then(|s| s.trim().parse().ok()),
        }),
        _ => None,
    };

    MetadataRecord {
        capture_time: element(xml, "xmp:CreateDate").and_then(|s| parse_datetime(&s)),
        camera_make: element(xml, "tiff:Make"),
        camera_model: element(xml, "tiff:Model"),
        lens_model: element(xml, "aux:Lens"),
        exposure_time: element(xml, "exif:ExposureTime"),
        f_number: element(xml, "exif:FNumber"),
        iso_speed: element(xml, "exif:ISOSpeedRatings").and_then(|s| s.trim().parse().ok()),
        focal_length: element(xml, "exif:FocalLength"),
        gps,
    }
}

pub fn write_sidecar(path: &Path, record: &MetadataRecord) -> io::Result<()> {
    fs::write(path, render(record))
}

pub fn read_sidecar(path: &Path) -> io::Result<MetadataRecord> {
    Ok(parse(&fs::read_to_string(path)?))
}

fn push_field(out: &mut String, tag: &str, value: &str) {
    out.push_str("   <");
    out.push_str(tag);
    out.push('>');
    out.push_str(&escape(value));
    out.push_str("</");
    out.push_str(tag);
    out.push_str(">\n");
}

fn element(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(unescape(&xml[start..end]))
}

fn format_datetime(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// XMP GPS convention: whole degrees, decimal minutes, hemisphere letter
/// ("37,46.4957N").
fn format_coord(value: f64, positive: char, negative: char) -> String {
    let hemisphere = if value < 0.0 { negative } else { positive };
    let abs = value.abs();
    let mut degrees = abs.trunc() as u32;
    let mut minutes = ((abs - abs.trunc()) * 60.0 * 10_000.0).round() / 10_000.0;
    if minutes >= 60.0 {
        degrees += 1;
        minutes = 0.0;
    }
    format!("{degrees},{minutes:.4}{hemisphere}")
}

fn parse_coord(s: &str) -> Option<f64> {
    let s = s.trim();
    if !s.is_ascii() || s.len() < 2 {
        return None;
    }
    let hemisphere = s.chars().last()?;
    let (degrees, minutes) = s[..s.len() - 1].split_once(',')?;
    let value = degrees.parse::<f64>().ok()? + minutes.parse::<f64>().ok()? / 60.0;
    match hemisphere.to_ascii_uppercase() {
        'S' | 'W' => Some(-value),
        'N' | 'E' => Some(value),
        _ => None,
    }
}

/// Clamp a decimal-degree coordinate to the precision the sidecar stores,
/// so a record extracted from EXIF compares equal to the same record read
/// back from its sidecar.
pub(crate) fn normalize_coord(value: f64) -> f64 {
    parse_coord(&format_coord(value, 'N', 'S')).unwrap_or(value)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn full_record() -> MetadataRecord {
        MetadataRecord {
            capture_time: Some(Utc.with_ymd_and_hms(2024, 11, 4, 14, 2, 15).unwrap()),
            camera_make: Some("Canon".into()),
            camera_model: Some("EOS R6".into()),
            lens_model: Some("RF 35mm F1.8".into()),
            exposure_time: Some("1/250".into()),
            f_number: Some("2.8".into()),
            iso_speed: Some(400),
            focal_length: Some("35.0".into()),
            gps: Some(GpsPosition {
                latitude: normalize_coord(37.774929),
                longitude: normalize_coord(-122.419418),
                altitude: Some(16.0),
            }),
        }
    }

    #[test]
    fn test_round_trip_full_record() {
        let record = full_record();
        let parsed = parse(&render(&record));
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_round_trip_partial_record() {
        let record = MetadataRecord {
            capture_time: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
            camera_make: Some("Apple".into()),
            ..Default::default()
        };
        let parsed = parse(&render(&record));
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_only_populated_fields_rendered() {
        let record = MetadataRecord {
            camera_make: Some("Sony".into()),
            ..Default::default()
        };
        let xml = render(&record);
        assert!(xml.contains("<tiff:Make>Sony</tiff:Make>"));
        assert!(!xml.contains("tiff:Model"));
        assert!(!xml.contains("exif:GPSLatitude"));
        assert!(!xml.contains("xmp:CreateDate"));
    }

    #[test]
    fn test_escaping_round_trip() {
        let record = MetadataRecord {
            camera_model: Some("Q&A <proto> \"x\"".into()),
            ..Default::default()
        };
        let xml = render(&record);
        assert!(!xml.contains("<proto>"));
        assert_eq!(parse(&xml), record);
    }

    #[test]
    fn test_gps_format() {
        assert_eq!(format_coord(37.774929, 'N', 'S'), "37,46.4957N");
        assert_eq!(format_coord(-122.419418, 'E', 'W'), "122,25.1651W");
    }

    #[test]
    fn test_gps_parse_sign() {
        assert!(parse_coord("37,46.4957N").unwrap() > 0.0);
        assert!(parse_coord("122,25.1651W").unwrap() < 0.0);
        assert!(parse_coord("garbage").is_none());
    }

    #[test]
    fn test_normalize_coord_is_stable() {
        let v = normalize_coord(37.774929);
        assert_eq!(normalize_coord(v), v);
        let neg = normalize_coord(-122.419418);
        assert_eq!(normalize_coord(neg), neg);
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/a/20241104-140215-trip.JPG")),
            PathBuf::from("/a/20241104-140215-trip.xmp")
        );
    }

    #[test]
    fn test_write_read_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.xmp");
        let record = full_record();
        write_sidecar(&path, &record).unwrap();
        assert_eq!(read_sidecar(&path).unwrap(), record);
    }

    #[test]
    fn test_empty_record_renders_wellformed() {
        let xml = render(&MetadataRecord::default());
        assert!(xml.starts_with("<?xpacket"));
        assert!(xml.contains("</x:xmpmeta>"));
        assert_eq!(parse(&xml), MetadataRecord::default());
    }
}
