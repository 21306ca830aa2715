//! GPS coordinates from EXIF metadata.

use std::io::Cursor;

use exif::{Exif, In, Tag, Value};
use serde::Serialize;
use tracing::debug;

/// A position in decimal degrees; south and west are negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
}

/// Read the GPS position embedded in `bytes` (JPEG, TIFF, PNG, WebP, HEIF).
///
/// Returns `None` when the image carries no EXIF block, no latitude or
/// longitude, or values of an unexpected type. A missing `N/S`/`E/W`
/// reference counts as north/east.
pub fn extract(bytes: &[u8]) -> Option<GpsFix> {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(e) => {
            debug!("no usable exif: {e}");
            return None;
        }
    };

    let lat = coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef)?;
    let lon = coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef)?;
    Some(GpsFix { lat, lon })
}

fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let dms = match &field.value {
        Value::Rational(parts) if parts.len() >= 3 => {
            [parts[0].to_f64(), parts[1].to_f64(), parts[2].to_f64()]
        }
        _ => return None,
    };
    if dms.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let reference = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(parts) => parts.first().and_then(|p| p.first()).map(|&b| b as char),
            _ => None,
        });

    Some(decimal_coords(dms, reference))
}

/// `degrees + minutes / 60 + seconds / 3600`, negated for `S` and `W`.
pub fn decimal_coords(dms: [f64; 3], reference: Option<char>) -> f64 {
    let decimal = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
    match reference {
        Some('S' | 'W' | 's' | 'w') => -decimal,
        _ => decimal,
    }
}
