//! Small shared helpers.

/// One-at-a-time string hash. Reduced `% 100000` it yields the 5-digit
/// node/reflector id derived from a configured name.
pub fn name_hash(name: &str) -> u32 {
    let mut hash: u32 = 0;
    for b in name.bytes() {
        hash = hash.wrapping_add(b as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }

    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// Derive the 6-character Maidenhead locator from a position. Out-of-range
/// coordinates collapse to `"AA00AA"`.
pub fn locator(latitude: f32, longitude: f32) -> String {
    if !(-90.0..=90.0).contains(&latitude) || !(-360.0..=360.0).contains(&longitude) {
        return "AA00AA".to_string();
    }

    let mut latitude = latitude + 90.0;
    let mut longitude = longitude;

    if longitude > 180.0 {
        longitude -= 360.0;
    }
    if longitude < -180.0 {
        longitude += 360.0;
    }
    longitude += 180.0;

    let mut out = String::with_capacity(6);

    let lon = (longitude / 20.0).floor();
    let lat = (latitude / 10.0).floor();
    out.push((b'A' + lon as u8) as char);
    out.push((b'A' + lat as u8) as char);

    longitude -= lon * 20.0;
    latitude -= lat * 10.0;

    let lon = (longitude / 2.0).floor();
    let lat = latitude.floor();
    out.push((b'0' + lon as u8) as char);
    out.push((b'0' + lat as u8) as char);

    longitude -= lon * 2.0;
    latitude -= lat;

    let lon = (longitude / (2.0 / 24.0)).floor();
    let lat = (latitude / (1.0 / 24.0)).floor();
    out.push((b'A' + lon as u8) as char);
    out.push((b'A' + lat as u8) as char);

    out
}
