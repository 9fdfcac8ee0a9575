//! Grid cells and great-circle distance

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Past this many cells a radius query skips the cell pre-filter
pub const MAX_CELLS: usize = 4096;

/// Haversine distance in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Grid cell containing a point
pub fn cell_of(latitude: f64, longitude: f64, cell_degrees: f64) -> (i64, i64) {
    (
        (latitude / cell_degrees).floor() as i64,
        (longitude / cell_degrees).floor() as i64,
    )
}

/// Cells intersecting the bounding box of a circle, or `None` when the box is
/// too large for a useful pre-filter
pub fn cells_within(
    latitude: f64,
    longitude: f64,
    radius_km: f64,
    cell_degrees: f64,
) -> Option<Vec<(i64, i64)>> {
    let angle = radius_km / EARTH_RADIUS_KM;
    let phi = latitude.to_radians();

    // A circle reaching a pole spans every longitude
    if angle >= std::f64::consts::FRAC_PI_2 - phi.abs() {
        return None;
    }
    let lat_span = angle.to_degrees();
    let lon_span = (angle.sin() / phi.cos()).asin().to_degrees();

    // Boxes crossing the antimeridian are not split
    if longitude - lon_span < -180.0 || longitude + lon_span > 180.0 {
        return None;
    }

    // One cell of margin absorbs rounding at cell edges
    let (lat_lo, lon_lo) = cell_of(latitude - lat_span, longitude - lon_span, cell_degrees);
    let (lat_hi, lon_hi) = cell_of(latitude + lat_span, longitude + lon_span, cell_degrees);
    let (lat_lo, lon_lo, lat_hi, lon_hi) = (lat_lo - 1, lon_lo - 1, lat_hi + 1, lon_hi + 1);

    let count = ((lat_hi - lat_lo + 1) * (lon_hi - lon_lo + 1)) as usize;
    if count > MAX_CELLS {
        return None;
    }

    let mut cells = Vec::with_capacity(count);
    for lat in lat_lo..=lat_hi {
        for lon in lon_lo..=lon_hi {
            cells.push((lat, lon));
        }
    }
    Some(cells)
}
