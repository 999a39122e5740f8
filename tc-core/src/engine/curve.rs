//! Piecewise-linear interpolation over a fan curve
//!
//! Integer arithmetic throughout: the interpolated speed is
//! `s_i + (s_i+1 - s_i) * (T - t_i) / (t_i+1 - t_i)` with the division
//! truncating toward zero, so results are reproducible across platforms.

use crate::constants::curve as curve_const;
use crate::data::Curve;

/// Target fan speed (%) for `temperature` (°C).
///
/// Clamps to the first point's speed at or below the first temperature and
/// to the last point's speed at or above the last temperature. An exact hit
/// on a point returns that point's speed unchanged.
pub fn interpolate(curve: &Curve, temperature: i32) -> i32 {
    let points = curve.points();
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return curve_const::FALLBACK_FAN_PERCENT;
    };

    if temperature <= first.temperature {
        return first.speed;
    }
    if temperature >= last.temperature {
        return last.speed;
    }

    for window in points.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        if temperature >= lo.temperature && temperature <= hi.temperature {
            let span = hi.temperature - lo.temperature;
            if span == 0 {
                return lo.speed;
            }
            return lo.speed + (hi.speed - lo.speed) * (temperature - lo.temperature) / span;
        }
    }

    last.speed
}
