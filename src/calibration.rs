//! Conversion of raw instrument voltages into physical quantities.
//!
//! Displacement:
//! - LVDT output voltage maps linearly onto inches (empirical bench calibration).
//!
//! Strain:
//! - Engineering strain = displacement / gauge length - first strain offset.
//! - The offset is captured once just before the run so the baseline reads zero under pre-load.
//! - True strain = ln(1 + engineering strain).
//!
//! Temperature:
//! - Type K thermocouple, NIST ITS-90 inverse polynomials (millivolts -> degrees C).
//! - Three disjoint coefficient sets, picked by the range of the input voltage.
use log::warn;

use crate::error::DomainError;

/// LVDT gain (inches per volt).
pub const DISPLACEMENT_GAIN: f64 = 0.04897;
/// LVDT offset (inches at zero volts).
pub const DISPLACEMENT_OFFSET: f64 = 0.53505;

/// Convert an LVDT voltage to displacement in inches.
pub fn displacement_from_voltage(volts: f64) -> f64 {
    DISPLACEMENT_GAIN * volts + DISPLACEMENT_OFFSET
}

/// Baseline-corrected engineering strain.
///
/// Pass `first_strain_offset = 0.0` to obtain the raw ratio used to capture the offset itself.
pub fn engineering_strain(displacement: f64, gauge_length: f64, first_strain_offset: f64) -> f64 {
    displacement / gauge_length - first_strain_offset
}

/// Dead weight already on the hanger before any load is added (grams).
pub const PRE_LOAD_GRAMS: f64 = 274.0;
/// Mechanical advantage of the load lever.
pub const LEVER_RATIO: f64 = 3.0;
const STANDARD_GRAVITY: f64 = 9.806_65;

/// Stress in MPa on a specimen of `area_m2` cross-section for `applied_grams` hung on the
/// lever, pre-load included.
pub fn intended_stress_mpa(applied_grams: f64, area_m2: f64) -> f64 {
    let mass_kg = (applied_grams + PRE_LOAD_GRAMS) / 1000.0 * LEVER_RATIO;
    mass_kg * STANDARD_GRAVITY / area_m2 / 1e6
}

pub fn true_strain(engineering_strain: f64) -> Result<f64, DomainError> {
    let arg = 1.0 + engineering_strain;
    if arg <= 0.0 || arg.is_nan() {
        return Err(DomainError::NonPositiveLog(arg));
    }
    Ok(arg.ln())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThermocoupleRange {
    /// -200 C to 0 C
    Negative,
    /// 0 C to 500 C
    LowPositive,
    /// 500 C to 1372 C
    High,
}

/// One inverse-polynomial segment of the type K reference function.
#[derive(Debug)]
pub struct ThermocoupleSegment {
    pub range: ThermocoupleRange,
    pub min_mv: f64,
    pub max_mv: f64,
    /// c0, c1, ... applied to millivolts
    pub coefficients: &'static [f64],
}

const TYPE_K_NEGATIVE: [f64; 9] = [
    0.0,
    2.517_346_2e1,
    -1.166_287_8,
    -1.083_363_8,
    -8.977_354_0e-1,
    -3.734_237_7e-1,
    -8.663_264_3e-2,
    -1.045_059_8e-2,
    -5.192_057_7e-4,
];

const TYPE_K_LOW_POSITIVE: [f64; 10] = [
    0.0,
    2.508_355e1,
    7.860_106e-2,
    -2.503_131e-1,
    8.315_270e-2,
    -1.228_034e-2,
    9.804_036e-4,
    -4.413_030e-5,
    1.057_734e-6,
    -1.052_755e-8,
];

const TYPE_K_HIGH: [f64; 7] = [
    -1.318_058e2,
    4.830_222e1,
    -1.646_031,
    5.464_731e-2,
    -9.650_715e-4,
    8.802_193e-6,
    -3.110_810e-8,
];

pub static TYPE_K_SEGMENTS: [ThermocoupleSegment; 3] = [
    ThermocoupleSegment {
        range: ThermocoupleRange::Negative,
        min_mv: -5.891,
        max_mv: 0.0,
        coefficients: &TYPE_K_NEGATIVE,
    },
    ThermocoupleSegment {
        range: ThermocoupleRange::LowPositive,
        min_mv: 0.0,
        max_mv: 20.644,
        coefficients: &TYPE_K_LOW_POSITIVE,
    },
    ThermocoupleSegment {
        range: ThermocoupleRange::High,
        min_mv: 20.644,
        max_mv: 54.886,
        coefficients: &TYPE_K_HIGH,
    },
];

impl ThermocoupleSegment {
    pub fn evaluate(&self, millivolts: f64) -> f64 {
        horner(self.coefficients, millivolts)
    }
}

/// Pick the segment for `millivolts`.
///
/// Segments are half-open `[min, max)` except the top one, which includes its upper bound.
/// Inputs outside the calibrated envelope fall back to the nearest segment; the flag is
/// `false` in that case.
pub fn select_segment(millivolts: f64) -> (&'static ThermocoupleSegment, bool) {
    let [negative, low, high] = &TYPE_K_SEGMENTS;
    if millivolts < 0.0 {
        (negative, millivolts >= negative.min_mv)
    } else if millivolts < low.max_mv {
        (low, true)
    } else {
        (high, millivolts <= high.max_mv)
    }
}

/// Convert a thermocouple voltage (millivolts) to degrees Celsius.
///
/// Out-of-envelope inputs log a warning and still return the nearest segment's value.
pub fn temperature_from_millivolts(millivolts: f64) -> f64 {
    let (segment, in_envelope) = select_segment(millivolts);
    if !in_envelope {
        warn!(
            "thermocouple input {:.3} mV outside calibrated range {:.3}..{:.3} mV, extrapolating with the {:?} segment",
            millivolts, TYPE_K_SEGMENTS[0].min_mv, TYPE_K_SEGMENTS[2].max_mv, segment.range
        );
    }
    segment.evaluate(millivolts)
}

fn horner(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn displacement_matches_bench_calibration() {
        assert!((displacement_from_voltage(0.0) - 0.53505).abs() < 1e-12);
        assert!((displacement_from_voltage(10.0) - 1.02475).abs() < 1e-12);
    }
    #[test]
    fn strain_offset_zeroes_baseline() {
        let gauge = 1.4;
        let d = displacement_from_voltage(2.5);
        let offset = engineering_strain(d, gauge, 0.0);
        assert_eq!(engineering_strain(d, gauge, offset), 0.0);
        let later = displacement_from_voltage(3.5);
        let expected = (later - d) / gauge;
        assert!((engineering_strain(later, gauge, offset) - expected).abs() < 1e-12);
    }
    #[test]
    fn intended_stress_includes_pre_load_and_lever() {
        // 726 g + 274 g pre-load = 1 kg, times 3 on the lever
        let mpa = intended_stress_mpa(726.0, 1e-6);
        assert!((mpa - 3.0 * 9.806_65).abs() < 1e-9, "stress {mpa}");
        assert!((intended_stress_mpa(0.0, 4e-6) - 0.822 * 9.806_65 / 4.0).abs() < 1e-9);
    }
    #[test]
    fn true_strain_inverts_through_exp() {
        for e in [0.0, 1e-4, 0.05, 0.35, -0.2, 2.0] {
            let t = true_strain(e).unwrap();
            assert!((t.exp() - 1.0 - e).abs() < 1e-6, "strain {e}");
        }
    }
    #[test]
    fn true_strain_rejects_non_positive_argument() {
        assert_eq!(true_strain(-1.0), Err(DomainError::NonPositiveLog(0.0)));
        assert!(true_strain(-1.5).is_err());
        assert!(true_strain(f64::NAN).is_err());
    }
    #[test]
    fn segment_selection_by_range() {
        assert_eq!(select_segment(-3.0).0.range, ThermocoupleRange::Negative);
        assert_eq!(select_segment(0.0).0.range, ThermocoupleRange::LowPositive);
        assert_eq!(select_segment(20.643).0.range, ThermocoupleRange::LowPositive);
        assert_eq!(select_segment(20.644).0.range, ThermocoupleRange::High);
        let (top, in_envelope) = select_segment(54.886);
        assert_eq!(top.range, ThermocoupleRange::High);
        assert!(in_envelope);
        assert!(!select_segment(60.0).1);
        assert!(!select_segment(-7.0).1);
    }
    #[test]
    fn temperature_reference_points() {
        assert!(temperature_from_millivolts(0.0).abs() < 1e-3);
        assert!((temperature_from_millivolts(-3.0) - (-82.446_993)).abs() < 1e-3);
        assert!((temperature_from_millivolts(10.0) - 246.221_956).abs() < 1e-3);
        assert!((temperature_from_millivolts(30.0) - 720.817_840).abs() < 1e-3);
        // NIST table anchors
        assert!((temperature_from_millivolts(41.276) - 1000.0).abs() < 0.1);
        assert!((temperature_from_millivolts(-5.891) - (-200.0)).abs() < 0.1);
    }
    #[test]
    fn negative_range_differs_from_positive_extrapolation() {
        let naive = TYPE_K_SEGMENTS[1].evaluate(-3.0);
        let proper = temperature_from_millivolts(-3.0);
        assert!((naive - proper).abs() > 1.0);
    }
    #[test]
    fn out_of_envelope_still_evaluates() {
        let t = temperature_from_millivolts(56.0);
        assert!(t.is_finite());
        assert_eq!(t, TYPE_K_SEGMENTS[2].evaluate(56.0));
    }
}
