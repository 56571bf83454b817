use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::model::{Axis, AxisKind, Scope};
use crate::config::CalibrationConfig;
use crate::error::ValidationError;
use crate::stats::kernel;

// ---------------------------------------------------------------------------
// Raw record – what the external format reader hands over
// ---------------------------------------------------------------------------

/// One spectral bin, either real or `[re, im]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bin {
    Real(f64),
    Complex([f64; 2]),
}

impl Bin {
    pub fn to_complex(self) -> Complex64 {
        match self {
            Bin::Real(re) => Complex64::new(re, 0.0),
            Bin::Complex([re, im]) => Complex64::new(re, im),
        }
    }
}

/// Unit of a precomputed descriptor vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Linear,
    Decibel,
}

/// A raw measurement record.
///
/// Every field is optional at parse time so that an incomplete record is
/// reported as a missing field rather than a parse error. A record carrying a
/// `descriptor` is a feature vector; otherwise it must carry the two channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub sample_rate: Option<u32>,
    pub transform_length: Option<u32>,
    /// Force channel (uncalibrated).
    pub excitation: Option<Vec<Bin>>,
    /// Velocity channel (uncalibrated).
    pub response: Option<Vec<Bin>>,
    pub descriptor: Option<Vec<f64>>,
    #[serde(default)]
    pub scale: Scale,
    pub subject: Option<String>,
    pub scope: Option<Scope>,
}

impl RawRecord {
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(text).map_err(|e| ValidationError::Unreadable(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Calibrated output
// ---------------------------------------------------------------------------

/// A validated, calibrated record not yet tagged with its partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibrated {
    pub axis: Axis,
    /// Linear units, same length as `axis`.
    pub response: Vec<f32>,
    pub subject: Option<String>,
    pub scope: Option<Scope>,
}

/// Validate one record against the experiment constants and calibrate it.
///
/// Spectral records yield `|velocity / force|` (mobility) on a
/// `transform_length / 2 + 1` point grid from 0 to `sample_rate / 2`.
/// Descriptor records are converted to linear units on a grid of their own
/// length over the same range.
pub fn calibrate(
    record: &RawRecord,
    cal: &CalibrationConfig,
) -> Result<Calibrated, ValidationError> {
    let sample_rate = record
        .sample_rate
        .ok_or(ValidationError::MissingField("sample_rate"))?;
    if sample_rate != cal.sample_rate {
        return Err(ValidationError::SampleRate {
            expected: cal.sample_rate,
            found: sample_rate,
        });
    }
    let nyquist = (sample_rate / 2) as f64;

    let (axis, response) = match &record.descriptor {
        Some(values) => calibrate_descriptor(values, record.scale, nyquist)?,
        None => calibrate_spectra(record, cal, nyquist)?,
    };

    Ok(Calibrated {
        axis,
        response,
        subject: record.subject.clone(),
        scope: record.scope,
    })
}

fn calibrate_spectra(
    record: &RawRecord,
    cal: &CalibrationConfig,
    nyquist: f64,
) -> Result<(Axis, Vec<f32>), ValidationError> {
    let transform_length = record
        .transform_length
        .ok_or(ValidationError::MissingField("transform_length"))?;
    if transform_length != cal.transform_length {
        return Err(ValidationError::TransformLength {
            expected: cal.transform_length,
            found: transform_length,
        });
    }
    let excitation = record
        .excitation
        .as_ref()
        .ok_or(ValidationError::MissingField("excitation"))?;
    let response = record
        .response
        .as_ref()
        .ok_or(ValidationError::MissingField("response"))?;

    let bins = transform_length as usize / 2 + 1;
    for (channel, data) in [("excitation", excitation), ("response", response)] {
        if data.len() != bins {
            return Err(ValidationError::ChannelLength {
                channel,
                expected: bins,
                found: data.len(),
            });
        }
    }

    let mobility = excitation
        .iter()
        .zip(response)
        .enumerate()
        .map(|(i, (x, y))| {
            let force = x.to_complex() * cal.force_sensitivity;
            if force == Complex64::new(0.0, 0.0) {
                return Err(ValidationError::ZeroExcitation(i));
            }
            let velocity = y.to_complex() * cal.velocity_sensitivity;
            Ok((velocity / force).norm() as f32)
        })
        .collect::<Result<Vec<f32>, _>>()?;

    Ok((Axis::linear(AxisKind::Frequency, 0.0, nyquist, bins), mobility))
}

fn calibrate_descriptor(
    values: &[f64],
    scale: Scale,
    nyquist: f64,
) -> Result<(Axis, Vec<f32>), ValidationError> {
    if values.len() < 2 {
        return Err(ValidationError::DescriptorTooShort(values.len()));
    }
    let linear = values
        .iter()
        .map(|&v| match scale {
            Scale::Linear => v as f32,
            Scale::Decibel => kernel::from_decibel(v) as f32,
        })
        .collect();
    Ok((
        Axis::linear(AxisKind::Frequency, 0.0, nyquist, values.len()),
        linear,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn small_cal() -> CalibrationConfig {
        CalibrationConfig {
            sample_rate: 16,
            transform_length: 8,
            ..CalibrationConfig::default()
        }
    }

    fn spectral(sr: u32, n: u32, exc: f64, resp: f64) -> RawRecord {
        let bins = n as usize / 2 + 1;
        RawRecord {
            sample_rate: Some(sr),
            transform_length: Some(n),
            excitation: Some(vec![Bin::Real(exc); bins]),
            response: Some(vec![Bin::Real(resp); bins]),
            ..RawRecord::default()
        }
    }

    #[test]
    fn mobility_applies_both_sensitivities() {
        let cal = small_cal();
        let out = calibrate(&spectral(16, 8, 2.0, -3.0), &cal).unwrap();
        let expected = (3.0 * cal.velocity_sensitivity) / (2.0 * cal.force_sensitivity);
        assert_eq!(out.response.len(), 5);
        for v in &out.response {
            assert_relative_eq!(*v as f64, expected, max_relative = 1e-6);
        }
        assert_eq!(out.axis.values(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn complex_bins_use_magnitude_of_ratio() {
        let cal = CalibrationConfig {
            force_sensitivity: 1.0,
            velocity_sensitivity: 1.0,
            ..small_cal()
        };
        let mut rec = spectral(16, 8, 1.0, 1.0);
        rec.excitation = Some(vec![Bin::Complex([0.0, 2.0]); 5]);
        rec.response = Some(vec![Bin::Complex([3.0, 4.0]); 5]);
        let out = calibrate(&rec, &cal).unwrap();
        assert!(out.response.iter().all(|&v| (v - 2.5).abs() < 1e-6));
    }

    #[test]
    fn json_record_with_mixed_bins() {
        let rec = RawRecord::from_json(
            r#"{"sample_rate": 16, "transform_length": 2,
                "excitation": [1.0, [0.0, 1.0]],
                "response": [[1.0, 0.0], 2.0]}"#,
        )
        .unwrap();
        let out = calibrate(&rec, &CalibrationConfig { transform_length: 2, ..small_cal() }).unwrap();
        assert_eq!(out.response.len(), 2);
    }

    #[test]
    fn rejects_wrong_transform_length() {
        let err = calibrate(&spectral(16, 16, 1.0, 1.0), &small_cal()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TransformLength {
                expected: 8,
                found: 16
            }
        );
    }

    #[test]
    fn rejects_missing_fields() {
        let mut rec = spectral(16, 8, 1.0, 1.0);
        rec.response = None;
        assert_eq!(
            calibrate(&rec, &small_cal()).unwrap_err(),
            ValidationError::MissingField("response")
        );
        let rec = RawRecord::default();
        assert_eq!(
            calibrate(&rec, &small_cal()).unwrap_err(),
            ValidationError::MissingField("sample_rate")
        );
    }

    #[test]
    fn rejects_short_channel() {
        let mut rec = spectral(16, 8, 1.0, 1.0);
        rec.excitation = Some(vec![Bin::Real(1.0); 4]);
        assert!(matches!(
            calibrate(&rec, &small_cal()),
            Err(ValidationError::ChannelLength {
                channel: "excitation",
                expected: 5,
                found: 4
            })
        ));
    }

    #[test]
    fn rejects_zero_excitation() {
        let mut rec = spectral(16, 8, 1.0, 1.0);
        if let Some(exc) = rec.excitation.as_mut() {
            exc[3] = Bin::Complex([0.0, 0.0]);
        }
        assert_eq!(
            calibrate(&rec, &small_cal()).unwrap_err(),
            ValidationError::ZeroExcitation(3)
        );
    }

    #[test]
    fn unreadable_json_is_a_validation_failure() {
        assert!(matches!(
            RawRecord::from_json("{not json"),
            Err(ValidationError::Unreadable(_))
        ));
    }

    #[test]
    fn decibel_descriptor_is_linearized() {
        let rec = RawRecord {
            sample_rate: Some(16),
            descriptor: Some(vec![0.0, 20.0, -20.0]),
            scale: Scale::Decibel,
            subject: Some("SMD".into()),
            scope: Some(Scope::Test),
            ..RawRecord::default()
        };
        let out = calibrate(&rec, &small_cal()).unwrap();
        assert_relative_eq!(out.response[0], 1.0, max_relative = 1e-6);
        assert_relative_eq!(out.response[1], 10.0, max_relative = 1e-6);
        assert_relative_eq!(out.response[2], 0.1, max_relative = 1e-6);
        assert_eq!(out.axis.values(), &[0.0, 4.0, 8.0]);
        assert_eq!(out.scope, Some(Scope::Test));
        assert_eq!(out.subject.as_deref(), Some("SMD"));
    }

    #[test]
    fn one_point_descriptor_is_rejected() {
        let rec = RawRecord {
            sample_rate: Some(16),
            descriptor: Some(vec![1.0]),
            ..RawRecord::default()
        };
        assert_eq!(
            calibrate(&rec, &small_cal()).unwrap_err(),
            ValidationError::DescriptorTooShort(1)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_wrong_sample_rate_never_calibrates(sr in 1u32..200_000) {
            prop_assume!(sr != 16);
            let result = calibrate(&spectral(sr, 8, 1.0, 1.0), &small_cal());
            prop_assert_eq!(result, Err(ValidationError::SampleRate { expected: 16, found: sr }));
        }

        #[test]
        fn prop_axis_has_half_transform_plus_one_points(n in 1u32..2048) {
            let cal = CalibrationConfig { transform_length: n, ..small_cal() };
            let out = calibrate(&spectral(16, n, 1.0, 1.0), &cal).unwrap();
            prop_assert_eq!(out.axis.len(), n as usize / 2 + 1);
            prop_assert_eq!(out.response.len(), out.axis.len());
            prop_assert_eq!(out.axis.first(), Some(0.0));
            if n >= 2 {
                prop_assert_eq!(out.axis.last(), Some(8.0));
            }
        }
    }
}
