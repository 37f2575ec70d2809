/// Editable capture recipe behind the capture settings dialog
///
/// Numeric fields are kept as the text the operator typed and only
/// validated when the capture is built.
use std::collections::BTreeSet;
use std::fmt;

use crate::error::FormError;
use crate::state::data::{
    AdvancedCapture, CaptureKind, MultiCapture, SignalAccumulationCapture, SmartCapture,
};

/// Capture kinds that can be configured from the form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    SignalAccumulation,
    Multi,
    Smart,
}

impl FormKind {
    pub const ALL: [FormKind; 3] = [FormKind::SignalAccumulation, FormKind::Multi, FormKind::Smart];

    pub fn capture_kind(self) -> CaptureKind {
        match self {
            FormKind::SignalAccumulation => CaptureKind::SignalAccumulationCapture,
            FormKind::Multi => CaptureKind::MultiCapture,
            FormKind::Smart => CaptureKind::SmartCapture,
        }
    }
}

impl fmt::Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.capture_kind().words())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureForm {
    pub kind: FormKind,
    pub exp_times: BTreeSet<u32>,
    pub frames_per_capture: String,
    pub window_size: String,
    pub median_filtered: bool,
}

impl Default for CaptureForm {
    /// Signal accumulation over 100 and 250 ms, 3 frames each
    fn default() -> Self {
        Self {
            kind: FormKind::SignalAccumulation,
            exp_times: [100, 250].into_iter().collect(),
            frames_per_capture: "3".to_string(),
            window_size: "5".to_string(),
            median_filtered: false,
        }
    }
}

impl CaptureForm {
    /// Switch kind, resetting the fields to that kind's defaults
    pub fn select_kind(&mut self, kind: FormKind) {
        let (frames, window) = match kind {
            FormKind::SignalAccumulation => (10, 5),
            FormKind::Multi => (1, 5),
            FormKind::Smart => (1, 5),
        };
        *self = Self {
            kind,
            exp_times: [1].into_iter().collect(),
            frames_per_capture: frames.to_string(),
            window_size: window.to_string(),
            median_filtered: false,
        };
    }

    pub fn toggle_exp_time(&mut self, exp_time: u32) {
        if !self.exp_times.remove(&exp_time) {
            self.exp_times.insert(exp_time);
        }
    }

    /// Exposure times the operator may pick: those with a dark map, plus any
    /// already selected
    pub fn exposure_options(&self, dark_maps: &[u32]) -> Vec<u32> {
        let mut options: BTreeSet<u32> = dark_maps.iter().copied().collect();
        options.extend(self.exp_times.iter().copied());
        options.into_iter().collect()
    }

    /// Validate the fields into a capture recipe
    pub fn build(&self) -> Result<AdvancedCapture, FormError> {
        if self.exp_times.is_empty() {
            return Err(FormError::NoExposureTimes);
        }
        let exp_times: Vec<u32> = self.exp_times.iter().copied().collect();
        let frames_per_capture = parse_positive(&self.frames_per_capture, "frames per capture")?;

        Ok(match self.kind {
            FormKind::SignalAccumulation => {
                AdvancedCapture::SignalAccumulationCapture(SignalAccumulationCapture {
                    exp_times,
                    frames_per_capture,
                })
            }
            FormKind::Multi => AdvancedCapture::MultiCapture(MultiCapture {
                exp_times,
                frames_per_capture,
            }),
            FormKind::Smart => AdvancedCapture::SmartCapture(SmartCapture {
                exp_times,
                frames_per_capture,
                window_size: parse_positive(&self.window_size, "window size")?,
                median_filtered: self.median_filtered,
            }),
        })
    }
}

fn parse_positive(input: &str, field: &'static str) -> Result<u32, FormError> {
    match input.trim().parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(FormError::NotPositive { field }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_form() {
        let capture = CaptureForm::default().build().unwrap();
        assert_eq!(
            capture,
            AdvancedCapture::SignalAccumulationCapture(SignalAccumulationCapture {
                exp_times: vec![100, 250],
                frames_per_capture: 3,
            })
        );
    }

    #[test]
    fn test_kind_defaults() {
        let mut form = CaptureForm::default();

        form.select_kind(FormKind::SignalAccumulation);
        assert_eq!(
            form.build().unwrap(),
            AdvancedCapture::SignalAccumulationCapture(SignalAccumulationCapture {
                exp_times: vec![1],
                frames_per_capture: 10,
            })
        );

        form.select_kind(FormKind::Multi);
        assert_eq!(
            form.build().unwrap(),
            AdvancedCapture::MultiCapture(MultiCapture {
                exp_times: vec![1],
                frames_per_capture: 1,
            })
        );

        form.select_kind(FormKind::Smart);
        assert_eq!(
            form.build().unwrap(),
            AdvancedCapture::SmartCapture(SmartCapture {
                exp_times: vec![1],
                frames_per_capture: 1,
                window_size: 5,
                median_filtered: false,
            })
        );
    }

    #[test]
    fn test_validation() {
        let mut form = CaptureForm::default();
        form.frames_per_capture = "0".into();
        assert_eq!(
            form.build(),
            Err(FormError::NotPositive {
                field: "frames per capture"
            })
        );

        form.frames_per_capture = " 4 ".into();
        form.toggle_exp_time(100);
        form.toggle_exp_time(250);
        assert_eq!(form.build(), Err(FormError::NoExposureTimes));

        form.select_kind(FormKind::Smart);
        form.window_size = "abc".into();
        assert!(matches!(form.build(), Err(FormError::NotPositive { field: "window size" })));
    }

    #[test]
    fn test_exposure_options_include_dark_maps_and_selection() {
        let form = CaptureForm::default();
        assert_eq!(form.exposure_options(&[50, 100]), vec![50, 100, 250]);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FormKind::SignalAccumulation.to_string(), "Signal Accumulation Capture");
    }
}
