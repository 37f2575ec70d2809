//! Operator preferences for the current session.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::color::Rgb;
use crate::error::ColourError;

/// Highest accepted saturation threshold
pub const MAX_THRESHOLD: u16 = 16384;

/// Application settings that can be changed by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Highlight colour for saturated pixels, as entered
    pub saturated_pixel_colour: String,
    /// Samples above this value are highlighted
    pub saturated_pixel_threshold: u16,
    /// Save captured stacks automatically
    pub auto_save_captures: bool,
    /// Equalize newly captured stacks automatically
    pub auto_histogram_equalization: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            saturated_pixel_colour: "red".to_string(),
            saturated_pixel_threshold: 16000,
            auto_save_captures: true,
            auto_histogram_equalization: true,
        }
    }
}

/// Settings plus the parsed highlight colour
#[derive(Debug, Clone)]
pub struct SettingsStore {
    settings: AppSettings,
    colour: Rgb,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(AppSettings::default())
    }
}

impl SettingsStore {
    /// Build from initial settings, falling back to red for an invalid colour
    pub fn new(mut settings: AppSettings) -> Self {
        settings.saturated_pixel_threshold = settings.saturated_pixel_threshold.min(MAX_THRESHOLD);
        let colour = match settings.saturated_pixel_colour.parse::<Rgb>() {
            Ok(colour) => colour,
            Err(e) => {
                warn!("Ignoring configured saturation colour: {}", e);
                settings.saturated_pixel_colour = "red".to_string();
                Rgb::RED
            }
        };
        Self { settings, colour }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn colour(&self) -> Rgb {
        self.colour
    }

    pub fn threshold(&self) -> u16 {
        self.settings.saturated_pixel_threshold
    }

    pub fn auto_save(&self) -> bool {
        self.settings.auto_save_captures
    }

    pub fn auto_histogram_equalization(&self) -> bool {
        self.settings.auto_histogram_equalization
    }

    /// Set the highlight colour; an invalid value leaves the old one in place
    pub fn set_colour(&mut self, input: &str) -> Result<(), ColourError> {
        let colour = input.parse::<Rgb>()?;
        self.colour = colour;
        self.settings.saturated_pixel_colour = input.trim().to_string();
        Ok(())
    }

    /// Set the threshold, clamped to `0..=16384`
    pub fn set_threshold(&mut self, threshold: u32) {
        self.settings.saturated_pixel_threshold = threshold.min(u32::from(MAX_THRESHOLD)) as u16;
    }

    pub fn set_auto_save(&mut self, value: bool) {
        self.settings.auto_save_captures = value;
    }

    pub fn set_auto_histogram_equalization(&mut self, value: bool) {
        self.settings.auto_histogram_equalization = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let store = SettingsStore::default();
        assert_eq!(store.colour(), Rgb::RED);
        assert_eq!(store.threshold(), 16000);
        assert!(store.auto_save());
        assert!(store.auto_histogram_equalization());
    }

    #[test]
    fn test_threshold_is_clamped() {
        let mut store = SettingsStore::default();
        store.set_threshold(70_000);
        assert_eq!(store.threshold(), MAX_THRESHOLD);
        store.set_threshold(0);
        assert_eq!(store.threshold(), 0);
    }

    #[test]
    fn test_invalid_colour_keeps_previous() {
        let mut store = SettingsStore::default();
        store.set_colour(" #00ff00 ").unwrap();
        assert_eq!(store.colour(), Rgb([0, 255, 0]));
        assert_eq!(store.settings().saturated_pixel_colour, "#00ff00");

        assert!(store.set_colour("not a colour").is_err());
        assert_eq!(store.colour(), Rgb([0, 255, 0]));
    }

    #[test]
    fn test_bad_initial_colour_falls_back() {
        let store = SettingsStore::new(AppSettings {
            saturated_pixel_colour: "mauve-ish".into(),
            saturated_pixel_threshold: 20_000,
            ..AppSettings::default()
        });
        assert_eq!(store.colour(), Rgb::RED);
        assert_eq!(store.threshold(), MAX_THRESHOLD);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"saturated_pixel_threshold": 12000}"#).unwrap();
        assert_eq!(settings.saturated_pixel_threshold, 12000);
        assert_eq!(settings.saturated_pixel_colour, "red");
        assert!(settings.auto_save_captures);
    }
}
