/// App settings panel
use iced::widget::{button, checkbox, column, container, row, text, text_input};
use iced::{Alignment, Element, Length};

use crate::state::data::AppData;
use crate::state::settings::SettingsStore;

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsMessage {
    Colour(String),
    Threshold(String),
    AutoSave(bool),
    AutoEqualize(bool),
    Close,
}

/// Text fields as typed, applied to the store once they parse
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsDraft {
    pub colour: String,
    pub threshold: String,
    pub error: Option<String>,
}

impl SettingsDraft {
    pub fn from_store(store: &SettingsStore) -> Self {
        Self {
            colour: store.settings().saturated_pixel_colour.clone(),
            threshold: store.threshold().to_string(),
            error: None,
        }
    }

    /// Apply an edit; returns whether the frame rendering changed
    pub fn update(&mut self, store: &mut SettingsStore, message: SettingsMessage) -> bool {
        match message {
            SettingsMessage::Colour(value) => {
                let result = store.set_colour(&value);
                self.colour = value;
                match result {
                    Ok(()) => {
                        self.error = None;
                        true
                    }
                    Err(e) => {
                        self.error = Some(e.to_string());
                        false
                    }
                }
            }
            SettingsMessage::Threshold(value) => {
                let trimmed = value.trim();
                let parsed = if trimmed.is_empty() { Some(0) } else { trimmed.parse::<u32>().ok() };
                match parsed {
                    Some(threshold) => {
                        self.threshold = value;
                        self.error = None;
                        store.set_threshold(threshold);
                        true
                    }
                    None => false,
                }
            }
            SettingsMessage::AutoSave(value) => {
                store.set_auto_save(value);
                false
            }
            SettingsMessage::AutoEqualize(value) => {
                store.set_auto_histogram_equalization(value);
                false
            }
            SettingsMessage::Close => false,
        }
    }
}

/// Correction files the backend reports, one line each
pub fn correction_files(data: &AppData) -> Vec<String> {
    let mut lines: Vec<String> = data
        .dark_maps_files
        .iter()
        .map(|(exp_time, file)| format!("Dark map {}ms: {}", exp_time, file))
        .collect();
    lines.push(match &data.defect_map {
        Some(file) => format!("Defect map: {}", file),
        None => "Defect map: none".to_string(),
    });
    lines
}

pub fn view<'a>(draft: &'a SettingsDraft, store: &SettingsStore, data: &AppData) -> Element<'a, SettingsMessage> {
    let label = |s| text(s).width(Length::Fixed(180.0));
    let content = column![
        text("Settings").size(20),
        row![
            label("Saturated pixel colour"),
            text_input("red", &draft.colour)
                .on_input(SettingsMessage::Colour)
                .width(Length::Fixed(160.0)),
        ]
        .align_y(Alignment::Center),
        row![
            label("Saturated pixel threshold"),
            text_input("16000", &draft.threshold)
                .on_input(SettingsMessage::Threshold)
                .width(Length::Fixed(160.0)),
        ]
        .align_y(Alignment::Center),
        checkbox("Auto save captures", store.auto_save()).on_toggle(SettingsMessage::AutoSave),
        checkbox("Auto histogram equalization", store.auto_histogram_equalization())
            .on_toggle(SettingsMessage::AutoEqualize),
    ]
    .spacing(10)
    .extend(
        correction_files(data)
            .into_iter()
            .map(|line| text(line).size(12).into()),
    )
    .push_maybe(draft.error.as_deref().map(|e| text(e).style(text::danger)))
    .push(button("Close").on_press(SettingsMessage::Close));

    container(content).padding(16).style(container::rounded_box).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_colour_keeps_previous() {
        let mut store = SettingsStore::default();
        let mut draft = SettingsDraft::from_store(&store);

        assert!(!draft.update(&mut store, SettingsMessage::Colour("rgb(300, 0".into())));
        assert!(draft.error.is_some());
        assert_eq!(draft.colour, "rgb(300, 0");
        assert_eq!(store.colour(), crate::color::Rgb::RED);

        assert!(draft.update(&mut store, SettingsMessage::Colour("#00ff00".into())));
        assert!(draft.error.is_none());
        assert_eq!(store.colour(), crate::color::Rgb([0, 255, 0]));
    }

    #[test]
    fn test_correction_files() {
        let mut data = AppData::default();
        assert_eq!(correction_files(&data), vec!["Defect map: none"]);

        data.dark_maps_files.insert(100, "DarkMap_100ms.tif".into());
        data.dark_maps_files.insert(10, "DarkMap_10ms.tif".into());
        data.defect_map = Some("DefectMap.tif".into());
        assert_eq!(
            correction_files(&data),
            vec![
                "Dark map 10ms: DarkMap_10ms.tif",
                "Dark map 100ms: DarkMap_100ms.tif",
                "Defect map: DefectMap.tif",
            ]
        );
    }

    #[test]
    fn test_threshold_accepts_digits_only() {
        let mut store = SettingsStore::default();
        let mut draft = SettingsDraft::from_store(&store);
        assert_eq!(draft.threshold, "16000");

        assert!(!draft.update(&mut store, SettingsMessage::Threshold("12a".into())));
        assert_eq!(draft.threshold, "16000");

        assert!(draft.update(&mut store, SettingsMessage::Threshold("99999".into())));
        assert_eq!(store.threshold(), 16384);
    }
}
