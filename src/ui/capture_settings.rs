/// Capture settings dialog
use iced::widget::{button, checkbox, column, container, pick_list, row, text, text_input, Row};
use iced::{Alignment, Element, Length};

use crate::state::capture_form::{CaptureForm, FormKind};

#[derive(Debug, Clone, PartialEq)]
pub enum FormMessage {
    Kind(FormKind),
    ToggleExposure(u32),
    Frames(String),
    WindowSize(String),
    MedianFiltered(bool),
    Submit,
    Cancel,
}

/// Apply an edit to the form; `Submit` and `Cancel` are handled by the caller
pub fn update(form: &mut CaptureForm, message: FormMessage) {
    match message {
        FormMessage::Kind(kind) => form.select_kind(kind),
        FormMessage::ToggleExposure(exp_time) => form.toggle_exp_time(exp_time),
        FormMessage::Frames(value) => form.frames_per_capture = value,
        FormMessage::WindowSize(value) => form.window_size = value,
        FormMessage::MedianFiltered(value) => form.median_filtered = value,
        FormMessage::Submit | FormMessage::Cancel => {}
    }
}

pub fn view<'a>(form: &'a CaptureForm, dark_maps: &[u32], error: Option<&'a str>) -> Element<'a, FormMessage> {
    let exposures = form
        .exposure_options(dark_maps)
        .into_iter()
        .fold(Row::new().spacing(8), |row, exp_time| {
            row.push(
                checkbox(format!("{}ms", exp_time), form.exp_times.contains(&exp_time))
                    .on_toggle(move |_| FormMessage::ToggleExposure(exp_time)),
            )
        });

    let mut content = column![
        text("Advanced Capture").size(20),
        row![
            text("Capture type").width(Length::Fixed(140.0)),
            pick_list(&FormKind::ALL[..], Some(form.kind), FormMessage::Kind),
        ]
        .align_y(Alignment::Center),
        text("Exposure times"),
        exposures,
        row![
            text("Frames per capture").width(Length::Fixed(140.0)),
            text_input("1", &form.frames_per_capture)
                .on_input(FormMessage::Frames)
                .width(Length::Fixed(80.0)),
        ]
        .align_y(Alignment::Center),
    ]
    .spacing(10);

    if form.kind == FormKind::Smart {
        content = content
            .push(
                row![
                    text("Window size").width(Length::Fixed(140.0)),
                    text_input("5", &form.window_size)
                        .on_input(FormMessage::WindowSize)
                        .width(Length::Fixed(80.0)),
                ]
                .align_y(Alignment::Center),
            )
            .push(checkbox("Median filtered", form.median_filtered).on_toggle(FormMessage::MedianFiltered));
    }

    content = content
        .push_maybe(error.map(|e| text(e).style(text::danger)))
        .push(
            row![
                button("Start").on_press(FormMessage::Submit),
                button("Cancel").style(button::secondary).on_press(FormMessage::Cancel),
            ]
            .spacing(8),
        );

    container(content).padding(16).style(container::rounded_box).into()
}
