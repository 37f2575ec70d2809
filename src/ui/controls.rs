/// Toolbar and status line
use iced::widget::{button, column, container, horizontal_space, progress_bar, row, text, Row};
use iced::{Alignment, Element, Length};

use crate::app::{Message, Panel};
use crate::state::annotation::DrawMode;
use crate::state::data::{CaptureProgress, Chart};
use crate::state::detector::{CaptureButton, StreamButton};

pub struct Toolbar {
    pub capture: CaptureButton,
    pub stream: StreamButton,
    pub mode: DrawMode,
    /// A stored frame is selected (not streaming)
    pub has_image: bool,
    pub has_annotation: bool,
}

fn action<'a>(label: &'a str, message: Option<Message>) -> Element<'a, Message> {
    button(text(label).size(14)).padding([4, 8]).on_press_maybe(message).into()
}

impl Toolbar {
    pub fn view<'a>(self) -> Element<'a, Message> {
        let capture = column![
            button(text(self.capture.label).size(14))
                .padding([4, 10])
                .on_press_maybe(self.capture.action.map(|_| Message::CaptureClicked)),
        ]
        .push_maybe(
            self.capture
                .progress
                .map(|percent| progress_bar(0.0..=100.0, percent).height(4).width(Length::Fixed(160.0))),
        )
        .spacing(2);

        let stream = action(
            self.stream.label,
            self.stream.action.as_ref().map(|_| Message::StreamClicked),
        );

        let has_image = self.has_image;
        let image = move |label: &'a str, message: Message| action(label, has_image.then_some(message));

        let modes = DrawMode::ALL.iter().fold(Row::new().spacing(2), |row, &mode| {
            let selected = mode == self.mode;
            row.push(
                button(text(mode.label()).size(14))
                    .padding([4, 8])
                    .style(if selected { button::primary } else { button::secondary })
                    .on_press(Message::DrawMode(mode)),
            )
        });

        row![
            capture,
            stream,
            action("Open Images", Some(Message::OpenImages)),
            modes,
            image("Invert", Message::Invert),
            image("Equalize", Message::Equalize),
            image("Rotate Left", Message::Rotate { left: true }),
            image("Rotate Right", Message::Rotate { left: false }),
            image("Flip H", Message::Flip { vertical: false }),
            image("Flip V", Message::Flip { vertical: true }),
            image("Save Image", Message::SaveImage),
            image("Histogram", Message::OpenChart(Chart::Histogram)),
            action(
                "Line Profile",
                (self.has_image && self.has_annotation).then_some(Message::OpenChart(Chart::LineProfile)),
            ),
            horizontal_space(),
            action("Settings", Some(Message::ShowPanel(Panel::Settings))),
        ]
        .spacing(6)
        .align_y(Alignment::Center)
        .padding(6)
        .into()
    }
}

pub fn status_line<'a>(progress: Option<&CaptureProgress>, error: Option<&'a str>) -> Element<'a, Message> {
    let progress = progress.map(|p| {
        text(format!("{} ({}/{})", p.message, p.current_step, p.total_steps)).size(13)
    });
    let error = error.map(|e| text(e).size(13).style(text::danger));

    container(
        row![]
            .push_maybe(progress)
            .push(horizontal_space())
            .push_maybe(error)
            .spacing(10),
    )
    .padding([2, 8])
    .width(Length::Fill)
    .into()
}
