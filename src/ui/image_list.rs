/// Strip of captured stacks with thumbnails
use std::collections::HashMap;

use iced::widget::image::Handle;
use iced::widget::{button, column, container, image, row, scrollable, text};
use iced::{Element, Length, Pixels};
use iced_aw::Wrap;

use crate::app::Message;
use crate::state::data::ImageStack;

/// Title shown for a stack: its capture kind in words
pub fn stack_title(stack: &ImageStack) -> String {
    match &stack.capture {
        Some(capture) => capture.kind().words(),
        None => "Opened Images".to_string(),
    }
}

fn frame_count(n: usize) -> String {
    match n {
        1 => "1 frame".to_string(),
        n => format!("{} frames", n),
    }
}

pub fn view<'a>(
    stacks: &'a [ImageStack],
    selected: usize,
    thumbnails: &'a HashMap<usize, Handle>,
    thumbnail_size: u32,
) -> Element<'a, Message> {
    if stacks.is_empty() {
        return container(text("No images yet").size(14)).padding(10).into();
    }

    let size = thumbnail_size as f32 / 2.0;
    let entries = stacks
        .iter()
        .enumerate()
        .map(|(idx, stack)| {
            let thumbnail: Element<'a, Message> = match thumbnails.get(&idx) {
                Some(handle) => image(handle.clone()).width(size).height(size).into(),
                None => container(text("…")).center(size).into(),
            };
            let timestamp = stack
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();

            let details = column![
                thumbnail,
                text(stack_title(stack)).size(13),
                text(frame_count(stack.image_handlers.len())).size(12),
                text(timestamp).size(11),
                row![
                    button(text("Save").size(12)).padding([2, 6]).on_press(Message::SaveStack(idx)),
                    button(text("Remove").size(12))
                        .padding([2, 6])
                        .style(button::danger)
                        .on_press(Message::RemoveStack(idx)),
                ]
                .spacing(4),
            ]
            .spacing(2);

            button(details)
                .padding(4)
                .style(if idx == selected { button::primary } else { button::text })
                .on_press(Message::SelectStack(idx))
                .into()
        })
        .collect();

    scrollable(Wrap::with_elements(entries).spacing(Pixels(8.0)).line_spacing(Pixels(8.0)))
        .height(Length::Fixed(size + 110.0))
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::{AdvancedCapture, MultiCapture};

    #[test]
    fn test_stack_title() {
        let mut stack = ImageStack::default();
        assert_eq!(stack_title(&stack), "Opened Images");
        stack.capture = Some(AdvancedCapture::MultiCapture(MultiCapture {
            exp_times: vec![1],
            frames_per_capture: 1,
        }));
        assert_eq!(stack_title(&stack), "Multi Capture");
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(1), "1 frame");
        assert_eq!(frame_count(3), "3 frames");
    }
}
