/// Histogram of the displayed 14-bit values
use iced::widget::canvas::{self, Stroke};
use iced::{Color, Point, Rectangle};

#[derive(Debug, Clone)]
pub struct Histogram<'a> {
    /// Counts per bin, lowest values first
    pub bins: &'a [u32],
}

impl<Message> canvas::Program<Message> for Histogram<'_> {
    type State = ();

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &iced::Renderer,
        _theme: &iced::Theme,
        bounds: Rectangle,
        _cursor: iced::mouse::Cursor,
    ) -> Vec<canvas::Geometry> {
        let mut frame = canvas::Frame::new(renderer, bounds.size());

        let max_value = self.bins.iter().copied().max().unwrap_or(0) as f32;
        if max_value < 1.0 {
            return vec![frame.into_geometry()];
        }

        let width = bounds.width;
        let height = bounds.height;
        let bar_width = width / self.bins.len() as f32;

        let mut path_builder = canvas::path::Builder::new();
        for (i, &count) in self.bins.iter().enumerate() {
            if count > 0 {
                let bar_height = count as f32 / max_value * height;
                let x = (i as f32 + 0.5) * bar_width;
                path_builder.move_to(Point::new(x, height));
                path_builder.line_to(Point::new(x, height - bar_height));
            }
        }

        frame.stroke(
            &path_builder.build(),
            Stroke::default()
                .with_color(Color::from_rgba(0.8, 0.8, 0.8, 0.8))
                .with_width(bar_width.max(1.0)),
        );

        vec![frame.into_geometry()]
    }
}
