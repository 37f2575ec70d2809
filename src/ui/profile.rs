/// Intensity along the ROI, one point per image column
use iced::widget::canvas::{self, Stroke};
use iced::{Color, Point, Rectangle};

use crate::state::data::LineProfilePoint;

#[derive(Debug, Clone)]
pub struct LineProfile<'a> {
    pub points: &'a [LineProfilePoint],
}

/// Map profile points into a `width` x `height` box, highest value at the top
pub fn polyline(points: &[LineProfilePoint], width: f32, height: f32) -> Vec<Point> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Vec::new();
    };
    let max_value = points.iter().map(|p| p.value).max().unwrap_or(0).max(1) as f32;
    let span = last.idx.abs_diff(first.idx).max(1) as f32;
    let start = first.idx.min(last.idx);

    points
        .iter()
        .map(|p| {
            let x = (p.idx - start) as f32 / span * width;
            let y = height - p.value as f32 / max_value * height;
            Point::new(x, y)
        })
        .collect()
}

impl<Message> canvas::Program<Message> for LineProfile<'_> {
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
        let points = polyline(self.points, bounds.width, bounds.height);

        let mut builder = canvas::path::Builder::new();
        let mut iter = points.into_iter();
        if let Some(first) = iter.next() {
            builder.move_to(first);
            for p in iter {
                builder.line_to(p);
            }
        }
        frame.stroke(
            &builder.build(),
            Stroke::default()
                .with_color(Color::from_rgb(1.0, 0.85, 0.0))
                .with_width(1.5),
        );

        vec![frame.into_geometry()]
    }
}
