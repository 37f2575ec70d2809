/// Freehand ROI drawing on the image viewer
use crate::state::data::{Annotation, Line, Point, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawMode {
    #[default]
    Selection,
    Rectangle,
    Line,
}

impl DrawMode {
    pub const ALL: [DrawMode; 3] = [DrawMode::Selection, DrawMode::Rectangle, DrawMode::Line];

    pub fn label(self) -> &'static str {
        match self {
            DrawMode::Selection => "Select",
            DrawMode::Rectangle => "Rectangle",
            DrawMode::Line => "Line",
        }
    }
}

/// Annotation being drawn plus the corner it was started from
#[derive(Debug, Clone, Default)]
pub struct AnnotationDraft {
    annotation: Option<Annotation>,
    anchor: Option<Point>,
    drawing: bool,
}

fn floor_point(x: f32, y: f32) -> Point {
    Point::new(x.max(0.0).floor() as u32, y.max(0.0).floor() as u32)
}

impl AnnotationDraft {
    pub fn annotation(&self) -> Option<&Annotation> {
        self.annotation.as_ref()
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    /// Start a new annotation at a scene position
    ///
    /// Returns `false` in selection mode, where nothing is drawn.
    pub fn begin(&mut self, mode: DrawMode, x: f32, y: f32) -> bool {
        let p = floor_point(x, y);
        let annotation = match mode {
            DrawMode::Selection => return false,
            DrawMode::Rectangle => Annotation::Rect(Rect {
                width: 0,
                height: 0,
                pos: p,
            }),
            DrawMode::Line => Annotation::Line(Line { start: p, finish: p }),
        };
        self.annotation = Some(annotation);
        self.anchor = Some(p);
        self.drawing = true;
        true
    }

    /// Drag the free corner or end point to a scene position
    pub fn update(&mut self, x: f32, y: f32) -> Option<Annotation> {
        if !self.drawing {
            return None;
        }
        let p = floor_point(x, y);
        let anchor = self.anchor?;
        let updated = match self.annotation? {
            Annotation::Rect(_) => Annotation::Rect(Rect::from_corners(anchor, p)),
            Annotation::Line(line) => Annotation::Line(Line {
                start: line.start,
                finish: p,
            }),
        };
        self.annotation = Some(updated);
        Some(updated)
    }

    /// Stop drawing; returns the finished annotation
    pub fn finish(&mut self) -> Option<Annotation> {
        if !self.drawing {
            return None;
        }
        self.drawing = false;
        self.anchor = None;
        self.annotation
    }

    /// Rectangle covering the whole frame
    pub fn select_all(&mut self, width: u32, height: u32) -> Annotation {
        let annotation = Annotation::Rect(Rect::full_frame(width, height));
        self.annotation = Some(annotation);
        self.anchor = None;
        self.drawing = false;
        annotation
    }

    /// Take over the ROI stored with a frame
    pub fn load(&mut self, annotation: Option<Annotation>) {
        if !self.drawing {
            self.annotation = annotation;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_is_normalized_while_dragging() {
        let mut draft = AnnotationDraft::default();
        assert!(draft.begin(DrawMode::Rectangle, 10.7, 20.2));
        let rect = draft.update(4.9, 30.99).unwrap();
        assert_eq!(
            rect,
            Annotation::Rect(Rect {
                width: 6,
                height: 10,
                pos: Point::new(4, 20)
            })
        );
        assert_eq!(draft.finish(), Some(rect));
        assert!(draft.update(0.0, 0.0).is_none());
    }

    #[test]
    fn test_line_points_are_floored() {
        let mut draft = AnnotationDraft::default();
        draft.begin(DrawMode::Line, 1.9, 2.1);
        let line = draft.update(8.5, 3.999).unwrap();
        assert_eq!(
            line,
            Annotation::Line(Line {
                start: Point::new(1, 2),
                finish: Point::new(8, 3)
            })
        );
    }

    #[test]
    fn test_selection_mode_draws_nothing() {
        let mut draft = AnnotationDraft::default();
        assert!(!draft.begin(DrawMode::Selection, 1.0, 1.0));
        assert!(draft.annotation().is_none());
        assert!(draft.finish().is_none());
    }

    #[test]
    fn test_select_all() {
        let mut draft = AnnotationDraft::default();
        let all = draft.select_all(1031, 1536);
        assert_eq!(all, Annotation::Rect(Rect::full_frame(1031, 1536)));
        assert_eq!(draft.annotation(), Some(&all));
    }
}
