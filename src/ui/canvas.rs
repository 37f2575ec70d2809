use cgmath::Vector2;
use iced::mouse::{self, Cursor};
use iced::widget::canvas::{self, Path, Program, Stroke};
use iced::widget::image::{FilterMethod, Handle};
use iced::{Color, Point, Rectangle, Renderer, Size, Theme};

use crate::state::annotation::DrawMode;
use crate::state::data::{Annotation, Rect};
use crate::state::viewport::Viewport;

const ANNOTATION_COLOUR: Color = Color::from_rgb(1.0, 0.85, 0.0);
const BACKGROUND_WINDOW_COLOUR: Color = Color::from_rgb(0.2, 0.5, 1.0);
const FOREGROUND_WINDOW_COLOUR: Color = Color::from_rgb(0.1, 0.9, 0.3);

/// Interactions reported by the image viewer
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerMessage {
    StageResized(f32, f32),
    Zoom { pointer: Vector2<f32>, zoom_in: bool },
    Pan(Vector2<f32>),
    /// Image pixel under the cursor
    Hover(Option<(u32, u32)>),
    /// Annotation drawing in scene (image pixel) coordinates
    DrawStart(Vector2<f32>),
    DrawMove(Vector2<f32>),
    DrawEnd,
}

/// Canvas program drawing the current frame with its annotations
pub struct Viewer<'a> {
    pub handle: Option<&'a Handle>,
    pub viewport: &'a Viewport,
    pub mode: DrawMode,
    pub drawing: bool,
    pub annotation: Option<&'a Annotation>,
    /// Smart capture (background, foreground) windows
    pub windows: Option<(&'a Rect, &'a Rect)>,
}

fn vector(point: Point) -> Vector2<f32> {
    Vector2::new(point.x, point.y)
}

fn point(v: Vector2<f32>) -> Point {
    Point::new(v.x, v.y)
}

impl Viewer<'_> {
    fn rect_path(&self, rect: &Rect) -> Path {
        let top_left = self
            .viewport
            .scene_to_screen(Vector2::new(rect.pos.x as f32, rect.pos.y as f32));
        let px = self.viewport.pixel_size();
        Path::rectangle(
            point(top_left),
            Size::new(rect.width as f32 * px, rect.height as f32 * px),
        )
    }

    fn annotation_path(&self, annotation: &Annotation) -> Path {
        match annotation {
            Annotation::Rect(rect) => self.rect_path(rect),
            Annotation::Line(line) => {
                // Through pixel centres
                let from = Vector2::new(line.start.x as f32 + 0.5, line.start.y as f32 + 0.5);
                let to = Vector2::new(line.finish.x as f32 + 0.5, line.finish.y as f32 + 0.5);
                Path::line(
                    point(self.viewport.scene_to_screen(from)),
                    point(self.viewport.scene_to_screen(to)),
                )
            }
        }
    }
}

impl Program<ViewerMessage> for Viewer<'_> {
    type State = DragState;

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: Cursor,
    ) -> Vec<canvas::Geometry> {
        let mut frame = canvas::Frame::new(renderer, bounds.size());
        frame.fill_rectangle(Point::ORIGIN, bounds.size(), Color::from_rgb(0.08, 0.08, 0.08));

        if let Some(handle) = self.handle {
            let (top_left, size) = self.viewport.image_bounds();
            frame.draw_image(
                Rectangle::new(point(top_left), Size::new(size.x, size.y)),
                canvas::Image::new(handle.clone()).filter_method(FilterMethod::Nearest),
            );
        }

        if let Some((background, foreground)) = self.windows {
            frame.stroke(
                &self.rect_path(background),
                Stroke::default().with_color(BACKGROUND_WINDOW_COLOUR).with_width(1.5),
            );
            frame.stroke(
                &self.rect_path(foreground),
                Stroke::default().with_color(FOREGROUND_WINDOW_COLOUR).with_width(1.5),
            );
        }

        if let Some(annotation) = self.annotation {
            frame.stroke(
                &self.annotation_path(annotation),
                Stroke::default().with_color(ANNOTATION_COLOUR).with_width(2.0),
            );
        }

        vec![frame.into_geometry()]
    }

    fn update(
        &self,
        state: &mut Self::State,
        event: canvas::Event,
        bounds: Rectangle,
        cursor: Cursor,
    ) -> (canvas::event::Status, Option<ViewerMessage>) {
        let size = Vector2::new(bounds.width, bounds.height);
        if size != self.viewport.stage_size {
            return (
                canvas::event::Status::Ignored,
                Some(ViewerMessage::StageResized(bounds.width, bounds.height)),
            );
        }

        match event {
            canvas::Event::Mouse(mouse::Event::WheelScrolled { delta }) => {
                let Some(pos) = cursor.position_in(bounds) else {
                    return (canvas::event::Status::Ignored, None);
                };
                let y = match delta {
                    mouse::ScrollDelta::Lines { y, .. } => y,
                    mouse::ScrollDelta::Pixels { y, .. } => y,
                };
                if y == 0.0 {
                    return (canvas::event::Status::Ignored, None);
                }
                let message = ViewerMessage::Zoom {
                    pointer: vector(pos),
                    zoom_in: y > 0.0,
                };
                return (canvas::event::Status::Captured, Some(message));
            }

            canvas::Event::Mouse(mouse::Event::ButtonPressed(button)) => {
                let Some(pos) = cursor.position_in(bounds) else {
                    return (canvas::event::Status::Ignored, None);
                };
                let pans = button == mouse::Button::Middle
                    || (button == mouse::Button::Left && self.mode == DrawMode::Selection);
                if pans {
                    state.is_dragging = true;
                    state.last_position = Some(pos);
                    return (canvas::event::Status::Captured, None);
                }
                if button == mouse::Button::Left && self.handle.is_some() {
                    let scene = self.viewport.screen_to_scene(vector(pos));
                    return (canvas::event::Status::Captured, Some(ViewerMessage::DrawStart(scene)));
                }
            }

            canvas::Event::Mouse(mouse::Event::ButtonReleased(_)) => {
                if state.is_dragging {
                    state.is_dragging = false;
                    state.last_position = None;
                    return (canvas::event::Status::Captured, None);
                }
                if self.drawing {
                    return (canvas::event::Status::Captured, Some(ViewerMessage::DrawEnd));
                }
            }

            canvas::Event::Mouse(mouse::Event::CursorMoved { .. }) => {
                let Some(pos) = cursor.position_in(bounds) else {
                    return (canvas::event::Status::Ignored, Some(ViewerMessage::Hover(None)));
                };
                if state.is_dragging {
                    if let Some(last) = state.last_position {
                        state.last_position = Some(pos);
                        let delta = vector(pos) - vector(last);
                        return (canvas::event::Status::Captured, Some(ViewerMessage::Pan(delta)));
                    }
                }
                if self.drawing {
                    let scene = self.viewport.screen_to_scene(vector(pos));
                    return (canvas::event::Status::Captured, Some(ViewerMessage::DrawMove(scene)));
                }
                let hover = self.handle.and_then(|_| self.viewport.pixel_at(vector(pos)));
                return (canvas::event::Status::Ignored, Some(ViewerMessage::Hover(hover)));
            }

            canvas::Event::Mouse(mouse::Event::CursorLeft) => {
                return (canvas::event::Status::Ignored, Some(ViewerMessage::Hover(None)));
            }

            _ => {}
        }

        (canvas::event::Status::Ignored, None)
    }

    fn mouse_interaction(&self, state: &Self::State, bounds: Rectangle, cursor: Cursor) -> mouse::Interaction {
        if !cursor.is_over(bounds) {
            return mouse::Interaction::default();
        }
        if state.is_dragging {
            mouse::Interaction::Grabbing
        } else if self.mode == DrawMode::Selection {
            mouse::Interaction::Grab
        } else {
            mouse::Interaction::Crosshair
        }
    }
}

/// State for drag interactions
#[derive(Debug, Clone, Default)]
pub struct DragState {
    pub is_dragging: bool,
    pub last_position: Option<Point>,
}
