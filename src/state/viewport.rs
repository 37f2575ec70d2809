/// Image viewer transform
///
/// Screen position of an image pixel `p` is
/// `stage_offset + zoom * (scene_pos + scene_scale * p)`:
/// - `scene_scale` fits the whole frame into the stage
/// - `scene_pos` is the pan offset of the frame inside the stage
/// - `zoom` and `stage_offset` zoom the stage around the pointer
use cgmath::{Vector2, Zero};

/// Zoom factor applied per wheel step
pub const SCALE_BY: f32 = 1.2;

#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    /// Size of the widget the frame is drawn into
    pub stage_size: Vector2<f32>,
    /// Size of the frame in image pixels
    pub scene_size: Vector2<f32>,
    pub scene_scale: f32,
    pub scene_pos: Vector2<f32>,
    pub zoom: f32,
    pub stage_offset: Vector2<f32>,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            stage_size: Vector2::new(300.0, 300.0),
            scene_size: Vector2::new(500.0, 500.0),
            scene_scale: 1.0,
            scene_pos: Vector2::zero(),
            zoom: 1.0,
            stage_offset: Vector2::zero(),
        }
    }
}

impl Viewport {
    fn fit_scale(&self) -> f32 {
        if self.scene_size.x <= 0.0 || self.scene_size.y <= 0.0 {
            return 1.0;
        }
        let scale = (self.stage_size.x / self.scene_size.x).min(self.stage_size.y / self.scene_size.y);
        if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        }
    }

    /// Track a stage resize; the pan offset is kept
    pub fn set_stage_size(&mut self, width: f32, height: f32) {
        let size = Vector2::new(width, height);
        if size == self.stage_size {
            return;
        }
        self.stage_size = size;
        self.scene_scale = self.fit_scale();
    }

    /// Show a frame of a new size, fitted and centred
    pub fn set_scene_size(&mut self, width: u32, height: u32) {
        self.scene_size = Vector2::new(width as f32, height as f32);
        self.scene_scale = self.fit_scale();
        self.scene_pos = (self.stage_size - self.scene_size * self.scene_scale) / 2.0;
    }

    /// Whether a frame of this size needs the viewport refitted
    pub fn scene_changed(&self, width: u32, height: u32) -> bool {
        self.scene_size != Vector2::new(width as f32, height as f32)
    }

    /// Widget coordinates to image pixel coordinates
    pub fn screen_to_scene(&self, screen: Vector2<f32>) -> Vector2<f32> {
        ((screen - self.stage_offset) / self.zoom - self.scene_pos) / self.scene_scale
    }

    /// Image pixel coordinates to widget coordinates
    pub fn scene_to_screen(&self, scene: Vector2<f32>) -> Vector2<f32> {
        self.stage_offset + (self.scene_pos + scene * self.scene_scale) * self.zoom
    }

    /// Image pixel under a widget position, if inside the frame
    pub fn pixel_at(&self, screen: Vector2<f32>) -> Option<(u32, u32)> {
        let scene = self.screen_to_scene(screen);
        let (x, y) = (scene.x.floor(), scene.y.floor());
        if x < 0.0 || y < 0.0 || x >= self.scene_size.x || y >= self.scene_size.y {
            return None;
        }
        Some((x as u32, y as u32))
    }

    /// Zoom one step in or out keeping the point under the pointer fixed
    pub fn zoom_at(&mut self, pointer: Vector2<f32>, zoom_in: bool) {
        let old = self.zoom;
        let anchor = (pointer - self.stage_offset) / old;
        let new = if zoom_in { old * SCALE_BY } else { old / SCALE_BY };
        self.zoom = new;
        self.stage_offset = pointer - anchor * new;
    }

    /// Move the frame by a widget-space delta
    pub fn pan(&mut self, delta: Vector2<f32>) {
        self.scene_pos += delta / self.zoom;
    }

    /// Frame bounds on screen as (top-left, size)
    pub fn image_bounds(&self) -> (Vector2<f32>, Vector2<f32>) {
        let top_left = self.scene_to_screen(Vector2::zero());
        (top_left, self.scene_size * self.scene_scale * self.zoom)
    }

    /// Length in widget units of one image pixel
    pub fn pixel_size(&self) -> f32 {
        self.scene_scale * self.zoom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vector2<f32>, b: Vector2<f32>) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    #[test]
    fn test_fit_and_centre() {
        let mut viewport = Viewport::default();
        viewport.set_stage_size(800.0, 400.0);
        viewport.set_scene_size(200, 200);
        assert_eq!(viewport.scene_scale, 2.0);
        assert_eq!(viewport.scene_pos, Vector2::new(200.0, 0.0));
    }

    #[test]
    fn test_annotation_is_independent_of_scale_and_zoom() {
        use crate::state::annotation::{AnnotationDraft, DrawMode};
        use crate::state::data::{Annotation, Point, Rect};

        let expected = Annotation::Rect(Rect::from_corners(Point::new(12, 30), Point::new(40, 7)));
        for (stage, zoom_steps, pan) in [
            ((64.0, 48.0), 0, (0.0, 0.0)),
            ((640.0, 480.0), 3, (-25.0, 12.5)),
            ((1920.0, 1080.0), -2, (40.0, -7.0)),
            ((37.0, 900.0), 6, (3.0, 3.0)),
        ] {
            let mut viewport = Viewport::default();
            viewport.set_stage_size(stage.0, stage.1);
            viewport.set_scene_size(64, 48);
            let pointer = Vector2::new(stage.0 / 3.0, stage.1 / 2.0);
            for _ in 0..zoom_steps {
                viewport.zoom_at(pointer, true);
            }
            for _ in zoom_steps..0 {
                viewport.zoom_at(pointer, false);
            }
            viewport.pan(Vector2::new(pan.0, pan.1));

            // Drag between two pixel centres as the canvas would
            let from = viewport.scene_to_screen(Vector2::new(12.5, 30.5));
            let to = viewport.scene_to_screen(Vector2::new(40.5, 7.5));
            let mut draft = AnnotationDraft::default();
            let start = viewport.screen_to_scene(from);
            assert!(draft.begin(DrawMode::Rectangle, start.x, start.y));
            let end = viewport.screen_to_scene(to);
            draft.update(end.x, end.y);

            assert_eq!(draft.finish(), Some(expected), "scale {}", viewport.scene_scale);
        }
    }

    #[test]
    fn test_screen_scene_round_trip() {
        let mut viewport = Viewport::default();
        viewport.set_stage_size(640.0, 480.0);
        viewport.set_scene_size(1031, 1536);
        viewport.zoom_at(Vector2::new(100.0, 50.0), true);
        viewport.pan(Vector2::new(-13.0, 7.5));

        let p = Vector2::new(321.5, 987.25);
        assert!(close(viewport.screen_to_scene(viewport.scene_to_screen(p)), p));
    }

    #[test]
    fn test_zoom_keeps_pointer_fixed() {
        let mut viewport = Viewport::default();
        viewport.set_stage_size(500.0, 500.0);
        viewport.set_scene_size(100, 100);

        let pointer = Vector2::new(210.0, 330.0);
        let before = viewport.screen_to_scene(pointer);
        viewport.zoom_at(pointer, true);
        assert!((viewport.zoom - 1.2).abs() < 1e-6);
        assert!(close(viewport.screen_to_scene(pointer), before));

        viewport.zoom_at(pointer, false);
        viewport.zoom_at(pointer, false);
        assert!(close(viewport.screen_to_scene(pointer), before));
    }

    #[test]
    fn test_pixel_at_bounds() {
        let mut viewport = Viewport::default();
        viewport.set_stage_size(100.0, 100.0);
        viewport.set_scene_size(10, 10);
        assert_eq!(viewport.pixel_at(Vector2::new(0.0, 0.0)), Some((0, 0)));
        assert_eq!(viewport.pixel_at(Vector2::new(99.9, 55.0)), Some((9, 5)));
        assert_eq!(viewport.pixel_at(Vector2::new(100.0, 5.0)), None);
        assert_eq!(viewport.pixel_at(Vector2::new(-0.1, 5.0)), None);
    }
}
