/// Image selection store
///
/// Owns the list of stacks pushed by the backend together with the current
/// (stack, image) selection and the displayed frame. Every frame fetch is
/// issued with a [`FetchTicket`]; a fetch that resolves after the selection
/// moved on is dropped in [`ImageStore::accept`].
use crate::frame::RgbaFrame;
use crate::state::data::{Annotation, ImageHandler, ImageMetadata, ImageStack};

/// Selection captured when a frame fetch is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub stack_idx: usize,
    pub image_idx: usize,
    seq: u64,
}

/// Handler change the backend made without pushing a new image state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandlerEdit {
    Roi(Option<Annotation>),
    ToggleInverted,
}

#[derive(Debug, Default)]
pub struct ImageStore {
    stacks: Vec<ImageStack>,
    stack_idx: usize,
    image_idx: usize,
    /// Frame currently on screen
    current: Option<RgbaFrame>,
    streaming: bool,
    /// Sequence number handed to the next ticket
    next_seq: u64,
    /// Tickets older than this are stale
    applied_seq: Option<u64>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stacks(&self) -> &[ImageStack] {
        &self.stacks
    }

    pub fn stack_idx(&self) -> usize {
        self.stack_idx
    }

    pub fn image_idx(&self) -> usize {
        self.image_idx
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn current_frame(&self) -> Option<&RgbaFrame> {
        self.current.as_ref()
    }

    pub fn has_selection(&self) -> bool {
        self.current_handler().is_some()
    }

    pub fn current_stack(&self) -> Option<&ImageStack> {
        self.stacks.get(self.stack_idx)
    }

    pub fn current_handler(&self) -> Option<&ImageHandler> {
        self.current_stack()
            .and_then(|stack| stack.image_handlers.get(self.image_idx))
    }

    /// Number of images in the selected stack
    pub fn stack_len(&self) -> usize {
        self.current_stack()
            .map(|stack| stack.image_handlers.len())
            .unwrap_or(0)
    }

    /// Replace the stack list with a fresh backend snapshot
    ///
    /// The newest stack (the last one) becomes the selection, starting at
    /// its first image.
    pub fn update_stacks(&mut self, stacks: Vec<ImageStack>) {
        self.stack_idx = stacks.len().saturating_sub(1);
        self.image_idx = 0;
        self.stacks = stacks;
        // Indices may now point at different frames
        self.applied_seq = Some(self.next_seq);
        if self.stacks.is_empty() {
            self.current = None;
        }
    }

    /// Mirror a completed edit in the local copy of a handler
    pub fn apply_edit(&mut self, stack_idx: usize, image_idx: usize, edit: HandlerEdit) -> bool {
        let Some(handler) = self
            .stacks
            .get_mut(stack_idx)
            .and_then(|stack| stack.image_handlers.get_mut(image_idx))
        else {
            return false;
        };
        match edit {
            HandlerEdit::Roi(roi) => handler.roi = roi,
            HandlerEdit::ToggleInverted => handler.inverted_colours = !handler.inverted_colours,
        }
        true
    }

    /// Select a stack; the image index restarts at 0 on change
    ///
    /// Returns whether the selection changed.
    pub fn set_stack(&mut self, stack_idx: usize) -> bool {
        if stack_idx >= self.stacks.len() || stack_idx == self.stack_idx {
            return false;
        }
        self.stack_idx = stack_idx;
        self.image_idx = 0;
        true
    }

    pub fn set_image(&mut self, image_idx: usize) -> bool {
        if image_idx >= self.stack_len() || image_idx == self.image_idx {
            return false;
        }
        self.image_idx = image_idx;
        true
    }

    pub fn increment_image(&mut self) -> bool {
        self.set_image(self.image_idx + 1)
    }

    pub fn decrement_image(&mut self) -> bool {
        match self.image_idx.checked_sub(1) {
            Some(idx) => self.set_image(idx),
            None => false,
        }
    }

    pub fn increment_stack(&mut self) -> bool {
        self.set_stack(self.stack_idx + 1)
    }

    pub fn decrement_stack(&mut self) -> bool {
        match self.stack_idx.checked_sub(1) {
            Some(idx) => self.set_stack(idx),
            None => false,
        }
    }

    /// Issue a ticket for fetching the selected frame
    pub fn request_current(&mut self) -> Option<FetchTicket> {
        if self.streaming || !self.has_selection() {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(FetchTicket {
            stack_idx: self.stack_idx,
            image_idx: self.image_idx,
            seq,
        })
    }

    /// Whether a ticket still matches the selection
    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        !self.streaming && ticket.stack_idx == self.stack_idx && ticket.image_idx == self.image_idx
    }

    /// Apply a fetched frame if its ticket is still current
    ///
    /// Returns `false` when the frame was dropped as stale. A response for
    /// the same selection that is older than the frame on screen is dropped
    /// too, so out-of-order completions never roll the view back.
    pub fn accept(&mut self, ticket: FetchTicket, frame: Option<RgbaFrame>) -> bool {
        if !self.is_current(&ticket) {
            return false;
        }
        if self.applied_seq.is_some_and(|applied| ticket.seq < applied) {
            return false;
        }
        self.applied_seq = Some(ticket.seq);
        self.current = frame;
        true
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    /// Show a live frame; ignored unless streaming
    pub fn set_stream_frame(&mut self, frame: RgbaFrame) -> bool {
        if !self.streaming {
            return false;
        }
        self.current = Some(frame);
        true
    }

    /// Metadata of the selected frame; `None` while streaming
    pub fn current_metadata(&self) -> Option<&ImageMetadata> {
        if self.streaming {
            return None;
        }
        self.current_handler().map(|handler| &handler.image_metadata)
    }

    pub fn image_metadata(&self, stack_idx: usize, image_idx: usize) -> Option<&ImageMetadata> {
        self.stacks
            .get(stack_idx)
            .and_then(|stack| stack.image_handlers.get(image_idx))
            .map(|handler| &handler.image_metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(images: usize) -> ImageStack {
        ImageStack {
            timestamp: None,
            image_handlers: vec![ImageHandler::default(); images],
            capture: None,
        }
    }

    fn frame(tag: u8) -> RgbaFrame {
        RgbaFrame {
            width: 1,
            height: 1,
            rgba: vec![tag, tag, tag, 255],
        }
    }

    #[test]
    fn test_update_selects_last_stack() {
        let mut store = ImageStore::new();
        store.update_stacks(vec![stack(2), stack(4), stack(3)]);
        assert_eq!(store.stack_idx(), 2);
        assert_eq!(store.image_idx(), 0);

        store.update_stacks(Vec::new());
        assert_eq!(store.stack_idx(), 0);
        assert!(store.current_frame().is_none());
        assert!(store.request_current().is_none());
    }

    #[test]
    fn test_set_stack_resets_image_and_is_idempotent() {
        let mut store = ImageStore::new();
        store.update_stacks(vec![stack(5), stack(5)]);
        store.set_stack(0);
        store.set_image(3);

        assert!(store.set_stack(1));
        assert_eq!(store.image_idx(), 0);
        store.set_image(2);
        assert!(!store.set_stack(1));
        assert_eq!(store.image_idx(), 2);
        assert!(!store.set_stack(7));
    }

    #[test]
    fn test_navigation_stays_in_bounds() {
        let mut store = ImageStore::new();
        store.update_stacks(vec![stack(2)]);
        assert!(!store.decrement_image());
        assert!(store.increment_image());
        assert!(!store.increment_image());
        assert_eq!(store.image_idx(), 1);
        assert!(!store.increment_stack());
        assert!(!store.decrement_stack());
    }

    #[test]
    fn test_stale_fetch_is_dropped() {
        let mut store = ImageStore::new();
        store.update_stacks(vec![stack(3)]);

        let first = store.request_current().unwrap();
        store.increment_image();
        let second = store.request_current().unwrap();

        assert!(!store.accept(first, Some(frame(1))));
        assert!(store.current_frame().is_none());
        assert!(store.accept(second, Some(frame(2))));
        assert_eq!(store.current_frame(), Some(&frame(2)));
    }

    #[test]
    fn test_older_fetch_for_same_selection_is_dropped() {
        let mut store = ImageStore::new();
        store.update_stacks(vec![stack(1)]);

        let older = store.request_current().unwrap();
        let newer = store.request_current().unwrap();
        assert!(store.accept(newer, Some(frame(2))));
        assert!(!store.accept(older, Some(frame(1))));
        assert_eq!(store.current_frame(), Some(&frame(2)));
    }

    #[test]
    fn test_new_stacks_invalidate_pending_fetches() {
        let mut store = ImageStore::new();
        store.update_stacks(vec![stack(2), stack(2)]);
        store.set_stack(0);
        let before = store.request_current().unwrap();

        // Stack 0 was removed, the old stack 1 is now stack 0
        store.update_stacks(vec![stack(2)]);
        assert!(!store.accept(before, Some(frame(1))));
        assert!(store.current_frame().is_none());

        let after = store.request_current().unwrap();
        assert!(store.accept(after, Some(frame(2))));
    }

    #[test]
    fn test_edits_patch_the_local_handler() {
        use crate::state::data::{Point, Rect};

        let mut store = ImageStore::new();
        store.update_stacks(vec![stack(2)]);
        let roi = Annotation::Rect(Rect::from_corners(Point::new(1, 1), Point::new(4, 5)));

        assert!(store.apply_edit(0, 1, HandlerEdit::Roi(Some(roi))));
        assert!(store.apply_edit(0, 1, HandlerEdit::ToggleInverted));
        assert!(!store.apply_edit(3, 0, HandlerEdit::ToggleInverted));

        store.set_image(1);
        let handler = store.current_handler().unwrap();
        assert_eq!(handler.roi, Some(roi));
        assert!(handler.inverted_colours);

        store.apply_edit(0, 1, HandlerEdit::Roi(None));
        assert_eq!(store.current_handler().unwrap().roi, None);
    }

    #[test]
    fn test_streaming_blocks_fetches() {
        let mut store = ImageStore::new();
        store.update_stacks(vec![stack(1)]);
        let ticket = store.request_current().unwrap();

        store.set_streaming(true);
        assert!(store.request_current().is_none());
        assert!(!store.accept(ticket, Some(frame(1))));
        assert!(store.current_metadata().is_none());
        assert!(store.set_stream_frame(frame(9)));

        store.set_streaming(false);
        assert!(!store.set_stream_frame(frame(3)));
        assert_eq!(store.current_frame(), Some(&frame(9)));
        assert!(store.current_metadata().is_some());
    }
}
