/// State management module
///
/// This module holds all UI-side state, including:
/// - Shared data structures exchanged with the backend (data.rs)
/// - Stack/image selection and the displayed frame (images.rs)
/// - Detector status, dark maps and capture progress (detector.rs)
/// - Operator settings (settings.rs)
/// - Open chart views (charts.rs)
/// - The capture settings form (capture_form.rs)
/// - Viewer transform and ROI drawing (viewport.rs, annotation.rs)

pub mod annotation;
pub mod capture_form;
pub mod charts;
pub mod data;
pub mod detector;
pub mod images;
pub mod settings;
pub mod viewport;
