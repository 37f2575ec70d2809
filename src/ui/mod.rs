/// User interface components
///
/// This module contains the widgets of the main window:
/// - Image viewer canvas with zoom, pan and ROI drawing
/// - Histogram and line profile charts
/// - Toolbar, stack strip and the settings dialogs
pub mod canvas;
pub mod capture_settings;
pub mod charts;
pub mod controls;
pub mod histogram;
pub mod image_list;
pub mod overlay;
pub mod profile;
pub mod settings_form;
