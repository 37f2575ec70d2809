/// Open chart views and the data routed to them
///
/// Each view is identified by a label of the form
/// `<Chart>-Image<i>-Stack<s>`; chart-data events carry that label.
use std::collections::BTreeMap;

use crate::state::data::{Chart, ChartData};

/// Label identifying a chart view
pub fn chart_label(chart: Chart, image_idx: usize, stack_idx: usize) -> String {
    format!("{}-Image{}-Stack{}", chart.name(), image_idx, stack_idx)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartView {
    pub chart: Chart,
    pub image_idx: usize,
    pub stack_idx: usize,
    /// Latest data; `None` until the first event arrives
    pub data: Option<ChartData>,
}

#[derive(Debug, Default)]
pub struct ChartWindows {
    views: BTreeMap<String, ChartView>,
}

impl ChartWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a view for a frame
    ///
    /// Returns the label and whether the view is new (and therefore needs a
    /// backend subscription).
    pub fn open(&mut self, chart: Chart, image_idx: usize, stack_idx: usize) -> (String, bool) {
        let label = chart_label(chart, image_idx, stack_idx);
        if self.views.contains_key(&label) {
            return (label, false);
        }
        self.views.insert(
            label.clone(),
            ChartView {
                chart,
                image_idx,
                stack_idx,
                data: None,
            },
        );
        (label, true)
    }

    pub fn close(&mut self, label: &str) -> bool {
        self.views.remove(label).is_some()
    }

    /// Route data to its view; data for unknown labels or of the wrong chart
    /// kind is dropped
    pub fn apply(&mut self, label: &str, data: ChartData) -> bool {
        match self.views.get_mut(label) {
            Some(view) if view.chart == data.chart() => {
                view.data = Some(data);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, label: &str) -> Option<&ChartView> {
        self.views.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ChartView)> {
        self.views.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
