//! Per-zone scroll attention.
//!
//! The document is cut into fixed-width percentage bands. Every tick, the
//! bands intersecting the viewport are credited with the wall-clock time
//! elapsed since the previous tick.

use std::{collections::BTreeMap, time::Duration};

use crate::host::Viewport;

/// A band of document height, `[start, end)` percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScrollZone {
    pub start: u32,
    pub end: u32,
}

impl ScrollZone {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone)]
pub struct ScrollAttention {
    zone_percent: u32,
    seconds: BTreeMap<ScrollZone, f64>,
    visible: Vec<ScrollZone>,
    max_scroll_percent: u32,
}

impl ScrollAttention {
    pub fn new(zone_percent: u32) -> Self {
        Self {
            zone_percent: zone_percent.clamp(1, 100),
            seconds: BTreeMap::new(),
            visible: Vec::new(),
            max_scroll_percent: 0,
        }
    }

    pub fn zones(&self) -> impl Iterator<Item = ScrollZone> + '_ {
        (0..100)
            .step_by(self.zone_percent as usize)
            .map(|start| ScrollZone::new(start, (start + self.zone_percent).min(100)))
    }

    /// Bands intersecting the viewport; all of them when the document fits.
    pub fn visible_zones(&self, viewport: &Viewport) -> Vec<ScrollZone> {
        if viewport.fits_on_screen() || viewport.document_height <= 0.0 {
            return self.zones().collect();
        }

        let top = viewport.scroll_top.max(0.0) / viewport.document_height * 100.0;
        let bottom = ((viewport.scroll_top.max(0.0) + viewport.viewport_height)
            / viewport.document_height
            * 100.0)
            .min(100.0);

        self.zones()
            .filter(|zone| f64::from(zone.start) < bottom && f64::from(zone.end) > top)
            .collect()
    }

    /// Reads the viewport and credits `elapsed` to the visible bands.
    pub fn observe(&mut self, viewport: &Viewport, elapsed: Duration) {
        let zones = self.visible_zones(viewport);
        self.record(&zones, elapsed);
        if viewport.fits_on_screen() {
            self.max_scroll_percent = 100;
        }
    }

    /// Credits `elapsed` to each of `zones` and marks them as visited.
    pub fn record(&mut self, zones: &[ScrollZone], elapsed: Duration) {
        if !elapsed.is_zero() {
            for zone in zones {
                *self.seconds.entry(*zone).or_insert(0.0) += elapsed.as_secs_f64();
            }
        }
        if let Some(deepest) = zones.iter().map(|zone| zone.end).max() {
            self.max_scroll_percent = self.max_scroll_percent.max(deepest);
        }
        self.visible = zones.to_vec();
    }

    /// Accumulated seconds per band label, rounded to whole seconds.
    pub fn attention_map(&self) -> BTreeMap<String, u64> {
        self.seconds
            .iter()
            .map(|(zone, secs)| (zone.label(), secs.round() as u64))
            .collect()
    }

    /// Upper bound of the deepest band ever visible.
    pub fn max_scroll_percent(&self) -> u32 {
        self.max_scroll_percent
    }

    pub fn visible_labels(&self) -> Vec<String> {
        self.visible.iter().map(ScrollZone::label).collect()
    }

    pub fn reset(&mut self) {
        self.seconds.clear();
        self.visible.clear();
        self.max_scroll_percent = 0;
    }
}
