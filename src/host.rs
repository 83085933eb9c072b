//! The page the tracker runs in.
//!
//! The engine never reads browser globals directly. Instrumentation hands it
//! a [`PageHost`] and reports raw input separately (see [`crate::input`]).

use std::sync::{Mutex, PoisonError};

use crate::models::{DeviceInfo, DeviceType};

/// Scroll geometry of the document, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub document_height: f64,
}

impl Viewport {
    pub fn new(scroll_top: f64, viewport_height: f64, document_height: f64) -> Self {
        Self {
            scroll_top,
            viewport_height,
            document_height,
        }
    }

    /// True when the whole document fits on screen.
    pub fn fits_on_screen(&self) -> bool {
        self.document_height <= self.viewport_height
    }
}

pub trait PageHost: Send + Sync {
    fn url(&self) -> String;
    fn referrer(&self) -> Option<String>;
    fn title(&self) -> String;
    fn viewport(&self) -> Viewport;
    fn device(&self) -> DeviceInfo;
    /// Timezone detected by the browser, e.g. `Europe/Berlin`.
    fn timezone(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
struct PageState {
    url: String,
    title: String,
    referrer: Option<String>,
    viewport: Viewport,
    device: DeviceInfo,
    timezone: Option<String>,
}

/// In-memory page, driven by tests and the replay binary.
pub struct SimulatedPage {
    state: Mutex<PageState>,
}

impl SimulatedPage {
    pub fn new(url: impl Into<String>) -> Self {
        let user_agent = "Mozilla/5.0 (X11; Linux x86_64) pagetrack-sim".to_string();
        Self {
            state: Mutex::new(PageState {
                url: url.into(),
                title: String::new(),
                referrer: None,
                viewport: Viewport::new(0.0, 800.0, 4000.0),
                device: DeviceInfo {
                    device_type: DeviceType::from_user_agent(&user_agent),
                    user_agent,
                    platform: "Linux x86_64".into(),
                    language: "en-US".into(),
                    screen_width: 1920,
                    screen_height: 1080,
                    viewport_width: 1280,
                    viewport_height: 800,
                },
                timezone: Some("UTC".into()),
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut PageState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
        self.with_state(|state| state.referrer = Some(referrer.into()));
        self
    }

    pub fn with_timezone(self, timezone: Option<&str>) -> Self {
        self.with_state(|state| state.timezone = timezone.map(str::to_string));
        self
    }

    pub fn navigate(&self, url: impl Into<String>, title: impl Into<String>) {
        let (url, title) = (url.into(), title.into());
        self.with_state(|state| {
            state.url = url;
            state.title = title;
            state.viewport.scroll_top = 0.0;
        });
    }

    pub fn scroll_to(&self, scroll_top: f64) {
        self.with_state(|state| {
            let max_top = (state.viewport.document_height - state.viewport.viewport_height).max(0.0);
            state.viewport.scroll_top = scroll_top.clamp(0.0, max_top);
        });
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.with_state(|state| state.viewport = viewport);
    }

    pub fn set_device(&self, device: DeviceInfo) {
        self.with_state(|state| state.device = device);
    }
}

impl PageHost for SimulatedPage {
    fn url(&self) -> String {
        self.with_state(|state| state.url.clone())
    }

    fn referrer(&self) -> Option<String> {
        self.with_state(|state| state.referrer.clone())
    }

    fn title(&self) -> String {
        self.with_state(|state| state.title.clone())
    }

    fn viewport(&self) -> Viewport {
        self.with_state(|state| state.viewport)
    }

    fn device(&self) -> DeviceInfo {
        self.with_state(|state| state.device.clone())
    }

    fn timezone(&self) -> Option<String> {
        self.with_state(|state| state.timezone.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_is_clamped_to_document() {
        let page = SimulatedPage::new("https://site.example/");
        page.set_viewport(Viewport::new(0.0, 500.0, 1500.0));

        page.scroll_to(5000.0);
        assert_eq!(page.viewport().scroll_top, 1000.0);

        page.scroll_to(-20.0);
        assert_eq!(page.viewport().scroll_top, 0.0);
    }

    #[test]
    fn navigation_resets_scroll() {
        let page = SimulatedPage::new("https://site.example/");
        page.scroll_to(300.0);
        page.navigate("https://site.example/pricing", "Pricing");

        assert_eq!(page.url(), "https://site.example/pricing");
        assert_eq!(page.title(), "Pricing");
        assert_eq!(page.viewport().scroll_top, 0.0);
    }
}
