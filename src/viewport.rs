// ============================================================================
// CANVAS NAVIGATION: zoom + scroll ownership for the main grid viewport
// ============================================================================
//
// Coordinate spaces:
//   content : un-zoomed canvas pixels (what `layout` produces)
//   rendered: content * zoom (the scrollable surface)
//   viewport: rendered - scroll (relative to the viewport's top-left corner)
//
// Every mutation of zoom or scroll goes through this type. Coupled changes
// (cursor-anchored zoom, selection framing) assign both fields inside a single
// call, so no frame can observe the new zoom with the old scroll offset.

use egui::{Pos2, Rect, Vec2};

use crate::layout::scale_rect;

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 3.0;

pub fn clamp_zoom(zoom: f32) -> f32 {
    if zoom.is_nan() {
        return 1.0;
    }
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// What asked for a zoom change. Only used for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoomSource {
    Wheel,
    Button,
    Selection,
    Keyboard,
}

impl ZoomSource {
    pub fn label(self) -> &'static str {
        match self {
            ZoomSource::Wheel => "wheel",
            ZoomSource::Button => "button",
            ZoomSource::Selection => "selection",
            ZoomSource::Keyboard => "keyboard",
        }
    }
}

/// Who currently owns the scroll position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavPhase {
    Idle,
    UserScrolling,
    ProgrammaticScrolling,
    AnimatingZoom,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportConfig {
    /// Margin kept free around a framed selection (viewport pixels).
    pub fit_padding: f32,
    /// Framing never zooms in past this.
    pub fit_max_zoom: f32,
    /// How long a snap keeps the auto-scrolling flag raised.
    pub snap_settle_secs: f64,
    /// Duration of the smooth scroll performed by a snap.
    pub snap_scroll_secs: f64,
    /// Focus tracking stays off this long after any programmatic scroll.
    pub programmatic_cooldown_secs: f64,
    /// A user scroll counts as "in progress" for this long.
    pub user_scroll_idle_secs: f64,
    /// Exponent per wheel pixel.
    pub wheel_sensitivity: f32,
    /// Multiplier applied by the zoom in / zoom out buttons.
    pub button_zoom_step: f32,
    pub button_zoom_secs: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            fit_padding: 80.0,
            fit_max_zoom: 1.2,
            snap_settle_secs: 0.5,
            snap_scroll_secs: 0.3,
            programmatic_cooldown_secs: 0.15,
            user_scroll_idle_secs: 0.15,
            wheel_sensitivity: 0.0015,
            button_zoom_step: 1.25,
            button_zoom_secs: 0.2,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ZoomAnimation {
    started_at: f64,
    duration: f64,
    from_zoom: f32,
    to_zoom: f32,
    from_scroll: Vec2,
    to_scroll: Option<Vec2>,
    source: ZoomSource,
}

#[derive(Clone, Copy, Debug)]
struct ScrollAnimation {
    started_at: f64,
    duration: f64,
    from: Vec2,
    to: Vec2,
}

fn progress(started_at: f64, duration: f64, now: f64) -> f32 {
    if duration <= 0.0 {
        return 1.0;
    }
    (((now - started_at) / duration) as f32).clamp(0.0, 1.0)
}

#[derive(Clone, Debug)]
pub struct Viewport {
    zoom: f32,
    /// Top-left of the viewport in rendered pixels. Never clamped.
    scroll: Vec2,
    size: Vec2,
    zoom_anim: Option<ZoomAnimation>,
    scroll_anim: Option<ScrollAnimation>,
    auto_scroll_until: f64,
    last_programmatic: Option<f64>,
    last_user_scroll: Option<f64>,
    pub config: ViewportConfig,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(ViewportConfig::default())
    }
}

impl Viewport {
    pub fn new(config: ViewportConfig) -> Self {
        Self {
            zoom: 1.0,
            scroll: Vec2::ZERO,
            size: Vec2::new(1280.0, 720.0),
            zoom_anim: None,
            scroll_anim: None,
            auto_scroll_until: f64::NEG_INFINITY,
            last_programmatic: None,
            last_user_scroll: None,
            config,
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn scroll(&self) -> Vec2 {
        self.scroll
    }

    pub fn size(&self) -> Vec2 {
        self.size
    }

    pub fn set_size(&mut self, size: Vec2) {
        self.size = size.max(Vec2::splat(1.0));
    }

    // ------------------------------------------------------------------
    // Coordinate mapping
    // ------------------------------------------------------------------

    pub fn viewport_to_content(&self, p: Pos2) -> Pos2 {
        ((self.scroll + p.to_vec2()) / self.zoom).to_pos2()
    }

    pub fn content_to_viewport(&self, p: Pos2) -> Pos2 {
        (p.to_vec2() * self.zoom - self.scroll).to_pos2()
    }

    pub fn content_rect_to_viewport(&self, rect: Rect) -> Rect {
        scale_rect(rect, self.zoom).translate(-self.scroll)
    }

    /// Content-space point at the middle of the viewport.
    pub fn center_content(&self) -> Pos2 {
        self.viewport_to_content((self.size / 2.0).to_pos2())
    }

    /// Scroll offset that puts `content` at the viewport centre for `zoom`.
    fn centering_scroll(&self, content: Pos2, zoom: f32) -> Vec2 {
        content.to_vec2() * zoom - self.size / 2.0
    }

    // ------------------------------------------------------------------
    // Flags / phase
    // ------------------------------------------------------------------

    pub fn is_zooming(&self) -> bool {
        self.zoom_anim.is_some()
    }

    pub fn is_auto_scrolling(&self, now: f64) -> bool {
        self.scroll_anim.is_some() || now < self.auto_scroll_until
    }

    pub fn is_animating(&self) -> bool {
        self.zoom_anim.is_some() || self.scroll_anim.is_some()
    }

    pub fn phase(&self, now: f64) -> NavPhase {
        if self.is_zooming() {
            NavPhase::AnimatingZoom
        } else if self.is_auto_scrolling(now) {
            NavPhase::ProgrammaticScrolling
        } else if self
            .last_user_scroll
            .is_some_and(|t| now - t < self.config.user_scroll_idle_secs)
        {
            NavPhase::UserScrolling
        } else {
            NavPhase::Idle
        }
    }

    /// Whether a scroll may be reinterpreted as a focus change right now.
    /// Only user-driven phases qualify, and not inside the cool-down that
    /// follows any programmatic move.
    pub fn focus_tracking_allowed(&self, now: f64) -> bool {
        match self.phase(now) {
            NavPhase::AnimatingZoom | NavPhase::ProgrammaticScrolling => false,
            NavPhase::Idle | NavPhase::UserScrolling => self
                .last_programmatic
                .is_none_or(|t| now - t >= self.config.programmatic_cooldown_secs),
        }
    }

    // ------------------------------------------------------------------
    // Animation driver
    // ------------------------------------------------------------------

    /// Advance in-flight animations to `now`. Returns `true` while anything
    /// is still moving (the caller keeps requesting frames).
    pub fn tick(&mut self, now: f64) -> bool {
        if let Some(anim) = self.zoom_anim {
            let t = progress(anim.started_at, anim.duration, now);
            let e = ease_in_out_cubic(t);
            self.zoom = anim.from_zoom + (anim.to_zoom - anim.from_zoom) * e;
            if let Some(to) = anim.to_scroll {
                self.scroll = anim.from_scroll + (to - anim.from_scroll) * e;
            }
            if t >= 1.0 {
                self.zoom = anim.to_zoom;
                if let Some(to) = anim.to_scroll {
                    self.scroll = to;
                }
                self.zoom_anim = None;
            }
            self.last_programmatic = Some(now);
        }

        if let Some(anim) = self.scroll_anim {
            let t = progress(anim.started_at, anim.duration, now);
            let e = ease_in_out_cubic(t);
            self.scroll = anim.from + (anim.to - anim.from) * e;
            if t >= 1.0 {
                self.scroll = anim.to;
                self.scroll_anim = None;
            }
            self.last_programmatic = Some(now);
        }

        self.is_animating()
    }

    /// Jump an in-flight zoom animation to its final state.
    fn finish_zoom_animation(&mut self) {
        if let Some(anim) = self.zoom_anim.take() {
            self.zoom = anim.to_zoom;
            if let Some(to) = anim.to_scroll {
                self.scroll = to;
            }
        }
    }

    // ------------------------------------------------------------------
    // Zoom
    // ------------------------------------------------------------------

    /// Change zoom (and optionally scroll) over `duration` seconds.
    ///
    /// `duration <= 0` applies both immediately. Otherwise the previous
    /// animation, if any, is replaced, never queued.
    pub fn smooth_zoom_to(
        &mut self,
        target_zoom: f32,
        target_scroll: Option<Vec2>,
        duration: f64,
        source: ZoomSource,
        now: f64,
    ) {
        let target_zoom = clamp_zoom(target_zoom);
        self.scroll_anim = None;

        if duration <= 0.0 {
            self.zoom_anim = None;
            self.zoom = target_zoom;
            if let Some(scroll) = target_scroll {
                self.scroll = scroll;
            }
            self.last_programmatic = Some(now);
            return;
        }

        if let Some(prev) = self.zoom_anim {
            crate::log_event!(
                "INFO",
                "zoom.replaced",
                previous = prev.source.label(),
                source = source.label(),
                target = target_zoom,
            );
        }
        self.zoom_anim = Some(ZoomAnimation {
            started_at: now,
            duration,
            from_zoom: self.zoom,
            to_zoom: target_zoom,
            from_scroll: self.scroll,
            to_scroll: target_scroll,
            source,
        });
    }

    /// Zoom and scroll that frame `content` inside the padded viewport.
    pub fn frame_for(&self, content: Rect) -> (f32, Vec2) {
        let pad = self.config.fit_padding;
        let avail = (self.size - Vec2::splat(2.0 * pad)).max(Vec2::splat(1.0));
        let w = content.width().max(1.0);
        let h = content.height().max(1.0);
        let zoom = clamp_zoom(
            (avail.x / w)
                .min(avail.y / h)
                .min(self.config.fit_max_zoom)
                .max(MIN_ZOOM),
        );
        (zoom, self.centering_scroll(content.center(), zoom))
    }

    /// Instantly frame a content-space rectangle.
    pub fn fit_content_rect(&mut self, content: Rect, now: f64) {
        let (zoom, scroll) = self.frame_for(content);
        self.smooth_zoom_to(zoom, Some(scroll), 0.0, ZoomSource::Selection, now);
    }

    /// Wheel delta (pixels, positive = away from the user) to zoom factor.
    pub fn wheel_zoom_factor(&self, delta_y: f32) -> f32 {
        (-delta_y * self.config.wheel_sensitivity).exp()
    }

    /// Set zoom so that the content point under `anchor` (viewport space)
    /// stays under it. Cancels any in-flight animation where it stands.
    pub fn zoom_at(&mut self, new_zoom: f32, anchor: Pos2, now: f64) {
        if let Some(prev) = self.zoom_anim.take() {
            crate::log_event!(
                "INFO",
                "zoom.cancelled",
                previous = prev.source.label(),
                source = ZoomSource::Wheel.label(),
            );
        }
        self.scroll_anim = None;
        let content = self.viewport_to_content(anchor);
        self.zoom = clamp_zoom(new_zoom);
        self.scroll = content.to_vec2() * self.zoom - anchor.to_vec2();
        self.last_programmatic = Some(now);
    }

    pub fn zoom_around(&mut self, factor: f32, anchor: Pos2, now: f64) {
        self.zoom_at(self.zoom * factor, anchor, now);
    }

    /// Animated zoom that keeps the viewport centre fixed. Successive calls
    /// build on the previous target so rapid button presses accumulate.
    pub fn zoom_centered(&mut self, target_zoom: f32, source: ZoomSource, now: f64) {
        let (base_zoom, base_scroll) = match self.zoom_anim {
            Some(ZoomAnimation {
                to_zoom,
                to_scroll: Some(to_scroll),
                ..
            }) => (to_zoom, to_scroll),
            _ => (self.zoom, self.scroll),
        };
        let center = (base_scroll + self.size / 2.0) / base_zoom;
        let target = clamp_zoom(target_zoom);
        let scroll = self.centering_scroll(center.to_pos2(), target);
        self.smooth_zoom_to(
            target,
            Some(scroll),
            self.config.button_zoom_secs,
            source,
            now,
        );
    }

    pub fn zoom_in(&mut self, source: ZoomSource, now: f64) {
        let base = self.zoom_anim.map_or(self.zoom, |a| a.to_zoom);
        self.zoom_centered(base * self.config.button_zoom_step, source, now);
    }

    pub fn zoom_out(&mut self, source: ZoomSource, now: f64) {
        let base = self.zoom_anim.map_or(self.zoom, |a| a.to_zoom);
        self.zoom_centered(base / self.config.button_zoom_step, source, now);
    }

    pub fn reset_zoom(&mut self, source: ZoomSource, now: f64) {
        self.zoom_centered(1.0, source, now);
    }

    // ------------------------------------------------------------------
    // Scroll
    // ------------------------------------------------------------------

    /// Smoothly centre a content rectangle without changing zoom, raising the
    /// auto-scrolling flag for the settle window.
    pub fn snap_to(&mut self, content: Rect, now: f64) {
        self.finish_zoom_animation();
        self.auto_scroll_until = now + self.config.snap_settle_secs;
        let target = self.centering_scroll(content.center(), self.zoom);
        self.scroll_anim = Some(ScrollAnimation {
            started_at: now,
            duration: self.config.snap_scroll_secs,
            from: self.scroll,
            to: target,
        });
        self.last_programmatic = Some(now);
    }

    /// Scroll caused by the user (wheel without modifier, trackpad, scrollbar).
    /// Takes over from a running snap.
    pub fn scroll_by(&mut self, delta: Vec2, now: f64) {
        self.scroll_anim = None;
        self.scroll += delta;
        self.last_user_scroll = Some(now);
    }
}
