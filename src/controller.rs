// ============================================================================
// CANVAS CONTROLLER: the one object that owns and mutates canvas state
// ============================================================================
//
// Every user-visible mutation is a named method here. The presentation layer
// reads through the accessors and calls `frame()` once per repaint; nothing
// else writes to the model, the selection or the viewport.

use egui::{Modifiers, Pos2, Rect, Vec2};
use image::RgbaImage;

use crate::generation::{GenerationError, GenerationEvent, GenerationOrchestrator, QualityTier};
use crate::ids::{AnnotationId, ImageId, RowId};
use crate::layout::{CanvasLayout, LayoutConfig};
use crate::model::{Annotation, Canvas, Image, ImagePoint};
use crate::selection::{Direction, Selection, SelectionConfig, SelectionEffect, centered_item};
use crate::viewport::{NavPhase, Viewport, ZoomSource};

/// In-progress drag rectangle, viewport coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Marquee {
    origin: Pos2,
    current: Pos2,
}

pub struct CanvasController {
    canvas: Canvas,
    selection: Selection,
    layout: CanvasLayout,
    layout_config: LayoutConfig,
    pub viewport: Viewport,
    pub selection_config: SelectionConfig,
    /// Let manual scrolling move a single selection to the centred image.
    pub focus_tracking: bool,
    marquee: Option<Marquee>,
    scroll_dirty: bool,
    generation: Option<GenerationOrchestrator>,
}

impl Default for CanvasController {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasController {
    pub fn new() -> Self {
        Self {
            canvas: Canvas::new(),
            selection: Selection::new(),
            layout: CanvasLayout::default(),
            layout_config: LayoutConfig::default(),
            viewport: Viewport::default(),
            selection_config: SelectionConfig::default(),
            focus_tracking: true,
            marquee: None,
            scroll_dirty: false,
            generation: None,
        }
    }

    pub fn with_generation(mut self, orchestrator: GenerationOrchestrator) -> Self {
        self.generation = Some(orchestrator);
        self
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn layout(&self) -> &CanvasLayout {
        &self.layout
    }

    pub fn layout_config(&self) -> &LayoutConfig {
        &self.layout_config
    }

    pub fn generation(&self) -> Option<&GenerationOrchestrator> {
        self.generation.as_ref()
    }

    pub fn generation_mut(&mut self) -> Option<&mut GenerationOrchestrator> {
        self.generation.as_mut()
    }

    /// Selection rectangle for drawing, once it has passed the drag threshold.
    pub fn marquee_rect(&self) -> Option<Rect> {
        let m = self.marquee?;
        self.exceeds_marquee_threshold(&m)
            .then(|| Rect::from_two_pos(m.origin, m.current))
    }

    fn relayout(&mut self) {
        self.layout = CanvasLayout::compute(self.canvas.rows(), &self.layout_config);
    }

    fn apply(&mut self, effect: SelectionEffect, now: f64) {
        match effect {
            SelectionEffect::None => {}
            SelectionEffect::SnapTo(id) => self.snap_to_item(id, now),
            SelectionEffect::FitSelection => self.fit_selection_to_view(now),
        }
    }

    // ------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------

    /// Add a batch of uploads as a new row and select all of it.
    pub fn upload_images(
        &mut self,
        title: impl Into<String>,
        files: Vec<(String, RgbaImage)>,
        now: f64,
    ) -> Option<RowId> {
        let images: Vec<Image> = files
            .into_iter()
            .map(|(name, pixels)| Image::from_upload(name, pixels))
            .collect();
        let ids: Vec<ImageId> = images.iter().map(|img| img.id).collect();
        let row = self.canvas.add_row(title, images)?;
        self.relayout();
        crate::log_info!("row {} added with {} image(s)", row, ids.len());

        let effect = self.selection.select_multiple(&ids, &self.canvas.order());
        self.apply(effect, now);
        Some(row)
    }

    pub fn delete_image(&mut self, id: ImageId, now: f64) -> bool {
        if self.canvas.remove_image(id).is_none() {
            return false;
        }
        self.relayout();
        if self.selection.remove(id) && self.selection.len() > 1 {
            self.fit_selection_to_view(now);
        }
        true
    }

    pub fn delete_selected(&mut self) -> usize {
        let ids = self.selection.ids().to_vec();
        for id in &ids {
            self.canvas.remove_image(*id);
        }
        self.relayout();
        self.selection.prune(&self.canvas.order());
        crate::log_info!("deleted {} selected image(s)", ids.len());
        ids.len()
    }

    /// Attach an annotation to an image. Stale ids are ignored.
    pub fn add_annotation(&mut self, image: ImageId, annotation: Annotation) -> Option<AnnotationId> {
        let img = self.canvas.image_mut(image)?;
        let id = annotation.id;
        img.add_annotation(annotation);
        Some(id)
    }

    pub fn remove_annotation(&mut self, image: ImageId, annotation: AnnotationId) -> bool {
        self.canvas
            .image_mut(image)
            .is_some_and(|img| img.remove_annotation(annotation))
    }

    /// Map a viewport point into `image`'s own pixel grid (zoom-independent).
    pub fn viewport_to_image(&self, image: ImageId, p: Pos2) -> Option<ImagePoint> {
        let rect = self.layout.content_rect(image)?;
        let c = self.viewport.viewport_to_content(p);
        Some(ImagePoint::new(c.x - rect.min.x, c.y - rect.min.y))
    }

    /// Record a stroke drawn on screen as an image-space annotation.
    pub fn add_stroke_from_viewport(
        &mut self,
        image: ImageId,
        points: &[Pos2],
        width: f32,
        color: [u8; 4],
        label: Option<&str>,
    ) -> Option<AnnotationId> {
        let mapped: Vec<ImagePoint> = points
            .iter()
            .filter_map(|p| self.viewport_to_image(image, *p))
            .collect();
        let mut stroke = Annotation::stroke(mapped, width, color)?;
        if let Some(label) = label {
            stroke = stroke.with_label(label);
        }
        self.add_annotation(image, stroke)
    }

    // ------------------------------------------------------------------
    // Pointer
    // ------------------------------------------------------------------

    pub fn click_item(&mut self, id: ImageId, modifiers: Modifiers, now: f64) {
        let order = self.canvas.order();
        let effect = if modifiers.command || modifiers.ctrl {
            self.selection.toggle(id, &order)
        } else if modifiers.shift {
            self.selection.shift_click(id, &order)
        } else {
            self.selection.click(id, &order)
        };
        self.apply(effect, now);
    }

    /// Click at a viewport position: hits select, empty space clears.
    pub fn click_at(&mut self, p: Pos2, modifiers: Modifiers, now: f64) {
        let content = self.viewport.viewport_to_content(p);
        match self.layout.hit_test(content) {
            Some(id) => self.click_item(id, modifiers, now),
            None if !modifiers.shift && !modifiers.command => self.selection.clear(),
            None => {}
        }
    }

    pub fn item_at(&self, p: Pos2) -> Option<ImageId> {
        self.layout.hit_test(self.viewport.viewport_to_content(p))
    }

    pub fn begin_marquee(&mut self, p: Pos2) {
        self.marquee = Some(Marquee {
            origin: p,
            current: p,
        });
    }

    pub fn update_marquee(&mut self, p: Pos2) {
        if let Some(m) = &mut self.marquee {
            m.current = p;
        }
    }

    fn exceeds_marquee_threshold(&self, m: &Marquee) -> bool {
        let d = (m.current - m.origin).abs();
        let t = self.selection_config.marquee_threshold;
        d.x > t && d.y > t
    }

    /// Finish a drag. Returns `false` when it was too small to count, in which
    /// case the caller treats it as a click.
    pub fn end_marquee(&mut self, now: f64) -> bool {
        let Some(m) = self.marquee.take() else {
            return false;
        };
        if !self.exceeds_marquee_threshold(&m) {
            return false;
        }
        let area = Rect::from_two_pos(
            self.viewport.viewport_to_content(m.origin),
            self.viewport.viewport_to_content(m.current),
        );
        let hits = self.layout.items_intersecting(area);
        let effect = self.selection.select_multiple(&hits, &self.canvas.order());
        self.apply(effect, now);
        true
    }

    // ------------------------------------------------------------------
    // Keyboard / selection commands
    // ------------------------------------------------------------------

    pub fn navigate(&mut self, direction: Direction, explicit: Option<ImageId>, now: f64) {
        let centered = centered_item(&self.layout, &self.viewport).map(|(id, _)| id);
        let effect = self
            .selection
            .navigate(direction, explicit, centered, &self.canvas.grid());
        self.apply(effect, now);
    }

    pub fn select_all(&mut self, now: f64) {
        let effect = self.selection.select_all(&self.canvas.order());
        self.apply(effect, now);
    }

    pub fn select_multiple(&mut self, ids: &[ImageId], now: f64) {
        let effect = self.selection.select_multiple(ids, &self.canvas.order());
        self.apply(effect, now);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // ------------------------------------------------------------------
    // Viewport
    // ------------------------------------------------------------------

    /// Frame every selected image. No-op below two selected.
    pub fn fit_selection_to_view(&mut self, now: f64) {
        if self.selection.len() < 2 {
            return;
        }
        if let Some(bbox) = self.layout.bounding_box(self.selection.ids()) {
            self.viewport.fit_content_rect(bbox, now);
        }
    }

    /// Animated framing of the whole canvas.
    pub fn zoom_to_fit_all(&mut self, now: f64) {
        let all: Vec<ImageId> = self.layout.items.iter().map(|it| it.id).collect();
        if let Some(bbox) = self.layout.bounding_box(&all) {
            let (zoom, scroll) = self.viewport.frame_for(bbox);
            let secs = self.viewport.config.button_zoom_secs;
            self.viewport
                .smooth_zoom_to(zoom, Some(scroll), secs, ZoomSource::Button, now);
        }
    }

    pub fn snap_to_item(&mut self, id: ImageId, now: f64) {
        if let Some(rect) = self.layout.content_rect(id) {
            self.viewport.snap_to(rect, now);
        }
    }

    /// Zoom by `factor` around the cursor, or around the selected image when
    /// exactly one is selected and no snap is settling.
    pub fn zoom_at_cursor(&mut self, factor: f32, cursor: Pos2, now: f64) {
        let settling = self.viewport.phase(now) == NavPhase::ProgrammaticScrolling;
        let anchor = match self.selection.single() {
            Some(id) if !settling => self
                .layout
                .content_rect(id)
                .map(|r| self.viewport.content_to_viewport(r.center()))
                .unwrap_or(cursor),
            _ => cursor,
        };
        self.viewport.zoom_around(factor, anchor, now);
    }

    /// Wheel input. `delta` is positive when scrolling down/right; with the
    /// zoom modifier held the vertical component zooms instead.
    pub fn on_wheel(&mut self, delta: Vec2, cursor: Pos2, zoom_modifier: bool, now: f64) {
        if zoom_modifier {
            let factor = self.viewport.wheel_zoom_factor(delta.y);
            self.zoom_at_cursor(factor, cursor, now);
        } else {
            self.scroll_by(delta, now);
        }
    }

    pub fn scroll_by(&mut self, delta: Vec2, now: f64) {
        if delta == Vec2::ZERO {
            return;
        }
        self.viewport.scroll_by(delta, now);
        self.scroll_dirty = true;
    }

    pub fn zoom_in(&mut self, source: ZoomSource, now: f64) {
        self.viewport.zoom_in(source, now);
    }

    pub fn zoom_out(&mut self, source: ZoomSource, now: f64) {
        self.viewport.zoom_out(source, now);
    }

    pub fn reset_zoom(&mut self, source: ZoomSource, now: f64) {
        self.viewport.reset_zoom(source, now);
    }

    // ------------------------------------------------------------------
    // Per-frame work
    // ------------------------------------------------------------------

    /// Advance animations, run the debounced focus check and commit finished
    /// generations. Returns `true` while another frame is needed.
    pub fn frame(&mut self, now: f64) -> bool {
        let animating = self.viewport.tick(now);

        if std::mem::take(&mut self.scroll_dirty) {
            self.track_focus(now);
        }

        let events = match &mut self.generation {
            Some(orch) => orch.poll(&mut self.canvas),
            None => Vec::new(),
        };
        if !events.is_empty() {
            self.relayout();
        }
        for event in events {
            match event {
                GenerationEvent::Completed { .. } | GenerationEvent::Discarded { .. } => {}
                GenerationEvent::RolledBack {
                    placeholder,
                    source,
                } => {
                    self.selection.remove(placeholder);
                    let effect = self
                        .selection
                        .select_multiple(&[source], &self.canvas.order());
                    self.apply(effect, now);
                }
            }
        }

        let in_flight = self.generation.as_ref().is_some_and(|g| g.in_flight() > 0);
        animating || in_flight || self.viewport.is_auto_scrolling(now)
    }

    fn track_focus(&mut self, now: f64) {
        if !self.focus_tracking {
            return;
        }
        let Some(current) = self.selection.single() else {
            return;
        };
        if !self.viewport.focus_tracking_allowed(now) {
            return;
        }
        let Some((candidate, distance)) = centered_item(&self.layout, &self.viewport) else {
            return;
        };
        let threshold = self.selection_config.focus_threshold(self.viewport.zoom());
        if candidate != current && distance < threshold {
            self.selection.focus_silently(candidate);
        }
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    /// Edit every selected image with `prompt`. Placeholders are selected.
    pub fn generate(&mut self, prompt: &str, tier: QualityTier, now: f64) -> Result<Vec<ImageId>, GenerationError> {
        let orch = self
            .generation
            .as_mut()
            .ok_or_else(|| GenerationError::Service("no generation service configured".into()))?;
        let sources = self.selection.ids().to_vec();
        let placeholders = orch.start(&mut self.canvas, &sources, prompt, tier, now)?;
        self.relayout();
        let effect = self
            .selection
            .select_multiple(&placeholders, &self.canvas.order());
        self.apply(effect, now);
        Ok(placeholders)
    }

    pub fn take_alerts(&mut self) -> Vec<String> {
        self.generation
            .as_mut()
            .map(|g| g.take_alerts())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AccountBackend, MemoryBackend};
    use crate::generation::tests::ScriptedService;
    use egui::{pos2, vec2};
    use image::Rgba;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn photo() -> RgbaImage {
        RgbaImage::from_pixel(320, 320, Rgba([200, 200, 200, 255]))
    }

    fn with_uploads(n: usize) -> (CanvasController, Vec<ImageId>) {
        let mut ctl = CanvasController::new();
        let files = (0..n).map(|i| (format!("room{}.png", i), photo())).collect();
        ctl.upload_images("Living room", files, 0.0);
        let ids = ctl.canvas().order();
        (ctl, ids)
    }

    fn shift() -> Modifiers {
        Modifiers {
            shift: true,
            ..Modifiers::NONE
        }
    }

    fn assert_inside_padding(ctl: &CanvasController, ids: &[ImageId]) {
        let pad = ctl.viewport.config.fit_padding;
        let size = ctl.viewport.size();
        for id in ids {
            let r = ctl
                .viewport
                .content_rect_to_viewport(ctl.layout().content_rect(*id).unwrap());
            assert!(r.min.x >= pad - 0.5 && r.min.y >= pad - 0.5, "{:?}", r);
            assert!(r.max.x <= size.x - pad + 0.5 && r.max.y <= size.y - pad + 0.5, "{:?}", r);
        }
    }

    #[test]
    fn upload_click_shift_click_scenario() {
        let (mut ctl, ids) = with_uploads(3);
        assert_eq!(ctl.canvas().rows().len(), 1);
        assert_eq!(ctl.selection().ids(), ids.as_slice());
        assert_inside_padding(&ctl, &ids);

        ctl.click_item(ids[1], Modifiers::NONE, 1.0);
        assert_eq!(ctl.selection().ids(), &[ids[1]]);
        assert!(ctl.viewport.is_auto_scrolling(1.0));
        ctl.frame(2.0);
        let center = ctl.viewport.content_to_viewport(ctl.layout().content_rect(ids[1]).unwrap().center());
        let mid = ctl.viewport.size() / 2.0;
        assert!((center.x - mid.x).abs() < 0.5 && (center.y - mid.y).abs() < 0.5);

        ctl.click_item(ids[2], shift(), 3.0);
        assert_eq!(ctl.selection().ids(), &[ids[1], ids[2]]);
        assert_eq!(ctl.selection().primary(), Some(ids[2]));
        assert_inside_padding(&ctl, &ids[1..]);
    }

    #[test]
    fn deleting_prunes_selection_in_the_same_call() {
        let (mut ctl, ids) = with_uploads(3);
        assert!(ctl.delete_image(ids[0], 1.0));
        assert!(!ctl.selection().contains(ids[0]));
        assert_eq!(ctl.selection().ids(), &ids[1..]);
        assert!(!ctl.delete_image(ids[0], 1.0));

        ctl.select_all(2.0);
        assert_eq!(ctl.delete_selected(), 2);
        assert!(ctl.selection().is_empty());
        assert!(ctl.canvas().is_empty());
    }

    #[test]
    fn small_drag_is_not_a_marquee() {
        let (mut ctl, ids) = with_uploads(3);
        ctl.click_item(ids[0], Modifiers::NONE, 0.0);
        ctl.begin_marquee(pos2(10.0, 10.0));
        ctl.update_marquee(pos2(14.0, 400.0));
        assert!(ctl.marquee_rect().is_none());
        assert!(!ctl.end_marquee(1.0));
        assert_eq!(ctl.selection().ids(), &[ids[0]]);
    }

    #[test]
    fn marquee_replaces_selection_with_hits() {
        let (mut ctl, ids) = with_uploads(3);
        ctl.viewport.smooth_zoom_to(1.0, Some(Vec2::ZERO), 0.0, ZoomSource::Button, 0.0);
        ctl.click_item(ids[2], Modifiers::NONE, 0.0);
        ctl.frame(1.0);
        ctl.viewport.smooth_zoom_to(1.0, Some(Vec2::ZERO), 0.0, ZoomSource::Button, 1.0);

        let a = ctl.layout().content_rect(ids[0]).unwrap();
        let b = ctl.layout().content_rect(ids[1]).unwrap();
        ctl.begin_marquee(a.center());
        ctl.update_marquee(b.center() + vec2(0.0, 40.0));
        assert!(ctl.marquee_rect().is_some());
        assert!(ctl.end_marquee(2.0));
        assert_eq!(ctl.selection().ids(), &[ids[0], ids[1]]);
    }

    #[test]
    fn focus_tracking_follows_manual_scroll() {
        let (mut ctl, ids) = with_uploads(3);
        ctl.click_item(ids[0], Modifiers::NONE, 0.0);

        // While the snap settles, scrolling does not steal focus.
        let step = vec2(320.0 + ctl.layout_config().item_gap, 0.0) * ctl.viewport.zoom();
        ctl.scroll_by(step, 0.1);
        ctl.frame(0.1);
        assert_eq!(ctl.selection().ids(), &[ids[0]]);

        ctl.frame(1.0);
        ctl.click_item(ids[0], Modifiers::NONE, 1.0);
        ctl.frame(2.0);
        ctl.scroll_by(step, 3.0);
        ctl.frame(3.0);
        assert_eq!(ctl.selection().ids(), &[ids[1]]);
        assert!(!ctl.viewport.is_animating());
    }

    /// One image selected and centred, zoom exactly 1, all animations done.
    fn settled_on_first_at_unit_zoom() -> (CanvasController, Vec<ImageId>) {
        let (mut ctl, ids) = with_uploads(3);
        ctl.click_item(ids[0], Modifiers::NONE, 0.0);
        ctl.frame(1.0);
        ctl.reset_zoom(ZoomSource::Button, 1.0);
        ctl.frame(2.0);
        assert_eq!(ctl.viewport.zoom(), 1.0);
        assert_eq!(ctl.viewport.phase(2.0), NavPhase::Idle);
        (ctl, ids)
    }

    #[test]
    fn focus_tracking_waits_for_zoom_animation() {
        let (mut ctl, ids) = settled_on_first_at_unit_zoom();
        ctl.zoom_in(ZoomSource::Button, 3.0);
        ctl.scroll_by(vec2(300.0, 0.0), 3.05);
        ctl.frame(3.05);
        assert_eq!(ctl.viewport.phase(3.05), NavPhase::AnimatingZoom);
        assert_eq!(ctl.selection().ids(), &[ids[0]]);
    }

    #[test]
    fn focus_tracking_ignores_images_beyond_threshold() {
        let (mut ctl, ids) = settled_on_first_at_unit_zoom();
        // Neighbour centre is 336 px away; threshold at zoom 1 is 150 px.
        ctl.scroll_by(vec2(180.0, 0.0), 3.0);
        ctl.frame(3.0);
        assert_eq!(ctl.selection().ids(), &[ids[0]]);

        ctl.scroll_by(vec2(20.0, 0.0), 4.0);
        ctl.frame(4.0);
        assert_eq!(ctl.selection().ids(), &[ids[1]]);
    }

    #[test]
    fn focus_tracking_waits_out_programmatic_cooldown() {
        let (mut ctl, ids) = settled_on_first_at_unit_zoom();
        let centre = ctl
            .viewport
            .content_to_viewport(ctl.layout().content_rect(ids[0]).unwrap().center());
        ctl.on_wheel(vec2(0.0, -1.0), centre, true, 3.0);

        ctl.scroll_by(vec2(250.0, 0.0), 3.05);
        ctl.frame(3.05);
        assert_eq!(ctl.viewport.phase(3.05), NavPhase::UserScrolling);
        assert_eq!(ctl.selection().ids(), &[ids[0]]);

        ctl.scroll_by(vec2(1.0, 0.0), 3.5);
        ctl.frame(3.5);
        assert_eq!(ctl.selection().ids(), &[ids[1]]);
    }

    #[test]
    fn focus_tracking_respects_toggle_and_multi_selection() {
        let (mut ctl, ids) = with_uploads(3);
        ctl.frame(1.0);
        let step = vec2(400.0, 0.0);
        ctl.scroll_by(step, 2.0);
        ctl.frame(2.0);
        assert_eq!(ctl.selection().len(), 3);

        ctl.click_item(ids[0], Modifiers::NONE, 3.0);
        ctl.frame(4.0);
        ctl.focus_tracking = false;
        ctl.scroll_by(step, 5.0);
        ctl.frame(5.0);
        assert_eq!(ctl.selection().ids(), &[ids[0]]);
    }

    #[test]
    fn single_selection_anchors_wheel_zoom() {
        let (mut ctl, ids) = with_uploads(3);
        ctl.click_item(ids[1], Modifiers::NONE, 0.0);
        ctl.frame(1.0);
        let centre = ctl.layout().content_rect(ids[1]).unwrap().center();
        let before = ctl.viewport.content_to_viewport(centre);

        ctl.on_wheel(vec2(0.0, -200.0), pos2(5.0, 5.0), true, 2.0);
        assert!(ctl.viewport.zoom() > 1.0);
        let after = ctl.viewport.content_to_viewport(centre);
        assert!((before - after).length() < 1e-2);
    }

    #[test]
    fn cursor_anchors_wheel_zoom_while_snap_settles() {
        let (mut ctl, ids) = with_uploads(3);
        ctl.click_item(ids[1], Modifiers::NONE, 0.0);
        let cursor = pos2(100.0, 120.0);
        let under = ctl.viewport.viewport_to_content(cursor);
        ctl.zoom_at_cursor(1.5, cursor, 0.1);
        let after = ctl.viewport.content_to_viewport(under);
        assert!((after - cursor).length() < 1e-2);
    }

    #[test]
    fn keyboard_navigation_snaps_to_neighbour() {
        let (mut ctl, ids) = with_uploads(3);
        ctl.navigate(Direction::Right, Some(ids[0]), 0.0);
        assert_eq!(ctl.selection().ids(), &[ids[1]]);
        assert!(ctl.viewport.is_auto_scrolling(0.0));
    }

    #[test]
    fn strokes_are_captured_in_image_space() {
        let (mut ctl, ids) = with_uploads(1);
        ctl.viewport.smooth_zoom_to(2.0, Some(vec2(10.0, 20.0)), 0.0, ZoomSource::Button, 0.0);
        let rect = ctl.layout().content_rect(ids[0]).unwrap();
        let on_screen = ctl.viewport.content_to_viewport(rect.min + vec2(40.0, 60.0));

        let ann = ctl
            .add_stroke_from_viewport(ids[0], &[on_screen], 6.0, [255, 0, 0, 255], Some("rug"))
            .unwrap();
        let img = ctl.canvas().image(ids[0]).unwrap();
        let stored = img.annotations.iter().find(|a| a.id == ann).unwrap();
        let p = stored.anchor();
        assert!((p.x - 40.0).abs() < 1e-3 && (p.y - 60.0).abs() < 1e-3);
        assert_eq!(stored.label(), Some("rug"));
        assert!(ctl.remove_annotation(ids[0], ann));
    }

    #[test]
    fn failed_generation_restores_source_selection_and_credits() {
        let backend = Arc::new(MemoryBackend::signed_in("ana", 3));
        let orch = GenerationOrchestrator::new(Arc::new(ScriptedService::failing("boom")), backend.clone());
        let mut ctl = CanvasController::new().with_generation(orch);
        ctl.upload_images("Kitchen", vec![("k.png".into(), photo())], 0.0);
        let source = ctl.canvas().order()[0];

        let placeholders = ctl.generate("white cabinets", QualityTier::Standard, 1.0).unwrap();
        assert_eq!(ctl.selection().ids(), placeholders.as_slice());
        assert_eq!(backend.profile("ana").unwrap().credits, 2);

        let deadline = Instant::now() + Duration::from_secs(10);
        while ctl.generation().is_some_and(|g| g.in_flight() > 0) && Instant::now() < deadline {
            ctl.frame(2.0);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!ctl.canvas().contains(placeholders[0]));
        assert_eq!(ctl.selection().ids(), &[source]);
        assert_eq!(backend.profile("ana").unwrap().credits, 3);
        assert_eq!(ctl.take_alerts().len(), 1);
    }

    #[test]
    fn generate_without_service_is_an_error() {
        let (mut ctl, _) = with_uploads(1);
        assert!(ctl.generate("sofa", QualityTier::Free, 0.0).is_err());
    }
}
