use eframe::egui;
use egui::{Align2, Color32, FontId, Modifiers, Pos2, Rect, Sense, Stroke, Vec2};
use image::RgbaImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;

use crate::backend::MemoryBackend;
use crate::controller::CanvasController;
use crate::generation::{GenerationOrchestrator, HttpGenerationService, QualityTier};
use crate::ids::ImageId;
use crate::model::{Annotation, AnnotationKind, Image};
use crate::selection::Direction;
use crate::settings::{LibraryEntry, Preferences, ThemeMode};
use crate::viewport::ZoomSource;

/// Credits granted to the offline account on first launch.
const STARTING_CREDITS: u32 = 20;
/// Longest texture edge uploaded to the GPU per image.
const MAX_TEXTURE_EDGE: u32 = 2048;

// ============================================================================
// ASYNC UPLOAD PIPELINE: decode on rayon, commit on the UI thread
// ============================================================================

/// Exactly one per upload job, even when every file failed.
struct UploadResult {
    title: String,
    files: Vec<(String, RgbaImage)>,
    errors: Vec<String>,
}

fn decode_uploads(paths: &[PathBuf]) -> UploadResult {
    let title = paths
        .first()
        .and_then(|p| p.parent())
        .and_then(|d| d.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Uploads".to_string());
    let mut files = Vec::with_capacity(paths.len());
    let mut errors = Vec::new();
    for path in paths {
        match image::open(path) {
            Ok(img) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                files.push((name, img.to_rgba8()));
            }
            Err(e) => errors.push(format!("Could not open {}: {}", path.display(), e)),
        }
    }
    UploadResult { title, files, errors }
}

/// Decode jobs in flight plus the channel they report on.
struct UploadQueue {
    sender: mpsc::Sender<UploadResult>,
    receiver: mpsc::Receiver<UploadResult>,
    pending: usize,
}

impl UploadQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            pending: 0,
        }
    }

    fn is_busy(&self) -> bool {
        self.pending > 0
    }

    fn spawn(&mut self, paths: Vec<PathBuf>) {
        let sender = self.sender.clone();
        self.pending += 1;
        rayon::spawn(move || {
            let _ = sender.send(decode_uploads(&paths));
        });
    }

    fn drain(&mut self) -> Vec<UploadResult> {
        let mut done = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            self.pending = self.pending.saturating_sub(1);
            done.push(result);
        }
        done
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tool {
    Select,
    Draw,
    /// Index into the annotation library.
    Stamp(usize),
}

#[derive(Clone, Debug, PartialEq)]
enum Drag {
    None,
    Marquee,
    Stroke { image: ImageId, points: Vec<Pos2> },
}

pub struct StageCanvasApp {
    controller: CanvasController,
    prefs: Preferences,
    textures: HashMap<ImageId, egui::TextureHandle>,

    uploads: UploadQueue,

    prompt: String,
    inline_error: Option<String>,
    alerts: Vec<String>,

    tool: Tool,
    drag: Drag,
    stroke_width: f32,
    stroke_color: [u8; 4],
    label: String,
    new_entry_name: String,
}

impl StageCanvasApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let prefs = Preferences::load();
        apply_theme(&cc.egui_ctx, prefs.theme);

        let backend = Arc::new(MemoryBackend::signed_in("local", STARTING_CREDITS));
        let mut controller = CanvasController::new();
        match HttpGenerationService::new(prefs.api_endpoint.clone()) {
            Ok(service) => {
                controller = controller.with_generation(GenerationOrchestrator::new(Arc::new(service), backend));
            }
            Err(e) => {
                crate::log_err!("generation disabled: {}", e);
            }
        }
        controller.focus_tracking = prefs.focus_tracking;

        crate::log_info!("StageCanvas started (endpoint {})", prefs.api_endpoint);

        Self {
            controller,
            prefs,
            textures: HashMap::new(),
            uploads: UploadQueue::new(),
            prompt: String::new(),
            inline_error: None,
            alerts: Vec::new(),
            tool: Tool::Select,
            drag: Drag::None,
            stroke_width: 8.0,
            stroke_color: [255, 64, 64, 255],
            label: String::new(),
            new_entry_name: String::new(),
        }
    }

    fn save_prefs(&self) {
        if let Err(e) = self.prefs.save() {
            crate::log_warn!("preferences not saved: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    fn pick_and_upload(&mut self) {
        let Some(paths) = rfd::FileDialog::new()
            .add_filter("Images", &["png", "jpg", "jpeg", "webp"])
            .pick_files()
        else {
            return;
        };
        if paths.is_empty() {
            return;
        }
        self.uploads.spawn(paths);
    }

    fn poll_uploads(&mut self, now: f64) {
        for result in self.uploads.drain() {
            for msg in result.errors {
                crate::log_warn!("{}", msg);
                self.alerts.push(msg);
            }
            if !result.files.is_empty() {
                self.controller.upload_images(result.title, result.files, now);
            }
        }
    }

    // ------------------------------------------------------------------
    // Keyboard
    // ------------------------------------------------------------------

    fn handle_keys(&mut self, ctx: &egui::Context, now: f64) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let keys = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::ArrowLeft),
                i.key_pressed(egui::Key::ArrowRight),
                i.key_pressed(egui::Key::ArrowUp),
                i.key_pressed(egui::Key::ArrowDown),
                i.modifiers.command && i.key_pressed(egui::Key::A),
                i.key_pressed(egui::Key::Escape),
                i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace),
            )
        });
        let (left, right, up, down, all, escape, delete) = keys;

        for (pressed, dir) in [
            (left, Direction::Left),
            (right, Direction::Right),
            (up, Direction::Up),
            (down, Direction::Down),
        ] {
            if pressed {
                self.controller.navigate(dir, None, now);
            }
        }
        if all {
            self.controller.select_all(now);
        }
        if escape {
            self.controller.clear_selection();
            self.drag = Drag::None;
        }
        if delete {
            self.controller.delete_selected();
        }

        let (zoom_in, zoom_out, reset) = ctx.input(|i| {
            (
                i.modifiers.command && i.key_pressed(egui::Key::PlusEquals),
                i.modifiers.command && i.key_pressed(egui::Key::Minus),
                i.modifiers.command && i.key_pressed(egui::Key::Num0),
            )
        });
        if zoom_in {
            self.controller.zoom_in(ZoomSource::Keyboard, now);
        }
        if zoom_out {
            self.controller.zoom_out(ZoomSource::Keyboard, now);
        }
        if reset {
            self.controller.reset_zoom(ZoomSource::Keyboard, now);
        }
    }

    // ------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------

    fn toolbar(&mut self, ui: &mut egui::Ui, now: f64) {
        ui.horizontal(|ui| {
            if ui.button("Upload photos…").clicked() {
                self.pick_and_upload();
            }
            if self.uploads.is_busy() {
                ui.spinner();
            }
            ui.separator();
            ui.selectable_value(&mut self.tool, Tool::Select, "Select");
            ui.selectable_value(&mut self.tool, Tool::Draw, "Draw");
            ui.separator();
            if ui.button("−").clicked() {
                self.controller.zoom_out(ZoomSource::Button, now);
            }
            ui.label(format!("{:.0}%", self.controller.viewport.zoom() * 100.0));
            if ui.button("+").clicked() {
                self.controller.zoom_in(ZoomSource::Button, now);
            }
            if ui.button("100%").clicked() {
                self.controller.reset_zoom(ZoomSource::Button, now);
            }
            if ui.button("Fit all").clicked() {
                self.controller.zoom_to_fit_all(now);
            }
        });
    }

    fn inspector(&mut self, ui: &mut egui::Ui, now: f64) {
        ui.heading("Edit");
        let selected = self.controller.selection().len();
        ui.label(match selected {
            0 => "Nothing selected".to_string(),
            1 => "1 image selected".to_string(),
            n => format!("{} images selected", n),
        });

        ui.add_space(6.0);
        ui.label("Prompt");
        ui.text_edit_multiline(&mut self.prompt);

        let before = self.prefs.quality_tier;
        egui::ComboBox::from_label("Quality")
            .selected_text(self.prefs.quality_tier.label())
            .show_ui(ui, |ui| {
                for tier in QualityTier::ALL {
                    ui.selectable_value(&mut self.prefs.quality_tier, tier, tier.label());
                }
            });
        if self.prefs.quality_tier != before {
            self.save_prefs();
        }

        if let Some(orch) = self.controller.generation() {
            let spec = orch.tiers.spec(self.prefs.quality_tier);
            let per_image = spec.credit_cost;
            match orch.credits() {
                Ok(c) => ui.label(format!("{} credit(s) per image · {} available", per_image, c)),
                Err(e) => ui.label(format!("Account unavailable: {}", e)),
            };
        }

        if ui
            .add_enabled(selected > 0, egui::Button::new("Generate"))
            .clicked()
        {
            match self.controller.generate(&self.prompt, self.prefs.quality_tier, now) {
                Ok(_) => self.inline_error = None,
                Err(e) => self.inline_error = Some(e.to_string()),
            }
        }
        if let Some(err) = &self.inline_error {
            ui.colored_label(Color32::from_rgb(220, 80, 80), err);
        }

        ui.separator();
        self.annotation_tools(ui);

        ui.separator();
        ui.heading("Preferences");
        if ui
            .checkbox(&mut self.prefs.focus_tracking, "Select image under view centre while scrolling")
            .changed()
        {
            self.controller.focus_tracking = self.prefs.focus_tracking;
            self.save_prefs();
        }
        let mut dark = self.prefs.theme == ThemeMode::Dark;
        if ui.checkbox(&mut dark, "Dark theme").changed() {
            self.prefs.theme = if dark { ThemeMode::Dark } else { ThemeMode::Light };
            apply_theme(ui.ctx(), self.prefs.theme);
            self.save_prefs();
        }
        ui.horizontal(|ui| {
            ui.label("Language");
            if ui.text_edit_singleline(&mut self.prefs.language).lost_focus() {
                self.save_prefs();
            }
        });

        if !self.alerts.is_empty() {
            ui.separator();
            let mut dismiss = None;
            for (i, alert) in self.alerts.iter().enumerate() {
                ui.horizontal(|ui| {
                    ui.colored_label(Color32::from_rgb(230, 160, 60), alert);
                    if ui.small_button("✕").clicked() {
                        dismiss = Some(i);
                    }
                });
            }
            if let Some(i) = dismiss {
                self.alerts.remove(i);
            }
        }
    }

    fn annotation_tools(&mut self, ui: &mut egui::Ui) {
        ui.heading("Annotate");
        ui.horizontal(|ui| {
            ui.label("Label");
            ui.text_edit_singleline(&mut self.label);
        });
        ui.add(egui::Slider::new(&mut self.stroke_width, 2.0..=40.0).text("Brush"));
        let mut rgba = Color32::from_rgba_unmultiplied(
            self.stroke_color[0],
            self.stroke_color[1],
            self.stroke_color[2],
            self.stroke_color[3],
        );
        if ui.color_edit_button_srgba(&mut rgba).changed() {
            self.stroke_color = rgba.to_srgba_unmultiplied();
        }

        ui.label("Stamps");
        let mut remove = None;
        for (i, entry) in self.prefs.annotation_library.iter().enumerate() {
            ui.horizontal(|ui| {
                ui.selectable_value(&mut self.tool, Tool::Stamp(i), entry.name.as_str());
                if ui.small_button("✕").clicked() {
                    remove = Some(i);
                }
            });
        }
        if let Some(i) = remove {
            self.prefs.annotation_library.remove(i);
            self.tool = Tool::Select;
            self.save_prefs();
        }
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.new_entry_name);
            if ui.button("Add stamp").clicked() && !self.new_entry_name.trim().is_empty() {
                let name = self.new_entry_name.trim().to_string();
                self.prefs.annotation_library.push(LibraryEntry {
                    icon: name.clone(),
                    label: Some(name.clone()),
                    name,
                    color: self.stroke_color,
                });
                self.new_entry_name.clear();
                self.save_prefs();
            }
        });
    }

    // ------------------------------------------------------------------
    // Canvas
    // ------------------------------------------------------------------

    fn canvas_ui(&mut self, ui: &mut egui::Ui, now: f64) {
        let (rect, response) = ui.allocate_exact_size(ui.available_size(), Sense::click_and_drag());
        self.controller.viewport.set_size(rect.size());
        let origin = rect.min.to_vec2();
        let local = |p: Pos2| p - origin;

        // --- Wheel: pinch / ctrl-wheel zooms, alt-wheel zooms, plain wheel scrolls ---
        if response.hovered() {
            let (scroll, zoom, alt, hover) = ui.input(|i| {
                (i.scroll_delta, i.zoom_delta(), i.modifiers.alt, i.pointer.hover_pos())
            });
            if let Some(cursor) = hover.map(local) {
                if (zoom - 1.0).abs() > f32::EPSILON {
                    self.controller.zoom_at_cursor(zoom, cursor, now);
                } else if scroll != Vec2::ZERO {
                    self.controller.on_wheel(-scroll, cursor, alt, now);
                }
            }
        }

        let modifiers = ui.input(|i| i.modifiers);
        self.handle_pointer(&response, modifiers, local, now);
        self.sync_textures(ui.ctx());

        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, 0.0, ui.visuals().extreme_bg_color);
        self.paint_canvas(&painter, rect, now);
    }

    fn handle_pointer(
        &mut self,
        response: &egui::Response,
        modifiers: Modifiers,
        local: impl Fn(Pos2) -> Pos2,
        now: f64,
    ) {
        let pointer = response.interact_pointer_pos().map(&local);

        if response.drag_started()
            && let Some(p) = pointer
        {
            self.drag = match self.tool {
                Tool::Draw => match self.controller.item_at(p) {
                    Some(image) => Drag::Stroke {
                        image,
                        points: vec![p],
                    },
                    None => Drag::None,
                },
                _ => {
                    self.controller.begin_marquee(p);
                    Drag::Marquee
                }
            };
        }

        if response.dragged()
            && let Some(p) = pointer
        {
            match &mut self.drag {
                Drag::Marquee => self.controller.update_marquee(p),
                Drag::Stroke { points, .. } => {
                    if points.last().is_none_or(|last| last.distance(p) > 1.5) {
                        points.push(p);
                    }
                }
                Drag::None => {}
            }
        }

        // A drag too short to be a marquee is a click; don't apply it twice.
        let mut click_handled = false;
        if response.drag_released() {
            match std::mem::replace(&mut self.drag, Drag::None) {
                Drag::Marquee => {
                    if !self.controller.end_marquee(now)
                        && let Some(p) = pointer
                    {
                        self.controller.click_at(p, modifiers, now);
                        click_handled = true;
                    }
                }
                Drag::Stroke { image, points } => {
                    let label = Some(self.label.as_str()).filter(|l| !l.trim().is_empty());
                    self.controller.add_stroke_from_viewport(
                        image,
                        &points,
                        self.stroke_width,
                        self.stroke_color,
                        label,
                    );
                }
                Drag::None => {}
            }
        }

        if response.clicked()
            && !click_handled
            && let Some(p) = pointer
        {
            match self.tool {
                Tool::Stamp(i) => self.place_stamp(i, p),
                _ => self.controller.click_at(p, modifiers, now),
            }
        }
    }

    fn place_stamp(&mut self, entry: usize, p: Pos2) {
        let Some(entry) = self.prefs.annotation_library.get(entry) else {
            return;
        };
        let Some(image) = self.controller.item_at(p) else {
            return;
        };
        let Some(at) = self.controller.viewport_to_image(image, p) else {
            return;
        };
        let mut stamp = Annotation::stamp(at, entry.icon.clone(), entry.color);
        if let Some(label) = &entry.label {
            stamp = stamp.with_label(label.clone());
        }
        self.controller.add_annotation(image, stamp);
    }

    /// Upload textures for new or finished images; drop textures of deleted ones.
    fn sync_textures(&mut self, ctx: &egui::Context) {
        let canvas = self.controller.canvas();
        self.textures.retain(|id, _| canvas.contains(*id));
        for img in canvas.images() {
            if self.textures.contains_key(&img.id) {
                continue;
            }
            let Some(pixels) = &img.pixels else { continue };
            let color = texture_image(pixels);
            let handle = ctx.load_texture(format!("image-{}", img.id), color, egui::TextureOptions::LINEAR);
            self.textures.insert(img.id, handle);
        }
    }

    fn paint_canvas(&self, painter: &egui::Painter, rect: Rect, now: f64) {
        let vp = &self.controller.viewport;
        let origin = rect.min.to_vec2();
        let text_color = painter.ctx().style().visuals.text_color();
        let accent = painter.ctx().style().visuals.selection.stroke.color;
        let layout = self.controller.layout();
        let canvas = self.controller.canvas();
        let selection = self.controller.selection();

        for (row_layout, row) in layout.rows.iter().zip(canvas.rows()) {
            let pos = vp.content_to_viewport(row_layout.title_pos) + origin;
            painter.text(pos, Align2::LEFT_TOP, &row.title, FontId::proportional(16.0), text_color);
        }

        for item in &layout.items {
            let screen = vp.content_rect_to_viewport(item.rect).translate(origin);
            if !screen.intersects(rect) {
                continue;
            }
            let Some(img) = canvas.image(item.id) else { continue };

            match self.textures.get(&item.id) {
                Some(tex) => {
                    let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
                    painter.image(tex.id(), screen, uv, Color32::WHITE);
                }
                None => paint_placeholder(painter, screen, img, now),
            }
            paint_annotations(painter, screen, vp.zoom(), img);

            if selection.primary() == Some(item.id) {
                painter.rect_stroke(screen.expand(2.0), 3.0, Stroke::new(3.0, accent));
            } else if selection.contains(item.id) {
                painter.rect_stroke(screen.expand(1.0), 2.0, Stroke::new(1.5, accent));
            }
        }

        if let Drag::Stroke { points, .. } = &self.drag {
            let c = self.stroke_color;
            let stroke = Stroke::new(
                self.stroke_width * vp.zoom(),
                Color32::from_rgba_unmultiplied(c[0], c[1], c[2], c[3]),
            );
            let pts: Vec<Pos2> = points.iter().map(|p| *p + origin).collect();
            painter.add(egui::Shape::line(pts, stroke));
        }

        if let Some(m) = self.controller.marquee_rect() {
            let r = m.translate(origin);
            painter.rect_filled(r, 0.0, accent.gamma_multiply(0.15));
            painter.rect_stroke(r, 0.0, Stroke::new(1.0, accent));
        }
    }
}

// ============================================================================
// Painting helpers
// ============================================================================

fn apply_theme(ctx: &egui::Context, theme: ThemeMode) {
    ctx.set_visuals(match theme {
        ThemeMode::Dark => egui::Visuals::dark(),
        ThemeMode::Light => egui::Visuals::light(),
    });
}

fn texture_image(pixels: &RgbaImage) -> egui::ColorImage {
    let (w, h) = pixels.dimensions();
    let longest = w.max(h);
    if longest > MAX_TEXTURE_EDGE {
        let scale = MAX_TEXTURE_EDGE as f32 / longest as f32;
        let tw = ((w as f32 * scale).round() as u32).max(1);
        let th = ((h as f32 * scale).round() as u32).max(1);
        let small = image::imageops::resize(pixels, tw, th, image::imageops::FilterType::Triangle);
        egui::ColorImage::from_rgba_unmultiplied([tw as usize, th as usize], small.as_raw())
    } else {
        egui::ColorImage::from_rgba_unmultiplied([w as usize, h as usize], pixels.as_raw())
    }
}

fn paint_placeholder(painter: &egui::Painter, screen: Rect, img: &Image, now: f64) {
    painter.rect_filled(screen, 4.0, Color32::from_gray(60));
    let bar = Rect::from_min_size(
        screen.left_bottom() + Vec2::new(12.0, -24.0),
        Vec2::new((screen.width() - 24.0).max(0.0), 8.0),
    );
    painter.rect_filled(bar, 4.0, Color32::from_gray(90));
    let filled = Rect::from_min_size(bar.min, Vec2::new(bar.width() * img.progress(now), bar.height()));
    painter.rect_filled(filled, 4.0, Color32::from_rgb(120, 170, 255));
    let prompt = img.prompt.as_deref().unwrap_or("Generating…");
    painter.text(
        screen.center(),
        Align2::CENTER_CENTER,
        prompt,
        FontId::proportional(14.0),
        Color32::from_gray(220),
    );
}

fn paint_annotations(painter: &egui::Painter, screen: Rect, zoom: f32, img: &Image) {
    let to_screen = |x: f32, y: f32| screen.min + Vec2::new(x, y) * zoom;
    for a in &img.annotations {
        match a.kind() {
            AnnotationKind::Stroke { points, width, color } => {
                let c = Color32::from_rgba_unmultiplied(color[0], color[1], color[2], color[3]);
                let pts: Vec<Pos2> = points.iter().map(|p| to_screen(p.x, p.y)).collect();
                if let [only] = pts.as_slice() {
                    painter.circle_filled(*only, width * zoom / 2.0, c);
                } else {
                    painter.add(egui::Shape::line(pts, Stroke::new(width * zoom, c)));
                }
            }
            AnnotationKind::Stamp { at, color, .. } => {
                let c = Color32::from_rgba_unmultiplied(color[0], color[1], color[2], color[3]);
                let r = (img.width as f32 * 0.015).max(6.0) * zoom;
                painter.circle_filled(to_screen(at.x, at.y), r, c);
            }
            AnnotationKind::Reference { at, .. } => {
                painter.circle_stroke(to_screen(at.x, at.y), 8.0, Stroke::new(2.0, Color32::WHITE));
            }
        }
        if let Some(label) = a.label() {
            let anchor = a.anchor();
            painter.text(
                to_screen(anchor.x, anchor.y),
                Align2::CENTER_CENTER,
                label,
                FontId::monospace(12.0 * zoom.max(0.5)),
                Color32::WHITE,
            );
        }
    }
}

// ============================================================================
// eframe integration
// ============================================================================

impl eframe::App for StageCanvasApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = ctx.input(|i| i.time);

        self.poll_uploads(now);
        self.handle_keys(ctx, now);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar(ui, now));
        egui::SidePanel::right("inspector")
            .default_width(280.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| self.inspector(ui, now));
            });
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| self.canvas_ui(ui, now));

        let busy = self.controller.frame(now);
        self.alerts.extend(self.controller.take_alerts());
        if busy || self.uploads.is_busy() {
            ctx.request_repaint();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn drain_until_idle(queue: &mut UploadQueue) -> Vec<UploadResult> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut done = Vec::new();
        while queue.is_busy() && Instant::now() < deadline {
            done.extend(queue.drain());
            std::thread::sleep(Duration::from_millis(5));
        }
        done
    }

    #[test]
    fn upload_of_only_broken_files_still_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.jpg");
        std::fs::write(&broken, b"not an image").unwrap();

        let mut queue = UploadQueue::new();
        queue.spawn(vec![broken, dir.path().join("missing.png")]);
        let done = drain_until_idle(&mut queue);

        assert!(!queue.is_busy());
        assert_eq!(done.len(), 1);
        assert!(done[0].files.is_empty());
        assert_eq!(done[0].errors.len(), 2);
    }

    #[test]
    fn mixed_upload_keeps_the_good_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("kitchen.png");
        RgbaImage::new(8, 4).save(&good).unwrap();

        let result = decode_uploads(&[good, dir.path().join("missing.png")]);
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].0, "kitchen.png");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.title, dir.path().file_name().unwrap().to_string_lossy());
    }
}
