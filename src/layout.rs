//! Grid layout in content space.
//!
//! Layout is a pure function of the row list and [`LayoutConfig`]. Nothing is
//! measured after rendering: the rendered rectangle of an item at zoom `z` is
//! its content rectangle scaled by `z`.

use egui::{Pos2, Rect, Vec2, pos2, vec2};

use crate::ids::{ImageId, RowId};
use crate::model::Row;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayoutConfig {
    /// Empty margin around the whole grid.
    pub content_padding: f32,
    /// Horizontal gap between images in a row.
    pub item_gap: f32,
    /// Vertical gap between consecutive rows.
    pub row_gap: f32,
    /// Space reserved above each row for its title.
    pub title_height: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            content_padding: 48.0,
            item_gap: 16.0,
            row_gap: 48.0,
            title_height: 28.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ItemLayout {
    pub id: ImageId,
    pub row: usize,
    pub col: usize,
    /// Content-space rectangle.
    pub rect: Rect,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RowLayout {
    pub id: RowId,
    /// Where the title is drawn (content space).
    pub title_pos: Pos2,
    /// Band covering the row's images (content space).
    pub band: Rect,
}

#[derive(Clone, Debug, Default)]
pub struct CanvasLayout {
    pub items: Vec<ItemLayout>,
    pub rows: Vec<RowLayout>,
    pub content_size: Vec2,
}

impl CanvasLayout {
    pub fn compute(rows: &[Row], config: &LayoutConfig) -> Self {
        let mut items = Vec::new();
        let mut row_layouts = Vec::with_capacity(rows.len());
        let mut y = config.content_padding;
        let mut max_right = config.content_padding;

        for (ri, row) in rows.iter().enumerate() {
            let title_pos = pos2(config.content_padding, y);
            let top = y + config.title_height;
            let mut x = config.content_padding;
            let mut row_height = 0.0f32;

            for (ci, img) in row.images.iter().enumerate() {
                let size = vec2(img.width as f32, img.height as f32);
                items.push(ItemLayout {
                    id: img.id,
                    row: ri,
                    col: ci,
                    rect: Rect::from_min_size(pos2(x, top), size),
                });
                x += size.x + config.item_gap;
                row_height = row_height.max(size.y);
            }

            let right = (x - config.item_gap).max(config.content_padding);
            max_right = max_right.max(right);
            row_layouts.push(RowLayout {
                id: row.id,
                title_pos,
                band: Rect::from_min_max(
                    pos2(config.content_padding, top),
                    pos2(right, top + row_height),
                ),
            });
            y = top + row_height + config.row_gap;
        }

        let bottom = if rows.is_empty() {
            2.0 * config.content_padding
        } else {
            y - config.row_gap + config.content_padding
        };

        Self {
            items,
            rows: row_layouts,
            content_size: vec2(max_right + config.content_padding, bottom),
        }
    }

    pub fn item(&self, id: ImageId) -> Option<&ItemLayout> {
        self.items.iter().find(|it| it.id == id)
    }

    pub fn content_rect(&self, id: ImageId) -> Option<Rect> {
        self.item(id).map(|it| it.rect)
    }

    /// Union of the content rectangles of `ids`; stale ids are skipped.
    pub fn bounding_box(&self, ids: &[ImageId]) -> Option<Rect> {
        ids.iter()
            .filter_map(|id| self.content_rect(*id))
            .reduce(|a, b| a.union(b))
    }

    /// Items whose content rectangle overlaps `area`, in row-major order.
    pub fn items_intersecting(&self, area: Rect) -> Vec<ImageId> {
        self.items
            .iter()
            .filter(|it| it.rect.intersects(area))
            .map(|it| it.id)
            .collect()
    }

    /// Topmost item containing the content-space point.
    pub fn hit_test(&self, point: Pos2) -> Option<ImageId> {
        self.items
            .iter()
            .find(|it| it.rect.contains(point))
            .map(|it| it.id)
    }

    /// Items of one row, in column order.
    pub fn row_items(&self, row: usize) -> impl Iterator<Item = &ItemLayout> + '_ {
        self.items.iter().filter(move |it| it.row == row)
    }
}

pub fn scale_rect(rect: Rect, zoom: f32) -> Rect {
    Rect::from_min_max(
        pos2(rect.min.x * zoom, rect.min.y * zoom),
        pos2(rect.max.x * zoom, rect.max.y * zoom),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Canvas, Image};
    use image::RgbaImage;

    fn canvas_with(rows: &[&[(u32, u32)]]) -> Canvas {
        let mut canvas = Canvas::new();
        for (i, sizes) in rows.iter().enumerate() {
            let imgs = sizes
                .iter()
                .map(|&(w, h)| Image::from_upload("x.png", RgbaImage::new(w, h)))
                .collect();
            canvas.add_row(format!("row {}", i), imgs);
        }
        canvas
    }

    #[test]
    fn rows_stack_and_items_flow_left_to_right() {
        let canvas = canvas_with(&[&[(320, 320), (640, 320)], &[(320, 320)]]);
        let cfg = LayoutConfig::default();
        let layout = CanvasLayout::compute(canvas.rows(), &cfg);

        assert_eq!(layout.items.len(), 3);
        let a = layout.items[0].rect;
        let b = layout.items[1].rect;
        let c = layout.items[2].rect;
        assert_eq!(a.min, pos2(48.0, 48.0 + 28.0));
        assert_eq!(b.min.x, a.max.x + cfg.item_gap);
        assert_eq!(b.width(), 640.0);
        assert_eq!(c.min.y, a.max.y + cfg.row_gap + cfg.title_height);
        assert_eq!(layout.items[2].row, 1);
        assert_eq!(layout.content_size.x, b.max.x + cfg.content_padding);
    }

    #[test]
    fn rendered_rect_scales_with_zoom() {
        let canvas = canvas_with(&[&[(320, 320)]]);
        let layout = CanvasLayout::compute(canvas.rows(), &LayoutConfig::default());
        let content = layout.content_rect(layout.items[0].id).unwrap();
        let rendered = scale_rect(content, 0.5);
        assert_eq!(rendered.min, pos2(content.min.x * 0.5, content.min.y * 0.5));
        assert_eq!(rendered.width(), content.width() * 0.5);
    }

    #[test]
    fn marquee_hits_are_row_major() {
        let canvas = canvas_with(&[&[(320, 320), (320, 320)], &[(320, 320)]]);
        let layout = CanvasLayout::compute(canvas.rows(), &LayoutConfig::default());
        let everything = Rect::from_min_max(pos2(0.0, 0.0), pos2(5000.0, 5000.0));
        assert_eq!(layout.items_intersecting(everything), canvas.order());
        let nothing = Rect::from_min_max(pos2(0.0, 0.0), pos2(10.0, 10.0));
        assert!(layout.items_intersecting(nothing).is_empty());
    }
}
