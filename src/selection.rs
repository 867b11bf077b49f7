use crate::ids::ImageId;
use crate::layout::CanvasLayout;
use crate::viewport::Viewport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionKind {
    Empty,
    Single,
    Multi,
}

/// Viewport work a selection change asks for. The controller applies it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionEffect {
    None,
    SnapTo(ImageId),
    FitSelection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

/// Empirically tuned thresholds; kept as plain settings rather than derived.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionConfig {
    /// A marquee drag must exceed this many viewport pixels on both axes.
    pub marquee_threshold: f32,
    pub focus_threshold_min: f32,
    pub focus_threshold_per_zoom: f32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            marquee_threshold: 5.0,
            focus_threshold_min: 50.0,
            focus_threshold_per_zoom: 150.0,
        }
    }
}

impl SelectionConfig {
    /// Maximum horizontal distance (viewport pixels) for focus tracking to
    /// move the selection.
    pub fn focus_threshold(&self, zoom: f32) -> f32 {
        self.focus_threshold_min
            .max(self.focus_threshold_per_zoom * zoom)
    }
}

/// Ordered selection set. The last inserted id is the primary selection.
///
/// Every operation is total: ids missing from the current image order are
/// filtered out instead of reported.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    ids: Vec<ImageId>,
    anchor: Option<ImageId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[ImageId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.ids.contains(&id)
    }

    pub fn primary(&self) -> Option<ImageId> {
        self.ids.last().copied()
    }

    /// Everything except the primary selection, in insertion order.
    pub fn secondary(&self) -> &[ImageId] {
        match self.ids.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// The single selected id, if exactly one is selected.
    pub fn single(&self) -> Option<ImageId> {
        match self.ids.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn anchor(&self) -> Option<ImageId> {
        self.anchor
    }

    pub fn kind(&self) -> SelectionKind {
        match self.ids.len() {
            0 => SelectionKind::Empty,
            1 => SelectionKind::Single,
            _ => SelectionKind::Multi,
        }
    }

    fn settle(&self, before: &[ImageId]) -> SelectionEffect {
        if self.ids.len() > 1 && self.ids != before {
            SelectionEffect::FitSelection
        } else {
            SelectionEffect::None
        }
    }

    // ------------------------------------------------------------------
    // Pointer operations
    // ------------------------------------------------------------------

    /// Plain click: replace the selection with `id` and snap to it.
    pub fn click(&mut self, id: ImageId, order: &[ImageId]) -> SelectionEffect {
        if !order.contains(&id) {
            return SelectionEffect::None;
        }
        self.ids = vec![id];
        self.anchor = Some(id);
        SelectionEffect::SnapTo(id)
    }

    /// Shift-click: union the row-major range between the anchor and `id`
    /// into the selection. `id` ends up primary; the anchor stays put.
    pub fn shift_click(&mut self, id: ImageId, order: &[ImageId]) -> SelectionEffect {
        let Some(target) = order.iter().position(|x| *x == id) else {
            return SelectionEffect::None;
        };
        let Some(start) = self
            .anchor
            .and_then(|a| order.iter().position(|x| *x == a))
        else {
            return self.click(id, order);
        };

        let before = self.ids.clone();
        let range: Vec<ImageId> = if start <= target {
            order[start..=target].to_vec()
        } else {
            order[target..=start].iter().rev().copied().collect()
        };
        for item in range {
            if !self.ids.contains(&item) {
                self.ids.push(item);
            }
        }
        self.ids.retain(|x| *x != id);
        self.ids.push(id);
        self.settle(&before)
    }

    /// Cmd/Ctrl-click: toggle membership of `id`; it becomes the anchor.
    pub fn toggle(&mut self, id: ImageId, order: &[ImageId]) -> SelectionEffect {
        if !order.contains(&id) {
            return SelectionEffect::None;
        }
        let before = self.ids.clone();
        if self.ids.contains(&id) {
            self.ids.retain(|x| *x != id);
        } else {
            self.ids.push(id);
        }
        self.anchor = Some(id);
        self.settle(&before)
    }

    /// Replace the selection wholesale (uploads, marquee, select-all).
    pub fn select_multiple(&mut self, ids: &[ImageId], order: &[ImageId]) -> SelectionEffect {
        let before = self.ids.clone();
        self.ids.clear();
        for id in ids {
            if order.contains(id) && !self.ids.contains(id) {
                self.ids.push(*id);
            }
        }
        self.anchor = self.ids.first().copied();
        match self.single() {
            Some(only) => SelectionEffect::SnapTo(only),
            None => self.settle(&before),
        }
    }

    pub fn select_all(&mut self, order: &[ImageId]) -> SelectionEffect {
        self.select_multiple(order, order)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.anchor = None;
    }

    /// Focus-tracking update: select `id` without asking for any scroll.
    pub fn focus_silently(&mut self, id: ImageId) {
        self.ids = vec![id];
        self.anchor = Some(id);
    }

    // ------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------

    /// Drop a (deleted) id. Returns whether it was selected.
    pub fn remove(&mut self, id: ImageId) -> bool {
        let was_selected = self.ids.contains(&id);
        self.ids.retain(|x| *x != id);
        if self.anchor == Some(id) {
            self.anchor = self.primary();
        }
        was_selected
    }

    /// Drop every id that is no longer on the canvas.
    pub fn prune(&mut self, order: &[ImageId]) {
        self.ids.retain(|x| order.contains(x));
        if self.anchor.is_some_and(|a| !order.contains(&a)) {
            self.anchor = self.primary();
        }
    }

    // ------------------------------------------------------------------
    // Keyboard navigation
    // ------------------------------------------------------------------

    /// Move a single-item cursor one step.
    ///
    /// Starting point, first match wins: `explicit`, then `centered` (the item
    /// nearest the viewport centre), then the primary selection. Falls back to
    /// the first image when none of those exist.
    pub fn navigate(
        &mut self,
        direction: Direction,
        explicit: Option<ImageId>,
        centered: Option<ImageId>,
        grid: &[Vec<ImageId>],
    ) -> SelectionEffect {
        let order: Vec<ImageId> = grid.iter().flatten().copied().collect();
        if order.is_empty() {
            return SelectionEffect::None;
        }
        let from = [explicit, centered, self.primary()]
            .into_iter()
            .flatten()
            .find(|id| order.contains(id));
        let Some(from) = from else {
            return self.click(order[0], &order);
        };

        let target = match direction {
            Direction::Left | Direction::Right => {
                let idx = order.iter().position(|x| *x == from).unwrap_or(0);
                let next = if direction == Direction::Left {
                    idx.saturating_sub(1)
                } else {
                    (idx + 1).min(order.len() - 1)
                };
                order[next]
            }
            Direction::Up | Direction::Down => {
                let Some((row, col)) = grid.iter().enumerate().find_map(|(ri, r)| {
                    r.iter().position(|x| *x == from).map(|ci| (ri, ci))
                }) else {
                    return SelectionEffect::None;
                };
                let next_row = if direction == Direction::Up {
                    row.saturating_sub(1)
                } else {
                    (row + 1).min(grid.len() - 1)
                };
                match grid[next_row].get(col).or_else(|| grid[next_row].last()) {
                    Some(id) => *id,
                    None => return SelectionEffect::None,
                }
            }
        };
        self.click(target, &order)
    }
}

// ============================================================================
// Viewport-centre queries
// ============================================================================

/// Item nearest the viewport centre: closest row vertically, then closest item
/// in that row horizontally. Returns the id and its horizontal distance from
/// the centre in viewport pixels.
pub fn centered_item(layout: &CanvasLayout, viewport: &Viewport) -> Option<(ImageId, f32)> {
    let center = viewport.center_content();
    let row = layout
        .rows
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (a.band.center().y - center.y).abs();
            let db = (b.band.center().y - center.y).abs();
            da.total_cmp(&db)
        })
        .map(|(i, _)| i)?;

    layout
        .row_items(row)
        .map(|it| (it.id, (it.rect.center().x - center.x).abs() * viewport.zoom()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ImageId> {
        (0..n).map(|_| ImageId::new()).collect()
    }

    #[test]
    fn click_replaces_and_snaps() {
        let order = ids(4);
        let mut sel = Selection::new();
        sel.toggle(order[0], &order);
        sel.toggle(order[1], &order);
        assert_eq!(sel.click(order[2], &order), SelectionEffect::SnapTo(order[2]));
        assert_eq!(sel.ids(), &[order[2]]);
        assert_eq!(sel.kind(), SelectionKind::Single);
    }

    #[test]
    fn stale_ids_are_ignored() {
        let order = ids(2);
        let ghost = ImageId::new();
        let mut sel = Selection::new();
        assert_eq!(sel.click(ghost, &order), SelectionEffect::None);
        assert_eq!(sel.toggle(ghost, &order), SelectionEffect::None);
        assert_eq!(sel.shift_click(ghost, &order), SelectionEffect::None);
        sel.select_multiple(&[ghost, order[1]], &order);
        assert_eq!(sel.ids(), &[order[1]]);
    }

    #[test]
    fn shift_click_selects_closed_interval_plus_existing() {
        let order = ids(8);
        for (i, j) in [(1usize, 5usize), (6, 2), (3, 3)] {
            let mut sel = Selection::new();
            sel.toggle(order[7], &order);
            sel.toggle(order[i], &order);
            let mut before: Vec<ImageId> = sel.ids().to_vec();
            sel.shift_click(order[j], &order);

            before.extend_from_slice(&order[i.min(j)..=i.max(j)]);
            let mut expected = before;
            expected.sort();
            expected.dedup();
            let mut got = sel.ids().to_vec();
            got.sort();
            assert_eq!(got, expected);
            assert_eq!(sel.primary(), Some(order[j]));
            assert_eq!(sel.anchor(), Some(order[i]));
        }
    }

    #[test]
    fn shift_click_without_anchor_is_plain_click() {
        let order = ids(3);
        let mut sel = Selection::new();
        assert_eq!(sel.shift_click(order[1], &order), SelectionEffect::SnapTo(order[1]));
        assert_eq!(sel.ids(), &[order[1]]);
    }

    #[test]
    fn growing_past_one_requests_fit() {
        let order = ids(3);
        let mut sel = Selection::new();
        sel.click(order[0], &order);
        assert_eq!(sel.toggle(order[1], &order), SelectionEffect::FitSelection);
        assert_eq!(sel.toggle(order[1], &order), SelectionEffect::None);
        assert_eq!(sel.select_all(&order), SelectionEffect::FitSelection);
        assert_eq!(sel.select_all(&order), SelectionEffect::None);
        assert_eq!(sel.ids(), order.as_slice());
    }

    #[test]
    fn primary_and_secondary() {
        let order = ids(3);
        let mut sel = Selection::new();
        assert_eq!(sel.secondary(), &[] as &[ImageId]);
        sel.toggle(order[2], &order);
        sel.toggle(order[0], &order);
        assert_eq!(sel.primary(), Some(order[0]));
        assert_eq!(sel.secondary(), &[order[2]]);
    }

    #[test]
    fn removal_prunes_and_moves_anchor() {
        let order = ids(3);
        let mut sel = Selection::new();
        sel.select_all(&order);
        sel.toggle(order[1], &order);
        sel.toggle(order[1], &order);
        assert_eq!(sel.anchor(), Some(order[1]));
        assert!(sel.remove(order[1]));
        assert!(!sel.contains(order[1]));
        assert_eq!(sel.anchor(), sel.primary());
        assert!(!sel.remove(order[1]));

        sel.prune(&order[..1]);
        assert_eq!(sel.ids(), &[order[0]]);
    }

    #[test]
    fn horizontal_navigation_clamps() {
        let grid = vec![ids(2), ids(2)];
        let flat: Vec<ImageId> = grid.iter().flatten().copied().collect();
        let mut sel = Selection::new();
        sel.click(flat[1], &flat);
        assert_eq!(
            sel.navigate(Direction::Right, None, None, &grid),
            SelectionEffect::SnapTo(flat[2])
        );
        sel.click(flat[3], &flat);
        sel.navigate(Direction::Right, None, None, &grid);
        assert_eq!(sel.ids(), &[flat[3]]);
        sel.click(flat[0], &flat);
        sel.navigate(Direction::Left, None, None, &grid);
        assert_eq!(sel.ids(), &[flat[0]]);
    }

    #[test]
    fn navigation_anchor_priority() {
        let grid = vec![ids(5)];
        let row = &grid[0];
        let mut sel = Selection::new();
        sel.click(row[0], row);

        sel.navigate(Direction::Right, None, Some(row[3]), &grid);
        assert_eq!(sel.ids(), &[row[4]]);

        sel.navigate(Direction::Left, Some(row[2]), Some(row[3]), &grid);
        assert_eq!(sel.ids(), &[row[1]]);

        sel.navigate(Direction::Right, None, Some(ImageId::new()), &grid);
        assert_eq!(sel.ids(), &[row[2]]);
    }

    #[test]
    fn vertical_navigation_keeps_column() {
        let grid = vec![ids(4), ids(2), ids(3)];
        let flat: Vec<ImageId> = grid.iter().flatten().copied().collect();
        let mut sel = Selection::new();
        sel.click(grid[0][3], &flat);

        sel.navigate(Direction::Down, None, None, &grid);
        assert_eq!(sel.ids(), &[grid[1][1]]);
        sel.navigate(Direction::Down, None, None, &grid);
        assert_eq!(sel.ids(), &[grid[2][1]]);
        sel.navigate(Direction::Down, None, None, &grid);
        assert_eq!(sel.ids(), &[grid[2][1]]);
        sel.navigate(Direction::Up, Some(grid[2][2]), None, &grid);
        assert_eq!(sel.ids(), &[grid[1][1]]);
    }

    #[test]
    fn focus_threshold_scales_with_zoom() {
        let cfg = SelectionConfig::default();
        assert_eq!(cfg.focus_threshold(0.1), 50.0);
        assert_eq!(cfg.focus_threshold(2.0), 300.0);
    }
}
