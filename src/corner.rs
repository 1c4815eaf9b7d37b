//! One rounded corner hanging below the panel.
//!
//! Geometry and paint parameters are resolved lazily through the theme
//! lookup and cached until the next invalidation. The style-changed hook is
//! the only place that refreshes size, allocation and opacity; repaint reuses
//! whatever the cache holds.

use std::{
    sync::mpsc::Sender,
    time::{Duration, Instant},
};

use log::debug;
use tiny_skia::{BlendMode, FillRule, Paint, Path, PathBuilder, Pixmap, Transform};

use crate::animation::Transition;
use crate::config::ANIMATION_TIME_MS;
use crate::lookup::{lookup_color, lookup_double, lookup_length};
use crate::panel::{Panel, PanelNotify};
use crate::settings::Settings;
use crate::signal::SignalId;
use crate::theme::ThemeNode;
use crate::types::{ChildBox, Event, Rgba, Side};

pub const RADIUS_PROPERTY: &str = "-panel-corner-radius";
pub const BORDER_WIDTH_PROPERTY: &str = "-panel-corner-border-width";
pub const BACKGROUND_COLOR_PROPERTY: &str = "-panel-corner-background-color";
pub const OPACITY_PROPERTY: &str = "-panel-corner-opacity";

const OVERVIEW_CLASS: &str = "overview";
const FULL_OPACITY: f64 = 255.0;

/// Cubic control point distance for a quarter circle of radius 1.
const ARC_KAPPA: f32 = 0.552_284_8;

/// Hooks the host invokes on a decoration.
pub trait Decoration {
    /// Renders the decoration at its current size, or `None` when there is
    /// nothing to draw.
    fn on_repaint(&mut self, settings: &mut Settings, panel: &Panel) -> Option<Pixmap>;

    fn on_style_changed(&mut self, settings: &mut Settings, panel: &Panel, now: Instant);
}

/// Either every field is filled from the current theme and settings, or a
/// field is empty and must be looked up again.
#[derive(Clone, Debug, Default)]
pub struct CachedGeometry {
    pub radius: Option<f64>,
    pub border_width: Option<f64>,
    pub background_color: Option<Rgba>,
    pub opacity: Option<f64>,
    generation: u64,
}

impl CachedGeometry {
    pub fn invalidate(&mut self) {
        self.radius = None;
        self.border_width = None;
        self.background_color = None;
        self.opacity = None;
        self.generation += 1;
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.radius.is_none()
            && self.border_width.is_none()
            && self.background_color.is_none()
            && self.opacity.is_none()
    }

    /// Number of invalidations so far.
    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct CornerElement {
    side: Side,
    cache: CachedGeometry,
    position_handle: Option<SignalId>,
    size_handle: Option<SignalId>,
    style_binding: Option<SignalId>,
    attached: bool,
    child_box: ChildBox,
    fixed_size: (f64, f64),
    translation_y: f64,
    opacity: f64,
    transition: Option<Transition>,
}

impl CornerElement {
    /// Creates a corner and subscribes it to the panel's position and size
    /// notifications.
    pub fn new(side: Side, panel: &mut Panel, tx: &Sender<Event>) -> Self {
        let position_handle =
            panel.connect(PanelNotify::Position, tx.clone(), Event::PanelMoved(side));
        let size_handle = panel.connect(PanelNotify::Size, tx.clone(), Event::PanelResized(side));
        Self {
            side,
            cache: CachedGeometry::default(),
            position_handle: Some(position_handle),
            size_handle: Some(size_handle),
            style_binding: None,
            attached: false,
            child_box: ChildBox::default(),
            fixed_size: (0.0, 0.0),
            translation_y: 0.0,
            opacity: FULL_OPACITY,
            transition: None,
        }
    }

    /// Follows the panel's style: any panel style change is delivered as a
    /// style-changed event for this corner.
    pub fn bind_style(&mut self, panel: &mut Panel, tx: &Sender<Event>) {
        if let Some(id) = self.style_binding.take() {
            panel.disconnect(id);
        }
        self.style_binding = Some(panel.connect(
            PanelNotify::Style,
            tx.clone(),
            Event::StyleChanged(self.side),
        ));
    }

    pub fn attach(&mut self, panel: &mut Panel) {
        panel.add_child(self.side);
        self.attached = true;
    }

    /// Drops every panel subscription, then leaves the panel.
    pub fn detach(&mut self, panel: &mut Panel) {
        for id in [
            self.position_handle.take(),
            self.size_handle.take(),
            self.style_binding.take(),
        ]
        .into_iter()
        .flatten()
        {
            panel.disconnect(id);
        }
        panel.remove_child(self.side);
        self.attached = false;
        self.transition = None;
    }

    pub fn side(&self) -> Side {
        self.side
    }

    #[cfg(test)]
    pub fn cache(&self) -> &CachedGeometry {
        &self.cache
    }

    pub fn child_box(&self) -> ChildBox {
        self.child_box
    }

    pub fn fixed_size(&self) -> (f64, f64) {
        self.fixed_size
    }

    pub fn translation_y(&self) -> f64 {
        self.translation_y
    }

    /// Current opacity in [0, 255].
    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    #[cfg(test)]
    pub fn target_opacity(&self) -> f64 {
        self.transition
            .map(|transition| transition.target())
            .unwrap_or(self.opacity)
    }

    pub fn is_animating(&self) -> bool {
        self.transition.is_some()
    }

    fn node<'a>(&self, panel: &'a Panel) -> Option<&'a dyn ThemeNode> {
        if self.attached { panel.theme_node() } else { None }
    }

    pub fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }

    /// Lengths are snapped to whole device pixels so the painted edge is
    /// flush with the pixmap border.
    pub fn radius(&mut self, node: Option<&dyn ThemeNode>, settings: &Settings, scale: f64) -> f64 {
        if let Some(radius) = self.cache.radius {
            return radius;
        }
        let radius = lookup_length(node, RADIUS_PROPERTY, settings, scale).round();
        self.cache.radius = Some(radius);
        radius
    }

    pub fn border_width(
        &mut self,
        node: Option<&dyn ThemeNode>,
        settings: &Settings,
        scale: f64,
    ) -> f64 {
        if let Some(width) = self.cache.border_width {
            return width;
        }
        let width = lookup_length(node, BORDER_WIDTH_PROPERTY, settings, scale).round();
        self.cache.border_width = Some(width);
        width
    }

    pub fn background_color(&mut self, node: Option<&dyn ThemeNode>, settings: &mut Settings) -> Rgba {
        if let Some(color) = self.cache.background_color {
            return color;
        }
        let color = lookup_color(node, BACKGROUND_COLOR_PROPERTY, settings);
        self.cache.background_color = Some(color);
        color
    }

    pub fn opacity_value(&mut self, node: Option<&dyn ThemeNode>, settings: &Settings) -> f64 {
        if let Some(opacity) = self.cache.opacity {
            return opacity;
        }
        let opacity = lookup_double(node, OPACITY_PROPERTY, settings).clamp(0.0, 1.0);
        self.cache.opacity = Some(opacity);
        opacity
    }

    /// Allocation footprint: the arc spans `radius` in both directions.
    pub fn preferred_size(&mut self, settings: &Settings, panel: &Panel) -> (f64, f64) {
        let node = self.node(panel);
        let radius = self.radius(node, settings, panel.scale_factor());
        (radius, radius)
    }

    pub fn update_allocation(&mut self, settings: &Settings, panel: &Panel) {
        let (corner_width, corner_height) = self.preferred_size(settings, panel);
        let (x1, x2) = match self.side {
            Side::Left => (0.0, corner_width),
            Side::Right => (panel.width() - corner_width, panel.width()),
        };
        self.child_box = ChildBox {
            x1,
            y1: panel.height(),
            x2,
            y2: panel.height() + corner_height,
        };
    }

    /// Advances the opacity transition. Returns true when the opacity moved.
    pub fn advance(&mut self, now: Instant) -> bool {
        let Some(transition) = self.transition else {
            return false;
        };
        let previous = self.opacity;
        self.opacity = transition.value_at(now);
        if transition.is_finished(now) {
            self.transition = None;
        }
        self.opacity != previous
    }
}

impl Decoration for CornerElement {
    fn on_repaint(&mut self, settings: &mut Settings, panel: &Panel) -> Option<Pixmap> {
        let node = self.node(panel);
        let scale = panel.scale_factor();
        let radius = self.radius(node, settings, scale);
        let border_width = self.border_width(node, settings, scale);
        let color = self.background_color(node, settings);

        let mut pixmap = Pixmap::new(radius as u32, (border_width + radius) as u32)?;
        let path = corner_path(self.side, radius as f32, border_width as f32)?;
        let mut paint = Paint::default();
        paint.set_color(color.to_skia());
        paint.anti_alias = true;
        paint.blend_mode = BlendMode::Source;
        pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        Some(pixmap)
    }

    fn on_style_changed(&mut self, settings: &mut Settings, panel: &Panel, now: Instant) {
        self.invalidate_cache();

        let node = self.node(panel);
        let scale = panel.scale_factor();
        let radius = self.radius(node, settings, scale);
        let border_width = self.border_width(node, settings, scale);
        let mut opacity = self.opacity_value(node, settings);
        if settings.force_extension_values() && panel.pseudo_class().contains(OVERVIEW_CLASS) {
            opacity = 0.0;
        }

        self.update_allocation(settings, panel);
        self.fixed_size = (radius, border_width + radius);
        self.translation_y = -border_width;

        let from = match self.transition.take() {
            Some(running) => running.value_at(now),
            None => self.opacity,
        };
        self.opacity = from;
        self.transition = Some(Transition::new(
            from,
            opacity * FULL_OPACITY,
            now,
            Duration::from_millis(ANIMATION_TIME_MS),
        ));
        debug!(
            "{} corner restyled (generation {}): radius {radius}, border {border_width}, opacity {opacity}",
            self.side.name(),
            self.cache.generation
        );
    }
}

/// Origin, down the outer edge, quarter arc to the panel side, back to the
/// origin. The arc is centred on (r, b + r) for the left corner and on
/// (0, b + r) for the right one.
fn corner_path(side: Side, radius: f32, border_width: f32) -> Option<Path> {
    let r = radius;
    let b = border_width;
    let k = ARC_KAPPA * r;
    let mut pb = PathBuilder::new();
    pb.move_to(0.0, 0.0);
    match side {
        Side::Left => {
            pb.line_to(0.0, b + r);
            pb.cubic_to(0.0, b + r - k, r - k, b, r, b);
            pb.line_to(r, 0.0);
        }
        Side::Right => {
            pb.line_to(0.0, b);
            pb.cubic_to(k, b, r, b + r - k, r, b + r);
            pb.line_to(r, 0.0);
        }
    }
    pb.close();
    pb.finish()
}
