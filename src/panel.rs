use std::sync::mpsc::Sender;

use crate::signal::{Signal, SignalId};
use crate::theme::{Theme, ThemeNode};
use crate::types::{Event, Side};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanelNotify {
    Position,
    Size,
    Style,
}

/// Host panel model: geometry in device pixels, the active theme, display
/// scale, the style pseudo-class and the attached corner children.
pub struct Panel {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    scale: f64,
    theme: Option<Theme>,
    pseudo_class: String,
    children: Vec<Side>,
    notify: Signal<PanelNotify>,
}

impl Default for Panel {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            scale: 1.0,
            theme: None,
            pseudo_class: String::new(),
            children: Vec::new(),
            notify: Signal::default(),
        }
    }
}

impl Panel {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            ..Panel::default()
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale
    }

    pub fn pseudo_class(&self) -> &str {
        &self.pseudo_class
    }

    pub fn theme_node(&self) -> Option<&dyn ThemeNode> {
        self.theme.as_ref().map(|theme| theme as &dyn ThemeNode)
    }

    pub fn set_size(&mut self, width: f64, height: f64) {
        if self.width == width && self.height == height {
            return;
        }
        self.width = width;
        self.height = height;
        self.notify.emit(&PanelNotify::Size);
    }

    pub fn set_position(&mut self, x: f64, y: f64) {
        if self.x == x && self.y == y {
            return;
        }
        self.x = x;
        self.y = y;
        self.notify.emit(&PanelNotify::Position);
    }

    pub fn set_scale_factor(&mut self, scale: f64) {
        if self.scale == scale || !scale.is_finite() || scale <= 0.0 {
            return;
        }
        self.scale = scale;
        self.notify.emit(&PanelNotify::Style);
    }

    pub fn set_theme(&mut self, theme: Option<Theme>) {
        self.theme = theme;
        self.notify.emit(&PanelNotify::Style);
    }

    pub fn add_pseudo_class(&mut self, class: &str) {
        if self.has_pseudo_class(class) {
            return;
        }
        if !self.pseudo_class.is_empty() {
            self.pseudo_class.push(' ');
        }
        self.pseudo_class.push_str(class);
        self.notify.emit(&PanelNotify::Style);
    }

    pub fn remove_pseudo_class(&mut self, class: &str) {
        if !self.has_pseudo_class(class) {
            return;
        }
        self.pseudo_class = self
            .pseudo_class
            .split_whitespace()
            .filter(|existing| *existing != class)
            .collect::<Vec<_>>()
            .join(" ");
        self.notify.emit(&PanelNotify::Style);
    }

    pub fn has_pseudo_class(&self, class: &str) -> bool {
        self.pseudo_class.split_whitespace().any(|existing| existing == class)
    }

    pub fn add_child(&mut self, side: Side) {
        if !self.children.contains(&side) {
            self.children.push(side);
        }
    }

    pub fn remove_child(&mut self, side: Side) {
        self.children.retain(|child| *child != side);
    }

    #[cfg(test)]
    pub fn has_child(&self, side: Side) -> bool {
        self.children.contains(&side)
    }

    #[cfg(test)]
    pub fn children(&self) -> &[Side] {
        &self.children
    }

    pub fn connect(&mut self, what: PanelNotify, tx: Sender<Event>, event: Event) -> SignalId {
        self.notify.connect(what, tx, event)
    }

    pub fn disconnect(&mut self, id: SignalId) -> bool {
        self.notify.disconnect(id)
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.notify.len()
    }
}
