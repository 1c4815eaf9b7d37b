//! Lifecycle of the two panel corners.
//!
//! Settings edits are coalesced through the debouncer before the corners are
//! restyled; panel style changes restyle the affected corner right away.

use std::{
    sync::mpsc::{self, Receiver, Sender},
    time::{Duration, Instant},
};

use log::debug;
use tiny_skia::Pixmap;

use crate::config::FRAME_MS;
use crate::corner::{CornerElement, Decoration};
use crate::debounce::Debouncer;
use crate::panel::Panel;
use crate::settings::{KEYS, Settings};
use crate::signal::SignalId;
use crate::types::{Event, Side};

/// Settings-change subscriptions owned by the controller, torn down as a
/// unit.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Vec<(String, SignalId)>,
}

impl ConnectionRegistry {
    pub fn connect(&mut self, settings: &mut Settings, key: &str, tx: &Sender<Event>) {
        let id = settings.connect_changed(key, tx.clone());
        self.connections.push((key.to_string(), id));
    }

    pub fn disconnect_all(&mut self, settings: &mut Settings) {
        for (key, id) in self.connections.drain(..) {
            if !settings.disconnect(id) {
                debug!("subscription to '{key}' was already gone");
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

pub struct CornersController {
    tx: Sender<Event>,
    rx: Receiver<Event>,
    connections: ConnectionRegistry,
    debounce: Debouncer,
    corners: Vec<CornerElement>,
}

impl CornersController {
    pub fn new(debounce_delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            connections: ConnectionRegistry::default(),
            debounce: Debouncer::new(debounce_delay),
            corners: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        !self.corners.is_empty()
    }

    #[cfg(test)]
    pub fn corners(&self) -> &[CornerElement] {
        &self.corners
    }

    pub fn corner(&self, side: Side) -> Option<&CornerElement> {
        self.corners.iter().find(|corner| corner.side() == side)
    }

    fn corner_mut(&mut self, side: Side) -> Option<&mut CornerElement> {
        self.corners.iter_mut().find(|corner| corner.side() == side)
    }

    #[cfg(test)]
    pub fn has_pending_refresh(&self) -> bool {
        self.debounce.is_pending()
    }

    #[cfg(test)]
    pub fn subscriptions(&self) -> usize {
        self.connections.len()
    }

    /// Tears down whatever exists and builds fresh left and right corners.
    pub fn update(&mut self, settings: &mut Settings, panel: &mut Panel, now: Instant) {
        self.remove(settings, panel);

        for side in Side::ALL {
            let mut corner = CornerElement::new(side, panel, &self.tx);
            corner.bind_style(panel, &self.tx);
            corner.attach(panel);
            corner.on_style_changed(settings, panel, now);
            self.corners.push(corner);
        }
        for key in KEYS {
            self.connections.connect(settings, key, &self.tx);
        }
        debug!("corners created");
    }

    /// Cancels the pending refresh, drops every subscription and destroys the
    /// corners. Does nothing when there are no corners.
    pub fn remove(&mut self, settings: &mut Settings, panel: &mut Panel) {
        self.debounce.cancel();
        self.connections.disconnect_all(settings);
        let had_corners = !self.corners.is_empty();
        for mut corner in self.corners.drain(..) {
            corner.detach(panel);
        }
        while self.rx.try_recv().is_ok() {}
        if had_corners {
            debug!("corners removed");
        }
    }

    /// Drains queued notifications. Returns true when a corner changed.
    pub fn process_events(&mut self, settings: &mut Settings, panel: &Panel, now: Instant) -> bool {
        let mut changed = false;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Event::SettingChanged(key) => {
                    debug!("setting '{key}' changed, refresh scheduled");
                    self.debounce.schedule(now);
                }
                Event::PanelMoved(side) | Event::PanelResized(side) => {
                    if let Some(corner) = self.corner_mut(side) {
                        corner.update_allocation(settings, panel);
                        changed = true;
                    }
                }
                Event::StyleChanged(side) => {
                    if let Some(corner) = self.corner_mut(side) {
                        corner.on_style_changed(settings, panel, now);
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    /// Fires the debounced refresh when due and advances opacity transitions.
    /// Returns true when a corner needs repainting.
    pub fn tick(&mut self, settings: &mut Settings, panel: &Panel, now: Instant) -> bool {
        let mut changed = false;
        if self.debounce.poll(now) {
            debug!("refreshing corners after settings change");
            // on_style_changed clears the cache first.
            for corner in &mut self.corners {
                corner.on_style_changed(settings, panel, now);
            }
            changed = true;
        }
        for corner in &mut self.corners {
            changed |= corner.advance(now);
        }
        changed
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        let frame = self
            .corners
            .iter()
            .any(CornerElement::is_animating)
            .then(|| now + Duration::from_millis(FRAME_MS));
        match (self.debounce.deadline(), frame) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn repaint(&mut self, side: Side, settings: &mut Settings, panel: &Panel) -> Option<Pixmap> {
        self.corner_mut(side)?.on_repaint(settings, panel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ANIMATION_TIME_MS;
    use crate::corner::RADIUS_PROPERTY;
    use crate::settings::{CORNER_OPACITY, CORNER_RADIUS, SettingValue};
    use crate::theme::{Theme, ThemeValue};
    use crate::types::ChildBox;

    const DELAY: Duration = Duration::from_millis(100);

    fn setup() -> (CornersController, Settings, Panel) {
        let mut settings = Settings::default();
        settings.set(CORNER_RADIUS, SettingValue::Double(10.0)).unwrap();
        (
            CornersController::new(DELAY),
            settings,
            Panel::new(1000.0, 40.0),
        )
    }

    fn generations(controller: &CornersController) -> Vec<u64> {
        controller
            .corners()
            .iter()
            .map(|corner| corner.cache().generation())
            .collect()
    }

    #[test]
    fn remove_without_update_is_noop() {
        let (mut controller, mut settings, mut panel) = setup();
        controller.remove(&mut settings, &mut panel);
        controller.remove(&mut settings, &mut panel);
        assert!(!controller.is_active());
        assert_eq!(settings.listener_count(), 0);
        assert_eq!(panel.listener_count(), 0);
    }

    #[test]
    fn update_then_double_remove_leaves_nothing_behind() {
        let (mut controller, mut settings, mut panel) = setup();
        controller.update(&mut settings, &mut panel, Instant::now());
        assert!(controller.is_active());
        assert_eq!(panel.children(), &[Side::Left, Side::Right]);
        assert_eq!(settings.listener_count(), KEYS.len());
        assert_eq!(panel.listener_count(), 6);

        controller.remove(&mut settings, &mut panel);
        controller.remove(&mut settings, &mut panel);
        assert!(!controller.is_active());
        assert!(panel.children().is_empty());
        assert_eq!(settings.listener_count(), 0);
        assert_eq!(panel.listener_count(), 0);
    }

    #[test]
    fn repeated_update_does_not_leak() {
        let (mut controller, mut settings, mut panel) = setup();
        let now = Instant::now();
        controller.update(&mut settings, &mut panel, now);
        settings.set(CORNER_OPACITY, SettingValue::Double(0.3)).unwrap();
        controller.process_events(&mut settings, &panel, now);
        assert!(controller.has_pending_refresh());

        controller.update(&mut settings, &mut panel, now);
        assert!(!controller.has_pending_refresh());
        assert_eq!(controller.subscriptions(), KEYS.len());
        assert_eq!(settings.listener_count(), KEYS.len());
        assert_eq!(panel.listener_count(), 6);
        assert_eq!(controller.corners().len(), 2);
    }

    #[test]
    fn settings_burst_refreshes_once() {
        let (mut controller, mut settings, mut panel) = setup();
        let start = Instant::now();
        controller.update(&mut settings, &mut panel, start);
        let before = generations(&controller);

        for step in 0..5u32 {
            let at = start + Duration::from_millis(10) * step;
            settings
                .set(CORNER_RADIUS, SettingValue::Double(11.0 + f64::from(step)))
                .unwrap();
            controller.process_events(&mut settings, &panel, at);
            controller.tick(&mut settings, &panel, at);
        }
        assert_eq!(generations(&controller), before);

        let fire_at = start + Duration::from_millis(40) + DELAY;
        assert!(controller.tick(&mut settings, &panel, fire_at));
        controller.tick(&mut settings, &panel, fire_at + DELAY);

        let after = generations(&controller);
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(a - b, 1);
        }
        assert_eq!(
            controller.corner(Side::Left).unwrap().fixed_size().0,
            15.0
        );
    }

    #[test]
    fn style_change_applies_without_waiting_for_debounce() {
        let (mut controller, mut settings, mut panel) = setup();
        let now = Instant::now();
        controller.update(&mut settings, &mut panel, now);
        settings.set(CORNER_OPACITY, SettingValue::Double(0.5)).unwrap();
        controller.process_events(&mut settings, &panel, now);
        let before = generations(&controller);

        panel.set_theme(Some(
            Theme::default().with_property(RADIUS_PROPERTY, ThemeValue::Number(24.0)),
        ));
        assert!(controller.process_events(&mut settings, &panel, now));

        let after = generations(&controller);
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(a - b, 1);
        }
        assert!(controller.has_pending_refresh());
        assert_eq!(controller.corner(Side::Right).unwrap().fixed_size().0, 24.0);
    }

    #[test]
    fn panel_resize_moves_right_corner() {
        let (mut controller, mut settings, mut panel) = setup();
        let now = Instant::now();
        controller.update(&mut settings, &mut panel, now);

        panel.set_size(1200.0, 30.0);
        assert!(controller.process_events(&mut settings, &panel, now));
        assert_eq!(
            controller.corner(Side::Right).unwrap().child_box(),
            ChildBox { x1: 1190.0, y1: 30.0, x2: 1200.0, y2: 40.0 }
        );
    }

    #[test]
    fn removal_silences_late_notifications() {
        let (mut controller, mut settings, mut panel) = setup();
        let now = Instant::now();
        controller.update(&mut settings, &mut panel, now);
        settings.set(CORNER_OPACITY, SettingValue::Double(0.2)).unwrap();
        panel.set_size(800.0, 40.0);

        controller.remove(&mut settings, &mut panel);
        settings.set(CORNER_OPACITY, SettingValue::Double(0.7)).unwrap();
        panel.set_theme(None);

        assert!(!controller.process_events(&mut settings, &panel, now));
        assert!(!controller.tick(&mut settings, &panel, now + DELAY * 2));
        assert!(!controller.has_pending_refresh());
    }

    #[test]
    fn deadline_tracks_animation_and_debounce() {
        let (mut controller, mut settings, mut panel) = setup();
        let now = Instant::now();
        assert_eq!(controller.next_deadline(now), None);

        controller.update(&mut settings, &mut panel, now);
        assert_eq!(
            controller.next_deadline(now),
            Some(now + Duration::from_millis(FRAME_MS))
        );

        let settled = now + Duration::from_millis(ANIMATION_TIME_MS);
        controller.tick(&mut settings, &panel, settled);
        assert_eq!(controller.next_deadline(settled), None);

        settings.set(CORNER_OPACITY, SettingValue::Double(0.4)).unwrap();
        controller.process_events(&mut settings, &panel, settled);
        assert_eq!(controller.next_deadline(settled), Some(settled + DELAY));
    }

    #[test]
    fn repaint_uses_resolved_radius() {
        let (mut controller, mut settings, mut panel) = setup();
        controller.update(&mut settings, &mut panel, Instant::now());
        let pixmap = controller
            .repaint(Side::Left, &mut settings, &panel)
            .unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (10, 10));
    }
}
