use anyhow::{Context, Result};
use log::{debug, info, warn};
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState, Region},
    delegate_compositor, delegate_layer, delegate_output, delegate_registry, delegate_shm,
    output::{OutputHandler, OutputState},
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    shell::{
        wlr_layer::{
            Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
            LayerSurfaceConfigure,
        },
        WaylandSurface,
    },
    shm::{slot::SlotPool, Shm, ShmHandler},
};
use std::{
    io,
    os::fd::AsRawFd,
    sync::mpsc::Receiver,
    time::{Duration, Instant},
};
use tiny_skia::{BlendMode, Color, PixmapMut, PixmapPaint, Transform};
use wayland_client::{
    globals::registry_queue_init,
    protocol::{wl_output, wl_shm, wl_surface},
    Connection, EventQueue, QueueHandle,
};

use crate::backend::focused_output_info;
use crate::config::{DEBOUNCE_MS, IDLE_WAIT_MS, SETTINGS_POLL_MS};
use crate::controller::CornersController;
use crate::daemon::DaemonMsg;
use crate::logging::apply_debug_flag;
use crate::panel::Panel;
use crate::settings::Settings;
use crate::theme::Theme;
use crate::types::{BackendKind, Side};

const OVERVIEW_CLASS: &str = "overview";

pub struct OverlayOptions {
    pub backend: BackendKind,
    pub panel_height: u32,
    pub settings: Settings,
    pub theme: Option<Theme>,
}

pub fn run_overlay(options: OverlayOptions, commands: Receiver<DaemonMsg>) -> Result<()> {
    let output = focused_output_info(options.backend).unwrap_or_else(|err| {
        warn!("output query failed, waiting for wayland output info: {err:#}");
        Default::default()
    });
    let buffer_scale = output.scale.ceil().max(1.0) as u32;

    let conn = Connection::connect_to_env().context("connect to Wayland")?;
    let (globals, mut event_queue) =
        registry_queue_init::<Overlay>(&conn).context("init registry")?;
    let qh = event_queue.handle();

    let compositor =
        CompositorState::bind(&globals, &qh).context("wl_compositor not available")?;
    let layer_shell = LayerShell::bind(&globals, &qh).context("layer shell not available")?;
    let shm = Shm::bind(&globals, &qh).context("wl_shm not available")?;

    let mut surfaces = Vec::with_capacity(Side::ALL.len());
    for side in Side::ALL {
        let surface = compositor.create_surface(&qh);
        let layer = layer_shell.create_layer_surface(
            &qh,
            surface,
            Layer::Top,
            Some("panel-corners"),
            None,
        );
        let horizontal = match side {
            Side::Left => Anchor::LEFT,
            Side::Right => Anchor::RIGHT,
        };
        layer.set_anchor(Anchor::TOP | horizontal);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.set_exclusive_zone(-1);
        layer.set_size(1, 1);
        let region = Region::new(&compositor).context("create input region")?;
        layer.wl_surface().set_input_region(Some(region.wl_region()));
        if buffer_scale > 1 {
            layer.wl_surface().set_buffer_scale(buffer_scale as i32);
        }
        layer.commit();
        surfaces.push(CornerSurface {
            side,
            layer,
            size: (1, 1),
            margin: (0, 0),
            configured: false,
        });
    }

    let pool = SlotPool::new(4096, &shm).context("create shm pool")?;

    let mut panel = Panel::default();
    panel.set_theme(options.theme);
    let mut app = Overlay {
        registry_state: RegistryState::new(&globals),
        output_state: OutputState::new(&globals, &qh),
        shm,
        pool,
        surfaces,
        controller: CornersController::new(Duration::from_millis(DEBOUNCE_MS)),
        settings: options.settings,
        panel,
        panel_height: options.panel_height,
        buffer_scale,
        output_logical_size: output.logical_size,
        output_logical_position: None,
        exit: false,
        redraw: true,
    };
    app.apply_output_geometry();
    app.controller
        .update(&mut app.settings, &mut app.panel, Instant::now());
    app.sync_surfaces();

    let settings_poll = Duration::from_millis(SETTINGS_POLL_MS);
    let mut next_settings_poll = Instant::now() + settings_poll;
    while !app.exit {
        while let Ok(msg) = commands.try_recv() {
            app.handle_command(msg);
        }

        let now = Instant::now();
        if now >= next_settings_poll {
            next_settings_poll = now + settings_poll;
            match app.settings.reload_if_changed() {
                Ok(true) => info!("settings file reloaded"),
                Ok(false) => {}
                Err(err) => warn!("settings reload failed: {err}"),
            }
        }

        let mut changed = app
            .controller
            .process_events(&mut app.settings, &app.panel, now);
        changed |= app.controller.tick(&mut app.settings, &app.panel, now);
        apply_debug_flag(app.settings.debug());
        if changed {
            app.sync_surfaces();
            app.redraw = true;
        }
        if app.redraw {
            app.draw_all();
        }

        let deadline = app
            .controller
            .next_deadline(now)
            .map_or(next_settings_poll, |deadline| deadline.min(next_settings_poll));
        let timeout = deadline
            .saturating_duration_since(Instant::now())
            .min(Duration::from_millis(IDLE_WAIT_MS));
        wait_for_events(&mut event_queue, &mut app, timeout)?;
    }

    app.controller.remove(&mut app.settings, &mut app.panel);
    Ok(())
}

/// Blocks on the Wayland socket for at most `timeout`, then dispatches.
fn wait_for_events(
    event_queue: &mut EventQueue<Overlay>,
    app: &mut Overlay,
    timeout: Duration,
) -> Result<()> {
    event_queue.flush().context("flush wayland connection")?;
    if let Some(guard) = event_queue.prepare_read() {
        let mut fds = [libc::pollfd {
            fd: guard.connection_fd().as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        // SAFETY: `fds` is a valid array of one pollfd for the whole call.
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout_ms) };
        if ready > 0 {
            guard.read().context("read wayland events")?;
        } else if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err).context("poll wayland socket");
            }
        }
    }
    event_queue
        .dispatch_pending(app)
        .context("dispatch events")?;
    Ok(())
}

struct CornerSurface {
    side: Side,
    layer: LayerSurface,
    size: (u32, u32),
    margin: (i32, i32),
    configured: bool,
}

struct Overlay {
    registry_state: RegistryState,
    output_state: OutputState,
    shm: Shm,
    pool: SlotPool,
    surfaces: Vec<CornerSurface>,
    controller: CornersController,
    settings: Settings,
    panel: Panel,
    panel_height: u32,
    buffer_scale: u32,
    output_logical_size: Option<(i32, i32)>,
    output_logical_position: Option<(i32, i32)>,
    exit: bool,
    redraw: bool,
}

impl Overlay {
    fn handle_command(&mut self, msg: DaemonMsg) {
        match msg {
            DaemonMsg::Overview(true) => self.panel.add_pseudo_class(OVERVIEW_CLASS),
            DaemonMsg::Overview(false) => self.panel.remove_pseudo_class(OVERVIEW_CLASS),
            DaemonMsg::Theme(Some(path)) => match Theme::load(&path) {
                Ok(theme) => {
                    info!("theme '{}' loaded", theme.name);
                    self.panel.set_theme(Some(theme));
                }
                Err(err) => warn!("{err}"),
            },
            DaemonMsg::Theme(None) => {
                info!("theme cleared");
                self.panel.set_theme(None);
            }
            DaemonMsg::Reload => match self.settings.reload() {
                Ok(changed) => info!("settings reloaded, {} changed", changed.len()),
                Err(err) => warn!("settings reload failed: {err}"),
            },
        }
    }

    /// Pushes output size and scale into the panel model.
    fn apply_output_geometry(&mut self) {
        let scale = self.buffer_scale as f64;
        self.panel.set_scale_factor(scale);
        let width = self
            .output_logical_size
            .map(|(width, _)| width.max(0) as f64)
            .unwrap_or(0.0);
        self.panel
            .set_size(width * scale, self.panel_height as f64 * scale);
        if let Some((x, y)) = self.output_logical_position {
            self.panel.set_position(x as f64 * scale, y as f64 * scale);
        }
    }

    fn set_buffer_scale(&mut self, scale: u32) {
        let scale = scale.max(1);
        if scale == self.buffer_scale {
            return;
        }
        self.buffer_scale = scale;
        for surface in &self.surfaces {
            surface.layer.wl_surface().set_buffer_scale(scale as i32);
        }
        self.apply_output_geometry();
        self.redraw = true;
    }

    /// Mirrors corner size and allocation onto the layer surfaces.
    fn sync_surfaces(&mut self) {
        let scale = self.buffer_scale.max(1) as f64;
        let panel_width = self.panel.width();
        for surface in &mut self.surfaces {
            let Some(corner) = self.controller.corner(surface.side) else {
                continue;
            };
            let (width, height) = corner.fixed_size();
            let size = (
                ((width / scale).ceil() as u32).max(1),
                ((height / scale).ceil() as u32).max(1),
            );
            let child_box = corner.child_box();
            let top = ((child_box.y1 + corner.translation_y()) / scale).round() as i32;
            let edge = match surface.side {
                Side::Left => child_box.x1,
                Side::Right => panel_width - child_box.x2,
            };
            let margin = (top.max(0), (edge / scale).round() as i32);
            if size == surface.size && margin == surface.margin {
                continue;
            }
            surface.size = size;
            surface.margin = margin;
            surface.layer.set_size(size.0, size.1);
            match surface.side {
                Side::Left => surface.layer.set_margin(margin.0, 0, 0, margin.1),
                Side::Right => surface.layer.set_margin(margin.0, margin.1, 0, 0),
            }
            surface.layer.commit();
            debug!(
                "{} surface resized to {}x{} at top {}",
                surface.side.name(),
                size.0,
                size.1,
                margin.0
            );
        }
    }

    fn draw_all(&mut self) {
        for idx in 0..self.surfaces.len() {
            if !self.surfaces[idx].configured {
                continue;
            }
            if let Err(err) = self.draw(idx) {
                warn!("draw {} corner: {err:#}", self.surfaces[idx].side.name());
            }
        }
        self.redraw = false;
    }

    fn draw(&mut self, idx: usize) -> Result<()> {
        let side = self.surfaces[idx].side;
        let (width, height) = self.surfaces[idx].size;
        let (buffer_width, buffer_height, needed) = buffer_layout(width, height, self.buffer_scale)
            .with_context(|| format!("{width}x{height} surface is too large"))?;
        let stride = buffer_width as i32 * 4;

        let corner = self
            .controller
            .repaint(side, &mut self.settings, &self.panel);
        let opacity = self
            .controller
            .corner(side)
            .map(|corner| corner.opacity() / 255.0)
            .unwrap_or(0.0);

        if self.pool.len() < needed {
            self.pool.resize(needed).context("resize shm pool")?;
        }
        let (buffer, canvas) = self
            .pool
            .create_buffer(
                buffer_width as i32,
                buffer_height as i32,
                stride,
                wl_shm::Format::Argb8888,
            )
            .context("create buffer")?;

        {
            let mut pixmap = PixmapMut::from_bytes(canvas.as_mut(), buffer_width, buffer_height)
                .context("pixmap from buffer")?;
            pixmap.fill(Color::from_rgba8(0, 0, 0, 0));
            if let Some(corner) = corner.as_ref() {
                let paint = PixmapPaint {
                    opacity: opacity.clamp(0.0, 1.0) as f32,
                    blend_mode: BlendMode::Source,
                    ..PixmapPaint::default()
                };
                let x = pixmap_origin(side, buffer_width, corner.width());
                pixmap.draw_pixmap(x, 0, corner.as_ref(), &paint, Transform::identity(), None);
            }
        }

        swizzle_rgba_to_bgra(canvas.as_mut());

        let surface = self.surfaces[idx].layer.wl_surface();
        surface.damage_buffer(0, 0, buffer_width as i32, buffer_height as i32);
        buffer.attach_to(surface).context("buffer attach")?;
        self.surfaces[idx].layer.commit();
        Ok(())
    }

    fn surface_index(&self, surface: &wl_surface::WlSurface) -> Option<usize> {
        self.surfaces
            .iter()
            .position(|corner| corner.layer.wl_surface() == surface)
    }
}

impl CompositorHandler for Overlay {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        new_factor: i32,
    ) {
        self.set_buffer_scale(new_factor.max(1) as u32);
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }
}

impl OutputHandler for Overlay {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(&mut self, conn: &Connection, qh: &QueueHandle<Self>, output: wl_output::WlOutput) {
        self.update_output(conn, qh, output);
    }

    fn update_output(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, output: wl_output::WlOutput) {
        let Some(info) = self.output_state.info(&output) else {
            return;
        };
        if let Some(size) = info.logical_size {
            self.output_logical_size = Some(size);
        }
        if let Some(position) = info.logical_position {
            self.output_logical_position = Some(position);
        }
        let scale = info.scale_factor.max(1) as u32;
        if scale != self.buffer_scale {
            self.set_buffer_scale(scale);
        } else {
            self.apply_output_geometry();
        }
    }

    fn output_destroyed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _output: wl_output::WlOutput) {}
}

impl LayerShellHandler for Overlay {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _layer: &LayerSurface) {
        self.exit = true;
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        layer: &LayerSurface,
        _configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        let Some(idx) = self.surface_index(layer.wl_surface()) else {
            return;
        };
        self.surfaces[idx].configured = true;
        if let Err(err) = self.draw(idx) {
            warn!("draw {} corner: {err:#}", self.surfaces[idx].side.name());
        }
    }
}

impl ShmHandler for Overlay {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm
    }
}

delegate_compositor!(Overlay);
delegate_output!(Overlay);
delegate_shm!(Overlay);
delegate_layer!(Overlay);
delegate_registry!(Overlay);

impl ProvidesRegistryState for Overlay {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState];
}

/// Buffer width, height and byte length for a surface of logical size
/// `width`x`height`, or `None` when it does not fit a wl_shm buffer.
fn buffer_layout(width: u32, height: u32, scale: u32) -> Option<(u32, u32, usize)> {
    let buffer_width = width.checked_mul(scale)?;
    let buffer_height = height.checked_mul(scale)?;
    let len = buffer_width.checked_mul(buffer_height)?.checked_mul(4)?;
    i32::try_from(buffer_width.checked_mul(4)?).ok()?;
    i32::try_from(buffer_height).ok()?;
    Some((buffer_width, buffer_height, usize::try_from(len).ok()?))
}

/// Horizontal offset of the corner pixmap. The right corner hugs the right
/// buffer edge.
fn pixmap_origin(side: Side, buffer_width: u32, pixmap_width: u32) -> i32 {
    match side {
        Side::Left => 0,
        Side::Right => buffer_width as i32 - pixmap_width as i32,
    }
}

fn swizzle_rgba_to_bgra(bytes: &mut [u8]) {
    for pixel in bytes.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
}
