use anyhow::{Result, anyhow};
use log::{error, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use super::pipeline::DetectionSession;
use super::runtime::socket_path;
use crate::actions::{LogSurface, ScrollSurface, UinputSink};
use crate::config::{DaemonConfigState, SurfaceKind};
use crate::input::RecordingDevice;
use crate::scroll::{GestureEvent, ScrollController};

const LOOP_SLEEP: Duration = Duration::from_millis(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
    Toggle,
}

impl Switch {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Some(Switch::On),
            "off" | "false" | "0" => Some(Switch::Off),
            "toggle" => Some(Switch::Toggle),
            _ => None,
        }
    }

    pub fn apply(self, current: bool) -> bool {
        match self {
            Switch::On => true,
            Switch::Off => false,
            Switch::Toggle => !current,
        }
    }
}

/// Fixed-rate schedule. Missed periods are skipped rather than replayed, so a
/// stalled loop never produces a burst of ticks.
#[derive(Debug)]
struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next: now + period,
        }
    }

    fn set_period(&mut self, period: Duration, now: Instant) {
        if period != self.period {
            self.period = period;
            self.next = now + period;
        }
    }

    fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
        true
    }
}

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();
    let (tx_evt, rx_evt) = mpsc::channel::<GestureEvent>();

    // state
    let mut daemon = Daemon::new(tx_evt)?;
    info!("daemon: active profile '{}'", daemon.cfg.active_name);

    spawn_signal_listener(tx_req.clone())?;
    let _watcher = watch_profiles(&daemon.cfg.profiles_dir, tx_req.clone());

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        if let Ok((stream, _)) = listener.accept() {
            let tx = tx_req.clone();
            let view = daemon.client_view();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, view, tx) {
                    error!("ipc client error: {e}");
                }
            });
        }

        // gesture events: last one wins
        while let Ok(evt) = rx_evt.try_recv() {
            daemon.controller.deliver(evt);
        }

        let mut reload = false;
        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => reload = true,
                IpcMsg::ProfileChanged(name) => {
                    if name == daemon.cfg.active_name {
                        reload = true;
                    }
                }
                IpcMsg::UseProfile(name) => {
                    if let Err(e) = daemon.cfg.set_active(&name) {
                        error!("use profile failed: {e}");
                    } else {
                        daemon.apply_profile();
                        info!("switched active profile to {}", daemon.cfg.active_name);
                    }
                }
                IpcMsg::Detect(switch, reply) => {
                    let r = daemon.detect(switch).map_err(|e| format!("{e:#}"));
                    if let Err(e) = &r {
                        error!("{e}");
                    }
                    let _ = reply.send(r);
                }
                IpcMsg::Shutdown => {
                    daemon.shutdown();
                    let _ = std::fs::remove_file(&sock);
                    return Ok(());
                }
            }
        }
        if reload {
            match daemon.cfg.reload() {
                Ok(()) => {
                    daemon.apply_profile();
                    info!("profile reloaded");
                }
                Err(e) => error!("reload failed, keeping last good profile: {e}"),
            }
        }

        daemon.sync_detecting();
        let now = Instant::now();
        if daemon.ticker.due(now) {
            daemon.controller.on_tick(daemon.surface.as_mut());
        }

        thread::sleep(LOOP_SLEEP);
    }
}

fn spawn_signal_listener(tx: Sender<IpcMsg>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("received signal {sig}; shutting down");
                let _ = tx.send(IpcMsg::Shutdown);
            }
        })?;
    Ok(())
}

fn watch_profiles(dir: &Path, tx: Sender<IpcMsg>) -> Option<RecommendedWatcher> {
    let handler = move |res: notify::Result<notify::Event>| match res {
        Ok(ev) if ev.kind.is_modify() || ev.kind.is_create() => {
            for name in profile_names(&ev.paths) {
                let _ = tx.send(IpcMsg::ProfileChanged(name));
            }
        }
        Ok(_) => {}
        Err(e) => warn!("profile watch error: {e}"),
    };
    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(w) => w,
        Err(e) => {
            warn!("profile watching disabled: {e}");
            return None;
        }
    };
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        warn!("cannot watch {}: {e}", dir.display());
        return None;
    }
    Some(watcher)
}

fn profile_names(paths: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = paths
        .iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

fn handle_client(mut stream: UnixStream, view: ClientView, tx_req: Sender<IpcMsg>) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");
    let switch = req
        .get("state")
        .and_then(|v| v.as_str())
        .and_then(Switch::parse);

    let resp = match op {
        "status" => serde_json::json!({"ok": true, "data": view.status()}),
        "reload" => {
            let _ = tx_req.send(IpcMsg::Reload);
            serde_json::json!({"ok": true, "data": {"active_profile": view.cfg.active_name}})
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            let _ = tx_req.send(IpcMsg::UseProfile(name.to_string()));
            serde_json::json!({"ok": true, "data": {"active_profile": name}})
        }
        "list" => {
            let list = view.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": view.cfg.active_name}})
        }
        "doctor" => {
            let report = view.cfg.doctor_report();
            serde_json::json!({"ok": true, "data": report})
        }
        "detect" => match switch {
            Some(sw) => {
                let (reply_tx, reply_rx) = mpsc::channel();
                let _ = tx_req.send(IpcMsg::Detect(sw, reply_tx));
                match reply_rx.recv_timeout(REPLY_TIMEOUT) {
                    Ok(Ok(on)) => serde_json::json!({"ok": true, "data": {"detecting": on}}),
                    Ok(Err(e)) => serde_json::json!({"ok": false, "error": e}),
                    Err(_) => serde_json::json!({"ok": false, "error": "daemon did not answer"}),
                }
            }
            None => serde_json::json!({"ok": false, "error": "state must be on, off or toggle"}),
        },
        "autoplay" => match switch {
            Some(sw) => {
                let on = set_autoplay(&view.controller, sw);
                serde_json::json!({"ok": true, "data": {"autoplay": on}})
            }
            None => serde_json::json!({"ok": false, "error": "state must be on, off or toggle"}),
        },
        "speed" => match req.get("value").and_then(|v| v.as_f64()) {
            Some(v) => match view.controller.set_speed_multiplier(v as f32) {
                Ok(()) => serde_json::json!({"ok": true, "data": {"speed": v}}),
                Err(e) => serde_json::json!({"ok": false, "error": e.to_string()}),
            },
            None => serde_json::json!({"ok": false, "error": "value must be a number"}),
        },
        "shutdown" => {
            let _ = tx_req.send(IpcMsg::Shutdown);
            serde_json::json!({"ok": true, "data": "shutting down"})
        }
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    };

    writeln!(stream, "{resp}")?;
    Ok(())
}

fn set_autoplay(controller: &ScrollController, switch: Switch) -> bool {
    match switch {
        Switch::Toggle => controller.toggle_autoplaying(),
        Switch::On | Switch::Off => {
            let on = switch.apply(false);
            controller.set_autoplaying(on);
            on
        }
    }
}

struct Daemon {
    cfg: DaemonConfigState,
    controller: ScrollController,
    surface: Box<dyn ScrollSurface>,
    session: Option<DetectionSession>,
    events: Sender<GestureEvent>,
    ticker: Ticker,
    detecting: Arc<AtomicBool>,
}

impl Daemon {
    fn new(events: Sender<GestureEvent>) -> Result<Self> {
        let cfg = DaemonConfigState::load_or_install_default()?;
        let scroll = &cfg.profile.scroll;
        let controller = ScrollController::new(scroll.speed, scroll.gesture_gain);
        controller.set_autoplaying(scroll.autoplay);
        let surface = make_surface(cfg.profile.capture.surface, scroll.units_per_wheel_step);
        let ticker = Ticker::new(Duration::from_millis(scroll.tick_ms), Instant::now());
        Ok(Self {
            cfg,
            controller,
            surface,
            session: None,
            events,
            ticker,
            detecting: Arc::new(AtomicBool::new(false)),
        })
    }

    fn client_view(&self) -> ClientView {
        ClientView {
            controller: self.controller.clone(),
            cfg: self.cfg.clone(),
            detecting: Arc::clone(&self.detecting),
        }
    }

    /// Pushes the current profile into the running pieces. Speed and autoplay
    /// are user controls and keep their live values.
    fn apply_profile(&mut self) {
        let profile = &self.cfg.profile;
        self.controller.set_gesture_gain(profile.scroll.gesture_gain);
        self.ticker
            .set_period(Duration::from_millis(profile.scroll.tick_ms), Instant::now());
        if let Some(session) = &self.session {
            session.set_thresholds(profile.thresholds);
        }
    }

    fn build_session(&self) -> Result<DetectionSession> {
        let profile = &self.cfg.profile;
        let path = profile
            .recording_path()
            .ok_or_else(|| anyhow!("no capture source configured (set capture.recording)"))?;
        let device = RecordingDevice::load(&path, profile.capture.fps)?;
        let detector = device.detector();
        Ok(DetectionSession::new(
            self.controller.clone(),
            Arc::new(device),
            detector,
            profile.thresholds,
            self.events.clone(),
            profile.capture.detection_workers,
        ))
    }

    fn detect(&mut self, switch: Switch) -> Result<bool> {
        let running = self.session.as_ref().is_some_and(|s| s.is_running());
        let want = switch.apply(running);
        if want {
            if !running {
                // picks up capture settings changed since the last start
                self.session = Some(self.build_session()?);
            }
            if let Some(session) = self.session.as_mut() {
                session.start()?;
            }
        } else if let Some(session) = self.session.as_mut() {
            session.stop();
        }
        self.sync_detecting();
        Ok(want)
    }

    fn sync_detecting(&self) {
        let running = self.session.as_ref().is_some_and(|s| s.is_running());
        self.detecting.store(running, Ordering::Relaxed);
    }

    fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        info!("daemon: stopped");
    }
}

fn make_surface(kind: SurfaceKind, units_per_step: f32) -> Box<dyn ScrollSurface> {
    match kind {
        SurfaceKind::Log => Box::new(LogSurface::default()),
        SurfaceKind::Uinput => match UinputSink::new(units_per_step) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                warn!("uinput unavailable ({e}); logging offsets instead");
                Box::new(LogSurface::default())
            }
        },
    }
}

struct ClientView {
    controller: ScrollController,
    cfg: DaemonConfigState,
    detecting: Arc<AtomicBool>,
}

impl ClientView {
    fn status(&self) -> serde_json::Value {
        let state = self.controller.snapshot();
        serde_json::json!({
            "detecting": self.detecting.load(Ordering::Relaxed),
            "autoplay": state.autoplaying,
            "speed": state.speed,
            "direction": state.direction.as_str(),
            "mode": state.mode().as_str(),
            "active_profile": self.cfg.active_name,
            "socket": socket_path().ok(),
        })
    }
}

enum IpcMsg {
    Reload,
    ProfileChanged(String),
    UseProfile(String),
    Detect(Switch, Sender<Result<bool, String>>),
    Shutdown,
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "handscroll daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}
