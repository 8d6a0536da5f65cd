use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::Deserialize;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::scroll::{SPEED_MAX, SPEED_MIN};

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Thresholds {
    pub open_tip_to_mcp: f32,
    pub open_tip_to_pip: f32,
    pub closed_tip_to_mcp: f32,
    pub closed_tip_to_pip: f32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_min_confidence() -> f32 {
    0.3
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            open_tip_to_mcp: 0.15,
            open_tip_to_pip: 0.10,
            closed_tip_to_mcp: 0.12,
            closed_tip_to_pip: 0.08,
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrollSettings {
    pub tick_ms: u64,
    pub gesture_gain: f32,
    pub speed: f32,
    #[serde(default)]
    pub autoplay: bool,
    pub units_per_wheel_step: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Uinput,
    Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSettings {
    pub recording: Option<PathBuf>,
    pub fps: u32,
    pub detection_workers: usize,
    pub surface: SurfaceKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    #[serde(default)]
    pub thresholds: Thresholds,
    pub scroll: ScrollSettings,
    pub capture: CaptureSettings,
}

impl Profile {
    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }

    /// Recording path with a leading `~/` expanded against the home dir.
    pub fn recording_path(&self) -> Option<PathBuf> {
        let raw = self.capture.recording.as_ref()?;
        match raw.strip_prefix("~") {
            Ok(rest) => UserDirs::new().map(|u| u.home_dir().join(rest)),
            Err(_) => Some(raw.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

fn config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .ok_or_else(|| anyhow!("cannot locate home directory"))?
        .home_dir()
        .to_path_buf();
    Ok(home.join(".config").join("handscroll"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

fn demo_recording_text() -> &'static str {
    include_str!("../recordings/demo.jsonl")
}

fn install_defaults(cfgdir: &Path) -> Result<()> {
    let profdir = cfgdir.join("profiles");
    fs::create_dir_all(&profdir)?;
    let def_path = profdir.join("default.toml");
    if !def_path.exists() {
        fs::write(&def_path, default_profile_text())?;
        info!("installed default profile at {}", def_path.display());
    }

    let recdir = cfgdir.join("recordings");
    fs::create_dir_all(&recdir)?;
    let demo_path = recdir.join("demo.jsonl");
    if !demo_path.exists() {
        fs::write(&demo_path, demo_recording_text())?;
        info!("installed demo recording at {}", demo_path.display());
    }
    Ok(())
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let cfgdir = config_dir()?;
        install_defaults(&cfgdir)?;
        let profdir = cfgdir.join("profiles");

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    /// On error the previous profile stays in effect.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profile_path(name);
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir.join(format!("{name}.toml"))
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        let recording = self.profile.recording_path();
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "surface": format!("{:?}", self.profile.capture.surface).to_lowercase(),
            "recording": recording,
            "recording_present": recording.as_ref().is_some_and(|p| p.exists()),
            "video_devices": detect_video_devices(),
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
            }
        })
    }
}

fn load_profile(dir: &Path, name: &str) -> Result<Profile> {
    let path = dir.join(format!("{name}.toml"));
    let txt =
        fs::read_to_string(&path).map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    Profile::parse(&txt).map_err(|e| anyhow!("failed to load {}: {e}", path.display()))
}

fn validate_profile(p: &Profile) -> Result<()> {
    let th = &p.thresholds;
    let cutoffs = [
        th.open_tip_to_mcp,
        th.open_tip_to_pip,
        th.closed_tip_to_mcp,
        th.closed_tip_to_pip,
    ];
    if cutoffs.iter().any(|v| !(*v > 0.0)) {
        return Err(anyhow!("thresholds must be positive distances"));
    }
    if th.open_tip_to_mcp < th.closed_tip_to_mcp || th.open_tip_to_pip < th.closed_tip_to_pip {
        return Err(anyhow!(
            "open thresholds must not be below closed thresholds"
        ));
    }
    if !(0.0..=1.0).contains(&th.min_confidence) {
        return Err(anyhow!("thresholds.min_confidence must be in [0,1]"));
    }

    let sc = &p.scroll;
    if sc.tick_ms == 0 {
        return Err(anyhow!("scroll.tick_ms must be positive"));
    }
    if !(SPEED_MIN..=SPEED_MAX).contains(&sc.speed) {
        return Err(anyhow!(
            "scroll.speed must be in [{SPEED_MIN}, {SPEED_MAX}], got {}",
            sc.speed
        ));
    }
    if !(sc.gesture_gain > 0.0) || !(sc.units_per_wheel_step > 0.0) {
        return Err(anyhow!(
            "scroll.gesture_gain and scroll.units_per_wheel_step must be positive"
        ));
    }

    if p.capture.fps == 0 || p.capture.detection_workers == 0 {
        return Err(anyhow!(
            "capture.fps and capture.detection_workers must be positive"
        ));
    }
    Ok(())
}

fn detect_video_devices() -> Vec<String> {
    let mut out = vec![];
    if let Ok(rd) = fs::read_dir("/dev") {
        for e in rd.flatten() {
            let p = e.path();
            if p.file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.starts_with("video"))
            {
                out.push(p.display().to_string());
            }
        }
    }
    out.sort();
    out
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:") {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}
