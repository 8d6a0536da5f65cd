use anyhow::{Result, anyhow};
use log::warn;
use pico_args::Arguments;
use std::{env, path::PathBuf, process::Command};

use crate::actions::{ScrollSurface, UinputSink};
use crate::config::{DaemonConfigState, Thresholds};
use crate::gestures::GestureClassifier;
use crate::input::{LandmarkSource, Recording};
use crate::ipc::{self, Switch};
use crate::scroll::ScrollController;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    // Flags-based help (-h/--help)
    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("handscroll: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => simple_request("shutdown"),
        Some("status") => simple_request("status"),
        Some("reload") => simple_request("reload"),
        Some("list") => simple_request("list"),
        Some("doctor") => simple_request("doctor"),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handscroll use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"use","profile":name}))?;
            print_response(&r);
            Ok(())
        }

        Some(op @ ("detect" | "autoplay")) => {
            let state: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handscroll {op} <on|off|toggle>"))?;
            if Switch::parse(&state).is_none() {
                return Err(anyhow!("usage: handscroll {op} <on|off|toggle>"));
            }
            let r = ipc::client_request(serde_json::json!({"op":op,"state":state}))?;
            print_response(&r);
            Ok(())
        }

        Some("speed") => {
            let value: f32 = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handscroll speed <0.1..5.0>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"speed","value":value}))?;
            print_response(&r);
            Ok(())
        }

        Some("classify") => {
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handscroll classify <recording.jsonl>"))?;
            classify_recording(&path)
        }

        Some("emit") => {
            // usage:
            //   handscroll emit scroll 3
            let what: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handscroll emit scroll <steps>"))?;
            match what.as_str() {
                "scroll" => {
                    let steps: i32 = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: handscroll emit scroll <steps>"))?;
                    let mut sink = UinputSink::new(1.0)?;
                    sink.scroll_vertical(steps)?;
                    println!("ok: scrolled vertical {steps}");
                }
                other => return Err(anyhow!("unknown emit kind: {other}")),
            }
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn simple_request(op: &str) -> Result<()> {
    let r = ipc::client_request(serde_json::json!({ "op": op }))?;
    print_response(&r);
    Ok(())
}

/// Offline replay: classify every recorded frame with the active profile's
/// thresholds and show the offset a tick would apply right after it.
fn classify_recording(path: &std::path::Path) -> Result<()> {
    let recording = Recording::load(path)?;
    let (thresholds, gain) = match DaemonConfigState::load_or_install_default() {
        Ok(cfg) => (cfg.profile.thresholds, cfg.profile.scroll.gesture_gain),
        Err(e) => {
            warn!("using built-in thresholds: {e}");
            (Thresholds::default(), 5.0)
        }
    };
    let classifier = GestureClassifier::new(thresholds);
    let controller = ScrollController::new(1.0, gain);
    let mut sink = Offsets(0.0);

    println!("{:>6}  {:<8}  {:>8}", "frame", "signal", "offset");
    for frame in recording.frames() {
        if frame.buffer.is_none() {
            println!("{:>6}  {:<8}  {:>8}", frame.seq, "dropped", "-");
            continue;
        }
        let signal = ipc::signal_for(recording.detect(&frame), &classifier);
        controller.on_gesture_event(signal);
        let offset = controller
            .on_tick(&mut sink)
            .map(|d| format!("{d:+.1}"))
            .unwrap_or_else(|| "-".into());
        println!("{:>6}  {:<8}  {:>8}", frame.seq, signal.as_str(), offset);
    }
    println!("net offset: {:+.1}", sink.0);
    Ok(())
}

struct Offsets(f32);

impl ScrollSurface for Offsets {
    fn apply_offset(&mut self, delta_y: f32) {
        self.0 += delta_y;
    }
}

fn print_help() {
    println!(
        r#"handscroll — hands-free scrolling daemon

USAGE:
  handscroll help [command]               Show general or command-specific help
  handscroll start                        Start the daemon
  handscroll stop                         Stop the daemon
  handscroll status                       Show detection, autoplay and scroll state
  handscroll reload                       Reload active profile
  handscroll use <name>                   Switch active profile
  handscroll list                         List profiles
  handscroll doctor                       Diagnose permissions/devices
  handscroll detect <on|off|toggle>       Start or stop gesture detection
  handscroll autoplay <on|off|toggle>     Start or stop timed scrolling
  handscroll speed <0.1..5.0>             Set the speed multiplier
  handscroll classify <recording.jsonl>   Classify a recorded session offline
  handscroll emit scroll <steps>          Emit vertical scroll (+/- steps)

GESTURES:
  open palm  -> scroll down
  fist       -> scroll up

TIPS:
  - Profiles: ~/.config/handscroll/profiles
  - Active profile pointer: ~/.config/handscroll/active
  - Set RUST_LOG=debug to trace every frame and tick
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: handscroll start\nStarts the background daemon."),
        "stop" => println!("usage: handscroll stop\nStops detection and the running daemon."),
        "status" => println!(
            "usage: handscroll status\nShows detection flag, autoplay, speed, direction and active profile."
        ),
        "reload" => println!(
            "usage: handscroll reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: handscroll use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => {
            println!("usage: handscroll list\nLists available profiles and the active one.")
        }
        "doctor" => println!(
            "usage: handscroll doctor\nChecks uinput permissions, video devices and the configured recording."
        ),
        "detect" => println!(
            "usage: handscroll detect <on|off|toggle>\nStarts capture + gesture detection; fails if the capture source cannot be opened."
        ),
        "autoplay" => println!(
            "usage: handscroll autoplay <on|off|toggle>\nTimed scrolling; overrides gestures while on."
        ),
        "speed" => println!(
            "usage: handscroll speed <value>\nSets the speed multiplier (0.1 to 5.0)."
        ),
        "classify" => println!(
            "usage: handscroll classify <recording.jsonl>\nPrints the gesture signal and resulting offset for each recorded frame."
        ),
        "emit" => println!("usage:\n  handscroll emit scroll <steps>"),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
