use anyhow::{Result, anyhow};
use log::{error, info};
use std::{
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
    },
    thread::{self, JoinHandle},
};

use super::dispatch::{DispatchContext, FrameDispatcher};
use crate::config::Thresholds;
use crate::gestures::GestureClassifier;
use crate::input::{CaptureDevice, LandmarkSource};
use crate::scroll::{GestureEvent, ScrollController, SessionToken};

struct Running {
    token: SessionToken,
    live: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
}

pub struct DetectionSession {
    controller: ScrollController,
    device: Arc<dyn CaptureDevice>,
    detector: Arc<dyn LandmarkSource>,
    classifier: Arc<RwLock<GestureClassifier>>,
    events: Sender<GestureEvent>,
    workers: usize,
    running: Option<Running>,
}

impl DetectionSession {
    pub fn new(
        controller: ScrollController,
        device: Arc<dyn CaptureDevice>,
        detector: Arc<dyn LandmarkSource>,
        thresholds: Thresholds,
        events: Sender<GestureEvent>,
        workers: usize,
    ) -> Self {
        Self {
            controller,
            device,
            detector,
            classifier: Arc::new(RwLock::new(GestureClassifier::new(thresholds))),
            events,
            workers,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| {
            r.live.load(Ordering::Acquire)
                && r.capture.as_ref().is_some_and(|h| !h.is_finished())
        })
    }

    /// Starts capture. Calling again while running does nothing; a session
    /// whose capture stream ended is torn down and started afresh.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.stop();

        let mut source = self
            .device
            .open()
            .map_err(|e| anyhow!("cannot start detection: {e}"))?;

        let token = self.controller.begin_session();
        let live = Arc::new(AtomicBool::new(true));
        let dispatcher = FrameDispatcher::spawn(
            DispatchContext {
                detector: Arc::clone(&self.detector),
                classifier: Arc::clone(&self.classifier),
                session: token,
                live: Arc::clone(&live),
                events: self.events.clone(),
            },
            self.workers,
        );
        let dispatcher = match dispatcher {
            Ok(d) => d,
            Err(e) => {
                self.controller.end_session(token);
                return Err(anyhow!("failed to spawn detection workers: {e}"));
            }
        };

        let capture_live = Arc::clone(&live);
        let capture = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                let mut frames = 0u64;
                while capture_live.load(Ordering::Acquire) {
                    let Some(frame) = source.next_frame() else {
                        info!("capture stream ended after {frames} frames");
                        break;
                    };
                    frames += 1;
                    dispatcher.on_frame(frame);
                }
            });
        let capture = match capture {
            Ok(h) => h,
            Err(e) => {
                live.store(false, Ordering::Release);
                self.controller.end_session(token);
                return Err(anyhow!("failed to spawn capture thread: {e}"));
            }
        };

        info!("detection started");
        self.running = Some(Running {
            token,
            live,
            capture: Some(capture),
        });
        Ok(())
    }

    /// Stops capture and ends the session. Once this returns, no gesture from
    /// this session reaches the controller.
    pub fn stop(&mut self) {
        let Some(mut run) = self.running.take() else {
            return;
        };
        run.live.store(false, Ordering::Release);
        self.controller.end_session(run.token);
        if let Some(handle) = run.capture.take() {
            if handle.join().is_err() {
                error!("capture thread panicked");
            }
        }
        info!("detection stopped");
    }

    pub fn set_thresholds(&self, thresholds: Thresholds) {
        let mut classifier = self
            .classifier
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *classifier = GestureClassifier::new(thresholds);
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gestures::{GestureLabel, GestureSignal};
    use crate::input::{CaptureError, CaptureSource, DetectionError, Frame, PixelBuffer};
    use crate::landmarks::{HandPose, fixtures::uniform_hand};
    use crate::scroll::Direction;
    use std::sync::{
        Mutex,
        atomic::AtomicUsize,
        mpsc::{self, Receiver},
    };
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    struct Finite {
        frames: u64,
        opened: AtomicUsize,
    }

    struct FiniteStream {
        left: u64,
        seq: u64,
    }

    impl CaptureSource for FiniteStream {
        fn next_frame(&mut self) -> Option<Frame> {
            if self.left == 0 {
                return None;
            }
            self.left -= 1;
            self.seq += 1;
            Some(Frame {
                seq: self.seq,
                timestamp_ms: 0,
                buffer: Some(PixelBuffer {
                    width: 1,
                    height: 1,
                    data: Arc::from(&[0u8][..]),
                }),
            })
        }
    }

    impl CaptureDevice for Finite {
        fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FiniteStream {
                left: self.frames,
                seq: 0,
            }))
        }
    }

    struct Endless;

    impl CaptureDevice for Endless {
        fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureError> {
            Ok(Box::new(EndlessStream))
        }
    }

    struct EndlessStream;

    impl CaptureSource for EndlessStream {
        fn next_frame(&mut self) -> Option<Frame> {
            thread::sleep(Duration::from_millis(10));
            Some(Frame {
                seq: 0,
                timestamp_ms: 0,
                buffer: None,
            })
        }
    }

    struct Broken;

    impl CaptureDevice for Broken {
        fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureError> {
            Err(CaptureError::Unavailable("camera busy".into()))
        }
    }

    struct Fixed(Vec<HandPose>);

    impl LandmarkSource for Fixed {
        fn detect(&self, _frame: &Frame) -> Result<Vec<HandPose>, DetectionError> {
            Ok(self.0.clone())
        }
    }

    /// Reports when detection begins, then holds until the gate opens.
    struct Gated {
        started: Mutex<Sender<()>>,
        gate: Mutex<Receiver<()>>,
        hands: Vec<HandPose>,
    }

    impl LandmarkSource for Gated {
        fn detect(&self, _frame: &Frame) -> Result<Vec<HandPose>, DetectionError> {
            let _ = self.started.lock().unwrap().send(());
            let _ = self.gate.lock().unwrap().recv_timeout(WAIT);
            Ok(self.hands.clone())
        }
    }

    fn session(
        device: Arc<dyn CaptureDevice>,
        detector: Arc<dyn LandmarkSource>,
    ) -> (DetectionSession, ScrollController, Receiver<GestureEvent>) {
        let controller = ScrollController::default();
        let (tx, rx) = mpsc::channel();
        let s = DetectionSession::new(
            controller.clone(),
            device,
            detector,
            Thresholds::default(),
            tx,
            1,
        );
        (s, controller, rx)
    }

    #[test]
    fn events_reach_the_controller() {
        let device = Arc::new(Finite {
            frames: 1,
            opened: AtomicUsize::new(0),
        });
        let (mut s, controller, rx) =
            session(device, Arc::new(Fixed(vec![uniform_hand(0.20, 0.15)])));
        s.start().unwrap();
        let ev = rx.recv_timeout(WAIT).expect("gesture event");
        assert_eq!(ev.signal, GestureSignal::Hand(GestureLabel::Open));
        assert!(controller.deliver(ev));
        assert_eq!(controller.snapshot().direction, Direction::Down);
        s.stop();
    }

    #[test]
    fn acquisition_failure_surfaces_from_start() {
        let (mut s, _controller, _rx) = session(Arc::new(Broken), Arc::new(Fixed(vec![])));
        let err = s.start().unwrap_err();
        assert!(err.to_string().contains("camera busy"), "{err}");
        assert!(!s.is_running());
    }

    #[test]
    fn second_start_is_a_no_op() {
        let (mut s, _controller, _rx) = session(Arc::new(Endless), Arc::new(Fixed(vec![])));
        s.start().unwrap();
        assert!(s.is_running());
        let token = s.running.as_ref().map(|r| r.token);
        s.start().unwrap();
        assert_eq!(s.running.as_ref().map(|r| r.token), token);
        s.stop();
        assert!(!s.is_running());
    }

    #[test]
    fn ended_stream_can_be_restarted() {
        let device = Arc::new(Finite {
            frames: 0,
            opened: AtomicUsize::new(0),
        });
        let (mut s, _controller, _rx) = session(device.clone(), Arc::new(Fixed(vec![])));
        s.start().unwrap();
        // give the capture thread time to see the end of stream
        for _ in 0..100 {
            if !s.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        s.start().unwrap();
        assert_eq!(device.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn completion_after_stop_does_not_touch_state() {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let detector = Arc::new(Gated {
            started: Mutex::new(started_tx),
            gate: Mutex::new(gate_rx),
            hands: vec![uniform_hand(0.05, 0.03)],
        });
        let device = Arc::new(Finite {
            frames: 1,
            opened: AtomicUsize::new(0),
        });
        let (mut s, controller, rx) = session(device, detector);

        s.start().unwrap();
        started_rx.recv_timeout(WAIT).expect("detection began");
        s.stop();
        gate_tx.send(()).unwrap();

        // whatever the worker manages to send must be refused
        if let Ok(ev) = rx.recv_timeout(Duration::from_millis(300)) {
            assert!(!controller.deliver(ev));
        }
        assert_eq!(controller.snapshot().direction, Direction::Neutral);
    }

    #[test]
    fn stop_resets_direction() {
        let device = Arc::new(Finite {
            frames: 1,
            opened: AtomicUsize::new(0),
        });
        let (mut s, controller, rx) =
            session(device, Arc::new(Fixed(vec![uniform_hand(0.05, 0.03)])));
        s.start().unwrap();
        let ev = rx.recv_timeout(WAIT).unwrap();
        controller.deliver(ev);
        assert_eq!(controller.snapshot().direction, Direction::Up);
        s.stop();
        assert_eq!(controller.snapshot().direction, Direction::Neutral);
    }
}
