use log::{debug, warn};
use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender, SyncSender, TrySendError},
    },
    thread,
};

use crate::gestures::{GestureClassifier, GestureSignal};
use crate::input::{DetectionError, Frame, LandmarkSource};
use crate::landmarks::{HandPose, LandmarkSet};
use crate::scroll::{GestureEvent, SessionToken};

// anything other than exactly one complete hand is neutral
pub fn signal_for(
    result: Result<Vec<HandPose>, DetectionError>,
    classifier: &GestureClassifier,
) -> GestureSignal {
    let hands = match result {
        Ok(hands) => hands,
        Err(e) => {
            debug!("detection failed: {e}");
            return GestureSignal::Neutral;
        }
    };
    let [hand] = hands.as_slice() else {
        debug!("{} hands in frame", hands.len());
        return GestureSignal::Neutral;
    };
    match LandmarkSet::from_pose(hand, classifier.thresholds().min_confidence) {
        Some(set) => GestureSignal::Hand(classifier.classify(&set)),
        None => {
            debug!("incomplete hand landmarks");
            GestureSignal::Neutral
        }
    }
}

/// Hands frames to the detection workers. Frames arriving while every worker
/// is busy and the queue is full are dropped.
pub struct FrameDispatcher {
    jobs: SyncSender<Frame>,
}

pub struct DispatchContext {
    pub detector: Arc<dyn LandmarkSource>,
    pub classifier: Arc<RwLock<GestureClassifier>>,
    pub session: SessionToken,
    pub live: Arc<AtomicBool>,
    pub events: Sender<GestureEvent>,
}

impl FrameDispatcher {
    pub fn spawn(ctx: DispatchContext, workers: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let (jobs, rx) = mpsc::sync_channel::<Frame>(workers);
        let rx = Arc::new(Mutex::new(rx));
        let ctx = Arc::new(ctx);
        for i in 0..workers {
            let rx = Arc::clone(&rx);
            let ctx = Arc::clone(&ctx);
            thread::Builder::new()
                .name(format!("detect-{i}"))
                .spawn(move || run_worker(&rx, &ctx))?;
        }
        Ok(Self { jobs })
    }

    pub fn on_frame(&self, frame: Frame) {
        if frame.buffer.is_none() {
            return;
        }
        match self.jobs.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                debug!("detection busy; frame {} dropped", frame.seq);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("detection workers gone; frame discarded");
            }
        }
    }
}

fn run_worker(rx: &Mutex<Receiver<Frame>>, ctx: &DispatchContext) {
    loop {
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(frame) = next else {
            // dispatcher dropped: session over
            return;
        };
        if !ctx.live.load(Ordering::Acquire) {
            continue;
        }

        let result = ctx.detector.detect(&frame);
        let signal = {
            let classifier = ctx.classifier.read().unwrap_or_else(PoisonError::into_inner);
            signal_for(result, &classifier)
        };

        if !ctx.live.load(Ordering::Acquire) {
            debug!("frame {} completed after stop; discarded", frame.seq);
            continue;
        }
        let event = GestureEvent {
            session: ctx.session,
            signal,
        };
        if ctx.events.send(event).is_err() {
            return;
        }
    }
}
