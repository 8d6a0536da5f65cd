use anyhow::Result;
use log::{error, info, warn};

/// Positive offsets advance the view.
pub trait ScrollSurface {
    fn apply_offset(&mut self, delta_y: f32);
}

#[derive(Debug, Default)]
pub struct LogSurface {
    total: f32,
}

impl ScrollSurface for LogSurface {
    fn apply_offset(&mut self, delta_y: f32) {
        self.total += delta_y;
        info!("scroll {delta_y:+.2} (position {:.1})", self.total);
    }
}

pub struct UinputSink {
    units_per_step: f32,
    pending: f32,
    #[cfg(target_os = "linux")]
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new(units_per_step: f32) -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create()?;
            return Ok(Self {
                units_per_step,
                pending: 0.0,
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            warn!("uinput not available; running in NO-OP mode");
            Ok(Self::noop(units_per_step))
        }
    }

    pub fn noop(units_per_step: f32) -> Self {
        Self {
            units_per_step,
            pending: 0.0,
            #[cfg(target_os = "linux")]
            linux: None,
        }
    }

    /// Wheel notches; positive rolls the wheel up (view moves back).
    pub fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.scroll_vertical(steps)?;
        }
        #[cfg(not(target_os = "linux"))]
        let _ = steps;
        Ok(())
    }

    fn take_steps(&mut self, delta_y: f32) -> i32 {
        self.pending += delta_y;
        let notches = (self.pending / self.units_per_step).trunc();
        self.pending -= notches * self.units_per_step;
        // wheel-down advances the view
        -(notches as i32)
    }
}

impl ScrollSurface for UinputSink {
    fn apply_offset(&mut self, delta_y: f32) {
        let steps = self.take_steps(delta_y);
        if steps != 0 {
            if let Err(e) = self.scroll_vertical(steps) {
                error!("scroll emit failed: {e}");
            }
        }
    }
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create() -> Result<Self> {
        use uinput::event::relative;

        let dev = uinput::default()?
            .name("Handscroll Virtual Wheel")?
            .event(relative::Wheel::Vertical)?
            .create()?;

        info!("uinput: created virtual device");
        Ok(Self { dev })
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;
        self.dev.send(Wheel::Vertical, steps)?;
        self.dev.synchronize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_accumulate_into_notches() {
        let mut sink = UinputSink::noop(15.0);
        assert_eq!(sink.take_steps(5.0), 0);
        assert_eq!(sink.take_steps(5.0), 0);
        assert_eq!(sink.take_steps(5.0), -1);
        assert!(sink.pending.abs() < 1e-4);
    }

    #[test]
    fn upward_offsets_roll_wheel_up() {
        let mut sink = UinputSink::noop(15.0);
        assert_eq!(sink.take_steps(-35.0), 2);
        assert!((sink.pending + 5.0).abs() < 1e-4);
    }

    #[test]
    fn noop_sink_still_tracks_remainder() {
        let mut sink = UinputSink::noop(15.0);
        sink.apply_offset(10.0);
        sink.apply_offset(10.0);
        assert!((sink.pending - 5.0).abs() < 1e-4);
    }

    #[test]
    fn log_surface_tracks_position() {
        let mut s = LogSurface::default();
        s.apply_offset(5.0);
        s.apply_offset(-2.0);
        assert_eq!(s.total, 3.0);
    }
}
