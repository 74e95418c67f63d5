//! Piecewise-linear parameter automation in the style of Web Audio
//! `AudioParam` timelines.

#[derive(Debug, Clone, Copy, PartialEq)]
enum Automation {
    Set { time: f64, value: f32 },
    Ramp { time: f64, value: f32 },
}

impl Automation {
    fn time(&self) -> f64 {
        match self {
            Automation::Set { time, .. } | Automation::Ramp { time, .. } => *time,
        }
    }

    fn value(&self) -> f32 {
        match self {
            Automation::Set { value, .. } | Automation::Ramp { value, .. } => *value,
        }
    }
}

/// A gain value with scheduled changes, sampled with [`GainParam::value_at`].
#[derive(Debug, Clone)]
pub struct GainParam {
    initial: f32,
    events: Vec<Automation>,
}

impl GainParam {
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    /// Jumps to `value` at `time`.
    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(Automation::Set { time, value });
    }

    /// Ramps linearly from the preceding event so that `value` is reached at
    /// `time`.
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(Automation::Ramp { time, value });
    }

    /// Drops every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|event| event.time() < time);
    }

    /// Fades from whatever is audible at `now` to `target` over `duration`.
    pub fn fade_to(&mut self, now: f64, target: f32, duration: f64) {
        let current = self.value_at(now);
        self.fade_from(now, current, target, duration);
    }

    /// Restarts the envelope at `from` and ramps to `target` over
    /// `duration`. Earlier history collapses into the starting point.
    pub fn fade_from(&mut self, now: f64, from: f32, target: f32, duration: f64) {
        self.events.clear();
        self.initial = from;
        self.set_value_at_time(from, now);
        self.linear_ramp_to_value_at_time(target, now + duration.max(0.0));
    }

    pub fn value_at(&self, time: f64) -> f32 {
        let mut previous: Option<(f64, f32)> = None;
        let mut value = self.initial;

        for event in &self.events {
            if event.time() <= time {
                value = event.value();
                previous = Some((event.time(), value));
                continue;
            }

            if let (Automation::Ramp { time: end, value: target }, Some((start, from))) =
                (event, previous)
            {
                let span = end - start;
                if span > 0.0 {
                    let progress = ((time - start) / span) as f32;
                    return from + (target - from) * progress;
                }
            }
            break;
        }

        value
    }

    /// Time of the last scheduled event, if any.
    pub fn last_event_time(&self) -> Option<f64> {
        self.events.last().map(Automation::time)
    }

    fn insert(&mut self, event: Automation) {
        let index = self
            .events
            .iter()
            .position(|existing| existing.time() > event.time())
            .unwrap_or(self.events.len());
        self.events.insert(index, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_initial_value_without_events() {
        let param = GainParam::new(0.7);
        assert_eq!(param.value_at(0.0), 0.7);
        assert_eq!(param.value_at(100.0), 0.7);
    }

    #[test]
    fn ramps_linearly_between_events() {
        let mut param = GainParam::new(0.0);
        param.set_value_at_time(0.0, 1.0);
        param.linear_ramp_to_value_at_time(1.0, 3.0);

        assert_eq!(param.value_at(0.5), 0.0);
        assert!((param.value_at(2.0) - 0.5).abs() < 1e-6);
        assert_eq!(param.value_at(3.0), 1.0);
        assert_eq!(param.value_at(10.0), 1.0);
    }

    #[test]
    fn fade_to_starts_from_the_audible_value() {
        let mut param = GainParam::new(0.0);
        param.fade_from(0.0, 0.0, 0.8, 1.0);
        param.fade_to(0.5, 0.0, 0.5);

        assert!((param.value_at(0.5) - 0.4).abs() < 1e-6);
        assert!((param.value_at(0.75) - 0.2).abs() < 1e-6);
        assert_eq!(param.value_at(1.0), 0.0);
        assert_eq!(param.last_event_time(), Some(1.0));
    }

    #[test]
    fn cancel_drops_future_events() {
        let mut param = GainParam::new(0.5);
        param.set_value_at_time(0.1, 1.0);
        param.set_value_at_time(0.9, 2.0);
        param.cancel_scheduled_values(1.5);

        assert_eq!(param.value_at(5.0), 0.1);
    }
}
