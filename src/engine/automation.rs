use crate::engine::song::Automation;

/// Playback state of one automation lane
///
/// Points are converted to absolute sample positions up front. Song time only
/// moves forward, so a cursor remembers the segment the last lookup landed in.
#[derive(Debug, Clone)]
pub struct AutomationCurve {
    device: usize,
    param: usize,
    points: Vec<(u64, f32)>,
    cursor: usize,
}

impl AutomationCurve {
    pub fn new(automation: &Automation) -> Self {
        let mut pos = 0u64;
        let points = automation
            .points
            .iter()
            .map(|p| {
                pos += p.delta_samples as u64;
                (pos, p.value)
            })
            .collect();
        Self {
            device: automation.device,
            param: automation.param,
            points,
            cursor: 0,
        }
    }

    /// Chain position of the automated device
    pub fn device(&self) -> usize {
        self.device
    }

    pub fn param(&self) -> usize {
        self.param
    }

    /// Value at sample `pos`, linearly interpolated between points
    ///
    /// Holds the first value before the first point and the last value after
    /// the last one. `None` for a curve without points.
    pub fn value_at(&mut self, pos: u64) -> Option<f32> {
        let (first_pos, first_value) = *self.points.first()?;
        if pos <= first_pos {
            return Some(first_value);
        }

        while self.cursor + 1 < self.points.len() && self.points[self.cursor + 1].0 <= pos {
            self.cursor += 1;
        }

        let (start, from) = self.points[self.cursor];
        let Some(&(end, to)) = self.points.get(self.cursor + 1) else {
            return Some(from);
        };
        let t = (pos - start) as f64 / (end - start) as f64;
        Some(from + (to - from) * t as f32)
    }
}
