use crate::units::Second;

/// Updates further apart than this restart the filter at the new value.
const MAX_GAP: Second = Second(0.3);

#[derive(Debug, Clone, Copy)]
pub struct LowPassFilter {
    time_constant: f32,
    last_value: Option<f32>,
}

impl LowPassFilter {
    pub const fn new(time_constant: Second) -> Self {
        Self {
            time_constant: time_constant.0,
            last_value: None,
        }
    }

    pub fn apply(&mut self, value: f32, dt: Second) -> f32 {
        if dt > MAX_GAP {
            self.last_value = Some(value);
            value
        } else {
            let new_value = match self.last_value {
                None => value,
                Some(v) => {
                    let alpha = self.time_constant / (self.time_constant + dt.0);
                    alpha * v + (1.0 - alpha) * value
                }
            };
            self.last_value = Some(new_value);
            new_value
        }
    }

    pub fn value(&self) -> Option<f32> {
        self.last_value
    }

    pub fn reset(&mut self) {
        self.last_value = None;
    }
}
