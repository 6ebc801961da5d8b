//! Input handling.
//!
//! Windowing, raw key events and touch handling live with the renderer. This
//! module only describes what was sampled for one tick and reduces it to
//! movement axes.

/// User input sampled at one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub forward: bool,
    pub back: bool,
    pub strafe_left: bool,
    pub strafe_right: bool,
    pub turn_left: bool,
    pub turn_right: bool,
    /// Virtual joystick drag from its origin, in pixels (x right, y down).
    pub joystick: Option<(f32, f32)>,
    /// Horizontal free-look drag since the previous tick, in pixels.
    pub look_dx: f32,
    /// Edge-triggered fire request.
    pub shoot: bool,
}

/// Movement intent in the player's local frame, each axis in `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveAxes {
    pub forward: f32,
    pub strafe: f32,
    /// Positive turns left (counter-clockwise seen from above).
    pub turn: f32,
}

/// Clamps a joystick drag to `radius` and normalizes each axis to `[-1, 1]`.
pub fn clamp_joystick(dx: f32, dy: f32, radius: f32) -> (f32, f32) {
    if radius <= 0.0 || !(dx.is_finite() && dy.is_finite()) {
        return (0.0, 0.0);
    }
    let len = (dx * dx + dy * dy).sqrt();
    let (dx, dy) = if len > radius {
        (dx / len * radius, dy / len * radius)
    } else {
        (dx, dy)
    };
    ((dx / radius).clamp(-1.0, 1.0), (dy / radius).clamp(-1.0, 1.0))
}

fn axis(pos: bool, neg: bool) -> f32 {
    match (pos, neg) {
        (true, false) => 1.0,
        (false, true) => -1.0,
        _ => 0.0,
    }
}

impl InputState {
    /// Combines keys and joystick. Joystick up means forward.
    pub fn axes(&self, joystick_radius: f32) -> MoveAxes {
        let mut forward = axis(self.forward, self.back);
        let mut strafe = axis(self.strafe_right, self.strafe_left);
        if let Some((dx, dy)) = self.joystick {
            let (jx, jy) = clamp_joystick(dx, dy, joystick_radius);
            forward = (forward - jy).clamp(-1.0, 1.0);
            strafe = (strafe + jx).clamp(-1.0, 1.0);
        }
        MoveAxes {
            forward,
            strafe,
            turn: axis(self.turn_left, self.turn_right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joystick_is_clamped_to_radius() {
        let (x, y) = clamp_joystick(300.0, 0.0, 50.0);
        assert_eq!((x, y), (1.0, 0.0));
        let (x, y) = clamp_joystick(25.0, -25.0, 50.0);
        assert_eq!((x, y), (0.5, -0.5));
        let (x, y) = clamp_joystick(100.0, 100.0, 50.0);
        assert!((x * x + y * y).sqrt() <= 1.0 + 1e-6);
    }

    #[test]
    fn opposing_keys_cancel() {
        let input = InputState {
            forward: true,
            back: true,
            strafe_right: true,
            ..InputState::default()
        };
        let axes = input.axes(50.0);
        assert_eq!(axes.forward, 0.0);
        assert_eq!(axes.strafe, 1.0);
    }

    #[test]
    fn joystick_up_moves_forward() {
        let input = InputState {
            joystick: Some((0.0, -50.0)),
            ..InputState::default()
        };
        assert_eq!(input.axes(50.0).forward, 1.0);
    }
}
