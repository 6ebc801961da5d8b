//! Mode state machine.
//!
//! Three mutually exclusive modes. A switch is synchronous for the caller and
//! returns the transport work to schedule; the session's generation counter
//! makes any connection attempt started by an earlier switch stale.

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Local cosmetic preview; transport suspended.
    #[default]
    Customization,
    Playing,
    /// Rendered like Playing; own input only orbits the camera.
    Spectating,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Customization => "customization",
            Mode::Playing => "playing",
            Mode::Spectating => "spectating",
        }
    }

    /// Parses the console spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customize" | "customization" => Some(Mode::Customization),
            "play" | "playing" => Some(Mode::Playing),
            "spectate" | "spectating" => Some(Mode::Spectating),
            _ => None,
        }
    }

    pub fn wants_connection(self) -> bool {
        !matches!(self, Mode::Customization)
    }

    /// Movement, shooting and interactions are forwarded to the server.
    pub fn accepts_player_input(self) -> bool {
        matches!(self, Mode::Playing)
    }
}

/// Transport work a mode switch asks for, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeAction {
    Disconnect,
    Connect,
    /// POST the cosmetic profile before joining.
    SyncProfile,
}

#[derive(Debug, Clone, Default)]
pub struct ModeMachine {
    mode: Mode,
}

impl ModeMachine {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn switch(&mut self, to: Mode) -> Vec<ModeAction> {
        let from = self.mode;
        if from == to {
            return Vec::new();
        }
        self.mode = to;
        info!(from = from.as_str(), to = to.as_str(), "Mode switch");
        match (from, to) {
            (_, Mode::Customization) => vec![ModeAction::Disconnect],
            (Mode::Customization, Mode::Playing) => {
                vec![ModeAction::SyncProfile, ModeAction::Connect]
            }
            (Mode::Customization, Mode::Spectating) => vec![ModeAction::Connect],
            // Playing <-> Spectating reopens the session.
            _ => vec![ModeAction::Disconnect, ModeAction::Connect],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customization_suspends_transport() {
        let mut m = ModeMachine::new(Mode::Playing);
        assert_eq!(m.switch(Mode::Customization), vec![ModeAction::Disconnect]);
        assert_eq!(m.mode(), Mode::Customization);
    }

    #[test]
    fn entering_play_from_customization_syncs_profile() {
        let mut m = ModeMachine::default();
        assert_eq!(
            m.switch(Mode::Playing),
            vec![ModeAction::SyncProfile, ModeAction::Connect]
        );
        assert_eq!(
            m.switch(Mode::Spectating),
            vec![ModeAction::Disconnect, ModeAction::Connect]
        );
        assert!(m.switch(Mode::Spectating).is_empty());
    }

    #[test]
    fn console_spellings() {
        assert_eq!(Mode::parse("spectate"), Some(Mode::Spectating));
        assert_eq!(Mode::parse("customize"), Some(Mode::Customization));
        assert_eq!(Mode::parse("fly"), None);
    }
}
