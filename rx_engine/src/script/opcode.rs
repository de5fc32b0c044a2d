use std::fmt;

use crate::error::ScriptError;

/// The closed command set understood by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    GotoCard = 2,
    PlayDataSound = 4,
    SetVariable = 7,
    Branch = 8,
    EnableHotspot = 9,
    DisableHotspot = 10,
    ClearSlst = 12,
    SetCursor = 13,
    CallExternal = 17,
    ScheduleTransition = 18,
    Refresh = 19,
    DisableScreenUpdates = 20,
    EnableScreenUpdates = 21,
    DisableMovie = 28,
    DisableAllMovies = 29,
    EnableMovie = 31,
    StartMovieBlocking = 32,
    StartMovie = 33,
    StopMovie = 34,
    ScheduleMovieCommand = 38,
    ActivatePlst = 39,
    ActivateSlst = 40,
    ActivateMlstAndStart = 41,
    ActivateBlst = 43,
    ActivateMlst = 46,
}

impl Opcode {
    pub const ALL: [Opcode; 25] = [
        Opcode::GotoCard,
        Opcode::PlayDataSound,
        Opcode::SetVariable,
        Opcode::Branch,
        Opcode::EnableHotspot,
        Opcode::DisableHotspot,
        Opcode::ClearSlst,
        Opcode::SetCursor,
        Opcode::CallExternal,
        Opcode::ScheduleTransition,
        Opcode::Refresh,
        Opcode::DisableScreenUpdates,
        Opcode::EnableScreenUpdates,
        Opcode::DisableMovie,
        Opcode::DisableAllMovies,
        Opcode::EnableMovie,
        Opcode::StartMovieBlocking,
        Opcode::StartMovie,
        Opcode::StopMovie,
        Opcode::ScheduleMovieCommand,
        Opcode::ActivatePlst,
        Opcode::ActivateSlst,
        Opcode::ActivateMlstAndStart,
        Opcode::ActivateBlst,
        Opcode::ActivateMlst,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Minimum number of operands the handler reads.
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::ClearSlst
            | Opcode::Refresh
            | Opcode::DisableScreenUpdates
            | Opcode::EnableScreenUpdates
            | Opcode::DisableAllMovies
            | Opcode::Branch => 0,
            Opcode::GotoCard
            | Opcode::PlayDataSound
            | Opcode::EnableHotspot
            | Opcode::DisableHotspot
            | Opcode::SetCursor
            | Opcode::ScheduleTransition
            | Opcode::DisableMovie
            | Opcode::EnableMovie
            | Opcode::StartMovieBlocking
            | Opcode::StartMovie
            | Opcode::StopMovie
            | Opcode::ActivatePlst
            | Opcode::ActivateSlst
            | Opcode::ActivateMlstAndStart
            | Opcode::ActivateBlst
            | Opcode::ActivateMlst => 1,
            Opcode::SetVariable | Opcode::CallExternal => 2,
            Opcode::ScheduleMovieCommand => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::GotoCard => "goto_card",
            Opcode::PlayDataSound => "play_data_sound",
            Opcode::SetVariable => "set_variable",
            Opcode::Branch => "branch",
            Opcode::EnableHotspot => "enable_hotspot",
            Opcode::DisableHotspot => "disable_hotspot",
            Opcode::ClearSlst => "clear_slst",
            Opcode::SetCursor => "set_cursor",
            Opcode::CallExternal => "call_external",
            Opcode::ScheduleTransition => "schedule_transition",
            Opcode::Refresh => "refresh",
            Opcode::DisableScreenUpdates => "disable_screen_updates",
            Opcode::EnableScreenUpdates => "enable_screen_updates",
            Opcode::DisableMovie => "disable_movie",
            Opcode::DisableAllMovies => "disable_all_movies",
            Opcode::EnableMovie => "enable_movie",
            Opcode::StartMovieBlocking => "start_movie_blocking",
            Opcode::StartMovie => "start_movie",
            Opcode::StopMovie => "stop_movie",
            Opcode::ScheduleMovieCommand => "schedule_movie_command",
            Opcode::ActivatePlst => "activate_plst",
            Opcode::ActivateSlst => "activate_slst",
            Opcode::ActivateMlstAndStart => "activate_mlst_and_start",
            Opcode::ActivateBlst => "activate_blst",
            Opcode::ActivateMlst => "activate_mlst",
        }
    }

    pub fn check_operands(self, args: &[u16]) -> Result<(), ScriptError> {
        let expected = self.operand_count();
        if args.len() < expected {
            return Err(ScriptError::MissingOperands {
                opcode: self,
                expected,
                actual: args.len(),
            });
        }
        Ok(())
    }
}

impl TryFrom<u16> for Opcode {
    type Error = ScriptError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Opcode::ALL
            .into_iter()
            .find(|opcode| opcode.code() == code)
            .ok_or(ScriptError::UnknownOpcode(code))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_decode_to_their_opcode() {
        for opcode in Opcode::ALL {
            assert_eq!(Opcode::try_from(opcode.code()).unwrap(), opcode);
        }
        assert_eq!(Opcode::try_from(39).unwrap(), Opcode::ActivatePlst);
    }

    #[test]
    fn gaps_in_the_table_are_opcode_errors() {
        for code in [0u16, 1, 3, 5, 11, 30, 42, 44, 47, 0xFFFF] {
            assert!(matches!(
                Opcode::try_from(code),
                Err(ScriptError::UnknownOpcode(c)) if c == code
            ));
        }
    }

    #[test]
    fn short_operand_lists_are_rejected() {
        let err = Opcode::ScheduleMovieCommand
            .check_operands(&[1, 0, 0])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "opcode ScheduleMovieCommand expects 4 operands, got 3"
        );
        assert!(Opcode::Refresh.check_operands(&[]).is_ok());
    }
}
