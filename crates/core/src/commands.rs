//! Command ids accepted by the media player entity and what they do.

/// Operation behind a media player command id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaCommand {
    On,
    Off,
    Toggle,
    PlayPause,
    Next,
    Previous,
    /// Absolute volume, `volume` parameter in percent
    Volume,
    VolumeUp,
    VolumeDown,
    MuteToggle,
    Mute,
    Unmute,
    /// `source` parameter
    SelectSource,
    /// `mode` parameter
    SelectSoundMode,
    /// Protocol command sent as-is
    Raw(&'static str),
}

pub const MEDIA_PLAYER_COMMANDS: &[(&str, MediaCommand)] = &[
    ("on", MediaCommand::On),
    ("off", MediaCommand::Off),
    ("toggle", MediaCommand::Toggle),
    ("play_pause", MediaCommand::PlayPause),
    ("next", MediaCommand::Next),
    ("previous", MediaCommand::Previous),
    ("volume", MediaCommand::Volume),
    ("volume_up", MediaCommand::VolumeUp),
    ("volume_down", MediaCommand::VolumeDown),
    ("mute_toggle", MediaCommand::MuteToggle),
    ("mute", MediaCommand::Mute),
    ("unmute", MediaCommand::Unmute),
    ("select_source", MediaCommand::SelectSource),
    ("select_sound_mode", MediaCommand::SelectSoundMode),
    ("cursor_up", MediaCommand::Raw("MNCUP")),
    ("cursor_down", MediaCommand::Raw("MNCDN")),
    ("cursor_left", MediaCommand::Raw("MNCLT")),
    ("cursor_right", MediaCommand::Raw("MNCRT")),
    ("cursor_enter", MediaCommand::Raw("MNENT")),
    ("back", MediaCommand::Raw("MNRTN")),
    ("menu", MediaCommand::Raw("MNMEN ON")),
    ("context_menu", MediaCommand::Raw("MNOPT")),
    ("info", MediaCommand::Raw("MNINF")),
    ("OUTPUT_1", MediaCommand::Raw("VSMONI1")),
    ("OUTPUT_2", MediaCommand::Raw("VSMONI2")),
    ("OUTPUT_AUTO", MediaCommand::Raw("VSMONIAUTO")),
];

/// Extra commands announced to the remote besides the standard features.
pub const SIMPLE_COMMANDS: &[&str] = &["OUTPUT_1", "OUTPUT_2", "OUTPUT_AUTO"];

pub fn media_command(cmd_id: &str) -> Option<MediaCommand> {
    MEDIA_PLAYER_COMMANDS
        .iter()
        .find(|(id, _)| *id == cmd_id)
        .map(|(_, command)| *command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_lookup() {
        assert_eq!(media_command("on"), Some(MediaCommand::On));
        assert_eq!(media_command("cursor_up"), Some(MediaCommand::Raw("MNCUP")));
        assert_eq!(media_command("OUTPUT_AUTO"), Some(MediaCommand::Raw("VSMONIAUTO")));
        assert_eq!(media_command("output_auto"), None);
        assert_eq!(media_command("shuffle"), None);
    }

    #[test]
    fn test_command_ids_are_unique() {
        let ids: HashSet<&str> = MEDIA_PLAYER_COMMANDS.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), MEDIA_PLAYER_COMMANDS.len());
    }

    #[test]
    fn test_simple_commands_are_mapped() {
        for id in SIMPLE_COMMANDS {
            assert!(media_command(id).is_some(), "{} has no mapping", id);
        }
    }
}
