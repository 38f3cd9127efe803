use crate::viewer::StatDisplay;

/// One step of user input in the interactive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Up,
    Down,
    JoinView,
    IndentToggle,
    ToggleStat(StatDisplay),
    NextStat,
    PrevStat,
    ToggleParallel,
    ToggleSql,
    ToggleSettings,
    ToggleSettingsType,
    SettingsUp,
    SettingsDown,
    SettingIncrement,
    SettingDecrement,
    ReExecute,
    Cancel,
    PrevRun,
    NextRun,
    Help,
    Quit,
}

/// Key, description and command, in help order.
pub const BINDINGS: &[(char, &str, Command)] = &[
    ('k', "move up", Command::Up),
    ('j', "move down", Command::Down),
    ('J', "join view", Command::JoinView),
    ('I', "indent toggle", Command::IndentToggle),
    ('R', "toggle rows", Command::ToggleStat(StatDisplay::Rows)),
    ('B', "toggle buffers", Command::ToggleStat(StatDisplay::Buffers)),
    ('C', "toggle costs", Command::ToggleStat(StatDisplay::Cost)),
    ('T', "toggle times", Command::ToggleStat(StatDisplay::Time)),
    (']', "next stat display", Command::NextStat),
    ('[', "previous stat display", Command::PrevStat),
    ('P', "toggle parallel", Command::ToggleParallel),
    ('D', "toggle display sql", Command::ToggleSql),
    ('S', "toggle settings", Command::ToggleSettings),
    ('s', "toggle settings type", Command::ToggleSettingsType),
    ('<', "settings up", Command::SettingsUp),
    ('>', "settings down", Command::SettingsDown),
    ('+', "raise next-run setting", Command::SettingIncrement),
    ('-', "lower next-run setting", Command::SettingDecrement),
    ('X', "re-execute query", Command::ReExecute),
    ('c', "cancel running query", Command::Cancel),
    ('{', "previous query run", Command::PrevRun),
    ('}', "next query run", Command::NextRun),
    ('?', "toggle help", Command::Help),
    ('q', "quit", Command::Quit),
];

impl Command {
    pub fn from_key(key: char) -> Option<Command> {
        BINDINGS
            .iter()
            .find(|(k, _, _)| *k == key)
            .map(|(_, _, command)| *command)
    }

    /// Every character of `line` is one command; unknown characters and
    /// whitespace are skipped. An empty line means "redraw".
    pub fn parse_line(line: &str) -> Vec<Command> {
        line.chars().filter_map(Command::from_key).collect()
    }
}
