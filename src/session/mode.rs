use std::fmt;

/// Interactive mode of a session. `Exit` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Insert,
    Select,
    Command,
    Sleep,
    Exit,
}

impl Mode {
    /// Mode a session starts in.
    pub fn initial(has_query: bool) -> Self {
        if has_query {
            Self::Select
        } else {
            Self::Insert
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Select => "SELECT",
            Self::Command => "COMMAND",
            Self::Sleep => "SLEEP",
            Self::Exit => "EXIT",
        }
    }

    pub fn is_awake(&self) -> bool {
        !matches!(self, Self::Sleep | Self::Exit)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
