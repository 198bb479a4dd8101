//! Command text handling: normalization, kind detection, processing windows.

use core::fmt::{self, Write as _};
use core::time::Duration;

use heapless::String;

/// Longest command text accepted from a caller, after trimming.
pub const MAX_COMMAND_LEN: usize = 32;

/// Time a peripheral needs to produce a reading.
pub const READ_WINDOW: Duration = Duration::from_millis(1000);
/// Time a peripheral needs to apply a calibration point.
pub const CALIBRATION_WINDOW: Duration = Duration::from_millis(1000);
/// Time a peripheral needs to latch a compensation value.
pub const COMPENSATION_WINDOW: Duration = Duration::from_millis(300);
/// Time a peripheral needs for any other command.
pub const COMMAND_WINDOW: Duration = Duration::from_millis(300);

/// Command text the peripheral interprets as "take a reading".
pub const READ_COMMAND: &str = "R";
/// Prefix of the combined "compensate, then read" command.
pub const COMPENSATED_READ_PREFIX: &str = "RT,";

/// Capacity of a formatted compensation command (`T,` plus any `f32` at three decimals).
pub const COMPENSATION_COMMAND_LEN: usize = 48;

/// Normalized, bounded command text.
pub type CommandText = String<MAX_COMMAND_LEN>;

/// Broad category of a command, which decides the processing window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandKind {
    Read,
    Calibration,
    Compensation,
    Other,
}

impl CommandKind {
    /// Detects the kind from normalized command text.
    #[must_use]
    pub fn classify(text: &str) -> Self {
        if text == READ_COMMAND || text.starts_with(COMPENSATED_READ_PREFIX) {
            Self::Read
        } else if text.starts_with("CAL") {
            Self::Calibration
        } else if text.starts_with("T,") {
            Self::Compensation
        } else {
            Self::Other
        }
    }

    /// Minimum delay between sending this kind of command and reading its response.
    #[must_use]
    pub const fn processing_window(self) -> Duration {
        match self {
            Self::Read => READ_WINDOW,
            Self::Calibration => CALIBRATION_WINDOW,
            Self::Compensation => COMPENSATION_WINDOW,
            Self::Other => COMMAND_WINDOW,
        }
    }
}

/// Reasons raw command text cannot be normalized.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandError {
    Empty,
    TooLong { len: usize },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Empty => write!(f, "command is empty"),
            CommandError::TooLong { len } => {
                write!(f, "command is {len} bytes, limit is {MAX_COMMAND_LEN}")
            }
        }
    }
}

/// Trims surrounding whitespace and uppercases the command text.
///
/// # Errors
///
/// Returns [`CommandError::Empty`] when nothing remains after trimming and
/// [`CommandError::TooLong`] when the trimmed text exceeds [`MAX_COMMAND_LEN`].
pub fn normalize(raw: &str) -> Result<CommandText, CommandError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Empty);
    }
    if trimmed.len() > MAX_COMMAND_LEN {
        return Err(CommandError::TooLong { len: trimmed.len() });
    }

    let mut text = CommandText::new();
    for ch in trimmed.chars() {
        text.push(ch.to_ascii_uppercase())
            .map_err(|_| CommandError::TooLong { len: trimmed.len() })?;
    }
    Ok(text)
}

/// Formats the compensation command carrying `value` with three decimals.
#[must_use]
pub fn compensation_command(value: f32) -> String<COMPENSATION_COMMAND_LEN> {
    let mut text = String::new();
    // Capacity covers the widest finite f32; non-finite values never reach here.
    let _ = write!(text, "T,{value:.3}");
    text
}

/// Peripheral a command is addressed to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandTarget<'a> {
    /// Peripheral selected by its registry name.
    Named(&'a str),
    /// The registry's configured default peripheral, if any.
    Default,
}

/// Directive to one peripheral.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command<'a, TInstant> {
    pub target: CommandTarget<'a>,
    pub text: CommandText,
    pub issued_at: TInstant,
}

impl<'a, TInstant> Command<'a, TInstant> {
    /// Normalizes `raw` and stamps it with `issued_at`.
    ///
    /// # Errors
    ///
    /// Propagates [`normalize`] failures.
    pub fn new(
        target: CommandTarget<'a>,
        raw: &str,
        issued_at: TInstant,
    ) -> Result<Self, CommandError> {
        Ok(Self {
            target,
            text: normalize(raw)?,
            issued_at,
        })
    }

    /// Kind derived from the normalized text.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        CommandKind::classify(&self.text)
    }
}
