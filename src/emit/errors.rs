use std::fmt;

/// Recoverable compile-time limits, reported against the source line that was
/// current when the limit was hit
///
/// Internal consistency failures (label drift between passes, writes past the
/// end of the sized buffer, operand-stack underflow) are compiler bugs and
/// assert instead.
#[derive(Debug)]
pub enum EmitError {
    /// A label id outside the range the emitter was created with
    TooManyLabels { label: usize, max: usize, line: usize },

    /// More cell locals than the one-byte prelude count can hold
    TooManyCells { count: usize, line: usize },

    /// A cell's local slot does not fit the one-byte prelude entry
    LocalSlotOverflow { slot: usize, line: usize },

    /// Closed-over count does not fit the one-byte closure operand
    TooManyClosedOver { count: usize, line: usize },

    /// `num_locals + stack_size` does not fit the 16-bit prelude field
    FrameTooLarge { slots: usize, line: usize },

    /// Exception-stack depth does not fit the 16-bit prelude field
    ExcStackTooLarge { depth: usize, line: usize },
}

impl fmt::Display for EmitError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitError::TooManyLabels { label, max, line } => write!(
                formatter,
                "line {}: label {} out of range (maximum {})",
                line, label, max
            ),
            EmitError::TooManyCells { count, line } => write!(
                formatter,
                "line {}: {} cell variables (maximum 255)",
                line, count
            ),
            EmitError::LocalSlotOverflow { slot, line } => write!(
                formatter,
                "line {}: cell local slot {} does not fit one byte",
                line, slot
            ),
            EmitError::TooManyClosedOver { count, line } => write!(
                formatter,
                "line {}: {} closed-over variables (maximum 255)",
                line, count
            ),
            EmitError::FrameTooLarge { slots, line } => write!(
                formatter,
                "line {}: frame needs {} state slots (maximum 65535)",
                line, slots
            ),
            EmitError::ExcStackTooLarge { depth, line } => write!(
                formatter,
                "line {}: exception stack depth {} (maximum 65535)",
                line, depth
            ),
        }
    }
}
