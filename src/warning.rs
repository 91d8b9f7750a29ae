//! Non-fatal data warnings.

use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

/// Non-fatal condition detected while sorting. The affected bytes are dropped and sorting goes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Input ends with bytes that do not form a full record.
    TrailingBytes {
        /// Input offset of the first dropped byte.
        offset: u64,
        /// Number of dropped bytes.
        discarded: usize,
    },
    /// A merge cursor refill read a byte count that is not a whole number of records.
    MisalignedRefill {
        /// File offset of the first dropped byte.
        offset: u64,
        /// Number of dropped bytes.
        discarded: usize,
    },
}

impl Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Warning::TrailingBytes { offset, discarded } => write!(
                f,
                "trailing {} bytes at end of file (offset {}) do not form a full record, ignored",
                discarded, offset
            ),
            Warning::MisalignedRefill { offset, discarded } => write!(
                f,
                "{} bytes at offset {} do not form a full record, ignored",
                discarded, offset
            ),
        }
    }
}

/// Warning callback injected into the sorter.
pub type WarningHandler = Arc<dyn Fn(&Warning) + Send + Sync>;

/// Borrowed warning callback handed to merge components.
pub type WarningFn<'a> = &'a (dyn Fn(&Warning) + Send + Sync);

/// Returns a warning handler forwarding warnings to the `log` facade.
pub fn log_handler() -> WarningHandler {
    Arc::new(|warning: &Warning| log::warn!("{}", warning))
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::Warning;

    #[rstest]
    #[case(
        Warning::TrailingBytes { offset: 4000, discarded: 3 },
        "trailing 3 bytes at end of file (offset 4000) do not form a full record, ignored",
    )]
    #[case(
        Warning::MisalignedRefill { offset: 16, discarded: 2 },
        "2 bytes at offset 16 do not form a full record, ignored",
    )]
    fn test_warning_message(#[case] warning: Warning, #[case] expected: &str) {
        assert_eq!(warning.to_string(), expected);
    }
}
