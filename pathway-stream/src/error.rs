//! Error types for the event log.

use crate::traits::Offset;

/// Error type for event log operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The offset was never delivered to this consumer, or was already settled.
    #[error("offset {0} is not in flight for this consumer")]
    NotInFlight(Offset),

    /// The offset lies beyond the end of the log.
    #[error("offset {offset} is past the high water mark {high_water_mark}")]
    OutOfRange {
        offset: Offset,
        high_water_mark: Offset,
    },
}

/// Result type alias for event log operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_in_flight_names_offset() {
        let err = Error::NotInFlight(42);
        assert_eq!(err.to_string(), "offset 42 is not in flight for this consumer");
    }

    #[test]
    fn out_of_range_names_both_offsets() {
        let err = Error::OutOfRange {
            offset: 9,
            high_water_mark: 3,
        };
        assert!(err.to_string().contains('9'));
        assert!(err.to_string().contains('3'));
    }
}
