use crate::lut::ParseError;
use crate::packer::BOARD_SEGMENTS;
use crate::segment::BoardType;
use crate::signal::Tick;
use thiserror::Error;

/// Setup failures. These are reported once, before any event is simulated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{board} segments need a {expected}-bit LUT, got a {found}-bit one")]
    LutWidth {
        board: BoardType,
        expected: u32,
        found: u32,
    },
    #[error("segment count {0} is not a positive multiple of {board}", board = BOARD_SEGMENTS)]
    SegmentCount(usize),
    #[error("{0} segments give tracker local ids that do not fit in 8 bits")]
    LocalIdOverflow(usize),
    #[error("maximum number of hits on the {0} bus must be positive")]
    ZeroMaxHit(&'static str),
    #[error("empty clock window [{min}, {max}]")]
    ClockWindow { min: Tick, max: Tick },
    #[error(
        "signal bundle holds {found} {found_board} segments, \
         super layer has {expected} {expected_board} segments"
    )]
    BundleShape {
        expected_board: BoardType,
        expected: usize,
        found_board: BoardType,
        found: usize,
    },
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse LUT:\n{0}")]
    Lut(#[from] ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
