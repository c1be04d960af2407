use crate::signal::{Signal, SignalVector, Tick};
use crate::tsf::{HitPos, SHAPING_WINDOW};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire layers of a super layer that feed a track segment.
pub const LAYERS: usize = 5;
/// Width of the priority-time and fastest-time fine timing values.
pub const TIMING_BITS: usize = 4;

/// The two track segment finder board types. They differ only in the shape of
/// their segments, see [`SegmentLayout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardType {
    /// Super layer 0: 15-wire pyramid segments with the priority wire on the
    /// innermost layer.
    Inner,
    /// Super layers 1 to 8: 11-wire hourglass segments with the priority
    /// wire in the middle layer.
    Outer,
}

impl BoardType {
    pub fn layout(self) -> &'static SegmentLayout {
        match self {
            BoardType::Inner => &INNER,
            BoardType::Outer => &OUTER,
        }
    }
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardType::Inner => write!(f, "inner"),
            BoardType::Outer => write!(f, "outer"),
        }
    }
}

/// Position of a wire relative to the priority cell of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireOffset {
    pub layer: usize,
    /// Cell offset within the layer. Wraps around the super layer.
    pub cell: isize,
}

const fn w(layer: usize, cell: isize) -> WireOffset {
    WireOffset { layer, cell }
}

/// Shape of a track segment: its wires in pattern bit order and which of them
/// are the priority (center) and second-priority (right/left) wires.
#[derive(Debug, PartialEq, Eq)]
pub struct SegmentLayout {
    pub wires: &'static [WireOffset],
    pub center: usize,
    pub right: usize,
    pub left: usize,
}

impl SegmentLayout {
    pub fn wire_count(&self) -> usize {
        self.wires.len()
    }
    /// Width of the wire patterns, i.e. of the LUT index.
    pub fn pattern_width(&self) -> u32 {
        self.wires.len() as u32
    }
    /// Second-priority wires in the order they are examined. When both rise
    /// at the same clock the lower pattern bit wins.
    pub fn adjacent(&self) -> [(usize, HitPos); 2] {
        let right = (self.right, HitPos::Right);
        let left = (self.left, HitPos::Left);
        if self.right < self.left {
            [right, left]
        } else {
            [left, right]
        }
    }
}

static INNER: SegmentLayout = SegmentLayout {
    wires: &[
        w(0, 0),
        w(1, -1),
        w(1, 0),
        w(2, -1),
        w(2, 0),
        w(2, 1),
        w(3, -2),
        w(3, -1),
        w(3, 0),
        w(3, 1),
        w(4, -2),
        w(4, -1),
        w(4, 0),
        w(4, 1),
        w(4, 2),
    ],
    center: 0,
    right: 1,
    left: 2,
};

static OUTER: SegmentLayout = SegmentLayout {
    wires: &[
        w(0, -1),
        w(0, 0),
        w(0, 1),
        w(1, -1),
        w(1, 0),
        w(2, 0),
        w(3, -1),
        w(3, 0),
        w(4, -1),
        w(4, 0),
        w(4, 1),
    ],
    center: 5,
    right: 6,
    left: 7,
};

/// All input signals of one super layer for one event.
///
/// Wire signals are stored layer by layer; segments refer to them by index.
/// Priority-time and fastest-time values are [`TIMING_BITS`] wide and come
/// from the merger boards, one of each per segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireSignalBundle {
    board: BoardType,
    segments: usize,
    wires: Vec<Signal>,
    priority_time: Vec<SignalVector>,
    fastest_time: Vec<SignalVector>,
}

impl WireSignalBundle {
    /// Creates a bundle with every signal inactive. Each layer has one cell
    /// per segment.
    pub fn new(board: BoardType, segments: usize) -> Self {
        Self {
            board,
            segments,
            wires: vec![Signal::new(); LAYERS * segments],
            priority_time: vec![SignalVector::with_width(TIMING_BITS); segments],
            fastest_time: vec![SignalVector::with_width(TIMING_BITS); segments],
        }
    }
    pub fn board(&self) -> BoardType {
        self.board
    }
    pub fn segments(&self) -> usize {
        self.segments
    }
    /// # Panics
    ///
    /// Panics if `layer` or `cell` is out of range.
    pub fn wire(&self, layer: usize, cell: usize) -> &Signal {
        &self.wires[self.wire_index(layer, cell)]
    }
    /// # Panics
    ///
    /// Panics if `layer` or `cell` is out of range.
    pub fn wire_mut(&mut self, layer: usize, cell: usize) -> &mut Signal {
        let index = self.wire_index(layer, cell);
        &mut self.wires[index]
    }
    /// Drives the priority time of `segment` to `value` during `rise..fall`.
    pub fn set_priority_time(&mut self, segment: usize, rise: Tick, fall: Tick, value: u8) {
        self.priority_time[segment].set_value(rise, fall, u32::from(value));
    }
    /// Drives the fastest time of `segment` to `value` during `rise..fall`.
    pub fn set_fastest_time(&mut self, segment: usize, rise: Tick, fall: Tick, value: u8) {
        self.fastest_time[segment].set_value(rise, fall, u32::from(value));
    }
    pub fn priority_time(&self, segment: usize) -> &SignalVector {
        &self.priority_time[segment]
    }
    pub fn fastest_time(&self, segment: usize) -> &SignalVector {
        &self.fastest_time[segment]
    }

    fn wire_index(&self, layer: usize, cell: usize) -> usize {
        assert!(layer < LAYERS && cell < self.segments);
        layer * self.segments + cell
    }
}

/// A track segment of a super layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackSegment {
    local_id: usize,
    global_id: usize,
    // Indices into the wire arena of a `WireSignalBundle`, in pattern bit
    // order.
    wires: Vec<usize>,
}

impl TrackSegment {
    /// Creates segment `local_id` of a super layer with `segments` cells per
    /// layer whose first segment has global id `global_offset`.
    pub fn new(
        layout: &SegmentLayout,
        local_id: usize,
        segments: usize,
        global_offset: usize,
    ) -> Self {
        let wires = layout
            .wires
            .iter()
            .map(|wire| {
                let cell = (local_id as isize + wire.cell).rem_euclid(segments as isize);
                wire.layer * segments + cell as usize
            })
            .collect();

        Self {
            local_id,
            global_id: global_offset + local_id,
            wires,
        }
    }
    pub fn local_id(&self) -> usize {
        self.local_id
    }
    pub fn global_id(&self) -> usize {
        self.global_id
    }
    /// Arena indices of the segment wires, in pattern bit order.
    pub fn wires(&self) -> &[usize] {
        &self.wires
    }
    /// Borrows the signals of this segment out of `bundle`.
    ///
    /// # Panics
    ///
    /// Panics if `bundle` is smaller than the super layer this segment was
    /// created for.
    pub fn view<'a>(&'a self, bundle: &'a WireSignalBundle) -> SegmentView<'a> {
        assert!(
            self.local_id < bundle.segments
                && self.wires.iter().all(|&i| i < bundle.wires.len()),
            "TS{} does not fit a bundle of {} segments",
            self.local_id,
            bundle.segments
        );
        SegmentView {
            segment: self,
            bundle,
        }
    }
}

/// Read-only view of the inputs of one segment.
#[derive(Clone, Copy, Debug)]
pub struct SegmentView<'a> {
    segment: &'a TrackSegment,
    bundle: &'a WireSignalBundle,
}

impl<'a> SegmentView<'a> {
    pub fn segment(&self) -> &'a TrackSegment {
        self.segment
    }
    pub fn layout(&self) -> &'static SegmentLayout {
        self.bundle.board.layout()
    }
    /// The segment wires shaped to the TS window. Its value at a clock is the
    /// hit pattern.
    pub fn hit_map(&self) -> SignalVector {
        let mut hit_map: SignalVector = self
            .segment
            .wires
            .iter()
            .map(|&i| self.bundle.wires[i].clone())
            .collect();
        hit_map.widen(SHAPING_WINDOW);
        hit_map
    }
    pub fn priority_time(&self) -> &'a SignalVector {
        self.bundle.priority_time(self.segment.local_id)
    }
    pub fn fastest_time(&self) -> &'a SignalVector {
        self.bundle.fastest_time(self.segment.local_id)
    }
}
