use crate::signal::Tick;
use crate::tsf::{EventTimeWord, SegmentOutput, Timeline, TrackerWord};
use bitvec::field::BitField;
use bitvec::prelude::{BitSlice, BitVec, Lsb0};
use serde::{Deserialize, Serialize};

/// Track segments handled by one merger board, i.e. one event-time bus.
pub const BOARD_SEGMENTS: usize = 16;
/// Width of the local segment id prepended to tracker words.
pub const LOCAL_ID_BITS: u32 = 8;
/// Width of the fastest time on the event-time bus.
pub const FASTEST_TIME_BITS: u32 = 9;
/// 2D tracker modules a super layer is distributed to.
pub const QUADRANTS: usize = 4;

/// Layout of one tracker bus slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotFormat {
    /// Local id above the tracker word.
    #[default]
    WithId,
    /// The bare tracker word.
    Legacy,
}

impl SlotFormat {
    pub fn width(self) -> usize {
        match self {
            SlotFormat::WithId => (LOCAL_ID_BITS + TrackerWord::WIDTH) as usize,
            SlotFormat::Legacy => TrackerWord::WIDTH as usize,
        }
    }
    fn slot(self, local_id: u8, word: TrackerWord) -> u32 {
        match self {
            SlotFormat::WithId => {
                (u32::from(local_id) << TrackerWord::WIDTH) | u32::from(word.bits())
            }
            SlotFormat::Legacy => u32::from(word.bits()),
        }
    }
}

/// Shape of a tracker bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusFormat {
    pub slot: SlotFormat,
    /// Number of slots. Inputs beyond this many are dropped.
    pub max_hit: usize,
}

impl BusFormat {
    pub fn width(&self) -> usize {
        self.slot.width() * self.max_hit
    }
}

type Frame = BitVec<u64, Lsb0>;

/// A fixed-width output bus over time. Only clocks with at least one active
/// input carry a frame; the bus is all zero everywhere else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bus {
    width: usize,
    frames: Vec<(Tick, Frame)>,
    overflows: Vec<(Tick, usize)>,
}

impl Bus {
    fn new(width: usize) -> Self {
        Self {
            width,
            frames: Vec::new(),
            overflows: Vec::new(),
        }
    }
    pub fn width(&self) -> usize {
        self.width
    }
    pub fn frames(&self) -> impl Iterator<Item = (Tick, &BitSlice<u64, Lsb0>)> + '_ {
        self.frames.iter().map(|(t, f)| (*t, f.as_bitslice()))
    }
    /// The bus content at `tick`, if it carries anything.
    pub fn frame(&self, tick: Tick) -> Option<&BitSlice<u64, Lsb0>> {
        self.frames
            .binary_search_by_key(&tick, |(t, _)| *t)
            .ok()
            .map(|i| self.frames[i].1.as_bitslice())
    }
    /// Reads `len` bits at bit `offset` of the bus at `tick`.
    ///
    /// # Panics
    ///
    /// Panics if the field does not fit in the bus or is wider than 32 bits.
    pub fn field(&self, tick: Tick, offset: usize, len: usize) -> u32 {
        assert!(len <= 32 && offset + len <= self.width);
        self.frame(tick)
            .map_or(0, |frame| frame[offset..offset + len].load_le())
    }
    /// Clocks at which inputs were dropped, with how many were.
    pub fn overflows(&self) -> &[(Tick, usize)] {
        &self.overflows
    }
}

fn union_ticks<'a, W: Copy + 'a>(timelines: impl Iterator<Item = &'a Timeline<W>>) -> Vec<Tick> {
    let mut ticks: Vec<_> = timelines.flat_map(|t| t.ticks()).collect();
    ticks.sort_unstable();
    ticks.dedup();
    ticks
}

/// Packs tracker words onto a bus of `format`.
///
/// Inputs are ranked by ascending local id. At each clock the first
/// `format.max_hit` inputs with a word fill slots `0..`, slot `k` sitting at
/// bit offset `slot_width * (max_hit - 1 - k)`; the remaining ones are lost.
///
/// # Examples
///
/// ```
/// use tsf::lut::LrClass;
/// use tsf::packer::{pack_tracker, BusFormat, SlotFormat};
/// use tsf::tsf::{HitPos, Timeline, TrackerWord};
///
/// let word = TrackerWord::new(5, LrClass::Right, HitPos::Center);
/// let mut timeline = Timeline::new();
/// timeline.set(10, word);
///
/// let format = BusFormat { slot: SlotFormat::WithId, max_hit: 2 };
/// let bus = pack_tracker(&[(7, &timeline)], format);
/// assert_eq!(bus.width(), 42);
/// assert_eq!(bus.field(10, 21, 21), 7 << 13 | u32::from(word.bits()));
/// assert_eq!(bus.field(10, 0, 21), 0);
/// ```
pub fn pack_tracker(inputs: &[(u8, &Timeline<TrackerWord>)], format: BusFormat) -> Bus {
    let mut inputs = inputs.to_vec();
    inputs.sort_by_key(|&(id, _)| id);

    let slot_width = format.slot.width();
    let mut bus = Bus::new(format.width());
    for tick in union_ticks(inputs.iter().map(|(_, t)| *t)) {
        let mut frame = Frame::repeat(false, bus.width);
        let mut hits = inputs
            .iter()
            .filter_map(|&(id, timeline)| timeline.at(tick).map(|word| (id, word)));

        for (k, (id, word)) in hits.by_ref().take(format.max_hit).enumerate() {
            let offset = slot_width * (format.max_hit - 1 - k);
            frame[offset..offset + slot_width].store_le(format.slot.slot(id, word));
        }
        let dropped = hits.count();
        if dropped > 0 {
            log::debug!("tracker bus full at clk={tick}, dropped {dropped} segment(s)");
            bus.overflows.push((tick, dropped));
        }
        bus.frames.push((tick, frame));
    }

    bus
}

/// Packs the event-time words of the segments of one merger board.
///
/// The bus is `n + 9 * max_hit` bits wide for `n` inputs. Bit `9 * max_hit +
/// i` flags input `i` as active at that clock, whether or not its time fits.
/// Slot `k` at offset `9 * (max_hit - 1 - k)` holds the fastest time of the
/// `k`-th active input.
pub fn pack_event_time(inputs: &[&Timeline<EventTimeWord>], max_hit: usize) -> Bus {
    let slot_width = FASTEST_TIME_BITS as usize;
    let flags = slot_width * max_hit;
    let mut bus = Bus::new(flags + inputs.len());

    for tick in union_ticks(inputs.iter().copied()) {
        let mut frame = Frame::repeat(false, bus.width);
        let mut filled = 0;
        for (i, timeline) in inputs.iter().enumerate() {
            let Some(word) = timeline.at(tick) else {
                continue;
            };
            frame.set(flags + i, true);
            if filled < max_hit {
                let offset = slot_width * (max_hit - 1 - filled);
                frame[offset..offset + slot_width].store_le(word.fastest());
            }
            filled += 1;
        }
        if filled > max_hit {
            log::debug!(
                "event time bus full at clk={tick}, dropped {} segment(s)",
                filled - max_hit
            );
            bus.overflows.push((tick, filled - max_hit));
        }
        bus.frames.push((tick, frame));
    }

    bus
}

/// The two trackers segment `segment` of a super layer with `segments`
/// segments is sent to, with its local id on each.
///
/// Tracker `p` covers quarter `p` and the quarter after it, so every segment
/// goes to the tracker of its own quarter and to the one before.
///
/// # Panics
///
/// Panics if `segments` is smaller than [`QUADRANTS`] or `segment` is out of
/// range.
///
/// # Examples
///
/// ```
/// use tsf::packer::quadrant_targets;
///
/// // 160 segments: quarters of 40.
/// assert_eq!(quadrant_targets(0, 160), [(0, 0), (3, 40)]);
/// assert_eq!(quadrant_targets(45, 160), [(1, 5), (0, 45)]);
/// ```
pub fn quadrant_targets(segment: usize, segments: usize) -> [(usize, u8); 2] {
    assert!(
        segments >= QUADRANTS && segment < segments,
        "segment {segment} of {segments} cannot be split into quadrants"
    );
    let quarter = segments / QUADRANTS;
    let own = segment / quarter;
    let previous = (own + QUADRANTS - 1) % QUADRANTS;
    let local_id = |tracker: usize| {
        // Fits: segments are validated to give ids below 256.
        ((segment + segments - tracker * quarter) % segments) as u8
    };

    [(own, local_id(own)), (previous, local_id(previous))]
}

/// Packs the tracker words of a whole super layer onto the four tracker
/// buses. `outputs` is indexed by local segment id.
pub fn pack_quadrants(outputs: &[SegmentOutput], format: BusFormat) -> [Bus; QUADRANTS] {
    let mut inputs: [Vec<(u8, &Timeline<TrackerWord>)>; QUADRANTS] = Default::default();
    for (segment, output) in outputs.iter().enumerate() {
        for (tracker, local_id) in quadrant_targets(segment, outputs.len()) {
            inputs[tracker].push((local_id, &output.tracker));
        }
    }

    inputs.map(|inputs| pack_tracker(&inputs, format))
}

/// Packs the event-time words of a super layer, one bus per merger board.
pub fn pack_boards(outputs: &[SegmentOutput], max_hit: usize) -> Vec<Bus> {
    outputs
        .chunks(BOARD_SEGMENTS)
        .map(|board| {
            let inputs: Vec<_> = board.iter().map(|o| &o.event_time).collect();
            pack_event_time(&inputs, max_hit)
        })
        .collect()
}
