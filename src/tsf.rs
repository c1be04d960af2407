use crate::lut::{LrClass, Lut};
use crate::segment::SegmentView;
use crate::signal::{Clock, Tick};
use crate::Observer;

/// Number of clocks a hit keeps the finder state machines armed. Matches the
/// shaping time of the TS input signals.
pub const SHAPING_WINDOW: Tick = 16;

/// Which priority wire of a segment was hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HitPos {
    #[default]
    None = 0,
    /// Right second-priority wire.
    Right = 1,
    /// Left second-priority wire.
    Left = 2,
    /// Priority (center) wire.
    Center = 3,
}

impl HitPos {
    /// Decodes the two least significant bits of `bits`.
    pub fn from_low_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => HitPos::None,
            1 => HitPos::Right,
            2 => HitPos::Left,
            _ => HitPos::Center,
        }
    }
    pub fn bits(self) -> u8 {
        self as u8
    }
}

// 5-bit clock counter on top of a 4-bit fine time.
fn timing_value(clock_counter: u32, fine: u32) -> u16 {
    (((clock_counter & 0x1f) << 4) | (fine & 0xf)) as u16
}

/// Output of a segment towards the 2D tracker.
///
/// Layout (13 bits): `timing[12:4] | lut[3:2] | hit_pos[1:0]`, where the
/// timing is the 5-bit clock counter above the 4-bit priority time.
///
/// # Examples
///
/// ```
/// use tsf::lut::LrClass;
/// use tsf::tsf::{HitPos, TrackerWord};
///
/// let word = TrackerWord::new(0b00011_0101, LrClass::Left, HitPos::Center);
/// assert_eq!(word.bits(), 0b00011_0101_10_11);
/// assert_eq!(word.priority_time(), 0b0101);
/// assert_eq!(word.clock_counter(), 3);
/// assert_eq!(word.lr(), LrClass::Left);
/// assert_eq!(word.hit_pos(), HitPos::Center);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackerWord(u16);

impl TrackerWord {
    pub const WIDTH: u32 = 13;

    pub fn new(timing: u16, lr: LrClass, hit_pos: HitPos) -> Self {
        Self(((timing & 0x1ff) << 4) | (u16::from(lr.bits()) << 2) | u16::from(hit_pos.bits()))
    }
    pub fn from_bits(bits: u16) -> Self {
        Self(bits & 0x1fff)
    }
    pub fn bits(self) -> u16 {
        self.0
    }
    /// 9-bit timing: clock counter and priority time.
    pub fn timing(self) -> u16 {
        self.0 >> 4
    }
    pub fn priority_time(self) -> u8 {
        (self.timing() & 0xf) as u8
    }
    pub fn clock_counter(self) -> u8 {
        (self.timing() >> 4) as u8
    }
    pub fn lr(self) -> LrClass {
        LrClass::from_low_bits((self.0 >> 2) as u8)
    }
    pub fn hit_pos(self) -> HitPos {
        HitPos::from_low_bits(self.0 as u8)
    }
}

/// Output of a segment towards the event-time and low-pT logic.
///
/// Layout (10 bits): `valid[9] | fastest[8:0]`, where the fastest time is the
/// 5-bit clock counter above the 4-bit fastest hit time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventTimeWord(u16);

impl EventTimeWord {
    pub const WIDTH: u32 = 10;
    const VALID: u16 = 1 << 9;

    /// A valid word carrying the 9-bit `fastest` time.
    pub fn new(fastest: u16) -> Self {
        Self(Self::VALID | (fastest & 0x1ff))
    }
    pub fn bits(self) -> u16 {
        self.0
    }
    pub fn fastest(self) -> u16 {
        self.0 & 0x1ff
    }
    pub fn is_valid(self) -> bool {
        self.0 & Self::VALID != 0
    }
}

/// A time series of output words, at most one per clock, in increasing clock
/// order. A word is on the bus for the single clock it is set at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeline<W> {
    entries: Vec<(Tick, W)>,
}

impl<W> Default for Timeline<W> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<W: Copy> Timeline<W> {
    pub fn new() -> Self {
        Self::default()
    }
    /// Puts `word` on the bus at `tick`, replacing any word already there.
    pub fn set(&mut self, tick: Tick, word: W) {
        match self.entries.binary_search_by_key(&tick, |&(t, _)| t) {
            Ok(i) => self.entries[i].1 = word,
            Err(i) => self.entries.insert(i, (tick, word)),
        }
    }
    /// The word on the bus at `tick`.
    pub fn at(&self, tick: Tick) -> Option<W> {
        self.entries
            .binary_search_by_key(&tick, |&(t, _)| t)
            .ok()
            .map(|i| self.entries[i].1)
    }
    pub fn ticks(&self) -> impl Iterator<Item = Tick> + '_ {
        self.entries.iter().map(|&(t, _)| t)
    }
    pub fn iter(&self) -> impl Iterator<Item = (Tick, W)> + '_ {
        self.entries.iter().copied()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rising edges of the priority wires at one clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PriorityEdges {
    pub center: bool,
    /// The second-priority wire that rose, if any.
    pub adjacent: Option<HitPos>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PositionState {
    #[default]
    Wait,
    /// The priority wire was hit.
    Active1st { found_at: Tick, timing: u16 },
    /// A second-priority wire was hit; the priority wire may still override.
    Active2nd {
        found_at: Tick,
        timing: u16,
        side: HitPos,
    },
}

/// Hit-position state machine. Remembers which priority wire of the segment
/// was hit and the timing captured then, for [`SHAPING_WINDOW`] clocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct HitPosition {
    state: PositionState,
}

impl HitPosition {
    pub fn new() -> Self {
        Self::default()
    }
    /// Advances the machine to `tick`. `timing` is the priority timing at
    /// `tick`, captured if a hit is found.
    pub fn step(&mut self, tick: Tick, edges: PriorityEdges, timing: u16) {
        // The hardware re-arms on the clock the window closes, which need not
        // be a clock we are called at.
        if self.counter(tick).is_some_and(|c| c >= SHAPING_WINDOW) {
            self.state = PositionState::Wait;
        }

        self.state = match self.state {
            PositionState::Wait | PositionState::Active2nd { .. } if edges.center => {
                PositionState::Active1st {
                    found_at: tick,
                    timing,
                }
            }
            PositionState::Wait => match edges.adjacent {
                Some(side) => PositionState::Active2nd {
                    found_at: tick,
                    timing,
                    side,
                },
                None => PositionState::Wait,
            },
            state => state,
        };
    }
    pub fn state(&self) -> PositionState {
        self.state
    }
    pub fn hit_pos(&self) -> HitPos {
        match self.state {
            PositionState::Wait => HitPos::None,
            PositionState::Active1st { .. } => HitPos::Center,
            PositionState::Active2nd { side, .. } => side,
        }
    }
    /// Timing captured with the current hit, 0 while waiting.
    pub fn timing(&self) -> u16 {
        match self.state {
            PositionState::Wait => 0,
            PositionState::Active1st { timing, .. } | PositionState::Active2nd { timing, .. } => {
                timing
            }
        }
    }
    /// Clocks elapsed since the current hit was found.
    pub fn counter(&self, tick: Tick) -> Option<Tick> {
        match self.state {
            PositionState::Wait => None,
            PositionState::Active1st { found_at, .. }
            | PositionState::Active2nd { found_at, .. } => Some(tick - found_at),
        }
    }
    /// Returns `true` if a hit position is known and its window is still open
    /// at `tick`.
    pub fn is_open(&self, tick: Tick) -> bool {
        self.hit_pos() != HitPos::None && self.counter(tick).is_some_and(|c| c < SHAPING_WINDOW)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LrState {
    #[default]
    Wait,
    /// Last accepted LUT value was left or right.
    Unambiguous { found_at: Tick },
    /// Last accepted LUT value was ambiguous.
    Ambiguous { found_at: Tick },
}

/// Left/right decision state machine. Decides which LUT values become a
/// tracker word so that one crossing is reported once per window, except that
/// an ambiguous report may be followed by an unambiguous one.
#[derive(Clone, Copy, Debug, Default)]
pub struct LrDecision {
    state: LrState,
}

impl LrDecision {
    pub fn new() -> Self {
        Self::default()
    }
    /// Advances the machine to `tick` with LUT value `lr`. Returns `true` if
    /// the value is accepted for output. Nothing is accepted while `gate` is
    /// closed; a rejected value leaves the machine unchanged.
    pub fn step(&mut self, tick: Tick, lr: LrClass, gate: bool) -> bool {
        if let LrState::Unambiguous { found_at } | LrState::Ambiguous { found_at } = self.state {
            if tick - found_at >= SHAPING_WINDOW {
                self.state = LrState::Wait;
            }
        }

        let accepted = gate
            && match self.state {
                LrState::Wait => lr.is_hit(),
                LrState::Ambiguous { .. } => lr.is_unambiguous(),
                LrState::Unambiguous { .. } => false,
            };
        if accepted {
            self.state = if lr.is_unambiguous() {
                LrState::Unambiguous { found_at: tick }
            } else {
                LrState::Ambiguous { found_at: tick }
            };
        }

        accepted
    }
    pub fn state(&self) -> LrState {
        self.state
    }
}

/// Fastest-timing tracker. Latches the fastest hit time once per window and
/// holds it until the LUT reports a segment.
///
/// The window starts armed at the first clock of the event, so nothing is
/// latched during the first [`SHAPING_WINDOW`] clocks.
#[derive(Clone, Copy, Debug)]
pub struct FastestTiming {
    last_fast_hit: Tick,
    pending: Option<EventTimeWord>,
}

impl FastestTiming {
    pub fn new(clock: &Clock) -> Self {
        Self {
            last_fast_hit: clock.min(),
            pending: None,
        }
    }
    /// Advances the tracker to `tick`. `active` tells whether any segment wire
    /// is hit, `fastest` is the fastest timing at `tick`.
    pub fn step(&mut self, tick: Tick, active: bool, fastest: u16) {
        if active && tick - self.last_fast_hit >= SHAPING_WINDOW {
            self.last_fast_hit = tick;
            self.pending = Some(EventTimeWord::new(fastest));
        }
    }
    /// Hands out the latched word if the LUT value `lr` reports a segment.
    pub fn take(&mut self, lr: LrClass) -> Option<EventTimeWord> {
        if lr.is_hit() {
            self.pending.take()
        } else {
            None
        }
    }
    pub fn last_fast_hit(&self) -> Tick {
        self.last_fast_hit
    }
}

/// What the finder saw and decided at one processed clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickTrace {
    pub pattern: u32,
    pub lr: LrClass,
    pub edges: PriorityEdges,
    pub hit_pos: HitPos,
    /// Clocks since the hit position was found.
    pub counter: Option<Tick>,
    pub position: PositionState,
    pub decision: LrState,
}

/// Both outputs of one segment for one event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentOutput {
    pub tracker: Timeline<TrackerWord>,
    pub event_time: Timeline<EventTimeWord>,
}

impl SegmentOutput {
    pub fn is_active(&self) -> bool {
        !self.tracker.is_empty() || !self.event_time.is_empty()
    }
}

/// Simulates the finder logic of one segment over one event.
///
/// Every clock inside the `clock` window at which the shaped hit map changes
/// is processed in increasing order. At each one the hit pattern is
/// classified by `lut`, then the fastest-timing tracker, the hit-position
/// machine and the left/right decision machine are advanced in that order.
pub fn simulate_segment<O>(
    view: &SegmentView<'_>,
    lut: &Lut,
    clock: &Clock,
    observer: &mut O,
) -> SegmentOutput
where
    O: Observer + ?Sized,
{
    let id = view.segment().local_id();
    let layout = view.layout();
    let hit_map = view.hit_map();
    let priority_time = view.priority_time();
    let fastest_time = view.fastest_time();
    let center = &hit_map[layout.center];
    let adjacent = layout.adjacent().map(|(wire, side)| (&hit_map[wire], side));

    let mut output = SegmentOutput::default();
    let mut fastest = FastestTiming::new(clock);
    let mut position = HitPosition::new();
    let mut decision = LrDecision::new();

    for tick in hit_map
        .state_changes()
        .into_iter()
        .filter(|&t| clock.contains(t))
    {
        let pattern = hit_map.state(tick);
        let lr = lut.classify(pattern);
        let counter = clock.counter(tick);

        fastest.step(
            tick,
            pattern != 0,
            timing_value(counter, fastest_time.state(tick)),
        );
        if let Some(word) = fastest.take(lr) {
            output.event_time.set(tick, word);
            observer.on_event_time(id, tick, word);
        }

        let edges = PriorityEdges {
            center: center.rise_edge(tick),
            adjacent: adjacent
                .iter()
                .find(|(wire, _)| wire.rise_edge(tick))
                .map(|&(_, side)| side),
        };
        position.step(tick, edges, timing_value(counter, priority_time.state(tick)));

        if decision.step(tick, lr, position.is_open(tick)) {
            let word = TrackerWord::new(position.timing(), lr, position.hit_pos());
            log::debug!(
                "TSF{id} clk={tick}: tracker word {:013b} (LUT={}, hitPos={})",
                word.bits(),
                lr.bits(),
                word.hit_pos().bits()
            );
            output.tracker.set(tick, word);
            observer.on_tracker_word(id, tick, word);
        }

        let trace = TickTrace {
            pattern,
            lr,
            edges,
            hit_pos: position.hit_pos(),
            counter: position.counter(tick),
            position: position.state(),
            decision: decision.state(),
        };
        log::trace!(
            "TSF{id} clk={tick}, ptn={pattern:b}, LUT={}, pri={}, sec={}, hPos={}, ctr={:?}",
            lr.bits(),
            edges.center,
            edges.adjacent.is_some(),
            trace.hit_pos.bits(),
            trace.counter
        );
        observer.on_tick(id, tick, &trace);
    }

    output
}
