//! Clock-accurate model of the track segment finder boards of the CDC
//! Level-1 trigger.
//!
//! A [`SuperLayer`] owns the segments of one super layer. Fill the
//! [`WireSignalBundle`] it hands out with the wire hits of an event and
//! [`simulate`](SuperLayer::simulate) it to get the per-segment outputs and the
//! buses sent to the 2D trackers and the event-time logic.
use crate::config::TsfConfig;
use crate::error::ConfigError;
use crate::lut::Lut;
use crate::packer::{Bus, BusFormat, SlotFormat, BOARD_SEGMENTS, QUADRANTS};
use crate::segment::{BoardType, TrackSegment, WireSignalBundle};
use crate::signal::{Clock, Tick};
use crate::tsf::{simulate_segment, EventTimeWord, SegmentOutput, TickTrace, TrackerWord};
use bon::bon;
use rayon::prelude::*;
use std::sync::Arc;

/// Configuration files.
pub mod config;
/// Setup errors.
pub mod error;
/// Priority lookup tables.
pub mod lut;
/// Saturation packing of segment outputs onto output buses.
pub mod packer;
/// Track segment shapes and their input signals.
pub mod segment;
/// Clocked digital signals.
pub mod signal;
/// Finder logic of a single track segment.
pub mod tsf;

/// A trait that defines the interface for an observer of the finder logic.
///
/// The default implementation of all methods is a no-op. Users are expected to
/// override the methods they are interested in.
#[allow(unused_variables)]
pub trait Observer {
    /// Called at every clock a segment processes.
    fn on_tick(&mut self, segment: usize, tick: Tick, trace: &TickTrace) {}
    /// Called when a segment sends a word to the tracker.
    fn on_tracker_word(&mut self, segment: usize, tick: Tick, word: TrackerWord) {}
    /// Called when a segment sends its fastest timing.
    fn on_event_time(&mut self, segment: usize, tick: Tick, word: EventTimeWord) {}
    /// Called when segment outputs are dropped because a bus is full.
    fn on_bus_overflow(&mut self, bus: BusId, tick: Tick, dropped: usize) {}
}

impl Observer for () {}

/// Identifies an output bus of a super layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BusId {
    /// Bus to the 2D tracker of a quadrant.
    Tracker(usize),
    /// Event-time bus of a merger board.
    EventTime(usize),
}

/// Everything a super layer sends out for one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuperLayerOutput {
    /// Outputs indexed by local segment id.
    pub segments: Vec<SegmentOutput>,
    pub trackers: [Bus; QUADRANTS],
    /// One bus per merger board of 16 segments.
    pub event_time: Vec<Bus>,
}

/// The track segment finders of one super layer.
pub struct SuperLayer {
    id: usize,
    board: BoardType,
    segments: Vec<TrackSegment>,
    lut: Arc<Lut>,
    clock: Clock,
    tracker_format: BusFormat,
    event_time_max_hit: usize,
}

#[bon]
impl SuperLayer {
    #[builder]
    pub fn new(
        id: usize,
        #[builder(default)] global_offset: usize,
        board: BoardType,
        segments: usize,
        #[builder(into)] lut: Arc<Lut>,
        clock: Clock,
        #[builder(default = 20)] tracker_max_hit: usize,
        #[builder(default)] slot_format: SlotFormat,
        #[builder(default = 6)] event_time_max_hit: usize,
    ) -> Result<Self, ConfigError> {
        if segments == 0 || segments % BOARD_SEGMENTS != 0 {
            return Err(ConfigError::SegmentCount(segments));
        }
        // A tracker sees half of the super layer.
        if segments / 2 > 1 << packer::LOCAL_ID_BITS {
            return Err(ConfigError::LocalIdOverflow(segments));
        }
        let layout = board.layout();
        if lut.width() != layout.pattern_width() {
            return Err(ConfigError::LutWidth {
                board,
                expected: layout.pattern_width(),
                found: lut.width(),
            });
        }
        if tracker_max_hit == 0 {
            return Err(ConfigError::ZeroMaxHit("tracker"));
        }
        if event_time_max_hit == 0 {
            return Err(ConfigError::ZeroMaxHit("event time"));
        }

        log::info!(
            "SL{id}: {segments} {board} segments from TS{global_offset}, {} LUT, clk [{}, {}]",
            match *lut {
                Lut::Table(_) => "memory",
                Lut::Logic(_) => "logic",
            },
            clock.min(),
            clock.max()
        );

        Ok(Self {
            id,
            board,
            segments: (0..segments)
                .map(|i| TrackSegment::new(layout, i, segments, global_offset))
                .collect(),
            lut,
            clock,
            tracker_format: BusFormat {
                slot: slot_format,
                max_hit: tracker_max_hit,
            },
            event_time_max_hit,
        })
    }
}

impl SuperLayer {
    /// Sets up a super layer from `config` with an already loaded `lut`.
    pub fn from_config(config: &TsfConfig, lut: impl Into<Arc<Lut>>) -> Result<Self, ConfigError> {
        Self::builder()
            .id(config.superlayer)
            .global_offset(config.global_offset)
            .board(config.board)
            .segments(config.segments)
            .lut(lut)
            .clock(config.clock()?)
            .tracker_max_hit(config.tracker_max_hit)
            .slot_format(config.slot_format())
            .event_time_max_hit(config.event_time_max_hit)
            .build()
    }
    pub fn id(&self) -> usize {
        self.id
    }
    pub fn board(&self) -> BoardType {
        self.board
    }
    pub fn segments(&self) -> &[TrackSegment] {
        &self.segments
    }
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
    /// An empty input bundle shaped for this super layer.
    pub fn bundle(&self) -> WireSignalBundle {
        WireSignalBundle::new(self.board, self.segments.len())
    }
    /// Simulates one event, running the segments in parallel.
    pub fn simulate(&self, bundle: &WireSignalBundle) -> Result<SuperLayerOutput, ConfigError> {
        self.check_bundle(bundle)?;
        let outputs = self
            .segments
            .par_iter()
            .map(|segment| {
                simulate_segment(&segment.view(bundle), &self.lut, &self.clock, &mut ())
            })
            .collect();

        Ok(self.pack(outputs))
    }
    /// Simulates one event segment by segment, reporting to `observer`.
    pub fn simulate_with<O>(
        &self,
        bundle: &WireSignalBundle,
        observer: &mut O,
    ) -> Result<SuperLayerOutput, ConfigError>
    where
        O: Observer + ?Sized,
    {
        self.check_bundle(bundle)?;
        let outputs = self
            .segments
            .iter()
            .map(|segment| {
                simulate_segment(&segment.view(bundle), &self.lut, &self.clock, &mut *observer)
            })
            .collect();
        let output = self.pack(outputs);

        for (i, bus) in output.trackers.iter().enumerate() {
            for &(tick, dropped) in bus.overflows() {
                observer.on_bus_overflow(BusId::Tracker(i), tick, dropped);
            }
        }
        for (i, bus) in output.event_time.iter().enumerate() {
            for &(tick, dropped) in bus.overflows() {
                observer.on_bus_overflow(BusId::EventTime(i), tick, dropped);
            }
        }

        Ok(output)
    }

    fn check_bundle(&self, bundle: &WireSignalBundle) -> Result<(), ConfigError> {
        if bundle.board() != self.board || bundle.segments() != self.segments.len() {
            return Err(ConfigError::BundleShape {
                expected_board: self.board,
                expected: self.segments.len(),
                found_board: bundle.board(),
                found: bundle.segments(),
            });
        }
        Ok(())
    }

    fn pack(&self, segments: Vec<SegmentOutput>) -> SuperLayerOutput {
        let trackers = packer::pack_quadrants(&segments, self.tracker_format);
        let event_time = packer::pack_boards(&segments, self.event_time_max_hit);
        log::debug!(
            "SL{}: {} active segment(s)",
            self.id,
            segments.iter().filter(|s| s.is_active()).count()
        );

        SuperLayerOutput {
            segments,
            trackers,
            event_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lut::{LookupTable, LrClass};
    use crate::tsf::HitPos;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[derive(Default)]
    struct TestObserver {
        ticks: usize,
        tracker_words: Vec<(usize, Tick, TrackerWord)>,
        event_times: Vec<(usize, Tick, EventTimeWord)>,
        overflows: Vec<(BusId, Tick, usize)>,
    }

    impl Observer for TestObserver {
        fn on_tick(&mut self, _segment: usize, _tick: Tick, _trace: &TickTrace) {
            self.ticks += 1;
        }

        fn on_tracker_word(&mut self, segment: usize, tick: Tick, word: TrackerWord) {
            self.tracker_words.push((segment, tick, word));
        }

        fn on_event_time(&mut self, segment: usize, tick: Tick, word: EventTimeWord) {
            self.event_times.push((segment, tick, word));
        }

        fn on_bus_overflow(&mut self, bus: BusId, tick: Tick, dropped: usize) {
            self.overflows.push((bus, tick, dropped));
        }
    }

    // Classifies any pattern with the center wire as right.
    fn outer_lut() -> Lut {
        let center = BoardType::Outer.layout().center;
        Lut::new(
            LookupTable::from_fn(11, |p| {
                if p & (1 << center) != 0 {
                    LrClass::Right
                } else {
                    LrClass::None
                }
            }),
            false,
        )
    }

    fn outer_layer(segments: usize) -> SuperLayer {
        SuperLayer::builder()
            .id(1)
            .global_offset(160)
            .board(BoardType::Outer)
            .segments(segments)
            .lut(outer_lut())
            .clock(Clock::new(0, 1023).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn superlayer_segment_count() {
        for segments in [0, 20, 528] {
            let result = SuperLayer::builder()
                .id(0)
                .board(BoardType::Outer)
                .segments(segments)
                .lut(outer_lut())
                .clock(Clock::new(0, 10).unwrap())
                .build();
            assert!(matches!(
                result,
                Err(ConfigError::SegmentCount(_) | ConfigError::LocalIdOverflow(_))
            ));
        }
        assert_eq!(outer_layer(512).segments().len(), 512);
    }

    #[test]
    fn superlayer_lut_width() {
        let result = SuperLayer::builder()
            .id(0)
            .board(BoardType::Inner)
            .segments(160)
            .lut(outer_lut())
            .clock(Clock::new(0, 10).unwrap())
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::LutWidth {
                expected: 15,
                found: 11,
                ..
            })
        ));
    }

    #[test]
    fn superlayer_zero_max_hit() {
        let result = SuperLayer::builder()
            .id(0)
            .board(BoardType::Outer)
            .segments(16)
            .lut(outer_lut())
            .clock(Clock::new(0, 10).unwrap())
            .event_time_max_hit(0)
            .build();
        assert!(matches!(result, Err(ConfigError::ZeroMaxHit("event time"))));
    }

    #[test]
    fn superlayer_bundle_shape() {
        let layer = outer_layer(32);
        let bundle = WireSignalBundle::new(BoardType::Outer, 16);
        assert!(matches!(
            layer.simulate(&bundle),
            Err(ConfigError::BundleShape { found: 16, .. })
        ));
        let bundle = WireSignalBundle::new(BoardType::Inner, 32);
        assert!(layer.simulate(&bundle).is_err());
    }

    #[test]
    fn superlayer_global_ids() {
        let layer = outer_layer(16);
        assert_eq!(layer.segments()[3].global_id(), 163);
        assert_eq!(layer.id(), 1);
    }

    #[test]
    fn superlayer_single_hit() {
        let layer = outer_layer(16);
        let mut bundle = layer.bundle();
        bundle.wire_mut(2, 5).set(100, 130);
        bundle.set_priority_time(5, 100, 130, 7);
        bundle.set_fastest_time(5, 100, 130, 3);

        let output = layer.simulate(&bundle).unwrap();

        let active: Vec<_> = output
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(active, vec![5]);
        let word = output.segments[5].tracker.at(100).unwrap();
        assert_eq!(word.hit_pos(), HitPos::Center);
        assert_eq!(word.priority_time(), 7);

        // Quarters of 4: tracker 1 as id 1, tracker 0 as id 5.
        let first_slot = 21 * 19;
        assert_eq!(output.trackers[1].field(100, first_slot, 21), 1 << 13 | u32::from(word.bits()));
        assert_eq!(output.trackers[0].field(100, first_slot, 21), 5 << 13 | u32::from(word.bits()));
        assert!(output.trackers[2].frames().next().is_none());

        assert_eq!(output.event_time.len(), 1);
        let board = &output.event_time[0];
        assert_eq!(board.width(), 16 + 54);
        assert_eq!(board.field(100, 54, 16), 1 << 5);
        assert_eq!(board.field(100, 45, 9), (100 % 32) << 4 | 3);
    }

    #[test]
    fn superlayer_overflow() {
        let layer = SuperLayer::builder()
            .id(2)
            .board(BoardType::Outer)
            .segments(16)
            .lut(outer_lut())
            .clock(Clock::new(0, 1023).unwrap())
            .tracker_max_hit(2)
            .build()
            .unwrap();
        let mut bundle = layer.bundle();
        for cell in 0..16 {
            bundle.wire_mut(2, cell).set(40, 50);
        }

        let mut observer = TestObserver::default();
        let output = layer.simulate_with(&bundle, &mut observer).unwrap();

        assert_eq!(observer.tracker_words.len(), 16);
        assert_eq!(observer.event_times.len(), 16);
        // Each tracker sees 8 segments through 2 slots.
        let mut expected: Vec<_> = (0..4).map(|i| (BusId::Tracker(i), 40, 6)).collect();
        expected.push((BusId::EventTime(0), 40, 10));
        assert_eq!(observer.overflows, expected);
        assert_eq!(output.trackers[0].field(40, 21, 21) >> 13, 0);
        assert_eq!(output.trackers[0].field(40, 0, 21) >> 13, 1);
    }

    #[test]
    fn superlayer_parallel_matches_sequential() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = outer_layer(64);
        let mut bundle = layer.bundle();
        for _ in 0..300 {
            let layer_index = rng.random_range(0..5);
            let cell = rng.random_range(0..64);
            let rise = rng.random_range(0..900);
            bundle
                .wire_mut(layer_index, cell)
                .set(rise, rise + rng.random_range(1..30));
        }

        let parallel = layer.simulate(&bundle).unwrap();
        let mut observer = TestObserver::default();
        let sequential = layer.simulate_with(&bundle, &mut observer).unwrap();

        assert_eq!(parallel, sequential);
        assert!(observer.ticks > 0);
        assert_eq!(
            observer.tracker_words.len(),
            sequential.segments.iter().map(|s| s.tracker.len()).sum::<usize>()
        );
    }

    #[test]
    fn superlayer_from_config() {
        let config = TsfConfig::from_json(
            r#"{"board": "outer", "segments": 32, "superlayer": 3, "logicLUTFlag": true,
                "legacy_format": true, "tracker_max_hit": 6}"#,
        )
        .unwrap();
        let lut = Lut::new(outer_lut_table(), config.logic_lut);
        let layer = SuperLayer::from_config(&config, lut).unwrap();
        assert_eq!(layer.id(), 3);

        let mut bundle = layer.bundle();
        bundle.wire_mut(2, 0).set(10, 20);
        let output = layer.simulate(&bundle).unwrap();
        assert_eq!(output.trackers[0].width(), 13 * 6);
        let word = output.segments[0].tracker.at(10).unwrap();
        assert_eq!(output.trackers[0].field(10, 13 * 5, 13), u32::from(word.bits()));
    }

    fn outer_lut_table() -> LookupTable {
        match outer_lut() {
            Lut::Table(table) => table,
            Lut::Logic(_) => unreachable!(),
        }
    }
}
