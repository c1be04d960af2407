/// Simulates a few events of random wire hits on one outer super layer and
/// prints what goes out to the trackers.
///
/// Usage: `cargo run --example sim [CONFIG.json LUT.coe]`. Set `TSF_LOG` to
/// `debug` or `trace` to see the finder decisions.
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tsf::config::TsfConfig;
use tsf::lut::{LookupTable, LrClass, Lut};
use tsf::segment::{BoardType, LAYERS};
use tsf::signal::Tick;
use tsf::tsf::{EventTimeWord, TrackerWord};
use tsf::{BusId, Observer, SuperLayer};

#[derive(Default)]
struct Summary {
    tracker_words: usize,
    event_times: usize,
    dropped: usize,
}

impl Observer for Summary {
    fn on_tracker_word(&mut self, segment: usize, tick: Tick, word: TrackerWord) {
        self.tracker_words += 1;
        println!(
            "  TS{segment:3} clk={tick:4}: LR={} hitPos={} pri={:2} ctr={:2}",
            word.lr().bits(),
            word.hit_pos().bits(),
            word.priority_time(),
            word.clock_counter()
        );
    }

    fn on_event_time(&mut self, _segment: usize, _tick: Tick, _word: EventTimeWord) {
        self.event_times += 1;
    }

    fn on_bus_overflow(&mut self, bus: BusId, tick: Tick, dropped: usize) {
        self.dropped += dropped;
        println!("  {bus:?} full at clk={tick}: {dropped} dropped");
    }
}

// Left/right from the third layer when it is unique, ambiguous otherwise.
fn default_lut() -> Lut {
    let layout = BoardType::Outer.layout();
    let table = LookupTable::from_fn(layout.pattern_width(), |pattern| {
        let center = pattern & (1 << layout.center) != 0;
        let right = pattern & (1 << layout.right) != 0;
        let left = pattern & (1 << layout.left) != 0;
        match (center, right, left) {
            (false, false, false) => LrClass::None,
            (_, true, false) => LrClass::Right,
            (_, false, true) => LrClass::Left,
            _ => LrClass::Ambiguous,
        }
    });
    Lut::new(table, true)
}

fn main() -> Result<()> {
    let level = match std::env::var("TSF_LOG").as_deref() {
        Ok("trace") => simplelog::LevelFilter::Trace,
        Ok("debug") => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Info,
    };
    simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, lut) = match args.as_slice() {
        [config, lut] => {
            let config = TsfConfig::from_path(config)
                .with_context(|| format!("failed to read configuration `{config}`"))?;
            let lut = config
                .load_lut(lut)
                .with_context(|| format!("failed to load LUT `{lut}`"))?;
            (config, lut)
        }
        [] => {
            let config = TsfConfig::from_json(
                r#"{"board": "outer", "segments": 160, "superlayer": 1, "global_offset": 160}"#,
            )?;
            (config, default_lut())
        }
        _ => anyhow::bail!("usage: sim [CONFIG.json LUT.coe]"),
    };
    let layer = SuperLayer::from_config(&config, lut)?;

    let mut rng = StdRng::seed_from_u64(2024);
    let segments = layer.segments().len();
    for event in 0..5 {
        println!("event {event}:");
        let mut bundle = layer.bundle();
        // A few tracks crossing the super layer at a slant, plus noise.
        for _ in 0..rng.random_range(1..8) {
            let cell = rng.random_range(0..segments);
            let start: Tick = rng.random_range(0..600);
            for layer_index in 0..LAYERS {
                let rise = start + rng.random_range(0..40);
                bundle
                    .wire_mut(layer_index, (cell + layer_index / 2) % segments)
                    .set(rise, rise + 30);
            }
            bundle.set_priority_time(cell, start, start + 40, rng.random_range(0..16));
            bundle.set_fastest_time(cell, start, start + 40, rng.random_range(0..16));
        }
        for _ in 0..50 {
            let rise = rng.random_range(0..1000);
            bundle
                .wire_mut(rng.random_range(0..LAYERS), rng.random_range(0..segments))
                .set(rise, rise + 1);
        }

        let mut summary = Summary::default();
        let output = layer.simulate_with(&bundle, &mut summary)?;
        println!(
            "  {} tracker word(s), {} event time(s), {} dropped, {} active segment(s)",
            summary.tracker_words,
            summary.event_times,
            summary.dropped,
            output.segments.iter().filter(|s| s.is_active()).count()
        );
    }

    Ok(())
}
