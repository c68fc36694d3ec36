/// Replay a synthetic acquisition stream through the event builder and print
/// the end of run summary.
///
/// Usage: `cargo run --example replay [settings file]`
use anyhow::{Context, Result};
use evb::event::EventRecord;
use evb::hit::RawHit;
use evb::info::{BeaconKind, BeaconState};
use evb::settings::{ChannelMap, Settings};
use evb::trigger::Trigger;
use evb::{Aggregator, Observer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use std::str::FromStr;
use uom::si::f64::{Frequency, Time};
use uom::si::frequency::hertz;
use uom::si::time::{millisecond, nanosecond, second};

/// Acquisition trigger times (in nanoseconds) of a Poisson process.
///
/// Inter-arrival times are exponentially distributed and rounded to the
/// nanosecond, so two triggers can share a timestamp.
struct TriggerTimes<R> {
    time: u64,
    // Mean inter-arrival time of 1 ns; scaled by the period on sampling.
    exp: Exp<f64>,
    period_ns: f64,
    rng: R,
}

impl<R: Rng> TriggerTimes<R> {
    fn new(rate: Frequency, rng: R) -> Result<Self> {
        let period_ns = 1e9 / rate.get::<hertz>();
        anyhow::ensure!(
            period_ns.is_finite() && period_ns > 0.0,
            "trigger rate must be positive"
        );

        Ok(Self {
            time: 0,
            exp: Exp::new(1.0).context("failed to create exponential distribution")?,
            period_ns,
            rng,
        })
    }
}

impl<R: Rng> Iterator for TriggerTimes<R> {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        let delta = self.exp.sample(&mut self.rng) * self.period_ns;
        self.time += delta.round() as u64;
        Some(self.time)
    }
}

#[derive(Default)]
struct Report {
    events: u64,
    addbacks: u64,
    particles: u64,
    ebis_period: Option<Time>,
}

impl Observer for Report {
    fn on_beacon(&mut self, kind: BeaconKind, state: &BeaconState) {
        if kind == BeaconKind::Ebis {
            self.ebis_period = state.period;
        }
    }

    fn on_event(&mut self, record: &EventRecord) {
        self.events += 1;
        self.addbacks += record.gamma_ray_addbacks.len() as u64;
        self.particles += record.particles.len() as u64;
    }
}

// One physics event on the default wiring: a gamma ray in a random Miniball
// crystal, sometimes with a particle in the CD and a beam dump hit.
fn physics(time: u64, rng: &mut impl Rng) -> Vec<(u64, (u8, u8, u8), f32)> {
    let mut hits = Vec::new();

    let d: u8 = rng.random_range(0..24);
    let (board, offset) = (d / 2, 9 * (d & 1));
    let energy = rng.random_range(50.0..3000.0);
    hits.push((time, (0, board, offset), energy));
    let segment = rng.random_range(1..7);
    hits.push((time + 20, (0, board, offset + segment), energy * 0.9));

    if rng.random_bool(0.3) {
        let sector = rng.random_range(0..4);
        let strip = rng.random_range(0..12);
        let energy = rng.random_range(1000.0..20000.0);
        hits.push((time + 40, (1, sector * 2, strip), energy));
        hits.push((time + 45, (1, sector * 2 + 1, strip), energy * 0.98));
    }
    if rng.random_bool(0.05) {
        hits.push((time + 60, (1, 10, 0), rng.random_range(100.0..1500.0)));
    }

    hits
}

fn main() -> Result<()> {
    env_logger::init();

    let settings = match std::env::args().nth(1) {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read `{path}`"))?;
            Settings::from_str(&contents)?
        }
        None => Settings::default(),
    };
    let classifier = ChannelMap::new(&settings)?;

    // ===========================================
    let duration = Time::new::<second>(1.0);
    let rate = Frequency::new::<hertz>(20_000.0);
    let ebis_period = Time::new::<millisecond>(50.0);
    // ===========================================

    let mut rng = StdRng::seed_from_u64(2024);
    let times = TriggerTimes::new(rate, StdRng::seed_from_u64(1))?;
    let end = duration.get::<nanosecond>() as u64;

    let mut hits = Vec::new();
    let mut triggers = Vec::new();
    for (id, time) in times.take_while(|&t| t < end).enumerate() {
        let id = id as u64;
        triggers.push(Trigger { id, time });
        for (time, address, energy) in physics(time, &mut rng) {
            hits.push(RawHit::data(time, id, address, energy, true));
        }
    }
    // Every board reports the EBIS epoch
    let period = ebis_period.get::<nanosecond>() as u64;
    for epoch in (period..end).step_by(period as usize) {
        for board in 0..settings.boards {
            hits.push(RawHit::info(epoch + u64::from(board), 0, (0, board), 21));
        }
    }
    hits.sort_by_key(|hit| hit.time);
    // Info hits belong to the trigger of the preceding data
    let mut trigger_id = 0;
    for hit in &mut hits {
        if hit.is_info() {
            hit.trigger_id = trigger_id;
        } else {
            trigger_id = hit.trigger_id;
        }
    }

    let (report, summary) = Aggregator::builder()
        .add_triggers(triggers)
        .classifier(classifier)
        .observer(Report::default())
        .build()
        .run(&hits);

    println!(
        "{} events, {} addbacks, {} particles",
        report.events, report.addbacks, report.particles
    );
    if let Some(period) = report.ebis_period {
        println!("EBIS period: {} ms", period.get::<millisecond>());
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
