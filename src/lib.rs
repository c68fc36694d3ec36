use crate::event::{EventRecord, IonChamberEvent, MiniballHit, OpenEvent};
use crate::hit::{HitKind, RawHit};
use crate::info::{BeaconKind, BeaconState, InfoSignalTracker};
use crate::particle::{Multiplicity, StripPair};
use crate::settings::ChannelClassifier;
use crate::summary::{Counters, RunSummary};
use crate::trigger::{Trigger, TriggerTable};
use bon::bon;
use uom::si::f64::Time;

/// Derived physics events and the buffers of an open window.
pub mod event;
/// Miniball single-crystal gamma rays and cluster addback.
pub mod gamma;
/// Raw acquisition hits and detector identities.
pub mod hit;
/// Beacon epochs and per-board dead time.
pub mod info;
/// Ion chamber layer coincidences.
pub mod ion_chamber;
/// CD charge-sharing reconstruction.
pub mod particle;
mod passthrough;
/// Settings file and channel classification.
pub mod settings;
/// End of run report.
pub mod summary;
/// Trigger identifier to trigger time lookup.
pub mod trigger;

/// A trait that defines the interface for an observer of the event builder.
///
/// The default implementation of all methods is a no-op. Users are expected to
/// override the methods they are interested in.
#[allow(unused_variables)]
pub trait Observer {
    /// Called for every data hit that arrives while a window is open, with
    /// the signed time since the first hit of the window.
    fn on_window_time_difference(&mut self, dt: i64, over_threshold: bool) {}
    /// Called for every hit in the same crystal as a core hit (the core
    /// itself included). `ebis_on` is true when the hit is close enough after
    /// the latest EBIS epoch.
    fn on_core_segment_energy(&mut self, core: &MiniballHit, segment: u8, ebis_on: bool) {}
    /// Called when a core is paired with itself or another core of the same
    /// crystal.
    fn on_core_core_time_difference(&mut self, dt: i64) {}
    /// Called when a core is paired with a segment of the same crystal.
    fn on_core_segment_time_difference(&mut self, dt: i64) {}
    /// Called once per (detector, sector) with hits in a closed window.
    fn on_particle_multiplicity(&mut self, detector: u8, sector: u8, p: usize, n: usize) {}
    /// Called for every pair of hits within one (detector, sector), P/N
    /// pairs first.
    fn on_particle_time_difference(&mut self, detector: u8, sector: u8, pair: StripPair, dt: i64) {
    }
    /// Called for every particle built from adjacent (or single) strips.
    fn on_particle_energy(
        &mut self,
        detector: u8,
        sector: u8,
        class: Multiplicity,
        energy_p: f32,
        energy_n: f32,
    ) {
    }
    /// Called for every seed/candidate pair scanned by the ion chamber
    /// matching, whether or not the candidate joins.
    fn on_ion_chamber_time_difference(&mut self, dt: i64) {}
    /// Called for every ion chamber group, duplicates included.
    fn on_ion_chamber(&mut self, event: &IonChamberEvent) {}
    /// Called when a beacon epoch updates its period and frequency.
    fn on_beacon(&mut self, kind: BeaconKind, state: &BeaconState) {}
    /// Called when a board resumes without ever having been paused.
    fn on_blocked_board(&mut self, sfp: u8, board: u8, duration: Time) {}
    /// Called when a closed window produced at least one derived event.
    fn on_event(&mut self, record: &EventRecord) {}
}

impl Observer for () {}

/// Collects every emitted [`EventRecord`].
impl Observer for Vec<EventRecord> {
    fn on_event(&mut self, record: &EventRecord) {
        self.push(record.clone());
    }
}

/// Groups a time-ordered stream of raw hits into event windows and
/// reconstructs each closed window.
pub struct Aggregator<C, O> {
    classifier: C,
    observer: O,
    triggers: TriggerTable,
    tracker: InfoSignalTracker,
    // `None` while idle
    open: Option<OpenEvent>,
    current_trigger: Option<u64>,
    trigger_time: Option<u64>,
    previous_time: Option<u64>,
    counters: Counters,
}

#[bon]
impl<C, O> Aggregator<C, O>
where
    C: ChannelClassifier,
{
    #[builder]
    pub fn new(#[builder(field)] triggers: TriggerTable, classifier: C, observer: O) -> Self {
        let tracker = InfoSignalTracker::new(
            classifier.info_codes(),
            classifier.sfps(),
            classifier.boards(),
        );

        Self {
            classifier,
            observer,
            triggers,
            tracker,
            open: None,
            current_trigger: None,
            trigger_time: None,
            previous_time: None,
            counters: Counters::default(),
        }
    }
}

impl<C, O, S: aggregator_builder::State> AggregatorBuilder<C, O, S>
where
    C: ChannelClassifier,
{
    /// Add an acquisition trigger to the lookup table of the [`Aggregator`].
    pub fn add_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.insert(trigger);
        self
    }
    pub fn add_triggers(mut self, triggers: impl IntoIterator<Item = Trigger>) -> Self {
        for trigger in triggers {
            self.triggers.insert(trigger);
        }
        self
    }
}

impl<C, O> Aggregator<C, O>
where
    C: ChannelClassifier,
    O: Observer,
{
    /// Consume the next hit of the stream.
    ///
    /// The open window (if any) is closed before the hit is handled when the
    /// hit falls outside the window, goes back in time, or belongs to a
    /// different trigger.
    pub fn process(&mut self, hit: &RawHit) {
        if let Some(previous) = self.previous_time {
            if hit.time < previous {
                log::warn!(
                    "out of order hit: {} ns after {} ns (sfp = {}, board = {})",
                    hit.time,
                    previous,
                    hit.sfp,
                    hit.board
                );
                self.counters.time_regressions += 1;
            }
        }
        self.previous_time = Some(hit.time);

        if let Some(open) = &self.open {
            let elapsed = open.elapsed(hit.time);
            if let HitKind::Data { over_threshold, .. } = hit.kind {
                self.observer.on_window_time_difference(elapsed, over_threshold);
            }
            let width = i64::try_from(self.classifier.event_window()).unwrap_or(i64::MAX);
            if elapsed > width || elapsed < 0 || hit.trigger_id != open.trigger_id {
                self.close();
            }
        }
        if self.current_trigger != Some(hit.trigger_id) {
            self.resolve_trigger(hit.trigger_id);
        }

        match hit.kind {
            HitKind::Info { .. } => self.tracker.process(hit, &mut self.observer),
            HitKind::Data {
                channel,
                energy,
                over_threshold,
            } => {
                self.counters.data_hits += 1;
                self.tracker.record_data(hit.sfp, hit.board, hit.time);

                let id = self.classifier.classify(hit.sfp, hit.board, channel);
                if !id.is_classified() {
                    self.counters.unclassified_hits += 1;
                    return;
                }
                if !over_threshold {
                    return;
                }
                self.counters.detectors.count(id);
                self.open
                    .get_or_insert_with(|| OpenEvent::new(hit.time, hit.trigger_id))
                    .admit(id, energy, hit.time);
            }
        }
    }
    /// Close any open window and return the observer together with the run
    /// summary.
    pub fn finish(mut self) -> (O, RunSummary) {
        self.close();
        let summary = RunSummary::new(&self.counters, &self.tracker);
        log::info!(
            "{} data hits, {} windows, {} events",
            summary.data_hits,
            summary.windows,
            summary.records
        );

        (self.observer, summary)
    }
    /// Process every hit of a finite stream.
    pub fn run<'a, I>(mut self, hits: I) -> (O, RunSummary)
    where
        I: IntoIterator<Item = &'a RawHit>,
    {
        for hit in hits {
            self.process(hit);
        }
        self.finish()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn tracker(&self) -> &InfoSignalTracker {
        &self.tracker
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }
    /// Time of the trigger that owns the latest hit, or the last known one if
    /// that trigger could not be found.
    pub fn trigger_time(&self) -> Option<u64> {
        self.trigger_time
    }

    fn resolve_trigger(&mut self, id: u64) {
        self.current_trigger = Some(id);
        // Streams without trigger information
        if self.triggers.is_empty() {
            return;
        }
        match self.triggers.find(id) {
            Some(time) => self.trigger_time = Some(time),
            None => {
                log::warn!(
                    "trigger {id} not found, keeping trigger time {:?}",
                    self.trigger_time
                );
                self.counters.trigger_misses += 1;
            }
        }
    }

    fn close(&mut self) {
        let Some(open) = self.open.take() else {
            return;
        };
        self.counters.windows += 1;

        let ebis = self.tracker.beacon(BeaconKind::Ebis).last_time;
        let (gamma_rays, gamma_ray_addbacks) =
            gamma::reconstruct(&open.miniball, ebis, &mut self.observer);
        let particles = particle::reconstruct(&open.cd, &mut self.observer);
        let beam_dumps = passthrough::beam_dump(&open.beam_dump);
        let spedes = passthrough::spede(&open.spede);
        let ion_chambers = ion_chamber::reconstruct(
            &open.ion_chamber,
            self.classifier.ion_chamber_hit_window(),
            self.classifier.ion_chamber_layers(),
            &mut self.observer,
        );

        let record = EventRecord {
            gamma_rays,
            gamma_ray_addbacks,
            particles,
            beam_dumps,
            spedes,
            ion_chambers,
            ebis,
            t1: self.tracker.beacon(BeaconKind::T1).last_time,
            super_cycle: self.tracker.beacon(BeaconKind::SuperCycle).last_time,
            trigger_time: self.trigger_time,
        };
        self.counters.outputs.add(&record);

        if record.is_empty() {
            log::debug!(
                "window opened at {} ns ({} hits between {} and {} ns) produced no events",
                open.first_time,
                open.hit_count,
                open.min_time,
                open.max_time
            );
            return;
        }
        self.counters.records += 1;
        self.observer.on_event(&record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ChannelMap, Settings};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[derive(Default)]
    struct TestObserver {
        records: Vec<EventRecord>,
        window_time_differences: Vec<(i64, bool)>,
    }

    impl Observer for TestObserver {
        fn on_window_time_difference(&mut self, dt: i64, over_threshold: bool) {
            self.window_time_differences.push((dt, over_threshold));
        }

        fn on_event(&mut self, record: &EventRecord) {
            self.records.push(record.clone());
        }
    }

    fn channel_map() -> ChannelMap {
        ChannelMap::new(&Settings::default()).unwrap()
    }

    fn aggregator() -> Aggregator<ChannelMap, TestObserver> {
        Aggregator::builder()
            .classifier(channel_map())
            .observer(TestObserver::default())
            .build()
    }

    // Default wiring: cluster 0 crystals 0 and 1 share sfp 0 board 0, CD
    // sector 0 P strips on sfp 1 board 0 and N strips on board 1.
    fn miniball(time: u64, crystal: u8, segment: u8, energy: f32) -> RawHit {
        let (board, channel) = match crystal {
            0 => (0, segment),
            1 => (0, segment + 9),
            _ => (1, segment),
        };
        RawHit::data(time, 0, (0, board, channel), energy, true)
    }

    fn cd(time: u64, side: u8, strip: u8, energy: f32) -> RawHit {
        RawHit::data(time, 0, (1, side, strip), energy, true)
    }

    fn ion_chamber(time: u64, layer: u8, energy: f32) -> RawHit {
        RawHit::data(time, 0, (1, 10, 8 + layer), energy, true)
    }

    fn spede(time: u64, trigger_id: u64) -> RawHit {
        RawHit::data(time, trigger_id, (1, 8, 3), 300.0, true)
    }

    #[test]
    fn aggregator_empty_window_not_emitted() {
        let hits = [
            // Segments without a core give no gamma ray
            miniball(1000, 0, 1, 200.0),
            miniball(1100, 0, 2, 300.0),
            // Below threshold and unclassified hits never open a window
            RawHit::data(9000, 0, (1, 8, 3), 300.0, false),
            RawHit::data(9100, 0, (1, 11, 15), 300.0, true),
        ];
        let (observer, summary) = aggregator().run(&hits);

        assert!(observer.records.is_empty());
        assert_eq!(summary.windows, 1);
        assert_eq!(summary.records, 0);
        assert_eq!(summary.data_hits, 4);
        assert_eq!(summary.unclassified_hits, 1);
        assert_eq!(summary.detector_hits.miniball, 2);
        assert_eq!(summary.detector_hits.spede, 0);
    }

    #[test]
    fn aggregator_unclassified_inside_window() {
        let hits = [
            spede(1000, 0),
            RawHit::data(1100, 0, (1, 11, 15), 300.0, true),
            spede(1200, 0),
        ];
        let (observer, summary) = aggregator().run(&hits);

        assert_eq!(observer.records.len(), 1);
        assert_eq!(
            observer.records[0]
                .spedes
                .iter()
                .map(|s| s.time)
                .collect::<Vec<_>>(),
            vec![1000, 1200]
        );
        assert_eq!(summary.unclassified_hits, 1);
        assert_eq!(summary.detector_hits.spede, 2);
        assert_eq!(summary.windows, 1);
    }

    #[test]
    fn aggregator_determinism() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut time = 0;
        let hits: Vec<RawHit> = (0..2000)
            .map(|_| {
                time += rng.random_range(0..2000);
                let address = (
                    rng.random_range(0..2),
                    rng.random_range(0..12),
                    rng.random_range(0..16),
                );
                let energy = rng.random_range(0.0..2000.0);
                RawHit::data(time, time / 10_000, address, energy, rng.random_bool(0.9))
            })
            .collect();

        let (first, first_summary) = aggregator().run(&hits);
        let (second, second_summary) = aggregator().run(&hits);

        assert!(!first.records.is_empty());
        assert_eq!(first.records, second.records);
        assert_eq!(first_summary, second_summary);
    }

    #[test]
    fn aggregator_gamma_addback() {
        let hits = [
            miniball(1000, 0, 0, 100.0),
            miniball(1010, 1, 0, 300.0),
            miniball(1020, 2, 0, 200.0),
        ];
        let (observer, summary) = aggregator().run(&hits);

        assert_eq!(observer.records.len(), 1);
        let record = &observer.records[0];
        assert_eq!(record.gamma_rays.len(), 3);
        assert_eq!(record.gamma_ray_addbacks.len(), 1);
        let addback = record.gamma_ray_addbacks[0];
        assert_eq!(addback.energy, 600.0);
        assert_eq!((addback.cluster, addback.crystal), (0, 1));
        assert_eq!(addback.time, 1010);
        assert_eq!(summary.outputs.gamma_rays, 3);
        assert_eq!(summary.outputs.gamma_ray_addbacks, 1);
    }

    #[test]
    fn aggregator_particle_one_one() {
        let hits = [cd(1000, 0, 5, 100.0), cd(1005, 1, 5, 90.0)];
        let (observer, _) = aggregator().run(&hits);

        assert_eq!(observer.records.len(), 1);
        let particles = &observer.records[0].particles;
        assert_eq!(particles.len(), 1);
        assert_eq!(particles[0].energy_p, 100.0);
        assert_eq!(particles[0].energy_n, 90.0);
        assert_eq!((particles[0].strip_p, particles[0].strip_n), (5, 5));
    }

    #[test]
    fn aggregator_particle_one_two_adjacent() {
        let hits = [
            cd(1000, 0, 5, 100.0),
            cd(1005, 1, 5, 40.0),
            cd(1007, 1, 6, 50.0),
        ];
        let (observer, _) = aggregator().run(&hits);

        let particles = &observer.records[0].particles;
        assert_eq!(particles.len(), 1);
        assert_eq!(particles[0].energy_n, 90.0);
        assert_eq!(particles[0].strip_n, 6);
        assert_eq!(particles[0].time_n, 1007);
    }

    #[test]
    fn aggregator_ion_chamber_duplicates() {
        let hits = [ion_chamber(1000, 0, 100.0), ion_chamber(1200, 1, 300.0)];
        let (observer, summary) = aggregator().run(&hits);

        assert_eq!(observer.records.len(), 1);
        let events = &observer.records[0].ion_chambers;
        assert_eq!(events.len(), 2);
        for event in events {
            assert_eq!(event.energies.len(), 2);
            assert_eq!(event.de_time, Some(1000));
            assert_eq!(event.e_time, Some(1200));
        }
        assert_eq!(summary.outputs.ion_chambers, 2);
    }

    #[test]
    fn aggregator_trigger_boundary() {
        let hits = [spede(1000, 1), spede(1010, 1), spede(1020, 2)];
        let (observer, summary) = aggregator().run(&hits);

        assert_eq!(observer.records.len(), 2);
        assert_eq!(observer.records[0].spedes.len(), 2);
        assert_eq!(observer.records[1].spedes.len(), 1);
        assert_eq!(observer.records[1].spedes[0].time, 1020);
        assert_eq!(summary.windows, 2);
    }

    #[test]
    fn aggregator_window_width() {
        let hits = [spede(0, 0), spede(3000, 0), spede(3001, 0)];
        let (observer, _) = aggregator().run(&hits);

        assert_eq!(
            observer
                .records
                .iter()
                .map(|r| r.spedes.len())
                .collect::<Vec<_>>(),
            vec![2, 1]
        );
        assert_eq!(
            observer.window_time_differences,
            vec![(3000, true), (3001, true)]
        );
    }

    #[test]
    fn aggregator_time_regression() {
        let hits = [spede(5000, 0), spede(5100, 0), spede(4000, 0)];
        let (observer, summary) = aggregator().run(&hits);

        assert_eq!(observer.records.len(), 2);
        assert_eq!(observer.records[1].spedes[0].time, 4000);
        assert_eq!(summary.time_regressions, 1);
    }

    #[test]
    fn aggregator_end_of_stream() {
        let mut aggregator = aggregator();
        aggregator.process(&spede(100, 0));

        assert!(aggregator.is_open());
        assert!(aggregator.observer().records.is_empty());

        let (observer, _) = aggregator.finish();
        assert_eq!(observer.records.len(), 1);
    }

    #[test]
    fn aggregator_ebis_dedupe() {
        let hits = [
            RawHit::info(10_000, 0, (0, 0), 21),
            RawHit::info(10_500, 0, (1, 0), 21),
            spede(11_000, 0),
        ];
        let (records, summary) = Aggregator::builder()
            .classifier(channel_map())
            .observer(Vec::new())
            .build()
            .run(&hits);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ebis, 10_000);
        assert_eq!(summary.beacon_count(BeaconKind::Ebis), 1);
        assert_eq!(summary.info_hits, 2);
    }

    #[test]
    fn aggregator_info_hits_not_buffered() {
        let hits = [spede(1000, 0), RawHit::info(1100, 0, (1, 8), 20)];
        let (records, _) = Aggregator::builder()
            .classifier(channel_map())
            .observer(Vec::new())
            .build()
            .run(&hits);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].spedes.len(), 1);
    }

    #[test]
    fn aggregator_trigger_lookup() {
        let mut aggregator = Aggregator::builder()
            .add_trigger(Trigger { id: 1, time: 900 })
            .add_triggers([Trigger { id: 2, time: 1900 }])
            .classifier(channel_map())
            .observer(Vec::new())
            .build();

        aggregator.process(&spede(1000, 1));
        assert_eq!(aggregator.trigger_time(), Some(900));
        aggregator.process(&spede(2000, 2));
        assert_eq!(aggregator.trigger_time(), Some(1900));
        // Unknown trigger keeps the last known time
        aggregator.process(&spede(3000, 3));
        assert_eq!(aggregator.trigger_time(), Some(1900));

        let (records, summary) = aggregator.finish();
        assert_eq!(
            records.iter().map(|r| r.trigger_time).collect::<Vec<_>>(),
            vec![Some(900), Some(1900), Some(1900)]
        );
        assert_eq!(summary.trigger_misses, 1);
    }

    #[test]
    fn aggregator_without_triggers() {
        let (records, summary) = Aggregator::builder()
            .classifier(channel_map())
            .observer(Vec::new())
            .build()
            .run(&[spede(1000, 4)]);

        assert_eq!(records[0].trigger_time, None);
        assert_eq!(summary.trigger_misses, 0);
    }
}
