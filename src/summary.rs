use crate::event::EventRecord;
use crate::hit::DetectorIdentity;
use crate::info::{BeaconKind, InfoSignalTracker};
use serde::Serialize;
use uom::si::f64::Time;
use uom::si::time::nanosecond;

/// Over-threshold hits admitted into event windows, per detector type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DetectorCounts {
    pub miniball: u64,
    pub cd: u64,
    pub beam_dump: u64,
    pub spede: u64,
    pub ion_chamber: u64,
}

impl DetectorCounts {
    pub(crate) fn count(&mut self, id: DetectorIdentity) {
        match id {
            DetectorIdentity::Miniball { .. } => self.miniball += 1,
            DetectorIdentity::Cd { .. } => self.cd += 1,
            DetectorIdentity::BeamDump { .. } => self.beam_dump += 1,
            DetectorIdentity::Spede { .. } => self.spede += 1,
            DetectorIdentity::IonChamber { .. } => self.ion_chamber += 1,
            DetectorIdentity::Unclassified => {}
        }
    }
}

/// Events produced by each reconstructor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutputCounts {
    pub gamma_rays: u64,
    pub gamma_ray_addbacks: u64,
    pub particles: u64,
    pub beam_dumps: u64,
    pub spedes: u64,
    pub ion_chambers: u64,
}

impl OutputCounts {
    pub(crate) fn add(&mut self, record: &EventRecord) {
        self.gamma_rays += record.gamma_rays.len() as u64;
        self.gamma_ray_addbacks += record.gamma_ray_addbacks.len() as u64;
        self.particles += record.particles.len() as u64;
        self.beam_dumps += record.beam_dumps.len() as u64;
        self.spedes += record.spedes.len() as u64;
        self.ion_chambers += record.ion_chambers.len() as u64;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub(crate) data_hits: u64,
    pub(crate) unclassified_hits: u64,
    pub(crate) windows: u64,
    pub(crate) records: u64,
    pub(crate) time_regressions: u64,
    pub(crate) trigger_misses: u64,
    pub(crate) detectors: DetectorCounts,
    pub(crate) outputs: OutputCounts,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoardSummary {
    pub sfp: u8,
    pub board: u8,
    pub hits: u64,
    /// Between the first and last data hit of the board.
    pub run_time: Time,
    pub dead_time: Time,
    pub pauses: u64,
    pub resumes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BeaconSummary {
    pub kind: BeaconKind,
    pub count: u64,
}

/// End of run report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub data_hits: u64,
    /// Data hits from channels with no detector wired to them.
    pub unclassified_hits: u64,
    pub boards: Vec<BoardSummary>,
    pub info_hits: u64,
    /// Pause/resume words from unknown boards.
    pub rejected_info_hits: u64,
    pub beacons: Vec<BeaconSummary>,
    pub detector_hits: DetectorCounts,
    pub outputs: OutputCounts,
    /// Closed event windows, including those that produced nothing.
    pub windows: u64,
    /// Emitted event records.
    pub records: u64,
    pub time_regressions: u64,
    pub trigger_misses: u64,
}

impl RunSummary {
    pub(crate) fn new(counters: &Counters, tracker: &InfoSignalTracker) -> Self {
        let boards = tracker
            .boards()
            .map(|(sfp, board, state)| {
                let run_time = state
                    .first_data_time
                    .map_or(0, |first| state.last_data_time.saturating_sub(first));
                BoardSummary {
                    sfp,
                    board,
                    hits: state.data_hits,
                    run_time: Time::new::<nanosecond>(run_time as f64),
                    dead_time: Time::new::<nanosecond>(state.dead_time as f64),
                    pauses: state.pause_count,
                    resumes: state.resume_count,
                }
            })
            .collect();
        let beacons = [
            BeaconKind::Pulser,
            BeaconKind::Ebis,
            BeaconKind::T1,
            BeaconKind::SuperCycle,
        ]
        .into_iter()
        .map(|kind| BeaconSummary {
            kind,
            count: tracker.beacon(kind).count,
        })
        .collect();

        Self {
            data_hits: counters.data_hits,
            unclassified_hits: counters.unclassified_hits,
            boards,
            info_hits: tracker.info_hits(),
            rejected_info_hits: tracker.rejected(),
            beacons,
            detector_hits: counters.detectors,
            outputs: counters.outputs,
            windows: counters.windows,
            records: counters.records,
            time_regressions: counters.time_regressions,
            trigger_misses: counters.trigger_misses,
        }
    }
    /// Data hits from every board of one sfp.
    pub fn sfp_hits(&self, sfp: u8) -> u64 {
        self.boards
            .iter()
            .filter(|b| b.sfp == sfp)
            .map(|b| b.hits)
            .sum()
    }

    pub fn beacon_count(&self, kind: BeaconKind) -> u64 {
        self.beacons
            .iter()
            .find(|b| b.kind == kind)
            .map_or(0, |b| b.count)
    }
}
