use crate::hit::{time_difference, HitKind, RawHit};
use crate::settings::InfoCodes;
use crate::Observer;
use uom::si::f64::{Frequency, Time};
use uom::si::frequency::hertz;
use uom::si::time::nanosecond;

/// Repeated beacon words closer than this (in nanoseconds) are the same
/// epoch seen by more than one board.
pub const DEDUPE_THRESHOLD: u64 = 1_000;

/// Periodic timing references recorded by the acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum BeaconKind {
    Pulser,
    /// Charge breeder extraction.
    Ebis,
    /// Proton pulse on the production target.
    T1,
    SuperCycle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BeaconState {
    /// Latest epoch in nanoseconds, 0 before the first one.
    pub last_time: u64,
    pub previous_time: u64,
    /// Signed interval between the last two epochs, `None` until two epochs
    /// have been seen.
    pub period: Option<Time>,
    /// `None` while the period is zero.
    pub frequency: Option<Frequency>,
    pub count: u64,
}

impl BeaconState {
    fn update<O: Observer>(&mut self, kind: BeaconKind, time: u64, observer: &mut O) {
        self.last_time = time;
        self.count += 1;
        if self.previous_time != 0 {
            // Negative across a time regression
            let ns = time_difference(self.last_time, self.previous_time) as f64;
            self.period = Some(Time::new::<nanosecond>(ns));
            self.frequency = (ns != 0.0).then(|| Frequency::new::<hertz>(1e9 / ns));
            observer.on_beacon(kind, self);
        }
        self.previous_time = self.last_time;
    }
}

/// Pause/resume bookkeeping and data rates of one readout board.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoardState {
    pub pause_time: u64,
    pub resume_time: u64,
    pub pause_count: u64,
    pub resume_count: u64,
    pub paused: bool,
    /// Nanoseconds spent paused.
    pub dead_time: u64,
    pub data_hits: u64,
    pub first_data_time: Option<u64>,
    pub last_data_time: u64,
}

/// Follows the beacons and board dead time from info hits.
///
/// Beacon and board state live for the whole stream; nothing is reset when an
/// event window closes.
#[derive(Clone, Debug)]
pub struct InfoSignalTracker {
    codes: InfoCodes,
    sfps: u8,
    boards: u8,
    pulser: BeaconState,
    ebis: BeaconState,
    t1: BeaconState,
    super_cycle: BeaconState,
    board_states: Vec<BoardState>,
    info_hits: u64,
    rejected: u64,
}

impl InfoSignalTracker {
    pub fn new(codes: InfoCodes, sfps: u8, boards: u8) -> Self {
        Self {
            codes,
            sfps,
            boards,
            pulser: BeaconState::default(),
            ebis: BeaconState::default(),
            t1: BeaconState::default(),
            super_cycle: BeaconState::default(),
            board_states: vec![BoardState::default(); usize::from(sfps) * usize::from(boards)],
            info_hits: 0,
            rejected: 0,
        }
    }

    pub fn beacon(&self, kind: BeaconKind) -> &BeaconState {
        match kind {
            BeaconKind::Pulser => &self.pulser,
            BeaconKind::Ebis => &self.ebis,
            BeaconKind::T1 => &self.t1,
            BeaconKind::SuperCycle => &self.super_cycle,
        }
    }

    fn beacon_mut(&mut self, kind: BeaconKind) -> &mut BeaconState {
        match kind {
            BeaconKind::Pulser => &mut self.pulser,
            BeaconKind::Ebis => &mut self.ebis,
            BeaconKind::T1 => &mut self.t1,
            BeaconKind::SuperCycle => &mut self.super_cycle,
        }
    }
    /// Returns `None` for addresses outside the acquisition.
    pub fn board(&self, sfp: u8, board: u8) -> Option<&BoardState> {
        self.index(sfp, board).map(|n| &self.board_states[n])
    }

    pub(crate) fn boards(&self) -> impl Iterator<Item = (u8, u8, &BoardState)> + '_ {
        let boards = self.boards;
        (0..self.sfps)
            .flat_map(move |sfp| (0..boards).map(move |board| (sfp, board)))
            .zip(self.board_states.iter())
            .map(|((sfp, board), state)| (sfp, board, state))
    }

    pub fn info_hits(&self) -> u64 {
        self.info_hits
    }
    /// Number of pause/resume words from unknown boards.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    fn index(&self, sfp: u8, board: u8) -> Option<usize> {
        (sfp < self.sfps && board < self.boards)
            .then(|| usize::from(sfp) * usize::from(self.boards) + usize::from(board))
    }
    /// Count a data hit for its board. Unknown boards are ignored.
    pub(crate) fn record_data(&mut self, sfp: u8, board: u8, time: u64) {
        if let Some(n) = self.index(sfp, board) {
            let state = &mut self.board_states[n];
            state.data_hits += 1;
            state.first_data_time.get_or_insert(time);
            state.last_data_time = time;
        }
    }
    /// Consume an info hit. Data hits are ignored.
    pub fn process<O: Observer>(&mut self, hit: &RawHit, observer: &mut O) {
        let HitKind::Info { code } = hit.kind else {
            return;
        };
        self.info_hits += 1;

        let codes = self.codes;
        let deduped = [
            (codes.ebis, BeaconKind::Ebis),
            (codes.t1, BeaconKind::T1),
            (codes.super_cycle, BeaconKind::SuperCycle),
        ];
        for (beacon_code, kind) in deduped {
            let state = self.beacon_mut(kind);
            if code == beacon_code && state.last_time.abs_diff(hit.time) > DEDUPE_THRESHOLD {
                state.update(kind, hit.time, observer);
            }
        }
        if code == codes.pulser {
            self.pulser.update(BeaconKind::Pulser, hit.time, observer);
        }

        if code == codes.pause {
            self.pause(hit);
        }
        if code == codes.resume {
            self.resume(hit, observer);
        }
    }

    fn pause(&mut self, hit: &RawHit) {
        let Some(n) = self.index(hit.sfp, hit.board) else {
            log::warn!("bad pause event in sfp {}, board {}", hit.sfp, hit.board);
            self.rejected += 1;
            return;
        };
        let state = &mut self.board_states[n];
        state.pause_count += 1;
        state.paused = true;
        state.pause_time = hit.time;
    }

    fn resume<O: Observer>(&mut self, hit: &RawHit, observer: &mut O) {
        let Some(n) = self.index(hit.sfp, hit.board) else {
            log::warn!("bad resume event in sfp {}, board {}", hit.sfp, hit.board);
            self.rejected += 1;
            return;
        };
        let state = &mut self.board_states[n];
        state.resume_count += 1;
        state.resume_time = hit.time;
        state.dead_time += state.resume_time.saturating_sub(state.pause_time);

        // No pause seen: the board was blocked from the start of the run
        if !state.paused {
            let blocked = Time::new::<nanosecond>(state.resume_time as f64);
            log::warn!(
                "sfp {}, board {} was blocked at start of run for {} seconds",
                hit.sfp,
                hit.board,
                state.resume_time as f64 / 1e9
            );
            observer.on_blocked_board(hit.sfp, hit.board, blocked);
        }
    }
}
