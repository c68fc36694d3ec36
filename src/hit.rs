/// The payload of a [`RawHit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HitKind {
    /// A digitized detector channel reading. The energy is assumed to be
    /// calibrated already.
    Data {
        channel: u8,
        energy: f32,
        over_threshold: bool,
    },
    /// A timing or status word from the acquisition (beacons, pause/resume).
    Info { code: u8 },
}

/// A [`RawHit`] is one entry of the time-ordered stream coming out of the
/// data acquisition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawHit {
    /// Timestamp in nanoseconds.
    pub time: u64,
    /// Identifier of the acquisition trigger that read this hit out.
    pub trigger_id: u64,
    pub sfp: u8,
    pub board: u8,
    pub kind: HitKind,
}

impl RawHit {
    /// Creates a data hit.
    pub fn data(
        time: u64,
        trigger_id: u64,
        (sfp, board, channel): (u8, u8, u8),
        energy: f32,
        over_threshold: bool,
    ) -> Self {
        Self {
            time,
            trigger_id,
            sfp,
            board,
            kind: HitKind::Data {
                channel,
                energy,
                over_threshold,
            },
        }
    }
    /// Creates an info hit.
    pub fn info(time: u64, trigger_id: u64, (sfp, board): (u8, u8), code: u8) -> Self {
        Self {
            time,
            trigger_id,
            sfp,
            board,
            kind: HitKind::Info { code },
        }
    }

    pub fn is_info(&self) -> bool {
        matches!(self.kind, HitKind::Info { .. })
    }
}

/// Side of a double-sided CD strip detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CdSide {
    P,
    N,
}

/// The detector element wired to a given (sfp, board, channel) address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DetectorIdentity {
    /// Miniball HPGe crystal. Segment 0 is the core.
    Miniball {
        cluster: u8,
        crystal: u8,
        segment: u8,
    },
    Cd {
        detector: u8,
        sector: u8,
        side: CdSide,
        strip: u8,
    },
    BeamDump {
        detector: u8,
    },
    Spede {
        segment: u8,
    },
    IonChamber {
        layer: u8,
    },
    #[default]
    Unclassified,
}

impl DetectorIdentity {
    pub fn is_classified(&self) -> bool {
        !matches!(self, DetectorIdentity::Unclassified)
    }
}

/// Signed difference `a - b` between two timestamps.
pub(crate) fn time_difference(a: u64, b: u64) -> i64 {
    (i128::from(a) - i128::from(b)) as i64
}
