use crate::hit::{time_difference, CdSide, DetectorIdentity};

/// Buffered hit in a Miniball crystal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MiniballHit {
    pub energy: f32,
    pub time: u64,
    pub cluster: u8,
    pub crystal: u8,
    /// Segment 0 is the core.
    pub segment: u8,
}

/// Buffered hit in a CD strip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CdHit {
    pub energy: f32,
    pub time: u64,
    pub detector: u8,
    pub sector: u8,
    pub side: CdSide,
    pub strip: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeamDumpHit {
    pub energy: f32,
    pub time: u64,
    pub detector: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpedeHit {
    pub energy: f32,
    pub time: u64,
    pub segment: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IonChamberHit {
    pub energy: f32,
    pub time: u64,
    pub layer: u8,
}

/// A gamma ray seen by Miniball.
///
/// Used both for single-crystal events (energy of one core) and for addback
/// events (sum of core energies in one cluster). In both cases the crystal,
/// segment and time are those of the highest energy contributor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GammaRayEvent {
    pub energy: f32,
    pub segment_energy: f32,
    pub cluster: u8,
    pub crystal: u8,
    /// 0 if no segment fired.
    pub segment: u8,
    pub time: u64,
}

/// A charged particle reconstructed from the CD.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleEvent {
    pub energy_p: f32,
    pub energy_n: f32,
    pub time_p: u64,
    pub time_n: u64,
    pub detector: u8,
    pub sector: u8,
    pub strip_p: u8,
    pub strip_n: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeamDumpEvent {
    pub energy: f32,
    pub time: u64,
    pub detector: u8,
}

/// A conversion electron seen by SPEDE.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpedeEvent {
    pub energy: f32,
    pub time: u64,
    pub segment: u8,
}

/// Coincident signals in the layers of the ion chamber.
#[derive(Clone, Debug, PartialEq)]
pub struct IonChamberEvent {
    /// (energy, layer) of every member, seed first.
    pub energies: Vec<(f32, u8)>,
    /// Time of the first (gas) layer, if present.
    pub de_time: Option<u64>,
    /// Time of the final (Si) layer, if present.
    pub e_time: Option<u64>,
    pub final_layer: u8,
}

impl IonChamberEvent {
    /// Energy deposited before the final layer.
    pub fn energy_loss(&self) -> f32 {
        self.energies
            .iter()
            .filter(|(_, layer)| *layer < self.final_layer)
            .map(|(energy, _)| energy)
            .sum()
    }
    /// Energy deposited in the final layer.
    pub fn energy_rest(&self) -> f32 {
        self.energies
            .iter()
            .filter(|(_, layer)| *layer == self.final_layer)
            .map(|(energy, _)| energy)
            .sum()
    }
}

/// Output of one closed event window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventRecord {
    pub gamma_rays: Vec<GammaRayEvent>,
    pub gamma_ray_addbacks: Vec<GammaRayEvent>,
    pub particles: Vec<ParticleEvent>,
    pub beam_dumps: Vec<BeamDumpEvent>,
    pub spedes: Vec<SpedeEvent>,
    pub ion_chambers: Vec<IonChamberEvent>,
    /// Latest EBIS epoch when the window closed (0 if none seen yet).
    pub ebis: u64,
    /// Latest T1 epoch when the window closed (0 if none seen yet).
    pub t1: u64,
    /// Latest SuperCycle epoch when the window closed (0 if none seen yet).
    pub super_cycle: u64,
    /// Time of the acquisition trigger that read out the window, if known.
    pub trigger_time: Option<u64>,
}

impl EventRecord {
    pub fn is_empty(&self) -> bool {
        self.gamma_rays.is_empty()
            && self.gamma_ray_addbacks.is_empty()
            && self.particles.is_empty()
            && self.beam_dumps.is_empty()
            && self.spedes.is_empty()
            && self.ion_chambers.is_empty()
    }
}

/// An event window that is still accepting hits.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OpenEvent {
    pub(crate) first_time: u64,
    pub(crate) min_time: u64,
    pub(crate) max_time: u64,
    pub(crate) hit_count: usize,
    pub(crate) trigger_id: u64,
    pub(crate) miniball: Vec<MiniballHit>,
    pub(crate) cd: Vec<CdHit>,
    pub(crate) beam_dump: Vec<BeamDumpHit>,
    pub(crate) spede: Vec<SpedeHit>,
    pub(crate) ion_chamber: Vec<IonChamberHit>,
}

impl OpenEvent {
    pub(crate) fn new(time: u64, trigger_id: u64) -> Self {
        Self {
            first_time: time,
            min_time: time,
            max_time: time,
            hit_count: 0,
            trigger_id,
            miniball: Vec::new(),
            cd: Vec::new(),
            beam_dump: Vec::new(),
            spede: Vec::new(),
            ion_chamber: Vec::new(),
        }
    }
    /// Signed time since the first hit of the window.
    pub(crate) fn elapsed(&self, time: u64) -> i64 {
        time_difference(time, self.first_time)
    }
    /// Adds a classified hit to the matching buffer.
    pub(crate) fn admit(&mut self, id: DetectorIdentity, energy: f32, time: u64) {
        match id {
            DetectorIdentity::Miniball {
                cluster,
                crystal,
                segment,
            } => self.miniball.push(MiniballHit {
                energy,
                time,
                cluster,
                crystal,
                segment,
            }),
            DetectorIdentity::Cd {
                detector,
                sector,
                side,
                strip,
            } => self.cd.push(CdHit {
                energy,
                time,
                detector,
                sector,
                side,
                strip,
            }),
            DetectorIdentity::BeamDump { detector } => self.beam_dump.push(BeamDumpHit {
                energy,
                time,
                detector,
            }),
            DetectorIdentity::Spede { segment } => self.spede.push(SpedeHit {
                energy,
                time,
                segment,
            }),
            DetectorIdentity::IonChamber { layer } => {
                self.ion_chamber.push(IonChamberHit {
                    energy,
                    time,
                    layer,
                })
            }
            // Filtered out by the aggregator before a window is opened
            DetectorIdentity::Unclassified => return,
        }
        self.hit_count += 1;
        self.min_time = self.min_time.min(time);
        self.max_time = self.max_time.max(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_event_admit() {
        let mut event = OpenEvent::new(100, 1);
        event.admit(DetectorIdentity::Spede { segment: 3 }, 5.0, 120);
        event.admit(DetectorIdentity::BeamDump { detector: 0 }, 6.0, 90);
        event.admit(DetectorIdentity::Unclassified, 7.0, 200);

        assert_eq!(event.hit_count, 2);
        assert_eq!((event.min_time, event.max_time), (90, 120));
        assert_eq!(event.spede.len(), 1);
        assert_eq!(event.beam_dump.len(), 1);
    }

    #[test]
    fn open_event_elapsed() {
        let event = OpenEvent::new(1000, 1);
        assert_eq!(event.elapsed(1500), 500);
        assert_eq!(event.elapsed(400), -600);
    }

    #[test]
    fn ion_chamber_energy_split() {
        let event = IonChamberEvent {
            energies: vec![(10.0, 0), (30.0, 2), (5.0, 1)],
            de_time: Some(1),
            e_time: Some(2),
            final_layer: 2,
        };
        assert_eq!(event.energy_loss(), 15.0);
        assert_eq!(event.energy_rest(), 30.0);
    }

    #[test]
    fn event_record_is_empty() {
        let mut record = EventRecord {
            ebis: 10,
            ..Default::default()
        };
        assert!(record.is_empty());

        record.spedes.push(SpedeEvent {
            energy: 1.0,
            time: 2,
            segment: 0,
        });
        assert!(!record.is_empty());
    }
}
