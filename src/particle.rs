use crate::event::{CdHit, ParticleEvent};
use crate::hit::{time_difference, CdSide};
use crate::Observer;
use std::collections::BTreeMap;

/// Which sides two correlated CD strips belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StripPair {
    Pn,
    Pp,
    Nn,
}

/// P-side by N-side multiplicity of a charge sharing candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Multiplicity {
    OneOne,
    OneTwo,
    TwoOne,
    TwoTwo,
}

/// Reconstruct particles from the CD hits of one window.
///
/// Hits are treated independently per (detector, sector), in ascending
/// order. Neighbouring strips on the same side are assumed to share the
/// charge of a single particle and their energies are summed.
pub(crate) fn reconstruct<O: Observer>(hits: &[CdHit], observer: &mut O) -> Vec<ParticleEvent> {
    let mut sectors: BTreeMap<(u8, u8), (Vec<&CdHit>, Vec<&CdHit>)> = BTreeMap::new();
    for hit in hits {
        let (p, n) = sectors.entry((hit.detector, hit.sector)).or_default();
        match hit.side {
            CdSide::P => p.push(hit),
            CdSide::N => n.push(hit),
        }
    }

    let mut particles = Vec::new();
    for ((detector, sector), (p, n)) in sectors {
        observe(detector, sector, &p, &n, observer);
        particles.extend(Sector { detector, sector }.reconstruct(&p, &n, observer));
    }

    particles
}

fn observe<O: Observer>(detector: u8, sector: u8, p: &[&CdHit], n: &[&CdHit], observer: &mut O) {
    observer.on_particle_multiplicity(detector, sector, p.len(), n.len());

    for (i, p1) in p.iter().enumerate() {
        for n1 in n {
            let dt = time_difference(p1.time, n1.time);
            observer.on_particle_time_difference(detector, sector, StripPair::Pn, dt);
        }
        for p2 in &p[i + 1..] {
            let dt = time_difference(p1.time, p2.time);
            observer.on_particle_time_difference(detector, sector, StripPair::Pp, dt);
        }
    }
    for (i, n1) in n.iter().enumerate() {
        for n2 in &n[i + 1..] {
            let dt = time_difference(n1.time, n2.time);
            observer.on_particle_time_difference(detector, sector, StripPair::Nn, dt);
        }
    }
}

// First hit wins ties.
fn max_energy<'a>(side: &[&'a CdHit]) -> Option<&'a CdHit> {
    let mut max: Option<&CdHit> = None;
    for &hit in side {
        if max.map_or(true, |m| hit.energy > m.energy) {
            max = Some(hit);
        }
    }

    max
}

fn neighbours(a: &CdHit, b: &CdHit) -> bool {
    a.strip.abs_diff(b.strip) == 1
}

#[derive(Clone, Copy, Debug)]
struct Sector {
    detector: u8,
    sector: u8,
}

impl Sector {
    /// `p` and `n` supply strip and time; the energies are given separately
    /// because they may be sums over neighbouring strips.
    fn particle(&self, p: &CdHit, n: &CdHit, energy_p: f32, energy_n: f32) -> ParticleEvent {
        ParticleEvent {
            energy_p,
            energy_n,
            time_p: p.time,
            time_n: n.time,
            detector: self.detector,
            sector: self.sector,
            strip_p: p.strip,
            strip_n: n.strip,
        }
    }

    fn pair<O: Observer>(&self, class: Multiplicity, p: &CdHit, n: &CdHit, observer: &mut O) {
        observer.on_particle_energy(self.detector, self.sector, class, p.energy, n.energy);
    }

    fn reconstruct<O: Observer>(
        &self,
        p: &[&CdHit],
        n: &[&CdHit],
        observer: &mut O,
    ) -> Vec<ParticleEvent> {
        let (Some(p_max), Some(n_max)) = (max_energy(p), max_energy(n)) else {
            return Vec::new();
        };

        match (p, n) {
            ([p0], [n0]) => {
                self.pair(Multiplicity::OneOne, p0, n0, observer);
                vec![self.particle(p0, n0, p0.energy, n0.energy)]
            }
            ([p0], [n0, n1]) => {
                if neighbours(n0, n1) {
                    self.pair(Multiplicity::OneTwo, p0, n0, observer);
                    self.pair(Multiplicity::OneTwo, p0, n1, observer);
                    vec![self.particle(p0, n_max, p0.energy, n0.energy + n1.energy)]
                } else {
                    vec![self.particle(p0, n_max, p0.energy, n_max.energy)]
                }
            }
            ([p0, p1], [n0]) => {
                if neighbours(p0, p1) {
                    self.pair(Multiplicity::TwoOne, p0, n0, observer);
                    self.pair(Multiplicity::TwoOne, p1, n0, observer);
                    vec![self.particle(p_max, n0, p0.energy + p1.energy, n0.energy)]
                } else {
                    vec![self.particle(p_max, n0, p_max.energy, n0.energy)]
                }
            }
            ([p0, p1], [n0, n1]) => {
                let p_sum = p0.energy + p1.energy;
                let n_sum = n0.energy + n1.energy;
                let mut particles = Vec::new();

                // The n-side branch is evaluated on its own, so neighbours on
                // both sides give two overlapping particles.
                if neighbours(p0, p1) && neighbours(n0, n1) {
                    for (pi, ni) in [(p0, n0), (p0, n1), (p1, n0), (p1, n1)] {
                        self.pair(Multiplicity::TwoTwo, pi, ni, observer);
                    }
                    particles.push(self.particle(p_max, n_max, p_sum, n_sum));
                } else if neighbours(p0, p1) {
                    particles.push(self.particle(p_max, n_max, p_sum, n_max.energy));
                }
                if neighbours(n0, n1) {
                    particles.push(self.particle(p_max, n_max, p_max.energy, n_sum));
                }

                particles
            }
            _ => vec![self.particle(p_max, n_max, p_max.energy, n_max.energy)],
        }
    }
}
