use crate::event::{GammaRayEvent, MiniballHit};
use crate::hit::time_difference;
use crate::Observer;

/// Segment number of a crystal's core.
pub const CORE: u8 = 0;
/// Core hits this long after an EBIS epoch are observed as "EBIS on".
pub const EBIS_ON_WINDOW: u64 = 1_500_000;

/// Build single-crystal gamma rays and cluster addback from the Miniball
/// hits of one window.
///
/// Returns `(singles, addbacks)`.
pub(crate) fn reconstruct<O: Observer>(
    hits: &[MiniballHit],
    ebis: u64,
    observer: &mut O,
) -> (Vec<GammaRayEvent>, Vec<GammaRayEvent>) {
    let singles = singles(hits, ebis, observer);
    let addbacks = addback(&singles);

    (singles, addbacks)
}

// One gamma ray per core, tagged with the segment that saw the most energy.
fn singles<O: Observer>(hits: &[MiniballHit], ebis: u64, observer: &mut O) -> Vec<GammaRayEvent> {
    let mut singles = Vec::new();

    for (i, core) in hits.iter().enumerate() {
        if core.segment != CORE {
            continue;
        }
        let mut max_segment = CORE;
        let mut max_segment_energy = 0.0;

        for (j, other) in hits.iter().enumerate() {
            if other.cluster != core.cluster || other.crystal != core.crystal {
                continue;
            }
            let ebis_on = other.time >= ebis && other.time - ebis < EBIS_ON_WINDOW;
            observer.on_core_segment_energy(core, other.segment, ebis_on);

            let dt = time_difference(core.time, other.time);
            if i == j || other.segment == CORE {
                observer.on_core_core_time_difference(dt);
                continue;
            }
            observer.on_core_segment_time_difference(dt);

            if other.energy > max_segment_energy {
                max_segment_energy = other.energy;
                max_segment = other.segment;
            }
        }

        singles.push(GammaRayEvent {
            energy: core.energy,
            segment_energy: max_segment_energy,
            cluster: core.cluster,
            crystal: core.crystal,
            segment: max_segment,
            time: core.time,
        });
    }

    singles
}

// Seeds are taken in production order, not energy order: the first unclaimed
// single of a cluster absorbs every later unclaimed single of that cluster.
fn addback(singles: &[GammaRayEvent]) -> Vec<GammaRayEvent> {
    let mut claimed = vec![false; singles.len()];
    let mut addbacks = Vec::new();

    for (i, seed) in singles.iter().enumerate() {
        if claimed[i] {
            continue;
        }
        let mut sum = seed.energy;
        let mut max = *seed;

        for (j, other) in singles.iter().enumerate().skip(i + 1) {
            if other.cluster != seed.cluster || claimed[j] {
                continue;
            }
            sum += other.energy;
            claimed[j] = true;

            if other.energy > max.energy {
                max = *other;
            }
        }

        addbacks.push(GammaRayEvent {
            energy: sum,
            segment_energy: max.segment_energy,
            cluster: seed.cluster,
            crystal: max.crystal,
            segment: max.segment,
            time: max.time,
        });
    }

    addbacks
}
