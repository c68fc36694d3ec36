use crate::event::{IonChamberEvent, IonChamberHit};
use crate::hit::time_difference;
use crate::Observer;

/// Group the ion chamber hits of one window into layer coincidences.
///
/// Every hit seeds its own group, including hits that already joined the
/// group of an earlier seed. Two coincident layers therefore give two events
/// with the same members in a different order.
pub(crate) fn reconstruct<O: Observer>(
    hits: &[IonChamberHit],
    window: u64,
    layers: u8,
    observer: &mut O,
) -> Vec<IonChamberEvent> {
    let final_layer = layers.saturating_sub(1);
    let mut events = Vec::with_capacity(hits.len());

    for (i, seed) in hits.iter().enumerate() {
        let mut event = IonChamberEvent {
            energies: Vec::new(),
            de_time: None,
            e_time: None,
            final_layer,
        };
        let mut used = vec![false; hits.len()];
        let mut seen_layers = [false; 256];

        join(&mut event, seed);
        used[i] = true;
        seen_layers[usize::from(seed.layer)] = true;

        for (j, other) in hits.iter().enumerate() {
            if i == j {
                continue;
            }
            let dt = time_difference(seed.time, other.time);
            observer.on_ion_chamber_time_difference(dt);

            if used[j] || seen_layers[usize::from(other.layer)] {
                continue;
            }
            if dt.unsigned_abs() < window {
                join(&mut event, other);
                used[j] = true;
                seen_layers[usize::from(other.layer)] = true;
            }
        }

        observer.on_ion_chamber(&event);
        events.push(event);
    }

    events
}

fn join(event: &mut IonChamberEvent, hit: &IonChamberHit) {
    event.energies.push((hit.energy, hit.layer));
    if hit.layer == 0 {
        event.de_time = Some(hit.time);
    } else if hit.layer == event.final_layer {
        event.e_time = Some(hit.time);
    }
}
