//! Detectors without any correlation between hits: every buffered hit is an
//! event of its own.

use crate::event::{BeamDumpEvent, BeamDumpHit, SpedeEvent, SpedeHit};

pub(crate) fn beam_dump(hits: &[BeamDumpHit]) -> Vec<BeamDumpEvent> {
    hits.iter()
        .map(|hit| BeamDumpEvent {
            energy: hit.energy,
            time: hit.time,
            detector: hit.detector,
        })
        .collect()
}

pub(crate) fn spede(hits: &[SpedeHit]) -> Vec<SpedeEvent> {
    hits.iter()
        .map(|hit| SpedeEvent {
            energy: hit.energy,
            time: hit.time,
            segment: hit.segment,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beam_dump_copies_every_hit() {
        let hits = [
            BeamDumpHit {
                energy: 511.0,
                time: 10,
                detector: 0,
            },
            BeamDumpHit {
                energy: 1332.0,
                time: 12,
                detector: 1,
            },
        ];
        let events = beam_dump(&hits);

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].energy, 1332.0);
        assert_eq!(events[1].time, 12);
        assert_eq!(events[1].detector, 1);
    }

    #[test]
    fn spede_copies_every_hit() {
        let hits = [SpedeHit {
            energy: 320.0,
            time: 99,
            segment: 17,
        }];

        assert_eq!(
            spede(&hits),
            vec![SpedeEvent {
                energy: 320.0,
                time: 99,
                segment: 17
            }]
        );
        assert!(spede(&[]).is_empty());
    }
}
