use crate::hit::{CdSide, DetectorIdentity};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use winnow::ascii::{line_ending, space0, till_line_ending};
use winnow::combinator::{alt, opt, preceded, separated, separated_pair, terminated};
use winnow::error::ContextError;
use winnow::token::take_while;
use winnow::Parser;

const SFPS: u8 = 2;
const BOARDS: u8 = 12;
const CHANNELS: u8 = 16;
const MINIBALL_CLUSTERS: u8 = 8;
const MINIBALL_CRYSTALS: u8 = 3;
const MINIBALL_SEGMENTS: u8 = 7;
const CD_DETECTORS: u8 = 1;
const CD_SECTORS: u8 = 4;
const CD_P_STRIPS: u8 = 16;
const CD_N_STRIPS: u8 = 12;
const BEAM_DUMP_DETECTORS: u8 = 1;
const SPEDE_SEGMENTS: u8 = 24;
const ION_CHAMBER_LAYERS: u8 = 2;
const EVENT_WINDOW: u64 = 3_000;
const ION_CHAMBER_HIT_WINDOW: u64 = 500;

/// Codes carried by info hits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfoCodes {
    pub pause: u8,
    pub resume: u8,
    pub sync: u8,
    pub timestamp_high: u8,
    pub pulser: u8,
    pub ebis: u8,
    pub t1: u8,
    pub super_cycle: u8,
}

impl Default for InfoCodes {
    fn default() -> Self {
        Self {
            pause: 2,
            resume: 3,
            sync: 4,
            timestamp_high: 5,
            pulser: 20,
            ebis: 21,
            t1: 22,
            super_cycle: 23,
        }
    }
}

/// Everything the event builder needs to know about the hardware.
///
/// Implementors map a hardware address to the detector element wired to it
/// and provide the time windows used to correlate hits.
pub trait ChannelClassifier {
    /// Returns [`DetectorIdentity::Unclassified`] for unknown or out of range
    /// addresses.
    fn classify(&self, sfp: u8, board: u8, channel: u8) -> DetectorIdentity;
    /// Width of an event window in nanoseconds.
    fn event_window(&self) -> u64;
    /// Coincidence window between ion chamber layers in nanoseconds.
    fn ion_chamber_hit_window(&self) -> u64;
    fn ion_chamber_layers(&self) -> u8;
    fn sfps(&self) -> u8;
    fn boards(&self) -> u8;
    fn info_codes(&self) -> InfoCodes;
}

/// The error type returned when a settings file cannot be understood.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: String, value: String },
}

/// The error type returned when parsing a settings file fails.
#[derive(Debug)]
pub struct ParseError {
    input: String,
    span: std::ops::Range<usize>,
}

impl ParseError {
    fn from_parse(error: winnow::error::ParseError<&str, ContextError>) -> Self {
        let input = error.input().to_string();
        let span = error.char_span();
        Self { input, span }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = annotate_snippets::Level::Error
            .title("expected `Key: value`, a `#` comment, or a blank line")
            .snippet(
                annotate_snippets::Snippet::source(&self.input)
                    .fold(true)
                    .annotation(annotate_snippets::Level::Error.span(self.span.clone())),
            );
        let renderer = annotate_snippets::Renderer::plain();
        let rendered = renderer.render(message);
        rendered.fmt(f)
    }
}

impl std::error::Error for ParseError {}

fn key<'i>(input: &mut &'i str) -> winnow::Result<&'i str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
    })
    .parse_next(input)
}

fn entry<'i>(input: &mut &'i str) -> winnow::Result<(&'i str, &'i str)> {
    separated_pair(key, (space0, ':', space0), till_line_ending)
        .map(|(k, v): (&str, &str)| (k, v.trim_end()))
        .parse_next(input)
}

fn comment<'i>(input: &mut &'i str) -> winnow::Result<()> {
    ('#', till_line_ending).void().parse_next(input)
}

// Blank lines and comments parse as `None`.
fn line<'i>(input: &mut &'i str) -> winnow::Result<Option<(&'i str, &'i str)>> {
    preceded(
        space0,
        opt(alt((entry.map(Some), comment.value(None)))).map(Option::flatten),
    )
    .parse_next(input)
}

/// Detector layout and timing configuration.
///
/// The text format is one `Key: value` pair per line. Unknown keys are kept
/// so that per-channel wiring overrides (e.g. `Miniball_0_1_2.Board: 3`) can
/// be read back when building a [`ChannelMap`].
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub sfps: u8,
    pub boards: u8,
    pub channels: u8,
    pub miniball_clusters: u8,
    pub miniball_crystals: u8,
    pub miniball_segments: u8,
    pub cd_detectors: u8,
    pub cd_sectors: u8,
    pub cd_p_strips: u8,
    pub cd_n_strips: u8,
    pub beam_dump_detectors: u8,
    pub spede_segments: u8,
    pub ion_chamber_layers: u8,
    /// Nanoseconds.
    pub event_window: u64,
    /// Nanoseconds.
    pub ion_chamber_hit_window: u64,
    pub info_codes: InfoCodes,
    entries: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sfps: SFPS,
            boards: BOARDS,
            channels: CHANNELS,
            miniball_clusters: MINIBALL_CLUSTERS,
            miniball_crystals: MINIBALL_CRYSTALS,
            miniball_segments: MINIBALL_SEGMENTS,
            cd_detectors: CD_DETECTORS,
            cd_sectors: CD_SECTORS,
            cd_p_strips: CD_P_STRIPS,
            cd_n_strips: CD_N_STRIPS,
            beam_dump_detectors: BEAM_DUMP_DETECTORS,
            spede_segments: SPEDE_SEGMENTS,
            ion_chamber_layers: ION_CHAMBER_LAYERS,
            event_window: EVENT_WINDOW,
            ion_chamber_hit_window: ION_CHAMBER_HIT_WINDOW,
            info_codes: InfoCodes::default(),
            entries: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Builds the settings from raw key/value pairs. Missing keys take their
    /// default value.
    pub fn from_entries(entries: BTreeMap<String, String>) -> Result<Self, SettingsError> {
        let mut settings = Self {
            entries,
            ..Self::default()
        };
        settings.sfps = settings.get("NumberOfFebexSfps", SFPS)?;
        settings.boards = settings.get("NumberOfFebexBoards", BOARDS)?;
        settings.channels = settings.get("NumberOfFebexChannels", CHANNELS)?;
        settings.miniball_clusters = settings.get("NumberOfMiniballClusters", MINIBALL_CLUSTERS)?;
        settings.miniball_crystals = settings.get("NumberOfMiniballCrystals", MINIBALL_CRYSTALS)?;
        settings.miniball_segments = settings.get("NumberOfMiniballSegments", MINIBALL_SEGMENTS)?;
        settings.cd_detectors = settings.get("NumberOfCDDetectors", CD_DETECTORS)?;
        settings.cd_sectors = settings.get("NumberOfCDSectors", CD_SECTORS)?;
        settings.cd_p_strips = settings.get("NumberOfCDStrips.P", CD_P_STRIPS)?;
        settings.cd_n_strips = settings.get("NumberOfCDStrips.N", CD_N_STRIPS)?;
        settings.beam_dump_detectors =
            settings.get("NumberOfBeamDumpDetectors", BEAM_DUMP_DETECTORS)?;
        settings.spede_segments = settings.get("NumberOfSpedeSegments", SPEDE_SEGMENTS)?;
        settings.ion_chamber_layers =
            settings.get("NumberOfIonChamberLayers", ION_CHAMBER_LAYERS)?;
        settings.event_window = settings.get_nanoseconds("EventWindow", EVENT_WINDOW)?;
        settings.ion_chamber_hit_window =
            settings.get_nanoseconds("IonChamberHitWindow", ION_CHAMBER_HIT_WINDOW)?;

        Ok(settings)
    }
    /// Returns the value of `key`, or `default` if the key is absent.
    pub fn get<T: FromStr>(&self, key: &str, default: T) -> Result<T, SettingsError> {
        match self.entries.get(key) {
            Some(value) => value.parse().map_err(|_| SettingsError::InvalidValue {
                key: key.to_string(),
                value: value.clone(),
            }),
            None => Ok(default),
        }
    }
    // Windows are written as floating point (e.g. `3e3`).
    fn get_nanoseconds(&self, key: &str, default: u64) -> Result<u64, SettingsError> {
        let value: f64 = self.get(key, default as f64)?;
        if !value.is_finite() || value < 0.0 {
            return Err(SettingsError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }

        Ok(value.round() as u64)
    }
}

impl FromStr for Settings {
    type Err = SettingsError;

    /// Parse [`Settings`] from the contents of a settings file.
    ///
    /// # Examples
    ///
    /// ```
    /// # use evb::settings::Settings;
    /// # use std::str::FromStr;
    /// let settings = Settings::from_str("EventWindow: 2e3\n# comment\n")?;
    /// assert_eq!(settings.event_window, 2000);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let lines: Vec<Option<(&str, &str)>> =
            terminated(separated(0.., line, line_ending), opt(line_ending))
                .parse(input)
                .map_err(ParseError::from_parse)?;

        let entries = lines
            .into_iter()
            .flatten()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self::from_entries(entries)
    }
}

/// Flat (sfp, board, channel) -> [`DetectorIdentity`] lookup table.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelMap {
    table: Vec<DetectorIdentity>,
    sfps: u8,
    boards: u8,
    channels: u8,
    ion_chamber_layers: u8,
    event_window: u64,
    ion_chamber_hit_window: u64,
    info_codes: InfoCodes,
}

impl ChannelMap {
    /// Wire every detector element described by `settings`.
    ///
    /// Elements wired to an address outside the acquisition, or to an address
    /// already taken, are skipped with a warning. Earlier detector types take
    /// priority: Miniball, CD, SPEDE, beam dump, ion chamber.
    pub fn new(settings: &Settings) -> Result<Self, SettingsError> {
        let size = usize::from(settings.sfps)
            * usize::from(settings.boards)
            * usize::from(settings.channels);
        let mut map = Self {
            table: vec![DetectorIdentity::Unclassified; size],
            sfps: settings.sfps,
            boards: settings.boards,
            channels: settings.channels,
            ion_chamber_layers: settings.ion_chamber_layers,
            event_window: settings.event_window,
            ion_chamber_hit_window: settings.ion_chamber_hit_window,
            info_codes: settings.info_codes,
        };

        for cluster in 0..settings.miniball_clusters {
            for crystal in 0..settings.miniball_crystals {
                for segment in 0..settings.miniball_segments {
                    // 2 crystals per board, odd crystals start at channel 9
                    let d = u32::from(cluster) * 3 + u32::from(crystal);
                    let default = (0, d / 2, u32::from(segment) + 9 * (d & 1));
                    let prefix = format!("Miniball_{cluster}_{crystal}_{segment}");
                    let address = wiring(settings, &prefix, default)?;
                    map.assign(
                        &prefix,
                        address,
                        DetectorIdentity::Miniball {
                            cluster,
                            crystal,
                            segment,
                        },
                    );
                }
            }
        }

        for detector in 0..settings.cd_detectors {
            for sector in 0..settings.cd_sectors {
                for (k, side) in [CdSide::P, CdSide::N].into_iter().enumerate() {
                    let (strips, tag) = match side {
                        CdSide::P => (settings.cd_p_strips, "P"),
                        CdSide::N => (settings.cd_n_strips, "N"),
                    };
                    for strip in 0..strips {
                        let default = (1, u32::from(sector) * 2 + k as u32, u32::from(strip));
                        let prefix = format!("CD_{detector}_{sector}_{strip}.{tag}");
                        let address = wiring(settings, &prefix, default)?;
                        map.assign(
                            &prefix,
                            address,
                            DetectorIdentity::Cd {
                                detector,
                                sector,
                                side,
                                strip,
                            },
                        );
                    }
                }
            }
        }

        for segment in 0..settings.spede_segments {
            let default = match segment {
                0..=15 => (1, 8, u32::from(segment)),
                _ => (1, 9, u32::from(segment) - 16),
            };
            let prefix = format!("Spede_{segment}");
            let address = wiring(settings, &prefix, default)?;
            map.assign(&prefix, address, DetectorIdentity::Spede { segment });
        }

        for detector in 0..settings.beam_dump_detectors {
            let prefix = format!("BeamDump_{detector}");
            let address = wiring(settings, &prefix, (1, 10, u32::from(detector)))?;
            map.assign(&prefix, address, DetectorIdentity::BeamDump { detector });
        }

        for layer in 0..settings.ion_chamber_layers {
            let prefix = format!("IonChamber_{layer}");
            let address = wiring(settings, &prefix, (1, 10, 8 + u32::from(layer)))?;
            map.assign(&prefix, address, DetectorIdentity::IonChamber { layer });
        }

        Ok(map)
    }

    fn index(&self, sfp: u32, board: u32, channel: u32) -> Option<usize> {
        if sfp < u32::from(self.sfps)
            && board < u32::from(self.boards)
            && channel < u32::from(self.channels)
        {
            let index = (sfp * u32::from(self.boards) + board) * u32::from(self.channels) + channel;
            Some(index as usize)
        } else {
            None
        }
    }

    fn assign(&mut self, name: &str, (sfp, board, channel): (u32, u32, u32), id: DetectorIdentity) {
        let Some(index) = self.index(sfp, board, channel) else {
            log::warn!(
                "{name} wired outside the acquisition: \
                 sfp = {sfp}, board = {board}, channel = {channel}"
            );
            return;
        };
        match self.table[index] {
            DetectorIdentity::Unclassified => self.table[index] = id,
            taken => log::warn!(
                "{name} wired to sfp = {sfp}, board = {board}, channel = {channel}, \
                 already used by {taken:?}"
            ),
        }
    }
}

fn wiring(
    settings: &Settings,
    prefix: &str,
    (sfp, board, channel): (u32, u32, u32),
) -> Result<(u32, u32, u32), SettingsError> {
    Ok((
        settings.get(&format!("{prefix}.Sfp"), sfp)?,
        settings.get(&format!("{prefix}.Board"), board)?,
        settings.get(&format!("{prefix}.Channel"), channel)?,
    ))
}

impl ChannelClassifier for ChannelMap {
    fn classify(&self, sfp: u8, board: u8, channel: u8) -> DetectorIdentity {
        match self.index(sfp.into(), board.into(), channel.into()) {
            Some(index) => self.table[index],
            None => {
                log::debug!("unknown channel: sfp = {sfp}, board = {board}, channel = {channel}");
                DetectorIdentity::Unclassified
            }
        }
    }

    fn event_window(&self) -> u64 {
        self.event_window
    }

    fn ion_chamber_hit_window(&self) -> u64 {
        self.ion_chamber_hit_window
    }

    fn ion_chamber_layers(&self) -> u8 {
        self.ion_chamber_layers
    }

    fn sfps(&self) -> u8 {
        self.sfps
    }

    fn boards(&self) -> u8 {
        self.boards
    }

    fn info_codes(&self) -> InfoCodes {
        self.info_codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default() {
        let settings = Settings::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.event_window, 3000);
        assert_eq!(settings.ion_chamber_hit_window, 500);
        assert_eq!(settings.info_codes.ebis, 21);
    }

    #[test]
    fn settings_from_str() {
        let string = "# Miniball settings
NumberOfFebexSfps:   3

EventWindow: 1.5e3
  IonChamberHitWindow: 250
NumberOfCDStrips.N: 8
Miniball_0_0_0.Board: 4
";
        let settings = Settings::from_str(string).unwrap();
        assert_eq!(settings.sfps, 3);
        assert_eq!(settings.event_window, 1500);
        assert_eq!(settings.ion_chamber_hit_window, 250);
        assert_eq!(settings.cd_n_strips, 8);
        assert_eq!(settings.boards, 12);
        assert_eq!(settings.get("Miniball_0_0_0.Board", 0u32).unwrap(), 4);
        assert_eq!(settings.get("Miniball_0_0_1.Board", 7u32).unwrap(), 7);
    }

    #[test]
    fn settings_crlf() {
        let settings =
            Settings::from_str("EventWindow: 100\r\nNumberOfFebexBoards: 4\r\n").unwrap();
        assert_eq!(settings.event_window, 100);
        assert_eq!(settings.boards, 4);
    }

    #[test]
    fn settings_malformed_line() {
        let err = Settings::from_str("EventWindow: 100\nthis is wrong\n").unwrap_err();
        let SettingsError::Parse(err) = err else {
            panic!("expected a parse error");
        };
        assert_eq!(err.span.start, "EventWindow: 100\n".len());
        assert!(err.to_string().contains("this is wrong"));
    }

    #[test]
    fn settings_invalid_value() {
        let err = Settings::from_str("NumberOfFebexSfps: many").unwrap_err();
        assert!(matches!(
            err,
            SettingsError::InvalidValue { ref key, .. } if key == "NumberOfFebexSfps"
        ));

        let err = Settings::from_str("EventWindow: -5").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));
    }

    #[test]
    fn channel_map_default_wiring() {
        let map = ChannelMap::new(&Settings::default()).unwrap();

        assert_eq!(
            map.classify(0, 0, 0),
            DetectorIdentity::Miniball {
                cluster: 0,
                crystal: 0,
                segment: 0
            }
        );
        // Crystal 1 of cluster 0 starts at channel 9 of board 0
        assert_eq!(
            map.classify(0, 0, 12),
            DetectorIdentity::Miniball {
                cluster: 0,
                crystal: 1,
                segment: 3
            }
        );
        assert_eq!(
            map.classify(1, 3, 5),
            DetectorIdentity::Cd {
                detector: 0,
                sector: 1,
                side: CdSide::N,
                strip: 5
            }
        );
        assert_eq!(map.classify(1, 9, 2), DetectorIdentity::Spede { segment: 18 });
        assert_eq!(map.classify(1, 10, 0), DetectorIdentity::BeamDump { detector: 0 });
        assert_eq!(map.classify(1, 10, 9), DetectorIdentity::IonChamber { layer: 1 });
        assert_eq!(map.classify(1, 11, 0), DetectorIdentity::Unclassified);
        assert_eq!(map.classify(5, 0, 0), DetectorIdentity::Unclassified);
        assert_eq!(map.classify(0, 0, 200), DetectorIdentity::Unclassified);
    }

    #[test]
    fn channel_map_override() {
        let settings = Settings::from_str(
            "BeamDump_0.Board: 11
BeamDump_0.Channel: 15
IonChamber_0.Sfp: 9",
        )
        .unwrap();
        let map = ChannelMap::new(&settings).unwrap();

        assert_eq!(map.classify(1, 10, 0), DetectorIdentity::Unclassified);
        assert_eq!(map.classify(1, 11, 15), DetectorIdentity::BeamDump { detector: 0 });
        // Out of range wiring is dropped
        assert_eq!(map.classify(1, 10, 8), DetectorIdentity::Unclassified);
    }

    #[test]
    fn channel_map_collision_keeps_first() {
        let settings =
            Settings::from_str("IonChamber_1.Board: 10\nIonChamber_1.Channel: 0").unwrap();
        let map = ChannelMap::new(&settings).unwrap();

        assert_eq!(map.classify(1, 10, 0), DetectorIdentity::BeamDump { detector: 0 });
    }
}
