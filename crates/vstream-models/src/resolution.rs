//! Resolution ladder and encoding profiles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// VP9 constant-quality target used alongside the bitrate envelope.
pub const VP9_CRF: u8 = 31;
/// Keyframe interval shared by every rendition so segments line up.
pub const GOP_SIZE: u32 = 120;

/// A quality tier of the adaptive-bitrate ladder.
///
/// `Source` is a pseudo-tier: it keeps the source's own dimensions and is only
/// planned when the source is smaller than the lowest real tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum Resolution {
    #[serde(rename = "source")]
    Source,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "2160p")]
    P2160,
}

/// Width and height reported by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceDimensions {
    pub width: u32,
    pub height: u32,
}

/// Scale and bitrate envelope for one rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingProfile {
    pub resolution: Resolution,
    pub width: u32,
    pub height: u32,
    /// Target bitrate in kbit/s
    pub bitrate_kbps: u32,
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    /// Encoder rate-control buffer in kbit
    pub bufsize_kbps: u32,
}

/// Audio settings applied identically to every rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AudioProfile {
    pub codec: String,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            codec: "libopus".to_string(),
            bitrate_kbps: 128,
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown resolution: {0}")]
pub struct ResolutionParseError(pub String);

impl Resolution {
    /// Real tiers, lowest quality first.
    pub const LADDER: [Resolution; 5] = [
        Resolution::P360,
        Resolution::P480,
        Resolution::P720,
        Resolution::P1080,
        Resolution::P2160,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Source => "source",
            Resolution::P360 => "360p",
            Resolution::P480 => "480p",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
            Resolution::P2160 => "2160p",
        }
    }

    /// Fixed (width, height, target, min, max, bufsize) for a real tier.
    fn envelope(&self) -> Option<(u32, u32, u32, u32, u32, u32)> {
        match self {
            Resolution::Source => None,
            Resolution::P360 => Some((640, 360, 400, 400, 500, 800)),
            Resolution::P480 => Some((854, 480, 800, 800, 1200, 1600)),
            Resolution::P720 => Some((1280, 720, 2000, 2000, 3000, 4000)),
            Resolution::P1080 => Some((1920, 1080, 4000, 4000, 6000, 8000)),
            Resolution::P2160 => Some((3840, 2160, 12000, 12000, 18000, 24000)),
        }
    }

    /// Target height of a real tier; `None` for `Source`.
    pub fn height(&self) -> Option<u32> {
        self.envelope().map(|e| e.1)
    }

    /// Tiers to encode for a source of the given height, lowest first.
    ///
    /// Falls back to the single `Source` tier when the source is smaller than
    /// every real tier.
    pub fn plan_for_height(source_height: u32) -> Vec<Resolution> {
        let tiers: Vec<Resolution> = Self::LADDER
            .iter()
            .copied()
            .filter(|r| r.height().is_some_and(|h| h <= source_height))
            .collect();

        if tiers.is_empty() {
            vec![Resolution::Source]
        } else {
            tiers
        }
    }

    /// Profile to encode this tier from a source of the given dimensions.
    ///
    /// A source below the lowest tier always gets the source profile, even if
    /// the job asked for a real tier.
    pub fn select_profile(&self, source: SourceDimensions) -> EncodingProfile {
        let lowest = Self::LADDER[0].height().unwrap_or(0);
        let envelope = if source.height < lowest {
            None
        } else {
            self.envelope()
        };

        match envelope {
            Some((width, height, bitrate, min, max, bufsize)) => EncodingProfile {
                resolution: *self,
                width,
                height,
                bitrate_kbps: bitrate,
                min_bitrate_kbps: min,
                max_bitrate_kbps: max,
                bufsize_kbps: bufsize,
            },
            None => EncodingProfile {
                resolution: Resolution::Source,
                width: source.width,
                height: source.height,
                bitrate_kbps: 400,
                min_bitrate_kbps: 400,
                max_bitrate_kbps: 500,
                bufsize_kbps: 800,
            },
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ResolutionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Resolution::Source),
            "360p" => Ok(Resolution::P360),
            "480p" => Ok(Resolution::P480),
            "720p" => Ok(Resolution::P720),
            "1080p" => Ok(Resolution::P1080),
            "2160p" => Ok(Resolution::P2160),
            other => Err(ResolutionParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_for_full_hd() {
        assert_eq!(
            Resolution::plan_for_height(1080),
            vec![
                Resolution::P360,
                Resolution::P480,
                Resolution::P720,
                Resolution::P1080
            ]
        );
    }

    #[test]
    fn test_plan_for_small_source() {
        assert_eq!(Resolution::plan_for_height(240), vec![Resolution::Source]);
    }

    #[test]
    fn test_plan_matches_ladder_filter_for_all_heights() {
        for h in (0..=2400).step_by(7) {
            let plan = Resolution::plan_for_height(h);
            let expected: Vec<_> = Resolution::LADDER
                .iter()
                .copied()
                .filter(|r| r.height().unwrap() <= h)
                .collect();
            if expected.is_empty() {
                assert_eq!(plan, vec![Resolution::Source], "height {h}");
            } else {
                assert_eq!(plan, expected, "height {h}");
            }
        }
    }

    #[test]
    fn test_select_profile_source_fallback() {
        let profile = Resolution::Source.select_profile(SourceDimensions {
            width: 320,
            height: 240,
        });
        assert_eq!(profile.resolution, Resolution::Source);
        assert_eq!((profile.width, profile.height), (320, 240));
        assert_eq!(profile.bitrate_kbps, 400);

        // A real tier requested for a tiny source still falls back.
        let profile = Resolution::P720.select_profile(SourceDimensions {
            width: 320,
            height: 240,
        });
        assert_eq!(profile.resolution, Resolution::Source);
    }

    #[test]
    fn test_select_profile_tier() {
        let profile = Resolution::P720.select_profile(SourceDimensions {
            width: 1920,
            height: 1080,
        });
        assert_eq!((profile.width, profile.height), (1280, 720));
        assert_eq!(profile.max_bitrate_kbps, 3000);
        assert_eq!(profile.bufsize_kbps, 4000);
    }

    #[test]
    fn test_round_trip_names() {
        for r in Resolution::LADDER {
            assert_eq!(r.as_str().parse::<Resolution>().unwrap(), r);
        }
        assert_eq!(
            serde_json::to_string(&Resolution::P1080).unwrap(),
            "\"1080p\""
        );
        assert!("999p".parse::<Resolution>().is_err());
    }
}
