//! Guide configuration model and tip-tilt reconciliation.
//!
//! Resetting the M2 tip-tilt guide loop causes a visible transient in the
//! telescope's tracking, so a guide-enable request must not blindly reset.
//! The reconciliation here compares, for each possible tip-tilt source, the
//! *desired* beam assignment (derived from the probe's nod-chop tracking
//! flags crossed with the live nod state) against the beam the hardware is
//! *currently* configured for. Only a real difference forces the full
//! disable/reset/re-enable sequence; otherwise the cheap idempotent fields
//! are written and the loop is left running.

use std::collections::HashSet;

use crate::codec::BinaryOnOff;
use crate::error::{EpicsError, EpicsResult};

/// Wavefront sensors that can feed M2 tip-tilt corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TipTiltSource {
    /// Peripheral wavefront sensor 1.
    Pwfs1,
    /// Peripheral wavefront sensor 2.
    Pwfs2,
    /// On-instrument wavefront sensor.
    Oiwfs,
    /// Adaptive-optics system sensor.
    Gaos,
}

impl TipTiltSource {
    /// All sources, in the fixed order used when sequencing configuration
    /// writes.
    pub const ALL: [TipTiltSource; 4] = [
        TipTiltSource::Pwfs1,
        TipTiltSource::Pwfs2,
        TipTiltSource::Oiwfs,
        TipTiltSource::Gaos,
    ];

    /// Token written to the guide configuration record.
    pub fn as_token(self) -> &'static str {
        match self {
            TipTiltSource::Pwfs1 => "PWFS1",
            TipTiltSource::Pwfs2 => "PWFS2",
            TipTiltSource::Oiwfs => "OIWFS",
            TipTiltSource::Gaos => "GAOS",
        }
    }
}

/// Live nod position of the chopping cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodState {
    /// Nod position A.
    A,
    /// Nod position B.
    B,
    /// Nod position C (no guiding beam).
    C,
}

impl NodState {
    /// Decode the raw status token reported by the nod state record.
    pub fn from_status_token(token: &str) -> EpicsResult<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(NodState::A),
            "B" => Ok(NodState::B),
            "C" => Ok(NodState::C),
            other => Err(EpicsError::Conversion(format!(
                "not a nod state: {other:?}"
            ))),
        }
    }
}

/// Which half of the chopping cycle a tip-tilt correction is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum M2BeamConfig {
    /// No beam: the source contributes no correction.
    #[default]
    None,
    /// Corrections applied on beam A only.
    BeamA,
    /// Corrections applied on beam B only.
    BeamB,
    /// Corrections applied on both beams.
    BeamAB,
}

impl M2BeamConfig {
    /// Beam assignment from the two chop flags active at a nod position.
    pub fn from_flags(chop_a: bool, chop_b: bool) -> Self {
        match (chop_a, chop_b) {
            (false, false) => M2BeamConfig::None,
            (true, false) => M2BeamConfig::BeamA,
            (false, true) => M2BeamConfig::BeamB,
            (true, true) => M2BeamConfig::BeamAB,
        }
    }

    /// Decode the raw beam token read back from the guide status record.
    pub fn from_status_token(token: &str) -> EpicsResult<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "" | "OFF" | "NONE" => Ok(M2BeamConfig::None),
            "A" | "BEAM-A" => Ok(M2BeamConfig::BeamA),
            "B" | "BEAM-B" => Ok(M2BeamConfig::BeamB),
            "AB" | "BEAM-AB" => Ok(M2BeamConfig::BeamAB),
            other => Err(EpicsError::Conversion(format!(
                "not a beam configuration: {other:?}"
            ))),
        }
    }

    /// Token written to the guide configuration record.
    pub fn as_token(self) -> &'static str {
        match self {
            M2BeamConfig::None => "OFF",
            M2BeamConfig::BeamA => "A",
            M2BeamConfig::BeamB => "B",
            M2BeamConfig::BeamAB => "AB",
        }
    }
}

/// A guide probe's nod-chop tracking flags.
///
/// Each flag states whether the probe tracks during the given (nod, chop)
/// combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeGuideConfig {
    /// Track at nod A, chop A.
    pub nod_a_chop_a: bool,
    /// Track at nod A, chop B.
    pub nod_a_chop_b: bool,
    /// Track at nod B, chop A.
    pub nod_b_chop_a: bool,
    /// Track at nod B, chop B.
    pub nod_b_chop_b: bool,
}

impl ProbeGuideConfig {
    /// Desired beam assignment at the given nod position.
    ///
    /// Nod C never guides, so it always yields [`M2BeamConfig::None`].
    pub fn beam_for(&self, nod: NodState) -> M2BeamConfig {
        match nod {
            NodState::A => M2BeamConfig::from_flags(self.nod_a_chop_a, self.nod_a_chop_b),
            NodState::B => M2BeamConfig::from_flags(self.nod_b_chop_a, self.nod_b_chop_b),
            NodState::C => M2BeamConfig::None,
        }
    }
}

/// Per-probe tracking configuration for all four tip-tilt sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuidersConfig {
    /// PWFS1 probe tracking flags.
    pub pwfs1: ProbeGuideConfig,
    /// PWFS2 probe tracking flags.
    pub pwfs2: ProbeGuideConfig,
    /// OIWFS probe tracking flags.
    pub oiwfs: ProbeGuideConfig,
    /// GAOS tracking flags.
    pub gaos: ProbeGuideConfig,
}

impl GuidersConfig {
    /// Tracking flags for one source.
    pub fn probe(&self, source: TipTiltSource) -> &ProbeGuideConfig {
        match source {
            TipTiltSource::Pwfs1 => &self.pwfs1,
            TipTiltSource::Pwfs2 => &self.pwfs2,
            TipTiltSource::Oiwfs => &self.oiwfs,
            TipTiltSource::Gaos => &self.gaos,
        }
    }
}

/// Mount guiding on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountGuideOption {
    /// Mount guiding disabled.
    Off,
    /// Mount guiding enabled.
    On,
}

impl MountGuideOption {
    /// Token written to the mount guide mode record.
    pub fn as_token(self) -> &'static str {
        match self {
            MountGuideOption::Off => "Off",
            MountGuideOption::On => "On",
        }
    }
}

/// Sources that can drive M1 figure corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum M1Source {
    /// Peripheral wavefront sensor 1.
    Pwfs1,
    /// Peripheral wavefront sensor 2.
    Pwfs2,
    /// On-instrument wavefront sensor.
    Oiwfs,
    /// Adaptive-optics system sensor.
    Gaos,
}

impl M1Source {
    /// Token written to the M1 guide source record.
    pub fn as_token(self) -> &'static str {
        match self {
            M1Source::Pwfs1 => "PWFS1",
            M1Source::Pwfs2 => "PWFS2",
            M1Source::Oiwfs => "OIWFS",
            M1Source::Gaos => "GAOS",
        }
    }
}

/// Requested M1 guiding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum M1GuideConfig {
    /// M1 guiding disabled.
    Off,
    /// M1 guiding enabled, driven by the given source.
    On(M1Source),
}

/// Requested M2 tip-tilt guiding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum M2GuideConfig {
    /// Tip-tilt guiding disabled.
    Off,
    /// Tip-tilt guiding enabled.
    On {
        /// Whether coma correction rides along with tip-tilt.
        coma: BinaryOnOff,
        /// Sources feeding the correction.
        sources: HashSet<TipTiltSource>,
    },
}

/// Complete requested guide configuration for the telescope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelescopeGuideConfig {
    /// Mount guiding.
    pub mount_guide: MountGuideOption,
    /// M1 figure guiding.
    pub m1_guide: M1GuideConfig,
    /// M2 tip-tilt guiding.
    pub m2_guide: M2GuideConfig,
}

/// Observed guide state read back from hardware status records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuideState {
    /// Mount guiding readback.
    pub mount_guide: BinaryOnOff,
    /// M1 guiding readback.
    pub m1_guide: BinaryOnOff,
    /// M2 tip-tilt guiding readback.
    pub m2_guide: BinaryOnOff,
}

/// Currently configured beam per source, as read back from hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeamReadback {
    /// PWFS1 beam readback.
    pub pwfs1: M2BeamConfig,
    /// PWFS2 beam readback.
    pub pwfs2: M2BeamConfig,
    /// OIWFS beam readback.
    pub oiwfs: M2BeamConfig,
    /// GAOS beam readback.
    pub gaos: M2BeamConfig,
}

impl BeamReadback {
    /// Readback for one source.
    pub fn beam(&self, source: TipTiltSource) -> M2BeamConfig {
        match source {
            TipTiltSource::Pwfs1 => self.pwfs1,
            TipTiltSource::Pwfs2 => self.pwfs2,
            TipTiltSource::Oiwfs => self.oiwfs,
            TipTiltSource::Gaos => self.gaos,
        }
    }
}

/// Reconciliation decision for an M2 guide request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuidePlan {
    /// Beam assignments already match; only the cheap idempotent fields need
    /// writing.
    Incremental,
    /// At least one source's beam must change: run the full
    /// disable/reset/configure/re-enable sequence with these assignments.
    FullReset {
        /// Desired (source, beam) pairs; sources resolving to no beam are
        /// skipped during configuration.
        assignments: Vec<(TipTiltSource, M2BeamConfig)>,
    },
}

/// Desired beam per source for a requested M2 configuration.
///
/// A source that is not requested contributes no beam.
pub fn desired_beams(
    requested: &M2GuideConfig,
    guiders: &GuidersConfig,
    nod: NodState,
) -> Vec<(TipTiltSource, M2BeamConfig)> {
    TipTiltSource::ALL
        .iter()
        .map(|&source| {
            let beam = match requested {
                M2GuideConfig::Off => M2BeamConfig::None,
                M2GuideConfig::On { sources, .. } => {
                    if sources.contains(&source) {
                        guiders.probe(source).beam_for(nod)
                    } else {
                        M2BeamConfig::None
                    }
                }
            };
            (source, beam)
        })
        .collect()
}

/// Compare desired against current beam assignments and decide the plan.
pub fn reconcile(
    requested: &M2GuideConfig,
    guiders: &GuidersConfig,
    nod: NodState,
    current: &BeamReadback,
) -> GuidePlan {
    let desired = desired_beams(requested, guiders, nod);
    let mismatch = desired
        .iter()
        .any(|&(source, beam)| current.beam(source) != beam);
    if mismatch {
        GuidePlan::FullReset {
            assignments: desired,
        }
    } else {
        GuidePlan::Incremental
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oiwfs_on_a() -> GuidersConfig {
        GuidersConfig {
            oiwfs: ProbeGuideConfig {
                nod_a_chop_a: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn m2_on(sources: &[TipTiltSource]) -> M2GuideConfig {
        M2GuideConfig::On {
            coma: BinaryOnOff::On,
            sources: sources.iter().copied().collect(),
        }
    }

    #[test]
    fn beam_flag_cross_table() {
        assert_eq!(M2BeamConfig::from_flags(false, false), M2BeamConfig::None);
        assert_eq!(M2BeamConfig::from_flags(true, false), M2BeamConfig::BeamA);
        assert_eq!(M2BeamConfig::from_flags(false, true), M2BeamConfig::BeamB);
        assert_eq!(M2BeamConfig::from_flags(true, true), M2BeamConfig::BeamAB);
    }

    #[test]
    fn nod_c_never_guides() {
        let probe = ProbeGuideConfig {
            nod_a_chop_a: true,
            nod_b_chop_b: true,
            ..Default::default()
        };
        assert_eq!(probe.beam_for(NodState::A), M2BeamConfig::BeamA);
        assert_eq!(probe.beam_for(NodState::B), M2BeamConfig::BeamB);
        assert_eq!(probe.beam_for(NodState::C), M2BeamConfig::None);
    }

    #[test]
    fn status_token_decoding() {
        assert_eq!(
            M2BeamConfig::from_status_token("A").unwrap(),
            M2BeamConfig::BeamA
        );
        assert_eq!(
            M2BeamConfig::from_status_token("beam-ab").unwrap(),
            M2BeamConfig::BeamAB
        );
        assert_eq!(
            M2BeamConfig::from_status_token("").unwrap(),
            M2BeamConfig::None
        );
        assert!(M2BeamConfig::from_status_token("sideways").is_err());

        assert_eq!(NodState::from_status_token(" b ").unwrap(), NodState::B);
        assert!(NodState::from_status_token("D").is_err());
    }

    #[test]
    fn matching_beams_avoid_reset() {
        let current = BeamReadback {
            oiwfs: M2BeamConfig::BeamA,
            ..Default::default()
        };
        let plan = reconcile(
            &m2_on(&[TipTiltSource::Oiwfs]),
            &oiwfs_on_a(),
            NodState::A,
            &current,
        );
        assert_eq!(plan, GuidePlan::Incremental);
    }

    #[test]
    fn any_mismatch_forces_full_reset() {
        // Hardware still has PWFS1 on beam B from a previous configuration.
        let current = BeamReadback {
            pwfs1: M2BeamConfig::BeamB,
            oiwfs: M2BeamConfig::BeamA,
            ..Default::default()
        };
        let plan = reconcile(
            &m2_on(&[TipTiltSource::Oiwfs]),
            &oiwfs_on_a(),
            NodState::A,
            &current,
        );
        match plan {
            GuidePlan::FullReset { assignments } => {
                assert_eq!(assignments.len(), 4);
                assert!(assignments
                    .contains(&(TipTiltSource::Oiwfs, M2BeamConfig::BeamA)));
                assert!(assignments
                    .contains(&(TipTiltSource::Pwfs1, M2BeamConfig::None)));
            }
            GuidePlan::Incremental => panic!("expected a full reset"),
        }
    }

    #[test]
    fn requested_off_with_idle_hardware_is_incremental() {
        let plan = reconcile(
            &M2GuideConfig::Off,
            &oiwfs_on_a(),
            NodState::A,
            &BeamReadback::default(),
        );
        assert_eq!(plan, GuidePlan::Incremental);
    }

    #[test]
    fn nod_change_alone_triggers_reset() {
        // Guiding on OIWFS beam A; telescope nods to C where nothing guides.
        let current = BeamReadback {
            oiwfs: M2BeamConfig::BeamA,
            ..Default::default()
        };
        let plan = reconcile(
            &m2_on(&[TipTiltSource::Oiwfs]),
            &oiwfs_on_a(),
            NodState::C,
            &current,
        );
        assert!(matches!(plan, GuidePlan::FullReset { .. }));
    }
}
