//! Telescope control subsystem surface.
//!
//! [`TcsEpics`] owns every channel the telescope-control application talks
//! to: the shared apply/CAR pairing, mount and rotator command channels,
//! guide command channels, and the status records the guide reconciliation
//! reads. Channel names are resolved once at construction from the
//! configured prefix; nothing here consults a global registry.
//!
//! Commands are built through the fluent [`TcsCommands`] builder — each
//! setter appends one verified write and returns the builder by value — and
//! issued with a terminal `post`. Guide enable/disable are higher-level
//! operations that sequence several posts and are serialized through the
//! subsystem's command lock so two in-flight guide mutations can never
//! interleave their parameter writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::apply::{ApplyCommandResult, ApplyRecord};
use crate::channel::Channel;
use crate::codec::{BinaryOnOff, EpicsCodec};
use crate::command::{
    Command1Channels, Command2Channels, ParameterList, ParameterlessCommandChannels,
};
use crate::config::EpicsConfig;
use crate::error::EpicsResult;
use crate::guide::{
    reconcile, BeamReadback, GuidePlan, GuidersConfig, M1GuideConfig, M2BeamConfig,
    M2GuideConfig, MountGuideOption, NodState, TelescopeGuideConfig, TipTiltSource,
};
use crate::system::{EpicsSystem, TelltaleChannel};
use crate::transport::ChannelProvider;
use crate::verified::read_channel;

/// Relative channel names of the telescope-control database.
///
/// Public so tests and diagnostics can address the same records the
/// subsystem does.
pub mod names {
    /// Apply record direction field.
    pub const APPLY_DIR: &str = "apply.DIR";
    /// CAR state field.
    pub const CAR_VAL: &str = "applyC.VAL";
    /// CAR completion id field.
    pub const CAR_CLID: &str = "applyC.CLID";
    /// CAR error message field.
    pub const CAR_OMSS: &str = "applyC.OMSS";

    /// Mount park CAD direction field.
    pub const MOUNT_PARK_DIR: &str = "telpark.DIR";
    /// Mount follow flag.
    pub const MOUNT_FOLLOW: &str = "mountFollow.A";

    /// Rotator target angle, degrees.
    pub const ROT_MOVE_ANGLE: &str = "rotMove.A";
    /// Rotator park CAD direction field.
    pub const ROT_PARK_DIR: &str = "rotPark.DIR";
    /// Rotator follow flag.
    pub const ROT_FOLLOW: &str = "rotFollow.A";

    /// M1 guide enable.
    pub const M1_GUIDE: &str = "m1GuideMode.A";
    /// M1 guide source token.
    pub const M1_GUIDE_SOURCE: &str = "m1GuideConfig.A";
    /// M2 guide enable.
    pub const M2_GUIDE: &str = "m2GuideMode.A";
    /// Coma correction enable.
    pub const M2_COMA: &str = "m2GuideMode.B";
    /// M2 guide source configuration: source token.
    pub const M2_GUIDE_CONFIG_SOURCE: &str = "m2GuideConfig.A";
    /// M2 guide source configuration: beam token.
    pub const M2_GUIDE_CONFIG_BEAM: &str = "m2GuideConfig.B";
    /// M2 guide loop reset CAD direction field.
    pub const M2_GUIDE_RESET_DIR: &str = "m2GuideReset.DIR";
    /// Mount guide mode token.
    pub const MOUNT_GUIDE_MODE: &str = "mountGuideMode.A";
    /// Mount guide source token.
    pub const MOUNT_GUIDE_SOURCE: &str = "mountGuideMode.B";

    /// Live nod state readback.
    pub const SAD_NOD_STATE: &str = "sad:nodState";
    /// Configured beam readback, PWFS1.
    pub const SAD_PWFS1_BEAM: &str = "sad:pwfs1BeamConfig";
    /// Configured beam readback, PWFS2.
    pub const SAD_PWFS2_BEAM: &str = "sad:pwfs2BeamConfig";
    /// Configured beam readback, OIWFS.
    pub const SAD_OIWFS_BEAM: &str = "sad:oiwfsBeamConfig";
    /// Configured beam readback, GAOS.
    pub const SAD_GAOS_BEAM: &str = "sad:gaosBeamConfig";
    /// M1 guide state readback.
    pub const SAD_M1_GUIDE: &str = "sad:m1GuideState";
    /// M2 guide state readback.
    pub const SAD_M2_GUIDE: &str = "sad:m2GuideState";
    /// Mount guide state readback.
    pub const SAD_MOUNT_GUIDE: &str = "sad:mountGuideState";
}

/// Mount guide source token used whenever mount guiding is enabled; the
/// mount always steers off the M2 correction stream.
const MOUNT_GUIDE_SOURCE_SCS: &str = "SCS";

/// Status records the guide logic and applications read back.
pub struct TcsStatus {
    telltale: TelltaleChannel,
    nod_state: Channel<String>,
    pwfs1_beam: Channel<String>,
    pwfs2_beam: Channel<String>,
    oiwfs_beam: Channel<String>,
    gaos_beam: Channel<String>,
    m1_guide: Channel<BinaryOnOff>,
    m2_guide: Channel<BinaryOnOff>,
    mount_guide: Channel<BinaryOnOff>,
}

impl TcsStatus {
    /// Live nod position.
    pub async fn nod_state(&self, timeout: Duration) -> EpicsResult<NodState> {
        let token = read_channel(&self.telltale, &self.nod_state)
            .verified_run(timeout)
            .await?;
        NodState::from_status_token(&token)
    }

    /// Currently configured beam for one tip-tilt source.
    pub async fn beam_config(
        &self,
        source: TipTiltSource,
        timeout: Duration,
    ) -> EpicsResult<M2BeamConfig> {
        let channel = match source {
            TipTiltSource::Pwfs1 => &self.pwfs1_beam,
            TipTiltSource::Pwfs2 => &self.pwfs2_beam,
            TipTiltSource::Oiwfs => &self.oiwfs_beam,
            TipTiltSource::Gaos => &self.gaos_beam,
        };
        let token = read_channel(&self.telltale, channel)
            .verified_run(timeout)
            .await?;
        M2BeamConfig::from_status_token(&token)
    }

    /// All four beam readbacks, fanned out in parallel.
    pub async fn beam_readback(&self, timeout: Duration) -> EpicsResult<BeamReadback> {
        let (pwfs1, pwfs2, oiwfs, gaos) = tokio::try_join!(
            self.beam_config(TipTiltSource::Pwfs1, timeout),
            self.beam_config(TipTiltSource::Pwfs2, timeout),
            self.beam_config(TipTiltSource::Oiwfs, timeout),
            self.beam_config(TipTiltSource::Gaos, timeout),
        )?;
        Ok(BeamReadback {
            pwfs1,
            pwfs2,
            oiwfs,
            gaos,
        })
    }

    /// Observed mount/M1/M2 guide enables, fanned out in parallel.
    pub async fn guide_state(&self, timeout: Duration) -> EpicsResult<crate::guide::GuideState> {
        let (mount_guide, m1_guide, m2_guide) = tokio::try_join!(
            read_channel(&self.telltale, &self.mount_guide).verified_run(timeout),
            read_channel(&self.telltale, &self.m1_guide).verified_run(timeout),
            read_channel(&self.telltale, &self.m2_guide).verified_run(timeout),
        )?;
        Ok(crate::guide::GuideState {
            mount_guide,
            m1_guide,
            m2_guide,
        })
    }
}

/// All telescope-control channels plus the operations built on them.
pub struct TcsEpics {
    system: EpicsSystem,
    apply: ApplyRecord,
    mount_park: ParameterlessCommandChannels,
    mount_follow: Command1Channels<BinaryOnOff>,
    rot_move: Command1Channels<f64>,
    rot_park: ParameterlessCommandChannels,
    rot_follow: Command1Channels<BinaryOnOff>,
    m1_guide: Command2Channels<BinaryOnOff, String>,
    m2_guide: Command2Channels<BinaryOnOff, BinaryOnOff>,
    m2_guide_config: Command2Channels<String, String>,
    m2_guide_reset: ParameterlessCommandChannels,
    mount_guide: Command2Channels<String, String>,
    status: TcsStatus,
    config: EpicsConfig,
    /// Serializes top-level commands for this controller; parameter writes
    /// of two commands must never interleave.
    sequence: Mutex<()>,
}

async fn open<T: EpicsCodec>(
    provider: &Arc<dyn ChannelProvider>,
    system: &mut EpicsSystem,
    config: &EpicsConfig,
    name: &str,
) -> EpicsResult<Channel<T>> {
    let handle = provider
        .connect(&config.channel_name(name), config.connect_timeout)
        .await?;
    let channel: Channel<T> = Channel::new(Arc::clone(provider), handle);
    system.register(Arc::new(channel.clone()));
    Ok(channel)
}

impl TcsEpics {
    /// Resolve every channel under the configured prefix.
    ///
    /// Channels that fail to connect are still registered; commands against
    /// them fail verification later rather than failing construction.
    pub async fn new(
        provider: Arc<dyn ChannelProvider>,
        config: EpicsConfig,
    ) -> EpicsResult<Self> {
        let telltale_handle = provider
            .connect(
                &config.channel_name(&config.telltale),
                config.connect_timeout,
            )
            .await?;
        let telltale_channel: Channel<String> =
            Channel::new(Arc::clone(&provider), telltale_handle);
        let telltale = TelltaleChannel::new("TCS", telltale_channel);
        let mut system = EpicsSystem::new(telltale.clone());

        let apply = ApplyRecord::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::APPLY_DIR).await?,
            open(&provider, &mut system, &config, names::CAR_VAL).await?,
            open(&provider, &mut system, &config, names::CAR_CLID).await?,
            open(&provider, &mut system, &config, names::CAR_OMSS).await?,
            config.poll_interval,
        );

        let mount_park = ParameterlessCommandChannels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::MOUNT_PARK_DIR).await?,
        );
        let mount_follow = Command1Channels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::MOUNT_FOLLOW).await?,
        );
        let rot_move = Command1Channels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::ROT_MOVE_ANGLE).await?,
        );
        let rot_park = ParameterlessCommandChannels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::ROT_PARK_DIR).await?,
        );
        let rot_follow = Command1Channels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::ROT_FOLLOW).await?,
        );
        let m1_guide = Command2Channels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::M1_GUIDE).await?,
            open(&provider, &mut system, &config, names::M1_GUIDE_SOURCE).await?,
        );
        let m2_guide = Command2Channels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::M2_GUIDE).await?,
            open(&provider, &mut system, &config, names::M2_COMA).await?,
        );
        let m2_guide_config = Command2Channels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::M2_GUIDE_CONFIG_SOURCE).await?,
            open(&provider, &mut system, &config, names::M2_GUIDE_CONFIG_BEAM).await?,
        );
        let m2_guide_reset = ParameterlessCommandChannels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::M2_GUIDE_RESET_DIR).await?,
        );
        let mount_guide = Command2Channels::new(
            telltale.clone(),
            open(&provider, &mut system, &config, names::MOUNT_GUIDE_MODE).await?,
            open(&provider, &mut system, &config, names::MOUNT_GUIDE_SOURCE).await?,
        );

        let status = TcsStatus {
            telltale: telltale.clone(),
            nod_state: open(&provider, &mut system, &config, names::SAD_NOD_STATE).await?,
            pwfs1_beam: open(&provider, &mut system, &config, names::SAD_PWFS1_BEAM).await?,
            pwfs2_beam: open(&provider, &mut system, &config, names::SAD_PWFS2_BEAM).await?,
            oiwfs_beam: open(&provider, &mut system, &config, names::SAD_OIWFS_BEAM).await?,
            gaos_beam: open(&provider, &mut system, &config, names::SAD_GAOS_BEAM).await?,
            m1_guide: open(&provider, &mut system, &config, names::SAD_M1_GUIDE).await?,
            m2_guide: open(&provider, &mut system, &config, names::SAD_M2_GUIDE).await?,
            mount_guide: open(&provider, &mut system, &config, names::SAD_MOUNT_GUIDE).await?,
        };

        Ok(Self {
            system,
            apply,
            mount_park,
            mount_follow,
            rot_move,
            rot_park,
            rot_follow,
            m1_guide,
            m2_guide,
            m2_guide_config,
            m2_guide_reset,
            mount_guide,
            status,
            config,
            sequence: Mutex::new(()),
        })
    }

    /// The controller's channel group, for health probing.
    pub fn system(&self) -> &EpicsSystem {
        &self.system
    }

    /// Status readers.
    pub fn status(&self) -> &TcsStatus {
        &self.status
    }

    /// Settings this subsystem was built with.
    pub fn config(&self) -> &EpicsConfig {
        &self.config
    }

    /// Start building a command.
    pub fn commands(&self) -> TcsCommands<'_> {
        TcsCommands {
            tcs: self,
            params: ParameterList::new(),
        }
    }

    /// The M2 enable is only rewritten when `write_m2_enable` is set: on the
    /// incremental path the loop is already running and only the cheap
    /// idempotent fields (coma, M1, mount guide) are touched.
    fn guide_enable_writes(
        &self,
        config: &TelescopeGuideConfig,
        params: &mut ParameterList,
        write_m2_enable: bool,
    ) {
        match &config.m2_guide {
            M2GuideConfig::Off => {
                params.push(self.m2_guide.set_param1(BinaryOnOff::Off));
            }
            M2GuideConfig::On { coma, .. } => {
                if write_m2_enable {
                    params.push(self.m2_guide.set_param1(BinaryOnOff::On));
                }
                params.push(self.m2_guide.set_param2(*coma));
            }
        }
        match config.m1_guide {
            M1GuideConfig::Off => {
                params.push(self.m1_guide.set_param1(BinaryOnOff::Off));
            }
            M1GuideConfig::On(source) => {
                params.push(self.m1_guide.set_param1(BinaryOnOff::On));
                params.push(self.m1_guide.set_param2(source.as_token().to_string()));
            }
        }
        params.push(
            self.mount_guide
                .set_param1(config.mount_guide.as_token().to_string()),
        );
        let mount_source = match config.mount_guide {
            MountGuideOption::On => MOUNT_GUIDE_SOURCE_SCS,
            MountGuideOption::Off => "",
        };
        params.push(self.mount_guide.set_param2(mount_source.to_string()));
    }

    /// Apply a requested guide configuration, resetting the M2 loop only
    /// when a beam assignment actually changed.
    ///
    /// Reads the live nod state and per-source beam readbacks first; when a
    /// readback cannot be obtained the configuration is conservatively
    /// treated as mismatched and the full reset sequence runs.
    pub async fn enable_guide(
        &self,
        config: &TelescopeGuideConfig,
        guiders: &GuidersConfig,
        timeout: Duration,
    ) -> EpicsResult<ApplyCommandResult> {
        let _guard = self.sequence.lock().await;
        let request_timeout = self.config.request_timeout;

        let plan = match &config.m2_guide {
            M2GuideConfig::Off => GuidePlan::Incremental,
            requested @ M2GuideConfig::On { .. } => {
                let live = async {
                    let nod = self.status.nod_state(request_timeout).await?;
                    let current = self.status.beam_readback(request_timeout).await?;
                    Ok::<_, crate::error::EpicsError>((nod, current))
                }
                .await;
                match live {
                    Ok((nod, current)) => reconcile(requested, guiders, nod, &current),
                    Err(err) => {
                        warn!(%err, "guide status readback failed, assuming beam mismatch");
                        GuidePlan::FullReset {
                            assignments: crate::guide::desired_beams(
                                requested,
                                guiders,
                                NodState::A,
                            ),
                        }
                    }
                }
            }
        };

        let mut reset_ran = false;
        if let GuidePlan::FullReset { assignments } = plan {
            reset_ran = true;
            info!("beam assignment changed, resetting M2 guide loop");
            // Disable, reset, reconfigure each active source; every step is
            // its own apply cycle so the hardware observes them in order.
            let mut disable = ParameterList::new();
            disable.push(self.m2_guide.set_param1(BinaryOnOff::Off));
            self.apply.post_with(disable, timeout).await?;

            let mut reset = ParameterList::new();
            reset.push(self.m2_guide_reset.mark());
            self.apply.post_with(reset, timeout).await?;

            for (source, beam) in assignments {
                if beam == M2BeamConfig::None {
                    continue;
                }
                debug!(source = source.as_token(), beam = beam.as_token(), "configuring source");
                let mut configure = ParameterList::new();
                configure.push(
                    self.m2_guide_config
                        .set_param1(source.as_token().to_string()),
                );
                configure.push(
                    self.m2_guide_config
                        .set_param2(beam.as_token().to_string()),
                );
                self.apply.post_with(configure, timeout).await?;
            }
        }

        let mut finish = ParameterList::new();
        self.guide_enable_writes(config, &mut finish, reset_ran);
        self.apply.post_with(finish, timeout).await
    }

    /// Stop all guiding: M2, M1, and mount guide off. Never resets.
    pub async fn disable_guide(&self, timeout: Duration) -> EpicsResult<ApplyCommandResult> {
        let _guard = self.sequence.lock().await;
        let mut params = ParameterList::new();
        params.push(self.m2_guide.set_param1(BinaryOnOff::Off));
        params.push(self.m1_guide.set_param1(BinaryOnOff::Off));
        params.push(
            self.mount_guide
                .set_param1(MountGuideOption::Off.as_token().to_string()),
        );
        params.push(self.mount_guide.set_param2(String::new()));
        self.apply.post_with(params, timeout).await
    }

    /// Re-enable a previously paused guide configuration without touching
    /// beam assignments. The loop state on hardware is assumed intact.
    pub async fn resume_guide(
        &self,
        config: &TelescopeGuideConfig,
        timeout: Duration,
    ) -> EpicsResult<ApplyCommandResult> {
        let _guard = self.sequence.lock().await;
        let mut params = ParameterList::new();
        self.guide_enable_writes(config, &mut params, true);
        self.apply.post_with(params, timeout).await
    }
}

/// Fluent command builder over [`TcsEpics`].
///
/// Each setter appends a verified write and returns the builder by value;
/// nothing touches the network until `post`, which verifies every channel
/// the accumulated command needs and only then issues the writes followed by
/// the apply trigger.
pub struct TcsCommands<'a> {
    tcs: &'a TcsEpics,
    params: ParameterList,
}

impl TcsCommands<'_> {
    /// Park the mount.
    pub fn mcs_park(mut self) -> Self {
        self.params.push(self.tcs.mount_park.mark());
        self
    }

    /// Enable or disable mount following.
    pub fn mcs_follow(mut self, enable: BinaryOnOff) -> Self {
        self.params.push(self.tcs.mount_follow.set_param1(enable));
        self
    }

    /// Move the instrument rotator to an absolute angle in degrees.
    pub fn rot_move(mut self, angle_deg: f64) -> Self {
        self.params.push(self.tcs.rot_move.set_param1(angle_deg));
        self
    }

    /// Park the instrument rotator.
    pub fn rot_park(mut self) -> Self {
        self.params.push(self.tcs.rot_park.mark());
        self
    }

    /// Enable or disable rotator following.
    pub fn rot_follow(mut self, enable: BinaryOnOff) -> Self {
        self.params.push(self.tcs.rot_follow.set_param1(enable));
        self
    }

    /// Number of parameter writes accumulated so far.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the builder holds no writes yet.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Verify, write all parameters, trigger, and poll to completion.
    pub async fn post(self, timeout: Duration) -> EpicsResult<ApplyCommandResult> {
        let _guard = self.tcs.sequence.lock().await;
        self.tcs.apply.post_with(self.params, timeout).await
    }
}
