//! Guide enable/disable sequencing against the simulated channel network.
//!
//! The interesting property is when the M2 guide loop gets reset: only a
//! real beam-assignment change (or an unreadable status) may run the
//! disable/reset/configure sequence, and a repeated identical enable must
//! leave the running loop alone.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tcs_epics::codec::BinaryOnOff;
use tcs_epics::config::EpicsConfig;
use tcs_epics::guide::{
    GuidersConfig, M1GuideConfig, M1Source, M2GuideConfig, MountGuideOption,
    ProbeGuideConfig, TelescopeGuideConfig, TipTiltSource,
};
use tcs_epics::sim::{SimApplyLink, SimChannelProvider};
use tcs_epics::tcs::TcsEpics;
use tcs_epics::transport::{ChannelProvider, WireValue};
use tcs_epics::ApplyCommandResult;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Route tracing output through the test harness; `RUST_LOG` controls the
/// level. Safe to call from every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn tcs_with_sim() -> (Arc<SimChannelProvider>, TcsEpics) {
    init_tracing();
    let sim = Arc::new(SimChannelProvider::new());
    sim.link_apply(SimApplyLink {
        dir: "tc1:apply.DIR".into(),
        clid: "tc1:applyC.CLID".into(),
        val: "tc1:applyC.VAL".into(),
        omss: "tc1:applyC.OMSS".into(),
    });
    let provider: Arc<dyn ChannelProvider> = sim.clone();
    let config = EpicsConfig {
        top: "tc1:".to_string(),
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let tcs = TcsEpics::new(provider, config).await.unwrap();
    sim.set_value("tc1:sad:nodState", WireValue::Str("A".into()));
    (sim, tcs)
}

fn oiwfs_guiding() -> (TelescopeGuideConfig, GuidersConfig) {
    let config = TelescopeGuideConfig {
        mount_guide: MountGuideOption::On,
        m1_guide: M1GuideConfig::On(M1Source::Oiwfs),
        m2_guide: M2GuideConfig::On {
            coma: BinaryOnOff::On,
            sources: HashSet::from([TipTiltSource::Oiwfs]),
        },
    };
    let guiders = GuidersConfig {
        oiwfs: ProbeGuideConfig {
            nod_a_chop_a: true,
            ..Default::default()
        },
        ..Default::default()
    };
    (config, guiders)
}

/// Emulate the hardware accepting the configured beam so a later readback
/// matches what was last written.
fn accept_oiwfs_beam(sim: &SimChannelProvider, beam: &str) {
    sim.set_value("tc1:sad:oiwfsBeamConfig", WireValue::Str(beam.into()));
}

#[tokio::test]
async fn first_enable_resets_and_configures_the_changed_beam() {
    let (sim, tcs) = tcs_with_sim().await;
    let (config, guiders) = oiwfs_guiding();

    let result = tcs.enable_guide(&config, &guiders, TIMEOUT).await.unwrap();

    assert_eq!(result, ApplyCommandResult::Completed);
    // Hardware had no beam assigned, so the loop was reset once and OIWFS
    // configured onto beam A.
    assert_eq!(sim.put_count("tc1:m2GuideReset.DIR"), 1);
    assert_eq!(
        sim.value("tc1:m2GuideConfig.A"),
        WireValue::Str("OIWFS".into())
    );
    assert_eq!(sim.value("tc1:m2GuideConfig.B"), WireValue::Str("A".into()));
    // Final enables landed last.
    assert_eq!(sim.value("tc1:m2GuideMode.A"), WireValue::Str("On".into()));
    assert_eq!(sim.value("tc1:m2GuideMode.B"), WireValue::Str("On".into()));
    assert_eq!(sim.value("tc1:m1GuideMode.A"), WireValue::Str("On".into()));
    assert_eq!(
        sim.value("tc1:m1GuideConfig.A"),
        WireValue::Str("OIWFS".into())
    );
    assert_eq!(
        sim.value("tc1:mountGuideMode.A"),
        WireValue::Str("On".into())
    );
    assert_eq!(
        sim.value("tc1:mountGuideMode.B"),
        WireValue::Str("SCS".into())
    );
    // Disable, reset, one configure, final enable: four apply cycles.
    assert_eq!(sim.put_count("tc1:apply.DIR"), 4);
}

#[tokio::test]
async fn repeated_enable_with_matching_beams_never_resets() {
    let (sim, tcs) = tcs_with_sim().await;
    let (config, guiders) = oiwfs_guiding();

    tcs.enable_guide(&config, &guiders, TIMEOUT).await.unwrap();
    accept_oiwfs_beam(&sim, "A");
    sim.clear_log();

    tcs.enable_guide(&config, &guiders, TIMEOUT).await.unwrap();

    assert_eq!(sim.put_count("tc1:m2GuideReset.DIR"), 0);
    // Incremental path: one apply cycle touching only the idempotent
    // fields. The running loop's enable is left alone.
    assert_eq!(sim.put_count("tc1:apply.DIR"), 1);
    assert_eq!(sim.put_count("tc1:m2GuideMode.A"), 0);
    assert_eq!(sim.put_count("tc1:m2GuideMode.B"), 1);
    assert_eq!(sim.put_count("tc1:m1GuideMode.A"), 1);
    assert_eq!(sim.put_count("tc1:mountGuideMode.A"), 1);
    assert_eq!(sim.value("tc1:m2GuideMode.A"), WireValue::Str("On".into()));
}

#[tokio::test]
async fn nod_change_triggers_a_fresh_reset() {
    let (sim, tcs) = tcs_with_sim().await;
    let (config, mut guiders) = oiwfs_guiding();
    guiders.oiwfs.nod_b_chop_b = true;

    tcs.enable_guide(&config, &guiders, TIMEOUT).await.unwrap();
    accept_oiwfs_beam(&sim, "A");

    // Telescope nods; the desired beam for OIWFS flips from A to B.
    sim.set_value("tc1:sad:nodState", WireValue::Str("B".into()));
    sim.clear_log();

    tcs.enable_guide(&config, &guiders, TIMEOUT).await.unwrap();

    assert_eq!(sim.put_count("tc1:m2GuideReset.DIR"), 1);
    assert_eq!(sim.value("tc1:m2GuideConfig.B"), WireValue::Str("B".into()));
}

#[tokio::test]
async fn unreadable_status_falls_back_to_a_full_reset() {
    let (sim, tcs) = tcs_with_sim().await;
    let (config, guiders) = oiwfs_guiding();
    tcs.enable_guide(&config, &guiders, TIMEOUT).await.unwrap();
    accept_oiwfs_beam(&sim, "A");
    sim.clear_log();

    // Nod state record drops off the network; the beams cannot be trusted.
    sim.hold_offline("tc1:sad:nodState");

    let result = tcs.enable_guide(&config, &guiders, TIMEOUT).await.unwrap();

    assert_eq!(result, ApplyCommandResult::Completed);
    assert_eq!(sim.put_count("tc1:m2GuideReset.DIR"), 1);
}

#[tokio::test]
async fn enable_with_m2_off_skips_the_readback_entirely() {
    let (sim, tcs) = tcs_with_sim().await;
    let config = TelescopeGuideConfig {
        mount_guide: MountGuideOption::Off,
        m1_guide: M1GuideConfig::Off,
        m2_guide: M2GuideConfig::Off,
    };

    tcs.enable_guide(&config, &GuidersConfig::default(), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(sim.put_count("tc1:m2GuideReset.DIR"), 0);
    assert_eq!(sim.put_count("tc1:apply.DIR"), 1);
    assert!(!sim
        .call_log()
        .contains(&"get:tc1:sad:nodState".to_string()));
    assert_eq!(sim.value("tc1:m2GuideMode.A"), WireValue::Str("Off".into()));
}

#[tokio::test]
async fn disable_guide_turns_everything_off_without_resetting() {
    let (sim, tcs) = tcs_with_sim().await;
    let (config, guiders) = oiwfs_guiding();
    tcs.enable_guide(&config, &guiders, TIMEOUT).await.unwrap();
    sim.clear_log();

    tcs.disable_guide(TIMEOUT).await.unwrap();

    assert_eq!(sim.put_count("tc1:m2GuideReset.DIR"), 0);
    assert_eq!(sim.put_count("tc1:apply.DIR"), 1);
    assert_eq!(sim.value("tc1:m2GuideMode.A"), WireValue::Str("Off".into()));
    assert_eq!(sim.value("tc1:m1GuideMode.A"), WireValue::Str("Off".into()));
    assert_eq!(
        sim.value("tc1:mountGuideMode.A"),
        WireValue::Str("Off".into())
    );
}

#[tokio::test]
async fn resume_rewrites_enables_without_touching_beams() {
    let (sim, tcs) = tcs_with_sim().await;
    let (config, guiders) = oiwfs_guiding();
    tcs.enable_guide(&config, &guiders, TIMEOUT).await.unwrap();
    tcs.disable_guide(TIMEOUT).await.unwrap();
    sim.clear_log();

    tcs.resume_guide(&config, TIMEOUT).await.unwrap();

    assert_eq!(sim.put_count("tc1:m2GuideReset.DIR"), 0);
    assert_eq!(sim.put_count("tc1:m2GuideConfig.A"), 0);
    assert_eq!(sim.put_count("tc1:apply.DIR"), 1);
    assert_eq!(sim.value("tc1:m2GuideMode.A"), WireValue::Str("On".into()));
}
