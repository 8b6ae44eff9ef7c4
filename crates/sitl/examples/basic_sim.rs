//! Scripted end-to-end run: calibrate the magnetometer, then track a
//! rotating pose and print orientation lines.
//!
//! Runs on virtual time (MockTime), so the 15-second calibration session
//! finishes instantly.

use nalgebra::Vector3;
use polaris_nav_core::ahrs::CalibrationConfig;
use polaris_nav_core::engine::{EngineConfig, EngineEvent};
use polaris_nav_core::navigation::estimate_declination;
use polaris_nav_core::traits::MockTime;
use polaris_nav_sitl::{MockNvm, Navigator, SyntheticImu, SyntheticImuConfig};

const TICK_MS: u64 = 10;

fn main() {
    let imu_config = SyntheticImuConfig {
        hard_iron_ut: Vector3::new(120.0, -60.0, 35.0),
        gyro_bias_dps: Vector3::new(0.4, -0.2, 0.3),
        ..Default::default()
    };
    let engine_config = EngineConfig {
        calibration: CalibrationConfig {
            // The simulated field spans ±50 µT; accept a narrower sweep
            // than the raw-counts default assumes, and let the time window
            // finish the session rather than the sample counter.
            min_range: 60.0,
            sample_target: 1500,
            ..Default::default()
        },
        // Coarse fallback for a user who has not entered a declination
        declination_deg: estimate_declination(35.7, 139.7),
        ..Default::default()
    };
    println!(
        "declination (coarse dipole estimate): {:+.1}°",
        engine_config.declination_deg
    );

    let mut navigator = Navigator::new(
        engine_config,
        SyntheticImu::new(imu_config),
        MockTime::default(),
        MockNvm::new(),
    )
    .expect("navigator setup");

    println!("calibrated at startup: {}", navigator.engine().is_calibrated());

    let bias = navigator.capture_gyro_bias(50).expect("gyro bias capture");
    println!(
        "gyro bias estimate: [{:+.2} {:+.2} {:+.2}] deg/s",
        bias.x, bias.y, bias.z
    );

    // Figure-8 stand-in: full turns about each body axis while collecting.
    println!("rotate the device... (simulated)");
    navigator.start_calibration();
    let spin_axes = [
        Vector3::new(0.0, 0.0, 120.0),
        Vector3::new(120.0, 0.0, 0.0),
        Vector3::new(0.0, 120.0, 0.0),
    ];
    let mut tick = 0u64;
    'session: loop {
        let axis = spin_axes[(tick / 500) as usize % spin_axes.len()];
        navigator.sensors_mut().set_turn_rate_dps(axis);
        navigator.sensors_mut().advance(TICK_MS as f32 / 1000.0);
        navigator.time().advance_ms(TICK_MS);
        tick += 1;

        if tick % 500 == 0 {
            let progress = navigator
                .engine()
                .calibration_progress(tick * TICK_MS * 1000);
            println!("  ... {:3.0}%", progress * 100.0);
        }

        match navigator.step().expect("step") {
            EngineEvent::CalibrationFinished(report) => {
                println!(
                    "calibration {}: offset [{:+.1} {:+.1} {:+.1}] µT, scale [{:.2} {:.2} {:.2}]",
                    report.quality.as_str(),
                    report.offset.x,
                    report.offset.y,
                    report.offset.z,
                    report.scale.x,
                    report.scale.y,
                    report.scale.z,
                );
                break 'session;
            }
            EngineEvent::CalibrationCancelled => {
                println!("calibration cancelled");
                break 'session;
            }
            _ => {}
        }
    }

    // Track a slow pan and report once a second.
    navigator.sensors_mut().set_attitude_deg(0.0, 0.0, 0.0);
    navigator.sensors_mut().set_turn_rate_dps(Vector3::new(0.0, 0.0, 6.0));
    for second in 0..10 {
        for _ in 0..100 {
            navigator.sensors_mut().advance(TICK_MS as f32 / 1000.0);
            navigator.time().advance_ms(TICK_MS);
            navigator.step().expect("step");
        }
        let out = navigator.orientation();
        println!(
            "t+{:2}s heading {:6.1}°  pitch {:+5.1}°  roll {:+5.1}°  (mag {})",
            second + 1,
            out.heading_deg,
            out.pitch_deg,
            out.roll_deg,
            if out.mag_calibrated { "ok" } else { "uncal" },
        );
    }
}
