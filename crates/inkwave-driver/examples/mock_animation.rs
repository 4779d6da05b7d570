//! Runs the full pipeline against the mock panel and prints a perf report.
//!
//! ```sh
//! cargo run --example mock_animation
//! ```

use anyhow::Result;
use embedded_graphics::pixelcolor::Gray8;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Circle, PrimitiveStyle};
use inkwave_driver::{Canvas, Display, DisplayConfig, MockPanel, PerfReport, TemperatureSensor};
use inkwave_specs::{ModeKind, PanelSpec, Phase, PhaseMatrix, Waveform, WaveformTable};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Two-step demo waveform: darken then settle, lighten then settle.
fn demo_table() -> WaveformTable {
    let mut push_step = PhaseMatrix::noop();
    let mut settle_step = PhaseMatrix::noop();

    for prev in 0..32u8 {
        for next in 0..32u8 {
            if prev < next {
                push_step.set(prev, next, Phase::White);
                settle_step.set(prev, next, Phase::White);
            } else if prev > next {
                push_step.set(prev, next, Phase::Black);
                settle_step.set(prev, next, Phase::Black);
            }
        }
    }

    WaveformTable::uniform([
        (ModeKind::Du, Waveform::new(vec![push_step.clone(), settle_step])),
        (ModeKind::A2, Waveform::new(vec![push_step])),
    ])
}

fn main() -> Result<()> {
    let panel = MockPanel::new(&PanelSpec::REMARKABLE_2);
    let log = panel.handle();
    let perf = Arc::new(PerfReport::new());

    let mut display = Display::with_config(
        panel,
        TemperatureSensor::fixed(24),
        demo_table(),
        DisplayConfig {
            power_off_timeout: Duration::from_millis(500),
            trace: perf.clone(),
        },
    );

    display.start()?;

    // A filled circle, batched
    let mut canvas = Canvas::new(128, 128);
    Circle::new(Point::new(16, 16), 96)
        .into_styled(PrimitiveStyle::with_fill(Gray8::new(0)))
        .draw(&mut canvas)?;

    assert!(display.push_update(ModeKind::Du, false, canvas.region_at(100, 200), canvas.data()));

    // A short immediate stroke, one segment per update
    for i in 0..8u32 {
        let mut segment = Canvas::new(16, 4);
        segment.fill(0);
        assert!(display.push_update(
            ModeKind::A2,
            true,
            segment.region_at(400, 300 + i * 16),
            segment.data(),
        ));
    }

    // Wait for the pipeline to drain. Stroke segments merge in flight, so
    // the row count varies; settle once the circle and the first stroke
    // batch are through.
    let deadline = Instant::now() + Duration::from_secs(5);
    while perf.len() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(300));

    display.stop();

    println!("{}", perf.render());
    println!("frames written to the panel: {}", log.frame_count());
    println!("power transitions: {:?}", log.power_transitions());

    Ok(())
}
