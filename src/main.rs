//! Run the load-cell engine against the simulated converter.

use std::io;

use ads1256::Input;
use loadcell::sim::SimulatedAdc;
use loadcell::{Engine, PrintSink, Settings};
use log::info;

/// Raw counts on each cell while unloaded, then after the load changes.
const UNLOADED: [i32; 2] = [1000, 2000];
const LOADED: [i32; 2] = [1015, 1988];

const CYCLES: usize = 10;

fn set_levels(sim: &SimulatedAdc, channels: [Input; 2], levels: [i32; 2]) {
    for (input, level) in channels.into_iter().zip(levels) {
        sim.set_level(input, level);
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::from_env()?;
    let channels = settings.device.channels();

    let sim = SimulatedAdc::new();
    set_levels(&sim, channels, UNLOADED);

    let mut engine = Engine::new(sim.driver());
    engine.start(settings.device)?;

    set_levels(&sim, channels, LOADED);

    let mut sink = PrintSink::new(io::stdout(), channels);

    for _ in 0..CYCLES {
        engine.cycle(&mut sink)?;
    }

    engine.stop()?;

    info!("simulated {:?} of conversions", sim.now());

    Ok(())
}
