#[cfg(feature = "raspberry_pi")]
mod imports {
    pub use std::fs::File;
    pub use std::io::{self, BufReader, BufWriter, IsTerminal};

    pub use ads1256::Ads1256;
    pub use embedded_hal_bus::spi::ExclusiveDevice;
    pub use loadcell::{timestamped_file_name, CsvSink, Engine, PrintSink, Settings, StopSignal, Tee};
    pub use log::info;
    pub use rppal::gpio::Gpio;
    pub use rppal::hal::Delay;
    pub use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
}

#[cfg(feature = "raspberry_pi")]
use imports::*;

/// Stop on Enter when attached to a terminal, and once `settings.duration`
/// has passed.
#[cfg(feature = "raspberry_pi")]
fn stop_signal(settings: &Settings) -> StopSignal {
    let stop = StopSignal::new();

    if io::stdin().is_terminal() {
        println!("press Enter to stop");
        stop.on_line(BufReader::new(io::stdin()));
    }

    if let Some(duration) = settings.duration {
        stop.after(duration);
    }

    stop
}

#[cfg(feature = "raspberry_pi")]
fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::from_env()?;
    let probe = std::env::args().nth(1).is_some_and(|arg| arg == "probe");

    let gpio = Gpio::new()?;

    // The converter latches on the falling clock edge: SPI mode 1.
    let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, settings.spi_clock_hz, Mode::Mode1)?;
    let cs = gpio.get(settings.cs_pin)?.into_output_high();
    let drdy = gpio.get(settings.drdy_pin)?.into_input_pullup();

    let device = ExclusiveDevice::new(spi, cs, Delay::new());
    let mut adc = Ads1256::new(device, drdy, Delay::new());

    if probe {
        let report = adc.probe()?;

        println!("STATUS  {:#04x} (chip id {})", report.status.0, report.status.id());
        println!("ADCON   {:#04x} (gain x{})", report.adcon, report.gain_factor());
        println!("DRDY    {}", if report.data_ready { "low (data ready)" } else { "high" });
        println!("DRATE   wrote 0x82, read {:#04x}", report.drate_echo);

        anyhow::ensure!(report.responding(), "converter did not keep a register write");

        println!("communication OK");

        return Ok(());
    }

    let channels = settings.device.channels();
    let mut engine = Engine::new(adc);
    engine.start(settings.device)?;

    println!("tared");

    let stop = stop_signal(&settings);
    let print = PrintSink::new(io::stdout(), channels).with_period(settings.print_period());

    let stats = match &settings.record {
        Some(path) => {
            let path = if path.is_dir() { path.join(timestamped_file_name()) } else { path.clone() };
            let csv = CsvSink::new(BufWriter::new(File::create(&path)?))?;
            let mut sink = Tee(print, csv);

            let stats = engine.run(&mut sink, stop.flag())?;

            let Tee(_, csv) = sink;
            let rows = csv.rows();
            csv.finish()?;
            info!("{rows} rows written to {}", path.display());

            stats
        }
        None => engine.run(print, stop.flag())?,
    };

    println!(
        "{} readings, {} retried, {} skipped",
        stats.readings, stats.retries, stats.skipped
    );

    Ok(())
}

#[cfg(not(feature = "raspberry_pi"))]
fn main() -> Result<(), anyhow::Error> {
    anyhow::bail!("built without the raspberry_pi feature")
}
