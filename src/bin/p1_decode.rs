//! Decode captured P1 telegrams on the host.
//!
//! Usage: `p1_decode [FILE]` (reads stdin when no file is given). Every
//! telegram found in the input is framed, checked and printed as the JSON
//! document the firmware would publish. Set `RUST_LOG=debug` for a field dump.

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use anyhow::Context;
    use p1_mqtt_bridge::p1::{
        MemorySerial, PayloadBuilder, TelegramDecoder, TelegramReader, UnconnectedPin,
    };
    use p1_mqtt_bridge::P1Config;
    use std::io::Read;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut input = Vec::new();
    match std::env::args().nth(1) {
        Some(path) => {
            input = std::fs::read(&path).with_context(|| format!("reading {}", path))?;
        }
        None => {
            std::io::stdin()
                .read_to_end(&mut input)
                .context("reading stdin")?;
        }
    }

    let config = P1Config::default();
    let decoder = TelegramDecoder::new(config.fields);
    let builder = PayloadBuilder::new();

    let mut serial = MemorySerial::new();
    serial.feed(&input);
    let mut reader = TelegramReader::new(serial, UnconnectedPin::default());

    let mut decoded = 0;
    let mut failed = 0;
    while reader.serial().pending() > 0 || reader.carried() > 0 {
        reader.request_sample();
        reader.poll();
        let Some(frame) = reader.take_frame() else {
            continue;
        };
        match decoder.decode(frame) {
            Ok(record) => {
                record.log_fields();
                println!("{}", builder.build(&record).as_str());
                decoded += 1;
            }
            Err(e) => {
                log::warn!("❌ {}", e);
                failed += 1;
            }
        }
    }

    let stats = reader.stats();
    log::info!(
        "{} telegram(s) decoded, {} rejected, {} partial frame(s) dropped",
        decoded,
        failed,
        stats.dropped
    );
    if decoded == 0 && failed == 0 {
        anyhow::bail!("no complete telegram found in input");
    }
    Ok(())
}

#[cfg(target_os = "espidf")]
fn main() {}
