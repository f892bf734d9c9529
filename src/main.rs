use std::io::{self, BufRead, Write};
use std::path::Path;

use notepack::{
    Error, MidiMessage, NoteEvent, RelayConfig, RelayIntake, Result, codec, envelope, spawn_relay,
};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  notepack decode <base64 | envelope json>
  notepack encode <timestamp> <note:delay:velocity>...
  notepack relay [config.ron]   (reads hex MIDI lines like `90 3C 7F` from stdin)";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("decode") => decode_command(&args[1..]),
        Some("encode") => encode_command(&args[1..]),
        Some("relay") => relay_command(args.get(1).map(Path::new)),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn decode_command(args: &[String]) -> Result<()> {
    let input = args
        .first()
        .ok_or_else(|| Error::InvalidArgument("missing payload".into()))?;

    let payloads = if input.trim_start().starts_with('[') {
        envelope::parse_payloads(input)?
    } else {
        vec![input.clone()]
    };

    for payload in payloads {
        let batch = codec::decode(&payload)?;
        println!("{}", serde_json::to_string_pretty(&batch)?);
    }
    Ok(())
}

fn encode_command(args: &[String]) -> Result<()> {
    let (timestamp, notes) = args
        .split_first()
        .ok_or_else(|| Error::InvalidArgument("missing timestamp".into()))?;
    let timestamp: u64 = timestamp
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("bad timestamp {timestamp}")))?;

    let notes = notes
        .iter()
        .map(|arg| parse_note_arg(arg))
        .collect::<Result<Vec<_>>>()?;
    println!("{}", codec::encode_base64(timestamp, &notes));
    Ok(())
}

fn parse_note_arg(arg: &str) -> Result<NoteEvent> {
    let fields = arg
        .split(':')
        .map(str::parse::<u8>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::InvalidArgument(format!("bad note {arg}")))?;
    match fields[..] {
        [note, delay, velocity] => Ok(NoteEvent::new(note, delay, velocity)),
        _ => Err(Error::InvalidArgument(format!("bad note {arg}, want note:delay:velocity"))),
    }
}

fn relay_command(config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    let relay = spawn_relay(&config);

    let intake = relay.intake();
    let (done_tx, done_rx) = crossbeam::channel::bounded(1);
    std::thread::spawn(move || {
        let _ = done_tx.send(read_midi_lines(io::stdin().lock(), &intake));
    });

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let input_result = loop {
        crossbeam::select! {
            recv(relay.outbound()) -> msg => match msg {
                Ok(msg) => writeln!(out, "{msg}")?,
                Err(_) => break Ok(()),
            },
            recv(done_rx) -> res => break res.unwrap_or(Ok(())),
        }
    };

    for msg in relay.shutdown() {
        writeln!(out, "{msg}")?;
    }
    input_result
}

fn read_midi_lines(reader: impl BufRead, intake: &RelayIntake) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match MidiMessage::parse_hex(line) {
            Ok(Some(message)) => {
                intake.push_message(message);
            }
            Ok(None) => {}
            Err(e) => warn!("{}", e),
        }
    }
    Ok(())
}
