//! EVT 3.0 RAW file tool.
//!
//! Inspects, decodes, encodes and synthesizes Prophesee EVT 3.0 RAW files.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use evtio_core::random::RandomEventChunks;
use evtio_core::{
    CsvReader, CsvWriter, FieldOrder, RawFormat, RawReader, RawWriter, ReadMode, ReaderOptions,
    TriggerCsvWriter, WriterOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Events pulled from a CSV file per write.
const CSV_CHUNK_EVENTS: usize = 1_000_000;

/// EVT 3.0 RAW file tool for Prophesee event cameras.
#[derive(Parser, Debug)]
#[command(name = "evtio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved header of a RAW file
    Info {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
    /// Decode a RAW file to CSV, window by window
    Decode(DecodeArgs),
    /// Encode a CSV file into an EVT 3.0 RAW file
    Encode(EncodeArgs),
    /// Write a RAW file of random events
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Input .raw file path
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output .csv file path
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Window mode: auto, delta_t, n_events, mixed or all
    #[arg(short, long, default_value = "auto")]
    mode: ReadMode,

    /// Window span in microseconds
    #[arg(long)]
    delta_t: Option<u64>,

    /// Window size in events
    #[arg(long)]
    n_events: Option<u64>,

    /// Output file for trigger events (optional)
    #[arg(short, long, value_name = "PATH")]
    triggers: Option<PathBuf>,

    /// Field order for CSV output, comma-separated names of t, x, y, p
    #[arg(short, long, default_value = "t,x,y,p")]
    order: FieldOrder,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Input .csv file path
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output .raw file path
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Sensor width; defaults to the CSV geometry comment, then 1280
    #[arg(long)]
    width: Option<u32>,

    /// Sensor height; defaults to the CSV geometry comment, then 720
    #[arg(long)]
    height: Option<u32>,

    /// Serial number written to the header
    #[arg(long, default_value = "00000000")]
    serial: String,

    /// Payload format
    #[arg(short, long, default_value = "EVT3")]
    format: RawFormat,

    /// Field order of the CSV columns
    #[arg(short, long, default_value = "t,x,y,p")]
    order: FieldOrder,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Output .raw file path
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Number of events
    #[arg(short = 'n', long, default_value_t = 1_000_000)]
    count: usize,

    #[arg(long, default_value_t = 1280)]
    width: u16,

    #[arg(long, default_value_t = 720)]
    height: u16,

    /// Recording length in microseconds
    #[arg(short, long, default_value_t = 1_000_000)]
    duration: u64,

    /// Random seed
    #[arg(short, long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Info { input } => info_command(&input),
        Command::Decode(args) => decode_command(args),
        Command::Encode(args) => encode_command(args),
        Command::Generate(args) => generate_command(args),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {msg}",
    )?);
    Ok(pb)
}

fn file_name(path: &Path) -> &std::ffi::OsStr {
    path.file_name().unwrap_or_default()
}

fn info_command(input: &Path) -> Result<()> {
    let reader = RawReader::open(input, &ReaderOptions::default())
        .with_context(|| format!("Failed to open {:?}", input))?;
    let header = reader.header();
    let file_size = std::fs::metadata(input)?.len();

    println!("File:          {:?}", input);
    println!("Format:        {}", header.format_name);
    println!("Geometry:      {}x{}", header.width, header.height);
    if let Some(date) = &header.date {
        println!("Date:          {}", date);
    }
    println!("Serial number: {}", header.serial_number);
    println!("System ID:     {}", header.system_id);
    if let Some(sensor) = &header.sensor_name {
        println!("Sensor:        {}", sensor);
    }
    if let Some(generation) = &header.sensor_generation {
        println!("Generation:    {}", generation);
    }
    println!("Integrator:    {}", header.integrator_name);
    println!("Header size:   {} bytes", reader.position());
    println!("Payload size:  {} bytes", file_size.saturating_sub(reader.position()));
    Ok(())
}

fn decode_command(args: DecodeArgs) -> Result<()> {
    let options = ReaderOptions {
        mode: args.mode,
        delta_t: args.delta_t,
        n_events: args.n_events,
        ..ReaderOptions::default()
    };
    let mut reader = RawReader::open(&args.input, &options)
        .with_context(|| format!("Failed to open {:?}", args.input))?;
    let file_size = std::fs::metadata(&args.input)?.len().max(1);
    info!(
        "Decoding {:?} ({}x{}) with {} windows",
        file_name(&args.input),
        reader.shape().0,
        reader.shape().1,
        reader.window().mode
    );

    let output = File::create(&args.output)
        .with_context(|| format!("Failed to create {:?}", args.output))?;
    let mut csv = CsvWriter::new(output, args.order);
    csv.write_header(Some(reader.shape()))?;

    let mut trigger_csv = match &args.triggers {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
            let mut writer = TriggerCsvWriter::new(file);
            writer.write_header()?;
            Some(writer)
        }
        None => None,
    };

    let progress = spinner(args.quiet)?;
    let start_time = Instant::now();
    let mut n_events = 0u64;
    let mut n_triggers = 0u64;
    let mut n_windows = 0u64;

    loop {
        let batch = reader.read().context("Failed to decode RAW file")?;
        if batch.is_empty() && reader.is_end_of_stream() {
            break;
        }
        n_windows += 1;
        n_events += batch.events.len() as u64;
        n_triggers += batch.triggers.len() as u64;

        csv.write_events(&batch.events)
            .context("Failed to write CSV output")?;
        if let Some(writer) = trigger_csv.as_mut() {
            writer
                .write_events(&batch.triggers)
                .context("Failed to write trigger CSV")?;
        }

        progress.set_message(format!(
            "{} events in {} windows ({:.0}%)",
            n_events,
            n_windows,
            reader.position() as f64 * 100.0 / file_size as f64
        ));
        progress.tick();
    }

    csv.flush()?;
    if let Some(writer) = trigger_csv.as_mut() {
        writer.flush()?;
    }
    if reader.malformed_groups() > 0 {
        warn!("Dropped {} malformed vector groups", reader.malformed_groups());
    }

    let total_duration = start_time.elapsed();
    progress.finish_with_message(format!(
        "Done! Decoded {} events in {:.2}s",
        n_events,
        total_duration.as_secs_f64()
    ));

    if !args.quiet {
        let events_per_sec = n_events as f64 / total_duration.as_secs_f64().max(f64::EPSILON);
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", args.input);
        eprintln!("  Output:       {:?}", args.output);
        eprintln!("  CD Events:    {}", n_events);
        eprintln!("  Triggers:     {}", n_triggers);
        eprintln!("  Windows:      {}", n_windows);
        eprintln!("  Sensor:       {}x{}", reader.shape().0, reader.shape().1);
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
        eprintln!("  Throughput:   {:.0} events/s", events_per_sec);
    }

    Ok(())
}

fn encode_command(args: EncodeArgs) -> Result<()> {
    let input = File::open(&args.input)
        .with_context(|| format!("Failed to open {:?}", args.input))?;
    let mut csv = CsvReader::new(BufReader::new(input), args.order);

    // the geometry comment precedes the records, so it is known after the first read
    let mut events = csv
        .read_events(CSV_CHUNK_EVENTS)
        .context("Failed to read CSV input")?;
    let (csv_width, csv_height) = csv.geometry().unwrap_or((1280, 720));

    let options = WriterOptions {
        width: args.width.unwrap_or(csv_width),
        height: args.height.unwrap_or(csv_height),
        serial_number: args.serial,
        format: args.format,
        ..WriterOptions::default()
    };
    let mut writer = RawWriter::create(&args.output, &options)
        .with_context(|| format!("Failed to create {:?}", args.output))?;
    info!(
        "Encoding {:?} as {} {}x{}",
        file_name(&args.input),
        options.format,
        options.width,
        options.height
    );

    let start_time = Instant::now();
    while !events.is_empty() {
        writer.write(&events).context("Failed to encode events")?;
        events = csv
            .read_events(CSV_CHUNK_EVENTS)
            .context("Failed to read CSV input")?;
    }
    let n_events = writer.n_written_events();
    let n_bytes = writer.bytes_written();
    writer.close().context("Failed to finish RAW file")?;

    info!(
        "Wrote {} events ({} bytes) to {:?} in {:.2}s",
        n_events,
        n_bytes,
        file_name(&args.output),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

fn generate_command(args: GenerateArgs) -> Result<()> {
    let options = WriterOptions::with_geometry(args.width as u32, args.height as u32);
    let mut writer = RawWriter::create(&args.output, &options)
        .with_context(|| format!("Failed to create {:?}", args.output))?;

    let progress = ProgressBar::new(args.count as u64);
    progress.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} events",
    )?);

    let chunks = RandomEventChunks::new(
        args.count,
        args.width,
        args.height,
        0,
        args.duration,
        CSV_CHUNK_EVENTS,
        args.seed,
    );
    for chunk in chunks {
        writer.write(&chunk).context("Failed to encode events")?;
        progress.inc(chunk.len() as u64);
    }
    let n_bytes = writer.bytes_written();
    writer.close().context("Failed to finish RAW file")?;

    progress.finish_and_clear();
    info!(
        "Generated {} events over {} us ({} bytes) in {:?}",
        args.count,
        args.duration,
        n_bytes,
        file_name(&args.output)
    );
    Ok(())
}
