use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use serde::Deserialize;
use sst_proc::{
    process_recording, Axis, CalibrationSpec, Linkage, Meta, PipelineConfig, Processed,
    SetupData, SmootherConfig, Stroke,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Suspension telemetry processing CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one or more recordings against a bike setup
    Process(ProcessArgs),
    /// Fit a leverage ratio table and print the resulting linkage
    Linkage(LinkageArgs),
}

#[derive(Parser, Debug)]
struct ProcessArgs {
    /// Recording JSON files (`{"meta": .., "front": [..], "rear": [..]}`)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Setup JSON with linkage and calibrations
    #[arg(long, value_hint = ValueHint::FilePath)]
    setup: PathBuf,

    /// Pipeline configuration JSON; missing keys use defaults
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Directory for `<input>.processed.json` files (`-` for stdout)
    #[arg(short, long, default_value = ".", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    /// Also write a per-stroke CSV summary (`-` for stdout)
    #[arg(long, value_hint = ValueHint::FilePath)]
    strokes_csv: Option<PathBuf>,

    /// Smoother to use (overrides the config file)
    #[arg(long, value_enum)]
    smoother: Option<SmootherOpt>,

    /// Whittaker-Henderson smoothing strength
    #[arg(long)]
    lambda: Option<f64>,

    /// Whittaker-Henderson penalty order (1-5)
    #[arg(long)]
    order: Option<usize>,

    /// Process front and rear sequentially instead of in parallel
    #[arg(long, action = ArgAction::SetTrue)]
    serial_axes: bool,

    /// Log stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct LinkageArgs {
    /// Leverage ratio table, one `wheel_travel,leverage_ratio` pair per line
    #[arg(value_hint = ValueHint::FilePath)]
    table: PathBuf,

    /// Head angle in degrees
    #[arg(long)]
    head_angle: f64,

    /// Fork stroke (mm)
    #[arg(long)]
    front_stroke: f64,

    /// Shock stroke (mm)
    #[arg(long)]
    rear_stroke: f64,

    #[arg(long, default_value = "linkage")]
    name: String,

    /// Output JSON path (defaults to stdout)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SmootherOpt {
    /// Whittaker-Henderson
    Wh,
    /// Modified sinc kernel
    Sinc,
}

#[derive(Deserialize, Debug)]
struct SetupFile {
    linkage: LinkageFile,
    front_calibration: CalibrationSpec,
    rear_calibration: CalibrationSpec,
}

#[derive(Deserialize, Debug)]
struct LinkageFile {
    name: String,
    head_angle: f64,
    front_stroke: f64,
    rear_stroke: f64,
    /// Raw leverage ratio table.
    data: String,
}

#[derive(Deserialize, Debug)]
struct RecordingFile {
    meta: Meta,
    #[serde(default)]
    front: Vec<f64>,
    #[serde(default)]
    rear: Vec<f64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Process(args) => args.verbose,
        Command::Linkage(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Process(args) => handle_process(args),
        Command::Linkage(args) => handle_linkage(args),
    }
}

fn handle_process(args: ProcessArgs) -> Result<()> {
    if args.inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }

    let mut config = match args.config.as_ref() {
        Some(path) => load_json::<PipelineConfig>(path)?,
        None => PipelineConfig::default(),
    };
    apply_overrides(&mut config, &args)?;
    config.validate().context("invalid pipeline configuration")?;

    let setup_file: SetupFile = load_json(&args.setup)?;
    let linkage = Linkage::from_table(
        setup_file.linkage.name.clone(),
        setup_file.linkage.head_angle,
        setup_file.linkage.front_stroke,
        setup_file.linkage.rear_stroke,
        &setup_file.linkage.data,
    )
    .with_context(|| format!("failed to fit linkage from {}", args.setup.display()))?;
    info!(
        "Linkage {}: max front travel {:.1} mm, max rear travel {:.1} mm",
        linkage.name, linkage.max_front_travel, linkage.max_rear_travel
    );
    let setup = SetupData {
        linkage: &linkage,
        front_calibration: &setup_file.front_calibration,
        rear_calibration: &setup_file.rear_calibration,
    };

    let t_process = Instant::now();
    let processed: Vec<(PathBuf, Processed)> = args
        .inputs
        .par_iter()
        .map(|path| -> Result<(PathBuf, Processed)> {
            let t_file = Instant::now();
            let recording: RecordingFile = load_json(path)?;
            let processed = process_recording(
                &recording.front,
                &recording.rear,
                &recording.meta,
                &setup,
                &config,
            )
            .with_context(|| format!("failed to process {}", path.display()))?;
            debug!(
                "{}: processed {} front / {} rear samples in {:.1} ms",
                path.display(),
                recording.front.len(),
                recording.rear.len(),
                t_file.elapsed().as_secs_f64() * 1000.0
            );
            Ok((path.clone(), processed))
        })
        .collect::<Result<Vec<_>>>()?;

    if args.profile || args.verbose {
        info!(
            "Process stage: {:.1} ms ({} recordings)",
            t_process.elapsed().as_secs_f64() * 1000.0,
            processed.len()
        );
    }

    for (path, p) in &processed {
        log_summary(path, p);
    }

    if args.output_dir.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        for (_, p) in &processed {
            serde_json::to_writer(&mut handle, p)?;
            writeln!(handle)?;
        }
    } else {
        fs::create_dir_all(&args.output_dir)
            .with_context(|| format!("failed to create {}", args.output_dir.display()))?;
        for (path, p) in &processed {
            let out = output_path(&args.output_dir, path);
            let file = File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            serde_json::to_writer(io::BufWriter::new(file), p)
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!("Wrote {}", out.display());
        }
    }

    if let Some(csv_path) = args.strokes_csv.as_ref() {
        if csv_path.as_os_str() == "-" {
            let stdout = io::stdout();
            let mut writer = csv::Writer::from_writer(stdout.lock());
            write_stroke_rows(&processed, &mut writer)?;
        } else {
            let file = File::create(csv_path)
                .with_context(|| format!("failed to create {}", csv_path.display()))?;
            let mut writer = csv::Writer::from_writer(file);
            write_stroke_rows(&processed, &mut writer)?;
            info!("Wrote stroke CSV: {}", csv_path.display());
        }
    }
    Ok(())
}

fn handle_linkage(args: LinkageArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.table)
        .with_context(|| format!("failed to read {}", args.table.display()))?;
    let linkage = Linkage::from_table(
        args.name,
        args.head_angle,
        args.front_stroke,
        args.rear_stroke,
        &raw,
    )
    .with_context(|| format!("failed to fit {}", args.table.display()))?;
    info!(
        "Fitted {} points: max front travel {:.1} mm, max rear travel {:.1} mm",
        linkage.leverage_ratio.len(),
        linkage.max_front_travel,
        linkage.max_rear_travel
    );

    let json = serde_json::to_string_pretty(&linkage)?;
    match args.output.as_ref() {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn apply_overrides(config: &mut PipelineConfig, args: &ProcessArgs) -> Result<()> {
    match args.smoother {
        Some(SmootherOpt::Wh)
            if !matches!(config.smoother, SmootherConfig::WhittakerHenderson { .. }) =>
        {
            config.smoother = SmootherConfig::default();
        }
        Some(SmootherOpt::Sinc)
            if !matches!(config.smoother, SmootherConfig::ModifiedSinc { .. }) =>
        {
            config.smoother = SmootherConfig::ModifiedSinc {
                degree: 4,
                half_width: 20,
                alpha: 4.0,
            };
        }
        _ => {}
    }

    if args.lambda.is_some() || args.order.is_some() {
        match &mut config.smoother {
            SmootherConfig::WhittakerHenderson { order, lambda } => {
                if let Some(v) = args.lambda {
                    *lambda = v;
                }
                if let Some(v) = args.order {
                    *order = v;
                }
            }
            SmootherConfig::ModifiedSinc { .. } => {
                return Err(anyhow!(
                    "--lambda and --order only apply to the Whittaker-Henderson smoother"
                ));
            }
        }
    }
    config.parallel_axes &= !args.serial_axes;
    Ok(())
}

fn output_path(dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recording");
    dir.join(format!("{stem}.processed.json"))
}

fn log_summary(path: &Path, p: &Processed) {
    if let Some(at) = p.meta.recorded_at() {
        debug!("{}: recorded {}", path.display(), at.format("%Y-%m-%d %H:%M:%S"));
    }
    for (axis, s) in [(Axis::Front, &p.front), (Axis::Rear, &p.rear)] {
        if !s.present {
            if !s.travel.is_empty() {
                warn!("{}: {} axis has no strokes", path.display(), axis);
            }
            continue;
        }
        info!(
            "{}: {} {} compressions, {} rebounds, max travel {:.1} mm",
            path.display(),
            axis,
            s.strokes.compressions.len(),
            s.strokes.rebounds.len(),
            s.global_max_travel
        );
    }
    if !p.airtimes.is_empty() {
        let total: f64 = p.airtimes.iter().map(|a| a.end - a.start).sum();
        info!(
            "{}: {} airtimes, {:.2} s total",
            path.display(),
            p.airtimes.len(),
            total
        );
    }
}

fn write_stroke_rows<W: Write>(
    processed: &[(PathBuf, Processed)],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "recording",
        "axis",
        "kind",
        "start_s",
        "end_s",
        "length_mm",
        "duration_s",
        "max_travel_mm",
        "max_velocity_mm_s",
        "bottomouts",
        "air_candidate",
    ])?;

    for (path, p) in processed {
        let rate = f64::from(p.meta.sample_rate.max(1));
        let name = if p.meta.name.is_empty() {
            path.display().to_string()
        } else {
            p.meta.name.clone()
        };
        for (axis, s) in [(Axis::Front, &p.front), (Axis::Rear, &p.rear)] {
            let groups: [(&str, &[Stroke]); 3] = [
                ("compression", s.strokes.compressions.as_slice()),
                ("rebound", s.strokes.rebounds.as_slice()),
                ("idle", s.strokes.idlings.as_slice()),
            ];
            for (kind, strokes) in groups {
                for st in strokes {
                    writer.write_record([
                        name.clone(),
                        axis.to_string(),
                        kind.to_string(),
                        format!("{:.3}", st.start as f64 / rate),
                        format!("{:.3}", st.end as f64 / rate),
                        format!("{:.2}", st.length),
                        format!("{:.3}", st.duration),
                        format!("{:.2}", st.stat.max_travel),
                        format!("{:.1}", st.stat.max_velocity),
                        st.stat.bottomouts.to_string(),
                        st.air_candidate.to_string(),
                    ])?;
                }
            }
        }
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ProcessArgs {
        let mut argv = vec!["sst-proc", "process", "ride.json", "--setup", "setup.json"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Process(args) => args,
            Command::Linkage(_) => unreachable!(),
        }
    }

    #[test]
    fn test_lambda_and_order_override() {
        let mut config = PipelineConfig::default();
        apply_overrides(&mut config, &args(&["--lambda", "100", "--order", "3"])).unwrap();
        assert_eq!(
            config.smoother,
            SmootherConfig::WhittakerHenderson {
                order: 3,
                lambda: 100.0
            }
        );
        assert!(config.parallel_axes);
    }

    #[test]
    fn test_switch_to_sinc() {
        let mut config = PipelineConfig::default();
        apply_overrides(&mut config, &args(&["--smoother", "sinc", "--serial-axes"])).unwrap();
        assert_eq!(config.smoother.id(), "modified_sinc");
        assert!(!config.parallel_axes);
        config.validate().unwrap();
    }

    #[test]
    fn test_lambda_rejected_for_sinc() {
        let mut config = PipelineConfig::default();
        let args = args(&["--smoother", "sinc", "--lambda", "5"]);
        assert!(apply_overrides(&mut config, &args).is_err());
    }

    #[test]
    fn test_output_path_uses_input_stem() {
        let out = output_path(Path::new("out"), Path::new("data/ride_01.json"));
        assert_eq!(out, PathBuf::from("out/ride_01.processed.json"));
    }

    #[test]
    fn test_setup_file_parses() {
        let setup: SetupFile = serde_json::from_str(
            r#"{
                "linkage": {"name": "bike", "head_angle": 65, "front_stroke": 160,
                            "rear_stroke": 60, "data": "0,3\n10,2.9\n20,2.8\n30,2.7\n"},
                "front_calibration": {"kind": "linear", "scale": 0.04},
                "rear_calibration": {"kind": "table", "points": [[0, 0], [4095, 60]]}
            }"#,
        )
        .unwrap();
        let linkage = Linkage::from_table(
            setup.linkage.name,
            setup.linkage.head_angle,
            setup.linkage.front_stroke,
            setup.linkage.rear_stroke,
            &setup.linkage.data,
        )
        .unwrap();
        assert_eq!(linkage.leverage_ratio.len(), 4);
    }
}
