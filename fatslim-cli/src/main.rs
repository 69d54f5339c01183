use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use fatslim_core::{
    probe_file, trim_file, ArchitectureId, Probe, SliceDescriptor, TrimReport, TrimRequest,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tabled::settings::Style;
use tabled::{Table, Tabled};

mod scan;

/// Strip unwanted architectures from macOS universal binaries
#[derive(Parser)]
#[command(
    name = "fatslim",
    about = "Inspect universal (fat) Mach-O binaries and remove architectures from them",
    version,
    author
)]
struct Cli {
    /// Show debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the architectures in each binary
    Info {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove architectures from universal binaries
    Remove {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Architecture to remove; repeatable. e.g. x86_64, arm64e, x86_64:*, 0x1000007:3
        #[arg(short = 'r', long = "remove", value_name = "ARCH", required = true)]
        archs: Vec<ArchitectureId>,

        /// Write the result here instead of replacing the input
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip requested architectures that are not present instead of failing
        #[arg(long)]
        lenient: bool,

        /// Keep the universal wrapper even when a single slice remains
        #[arg(long)]
        keep_wrapper: bool,

        /// Run and verify without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Find applications that still ship an architecture you can remove
    Scan {
        #[arg(default_value = "/Applications")]
        dir: PathBuf,

        /// Architecture to look for
        #[arg(short = 'r', long = "remove", value_name = "ARCH", default_value = "x86_64")]
        arch: ArchitectureId,

        #[arg(long, value_enum, default_value_t = SortMode::Name)]
        sort: SortMode,

        /// Also list applications with nothing to remove
        #[arg(long)]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortMode {
    Name,
    Size,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Info { paths, json } => info(&paths, json),
        Command::Remove {
            paths,
            archs,
            output,
            lenient,
            keep_wrapper,
            dry_run,
            json,
        } => {
            if output.is_some() && paths.len() > 1 {
                bail!("--output can only be used with a single input");
            }
            let mut request = TrimRequest::new(archs);
            if lenient {
                request = request.lenient();
            }
            if keep_wrapper {
                request = request.keep_wrapped();
            }
            remove(&paths, output.as_deref(), &request, dry_run, json)
        }
        Command::Scan {
            dir,
            arch,
            sort,
            all,
            json,
        } => {
            let mut apps = scan::scan_applications(&dir, &arch)
                .with_context(|| format!("failed to scan {}", dir.display()))?;
            if !all {
                apps.retain(|app| app.removable.is_some());
            }
            match sort {
                SortMode::Name => apps.sort_by_key(|app| app.name.to_lowercase()),
                SortMode::Size => apps.sort_by(|a, b| {
                    b.removable
                        .cmp(&a.removable)
                        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                }),
            }
            scan::print(&apps, &arch, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Tabled, Serialize)]
struct SliceRow {
    #[tabled(rename = "Arch")]
    arch: String,
    #[tabled(rename = "CPU type")]
    cputype: String,
    #[tabled(rename = "Subtype")]
    cpusubtype: u32,
    #[tabled(rename = "Offset")]
    offset: u64,
    #[tabled(rename = "Size")]
    size: u64,
    #[tabled(rename = "Align")]
    align: String,
}

impl From<&SliceDescriptor> for SliceRow {
    fn from(d: &SliceDescriptor) -> Self {
        SliceRow {
            arch: d.arch().to_string(),
            cputype: format!("{:#x}", d.cputype),
            cpusubtype: d.cpusubtype,
            offset: d.offset,
            size: d.size,
            align: format!("2^{} ({})", d.align, 1u64 << d.align.min(63)),
        }
    }
}

impl SliceRow {
    fn thin(id: ArchitectureId, size: u64) -> Self {
        let cpusubtype = match id {
            ArchitectureId::Exact { cpusubtype, .. } => cpusubtype,
            ArchitectureId::Family(_) => 0,
        };
        SliceRow {
            arch: id.to_string(),
            cputype: format!("{:#x}", id.cputype()),
            cpusubtype,
            offset: 0,
            size,
            align: "-".to_string(),
        }
    }
}

#[derive(Serialize)]
struct InfoEntry {
    path: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variant: Option<&'static str>,
    slices: Vec<SliceRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Exit code for a file that could not be read, as for a failed trim.
const EXIT_UNREADABLE: u8 = 6;
/// Exit code for a file with universal magic but an invalid layout.
const EXIT_MALFORMED: u8 = 2;

fn info(paths: &[PathBuf], json: bool) -> Result<ExitCode> {
    let mut entries = Vec::with_capacity(paths.len());
    let mut failure = None;

    for path in paths {
        let (entry, code) = inspect(path);
        if let Some(code) = code {
            failure.get_or_insert(code);
        }
        entries.push(entry);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            print_info(entry);
        }
    }

    Ok(failure.map_or(ExitCode::SUCCESS, ExitCode::from))
}

/// Describes one file, with the exit code it contributes if it is unusable.
fn inspect(path: &Path) -> (InfoEntry, Option<u8>) {
    let mut entry = InfoEntry {
        path: path.display().to_string(),
        kind: "unknown",
        variant: None,
        slices: Vec::new(),
        error: None,
    };

    let probe = match probe_file(path) {
        Ok(probe) => probe,
        Err(err) => {
            entry.kind = "unreadable";
            entry.error = Some(err.to_string());
            return (entry, Some(EXIT_UNREADABLE));
        }
    };

    match probe {
        Probe::Universal { variant, slices } => {
            entry.kind = "universal";
            entry.variant = Some(variant.name());
            entry.slices = slices.iter().map(SliceRow::from).collect();
        }
        Probe::Thin(id) => {
            entry.kind = "thin";
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or_default();
            entry.slices.push(SliceRow::thin(id, size));
        }
        Probe::Archive => entry.kind = "archive",
        Probe::Malformed(err) => {
            entry.kind = "malformed";
            entry.error = Some(err.to_string());
            return (entry, Some(EXIT_MALFORMED));
        }
        Probe::Unknown => {}
    }
    (entry, None)
}

fn print_info(entry: &InfoEntry) {
    match entry.kind {
        "universal" => {
            println!(
                "{}: universal binary ({}, {} slices)",
                entry.path.bold(),
                entry.variant.unwrap_or_default(),
                entry.slices.len()
            );
            let mut table = Table::new(&entry.slices);
            table.with(Style::rounded());
            println!("{table}");
        }
        "thin" => {
            let arch = entry.slices.first().map(|s| s.arch.as_str()).unwrap_or_default();
            println!("Non-fat file: {} is architecture: {arch}", entry.path);
        }
        "archive" => println!("{}: static archive, not a universal binary", entry.path),
        "unreadable" => println!(
            "{}: {} {}",
            entry.path,
            "cannot read:".red(),
            entry.error.as_deref().unwrap_or_default()
        ),
        "malformed" => println!(
            "{}: {} {}",
            entry.path,
            "malformed universal binary:".red(),
            entry.error.as_deref().unwrap_or_default()
        ),
        _ => println!("{}: not a Mach-O file", entry.path),
    }
}

#[derive(Serialize)]
struct RemoveEntry {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    removed: Vec<String>,
    kept: Vec<String>,
    wrapped: bool,
    input_len: u64,
    output_len: u64,
    saved: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl RemoveEntry {
    fn new(path: &Path, output: Option<&Path>) -> Self {
        RemoveEntry {
            path: path.display().to_string(),
            output: output.map(|p| p.display().to_string()),
            removed: Vec::new(),
            kept: Vec::new(),
            wrapped: false,
            input_len: 0,
            output_len: 0,
            saved: 0,
            error: None,
        }
    }

    fn fill(&mut self, report: &TrimReport) {
        self.removed = report.removed.iter().map(ToString::to_string).collect();
        self.kept = report.kept.iter().map(ToString::to_string).collect();
        self.wrapped = report.wrapped;
        self.input_len = report.input_len;
        self.output_len = report.output_len;
        self.saved = report.saved();
    }
}

fn remove(
    paths: &[PathBuf],
    output: Option<&Path>,
    request: &TrimRequest,
    dry_run: bool,
    json: bool,
) -> Result<ExitCode> {
    let results = trim_each(paths, output, request, dry_run);
    let mut entries = Vec::with_capacity(paths.len());

    for (path, result) in paths.iter().zip(&results) {
        let mut entry = RemoveEntry::new(path, output);
        match result {
            Ok(report) => {
                entry.fill(report);
                if !json {
                    print_report(path, report, dry_run);
                }
            }
            Err(err) => {
                if !json {
                    eprintln!("{} {}: {err}", "error:".red().bold(), path.display());
                }
                entry.error = Some(err.to_string());
            }
        }
        entries.push(entry);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }

    Ok(first_failure(&results).map_or(ExitCode::SUCCESS, ExitCode::from))
}

/// Trims every path on its own; a failing file does not stop the rest.
fn trim_each(
    paths: &[PathBuf],
    output: Option<&Path>,
    request: &TrimRequest,
    dry_run: bool,
) -> Vec<fatslim_core::Result<TrimReport>> {
    paths
        .iter()
        .map(|path| trim_file(path, output, request, dry_run))
        .collect()
}

fn first_failure(results: &[fatslim_core::Result<TrimReport>]) -> Option<u8> {
    results
        .iter()
        .find_map(|result| result.as_ref().err().map(fatslim_core::Error::exit_code))
}

fn print_report(path: &Path, report: &TrimReport, dry_run: bool) {
    if report.is_noop() {
        println!("{} {}: nothing to remove", "-".dimmed(), path.display());
        return;
    }

    let join = |ids: &[ArchitectureId]| {
        ids.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    let shape = if report.wrapped { "universal" } else { "thin" };
    let verb = if dry_run { "would save" } else { "saved" };

    println!(
        "{} {}: removed {}; kept {} ({shape}); {} -> {}, {verb} {}",
        "✓".green(),
        path.display(),
        join(&report.removed),
        join(&report.kept),
        mib(report.input_len),
        mib(report.output_len),
        mib(report.saved()).green()
    );
}

fn mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / 1024.0 / 1024.0)
}
