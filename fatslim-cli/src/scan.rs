use anyhow::Result;
use colored::Colorize;
use fatslim_core::{probe_file, ArchitectureId, Probe};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// An application bundle and the architectures of its main executable.
#[derive(Debug, Clone)]
pub struct AppInfo {
    pub name: String,
    pub binary_path: PathBuf,
    pub archs: Vec<ArchitectureId>,
    /// Bytes held by slices matching the scan target, when removing them
    /// would still leave at least one slice.
    pub removable: Option<u64>,
}

impl AppInfo {
    fn from_probe(
        name: String,
        binary_path: PathBuf,
        probe: &Probe,
        target: &ArchitectureId,
    ) -> Self {
        let removable = match probe {
            Probe::Universal { slices, .. } => {
                let matching: Vec<_> = slices.iter().filter(|d| target.matches(d)).collect();
                (!matching.is_empty() && matching.len() < slices.len())
                    .then(|| matching.iter().map(|d| d.size).sum())
            }
            _ => None,
        };

        AppInfo {
            name,
            binary_path,
            archs: probe.archs(),
            removable,
        }
    }

    pub fn has_arm64(&self) -> bool {
        self.archs.iter().any(ArchitectureId::is_arm64)
    }
}

/// Finds `*.app` bundles directly under `dir` whose main executable contains
/// an arm64 slice.
pub fn scan_applications(dir: &Path, target: &ArchitectureId) -> Result<Vec<AppInfo>> {
    let entries: Vec<_> = fs::read_dir(dir)?.flatten().collect();
    let total = entries.len();
    let mut apps = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let path = entry.path();
        let is_bundle = entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
            && path.extension().and_then(|e| e.to_str()) == Some("app");
        if !is_bundle {
            continue;
        }

        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        log::info!("[{}/{}] scanning {}", index + 1, total, name);

        let Some(binary_path) = find_main_binary(&path, &name) else {
            log::debug!("{name}: no executable in Contents/MacOS");
            continue;
        };

        match probe_file(&binary_path) {
            Ok(probe) => {
                let app = AppInfo::from_probe(name, binary_path, &probe, target);
                if app.has_arm64() {
                    apps.push(app);
                }
            }
            Err(err) => log::warn!("{}: {err}", binary_path.display()),
        }
    }

    Ok(apps)
}

/// `Contents/MacOS/<name>`, or else the first executable file in `Contents/MacOS`.
fn find_main_binary(app: &Path, name: &str) -> Option<PathBuf> {
    let macos = app.join("Contents").join("MacOS");
    let named = macos.join(name);
    if named.is_file() {
        return Some(named);
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(&macos)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_executable(p))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

#[derive(Tabled, Serialize)]
struct AppRow {
    #[tabled(rename = "Application")]
    name: String,
    #[tabled(rename = "Architectures")]
    archs: String,
    #[tabled(rename = "Removable")]
    removable: String,
    #[tabled(skip)]
    removable_bytes: Option<u64>,
    #[tabled(rename = "Binary")]
    binary: String,
}

pub fn print(apps: &[AppInfo], target: &ArchitectureId, json: bool) -> Result<()> {
    let rows: Vec<AppRow> = apps
        .iter()
        .map(|app| AppRow {
            name: app.name.clone(),
            archs: app
                .archs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            removable: app
                .removable
                .map(|b| format!("{:.1} MiB", b as f64 / 1024.0 / 1024.0))
                .unwrap_or_else(|| "-".to_string()),
            removable_bytes: app.removable,
            binary: app.binary_path.display().to_string(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No applications with a removable {target} slice.");
        return Ok(());
    }

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    println!("{table}");

    let total: u64 = apps.iter().filter_map(|a| a.removable).sum();
    let count = apps.iter().filter(|a| a.removable.is_some()).count();
    println!(
        "{} {count} applications carry {target}; removing it would free {}",
        "→".cyan(),
        format!("{:.1} MiB", total as f64 / 1024.0 / 1024.0).green().bold()
    );
    Ok(())
}
