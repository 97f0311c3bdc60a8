//! Executes parsed CLI commands against the library.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::cli::{self, Commands};
use crate::common::FileMetadata;
use crate::compress::{self, CompressionOptions};
use crate::extract;
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::stegano;
use crate::{ArchiverError, Result};

pub fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Compress {
            input,
            output,
            level,
            threads,
            block_size,
            dict_size,
            encrypt,
            password,
            kdf,
            stego_image,
            progress,
            json,
        } => {
            let output = match (output, &stego_image) {
                (Some(o), _) => o,
                (None, None) => default_archive_path(&input),
                (None, Some(_)) => {
                    return Err(ArchiverError::Validation("--output is required with --stego-image".into()))
                }
            };
            let block_size = u32::try_from(block_size)
                .map_err(|_| ArchiverError::Validation(format!("block size {} is too large", block_size)))?;
            // Without --encrypt an explicit --password is passed on for validation to reject.
            let password = if encrypt { Some(require_password(password, true)?) } else { password };
            let options = CompressionOptions {
                level,
                threads: if threads == 0 { num_cpus::get() } else { threads },
                block_size,
                dictionary_size: dict_size as usize,
                use_encryption: encrypt,
                password,
                kdf: kdf.params(),
                use_steganography: stego_image.is_some(),
                steganography_image: stego_image,
            };
            let bar = progress.then(|| create_cli_progress_callback("compress"));
            let metadata = compress::compress(&input, &output, &options, bar.as_ref().map(as_callback))?;
            print_metadata(&metadata, json)?;
        }
        Commands::Decompress { archive, output, password, threads, progress } => {
            let output = match output {
                Some(o) => o,
                None => extract::default_output_path(&archive)?,
            };
            let encrypted = extract::inspect_metadata(&archive)?.encrypted;
            let password = if encrypted { Some(require_password(password, false)?) } else { None };
            let threads = if threads == 0 { num_cpus::get() } else { threads };
            let bar = progress.then(|| create_cli_progress_callback("decompress"));
            extract::decompress_with_threads(
                &archive,
                &output,
                password.as_deref(),
                bar.as_ref().map(as_callback),
                threads,
            )?;
            eprintln!("Restored {}", output.display());
        }
        Commands::Info { archive, json } => {
            let metadata = extract::inspect_metadata(&archive)?;
            print_metadata(&metadata, json)?;
        }
        Commands::Hide { archive, image, output } => {
            stegano::hide_in_image(&archive, &image, &output)?;
            eprintln!("Archive hidden in {}", output.display());
        }
        Commands::Unhide { image, output } => {
            stegano::extract_from_image(&image, &output)?;
            eprintln!("Archive recovered to {}", output.display());
        }
    }
    Ok(())
}

fn as_callback<F: Fn(ProgressEvent) + Send + Sync>(f: &F) -> &ProgressCallback<'_> {
    f
}

fn default_archive_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".ntk");
    PathBuf::from(name)
}

/// Password from `--password`, then `NTK_PASSWORD`, then an interactive prompt.
fn require_password(opt: Option<String>, confirm: bool) -> Result<String> {
    if let Some(p) = cli::get_password_from_opt_or_env(opt) {
        if p.is_empty() {
            return Err(ArchiverError::PasswordRequired);
        }
        return Ok(p);
    }
    let prompt_err = |e: io::Error| ArchiverError::io(e, "/dev/tty");
    let pass = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
    if pass.is_empty() {
        return Err(ArchiverError::PasswordRequired);
    }
    if confirm {
        let again = rpassword::prompt_password("Confirm password: ").map_err(prompt_err)?;
        if again != pass {
            return Err(ArchiverError::Validation("passwords do not match".into()));
        }
    }
    Ok(pass)
}

fn print_metadata(m: &FileMetadata, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let text = serde_json::to_string_pretty(m)
            .map_err(|e| ArchiverError::Io { source: e.into(), path: PathBuf::from("<stdout>") })?;
        writeln!(out, "{}", text)?;
        return Ok(());
    }
    writeln!(out, "Name:        {}", m.original_name)?;
    writeln!(out, "Original:    {} bytes", m.original_size)?;
    writeln!(out, "Compressed:  {} bytes", m.compressed_size)?;
    writeln!(out, "Ratio:       {:.3}", m.compression_ratio)?;
    writeln!(out, "Encrypted:   {}", if m.encrypted { "yes" } else { "no" })?;
    writeln!(out, "Blocks:      {} x {} bytes", m.block_count, m.block_size)?;
    writeln!(out, "Created:     {}", m.creation_time.to_rfc3339())?;
    writeln!(out, "Checksum:    {}", m.checksum)?;
    writeln!(out, "Format:      v{}", m.format_version)?;
    if m.elapsed > 0.0 {
        writeln!(out, "Elapsed:     {:.2}s", m.elapsed)?;
    }
    Ok(())
}

// --- utils for CLI progress -------------------------------------------------

fn create_cli_progress_callback(operation: &str) -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    let operation = operation.to_uppercase();
    let last_update = Mutex::new(None::<Instant>);
    let prev_len = Mutex::new(0usize);
    let done = AtomicBool::new(false);

    move |event: ProgressEvent| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let finished = event.percent >= 100.0;
        // Update every 100ms to avoid terminal spam, but always show 100% completion
        let should_update = finished || {
            let mut last = last_update.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            match *last {
                Some(t) if now.duration_since(t).as_millis() < 100 => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };
        if !should_update {
            return;
        }

        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
        let eta = if finished { "0s".to_string() } else { format_duration(event.eta.as_secs_f64()) };
        let mbps = event.throughput / (1024.0 * 1024.0);

        let build = |bw: usize| {
            let filled = ((event.percent / 100.0) * bw as f64) as usize;
            let empty = bw.saturating_sub(filled);
            format!(
                "[{}] [{}{}] {:.1}% | {}/{} | {:.1} MB/s | ETA: {}",
                operation,
                "█".repeat(filled),
                "░".repeat(empty),
                event.percent,
                human_bytes(event.processed_bytes),
                human_bytes(event.total_bytes),
                mbps,
                eta
            )
        };

        let mut bar_width = 40;
        let mut line = build(bar_width);
        while line.chars().count() > term_width && bar_width > 10 {
            bar_width -= 4;
            line = build(bar_width);
        }

        {
            let mut prev = prev_len.lock().unwrap_or_else(|e| e.into_inner());
            let len = line.chars().count();
            if *prev > len {
                line.push_str(&" ".repeat(*prev - len));
            }
            *prev = len;
        }
        // Print to stderr to avoid interfering with stdout
        eprint!("\r\x1B[2K{}", line);
        io::stderr().flush().ok();

        if finished {
            eprintln!();
            done.store(true, Ordering::Relaxed);
        }
    }
}

fn format_duration(secs: f64) -> String {
    if !secs.is_finite() || secs <= 0.0 {
        "--".to_string()
    } else if secs > 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}

fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.1} {}", v, UNITS[unit])
    }
}
