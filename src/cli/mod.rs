use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::crypto::KdfParams;

/// Environment variable consulted for the archive password.
pub const PASSWORD_ENV: &str = "NTK_PASSWORD";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug). `NTK_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Compress a file into a .ntk archive.
    #[command(alias = "c")]
    Compress {
        /// The file to compress.
        input: PathBuf,

        /// The output archive (defaults to <input>.ntk). With --stego-image this is the output image.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Zstandard compression level (1-22). Higher levels offer better compression at the cost of speed.
        #[arg(long, default_value_t = 19, value_parser = clap::value_parser!(i32).range(1..=22))]
        level: i32,

        /// Number of worker threads. [0 = auto-detect based on CPU cores]
        #[arg(long, default_value_t = 0)]
        threads: usize,

        /// Block size, a power of two between 64K and 64M (e.g. 1M, 16M).
        #[arg(long, default_value = "16M", value_parser = parse_size)]
        block_size: u64,

        /// Maximum size of the trained dictionary (0 disables it).
        #[arg(long, default_value = "110K", value_parser = parse_size)]
        dict_size: u64,

        /// Encrypt the archive with a password.
        #[arg(short, long)]
        encrypt: bool,

        /// Password for encryption. If not provided, will try to read from NTK_PASSWORD or prompt interactively.
        #[arg(long)]
        password: Option<String>,

        /// Key-derivation function for encrypted archives.
        #[arg(long, value_enum, default_value_t = KdfChoice::Argon2id)]
        kdf: KdfChoice,

        /// Hide the archive in this carrier image; the output must then be .png, .bmp or .tiff.
        #[arg(long)]
        stego_image: Option<PathBuf>,

        /// Show a progress bar on stderr.
        #[arg(long)]
        progress: bool,

        /// Print the resulting metadata as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Restore the original file from an archive.
    #[command(alias = "x")]
    Decompress {
        /// The archive file to decompress.
        archive: PathBuf,

        /// Where to write the restored file. Defaults to the original name, next to the archive.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The password for decrypting the archive. If not provided, will try to read from NTK_PASSWORD or prompt interactively.
        #[arg(long)]
        password: Option<String>,

        /// Number of worker threads. [0 = auto-detect based on CPU cores]
        #[arg(long, default_value_t = 0)]
        threads: usize,

        /// Show a progress bar on stderr.
        #[arg(long)]
        progress: bool,
    },

    /// Show archive metadata without decompressing.
    #[command(alias = "i")]
    Info {
        archive: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Hide an existing archive inside an image.
    Hide {
        archive: PathBuf,

        /// The carrier image.
        #[arg(long)]
        image: PathBuf,

        /// Output image (.png, .bmp or .tiff).
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Recover an archive hidden in an image.
    Unhide {
        image: PathBuf,

        /// Where to write the recovered archive.
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum KdfChoice {
    /// Argon2id, memory-hard (default).
    Argon2id,
    /// PBKDF2-HMAC-SHA256, 100 000 rounds.
    Pbkdf2,
}

impl KdfChoice {
    pub fn params(self) -> KdfParams {
        match self {
            KdfChoice::Argon2id => KdfParams::argon2id(),
            KdfChoice::Pbkdf2 => KdfParams::pbkdf2(),
        }
    }
}

/// Parse a byte size such as `65536`, `64K`, `16M`, `1MiB` or `1G` (binary units).
pub fn parse_size(s: &str) -> Result<u64, String> {
    let t = s.trim();
    let split = t.find(|c: char| !c.is_ascii_digit()).unwrap_or(t.len());
    let (digits, unit) = t.split_at(split);
    let n: u64 = digits.parse().map_err(|_| format!("invalid size '{}'", s))?;
    let mult: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        other => return Err(format!("unknown size unit '{}'", other)),
    };
    n.checked_mul(mult).ok_or_else(|| format!("size '{}' is too large", s))
}

/// Gets the password from the command-line option or the `NTK_PASSWORD` environment variable.
///
/// Priority:
/// 1. `--password` command-line argument.
/// 2. `NTK_PASSWORD` environment variable.
/// 3. Returns `None` if neither is present, allowing the caller to prompt interactively.
pub fn get_password_from_opt_or_env(password_opt: Option<String>) -> Option<String> {
    if let Some(pass) = password_opt {
        return Some(pass);
    }
    std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty())
}
