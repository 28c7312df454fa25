//! Keyward - Split an operational key among custodians and seal backups with it

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

use keyward_core::{decode_unencrypted, SecretConfig, TAG_CUSTODIAN, TAG_SSHARING};
use keyward_custody::{BackupSession, BackupSettings, CustodianRegistry};

/// Keyward - Threshold custody for operational keys
#[derive(Parser)]
#[command(name = "keyward")]
#[command(about = "Split an operational key among custodians and seal backups with it")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a key among custodians and write an encrypted backup
    Create {
        /// Settings file (defaults to the user config directory)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Output path for the backup
        #[arg(long)]
        out: PathBuf,

        /// Directory for custodian share artifacts
        #[arg(long)]
        artifacts: PathBuf,

        /// Custodian and share count, assigned in order (NAME=COUNT)
        #[arg(long = "custodian", required = true)]
        custodians: Vec<String>,

        /// Section to include (TAG=FILE, append :clear to store unencrypted)
        #[arg(long = "section")]
        sections: Vec<String>,

        /// Also store the full share set as an encrypted section
        #[arg(long)]
        include_shares: bool,

        /// Operational key as hex (generated if omitted)
        #[arg(long)]
        key: Option<String>,

        /// Print the operational key as hex
        #[arg(long)]
        print_key: bool,
    },

    /// Show the clear contents of a backup
    Inspect {
        /// Backup file
        #[arg(long)]
        backup: PathBuf,
    },

    /// Recover the key from custodian artifacts and unseal a backup
    Restore {
        /// Backup file
        #[arg(long)]
        backup: PathBuf,

        /// Custodian artifact files, in any order
        #[arg(long = "artifact", required = true)]
        artifacts: Vec<PathBuf>,

        /// Directory the decrypted sections are written to
        #[arg(long)]
        out_dir: PathBuf,

        /// Print the recovered operational key as hex
        #[arg(long)]
        print_key: bool,
    },

    /// Write a settings file with default values
    Settings {
        /// Destination (defaults to the user config directory)
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyward=info,keyward_core=info,keyward_custody=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Create {
            settings,
            out,
            artifacts,
            custodians,
            sections,
            include_shares,
            key,
            print_key,
        } => create(CreateArgs {
            settings,
            out,
            artifacts,
            custodians,
            sections,
            include_shares,
            key,
            print_key,
        }),
        Commands::Inspect { backup } => inspect(&backup),
        Commands::Restore {
            backup,
            artifacts,
            out_dir,
            print_key,
        } => restore(&backup, &artifacts, &out_dir, print_key),
        Commands::Settings { write } => write_settings(write),
    }
}

struct CreateArgs {
    settings: Option<PathBuf>,
    out: PathBuf,
    artifacts: PathBuf,
    custodians: Vec<String>,
    sections: Vec<String>,
    include_shares: bool,
    key: Option<String>,
    print_key: bool,
}

/// Parse `NAME=COUNT`
fn parse_custodian(arg: &str) -> Result<(String, usize)> {
    let (name, count) = arg
        .rsplit_once('=')
        .with_context(|| format!("custodian '{}' is not NAME=COUNT", arg))?;
    let count = count
        .trim()
        .parse()
        .with_context(|| format!("invalid share count in '{}'", arg))?;
    Ok((name.to_string(), count))
}

/// Parse `TAG=FILE[:clear]`, returning (tag, file, encrypted)
fn parse_section(arg: &str) -> Result<(String, PathBuf, bool)> {
    let (tag, file) = arg
        .split_once('=')
        .with_context(|| format!("section '{}' is not TAG=FILE", arg))?;
    let (file, encrypted) = match file.strip_suffix(":clear") {
        Some(file) => (file, false),
        None => (file, true),
    };
    if file.is_empty() {
        bail!("section '{}' names no file", arg);
    }
    Ok((tag.to_string(), PathBuf::from(file), encrypted))
}

fn create(args: CreateArgs) -> Result<()> {
    let settings = BackupSettings::load_or_default(args.settings.as_deref())?;

    let custodians = args
        .custodians
        .iter()
        .map(|c| parse_custodian(c))
        .collect::<Result<Vec<_>>>()?;
    let sections = args
        .sections
        .iter()
        .map(|s| parse_section(s))
        .collect::<Result<Vec<_>>>()?;

    std::fs::create_dir_all(&args.artifacts)
        .with_context(|| format!("creating {}", args.artifacts.display()))?;

    let mut session = BackupSession::new();
    session.initialize(settings.secret)?;

    if let Some(hex_key) = &args.key {
        let bytes = Zeroizing::new(hex::decode(hex_key.trim()).context("key is not valid hex")?);
        session.set_operational_key(&bytes)?;
    } else {
        session.generate_operational_key()?;
    }

    for (tag, file, encrypted) in sections {
        let payload =
            std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
        session.register_section(&tag, encrypted, payload)?;
    }

    session.generate_shares(None)?;
    if args.include_shares {
        session.register_share_set_section()?;
    }

    let mut offset = 0;
    for (name, count) in custodians {
        let custodian = session.add_custodian(&name, &args.artifacts, offset, count)?;
        println!(
            "  {} holds shares {}..{} -> {}",
            custodian.name,
            custodian.share_offset + 1,
            custodian.share_offset + custodian.share_count,
            custodian.artifact_path.display()
        );
        offset += count;
    }

    session.create_backup(&args.out, &settings.algorithms, None)?;

    let config = session.config();
    println!(
        "Backup written to {} ({} of {} shares needed, {} custodians)",
        args.out.display(),
        config.min_shares,
        config.max_shares,
        session.custodians().len()
    );
    if args.print_key {
        if let Some(key) = session.operational_key() {
            println!("Operational key: {}", hex::encode(key.as_bytes()));
        }
    }
    Ok(())
}

fn inspect(backup: &Path) -> Result<()> {
    let decoded = decode_unencrypted(backup)?;
    let algorithms = decoded.header.algorithms;

    println!("Backup: {}", backup.display());
    println!("  Version:  {}", decoded.header.version);
    println!(
        "  KDF:      {:?} / {:?} (cost {})",
        algorithms.kdf, algorithms.hash, algorithms.kdf_params.cost
    );
    println!("  Cipher:   {:?}", algorithms.cipher);
    println!("  Sections: {}", decoded.header.section_count);

    if let Some(section) = decoded.section(TAG_SSHARING) {
        let config: SecretConfig = serde_json::from_slice(&section.payload)?;
        println!(
            "  Sharing:  {} of {} over {} ({}-byte key)",
            config.min_shares, config.max_shares, config.element_type, config.key_len
        );
    }

    if let Some(section) = decoded.section(TAG_CUSTODIAN) {
        let registry = CustodianRegistry::from_json(&section.payload)?;
        println!("  Custodians:");
        for custodian in registry.list() {
            println!(
                "    {:<20} shares {}..{}",
                custodian.name,
                custodian.share_offset + 1,
                custodian.share_offset + custodian.share_count
            );
        }
    }

    println!("  Clear sections:");
    for section in &decoded.sections {
        println!("    {:<20} {} bytes", section.tag, section.payload.len());
    }
    if !decoded.sealed_tags.is_empty() {
        println!("  Encrypted sections:");
        for tag in &decoded.sealed_tags {
            println!("    {}", tag);
        }
    }
    Ok(())
}

/// File name stem for a restored section
fn section_stem(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// One distinct file name per section tag, in order
///
/// Tags that sanitize alike get a numeric suffix.
fn section_file_names<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut used = HashSet::new();
    tags.into_iter()
        .map(|tag| {
            let stem = section_stem(tag);
            let mut name = format!("{}.bin", stem);
            let mut n = 2;
            while !used.insert(name.clone()) {
                name = format!("{}-{}.bin", stem, n);
                n += 1;
            }
            name
        })
        .collect()
}

fn restore(backup: &Path, artifacts: &[PathBuf], out_dir: &Path, print_key: bool) -> Result<()> {
    let mut session = BackupSession::new();
    session.initialize(SecretConfig::default())?;
    session.decode_unencrypted(backup)?;

    for path in artifacts {
        match session.scan_share(path) {
            Ok(outcome) => println!(
                "  {}: +{} shares ({} of {})",
                outcome.custodian, outcome.added, outcome.total, outcome.needed
            ),
            // A bad artifact does not end the restore
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    if !session.can_reconstruct() {
        bail!(
            "only {} of {} shares collected",
            session.share_count(),
            session.config().min_shares
        );
    }
    session.reconstruct()?;

    let sections = session.decode_encrypted(backup, None)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let names = section_file_names(sections.iter().map(|s| s.tag.as_str()));
    for (section, name) in sections.iter().zip(names) {
        let path = out_dir.join(name);
        keyward_core::storage::write_atomic(&path, &section.payload)?;
        info!(tag = %section.tag, path = %path.display(), "Section restored");
    }

    println!(
        "Restored {} sections to {}",
        sections.len(),
        out_dir.display()
    );
    if print_key {
        if let Some(key) = session.operational_key() {
            println!("Operational key: {}", hex::encode(key.as_bytes()));
        }
    }
    Ok(())
}

fn write_settings(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(BackupSettings::default_path);
    BackupSettings::default().save(&path)?;
    println!("Settings written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_custodian() {
        assert_eq!(parse_custodian("alice=2").unwrap(), ("alice".to_string(), 2));
        assert_eq!(parse_custodian("a=b=3").unwrap(), ("a=b".to_string(), 3));
        assert!(parse_custodian("alice").is_err());
        assert!(parse_custodian("alice=two").is_err());
    }

    #[test]
    fn test_parse_section() {
        let (tag, file, encrypted) = parse_section("PKEYS=keys.bin").unwrap();
        assert_eq!(tag, "PKEYS");
        assert_eq!(file, PathBuf::from("keys.bin"));
        assert!(encrypted);

        let (_, file, encrypted) = parse_section("NOTES=notes.txt:clear").unwrap();
        assert_eq!(file, PathBuf::from("notes.txt"));
        assert!(!encrypted);

        assert!(parse_section("PKEYS").is_err());
        assert!(parse_section("PKEYS=:clear").is_err());
    }

    #[test]
    fn test_section_file_names() {
        assert_eq!(
            section_file_names(["WALLET_CONFIG", "a/b"]),
            vec!["WALLET_CONFIG.bin", "a_b.bin"]
        );
    }

    #[test]
    fn test_section_file_names_never_collide() {
        let names = section_file_names(["a/b", "a_b", "a b", "a_b-2"]);
        assert_eq!(names, vec!["a_b.bin", "a_b-2.bin", "a_b-3.bin", "a_b-2-2.bin"]);
    }
}
