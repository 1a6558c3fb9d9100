use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{info, warn};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use d64::disk::directory::FileType;
use d64::disk::{Location, D64};

// Possible exit codes
static _EXIT_SUCCESS: i32 = 0;
static EXIT_FAILURE: i32 = 1;

/// Disk id used when none is given: two zero bytes.
static DEFAULT_DISK_ID: &str = "0000";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Parse command-line arguments
    let app = App::new("D64 Disk Image Utility")
        .version("0.1.0")
        .about("Create, list, and extract 1541 D64 disk images.")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("create")
                .alias("c")
                .about("Create a disk image holding the given files.")
                .arg(
                    Arg::with_name("file")
                        .short("f")
                        .takes_value(true)
                        .required(true)
                        .help("Path of the disk image to create"),
                )
                .arg(
                    Arg::with_name("label")
                        .short("l")
                        .long("label")
                        .takes_value(true)
                        .required(true)
                        .help("Disk name"),
                )
                .arg(
                    Arg::with_name("id")
                        .short("i")
                        .long("id")
                        .takes_value(true)
                        .default_value(DEFAULT_DISK_ID)
                        .validator(disk_id_validator)
                        .help("Disk id: two bytes in hexadecimal"),
                )
                .arg(
                    Arg::with_name("type")
                        .short("t")
                        .long("type")
                        .takes_value(true)
                        .possible_values(&["prg", "seq"])
                        .default_value("prg")
                        .help("CBM file type"),
                )
                .arg(Arg::with_name("inputs").required(true).multiple(true)),
        )
        .subcommand(
            SubCommand::with_name("extract")
                .alias("x")
                .about("Extract every file of a disk image.")
                .arg(Arg::with_name("diskimage").required(true))
                .arg(
                    Arg::with_name("destination")
                        .required(false)
                        .default_value("."),
                ),
        )
        .subcommand(
            SubCommand::with_name("dir")
                .about("Show a directory listing")
                .arg(Arg::with_name("diskimage").required(true))
                .arg(
                    Arg::with_name("verbose")
                        .short("v")
                        .long("verbose")
                        .help("Show where each file starts"),
                ),
        )
        .subcommand(
            SubCommand::with_name("bam")
                .about("Show the Block Availability Map (BAM)")
                .arg(Arg::with_name("diskimage").required(true)),
        )
        .subcommand(
            SubCommand::with_name("validate")
                .about("Validate a disk image.")
                .arg(Arg::with_name("diskimage").required(true)),
        )
        .subcommand(
            SubCommand::with_name("dump")
                .about("Provide a hex dump of a disk image or one of its blocks.")
                .arg(Arg::with_name("diskimage").required(true))
                .arg(Arg::with_name("track").validator(track_validator))
                .arg(
                    Arg::with_name("sector")
                        .requires("track")
                        .validator(sector_validator),
                ),
        );

    let mut app_clone = app.clone();
    let matches = app.get_matches();

    let result = match matches.subcommand() {
        ("create", Some(m)) => cmd_create(m),
        ("extract", Some(m)) => cmd_extract(
            m.value_of("diskimage").unwrap(),
            m.value_of("destination").unwrap(),
        ),
        ("dir", Some(m)) => cmd_dir(m.value_of("diskimage").unwrap(), m.is_present("verbose")),
        ("bam", Some(m)) => cmd_bam(m.value_of("diskimage").unwrap()),
        ("validate", Some(m)) => cmd_validate(m.value_of("diskimage").unwrap()),
        ("dump", Some(m)) => cmd_dump(
            m.value_of("diskimage").unwrap(),
            m.value_of("track").and_then(|t| t.parse().ok()),
            m.value_of("sector").and_then(|s| s.parse().ok()),
        ),
        _ => {
            let _ = app_clone.print_help();
            println!();
            process::exit(EXIT_FAILURE);
        }
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(EXIT_FAILURE);
    }
}

/// Decode a disk id given as four hexadecimal digits.
fn parse_disk_id(v: &str) -> Result<[u8; 2], String> {
    let mut id = [0u8; 2];
    hex::decode_to_slice(v, &mut id)
        .map_err(|e| format!("Expected two bytes in hexadecimal, e.g. 010F ({}).", e))?;
    Ok(id)
}

fn disk_id_validator(v: String) -> Result<(), String> {
    parse_disk_id(&v).map(|_| ())
}

fn u8_validator(v: String, min: u8, max: u8) -> Result<(), String> {
    match v.parse::<u8>() {
        Ok(n) if n >= min && n <= max => Ok(()),
        _ => Err(format!("Expected a value from {}-{}.", min, max)),
    }
}

/// Require a track argument to be a number in the range 1-35.
fn track_validator(v: String) -> Result<(), String> {
    u8_validator(v, 1, 35)
}

/// Require a sector argument to be a number in the range 0-20.
fn sector_validator(v: String) -> Result<(), String> {
    u8_validator(v, 0, 20)
}

/// The CBM name for a host file: its base name, without the extension,
/// upper-cased.
fn cbm_filename(path: &Path) -> io::Result<String> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid filename: {}", path.display()),
            )
        })?;
    Ok(name.to_uppercase())
}

fn cmd_create(m: &ArgMatches) -> io::Result<()> {
    let diskimage = m.value_of("file").unwrap();
    let label = m.value_of("label").unwrap();
    let id = parse_disk_id(m.value_of("id").unwrap_or(DEFAULT_DISK_ID))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let file_type = m
        .value_of("type")
        .and_then(FileType::from_string)
        .unwrap_or(FileType::PRG);
    let inputs = m.values_of("inputs").unwrap().map(Path::new).collect::<Vec<_>>();

    // Check every input before creating anything.
    for path in &inputs {
        fs::metadata(path).map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;
    }

    let mut disk = D64::new(label, &id)?;
    for path in &inputs {
        let name = cbm_filename(path)?;
        let data = fs::read(path)?;
        disk.write_file(&name, file_type, &data)?;
        info!("added {} as {:?}", path.display(), name);
    }
    fs::write(diskimage, disk.as_bytes())?;
    Ok(())
}

/// Make a name read from a disk image safe to use as a single host path
/// component.
fn host_safe_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    if safe.chars().all(|c| c == '.') {
        "_".repeat(safe.len().max(1))
    } else {
        safe
    }
}

/// Write every readable file on the disk into a directory named after the
/// disk, below `destination`.  Returns the host paths written.
fn extract(disk: &D64, destination: &Path) -> io::Result<Vec<PathBuf>> {
    let view = disk.fs()?;
    let directory = destination.join(host_safe_name(view.name()));
    fs::create_dir_all(&directory)?;
    let mut written = vec![];
    for metadata in view.read_dir(view.name())? {
        let path = format!("{}/{}", view.name(), metadata.name);
        let mut reader = view.open(&path)?;
        let mut content = vec![];
        if let Err(e) = io::Read::read_to_end(&mut reader, &mut content) {
            warn!("skipping {}: {}", path, e);
            continue;
        }
        let target = directory.join(host_safe_name(&metadata.name));
        fs::write(&target, &content)?;
        info!("{} -> {}", path, target.display());
        written.push(target);
    }
    Ok(written)
}

fn cmd_extract(diskimage: &str, destination: &str) -> io::Result<()> {
    let disk = D64::open(diskimage)?;
    for path in extract(&disk, Path::new(destination))? {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_dir(diskimage: &str, verbose: bool) -> io::Result<()> {
    let disk = D64::open(diskimage)?;
    println!("{}", disk);
    for item in disk.directory()? {
        let (_, entry) = item?;
        if verbose {
            println!("{:#}", entry);
        } else {
            println!("{}", entry);
        }
    }
    println!("{} blocks free.", disk.bam()?.blocks_free());
    Ok(())
}

fn cmd_bam(diskimage: &str) -> io::Result<()> {
    let disk = D64::open(diskimage)?;
    print!("{:?}", disk.bam()?);
    Ok(())
}

fn cmd_dump(diskimage: &str, track: Option<u8>, sector: Option<u8>) -> io::Result<()> {
    let disk = D64::open(diskimage)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match (track, sector) {
        (Some(track), Some(sector)) => disk.dump_block(&mut out, Location::new(track, sector))?,
        (Some(track), None) => {
            let sectors = d64::disk::geometry::sectors_per_track(track)?;
            for sector in 0..sectors {
                disk.dump_block(&mut out, Location::new(track, sector))?;
            }
        }
        _ => disk.dump(&mut out)?,
    }
    out.flush()?;
    Ok(())
}

fn cmd_validate(diskimage: &str) -> io::Result<()> {
    let disk = D64::open(diskimage)?;
    let errors = disk.validate()?;
    for e in errors.iter() {
        println!("{}", e);
    }
    if errors.is_empty() {
        println!("Disk validates successfully.");
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} errors found during validation.", errors.len()),
        ))
    }
}
