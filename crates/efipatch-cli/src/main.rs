//! efipatch - Patch serial numbers, ME regions, NVRAM and firmware locks in EFI images
//!
//! This tool scans a firmware image for its `Fsys` block and stores, reports
//! the serial, hardware code and model it finds, verifies the `Fsys`
//! checksum and optionally writes a patched copy.

use anyhow::{bail, Context, Result};
use clap::Parser;
use efipatch_core::lookup::ModelLookup;
use efipatch_core::patch::CODE_LEN;
use efipatch_core::{
    apply_patches, verify_checksum, write_image, DataBlock, Error, IdentifierService,
    LookupSource, ModelResolver, PatchKind, PatchRequest, PatchStatus, Scanner,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;

/// Identifier lookup endpoint; answers with XML containing a `configCode` element
const LOOKUP_URL: &str = "http://support-sp.apple.com/sp/product";

/// Remote lookups give up after this long
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Patch serial numbers, ME regions, NVRAM and firmware locks in EFI firmware images
#[derive(Parser, Debug)]
#[command(name = "efipatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Firmware image to read
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the patched image (omit to only inspect the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Serial number to insert (12 characters)
    #[arg(short, long)]
    serial: Option<String>,

    /// ME region file to insert
    #[arg(short, long)]
    me_region: Option<PathBuf>,

    /// Clear NVRAM
    #[arg(short = 'n', long)]
    clear_nvram: bool,

    /// Remove firmware lock
    #[arg(short = 'l', long)]
    remove_lock: bool,

    /// Model database mapping hardware codes to model names
    #[arg(long, env = "EFIPATCH_DATABASE", default_value = "database.json")]
    database: PathBuf,

    /// Never query the remote identifier service
    #[arg(long)]
    offline: bool,

    /// Overwrite the output file if it exists
    #[arg(long)]
    force: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Looks up model names through the support site
struct SupportSiteService {
    agent: ureq::Agent,
}

impl SupportSiteService {
    fn new() -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(LOOKUP_TIMEOUT))
            .build()
            .into();
        Self { agent }
    }
}

impl IdentifierService for SupportSiteService {
    fn identify(&self, code: &str) -> efipatch_core::Result<Option<String>> {
        let url = format!("{}?cc={}&lang=en_US", LOOKUP_URL, code);
        trace!("Querying {}", url);

        let body = self
            .agent
            .get(&url)
            .call()
            .and_then(|mut response| response.body_mut().read_to_string())
            .map_err(|e| Error::lookup(code, e.to_string()))?;

        Ok(extract_config_code(&body))
    }
}

/// Pulls the text of the `configCode` element out of a lookup reply
fn extract_config_code(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => inside = e.name().as_ref() == b"configCode",
            Ok(Event::Text(text)) if inside => {
                return text
                    .unescape()
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
            }
            Ok(Event::End(_)) => inside = false,
            Ok(Event::Eof) => return None,
            Err(e) => {
                debug!("Malformed lookup reply: {}", e);
                return None;
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    process_image(&cli)
}

/// Scan, report, and optionally patch the input image
fn process_image(cli: &Cli) -> Result<()> {
    if !cli.input.is_file() {
        bail!("Input file does not exist: {}", cli.input.display());
    }

    let image = fs::read(&cli.input)
        .with_context(|| format!("Failed to read input file: {}", cli.input.display()))?;
    trace!("Read {} bytes from {}", image.len(), cli.input.display());

    let model = Scanner::new()
        .scan(&image)
        .with_context(|| format!("Failed to scan image: {}", cli.input.display()))?;

    print_fields(&model.data_block);

    let checksum = verify_checksum(&image, &model)?;
    println!(
        "Original Fsys CRC32: {}",
        checksum
            .stored_value()
            .map(|v| format!("{:08X}", v))
            .unwrap_or_else(|_| "invalid".to_string())
    );
    println!("Recalculation of Fsys CRC32: {:08X}", checksum.computed);
    match checksum.mismatch() {
        None => println!("Original Fsys checksum valid"),
        Some(e) => println!("Original Fsys checksum invalid: {}", e),
    }

    let mut resolver = open_resolver(cli)?;
    if let Some(code) = model.data_block.hardware_code() {
        report_identifier(&mut resolver, "Original", &code);
    }

    let Some(output) = cli.output.as_deref() else {
        info!("No output file set, nothing patched");
        return Ok(());
    };

    if output.exists() && !cli.force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output.display()
        );
    }

    let request = build_request(cli);
    if request.is_empty() {
        warn!("No patch options set, output will be a copy of the input");
    }

    let report = apply_patches(&image, &model, &request);
    for outcome in &report.outcomes {
        match &outcome.status {
            PatchStatus::Applied(range) => {
                println!("Patched {} at {:#x}..{:#x}", outcome.kind, range.start, range.end)
            }
            PatchStatus::Skipped(e) => error!("{} not applied: {}", outcome.kind, e),
        }
    }

    let serial_applied = report
        .outcome(PatchKind::Serial)
        .is_some_and(|o| o.is_applied());
    if let (true, Some(serial)) = (serial_applied, request.new_serial.as_deref()) {
        let serial = serial.to_ascii_uppercase();
        println!("Patch serial: {}", serial);
        report_identifier(&mut resolver, "Patch", &serial[serial.len() - CODE_LEN..]);
    }
    if let Some(crc) = report.checksum {
        println!("Patch CRC32: {:08X}", crc);
    }

    write_image(output, &report.image)
        .with_context(|| format!("Failed to write output file: {}", output.display()))?;
    println!(
        "Patching complete: {} of {} operations applied, wrote {}",
        report.applied_count(),
        report.outcomes.len(),
        output.display()
    );

    Ok(())
}

/// Print the fields found in the `Fsys` block
fn print_fields(block: &DataBlock) {
    if let Some(field) = block.serial_upper() {
        println!("Original serial in SSN field: {}", field.as_str());
    }
    if let Some(field) = block.serial_lower() {
        println!("Original serial in ssn field: {}", field.as_str());
    }
    if let Some(field) = block.code_upper() {
        println!("Original HWC code in HWC field: {}", field.as_str());
    }
    if let Some(field) = block.code_lower() {
        println!("Original HWC code in hwc field: {}", field.as_str());
    }
    if let Some(field) = block.model() {
        println!("Original model: {}", field.as_str());
    }
}

/// Open the model database, attaching the remote service unless offline
fn open_resolver(cli: &Cli) -> Result<ModelResolver> {
    let resolver = ModelResolver::open(&cli.database)
        .with_context(|| format!("Failed to load model database: {}", cli.database.display()))?;

    debug!(
        "Loaded {} model entries from {}",
        resolver.database().len(),
        cli.database.display()
    );

    Ok(if cli.offline {
        resolver
    } else {
        resolver.with_service(SupportSiteService::new())
    })
}

/// Resolve a hardware code and print the identifier line
fn report_identifier(resolver: &mut ModelResolver, label: &str, code: &str) {
    match resolver.resolve(code) {
        Ok(ModelLookup { name, source }) => {
            println!("{} identifier: {}", label, name.as_deref().unwrap_or("unknown"));
            match source {
                LookupSource::Database => println!("Identifier info found in database"),
                LookupSource::Remote => println!("Database updated with new model info"),
                LookupSource::NotFound => {
                    warn!("Unable to retrieve identifier for {}, database not updated", code)
                }
            }
        }
        Err(e) => warn!("Identifier lookup for {} failed: {}", code, e),
    }
}

/// Assemble the patch request from the command line
fn build_request(cli: &Cli) -> PatchRequest {
    let mut request = PatchRequest::new()
        .clear_nvram(cli.clear_nvram)
        .remove_lock(cli.remove_lock);

    if let Some(serial) = &cli.serial {
        request = request.serial(serial.clone());
    }
    if let Some(block) = cli.me_region.as_deref().and_then(read_me_region) {
        request = request.insert_block(block);
    }

    request
}

/// Read the ME region file; a missing file only drops the insertion
fn read_me_region(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(block) => {
            debug!("Read {} byte ME region from {}", block.len(), path.display());
            Some(block)
        }
        Err(e) => {
            error!("Failed to read ME region file {}: {}", path.display(), e);
            None
        }
    }
}
