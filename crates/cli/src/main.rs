//! Command-line front end for ingredient label analysis.
//!
//! Usage:
//!     labelscan analyze "Sugar, Salt, Palm Oil (RSPO)"
//!     labelscan scan-label --file label.txt --barcode 4006381333931
//!     labelscan scan-barcode 4006381333931
//!     labelscan product 4006381333931 --history
//!     labelscan seed --csv data/products_seed.csv
//!
//! Label text stands in for OCR output: pass it as an argument, with
//! `--file`, or on stdin.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use labelscan_analyze::analyze;
use labelscan_explain::{explain_assessment, summarize};
use labelscan_model::{AnalysisPayload, RiskAssessment};
use labelscan_store::{
    AnalysisRecord, AnalysisStore, JsonFileStore, ProductStatus, ProductUpsert, ScanType,
    StoreConfig,
};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(name = "labelscan")]
#[command(about = "Analyze food ingredient labels for health-risk cues")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store file
    #[arg(long, env = "LABELSCAN_STORE", default_value = "labelscan.json", global = true)]
    store: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze label text without saving anything
    Analyze {
        #[command(flatten)]
        input: TextInput,

        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Analyze label text and save it against a product
    ScanLabel {
        #[command(flatten)]
        input: TextInput,

        /// Product barcode; without it the analysis is shown but not saved
        #[arg(short, long)]
        barcode: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        brand: Option<String>,

        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Look up a product by barcode, creating it as pending if unknown
    ScanBarcode {
        barcode: String,

        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show a product and its latest analysis
    Product {
        barcode: String,

        /// Show every stored analysis, oldest first
        #[arg(long)]
        history: bool,

        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Import known products from a CSV file with barcode, name and brand columns
    Seed {
        #[arg(long)]
        csv: PathBuf,
    },
}

#[derive(Args)]
struct TextInput {
    /// Label text (reads stdin when neither this nor --file is given)
    text: Option<String>,

    /// Read label text from a file
    #[arg(long, conflicts_with = "text")]
    file: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("labelscan=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { input, format } => {
            let raw_text = read_text(&input).await?;
            print_payload(&analyze(&raw_text), format)?;
        }
        Commands::ScanLabel {
            input,
            barcode,
            name,
            brand,
            format,
        } => {
            let store = open_store(cli.store).await?;
            let raw_text = read_text(&input).await?;
            let scan = scan_label(&store, &raw_text, barcode, name, brand).await?;
            print_scan_result(&scan, format)?;
        }
        Commands::ScanBarcode { barcode, format } => {
            let store = open_store(cli.store).await?;
            let result = scan_barcode(&store, &barcode).await?;
            print_barcode_result(&result, format)?;
        }
        Commands::Product {
            barcode,
            history,
            format,
        } => {
            let store = open_store(cli.store).await?;
            run_product(&store, &barcode, history, format).await?;
        }
        Commands::Seed { csv } => {
            let store = open_store(cli.store).await?;
            match seed_products(&store, &csv).await? {
                Some(count) => println!("Seed complete: {} products.", count),
                None => println!("Seed file not found at {}. Skipping seed.", csv.display()),
            }
        }
    }

    Ok(())
}

async fn open_store(path: PathBuf) -> Result<JsonFileStore> {
    let store = JsonFileStore::open(StoreConfig { path })
        .await
        .context("Failed to open store")?;
    tracing::debug!(store = store.name(), path = %store.path().display(), "Store ready");
    Ok(store)
}

async fn read_text(input: &TextInput) -> Result<String> {
    if let Some(text) = &input.text {
        return Ok(text.clone());
    }
    if let Some(path) = &input.file {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("Failed to read label text from stdin")?;
    Ok(text)
}

/// Result of analyzing one label.
#[derive(Debug)]
struct LabelScan {
    /// Set when the analysis was saved against a product
    barcode: Option<String>,
    payload: AnalysisPayload,
    message: &'static str,
}

/// Analyze label text and, when a barcode is given, save it against that product.
///
/// A new product is created as a pending user scan. An existing product
/// only takes the supplied name and brand.
async fn scan_label<S: AnalysisStore>(
    store: &S,
    raw_text: &str,
    barcode: Option<String>,
    name: Option<String>,
    brand: Option<String>,
) -> Result<LabelScan> {
    let raw_text = raw_text.trim();
    if raw_text.is_empty() {
        bail!("No text detected. Provide a clearer ingredient list.");
    }

    let payload = analyze(raw_text);
    let barcode = barcode
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty());

    let Some(barcode) = barcode else {
        let message = "Analysis succeeded, but barcode missing. Provide a barcode to save it.";
        store
            .log_scan(
                None,
                ScanType::Label,
                json!({ "barcode": null, "message": message, "result": &payload }),
            )
            .await?;
        tracing::info!("Label analyzed without barcode; not saved");
        return Ok(LabelScan {
            barcode: None,
            payload,
            message,
        });
    };

    let mut upsert = ProductUpsert::new(&barcode).with_name(name).with_brand(brand);
    if store.product_by_barcode(&barcode).await?.is_none() {
        upsert = upsert
            .with_source("user_scan")
            .with_status(ProductStatus::Pending);
    }
    let product = store.upsert_product(upsert).await?;
    let record = store.save_analysis(product.id, &payload).await?;

    store
        .log_scan(
            Some(&barcode),
            ScanType::Label,
            json!({
                "barcode": &barcode,
                "product_id": product.id,
                "analysis_id": record.id,
                "result": &payload,
            }),
        )
        .await?;

    tracing::info!(
        barcode = %barcode,
        product_id = product.id,
        analysis_id = record.id,
        score = %payload.analysis.score_label,
        "Saved label analysis"
    );

    Ok(LabelScan {
        barcode: Some(barcode),
        payload,
        message: "Saved analysis to store (pending product if newly created).",
    })
}

/// Look up a barcode, creating a pending product when it is unknown.
///
/// Returns the logged scan result.
async fn scan_barcode<S: AnalysisStore>(store: &S, barcode: &str) -> Result<serde_json::Value> {
    let barcode = barcode.trim();
    if barcode.is_empty() {
        bail!("barcode is required");
    }

    let result = match store.product_by_barcode(barcode).await? {
        None => {
            let product = store
                .upsert_product(
                    ProductUpsert::new(barcode)
                        .with_source("user_scan")
                        .with_status(ProductStatus::Pending),
                )
                .await?;
            tracing::info!(barcode, product_id = product.id, "Created pending product");
            json!({
                "barcode": barcode,
                "found": false,
                "product": product,
                "message": "Product not found. Created as pending. Scan the ingredient label to analyze it.",
            })
        }
        Some(product) => match store.latest_analysis(product.id).await? {
            Some(record) => {
                let payload = record.payload()?;
                json!({
                    "barcode": barcode,
                    "found": true,
                    "product": product,
                    "ingredients": payload.normalized_ingredients,
                    "analysis": payload.analysis,
                })
            }
            None => json!({
                "barcode": barcode,
                "found": true,
                "product": product,
                "message": "Product found but no ingredient analysis yet. Scan the ingredient label to analyze it.",
            }),
        },
    };

    store
        .log_scan(Some(barcode), ScanType::Barcode, result.clone())
        .await?;

    Ok(result)
}

/// One row of a product seed file. Missing columns read as empty.
#[derive(Debug, Deserialize)]
struct SeedRow {
    #[serde(default)]
    barcode: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    brand: String,
}

/// Upsert every row with a barcode as an active `seed` product.
///
/// Returns `None` when the file does not exist.
async fn seed_products<S: AnalysisStore>(store: &S, path: &Path) -> Result<Option<usize>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Seed file not found");
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());

    let mut seeded = 0;
    for (line, row) in reader.deserialize::<SeedRow>().enumerate() {
        let row = row.with_context(|| format!("Invalid seed row {}", line + 1))?;
        let barcode = row.barcode.trim();
        if barcode.is_empty() {
            continue;
        }

        store
            .upsert_product(
                ProductUpsert::new(barcode)
                    .with_name(non_empty(&row.name))
                    .with_brand(non_empty(&row.brand))
                    .with_source("seed")
                    .with_status(ProductStatus::Active),
            )
            .await?;
        seeded += 1;
    }

    tracing::info!(path = %path.display(), products = seeded, "Seeded products");
    Ok(Some(seeded))
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

async fn run_product<S: AnalysisStore>(
    store: &S,
    barcode: &str,
    history: bool,
    format: Format,
) -> Result<()> {
    let Some(product) = store.product_by_barcode(barcode.trim()).await? else {
        bail!("Product {} not found", barcode);
    };

    let records: Vec<AnalysisRecord> = if history {
        store.history(product.id).await?
    } else {
        store.latest_analysis(product.id).await?.into_iter().collect()
    };

    match format {
        Format::Json => {
            let analyses = records
                .iter()
                .map(|r| -> Result<serde_json::Value> {
                    Ok(json!({
                        "id": r.id,
                        "created_at": r.created_at,
                        "payload": r.payload()?,
                    }))
                })
                .collect::<Result<Vec<_>>>()?;
            let out = json!({ "product": product, "analyses": analyses });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Format::Text => {
            println!(
                "{} (id {}, {:?}, source: {})",
                product.barcode, product.id, product.status, product.source
            );
            if let Some(name) = &product.name {
                println!("   Name: {}", name);
            }
            if let Some(brand) = &product.brand {
                println!("   Brand: {}", brand);
            }
            if records.is_empty() {
                println!("No ingredient analysis yet.");
            }
            for record in &records {
                let payload = record.payload()?;
                println!(
                    "\n#{} at {}: {}",
                    record.id,
                    record.created_at.to_rfc3339(),
                    summarize(&payload.analysis)
                );
                println!("   Ingredients: {}", payload.normalized_ingredients.join(", "));
            }
        }
    }

    Ok(())
}

fn print_scan_result(scan: &LabelScan, format: Format) -> Result<()> {
    match format {
        Format::Json => {
            let out = json!({
                "barcode": &scan.barcode,
                "ocr_text": &scan.payload.raw_text,
                "result": &scan.payload,
                "message": scan.message,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Format::Text => {
            print_payload(&scan.payload, Format::Text)?;
            println!("\n{}", scan.message);
        }
    }
    Ok(())
}

fn print_barcode_result(result: &serde_json::Value, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(result)?),
        Format::Text => {
            if let Some(barcode) = result.get("barcode").and_then(|b| b.as_str()) {
                println!("Barcode: {}", barcode);
            }
            if let Some(message) = result.get("message").and_then(|m| m.as_str()) {
                println!("{}", message);
            }
            if let Some(analysis) = result.get("analysis") {
                let assessment: RiskAssessment = serde_json::from_value(analysis.clone())?;
                println!("{}", summarize(&assessment));
            }
        }
    }
    Ok(())
}

fn print_payload(payload: &AnalysisPayload, format: Format) -> Result<()> {
    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(payload)?);
        return Ok(());
    }

    let ingredients = &payload.normalized_ingredients;
    let analysis = &payload.analysis;

    if ingredients.is_empty() {
        println!("No ingredients recognized.");
    } else {
        println!("Ingredients ({}):", ingredients.len());
        for (i, ingredient) in ingredients.iter().enumerate() {
            println!("  {}. {}", i + 1, ingredient);
        }
    }

    println!("\n{}", summarize(analysis));

    for explanation in explain_assessment(ingredients.as_slice(), analysis) {
        println!("\n - {}", explanation.summary);
        for item in &explanation.evidence {
            println!("     {} <- {}", item.trigger, item.ingredients.join(", "));
        }
    }

    println!("\n{}", analysis.disclaimer);
    Ok(())
}
