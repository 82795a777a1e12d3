//! `plistor` CLI: inspect and edit `.plist` / `.json` files from a shell.
//!
//! ```sh
//! plistor Info.plist show /CFBundleURLTypes
//! plistor config.json set /server/port 8080
//! plistor config.json retype /server/port string
//! plistor Info.plist convert Info.json
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use plistor::{
    Document, DocumentOptions, Format, ScriptValue, ValueKind, codec, parse_path, present, statics,
};
use std::{fs, path::PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plistor", version, about = "Structured editor for property lists and JSON")]
struct Cli {
    /// Document to operate on (.plist or .json)
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the children of the container at PATH
    Show {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print the value at PATH as source text
    Get {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Replace the value at PATH with a JSON literal and save
    Set { path: String, json: String },
    /// Coerce the value at PATH to KIND and save
    Retype { path: String, kind: String },
    /// Write the document to OUT in the format of its extension
    Convert { out: PathBuf },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env(statics::ENV_LOG_FILTER)
        .unwrap_or_else(|_| EnvFilter::new(statics::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = DocumentOptions {
        autosave: false,
        ..DocumentOptions::default()
    };
    let mut doc = Document::open_with(&cli.file, options)
        .with_context(|| format!("Failed to open {}", cli.file.display()))?;

    match cli.command {
        Commands::Show { path } => {
            let view = doc.open_path(&parse_path(&path))?;
            let value = doc.value(view)?;
            if !value.is_container() {
                println!("{}", present::detail(value));
            } else {
                let header = present::root_row(value);
                let rows = std::iter::once(header).chain(doc.rows(view)?);
                for row in rows {
                    println!("{}\t{}\t{}", row.key, present::kind_label(row.kind), row.summary);
                }
            }
        }
        Commands::Get { path } => {
            let view = doc.open_path(&parse_path(&path))?;
            print!("{}", doc.source_text(view)?);
        }
        Commands::Set { path, json } => {
            let literal: serde_json::Value =
                serde_json::from_str(&json).with_context(|| format!("Invalid JSON literal {json:?}"))?;
            let view = doc.open_path(&parse_path(&path))?;
            doc.set_from_script(view, &ScriptValue::from(literal))
                .with_context(|| format!("Failed to set {path}"))?;
            save(&mut doc)?;
        }
        Commands::Retype { path, kind } => {
            let Some(kind) = ValueKind::parse(&kind) else {
                bail!("Unknown kind {kind:?}");
            };
            let view = doc.open_path(&parse_path(&path))?;
            doc.retype(view, kind)
                .with_context(|| format!("Failed to retype {path}"))?;
            save(&mut doc)?;
        }
        Commands::Convert { out } => {
            let format = Format::from_path(&out)?;
            let bytes = codec::encode(doc.root(), format)
                .with_context(|| format!("Failed to encode as {format}"))?;
            fs::write(&out, bytes).with_context(|| format!("Failed to write {}", out.display()))?;
        }
    }

    doc.close();
    Ok(())
}

fn save(doc: &mut Document) -> Result<()> {
    doc.save()?;
    for outcome in doc.flush() {
        outcome
            .result
            .with_context(|| format!("Failed to save {}", doc.path().display()))?;
    }
    Ok(())
}
