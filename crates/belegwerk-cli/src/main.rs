// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Belegwerk: receipt capture normalization and resilient saving.
//
// Entry point. Initialises logging, opens the backend services and runs one
// command.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use belegwerk_core::ANONYMOUS_OWNER;
use belegwerk_core::error::Result;
use belegwerk_core::human_errors::humanize_error;
use belegwerk_document::Point;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use services::app_services::{AppServices, SaveInput};
use services::data_dir;

/// Four corner points given on the command line.
#[derive(Debug, Clone, PartialEq)]
struct CornerList(Vec<Point>);

/// Parse `x,y x,y x,y x,y` (any mix of commas, semicolons and spaces).
fn parse_corners(raw: &str) -> std::result::Result<CornerList, String> {
    let numbers = raw
        .split([',', ';', ' '])
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|e| format!("{s:?}: {e}")))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if numbers.len() != 8 {
        return Err(format!("expected 8 numbers (four x,y pairs), got {}", numbers.len()));
    }
    Ok(CornerList(
        numbers.chunks_exact(2).map(|pair| Point::new(pair[0], pair[1])).collect(),
    ))
}

#[derive(Debug, Parser)]
#[command(name = "belegwerk", author, version, about = "Receipt capture normalization and resilient saving")]
struct Cli {
    /// Data directory holding stored objects and the metadata database.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file. Defaults to `config.json` in the data directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Flatten and enhance a receipt photo into a JPEG.
    Enhance {
        image: PathBuf,
        /// Receipt corners in image pixels or unit coordinates, any order.
        #[arg(long, value_parser = parse_corners)]
        corners: Option<CornerList>,
        /// Output JPEG. Defaults to the data directory's `output/` folder.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Enhance a receipt photo, derive its fields and save both.
    Save {
        image: PathBuf,
        #[arg(long, value_parser = parse_corners)]
        corners: Option<CornerList>,
        /// Recognized text of the receipt.
        #[arg(long)]
        ocr_text: Option<PathBuf>,
        /// Recorded structured-extraction response to use instead of the
        /// heuristic parser.
        #[arg(long)]
        extraction: Option<PathBuf>,
        #[arg(long, default_value = ANONYMOUS_OWNER)]
        owner: String,
    },
    /// Print the saved records of an owner as JSON.
    Records {
        #[arg(long, default_value = ANONYMOUS_OWNER)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match try_main(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let human = humanize_error(&err);
            eprintln!("error: {}\n  {}", human.message, human.suggestion);
            debug!("underlying error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: Cli) -> Result<()> {
    let dir = cli.data_dir.unwrap_or_else(data_dir::default_data_dir);
    let services = AppServices::init(&dir, cli.config.as_deref())?;

    match cli.command {
        Command::Enhance {
            image,
            corners,
            output,
        } => {
            let capture = services.enhance(&image, corners.map(|c| c.0))?;
            let output = output.unwrap_or_else(|| default_output(&services, &image));
            std::fs::write(&output, &capture.jpeg)?;
            info!(warped = capture.warped, "enhanced image written");
            println!(
                "{} ({}x{})",
                output.display(),
                capture.enhanced.width(),
                capture.enhanced.height()
            );
        }
        Command::Save {
            image,
            corners,
            ocr_text,
            extraction,
            owner,
        } => {
            let ocr_text = ocr_text.map(std::fs::read_to_string).transpose()?;
            let input = SaveInput {
                owner_id: owner,
                ocr_text,
                extraction,
            };
            let outcome = services.save(&image, corners.map(|c| c.0), &input).await?;
            debug!(stages = ?outcome.report.stages, backoff = ?outcome.report.backoff, "save report");
            let record = outcome.into_result()?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Records { owner } => {
            let records = services.records(&owner)?;
            let json: serde_json::Map<String, serde_json::Value> = records
                .into_iter()
                .map(|(id, doc)| (id, serde_json::Value::Object(doc)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}

fn default_output(services: &AppServices, image: &std::path::Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "receipt".into());
    services.data_dir().join("output").join(format!("{stem}-enhanced.jpg"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::ffi::OsString;

    #[test]
    fn corners_accept_mixed_separators() {
        let corners = parse_corners("10,20; 110,20 110,220;10,220").unwrap();
        assert_eq!(corners.0.len(), 4);
        assert_eq!(corners.0[2], Point::new(110.0, 220.0));
    }

    #[test]
    fn corners_need_eight_numbers() {
        assert!(parse_corners("1,2,3,4").is_err());
        assert!(parse_corners("a,b,c,d,e,f,g,h").is_err());
    }

    #[test]
    fn save_command_parses() {
        let cli = Cli::try_parse_from([
            "belegwerk",
            "--data-dir",
            "/tmp/b",
            "save",
            "r.jpg",
            "--ocr-text",
            "r.txt",
            "--owner",
            "u1",
        ])
        .unwrap();
        match cli.command {
            Command::Save { owner, corners, .. } => {
                assert_eq!(owner, "u1");
                assert_eq!(corners, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_then_list_records() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("receipt.png");
        RgbaImage::from_pixel(120, 200, Rgba([180, 180, 180, 255]))
            .save(&image_path)
            .unwrap();
        let text_path = dir.path().join("receipt.txt");
        std::fs::write(&text_path, "CORNER SHOP\nMilk 1.20\nTOTAL 1.20\n").unwrap();

        let data = dir.path().join("data");
        let cli = Cli::try_parse_from([
            OsString::from("belegwerk"),
            OsString::from("--data-dir"),
            data.clone().into_os_string(),
            OsString::from("save"),
            image_path.into_os_string(),
            OsString::from("--ocr-text"),
            text_path.into_os_string(),
        ])
        .unwrap();
        try_main(cli).await.unwrap();

        let services = AppServices::init(&data, None).unwrap();
        let records = services.records(ANONYMOUS_OWNER).unwrap();
        assert_eq!(records.len(), 1);
        let doc = &records[0].1;
        assert_eq!(doc["storeName"], serde_json::Value::from("CORNER SHOP"));
        assert!(doc["imageUrl"].as_str().unwrap().starts_with("file://"));
    }
}
