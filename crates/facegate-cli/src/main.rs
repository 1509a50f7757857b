use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use serde_json::Value;

// `#[zbus::proxy]` generates `FaceGateProxy` (async) and `FaceGateProxyBlocking`;
// only the async variant is used here.
#[zbus::proxy(
    interface = "org.facegate.FaceGate1",
    default_service = "org.facegate.FaceGate1",
    default_path = "/org/facegate/FaceGate1"
)]
trait FaceGate {
    async fn detect(&self, image: &str) -> zbus::Result<String>;
    async fn encode(&self, image: &str) -> zbus::Result<String>;
    async fn verify(&self, image: &str, known_encoding: &[f64]) -> zbus::Result<String>;
    async fn anti_spoof(&self, image: &str) -> zbus::Result<String>;
    async fn register(&self, image: &str) -> zbus::Result<String>;
    async fn authenticate(&self, image: &str, known_encoding: &[f64]) -> zbus::Result<String>;
    async fn analyze_frames(&self, images: &[String]) -> zbus::Result<String>;
    async fn health(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate face identity CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    /// Seconds to wait for the daemon to answer
    #[arg(long, global = true, default_value_t = 60)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate faces in an image
    Detect { image: PathBuf },
    /// Compute a face signature without a liveness check
    Encode {
        image: PathBuf,
        /// Write the signature (JSON array) to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Compare the face in an image against a stored signature
    Verify {
        image: PathBuf,
        /// Signature file written by `register` or `encode`
        #[arg(short, long)]
        encoding: PathBuf,
    },
    /// Check whether an image shows a live face
    AntiSpoof { image: PathBuf },
    /// Liveness check, then enroll the face
    Register {
        image: PathBuf,
        /// Write the signature (JSON array) to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Liveness check, then verify against a stored signature
    Authenticate {
        image: PathBuf,
        #[arg(short, long)]
        encoding: PathBuf,
    },
    /// Majority-vote liveness over several frames
    Frames {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Show daemon status and thresholds
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let builder = if cli.system {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let conn = builder
        .method_timeout(Duration::from_secs(cli.timeout))
        .build()
        .await
        .context("connecting to the message bus")?;
    let proxy = FaceGateProxy::new(&conn).await?;

    let (reply, decided) = match cli.command {
        Commands::Detect { image } => (proxy.detect(&read_image(&image)?).await?, None),
        Commands::Encode { image, out } => {
            let reply = proxy.encode(&read_image(&image)?).await?;
            save_encoding(&reply, out.as_deref())?;
            (reply, None)
        }
        Commands::Verify { image, encoding } => {
            let known = read_encoding(&encoding)?;
            let reply = proxy.verify(&read_image(&image)?, &known).await?;
            let matched = field_is_true(&reply, "match");
            (reply, Some(matched))
        }
        Commands::AntiSpoof { image } => {
            let reply = proxy.anti_spoof(&read_image(&image)?).await?;
            let real = field_is_true(&reply, "is_real");
            (reply, Some(real))
        }
        Commands::Register { image, out } => {
            let reply = proxy.register(&read_image(&image)?).await?;
            save_encoding(&reply, out.as_deref())?;
            let ok = field_is_true(&reply, "success");
            (reply, Some(ok))
        }
        Commands::Authenticate { image, encoding } => {
            let known = read_encoding(&encoding)?;
            let reply = proxy.authenticate(&read_image(&image)?, &known).await?;
            let ok = field_is_true(&reply, "match") && field_is_true(&reply, "is_real");
            (reply, Some(ok))
        }
        Commands::Frames { images } => {
            let frames = images
                .iter()
                .map(|p| read_image(p))
                .collect::<Result<Vec<_>>>()?;
            let reply = proxy.analyze_frames(&frames).await?;
            let real = field_is_true(&reply, "is_real");
            (reply, Some(real))
        }
        Commands::Status => (proxy.health().await?, None),
    };

    println!("{}", pretty(&reply));
    Ok(match decided {
        Some(false) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn read_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Load a stored signature: a bare JSON array as written by `--out`, or a
/// whole registration reply carrying one under `encoding`.
fn read_encoding(path: &Path) -> Result<Vec<f64>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    parse_encoding(&value).with_context(|| format!("no signature in {}", path.display()))
}

fn parse_encoding(value: &Value) -> Result<Vec<f64>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_f64().context("signature entries must be numbers"))
            .collect(),
        Value::Object(map) => match map.get("encoding") {
            Some(encoding @ Value::Array(_)) => parse_encoding(encoding),
            _ => bail!("expected an \"encoding\" array"),
        },
        _ => bail!("expected a JSON array or object"),
    }
}

/// Write the reply's `encoding_json` to `out`, if requested and present.
fn save_encoding(reply: &str, out: Option<&Path>) -> Result<()> {
    let Some(out) = out else {
        return Ok(());
    };
    let value: Value = serde_json::from_str(reply).context("daemon reply is not JSON")?;
    match value.get("encoding_json").and_then(Value::as_str) {
        Some(encoding) => {
            std::fs::write(out, encoding).with_context(|| format!("writing {}", out.display()))?;
            tracing::info!(path = %out.display(), "signature saved");
        }
        None => eprintln!("no signature produced; {} not written", out.display()),
    }
    Ok(())
}

fn field_is_true(reply: &str, field: &str) -> bool {
    serde_json::from_str::<Value>(reply)
        .ok()
        .and_then(|v| v.get(field).and_then(Value::as_bool))
        .unwrap_or(false)
}

fn pretty(reply: &str) -> String {
    serde_json::from_str::<Value>(reply)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| reply.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_encoding_forms() {
        assert_eq!(parse_encoding(&json!([0.5, -1.0])).unwrap(), vec![0.5, -1.0]);
        assert_eq!(
            parse_encoding(&json!({"success": true, "encoding": [0.25], "model_version": "w600k_r50"}))
                .unwrap(),
            vec![0.25]
        );
    }

    #[test]
    fn test_parse_encoding_rejects_garbage() {
        assert!(parse_encoding(&json!(["a"])).is_err());
        assert!(parse_encoding(&json!({"faces": 1})).is_err());
        assert!(parse_encoding(&json!({"encoding": null})).is_err());
        assert!(parse_encoding(&json!(3)).is_err());
    }

    #[test]
    fn test_field_is_true() {
        assert!(field_is_true(r#"{"match": true}"#, "match"));
        assert!(!field_is_true(r#"{"match": false}"#, "match"));
        assert!(!field_is_true("not json", "match"));
    }

    #[test]
    fn test_pretty_passes_through_non_json() {
        assert_eq!(pretty("plain"), "plain");
        assert!(pretty(r#"{"a":1}"#).contains("\n"));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["facegate", "--system", "verify", "face.jpg", "-e", "me.json"])
            .unwrap();
        assert!(cli.system);
        assert!(matches!(cli.command, Commands::Verify { .. }));
        assert!(Cli::try_parse_from(["facegate", "frames"]).is_err());
    }
}
