//! alpaca: load a GGUF model through llama.cpp and print its properties.

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};

use alpaca::bindings::{gguf, Backend};
use alpaca::config::{Cli, Config, LoggingConfig};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Load configuration and resolve the model path before any native call.
    let file_config = Config::load(&cli.config)
        .with_context(|| format!("failed to read config {}", cli.config.display()))?;
    let found = file_config.is_some();
    let config = file_config.unwrap_or_default().merge_cli(&cli);

    init_tracing(&config.logging);
    info!(
        llama_cpp = alpaca::bindings::sys::LLAMA_CPP_RELEASE,
        "alpaca v{}",
        env!("CARGO_PKG_VERSION")
    );
    if !found {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let model_path = config.model_path()?.to_path_buf();

    if cli.inspect {
        let metadata = gguf::load_metadata(&model_path)
            .with_context(|| format!("failed to read GGUF header of {}", model_path.display()))?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        } else {
            println!("GGUF v{} ({} tensors)", metadata.gguf_version, metadata.tensor_count);
            println!("  Architecture: {}", metadata.architecture);
            if let Some(name) = &metadata.name {
                println!("  Name: {name}");
            }
            if let Some(quantization) = &metadata.quantization {
                println!("  Quantization: {quantization}");
            }
        }
    }

    // Initialize backend.
    let mut backend = Backend::init_default()?;

    // Load model.
    if !cli.json {
        println!("Loading model...");
    }
    let mut model = backend.load_model(&model_path)?;
    let info = model.info()?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("✓ Model loaded successfully!");
        println!("  Vocabulary size: {}", info.vocab_size);
        println!("  Context size: {}", info.context_size);
    }

    model.free();
    backend.shutdown()?;
    debug!(path = %model_path.display(), "Model and backend released");

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter.as_str().into());

    // Logs go to stderr so stdout stays parseable with --json.
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    }
}
