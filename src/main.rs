// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use npu_runtime::config::{load_config, AllocatorKind, RuntimeBuilder, RuntimeConfig};
use npu_runtime::driver::EmulatedDriver;
use npu_runtime::network::Network;
use npu_runtime::npu::Npu;
use npu_runtime::traits::Driver;

const USAGE: &str = "Usage: npu-runtime [--config runtime.yaml] [--repeat N] [--lock-npu] [--input data.bin] <model|bundle-dir> [meta.json]";

/// Bytes printed per output tensor.
const PREVIEW_BYTES: usize = 16;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    repeat: usize,
    lock_npu: bool,
    input: Option<PathBuf>,
    model: PathBuf,
    meta: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        repeat: 1,
        ..Args::default()
    };
    let mut positional = Vec::new();
    let mut iter = env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
            "--input" => args.input = Some(iter.next().context("--input needs a path")?.into()),
            "--repeat" => {
                args.repeat = iter
                    .next()
                    .context("--repeat needs a count")?
                    .parse()
                    .context("--repeat needs a number")?;
            }
            "--lock-npu" => args.lock_npu = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown option {other}\n{USAGE}"),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let mut positional = positional.into_iter();
    args.model = positional.next().context(USAGE)?;
    args.meta = positional.next();
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // No NPU hardware is driven from here; the emulated device stands in.
    let driver: Option<Arc<dyn Driver>> = (args.lock_npu
        || config.allocator == AllocatorKind::Device)
        .then(|| Arc::new(EmulatedDriver::new()) as Arc<dyn Driver>);

    let mut npu = driver.clone().map(Npu::new);
    if args.lock_npu {
        if let Some(npu) = npu.as_mut() {
            npu.lock().context("unable to lock the NPU")?;
        }
    }

    let context = RuntimeBuilder::from_config(&config, driver)?;
    let network = Network::new(context);

    let load_start = Instant::now();
    network
        .load_model_file(&args.model, args.meta.as_deref())
        .with_context(|| format!("failed to load {}", args.model.display()))?;
    println!("📋 Model: {} ({})", args.model.display(), network.delegate());
    println!("⏱️  Load Time: {:?}", load_start.elapsed());

    let data = match &args.input {
        Some(path) => Some(fs::read(path).with_context(|| format!("failed to read {}", path.display()))?),
        None => None,
    };
    let mut offset = 0;
    for tensor in &network.inputs() {
        let size = tensor.size();
        let bytes = match &data {
            Some(data) => {
                let end = (offset + size).min(data.len());
                let mut bytes = data[offset.min(end)..end].to_vec();
                bytes.resize(size, 0);
                bytes
            }
            None => vec![0; size],
        };
        offset += size;
        tensor.assign(&bytes)?;
        println!("   in  {:<24} {:?} {:?}", tensor.name(), tensor.data_type(), tensor.shape().dims());
    }

    for run in 1..=args.repeat.max(1) {
        let start = Instant::now();
        network.predict().await.with_context(|| format!("inference {run} failed"))?;
        println!("🔁 Inference {run}: {:?}", start.elapsed());
    }

    println!("\n📊 Outputs:");
    for tensor in &network.outputs() {
        let preview = tensor
            .to_vec()
            .map(|bytes| bytes.into_iter().take(PREVIEW_BYTES).collect::<Vec<_>>())
            .unwrap_or_default();
        println!(
            "   out {:<24} {:?} {:?} {:?}",
            tensor.name(),
            tensor.data_type(),
            tensor.shape().dims(),
            preview
        );
    }

    if let Some(npu) = npu.as_mut() {
        npu.unlock()?;
    }
    Ok(())
}
