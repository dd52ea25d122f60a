//! Build an `HRNet`, run one batch of random images through it,
//! and log the branch, fused and output shapes.

use anyhow::Context;
use burn::backend::NdArray;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use clap::Parser;
use hrnet::models::hrnet::block::BlockKind;
use hrnet::models::hrnet::fusion::FusionMode;
use hrnet::models::hrnet::hrnet_model::{HRNet, HRNetAbstractConfig};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Stage-1 branch width: 16, 32 or 64.
    #[arg(long, default_value_t = 32)]
    width: usize,

    /// Number of classes.
    #[arg(long, default_value_t = 2)]
    num_classes: usize,

    /// Fusion mode: keep, fuse or multi.
    #[arg(long, default_value = "multi")]
    fusion: String,

    /// Use residual blocks in every stage.
    #[arg(long)]
    residual: bool,

    /// Blocks per branch chain.
    #[arg(long, default_value_t = 4)]
    blocks_per_stage: usize,

    /// Input image height and width; a multiple of 32.
    #[arg(long, default_value_t = 256)]
    image_size: usize,

    /// Batch size.
    #[arg(short, long, default_value_t = 1)]
    batch_size: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let device = Default::default();
    run::<NdArray<f32>>(&args, &device)
}

fn run<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<()> {
    let fusion: FusionMode = args.fusion.parse()?;
    let block = if args.residual {
        BlockKind::Residual
    } else {
        BlockKind::Normal
    };

    let structure = HRNetAbstractConfig::new(args.num_classes, args.width)
        .with_fusion(fusion)
        .with_block(block)
        .with_blocks_per_stage(args.blocks_per_stage)
        .try_to_structure()
        .with_context(|| format!("building HRNet config for width {}", args.width))?;

    let model: HRNet<B> = structure.init(device);
    tracing::info!(
        width = args.width,
        fusion = model.fusion_mode().as_str(),
        num_params = model.num_params(),
        "built model"
    );
    for (k, channels) in model.stage_channels().iter().enumerate() {
        tracing::info!(stage = k, ?channels, "stage");
    }

    let input: Tensor<B, 4> = Tensor::random(
        [args.batch_size, 3, args.image_size, args.image_size],
        Distribution::Default,
        device,
    );

    let branches = model.forward_branches(input);
    for (i, x) in branches.iter().enumerate() {
        tracing::info!(branch = i, shape = ?x.dims(), "final stage branch");
    }

    let features = model.fusion.forward(branches);
    for (k, x) in features.iter().enumerate() {
        tracing::info!(output = k, shape = ?x.dims(), "fused");
    }

    let output = model
        .classify(features)
        .pop()
        .context("fusion produced no outputs")?;
    tracing::info!(shape = ?output.dims(), "output");
    println!("{}", output);

    Ok(())
}
