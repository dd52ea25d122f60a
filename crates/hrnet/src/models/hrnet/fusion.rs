//! # Final Branch Fusion
//!
//! [`Fusion`] reduces the 4 final-stage branches to one or more
//! output feature maps, under a [`FusionMode`] fixed at construction:
//!
//! * [`FusionMode::Keep`] - ``[input[0]]``, unchanged.
//! * [`FusionMode::Fuse`] - every branch is projected to the last branch's
//!   width, upsampled to branch-0 resolution, and summed; one output.
//! * [`FusionMode::Multi`] - the ``Fuse`` output, followed by 3 strided
//!   conv/norm/act steps; 4 outputs at halving resolution and constant width.

use crate::layers::blocks::cna::{AbstractCNA2dConfig, CNA2d, CNA2dConfig, CNA2dMeta};
use crate::layers::sampling::{Upsample2d, Upsample2dConfig};
use crate::models::hrnet::errors::{HRNetConfigError, HRNetConfigResult};
use crate::models::hrnet::util::branch_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};
use std::str::FromStr;

/// The number of branches fusion consumes.
pub const FUSION_BRANCHES: usize = 4;

/// Fusion policy.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum FusionMode {
    /// Pass branch 0 through.
    Keep,

    /// Sum all branches at branch-0 resolution.
    Fuse,

    /// ``Fuse``, then re-downsample into 4 outputs.
    Multi,
}

impl FusionMode {
    /// All modes, in declaration order.
    pub const ALL: [FusionMode; 3] = [FusionMode::Keep, FusionMode::Fuse, FusionMode::Multi];

    /// The mode's name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMode::Keep => "keep",
            FusionMode::Fuse => "fuse",
            FusionMode::Multi => "multi",
        }
    }

    /// Number of output feature maps.
    pub fn num_outputs(&self) -> usize {
        match self {
            FusionMode::Keep | FusionMode::Fuse => 1,
            FusionMode::Multi => FUSION_BRANCHES,
        }
    }
}

impl FromStr for FusionMode {
    type Err = HRNetConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| HRNetConfigError::UnsupportedFusionMode(s.to_string()))
    }
}

/// [`FusePath`] Config.
#[derive(Config, Debug)]
pub struct FusePathConfig {
    /// Source branch channels.
    pub in_channels: usize,

    /// Optional ``1x1`` projection to the fused width;
    /// absent for the branch already at that width.
    pub project: Option<CNA2dConfig>,

    /// Upsampling to branch-0 resolution.
    pub upsample: Upsample2dConfig,
}

impl FusePathConfig {
    /// Build the path for branch ``branch`` of ``branch_channels``.
    pub fn build(
        branch: usize,
        branch_channels: &[usize],
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        let in_channels = branch_channels[branch];
        let out_channels = branch_channels[branch_channels.len() - 1];
        let project = if branch != branch_channels.len() - 1 {
            Some(cna.square([in_channels, out_channels], 1, 1))
        } else {
            None
        };
        Self {
            in_channels,
            project,
            upsample: Upsample2dConfig::doublings(branch),
        }
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        match &self.project {
            Some(project) => project.out_channels(),
            None => self.in_channels,
        }
    }

    /// Initialize a [`FusePath`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> FusePath<B> {
        FusePath {
            in_channels: self.in_channels,
            project: self.project.map(|project| project.init(device)),
            upsample: self.upsample.init(),
        }
    }
}

/// Branch projection and upsampling to the fused width and resolution.
#[derive(Module, Debug)]
pub struct FusePath<B: Backend> {
    /// Source branch channels.
    pub in_channels: usize,

    /// Optional ``1x1`` projection.
    pub project: Option<CNA2d<B>>,

    /// Upsampling to branch-0 resolution.
    pub upsample: Upsample2d,
}

impl<B: Backend> FusePath<B> {
    /// Output channels.
    pub fn out_channels(&self) -> usize {
        match &self.project {
            Some(project) => project.out_channels(),
            None => self.in_channels,
        }
    }

    /// Forward pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = match &self.project {
            Some(project) => project.forward(input),
            None => input,
        };
        self.upsample.forward(x)
    }
}

/// [`KeepFusion`] Config.
#[derive(Config, Debug)]
pub struct KeepFusionConfig {
    /// Branch-0 channels.
    pub channels: usize,
}

/// Branch-0 pass-through.
#[derive(Module, Clone, Debug)]
pub struct KeepFusion {
    /// Branch-0 channels.
    pub channels: usize,
}

/// [`FuseFusion`] Config.
#[derive(Config, Debug)]
pub struct FuseFusionConfig {
    /// One path per branch.
    pub paths: Vec<FusePathConfig>,
}

impl FuseFusionConfig {
    /// Build the per-branch paths.
    pub fn build(
        branch_channels: &[usize],
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        Self {
            paths: (0..branch_channels.len())
                .map(|branch| FusePathConfig::build(branch, branch_channels, cna))
                .collect(),
        }
    }

    /// Per-branch input channels.
    pub fn in_channels(&self) -> Vec<usize> {
        self.paths.iter().map(|path| path.in_channels).collect()
    }

    /// Fused channels.
    pub fn out_channels(&self) -> usize {
        self.paths[self.paths.len() - 1].out_channels()
    }

    /// Initialize a [`FuseFusion`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> FuseFusion<B> {
        FuseFusion {
            paths: self.paths.into_iter().map(|p| p.init(device)).collect(),
        }
    }
}

/// Sum of all branches, projected and upsampled to branch 0.
#[derive(Module, Debug)]
pub struct FuseFusion<B: Backend> {
    /// One path per branch.
    pub paths: Vec<FusePath<B>>,
}

impl<B: Backend> FuseFusion<B> {
    /// Fused channels.
    pub fn out_channels(&self) -> usize {
        self.paths[self.paths.len() - 1].out_channels()
    }

    /// Forward pass.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height_0, width_0]``
    pub fn forward(
        &self,
        inputs: Vec<Tensor<B, 4>>,
    ) -> Tensor<B, 4> {
        let mut sources = inputs.into_iter().zip(self.paths.iter());
        match sources.next() {
            Some((x, path)) => sources.fold(path.forward(x), |acc, (x, path)| {
                acc + path.forward(x)
            }),
            None => panic!("fusion requires at least one branch"),
        }
    }
}

/// [`MultiFusion`] Config.
#[derive(Config, Debug)]
pub struct MultiFusionConfig {
    /// The first output.
    pub fuse: FuseFusionConfig,

    /// ``3x3`` stride-2 conv/norm/act steps producing the remaining outputs.
    pub downsamples: Vec<CNA2dConfig>,
}

impl MultiFusionConfig {
    /// Build the fuse paths and ``branch_channels.len() - 1`` downsample steps.
    pub fn build(
        branch_channels: &[usize],
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        let fuse = FuseFusionConfig::build(branch_channels, cna);
        let channels = fuse.out_channels();
        Self {
            fuse,
            downsamples: (1..branch_channels.len())
                .map(|_| cna.square([channels, channels], 3, 2))
                .collect(),
        }
    }

    /// Initialize a [`MultiFusion`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> MultiFusion<B> {
        MultiFusion {
            fuse: self.fuse.init(device),
            downsamples: self
                .downsamples
                .into_iter()
                .map(|d| d.init(device))
                .collect(),
        }
    }
}

/// Fused output followed by a strided downsampling pyramid.
#[derive(Module, Debug)]
pub struct MultiFusion<B: Backend> {
    /// The first output.
    pub fuse: FuseFusion<B>,

    /// Strided downsampling steps.
    pub downsamples: Vec<CNA2d<B>>,
}

impl<B: Backend> MultiFusion<B> {
    /// Forward pass.
    ///
    /// # Returns
    ///
    /// ``1 + downsamples`` tensors, highest resolution first.
    pub fn forward(
        &self,
        inputs: Vec<Tensor<B, 4>>,
    ) -> Vec<Tensor<B, 4>> {
        let mut x = self.fuse.forward(inputs);

        let mut outputs = Vec::with_capacity(self.downsamples.len() + 1);
        outputs.push(x.clone());
        for downsample in &self.downsamples {
            x = downsample.forward(x);
            outputs.push(x.clone());
        }
        outputs
    }
}

/// [`Fusion`] Config.
#[derive(Config, Debug)]
pub enum FusionConfig {
    /// [`FusionMode::Keep`].
    Keep(KeepFusionConfig),

    /// [`FusionMode::Fuse`].
    Fuse(FuseFusionConfig),

    /// [`FusionMode::Multi`].
    Multi(MultiFusionConfig),
}

impl FusionConfig {
    /// Build a fusion config for the final-stage branch widths.
    pub fn build(
        mode: &FusionMode,
        stage_channels: &[usize],
        cna: &AbstractCNA2dConfig,
    ) -> HRNetConfigResult<Self> {
        if stage_channels.len() != FUSION_BRANCHES {
            return Err(HRNetConfigError::FusionBranchCount(stage_channels.len()));
        }
        Ok(match mode {
            FusionMode::Keep => FusionConfig::Keep(KeepFusionConfig::new(stage_channels[0])),
            FusionMode::Fuse => FusionConfig::Fuse(FuseFusionConfig::build(stage_channels, cna)),
            FusionMode::Multi => {
                FusionConfig::Multi(MultiFusionConfig::build(stage_channels, cna))
            }
        })
    }

    /// The configured mode.
    pub fn mode(&self) -> FusionMode {
        match self {
            FusionConfig::Keep(_) => FusionMode::Keep,
            FusionConfig::Fuse(_) => FusionMode::Fuse,
            FusionConfig::Multi(_) => FusionMode::Multi,
        }
    }

    /// The branch widths consumed; only branch 0 under ``Keep``.
    pub fn in_channels(&self) -> Vec<usize> {
        match self {
            FusionConfig::Keep(config) => vec![config.channels],
            FusionConfig::Fuse(config) => config.in_channels(),
            FusionConfig::Multi(config) => config.fuse.in_channels(),
        }
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        match self {
            FusionConfig::Keep(config) => config.channels,
            FusionConfig::Fuse(config) => config.out_channels(),
            FusionConfig::Multi(config) => config.fuse.out_channels(),
        }
    }

    /// Check that every fused path lands on the fused width.
    pub fn try_validate(&self) -> HRNetConfigResult<()> {
        let fuse = match self {
            FusionConfig::Keep(_) => return Ok(()),
            FusionConfig::Fuse(config) => config,
            FusionConfig::Multi(config) => &config.fuse,
        };
        if fuse.paths.len() != FUSION_BRANCHES {
            return Err(HRNetConfigError::FusionBranchCount(fuse.paths.len()));
        }
        let channels = fuse.out_channels();
        for (i, path) in fuse.paths.iter().enumerate() {
            if path.out_channels() != channels {
                return Err(HRNetConfigError::ScheduleMismatch {
                    source_branch: i,
                    destination: 0,
                    produced: path.out_channels(),
                    expected: channels,
                });
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`Fusion`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Fusion<B> {
        self.expect_valid();
        match self {
            FusionConfig::Keep(config) => Fusion::Keep(KeepFusion {
                channels: config.channels,
            }),
            FusionConfig::Fuse(config) => Fusion::Fuse(config.init(device)),
            FusionConfig::Multi(config) => Fusion::Multi(config.init(device)),
        }
    }
}

/// Final-stage branch fusion.
#[derive(Module, Debug)]
pub enum Fusion<B: Backend> {
    /// [`FusionMode::Keep`].
    Keep(KeepFusion),

    /// [`FusionMode::Fuse`].
    Fuse(FuseFusion<B>),

    /// [`FusionMode::Multi`].
    Multi(MultiFusion<B>),
}

impl<B: Backend> Fusion<B> {
    /// The fusion mode.
    pub fn mode(&self) -> FusionMode {
        match self {
            Fusion::Keep(_) => FusionMode::Keep,
            Fusion::Fuse(_) => FusionMode::Fuse,
            Fusion::Multi(_) => FusionMode::Multi,
        }
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        match self {
            Fusion::Keep(layer) => layer.channels,
            Fusion::Fuse(layer) => layer.out_channels(),
            Fusion::Multi(layer) => layer.fuse.out_channels(),
        }
    }

    /// Number of output feature maps.
    pub fn num_outputs(&self) -> usize {
        self.mode().num_outputs()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `inputs`: exactly 4 tensors; ``inputs[i]`` is
    ///   ``[batch, channels_i, height/2^i, width/2^i]``.
    ///
    /// # Returns
    ///
    /// [`Fusion::num_outputs`] tensors; ``outputs[k]`` is
    /// ``[batch, out_channels, height/2^k, width/2^k]``.
    pub fn forward(
        &self,
        inputs: Vec<Tensor<B, 4>>,
    ) -> Vec<Tensor<B, 4>> {
        assert_eq!(
            inputs.len(),
            FUSION_BRANCHES,
            "fusion expects {} branches, got {}",
            FUSION_BRANCHES,
            inputs.len()
        );
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &inputs[0],
            &["batch", "height", "width"],
            &[]
        );

        let outputs: Vec<Tensor<B, 4>> = match self {
            Fusion::Keep(_) => inputs.into_iter().take(1).collect(),
            Fusion::Fuse(layer) => vec![layer.forward(inputs)],
            Fusion::Multi(layer) => layer.forward(inputs),
        };

        for (k, x) in outputs.iter().enumerate() {
            let [out_height, out_width] = branch_resolution([height, width], k);
            assert_shape_contract_periodically!(
                ["batch", "channels", "height", "width"],
                x,
                &[
                    ("batch", batch),
                    ("channels", self.out_channels()),
                    ("height", out_height),
                    ("width", out_width)
                ]
            );
        }

        outputs
    }
}
