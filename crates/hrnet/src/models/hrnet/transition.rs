//! # Transitions
//!
//! A [`Transition`] maps ``M`` source branches to ``N`` destination
//! branches, ``N in {M, M + 1}``. Every destination branch ``j`` is the
//! elementwise sum over all sources ``i`` of ``resample(i -> j)(input[i])``.
//!
//! The ``M x N`` grid of [`ResamplePath`]s is built once from the branch
//! widths and stored as a flat row-major arena indexed by
//! ``source * N + destination``.

use crate::layers::blocks::cna::AbstractCNA2dConfig;
use crate::models::hrnet::errors::{HRNetConfigError, HRNetConfigResult};
use crate::models::hrnet::resample::{ResamplePath, ResamplePathConfig, ResamplePathMeta};
use crate::models::hrnet::util::branch_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`TransitionConfig`] / [`Transition`] meta API.
pub trait TransitionMeta {
    /// Source branch widths.
    fn in_channels(&self) -> Vec<usize>;

    /// Destination branch widths.
    fn out_channels(&self) -> Vec<usize>;

    /// Number of source branches.
    fn num_in_branches(&self) -> usize {
        self.in_channels().len()
    }

    /// Number of destination branches.
    fn num_out_branches(&self) -> usize {
        self.out_channels().len()
    }

    /// Arena index of the ``source -> destination`` path.
    fn path_index(
        &self,
        source: usize,
        destination: usize,
    ) -> usize {
        source * self.num_out_branches() + destination
    }

    /// Destination branch resolutions, given the branch-0 resolution.
    fn output_resolutions(
        &self,
        resolution: [usize; 2],
    ) -> Vec<[usize; 2]> {
        (0..self.num_out_branches())
            .map(|j| branch_resolution(resolution, j))
            .collect()
    }
}

/// [`Transition`] Config.
#[derive(Config, Debug)]
pub struct TransitionConfig {
    /// Source branch widths.
    pub in_channels: Vec<usize>,

    /// Destination branch widths.
    pub out_channels: Vec<usize>,

    /// Row-major ``in x out`` path arena.
    pub paths: Vec<ResamplePathConfig>,
}

impl TransitionMeta for TransitionConfig {
    fn in_channels(&self) -> Vec<usize> {
        self.in_channels.clone()
    }

    fn out_channels(&self) -> Vec<usize> {
        self.out_channels.clone()
    }
}

impl TransitionConfig {
    /// Build a transition between two stages.
    ///
    /// # Arguments
    ///
    /// - `old_branch_channels`: source stage branch widths.
    /// - `new_branch_channels`: destination stage branch widths.
    /// - `cna`: the conv/norm/act policy.
    pub fn build(
        old_branch_channels: &[usize],
        new_branch_channels: &[usize],
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        let paths = old_branch_channels
            .iter()
            .enumerate()
            .flat_map(|(i, &channels)| {
                (0..new_branch_channels.len())
                    .map(move |j| ResamplePathConfig::build(i, j, channels, cna))
            })
            .collect();

        Self {
            in_channels: old_branch_channels.to_vec(),
            out_channels: new_branch_channels.to_vec(),
            paths,
        }
    }

    /// The ``source -> destination`` path config.
    pub fn path(
        &self,
        source: usize,
        destination: usize,
    ) -> &ResamplePathConfig {
        &self.paths[self.path_index(source, destination)]
    }

    /// Check the branch count and that every path lands on its destination width.
    pub fn try_validate(&self) -> HRNetConfigResult<()> {
        let m = self.num_in_branches();
        let n = self.num_out_branches();
        if m == 0 || (n != m && n != m + 1) {
            return Err(HRNetConfigError::BranchCountMismatch { from: m, to: n });
        }
        if self.paths.len() != m * n {
            return Err(HRNetConfigError::ArenaSizeMismatch {
                from: m,
                to: n,
                paths: self.paths.len(),
            });
        }

        for i in 0..m {
            for j in 0..n {
                let path = self.path(i, j);
                if path.in_channels() != self.in_channels[i] {
                    return Err(HRNetConfigError::ScheduleMismatch {
                        source_branch: i,
                        destination: j,
                        produced: path.in_channels(),
                        expected: self.in_channels[i],
                    });
                }
                if path.out_channels() != self.out_channels[j] {
                    return Err(HRNetConfigError::ScheduleMismatch {
                        source_branch: i,
                        destination: j,
                        produced: path.out_channels(),
                        expected: self.out_channels[j],
                    });
                }
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

    /// Initialize a [`Transition`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Transition<B> {
        self.expect_valid();
        Transition {
            out_branches: self.out_channels.len(),
            paths: self
                .paths
                .into_iter()
                .map(|path| path.init(device))
                .collect(),
        }
    }
}

/// Branch-expanding cross-resolution exchange.
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    /// Number of destination branches; the arena row length.
    pub out_branches: usize,

    /// Row-major ``in x out`` path arena.
    pub paths: Vec<ResamplePath<B>>,
}

impl<B: Backend> TransitionMeta for Transition<B> {
    fn in_channels(&self) -> Vec<usize> {
        (0..self.num_in_branches())
            .map(|i| self.path(i, 0).in_channels())
            .collect()
    }

    fn out_channels(&self) -> Vec<usize> {
        (0..self.out_branches)
            .map(|j| self.path(0, j).out_channels())
            .collect()
    }

    fn num_in_branches(&self) -> usize {
        self.paths.len() / self.out_branches
    }

    fn num_out_branches(&self) -> usize {
        self.out_branches
    }
}

impl<B: Backend> Transition<B> {
    /// The ``source -> destination`` path.
    pub fn path(
        &self,
        source: usize,
        destination: usize,
    ) -> &ResamplePath<B> {
        &self.paths[self.path_index(source, destination)]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `inputs`: ``M`` tensors; ``inputs[i]`` is
    ///   ``[batch, in_channels[i], height/2^i, width/2^i]``.
    ///
    /// # Returns
    ///
    /// ``N`` tensors; ``outputs[j]`` is
    /// ``[batch, out_channels[j], height/2^j, width/2^j]``.
    pub fn forward(
        &self,
        inputs: Vec<Tensor<B, 4>>,
    ) -> Vec<Tensor<B, 4>> {
        let m = self.num_in_branches();
        let in_channels = self.in_channels();
        let out_channels = self.out_channels();
        assert_eq!(
            inputs.len(),
            m,
            "transition expects {} branches, got {}",
            m,
            inputs.len()
        );

        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &inputs[0],
            &["batch", "height", "width"],
            &[("channels", in_channels[0])]
        );
        for (i, x) in inputs.iter().enumerate().skip(1) {
            let [branch_height, branch_width] = branch_resolution([height, width], i);
            assert_shape_contract_periodically!(
                ["batch", "channels", "height", "width"],
                x,
                &[
                    ("batch", batch),
                    ("channels", in_channels[i]),
                    ("height", branch_height),
                    ("width", branch_width)
                ]
            );
        }

        (0..self.num_out_branches())
            .map(|j| {
                let x = inputs.iter().enumerate().skip(1).fold(
                    self.path(0, j).forward(inputs[0].clone()),
                    |acc, (i, x)| acc + self.path(i, j).forward(x.clone()),
                );

                let [out_height, out_width] = branch_resolution([height, width], j);
                assert_shape_contract_periodically!(
                    ["batch", "channels", "height", "width"],
                    &x,
                    &[
                        ("batch", batch),
                        ("channels", out_channels[j]),
                        ("height", out_height),
                        ("width", out_width)
                    ]
                );
                x
            })
            .collect()
    }
}
