//! # `HRNet` Core Model
//!
//! [`HRNet`] is the core `HRNet` module.
//!
//! [`HRNetAbstractConfig`] implements [`Config`], and provides
//! a high-level configuration interface.
//! It provides [`HRNetAbstractConfig::try_to_structure`] to resolve
//! the channel schedule into a [`HRNetStructureConfig`].
//!
//! [`HRNetStructureConfig`] implements [`Config`], and provides
//! [`HRNetStructureConfig::init`] to initialize a [`HRNet`].
//!
//! [`HRNet`] implements [`Module`], and provides
//! [`HRNet::forward`], [`HRNet::forward_heads`] and [`HRNet::forward_features`].

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::cna::AbstractCNA2dConfig;
use crate::models::hrnet::block::BlockKind;
use crate::models::hrnet::errors::{HRNetConfigError, HRNetConfigResult};
use crate::models::hrnet::fusion::{Fusion, FusionConfig, FusionMode};
use crate::models::hrnet::head::{Classifier, ClassifierConfig, OutputHead, OutputHeadConfig};
use crate::models::hrnet::input::{HRNetInput, HRNetInputConfig};
use crate::models::hrnet::schedule::{ChannelSchedule, NUM_STAGES};
use crate::models::hrnet::stage::{DEFAULT_BLOCKS_PER_STAGE, Stage, StageConfig, StageMeta};
use crate::models::hrnet::transition::{Transition, TransitionConfig, TransitionMeta};
use bimm_contracts::assert_shape_contract;
use burn::prelude::{Backend, Config, Module, Tensor};

/// Input resolutions must be a multiple of this.
///
/// The stem divides by 4, and the lowest branch by a further 8.
pub const INPUT_RESOLUTION_MULTIPLE: usize = 32;

/// High-level `HRNet` model configuration.
#[derive(Config, Debug)]
pub struct HRNetAbstractConfig {
    /// Number of classification classes.
    pub num_classes: usize,

    /// Stage-1 branch width; one of [`crate::models::hrnet::schedule::SUPPORTED_WIDTHS`].
    pub width: usize,

    /// Final branch fusion.
    #[config(default = "FusionMode::Multi")]
    pub fusion: FusionMode,

    /// Block kind of each stage.
    #[config(
        default = "[BlockKind::Normal, BlockKind::Normal, BlockKind::Normal, BlockKind::Normal]"
    )]
    pub stage_blocks: [BlockKind; NUM_STAGES],

    /// Image channels.
    #[config(default = "3")]
    pub in_channels: usize,

    /// Stem width.
    #[config(default = "64")]
    pub stem_channels: usize,

    /// Output head width.
    #[config(default = "2048")]
    pub head_channels: usize,

    /// Blocks in every branch chain.
    #[config(default = "DEFAULT_BLOCKS_PER_STAGE")]
    pub blocks_per_stage: usize,

    /// Batch-norm running-statistics momentum, shared by every norm layer.
    #[config(default = "0.2")]
    pub bn_momentum: f64,

    /// Unsized norm replacing the ``bn_momentum`` batch norm in every layer.
    #[config(default = "None")]
    pub norm: Option<NormalizationConfig>,

    /// Activation, shared by every conv/norm/act layer and the head.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl HRNetAbstractConfig {
    /// Use the same block kind in every stage.
    pub fn with_block(
        self,
        kind: BlockKind,
    ) -> Self {
        self.with_stage_blocks([kind.clone(), kind.clone(), kind.clone(), kind])
    }

    /// The conv/norm/act policy every layer is built from.
    pub fn cna_policy(&self) -> AbstractCNA2dConfig {
        let norm = self
            .norm
            .clone()
            .unwrap_or_else(|| NormalizationConfig::batch(self.bn_momentum));
        AbstractCNA2dConfig::new(norm).with_act(self.activation.clone())
    }

    /// Resolve the channel schedule.
    pub fn schedule(&self) -> HRNetConfigResult<ChannelSchedule> {
        ChannelSchedule::try_from_width(self.width)
    }

    /// Convert to a [`HRNetStructureConfig`].
    ///
    /// # Returns
    ///
    /// A validated structure config, or the first configuration error.
    pub fn try_to_structure(&self) -> HRNetConfigResult<HRNetStructureConfig> {
        let schedule = self.schedule()?;
        if self.blocks_per_stage == 0 {
            return Err(HRNetConfigError::InvalidBlockCount(self.blocks_per_stage));
        }
        let cna = self.cna_policy();

        let structure = HRNetStructureConfig {
            input: HRNetInputConfig::build(
                self.in_channels,
                self.stem_channels,
                schedule.base_width(),
                &cna,
            ),
            stages: schedule
                .stages()
                .iter()
                .zip(self.stage_blocks.iter())
                .map(|(channels, kind)| {
                    StageConfig::build(channels, self.blocks_per_stage, kind, &cna)
                })
                .collect(),
            transitions: schedule
                .stages()
                .windows(2)
                .map(|pair| TransitionConfig::build(&pair[0], &pair[1], &cna))
                .collect(),
            fusion: FusionConfig::build(&self.fusion, schedule.last_stage(), &cna)?,
            head: OutputHeadConfig::build(
                self.fusion_out_channels(&schedule),
                self.head_channels,
                &cna.norm,
                &cna.act,
            ),
            classifier: ClassifierConfig::build(self.head_channels, self.num_classes),
        };
        structure.try_validate()?;
        Ok(structure)
    }

    /// Convert to a [`HRNetStructureConfig`].
    ///
    /// # Panics
    ///
    /// On any configuration error; see [`HRNetAbstractConfig::try_to_structure`].
    pub fn to_structure(&self) -> HRNetStructureConfig {
        match self.try_to_structure() {
            Ok(structure) => structure,
            Err(err) => panic!("{}", err),
        }
    }

    fn fusion_out_channels(
        &self,
        schedule: &ChannelSchedule,
    ) -> usize {
        let last = schedule.last_stage();
        match self.fusion {
            FusionMode::Keep => last[0],
            FusionMode::Fuse | FusionMode::Multi => last[last.len() - 1],
        }
    }
}

impl TryFrom<HRNetAbstractConfig> for HRNetStructureConfig {
    type Error = HRNetConfigError;

    fn try_from(config: HRNetAbstractConfig) -> Result<Self, Self::Error> {
        config.try_to_structure()
    }
}

/// [`HRNet`] Structure Config.
///
/// This config defines the structure of a resolved `HRNet` model;
/// [`HRNetStructureConfig::try_validate`] checks every junction
/// between adjacent components.
#[derive(Config, Debug)]
pub struct HRNetStructureConfig {
    /// Stem and adapter.
    pub input: HRNetInputConfig,

    /// The 4 stages.
    pub stages: Vec<StageConfig>,

    /// The 3 transitions; ``transitions[k]`` follows ``stages[k]``.
    pub transitions: Vec<TransitionConfig>,

    /// Final branch fusion.
    pub fusion: FusionConfig,

    /// Shared output head.
    pub head: OutputHeadConfig,

    /// Shared classifier.
    pub classifier: ClassifierConfig,
}

fn check_junction(
    junction: impl FnOnce() -> String,
    produced: Vec<usize>,
    expected: Vec<usize>,
) -> HRNetConfigResult<()> {
    if produced == expected {
        Ok(())
    } else {
        Err(HRNetConfigError::JunctionMismatch {
            junction: junction(),
            produced,
            expected,
        })
    }
}

impl HRNetStructureConfig {
    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }

    /// Per-stage branch widths.
    pub fn stage_channels(&self) -> Vec<Vec<usize>> {
        self.stages.iter().map(|s| s.branch_channels()).collect()
    }

    /// Check every component, and the widths at every junction.
    pub fn try_validate(&self) -> HRNetConfigResult<()> {
        if self.stages.len() != self.transitions.len() + 1 {
            return Err(HRNetConfigError::StageCountMismatch {
                stages: self.stages.len(),
                transitions: self.transitions.len(),
            });
        }

        for stage in &self.stages {
            stage.try_validate()?;
        }
        for transition in &self.transitions {
            transition.try_validate()?;
        }
        self.fusion.try_validate()?;

        check_junction(
            || "input -> stage 0".to_string(),
            vec![self.input.out_channels()],
            self.stages[0].branch_channels(),
        )?;
        for (k, transition) in self.transitions.iter().enumerate() {
            check_junction(
                || format!("stage {k} -> transition {k}"),
                self.stages[k].branch_channels(),
                transition.in_channels(),
            )?;
            check_junction(
                || format!("transition {k} -> stage {}", k + 1),
                transition.out_channels(),
                self.stages[k + 1].branch_channels(),
            )?;
        }
        let last = self.stages.len() - 1;
        let consumed = self.fusion.in_channels();
        let produced = self.stages[last]
            .branch_channels()
            .into_iter()
            .take(consumed.len())
            .collect();
        check_junction(
            || format!("stage {last} -> fusion"),
            produced,
            consumed,
        )?;
        check_junction(
            || "fusion -> head".to_string(),
            vec![self.fusion.out_channels()],
            vec![self.head.in_channels()],
        )?;
        check_junction(
            || "head -> classifier".to_string(),
            vec![self.head.out_channels()],
            vec![self.classifier.linear.d_input],
        )
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`HRNet`] model.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> HRNet<B> {
        self.expect_valid();

        for (k, stage) in self.stages.iter().enumerate() {
            tracing::debug!(
                stage = k,
                branch_channels = ?stage.branch_channels(),
                "building stage"
            );
        }
        for (k, transition) in self.transitions.iter().enumerate() {
            tracing::debug!(
                transition = k,
                from = ?transition.in_channels(),
                to = ?transition.out_channels(),
                "building transition"
            );
        }
        tracing::debug!(
            fusion = self.fusion.mode().as_str(),
            fused_channels = self.fusion.out_channels(),
            head_channels = self.head.out_channels(),
            num_classes = self.num_classes(),
            "building head"
        );

        HRNet {
            input: self.input.init(device),
            stages: self.stages.into_iter().map(|s| s.init(device)).collect(),
            transitions: self
                .transitions
                .into_iter()
                .map(|t| t.init(device))
                .collect(),
            fusion: self.fusion.init(device),
            head: self.head.init(device),
            classifier: self.classifier.init(device),
        }
    }
}

/// `HRNet` model.
#[derive(Module, Debug)]
pub struct HRNet<B: Backend> {
    /// Stem and adapter.
    pub input: HRNetInput<B>,

    /// Stages.
    pub stages: Vec<Stage<B>>,

    /// Transitions; ``transitions[k]`` follows ``stages[k]``.
    pub transitions: Vec<Transition<B>>,

    /// Final branch fusion.
    pub fusion: Fusion<B>,

    /// Shared output head.
    pub head: OutputHead<B>,

    /// Shared classifier.
    pub classifier: Classifier<B>,
}

impl<B: Backend> HRNet<B> {
    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.classifier.num_classes()
    }

    /// The fusion mode.
    pub fn fusion_mode(&self) -> FusionMode {
        self.fusion.mode()
    }

    /// Per-stage branch widths.
    pub fn stage_channels(&self) -> Vec<Vec<usize>> {
        self.stages.iter().map(|s| s.branch_channels()).collect()
    }

    /// Run the stem, stages and transitions.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``;
    ///   ``height`` and ``width`` must be multiples of [`INPUT_RESOLUTION_MULTIPLE`].
    ///
    /// # Returns
    ///
    /// The final-stage branches, highest resolution first.
    pub fn forward_branches(
        &self,
        input: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        assert_shape_contract!(
            [
                "batch",
                "in_channels",
                "height" * "multiple",
                "width" * "multiple"
            ],
            &input,
            &[
                ("in_channels", self.input.in_channels()),
                ("multiple", INPUT_RESOLUTION_MULTIPLE)
            ]
        );

        let x = self.input.forward(input);

        let mut branches = vec![x];
        for (k, stage) in self.stages.iter().enumerate() {
            branches = stage.forward(branches);
            if let Some(transition) = self.transitions.get(k) {
                branches = transition.forward(branches);
            }
        }
        branches
    }

    /// Run the network up to, and including, fusion.
    ///
    /// # Returns
    ///
    /// The fused feature maps; 1 for ``keep`` and ``fuse``, 4 for ``multi``.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        let features = self.fusion.forward(self.forward_branches(input));
        if let Some(last) = features.last() {
            tracing::trace!(shape = ?last.dims(), "fused output");
        }
        features
    }

    /// Apply the shared head and classifier to each fused feature map.
    pub fn classify(
        &self,
        features: Vec<Tensor<B, 4>>,
    ) -> Vec<Tensor<B, 2>> {
        features
            .into_iter()
            .map(|x| self.classifier.forward(self.head.forward(x)))
            .collect()
    }

    /// Class probabilities from every fused feature map.
    ///
    /// # Returns
    ///
    /// One ``[batch, num_classes]`` tensor per fused output,
    /// highest resolution first.
    pub fn forward_heads(
        &self,
        input: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 2>> {
        self.classify(self.forward_features(input))
    }

    /// `HRNet` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` probabilities from the last
    /// (lowest resolution) fused output.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        match self.forward_heads(input).pop() {
            Some(x) => x,
            None => unreachable!("fusion produces at least one output"),
        }
    }

    /// Re-initialize the classifier with the specified number of output classes.
    pub fn with_classes(
        mut self,
        num_classes: usize,
    ) -> Self {
        self.classifier = self.classifier.with_classes(num_classes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::normalization_wrapper::Normalization;
    use crate::models::hrnet::schedule::SUPPORTED_WIDTHS;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    fn assert_probabilities(x: &Tensor<impl Backend, 2>) {
        for v in x.to_data().convert::<f32>().iter::<f32>() {
            assert!((0.0..=1.0).contains(&v), "{v} is not a probability");
        }
    }

    fn small_config(fusion: FusionMode) -> HRNetAbstractConfig {
        HRNetAbstractConfig::new(3, 16)
            .with_fusion(fusion)
            .with_stem_channels(16)
            .with_head_channels(32)
            .with_blocks_per_stage(1)
    }

    #[test]
    fn test_abstract_config_defaults() {
        let config = HRNetAbstractConfig::new(10, 32);
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.width, 32);
        assert_eq!(config.fusion, FusionMode::Multi);
        assert_eq!(config.stage_blocks, [
            BlockKind::Normal,
            BlockKind::Normal,
            BlockKind::Normal,
            BlockKind::Normal
        ]);
        assert_eq!(config.in_channels, 3);
        assert_eq!(config.stem_channels, 64);
        assert_eq!(config.head_channels, 2048);
        assert_eq!(config.blocks_per_stage, 4);
        assert_eq!(config.bn_momentum, 0.2);
        assert!(config.norm.is_none());

        let cna = config.cna_policy();
        assert_eq!(cna.norm.momentum(), Some(0.2));
        assert_eq!(
            config.clone().with_bn_momentum(0.1).cna_policy().norm.momentum(),
            Some(0.1)
        );

        let config = config.with_block(BlockKind::Residual);
        assert!(config.stage_blocks.iter().all(|k| *k == BlockKind::Residual));
    }

    #[test]
    fn test_structure_schedule() {
        for width in SUPPORTED_WIDTHS {
            let structure = HRNetAbstractConfig::new(5, width).to_structure();
            assert_eq!(structure.num_classes(), 5);
            assert_eq!(structure.input.out_channels(), width);
            assert_eq!(structure.stages.len(), 4);
            assert_eq!(structure.transitions.len(), 3);

            for (k, channels) in structure.stage_channels().iter().enumerate() {
                assert_eq!(channels.len(), k + 1);
                for (i, &c) in channels.iter().enumerate() {
                    assert_eq!(c, width << i);
                }
            }

            assert_eq!(structure.fusion.mode(), FusionMode::Multi);
            assert_eq!(structure.fusion.out_channels(), width * 8);
            assert_eq!(structure.head.in_channels(), width * 8);
            assert_eq!(structure.head.out_channels(), 2048);
        }
    }

    #[test]
    fn test_structure_errors() {
        assert_eq!(
            HRNetAbstractConfig::new(2, 48).try_to_structure().err(),
            Some(HRNetConfigError::UnsupportedWidth {
                width: 48,
                supported: SUPPORTED_WIDTHS.to_vec(),
            })
        );
        assert_eq!(
            HRNetAbstractConfig::new(2, 32)
                .with_blocks_per_stage(0)
                .try_to_structure()
                .err(),
            Some(HRNetConfigError::InvalidBlockCount(0))
        );
        assert_eq!(
            HRNetStructureConfig::try_from(HRNetAbstractConfig::new(2, 16))
                .map(|s| s.num_classes()),
            Ok(2)
        );
    }

    #[test]
    fn test_fusion_mode_from_str_config() {
        let mode: FusionMode = "fuse".parse().unwrap();
        let structure = HRNetAbstractConfig::new(2, 16)
            .with_fusion(mode)
            .to_structure();
        assert_eq!(structure.fusion.mode(), FusionMode::Fuse);

        assert_eq!(
            "average".parse::<FusionMode>().err(),
            Some(HRNetConfigError::UnsupportedFusionMode("average".to_string()))
        );
    }

    #[test]
    #[should_panic(expected = "unsupported width 24")]
    fn test_to_structure_panics() {
        let _ = HRNetAbstractConfig::new(2, 24).to_structure();
    }

    #[test]
    fn test_junction_mismatch() {
        let mut structure = HRNetAbstractConfig::new(2, 16).to_structure();
        structure.stages.swap(1, 2);
        assert_eq!(
            structure.try_validate(),
            Err(HRNetConfigError::JunctionMismatch {
                junction: "transition 0 -> stage 1".to_string(),
                produced: vec![16, 32],
                expected: vec![16, 32, 64],
            })
        );
    }

    #[test]
    fn test_last_stage_fusion_mismatch() {
        let config = HRNetAbstractConfig::new(2, 16);
        let cna = config.cna_policy();
        let mut structure = config.to_structure();

        // Fusion built for the width-32 schedule, head resized to match it.
        structure.fusion =
            FusionConfig::build(&FusionMode::Fuse, &[32, 64, 128, 256], &cna).unwrap();
        structure.head = OutputHeadConfig::build(256, 2048, &cna.norm, &cna.act);

        assert_eq!(
            structure.try_validate(),
            Err(HRNetConfigError::JunctionMismatch {
                junction: "stage 3 -> fusion".to_string(),
                produced: vec![16, 32, 64, 128],
                expected: vec![32, 64, 128, 256],
            })
        );
    }

    #[test]
    fn test_keep_fusion_checks_branch_zero() {
        let config = HRNetAbstractConfig::new(2, 16).with_fusion(FusionMode::Keep);
        let cna = config.cna_policy();
        let mut structure = config.to_structure();
        assert_eq!(structure.fusion.in_channels(), vec![16]);
        structure.try_validate().unwrap();

        structure.fusion =
            FusionConfig::build(&FusionMode::Keep, &[32, 64, 128, 256], &cna).unwrap();
        structure.head = OutputHeadConfig::build(32, 2048, &cna.norm, &cna.act);
        assert_eq!(
            structure.try_validate(),
            Err(HRNetConfigError::JunctionMismatch {
                junction: "stage 3 -> fusion".to_string(),
                produced: vec![16],
                expected: vec![32],
            })
        );
    }

    #[test]
    #[should_panic(expected = "stage 3 -> fusion")]
    fn test_last_stage_fusion_mismatch_init_panics() {
        let config = HRNetAbstractConfig::new(2, 16).with_blocks_per_stage(1);
        let cna = config.cna_policy();
        let mut structure = config.to_structure();
        structure.fusion =
            FusionConfig::build(&FusionMode::Multi, &[32, 64, 128, 256], &cna).unwrap();
        structure.head = OutputHeadConfig::build(256, 2048, &cna.norm, &cna.act);

        let device = Default::default();
        let _model: HRNet<B> = structure.init(&device);
    }

    #[test]
    fn test_stage_count_mismatch() {
        let mut structure = HRNetAbstractConfig::new(2, 16).to_structure();
        structure.transitions.pop();
        assert_eq!(
            structure.try_validate(),
            Err(HRNetConfigError::StageCountMismatch {
                stages: 4,
                transitions: 2,
            })
        );
    }

    #[test]
    fn test_forward_group_norm() {
        let device = Default::default();
        let config =
            small_config(FusionMode::Fuse).with_norm(Some(NormalizationConfig::group(4)));
        assert_eq!(config.cna_policy().norm.momentum(), None);

        let model: HRNet<B> = config.to_structure().init(&device);
        assert!(matches!(model.head.conv_norm.norm, Normalization::Group(_)));

        let input = Tensor::random([2, 3, 64, 64], Distribution::Default, &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 3]);
        assert_probabilities(&output);
    }

    #[test]
    fn test_construct_supported_widths() {
        let device = Default::default();
        for width in SUPPORTED_WIDTHS {
            let model: HRNet<B> = HRNetAbstractConfig::new(4, width)
                .with_blocks_per_stage(1)
                .to_structure()
                .init(&device);

            assert_eq!(model.num_classes(), 4);
            assert_eq!(model.fusion_mode(), FusionMode::Multi);
            assert_eq!(model.stage_channels(), vec![
                vec![width],
                vec![width, width * 2],
                vec![width, width * 2, width * 4],
                vec![width, width * 2, width * 4, width * 8],
            ]);
            assert!(model.num_params() > 0);
        }
    }

    #[test]
    fn test_forward_small_all_modes() {
        let device = Default::default();
        let batch = 2;

        for mode in FusionMode::ALL {
            let model: HRNet<B> = small_config(mode.clone()).to_structure().init(&device);

            let input = Tensor::random([batch, 3, 64, 64], Distribution::Default, &device);

            let branches = model.forward_branches(input.clone());
            assert_eq!(branches.len(), 4);
            for (i, x) in branches.iter().enumerate() {
                assert_eq!(x.dims(), [batch, 16 << i, 16 >> i, 16 >> i]);
            }

            let heads = model.forward_heads(input.clone());
            assert_eq!(heads.len(), mode.num_outputs());
            for x in &heads {
                assert_shape_contract!(["batch", "classes"], x, &[
                    ("batch", batch),
                    ("classes", 3)
                ]);
                assert_probabilities(x);
            }

            let output = model.forward(input);
            assert_eq!(output.dims(), [batch, 3]);
            assert_probabilities(&output);
            output
                .to_data()
                .assert_approx_eq::<f32>(&heads[heads.len() - 1].to_data(), Default::default());
        }
    }

    #[test]
    fn test_forward_features_shapes() {
        let device = Default::default();
        let model: HRNet<B> = small_config(FusionMode::Multi).to_structure().init(&device);

        let input = Tensor::random([1, 3, 64, 64], Distribution::Default, &device);
        let features = model.forward_features(input);
        let dims = features.iter().map(|x| x.dims()).collect::<Vec<_>>();
        assert_eq!(dims, vec![
            [1, 128, 16, 16],
            [1, 128, 8, 8],
            [1, 128, 4, 4],
            [1, 128, 2, 2]
        ]);
    }

    #[test]
    fn test_forward_residual_blocks() {
        let device = Default::default();
        let model: HRNet<B> = small_config(FusionMode::Fuse)
            .with_block(BlockKind::Residual)
            .to_structure()
            .init(&device);

        let input = Tensor::random([2, 3, 32, 32], Distribution::Default, &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 3]);
        assert_probabilities(&output);
    }

    #[test]
    #[should_panic]
    fn test_forward_rejects_unaligned_resolution() {
        let device = Default::default();
        let model: HRNet<B> = small_config(FusionMode::Keep).to_structure().init(&device);

        let input = Tensor::random([1, 3, 48, 48], Distribution::Default, &device);
        let _ = model.forward(input);
    }

    #[test]
    fn test_with_classes() {
        let device = Default::default();
        let model: HRNet<B> = small_config(FusionMode::Keep).to_structure().init(&device);
        let model = model.with_classes(7);
        assert_eq!(model.num_classes(), 7);

        let input = Tensor::random([1, 3, 32, 32], Distribution::Default, &device);
        assert_eq!(model.forward(input).dims(), [1, 7]);
    }

    #[test]
    fn test_autodiff_backward() {
        type AB = Autodiff<NdArray<f32>>;
        let device = Default::default();
        let model: HRNet<AB> = small_config(FusionMode::Multi).to_structure().init(&device);

        let input = Tensor::random([2, 3, 32, 32], Distribution::Default, &device);
        let output = model.forward(input);
        let grads = output.sum().backward();

        let weight_grad = model.classifier.linear.weight.grad(&grads);
        assert!(weight_grad.is_some());
        let stem_grad = model.input.stem.cna1.conv.weight.grad(&grads);
        assert!(stem_grad.is_some());
    }

    #[test]
    fn test_end_to_end_width_32() {
        let device = Default::default();
        let model: HRNet<B> = HRNetAbstractConfig::new(2, 32).to_structure().init(&device);

        let input = Tensor::random([1, 3, 256, 256], Distribution::Default, &device);
        let features = model.forward_features(input);
        assert_eq!(features.len(), 4);
        assert_eq!(features[3].dims(), [1, 256, 8, 8]);

        let mut heads = model.classify(features);
        let output = heads.pop().unwrap();
        assert_eq!(output.dims(), [1, 2]);
        assert_probabilities(&output);
    }
}
