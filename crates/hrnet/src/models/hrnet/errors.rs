//! # `HRNet` Configuration Errors

use thiserror::Error;

/// Construction-time errors for `HRNet` configs.
///
/// These are raised before any layer is initialized; a graph which
/// passes validation has matching channel counts at every junction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HRNetConfigError {
    /// The width selector is not one of the supported widths.
    #[error("unsupported width {width}; expected one of {supported:?}")]
    UnsupportedWidth {
        /// The requested width.
        width: usize,
        /// The supported widths.
        supported: Vec<usize>,
    },

    /// The fusion mode name is not recognized.
    #[error("unsupported fusion mode {0:?}; expected one of [keep, fuse, multi]")]
    UnsupportedFusionMode(String),

    /// A residual block whose skip connection cannot be added.
    #[error("residual block requires in_channels == out_channels, got {in_channels} -> {out_channels}")]
    ResidualChannelMismatch {
        /// Block input channels.
        in_channels: usize,
        /// Block output channels.
        out_channels: usize,
    },

    /// A block in a branch chain which changes the chain's width.
    #[error("branch chain of width {channels} holds a {in_channels} -> {out_channels} block")]
    ChainWidthMismatch {
        /// Chain width.
        channels: usize,
        /// Block input channels.
        in_channels: usize,
        /// Block output channels.
        out_channels: usize,
    },

    /// A transition which changes the branch count by something other than 0 or +1.
    #[error("transition maps {from} branches to {to}; expected {from} or {}", .from + 1)]
    BranchCountMismatch {
        /// Source branch count.
        from: usize,
        /// Destination branch count.
        to: usize,
    },

    /// A schedule stage whose branch count is not its stage index plus one.
    #[error("stage {stage} has {branches} branches; expected {}", .stage + 1)]
    StageBranchCount {
        /// Stage index.
        stage: usize,
        /// Branch count of the stage.
        branches: usize,
    },

    /// A model whose stages and transitions do not alternate.
    #[error(
        "{stages} stages joined by {transitions} transitions; \
         expected one transition between each pair of stages"
    )]
    StageCountMismatch {
        /// Number of stages.
        stages: usize,
        /// Number of transitions.
        transitions: usize,
    },

    /// A transition whose path arena is not ``from * to`` long.
    #[error(
        "transition {from} -> {to} branches holds {paths} resample paths; expected {}",
        .from * .to
    )]
    ArenaSizeMismatch {
        /// Source branch count.
        from: usize,
        /// Destination branch count.
        to: usize,
        /// Paths in the arena.
        paths: usize,
    },

    /// A resample path produces a width that differs from the destination branch width.
    #[error(
        "resample path {source_branch} -> {destination} produces {produced} channels, \
         but destination branch has {expected}"
    )]
    ScheduleMismatch {
        /// Source branch index.
        source_branch: usize,
        /// Destination branch index.
        destination: usize,
        /// Channels produced by the resample path.
        produced: usize,
        /// Channels declared for the destination branch.
        expected: usize,
    },

    /// Fusion operates on exactly 4 branches.
    #[error("fusion requires exactly 4 branches, got {0}")]
    FusionBranchCount(usize),

    /// Two adjacent components disagree on the branch widths between them.
    #[error("{junction}: upstream produces widths {produced:?}, downstream expects {expected:?}")]
    JunctionMismatch {
        /// The junction, named by its two components.
        junction: String,
        /// Widths produced by the upstream component.
        produced: Vec<usize>,
        /// Widths consumed by the downstream component.
        expected: Vec<usize>,
    },

    /// A stage or chain with no blocks.
    #[error("invalid block count {0}; must be at least 1")]
    InvalidBlockCount(usize),
}

/// Result alias for `HRNet` config validation.
pub type HRNetConfigResult<T> = Result<T, HRNetConfigError>;
