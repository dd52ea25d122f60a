//! # Channel Schedule
//!
//! A [`ChannelSchedule`] is the fixed table of per-branch channel widths
//! at each stage. Stage ``k`` (0-indexed) has ``k + 1`` branches, and
//! branch ``i`` has width ``width * 2^i``:
//!
//! ```text
//! width=32: [[32], [32, 64], [32, 64, 128], [32, 64, 128, 256]]
//! ```

use crate::models::hrnet::errors::{HRNetConfigError, HRNetConfigResult};
use serde::{Deserialize, Serialize};

/// The width selectors accepted by [`ChannelSchedule::try_from_width`].
pub const SUPPORTED_WIDTHS: [usize; 3] = [16, 32, 64];

/// The number of stages in the standard schedule.
pub const NUM_STAGES: usize = 4;

/// Per-stage, per-branch channel widths.
///
/// Serializes as the nested width lists; deserialization validates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<usize>>", into = "Vec<Vec<usize>>")]
pub struct ChannelSchedule {
    stages: Vec<Vec<usize>>,
}

impl ChannelSchedule {
    /// Build the standard 4-stage schedule for a supported width selector.
    pub fn try_from_width(width: usize) -> HRNetConfigResult<Self> {
        if !SUPPORTED_WIDTHS.contains(&width) {
            return Err(HRNetConfigError::UnsupportedWidth {
                width,
                supported: SUPPORTED_WIDTHS.to_vec(),
            });
        }
        Ok(Self::doubling(width, NUM_STAGES))
    }

    /// Build a doubling schedule of ``num_stages`` stages from any base width.
    pub fn doubling(
        width: usize,
        num_stages: usize,
    ) -> Self {
        let stages = (0..num_stages)
            .map(|stage| (0..=stage).map(|branch| width << branch).collect())
            .collect();
        Self { stages }
    }

    /// Number of stages.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// The branch widths of stage ``idx``.
    pub fn stage(
        &self,
        idx: usize,
    ) -> &[usize] {
        &self.stages[idx]
    }

    /// All stages.
    pub fn stages(&self) -> &[Vec<usize>] {
        &self.stages
    }

    /// The branch widths of the final stage.
    pub fn last_stage(&self) -> &[usize] {
        &self.stages[self.stages.len() - 1]
    }

    /// The width of the first branch; the selector the schedule was built from.
    pub fn base_width(&self) -> usize {
        self.stages[0][0]
    }

    /// Check the doubling invariant.
    ///
    /// Stage ``k`` must have ``k + 1`` branches, repeat stage ``k - 1``
    /// as a prefix, and end with a branch twice as wide as the previous last.
    pub fn try_validate(&self) -> HRNetConfigResult<()> {
        for (k, stage) in self.stages.iter().enumerate() {
            if stage.len() != k + 1 {
                return Err(HRNetConfigError::StageBranchCount {
                    stage: k,
                    branches: stage.len(),
                });
            }
            if k == 0 {
                continue;
            }
            let prev = &self.stages[k - 1];
            for (i, &width) in stage.iter().enumerate() {
                let expected = if i < prev.len() {
                    prev[i]
                } else {
                    prev[i - 1] * 2
                };
                if width != expected {
                    return Err(HRNetConfigError::ScheduleMismatch {
                        source_branch: i.saturating_sub(1),
                        destination: i,
                        produced: expected,
                        expected: width,
                    });
                }
            }
        }
        Ok(())
    }
}

impl TryFrom<Vec<Vec<usize>>> for ChannelSchedule {
    type Error = HRNetConfigError;

    fn try_from(stages: Vec<Vec<usize>>) -> HRNetConfigResult<Self> {
        let schedule = Self { stages };
        schedule.try_validate()?;
        Ok(schedule)
    }
}

impl From<ChannelSchedule> for Vec<Vec<usize>> {
    fn from(schedule: ChannelSchedule) -> Self {
        schedule.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::IntoDeserializer;
    use serde::de::value::Error as ValueError;

    fn deserialize(stages: Vec<Vec<usize>>) -> Result<ChannelSchedule, ValueError> {
        ChannelSchedule::deserialize(
            <Vec<Vec<usize>> as IntoDeserializer<'_, ValueError>>::into_deserializer(stages),
        )
    }

    #[test]
    fn test_deserialize_validates() {
        let schedule = deserialize(vec![vec![8], vec![8, 16]]).unwrap();
        assert_eq!(schedule, ChannelSchedule::doubling(8, 2));

        let err = deserialize(vec![vec![8], vec![8, 24]]).unwrap_err();
        assert!(err.to_string().contains("24"), "{err}");

        let stages: Vec<Vec<usize>> = ChannelSchedule::doubling(4, 3).into();
        assert_eq!(stages, vec![vec![4], vec![4, 8], vec![4, 8, 16]]);
    }

    #[test]
    fn test_supported_widths() {
        for width in SUPPORTED_WIDTHS {
            let schedule = ChannelSchedule::try_from_width(width).unwrap();
            assert_eq!(schedule.num_stages(), NUM_STAGES);
            assert_eq!(schedule.base_width(), width);
            schedule.try_validate().unwrap();

            for k in 0..NUM_STAGES {
                let stage = schedule.stage(k);
                assert_eq!(stage.len(), k + 1);
                for (i, &c) in stage.iter().enumerate() {
                    assert_eq!(c, width * 2usize.pow(i as u32));
                }
            }
        }
    }

    #[test]
    fn test_width_32_table() {
        let schedule = ChannelSchedule::try_from_width(32).unwrap();
        assert_eq!(
            schedule.stages(),
            &[
                vec![32],
                vec![32, 64],
                vec![32, 64, 128],
                vec![32, 64, 128, 256]
            ]
        );
        assert_eq!(schedule.last_stage(), &[32, 64, 128, 256]);
    }

    #[test]
    fn test_unsupported_width() {
        assert_eq!(
            ChannelSchedule::try_from_width(24),
            Err(HRNetConfigError::UnsupportedWidth {
                width: 24,
                supported: vec![16, 32, 64],
            })
        );
    }

    #[test]
    fn test_try_from_stages() {
        let schedule = ChannelSchedule::try_from(vec![vec![8], vec![8, 16]]).unwrap();
        assert_eq!(schedule, ChannelSchedule::doubling(8, 2));

        assert!(matches!(
            ChannelSchedule::try_from(vec![vec![8], vec![8, 24]]),
            Err(HRNetConfigError::ScheduleMismatch { destination: 1, .. })
        ));
        assert!(matches!(
            ChannelSchedule::try_from(vec![vec![8], vec![8]]),
            Err(HRNetConfigError::StageBranchCount {
                stage: 1,
                branches: 1
            })
        ));
    }
}
