use std::collections::HashSet;

use crate::domain::{Libraries, Library, SampleKey};
use crate::error::PrepError;

impl Libraries {
    /// Returns a new Library holding only the experiment that contains the
    /// desired samples, with exactly those samples in their original order.
    ///
    /// Keys with a blank sample or run id are ignored. The first experiment
    /// (library order, then experiment order) with any match decides the
    /// outcome: if it lacks some of the desired samples the result is
    /// [`PrepError::NotAllSamplesInSameExperiment`], even when the remainder
    /// lives in a later experiment.
    pub fn subset(&self, desired: &[SampleKey]) -> Result<Library, PrepError> {
        let wanted = desired_keys(desired)?;

        for library in self {
            for experiment in &library.experiments {
                let samples = experiment
                    .samples
                    .iter()
                    .filter(|sample| wanted.contains(&sample.key()))
                    .cloned()
                    .collect::<Vec<_>>();

                if samples.is_empty() {
                    continue;
                }

                if samples.len() != wanted.len() {
                    return Err(PrepError::NotAllSamplesInSameExperiment);
                }

                return Ok(library.with_experiments(vec![experiment.with_samples(samples)]));
            }
        }

        Err(PrepError::SamplesNotFound)
    }
}

pub fn subset(tree: &Libraries, desired: &[SampleKey]) -> Result<Library, PrepError> {
    tree.subset(desired)
}

fn desired_keys(desired: &[SampleKey]) -> Result<HashSet<SampleKey>, PrepError> {
    let keys = desired
        .iter()
        .filter(|key| key.is_complete())
        .cloned()
        .collect::<HashSet<_>>();
    if keys.is_empty() {
        return Err(PrepError::NoSamplesRequested);
    }
    Ok(keys)
}
