use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::domain::{Experiment, Libraries, Library, Sample, SampleKey};
use crate::error::PrepError;
use crate::registry::{RegistrySample, SampleRegistry};
use crate::sheets::MetadataService;

pub trait MetadataSource: Send + Sync {
    fn fetch(&self, sponsor: &str) -> Result<Libraries, PrepError>;
}

pub struct MetadataFetcher<R: SampleRegistry, M: MetadataService> {
    registry: R,
    metadata: M,
    sheet_id: String,
}

impl<R: SampleRegistry, M: MetadataService> MetadataFetcher<R, M> {
    pub fn new(registry: R, metadata: M, sheet_id: impl Into<String>) -> Self {
        Self {
            registry,
            metadata,
            sheet_id: sheet_id.into(),
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }
}

impl<R: SampleRegistry, M: MetadataService> MetadataSource for MetadataFetcher<R, M> {
    fn fetch(&self, sponsor: &str) -> Result<Libraries, PrepError> {
        let registered = self.registry.samples_for_sponsor(sponsor)?;
        debug!(sponsor, samples = registered.len(), "queried sample registry");

        let tree = self.metadata.fetch_tree(&self.sheet_id)?;
        debug!(
            sponsor,
            libraries = tree.len(),
            samples = tree.sample_count(),
            "read sheet metadata"
        );

        let consolidated = consolidate(&registered, tree);
        debug!(
            sponsor,
            libraries = consolidated.len(),
            samples = consolidated.sample_count(),
            "consolidated metadata"
        );
        Ok(consolidated)
    }
}

/// Joins registry records onto the spreadsheet tree by sample name.
pub fn consolidate(registered: &[RegistrySample], tree: Libraries) -> Libraries {
    let mut by_name = HashMap::<&str, Vec<&RegistrySample>>::new();
    for record in registered {
        by_name
            .entry(record.sample_name.as_str())
            .or_default()
            .push(record);
    }

    let mut seen = HashSet::<SampleKey>::new();

    tree.into_iter()
        .filter_map(|library| consolidate_library(library, &by_name, &mut seen))
        .collect()
}

fn consolidate_library(
    library: Library,
    by_name: &HashMap<&str, Vec<&RegistrySample>>,
    seen: &mut HashSet<SampleKey>,
) -> Option<Library> {
    let mut study: Option<&RegistrySample> = None;

    let experiments = library
        .experiments
        .iter()
        .filter_map(|experiment| {
            let mut samples = Vec::new();
            for sheet_sample in &experiment.samples {
                let Some(records) = by_name.get(sheet_sample.sample_name.as_str()) else {
                    continue;
                };
                for (index, record) in records.iter().enumerate() {
                    let sample = merge_sample(sheet_sample, record, index);
                    if !seen.insert(sample.key()) {
                        warn!(
                            key = %sample.key(),
                            experiment = %experiment.experiment_id,
                            "dropping duplicate sample"
                        );
                        continue;
                    }
                    match study {
                        Some(first) if first.study_id != record.study_id => warn!(
                            library = %library.library_id,
                            kept = %first.study_id,
                            ignored = %record.study_id,
                            "library spans several studies, keeping the first"
                        ),
                        Some(_) => {}
                        None => study = Some(*record),
                    }
                    samples.push(sample);
                }
            }
            (!samples.is_empty()).then(|| experiment.with_samples(samples))
        })
        .collect::<Vec<Experiment>>();

    if experiments.is_empty() {
        return None;
    }

    let mut consolidated = library.with_experiments(experiments);
    if let Some(record) = study {
        consolidated.study_id = record.study_id.clone();
        consolidated.study_name = record.study_name.clone();
    }
    Some(consolidated)
}

fn merge_sample(sheet_sample: &Sample, record: &RegistrySample, index: usize) -> Sample {
    Sample {
        sample_name: sheet_sample.sample_name.clone(),
        sample_id: record.sample_id.clone(),
        run_id: record.run_id.clone(),
        manual_qc: record.manual_qc,
        selection: sheet_sample.selection,
        experiment_replicate: sheet_sample.experiment_replicate,
        technical_replicate: u32::try_from(index + 1).unwrap_or(u32::MAX),
        selection_time: sheet_sample.selection_time.clone(),
        cell_density: sheet_sample.cell_density.clone(),
    }
}
