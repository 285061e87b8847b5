use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PrepError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    #[default]
    Input,
    Output,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Input => write!(f, "input"),
            Selection::Output => write!(f, "output"),
        }
    }
}

impl FromStr for Selection {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "input" => Ok(Selection::Input),
            "output" => Ok(Selection::Output),
            _ => Err(PrepError::InvalidSelection(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceType {
    Noncoding,
    Coding,
    #[default]
    Auto,
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceType::Noncoding => write!(f, "noncoding"),
            SequenceType::Coding => write!(f, "coding"),
            SequenceType::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for SequenceType {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "noncoding" => Ok(SequenceType::Noncoding),
            "coding" => Ok(SequenceType::Coding),
            "auto" | "" => Ok(SequenceType::Auto),
            _ => Err(PrepError::InvalidSequenceType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutagenesisType {
    #[default]
    Random,
    Codon,
}

impl fmt::Display for MutagenesisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutagenesisType::Random => write!(f, "random"),
            MutagenesisType::Codon => write!(f, "codon"),
        }
    }
}

impl FromStr for MutagenesisType {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "random" | "" => Ok(MutagenesisType::Random),
            "codon" => Ok(MutagenesisType::Codon),
            _ => Err(PrepError::InvalidMutagenesisType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleKey {
    pub sample_id: String,
    pub run_id: String,
}

impl SampleKey {
    pub fn new(sample_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            run_id: run_id.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.sample_id.is_empty() && !self.run_id.is_empty()
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sample_id, self.run_id)
    }
}

impl FromStr for SampleKey {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (sample_id, run_id) = trimmed
            .rsplit_once('.')
            .ok_or_else(|| PrepError::InvalidSampleKey(value.to_string()))?;
        let key = SampleKey::new(sample_id, run_id);
        if !key.is_complete() {
            return Err(PrepError::InvalidSampleKey(value.to_string()));
        }
        Ok(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub sample_name: String,
    pub sample_id: String,
    pub run_id: String,
    pub manual_qc: bool,
    pub selection: Selection,
    pub experiment_replicate: u32,
    pub technical_replicate: u32,
    pub selection_time: String,
    pub cell_density: String,
}

impl Sample {
    pub fn key(&self) -> SampleKey {
        SampleKey::new(self.sample_id.clone(), self.run_id.clone())
    }

    pub fn selection_name(&self) -> String {
        format!("{}{}", self.selection, self.experiment_replicate)
    }

    pub fn selection_id(&self) -> u8 {
        match self.selection {
            Selection::Input => 0,
            Selection::Output => 1,
        }
    }

    pub fn cell_density_value(&self) -> f32 {
        self.cell_density.trim().parse().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub start_stage: u32,
    pub stop_stage: u32,
    pub barcode_design_path: String,
    pub barcode_error_rate: String,
    pub experiment_design_pair_duplicates: bool,
    pub count_path: String,
    pub barcode_identity_path: String,
    pub cutadapt5_first: String,
    pub cutadapt5_second: String,
    pub cutadapt_min_length: u32,
    pub cutadapt_error_rate: String,
    pub cutadapt_overlap: u32,
    pub cutadapt_cut5_first: String,
    pub cutadapt_cut5_second: String,
    pub cutadapt_cut3_first: String,
    pub cutadapt_cut3_second: String,
    pub vsearch_min_qual: u32,
    pub vsearch_max_qual: u32,
    pub vsearch_maxee: u32,
    pub vsearch_minovlen: u32,
    pub reverse_complement: bool,
    pub permitted_sequences: String,
    pub sequence_type: SequenceType,
    pub mutagenesis_type: MutagenesisType,
    pub indels: String,
    pub mixed_substitutions: bool,
    pub fitness_min_input_count_all: u32,
    pub fitness_min_input_count_any: u32,
    pub fitness_min_output_count_all: u32,
    pub fitness_min_output_count_any: u32,
    pub fitness_normalise: bool,
    pub fitness_error_model: bool,
    pub fitness_dropout_pseudocount: u32,
    pub retained_replicates: String,
    pub stranded: bool,
    pub paired: bool,
    pub synonym_sequence_path: String,
    pub trans_library: bool,
    pub trans_library_reverse_complement: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub assay: String,
    pub project_name: String,
    pub wildtype_sequence: String,
    pub max_substitutions: u32,
    pub pipeline: PipelineConfig,
    pub samples: Vec<Sample>,
}

impl Experiment {
    pub fn with_samples(&self, samples: Vec<Sample>) -> Self {
        Self {
            experiment_id: self.experiment_id.clone(),
            assay: self.assay.clone(),
            project_name: self.project_name.clone(),
            wildtype_sequence: self.wildtype_sequence.clone(),
            max_substitutions: self.max_substitutions,
            pipeline: self.pipeline.clone(),
            samples,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub library_id: String,
    pub study_id: String,
    pub study_name: String,
    pub wildtype_sequence: String,
    pub max_substitutions: u32,
    pub experiments: Vec<Experiment>,
}

impl Library {
    pub fn with_experiments(&self, experiments: Vec<Experiment>) -> Self {
        Self {
            library_id: self.library_id.clone(),
            study_id: self.study_id.clone(),
            study_name: self.study_name.clone(),
            wildtype_sequence: self.wildtype_sequence.clone(),
            max_substitutions: self.max_substitutions,
            experiments,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Libraries(pub Vec<Library>);

impl Libraries {
    pub fn new(libraries: Vec<Library>) -> Self {
        Self(libraries)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Library> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.iter()
            .flat_map(|library| &library.experiments)
            .map(|experiment| experiment.samples.len())
            .sum()
    }
}

impl FromIterator<Library> for Libraries {
    fn from_iter<I: IntoIterator<Item = Library>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Libraries {
    type Item = Library;
    type IntoIter = std::vec::IntoIter<Library>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Libraries {
    type Item = &'a Library;
    type IntoIter = std::slice::Iter<'a, Library>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_selection() {
        assert_eq!("input".parse::<Selection>().unwrap(), Selection::Input);
        assert_eq!("output".parse::<Selection>().unwrap(), Selection::Output);
        let err = "Output".parse::<Selection>().unwrap_err();
        assert_matches!(err, PrepError::InvalidSelection(_));
    }

    #[test]
    fn blank_enums_take_defaults() {
        assert_eq!("".parse::<SequenceType>().unwrap(), SequenceType::Auto);
        assert_eq!(
            "".parse::<MutagenesisType>().unwrap(),
            MutagenesisType::Random
        );
        assert_matches!(
            "indel".parse::<MutagenesisType>(),
            Err(PrepError::InvalidMutagenesisType(_))
        );
    }

    #[test]
    fn parse_sample_key_splits_at_last_dot() {
        let key: SampleKey = "6174STDY.1.49920".parse().unwrap();
        assert_eq!(key.sample_id, "6174STDY.1");
        assert_eq!(key.run_id, "49920");
        assert_eq!(key.to_string(), "6174STDY.1.49920");
    }

    #[test]
    fn parse_sample_key_invalid() {
        assert_matches!(
            "nodot".parse::<SampleKey>(),
            Err(PrepError::InvalidSampleKey(_))
        );
        assert_matches!(
            "sample.".parse::<SampleKey>(),
            Err(PrepError::InvalidSampleKey(_))
        );
    }

    #[test]
    fn sample_derived_names() {
        let sample = Sample {
            selection: Selection::Output,
            experiment_replicate: 2,
            cell_density: "0.8".to_string(),
            ..Sample::default()
        };
        assert_eq!(sample.selection_name(), "output2");
        assert_eq!(sample.selection_id(), 1);
        assert!((sample.cell_density_value() - 0.8).abs() < f32::EPSILON);

        let blank = Sample::default();
        assert_eq!(blank.cell_density_value(), 0.0);
        assert_eq!(blank.selection_name(), "input0");
    }
}
