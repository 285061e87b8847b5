use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::{Experiment, Libraries, Library, PipelineConfig, Sample};
use crate::error::PrepError;

pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";
pub const SHEETS_TOKEN_ENV: &str = "DIMSUM_PREP_SHEETS_TOKEN";

const LIBRARIES_SHEET: &str = "libraries";
const EXPERIMENTS_SHEET: &str = "experiments";
const SAMPLES_SHEET: &str = "samples";

const LIBRARY_COLUMNS: [&str; 3] = ["library_id", "wildtypeSequence", "maxSubstitutions"];

const EXPERIMENT_COLUMNS: [&str; 45] = [
    "library_id",
    "experiment_id",
    "Assay",
    "projectName",
    "startStage",
    "stopStage",
    "barcodeDesignPath",
    "barcodeErrorRate",
    "experimentDesignPairDuplicates",
    "countPath",
    "barcodeIdentityPath",
    "cutadapt5First",
    "cutadapt5Second",
    "cutadaptMinLength",
    "cutadaptErrorRate",
    "cutadaptOverlap",
    "cutadaptCut5First",
    "cutadaptCut5Second",
    "cutadaptCut3First",
    "cutadaptCut3Second",
    "vsearchMinQual",
    "vsearchMaxQual",
    "vsearchMaxee",
    "vsearchMinovlen",
    "reverseComplement",
    "wildtypeSequence",
    "permittedSequences",
    "sequenceType",
    "mutagenesisType",
    "indels",
    "maxSubstitutions",
    "mixedSubstitutions",
    "fitnessMinInputCountAll",
    "fitnessMinInputCountAny",
    "fitnessMinOutputCountAll",
    "fitnessMinOutputCountAny",
    "fitnessNormalise",
    "fitnessErrorModel",
    "fitnessDropoutPseudocount",
    "retainedReplicates",
    "stranded",
    "paired",
    "synonymSequencePath",
    "transLibrary",
    "transLibraryReverseComplement",
];

const SAMPLE_COLUMNS: [&str; 6] = [
    "experiment_id",
    "sample_id",
    "selection",
    "experiment_replicate",
    "selection_time",
    "cell_density",
];

pub trait MetadataService: Send + Sync {
    fn fetch_tree(&self, sheet_id: &str) -> Result<Libraries, PrepError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub column_headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn from_values(name: &str, values: Vec<Vec<Value>>) -> Self {
        let mut rows = values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect::<Vec<_>>());
        let column_headers = rows.next().unwrap_or_default();
        Self {
            name: name.to_string(),
            column_headers,
            rows: rows.collect(),
        }
    }

    pub fn columns<'a>(&'a self, names: &'a [&'a str]) -> Result<Vec<Record<'a>>, PrepError> {
        if self.rows.is_empty() {
            return Err(PrepError::NoSheetData(self.name.clone()));
        }

        let indices = names
            .iter()
            .map(|name| {
                self.column_headers
                    .iter()
                    .position(|header| header.trim() == *name)
                    .ok_or_else(|| PrepError::MissingColumn {
                        sheet: self.name.clone(),
                        column: (*name).to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self
            .rows
            .iter()
            .map(|row| Record {
                columns: names,
                values: indices
                    .iter()
                    .map(|&i| row.get(i).map(|cell| cell.trim()).unwrap_or(""))
                    .collect(),
            })
            .collect())
    }
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug)]
pub struct Record<'a> {
    columns: &'a [&'a str],
    values: Vec<&'a str>,
}

impl<'a> Record<'a> {
    pub fn text(&self, column: &str) -> &'a str {
        self.columns
            .iter()
            .position(|name| *name == column)
            .and_then(|i| self.values.get(i).copied())
            .unwrap_or("")
    }

    pub fn number(&self, column: &str) -> Result<u32, PrepError> {
        Ok(self.optional_number(column)?.unwrap_or(0))
    }

    pub fn optional_number(&self, column: &str) -> Result<Option<u32>, PrepError> {
        let value = self.text(column);
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse()
            .map(Some)
            .map_err(|_| invalid_cell(column, value))
    }

    pub fn flag(&self, column: &str) -> Result<bool, PrepError> {
        match self.text(column) {
            "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            other => Err(invalid_cell(column, other)),
        }
    }

    pub fn float_text(&self, column: &str) -> Result<String, PrepError> {
        let value = self.text(column);
        if !value.is_empty() && value.parse::<f64>().is_err() {
            return Err(invalid_cell(column, value));
        }
        Ok(value.to_string())
    }
}

fn invalid_cell(column: &str, value: &str) -> PrepError {
    PrepError::InvalidCell {
        column: column.to_string(),
        value: value.to_string(),
    }
}

pub fn build_libraries(
    libraries: &Sheet,
    experiments: &Sheet,
    samples: &Sheet,
) -> Result<Libraries, PrepError> {
    let mut libs = Vec::<Library>::new();
    let mut library_lookup = HashMap::<String, usize>::new();

    for record in libraries.columns(&LIBRARY_COLUMNS)? {
        let library = Library {
            library_id: record.text("library_id").to_string(),
            wildtype_sequence: record.text("wildtypeSequence").to_string(),
            max_substitutions: record.number("maxSubstitutions")?,
            ..Library::default()
        };
        library_lookup.insert(library.library_id.clone(), libs.len());
        libs.push(library);
    }

    let mut experiment_lookup = HashMap::<String, (usize, usize)>::new();

    for record in experiments.columns(&EXPERIMENT_COLUMNS)? {
        let library_id = record.text("library_id");
        let &library_index = library_lookup
            .get(library_id)
            .ok_or_else(|| PrepError::MissingLibrary(library_id.to_string()))?;
        let library = &mut libs[library_index];
        let experiment = experiment_from_record(&record, library)?;
        experiment_lookup.insert(
            experiment.experiment_id.clone(),
            (library_index, library.experiments.len()),
        );
        library.experiments.push(experiment);
    }

    for record in samples.columns(&SAMPLE_COLUMNS)? {
        let experiment_id = record.text("experiment_id");
        let &(library_index, experiment_index) = experiment_lookup
            .get(experiment_id)
            .ok_or_else(|| PrepError::MissingExperiment(experiment_id.to_string()))?;
        let sample = Sample {
            sample_name: record.text("sample_id").to_string(),
            selection: record.text("selection").parse()?,
            experiment_replicate: record.number("experiment_replicate")?,
            selection_time: record.float_text("selection_time")?,
            cell_density: record.float_text("cell_density")?,
            ..Sample::default()
        };
        libs[library_index].experiments[experiment_index]
            .samples
            .push(sample);
    }

    Ok(Libraries::new(libs))
}

fn experiment_from_record(record: &Record<'_>, library: &Library) -> Result<Experiment, PrepError> {
    let wildtype_sequence = match record.text("wildtypeSequence") {
        "" => library.wildtype_sequence.clone(),
        own => own.to_string(),
    };
    let max_substitutions = record
        .optional_number("maxSubstitutions")?
        .unwrap_or(library.max_substitutions);

    let pipeline = PipelineConfig {
        start_stage: record.number("startStage")?,
        stop_stage: record.number("stopStage")?,
        barcode_design_path: record.text("barcodeDesignPath").to_string(),
        barcode_error_rate: record.float_text("barcodeErrorRate")?,
        experiment_design_pair_duplicates: record.flag("experimentDesignPairDuplicates")?,
        count_path: record.text("countPath").to_string(),
        barcode_identity_path: record.text("barcodeIdentityPath").to_string(),
        cutadapt5_first: record.text("cutadapt5First").to_string(),
        cutadapt5_second: record.text("cutadapt5Second").to_string(),
        cutadapt_min_length: record.number("cutadaptMinLength")?,
        cutadapt_error_rate: record.float_text("cutadaptErrorRate")?,
        cutadapt_overlap: record.number("cutadaptOverlap")?,
        cutadapt_cut5_first: record.text("cutadaptCut5First").to_string(),
        cutadapt_cut5_second: record.text("cutadaptCut5Second").to_string(),
        cutadapt_cut3_first: record.text("cutadaptCut3First").to_string(),
        cutadapt_cut3_second: record.text("cutadaptCut3Second").to_string(),
        vsearch_min_qual: record.number("vsearchMinQual")?,
        vsearch_max_qual: record.number("vsearchMaxQual")?,
        vsearch_maxee: record.number("vsearchMaxee")?,
        vsearch_minovlen: record.number("vsearchMinovlen")?,
        reverse_complement: record.flag("reverseComplement")?,
        permitted_sequences: record.text("permittedSequences").to_string(),
        sequence_type: record.text("sequenceType").parse()?,
        mutagenesis_type: record.text("mutagenesisType").parse()?,
        indels: record.text("indels").to_string(),
        mixed_substitutions: record.flag("mixedSubstitutions")?,
        fitness_min_input_count_all: record.number("fitnessMinInputCountAll")?,
        fitness_min_input_count_any: record.number("fitnessMinInputCountAny")?,
        fitness_min_output_count_all: record.number("fitnessMinOutputCountAll")?,
        fitness_min_output_count_any: record.number("fitnessMinOutputCountAny")?,
        fitness_normalise: record.flag("fitnessNormalise")?,
        fitness_error_model: record.flag("fitnessErrorModel")?,
        fitness_dropout_pseudocount: record.number("fitnessDropoutPseudocount")?,
        retained_replicates: record.text("retainedReplicates").to_string(),
        stranded: record.flag("stranded")?,
        paired: record.flag("paired")?,
        synonym_sequence_path: record.text("synonymSequencePath").to_string(),
        trans_library: record.flag("transLibrary")?,
        trans_library_reverse_complement: record.flag("transLibraryReverseComplement")?,
    };

    Ok(Experiment {
        experiment_id: record.text("experiment_id").to_string(),
        assay: record.text("Assay").to_string(),
        project_name: record.text("projectName").to_string(),
        wildtype_sequence,
        max_substitutions,
        pipeline,
        samples: Vec::new(),
    })
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Clone)]
pub struct SheetsHttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl SheetsHttpClient {
    pub fn new(base_url: &str) -> Result<Self, PrepError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dimsum-prep/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PrepError::SheetsHttp(err.to_string()))?,
        );

        let token = std::env::var(SHEETS_TOKEN_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PrepError::SheetsHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn read(&self, sheet_id: &str, sheet_name: &str) -> Result<Sheet, PrepError> {
        let url = format!(
            "{}/spreadsheets/{sheet_id}/values/{sheet_name}",
            self.base_url
        );
        debug!(sheet = sheet_name, "reading sheet");
        let response = self.send_with_retries(|| {
            let request = self.client.get(&url);
            match &self.token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "Sheets request failed".to_string());
            return Err(PrepError::SheetsStatus { status, message });
        }

        let range: ValueRange = response
            .json()
            .map_err(|err| PrepError::SheetsHttp(err.to_string()))?;
        Ok(Sheet::from_values(sheet_name, range.values))
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, PrepError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    if attempt < MAX_RETRIES && is_retryable_status(resp.status().as_u16()) {
                        backoff(BASE_DELAY_MS, attempt);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        backoff(BASE_DELAY_MS, attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(PrepError::SheetsHttp(err.to_string()));
                }
            }
        }
    }
}

impl MetadataService for SheetsHttpClient {
    fn fetch_tree(&self, sheet_id: &str) -> Result<Libraries, PrepError> {
        let libraries = self.read(sheet_id, LIBRARIES_SHEET)?;
        let experiments = self.read(sheet_id, EXPERIMENTS_SHEET)?;
        let samples = self.read(sheet_id, SAMPLES_SHEET)?;
        build_libraries(&libraries, &experiments, &samples)
    }
}

fn backoff(base_delay_ms: u64, attempt: usize) {
    let delay = base_delay_ms * (attempt as u64 + 1);
    std::thread::sleep(Duration::from_millis(delay));
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::domain::{MutagenesisType, Selection, SequenceType};

    fn sheet(name: &str, header: &[&str], rows: &[&[&str]]) -> Sheet {
        Sheet {
            name: name.to_string(),
            column_headers: header.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    fn libraries_sheet() -> Sheet {
        sheet(
            "libraries",
            &LIBRARY_COLUMNS,
            &[&["lib1", "ACGT", "3"], &["lib2", "TTTT", "2"]],
        )
    }

    fn experiments_sheet(rows: &[&[(&str, &str)]]) -> Sheet {
        let rows = rows
            .iter()
            .map(|cells| {
                EXPERIMENT_COLUMNS
                    .iter()
                    .map(|column| {
                        cells
                            .iter()
                            .find(|(name, _)| name == column)
                            .map(|(_, value)| value.to_string())
                            .unwrap_or_default()
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        Sheet {
            name: "experiments".to_string(),
            column_headers: EXPERIMENT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn samples_sheet() -> Sheet {
        sheet(
            "samples",
            &SAMPLE_COLUMNS,
            &[
                &["exp1", "sample1", "input", "1", "", "0.05"],
                &["exp1", "sample2", "output", "1", "4.5", "1.2"],
                &["exp2", "sample3", "input", "1", "", ""],
            ],
        )
    }

    #[test]
    fn from_values_takes_header_and_stringifies_cells() {
        let values = vec![
            vec![json!("library_id"), json!("maxSubstitutions")],
            vec![json!("lib1"), json!(3)],
            vec![json!("lib2")],
        ];
        let sheet = Sheet::from_values("libraries", values);
        assert_eq!(sheet.column_headers, vec!["library_id", "maxSubstitutions"]);
        assert_eq!(sheet.rows[0], vec!["lib1", "3"]);

        let records = sheet.columns(&["maxSubstitutions", "library_id"]).unwrap();
        assert_eq!(records[0].text("maxSubstitutions"), "3");
        assert_eq!(records[1].text("maxSubstitutions"), "");
        assert_eq!(records[1].text("library_id"), "lib2");
        assert!(format!("{:?}", records[0]).contains("lib1"));
    }

    #[test]
    fn columns_reports_missing_header_and_empty_sheet() {
        let sheet = libraries_sheet();
        assert_matches!(
            sheet.columns(&["library_id", "nope"]),
            Err(PrepError::MissingColumn { column, .. }) if column == "nope"
        );

        let empty = Sheet::from_values("samples", vec![vec![json!("sample_id")]]);
        assert_matches!(empty.columns(&["sample_id"]), Err(PrepError::NoSheetData(_)));
    }

    #[test]
    fn build_tree_inherits_library_defaults() {
        let experiments = experiments_sheet(&[
            &[
                ("library_id", "lib1"),
                ("experiment_id", "exp1"),
                ("cutadapt5First", "AAAA"),
                ("vsearchMinQual", "20"),
                ("sequenceType", "coding"),
                ("paired", "TRUE"),
                ("barcodeErrorRate", "0.25"),
            ],
            &[
                ("library_id", "lib1"),
                ("experiment_id", "exp2"),
                ("wildtypeSequence", "GGGG"),
                ("maxSubstitutions", "5"),
                ("mutagenesisType", "codon"),
            ],
        ]);

        let libs = build_libraries(&libraries_sheet(), &experiments, &samples_sheet()).unwrap();
        assert_eq!(libs.len(), 2);

        let lib1 = &libs.0[0];
        assert_eq!(lib1.experiments.len(), 2);
        assert!(libs.0[1].experiments.is_empty());

        let exp1 = &lib1.experiments[0];
        assert_eq!(exp1.wildtype_sequence, "ACGT");
        assert_eq!(exp1.max_substitutions, 3);
        assert_eq!(exp1.pipeline.cutadapt5_first, "AAAA");
        assert_eq!(exp1.pipeline.vsearch_min_qual, 20);
        assert_eq!(exp1.pipeline.sequence_type, SequenceType::Coding);
        assert_eq!(exp1.pipeline.mutagenesis_type, MutagenesisType::Random);
        assert!(exp1.pipeline.paired);
        assert_eq!(exp1.pipeline.barcode_error_rate, "0.25");
        assert_eq!(exp1.samples.len(), 2);
        assert_eq!(exp1.samples[1].sample_name, "sample2");
        assert_eq!(exp1.samples[1].selection, Selection::Output);
        assert_eq!(exp1.samples[1].selection_time, "4.5");
        assert_eq!(exp1.samples[0].cell_density, "0.05");
        assert!(exp1.samples[0].sample_id.is_empty());

        let exp2 = &lib1.experiments[1];
        assert_eq!(exp2.wildtype_sequence, "GGGG");
        assert_eq!(exp2.max_substitutions, 5);
        assert_eq!(exp2.pipeline.mutagenesis_type, MutagenesisType::Codon);
        assert_eq!(exp2.samples.len(), 1);
    }

    #[test]
    fn build_tree_rejects_unknown_references() {
        let experiments = experiments_sheet(&[&[("library_id", "libX"), ("experiment_id", "exp1")]]);
        assert_matches!(
            build_libraries(&libraries_sheet(), &experiments, &samples_sheet()),
            Err(PrepError::MissingLibrary(id)) if id == "libX"
        );

        let experiments = experiments_sheet(&[&[("library_id", "lib1"), ("experiment_id", "exp1")]]);
        assert_matches!(
            build_libraries(&libraries_sheet(), &experiments, &samples_sheet()),
            Err(PrepError::MissingExperiment(id)) if id == "exp2"
        );
    }

    #[test]
    fn build_tree_rejects_malformed_cells() {
        let experiments = experiments_sheet(&[
            &[("library_id", "lib1"), ("experiment_id", "exp1"), ("startStage", "one")],
            &[("library_id", "lib1"), ("experiment_id", "exp2")],
        ]);
        assert_matches!(
            build_libraries(&libraries_sheet(), &experiments, &samples_sheet()),
            Err(PrepError::InvalidCell { column, .. }) if column == "startStage"
        );

        let experiments = experiments_sheet(&[
            &[("library_id", "lib1"), ("experiment_id", "exp1")],
            &[("library_id", "lib1"), ("experiment_id", "exp2")],
        ]);
        let samples = sheet(
            "samples",
            &SAMPLE_COLUMNS,
            &[&["exp1", "sample1", "input", "1", "", "dense"]],
        );
        assert_matches!(
            build_libraries(&libraries_sheet(), &experiments, &samples),
            Err(PrepError::InvalidCell { column, .. }) if column == "cell_density"
        );
    }
}
