use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum PrepError {
    #[error("no samples requested")]
    NoSamplesRequested,

    #[error("samples not found")]
    SamplesNotFound,

    #[error("not all samples in the same experiment")]
    NotAllSamplesInSameExperiment,

    #[error("invalid sample key (expected SAMPLE_ID.RUN_ID): {0}")]
    InvalidSampleKey(String),

    #[error("sample registry query failed: {0}")]
    Registry(String),

    #[error("sample registry connection is closed")]
    RegistryClosed,

    #[error("Sheets request failed: {0}")]
    SheetsHttp(String),

    #[error("Sheets returned status {status}: {message}")]
    SheetsStatus { status: u16, message: String },

    #[error("no data found in sheet {0}")]
    NoSheetData(String),

    #[error("sheet {sheet} has no column {column}")]
    MissingColumn { sheet: String, column: String },

    #[error("experiment's library not found in libraries sheet: {0}")]
    MissingLibrary(String),

    #[error("sample's experiment not found in experiments sheet: {0}")]
    MissingExperiment(String),

    #[error("invalid value in column {column}: {value:?}")]
    InvalidCell { column: String, value: String },

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("invalid sequence type: {0}")]
    InvalidSequenceType(String),

    #[error("invalid mutagenesis type: {0}")]
    InvalidMutagenesisType(String),

    #[error("missing config file dimsum-prep.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing required config value: {0}")]
    MissingConfigValue(String),

    #[error("refresh scheduler failed: {0}")]
    Scheduler(String),

    #[error("failed to write output: {0}")]
    Output(String),
}
