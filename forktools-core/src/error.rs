use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Command `{program}` failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Manifest parse error at line {line}: {message}")]
    ManifestParse { line: usize, message: String },

    #[error("Manifest variable not found: {0}")]
    MissingVariable(String),

    #[error("Unsupported manifest value for {0}")]
    UnsupportedValue(String),

    #[error("Builder version `{0}` not found in properties")]
    BuilderVersionNotFound(String),

    #[error("Tag not found in history: {0}")]
    TagNotFound(String),

    #[error("Expected two tags in history, found {0}")]
    NotEnoughTags(usize),

    #[error("No GIT tag found/available for commit '{0}'")]
    NoTagForCommit(String),
}
