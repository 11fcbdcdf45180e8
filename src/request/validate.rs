use std::path::Path;

use log::{info, warn};
use thiserror::Error;

use crate::mode::{Assembly, VcfMode};
use crate::request::config::{FileField, TaskConfig};

pub static MAX_NAME_CHARS: usize = 256;
pub static MAX_CLINICAL_CHARS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("{field} must be {max} characters or less")]
    TooLong { field: &'static str, max: usize },
    #[error("invalid {field}: {value:?}, must be one of {allowed}")]
    InvalidEnumValue { field: &'static str, value: String, allowed: &'static str },
    #[error("clinical information: {0}")]
    MissingClinicalInfo(String),
    #[error("{field} is required for {mode} mode")]
    MissingFieldForMode { mode: VcfMode, field: FileField },
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::MissingField(_) => "MissingField",
            ValidationError::TooLong { .. } => "FieldTooLong",
            ValidationError::InvalidEnumValue { .. } => "InvalidEnumValue",
            ValidationError::MissingClinicalInfo(_) => "MissingClinicalInfo",
            ValidationError::MissingFieldForMode { .. } => "MissingFieldForMode",
        }
    }
}

/// A configuration that passed every rule, with its enumerations parsed
#[derive(Debug, Clone, Copy)]
pub struct ValidTask<'a> {
    pub config: &'a TaskConfig,
    pub mode: VcfMode,
    pub assembly: Assembly,
}

/// Which file fields each mode needs, `upload_cnv` is never required
fn required_files(mode: VcfMode) -> &'static [FileField] {
    match mode {
        VcfMode::Snp => &[FileField::Vcf],
        VcfMode::Trio => &[FileField::Vcf, FileField::Father, FileField::Mother],
        VcfMode::Carrier => &[FileField::Father, FileField::Mother],
    }
}

/// Check a task configuration, first failing rule wins
///
/// 1. title and project are present and at most 256 characters
/// 2. vcf_mode and assembly are known values
/// 3. exactly one of clinical_info (at most 4096 characters) or upload_clinical (an existing file)
/// 4. the file fields the mode requires are present
///
/// Only touches the filesystem to check that upload_clinical exists.
pub fn validate(config: &TaskConfig) -> Result<ValidTask<'_>, ValidationError> {
    check_name("title", &config.title)?;
    check_name("project", &config.project)?;

    let mode = config.vcf_mode.parse::<VcfMode>().map_err(|_| ValidationError::InvalidEnumValue {
        field: "vcf_mode",
        value: config.vcf_mode.clone(),
        allowed: "SNP, TRIO, CARRIER",
    })?;
    let assembly = config.assembly.parse::<Assembly>().map_err(|_| ValidationError::InvalidEnumValue {
        field: "assembly",
        value: config.assembly.clone(),
        allowed: "hg19, hg38",
    })?;

    check_clinical(config.clinical_text(), config.file(FileField::Clinical))?;

    for field in required_files(mode) {
        if config.file(*field).is_none() {
            warn!("{} is missing {} for {} mode", config.title, field, mode);
            return Err(ValidationError::MissingFieldForMode { mode, field: *field });
        }
    }

    info!("Task config {} is valid ({} / {})", config.title, mode, assembly);
    Ok(ValidTask { config, mode, assembly })
}

fn check_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.chars().count() > MAX_NAME_CHARS {
        return Err(ValidationError::TooLong { field, max: MAX_NAME_CHARS });
    }
    Ok(())
}

fn check_clinical(text: Option<&str>, file: Option<&Path>) -> Result<(), ValidationError> {
    match (text, file) {
        (Some(_), Some(_)) => Err(ValidationError::MissingClinicalInfo(
            "set only one of clinical_info or upload_clinical".to_string(),
        )),
        (None, None) => Err(ValidationError::MissingClinicalInfo(
            "either clinical_info or upload_clinical is required".to_string(),
        )),
        (Some(text), None) if text.chars().count() > MAX_CLINICAL_CHARS => {
            Err(ValidationError::TooLong { field: "clinical_info", max: MAX_CLINICAL_CHARS })
        }
        (Some(_), None) => Ok(()),
        (None, Some(path)) if !path.is_file() => Err(ValidationError::MissingClinicalInfo(format!(
            "upload_clinical file not found: {}",
            path.display()
        ))),
        (None, Some(_)) => Ok(()),
    }
}
