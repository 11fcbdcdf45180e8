use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::ConfigError;

/// File-typed fields of a task, in upload order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileField {
    Vcf,
    Father,
    Mother,
    Cnv,
    Clinical,
}

impl FileField {
    pub const UPLOAD_ORDER: [FileField; 5] = [FileField::Vcf, FileField::Father, FileField::Mother, FileField::Cnv, FileField::Clinical];

    /// JSON key used in configs and task requests
    pub fn name(&self) -> &'static str {
        match self {
            FileField::Vcf => "upload_vcf",
            FileField::Father => "upload_father",
            FileField::Mother => "upload_mother",
            FileField::Cnv => "upload_cnv",
            FileField::Clinical => "upload_clinical",
        }
    }
}

impl fmt::Display for FileField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A task definition as written by the user, before validation
///
/// `vcf_mode` and `assembly` are kept verbatim so that bad values can be reported instead of
/// failing deserialisation. File fields hold local paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub vcf_mode: String,
    #[serde(default)]
    pub assembly: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_clinical: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_vcf: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_father: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_mother: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_cnv: Option<PathBuf>,
}

impl TaskConfig {
    pub fn file(&self, field: FileField) -> Option<&Path> {
        let path = match field {
            FileField::Vcf => &self.upload_vcf,
            FileField::Father => &self.upload_father,
            FileField::Mother => &self.upload_mother,
            FileField::Cnv => &self.upload_cnv,
            FileField::Clinical => &self.upload_clinical,
        };
        path.as_deref().filter(|p| !p.as_os_str().is_empty())
    }

    /// Present file fields in upload order (vcf, father, mother, cnv, clinical)
    pub fn files(&self) -> Vec<(FileField, &Path)> {
        FileField::UPLOAD_ORDER
            .iter()
            .filter_map(|field| self.file(*field).map(|path| (*field, path)))
            .collect()
    }

    /// Free text clinical information, empty text counts as absent
    pub fn clinical_text(&self) -> Option<&str> {
        self.clinical_info.as_deref().filter(|text| !text.trim().is_empty())
    }
}

/// A task configuration JSON file on disk
pub struct ConfigFile {
    pub path: PathBuf,
    pub compiled_schema: JSONSchema,
}

impl ConfigFile {
    pub fn read(&self) -> Result<TaskConfig, ConfigError> {
        let json: Value = self.parse_untyped_json()?;

        match self.validate(&json) {
            Ok(_) => {
                info!("Task config is structurally valid");
                self.parse_json(json)
            }
            Err(err) => {
                warn!("Task config fails schema validation");
                Err(err)
            }
        }
    }

    fn validate(&self, json: &Value) -> Result<(), ConfigError> {
        info!("Validating task config against JSON schema");
        match self.compiled_schema.validate(json) {
            Ok(_) => Ok(()),
            Err(errors) => Err(ConfigError::Schema {
                path: self.path.clone(),
                errors: errors.map(|e| format!("{} at {}", e, e.instance_path)).collect(),
            }),
        }
    }

    fn read_file(&self) -> Result<String, ConfigError> {
        let path: &Path = self.path.as_path();
        info!("Reading task config at {}", path.display());
        fs::read_to_string(path).map_err(|source| {
            warn!("Can't read task config at path {}: {}", path.display(), source);
            ConfigError::Read { path: path.to_path_buf(), source }
        })
    }

    fn parse_json(&self, value: Value) -> Result<TaskConfig, ConfigError> {
        info!("Deserialising task config");
        serde_json::from_value::<TaskConfig>(value)
            .map_err(|source| ConfigError::Deserialisation { path: self.path.clone(), source })
    }

    fn parse_untyped_json(&self) -> Result<Value, ConfigError> {
        let json_string = self.read_file()?;
        serde_json::from_str::<Value>(&json_string)
            .map_err(|source| ConfigError::JsonDecode { path: self.path.clone(), source })
    }
}
