use std::env;
use std::path::{Component, Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use log::{info, warn};
use serde::Deserialize;

use crate::batch::BatchError;
use crate::request::config::TaskConfig;

/// Columns every manifest must have, `clinical_info` and `upload_cnv` are optional
pub static REQUIRED_COLUMNS: [&str; 8] =
    ["samples", "title", "project", "vcf_mode", "assembly", "upload_vcf", "upload_father", "upload_mother"];

/// Placeholder for a file that doesn't apply to the row (parents of SNP rows)
pub static NOT_APPLICABLE: &str = "NA";

/// One manifest row, values as written
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestRow {
    pub samples: String,
    pub title: String,
    pub project: String,
    pub vcf_mode: String,
    pub assembly: String,
    pub upload_vcf: String,
    pub upload_father: String,
    pub upload_mother: String,
    #[serde(default)]
    pub clinical_info: Option<String>,
    #[serde(default)]
    pub upload_cnv: Option<String>,
}

impl ManifestRow {
    /// Build a task config, resolving file columns against `data_dir`
    pub fn to_config(&self, data_dir: Option<&Path>) -> TaskConfig {
        TaskConfig {
            title: self.title.clone(),
            project: self.project.clone(),
            vcf_mode: self.vcf_mode.clone(),
            assembly: self.assembly.clone(),
            clinical_info: self.clinical_info.clone().filter(|text| !text.trim().is_empty()),
            upload_clinical: None,
            upload_vcf: resolve(&self.upload_vcf, data_dir),
            upload_father: resolve(&self.upload_father, data_dir),
            upload_mother: resolve(&self.upload_mother, data_dir),
            upload_cnv: self.upload_cnv.as_deref().and_then(|value| resolve(value, data_dir)),
        }
    }
}

/// Resolve a manifest file value to an absolute path, `NA` or empty means absent
///
/// The result is normalised so that spellings like `./a.vcf` and `a.vcf` share a ledger key.
pub fn resolve(value: &str, data_dir: Option<&Path>) -> Option<PathBuf> {
    let value = value.trim();
    if value.is_empty() || value == NOT_APPLICABLE {
        return None;
    }
    let joined = data_dir.map(Path::to_path_buf).unwrap_or_default().join(value);
    let absolute = match joined.is_absolute() {
        true => joined,
        false => env::current_dir().map(|cwd| cwd.join(&joined)).unwrap_or(joined),
    };
    Some(normalise(&absolute))
}

/// Drop `.` components and fold `..` into the preceding directory, without touching the filesystem
fn normalise(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = out.components().next_back();
                let below_dir = matches!(last, Some(Component::Normal(_)));
                let at_root = matches!(last, Some(Component::RootDir) | Some(Component::Prefix(_)));
                if below_dir {
                    out.pop();
                } else if !at_root {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

pub struct Manifest {
    pub rows: Vec<ManifestRow>,
}

/// Read and check the whole manifest before any row is processed
pub fn read_manifest(path: &Path) -> Result<Manifest, BatchError> {
    info!("Reading manifest {}", path.display());
    // rows may leave out trailing optional columns
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| BatchError::ManifestRead { path: path.to_path_buf(), source })?;

    let headers = reader
        .headers()
        .map_err(|source| BatchError::ManifestRead { path: path.to_path_buf(), source })?
        .clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|header| header == *column))
        .collect();
    if !missing.is_empty() {
        warn!("Manifest {} is missing columns {:?}", path.display(), missing);
        return Err(BatchError::MalformedManifest(format!("missing required column(s): {}", missing.join(", "))));
    }

    let mut rows = Vec::new();
    for (i, result) in reader.deserialize::<ManifestRow>().enumerate() {
        let row = result.map_err(|e| BatchError::MalformedManifest(format!("row {}: {}", i + 1, e)))?;
        rows.push(row);
    }

    info!("Manifest has {} rows", rows.len());
    Ok(Manifest { rows })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    static HEADER: &str = "samples,title,project,vcf_mode,assembly,upload_vcf,upload_father,upload_mother,clinical_info\n";

    fn write(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("samples.csv");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn reads_rows_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            &format!("{HEADER}P1,t1,proj,SNP,hg19,p1.vcf.gz,NA,NA,ataxia\nP2,t2,proj,TRIO,hg38,p2.vcf,f2.vcf,m2.vcf,\n"),
        );
        let manifest = read_manifest(&path).unwrap();
        assert_eq!(manifest.rows.len(), 2);
        assert_eq!(manifest.rows[0].title, "t1");
        assert_eq!(manifest.rows[1].clinical_info, None);
    }

    #[test]
    fn missing_column_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "samples,title,project,vcf_mode,assembly,upload_vcf\nP1,t1,proj,SNP,hg19,p1.vcf\n");
        match read_manifest(&path) {
            Err(BatchError::MalformedManifest(msg)) => {
                assert!(msg.contains("upload_father"));
                assert!(msg.contains("upload_mother"));
            }
            _ => panic!("expected a malformed manifest"),
        }
    }

    #[test]
    fn clinical_info_column_is_optional() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "samples,title,project,vcf_mode,assembly,upload_vcf,upload_father,upload_mother\nP1,t1,proj,SNP,hg19,p1.vcf,NA,NA\n",
        );
        let manifest = read_manifest(&path).unwrap();
        assert_eq!(manifest.rows[0].clinical_info, None);
    }

    #[test]
    fn short_row_leaves_optional_columns_empty() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, &format!("{HEADER}P1,t1,proj,SNP,hg19,p1.vcf,NA,NA,ataxia\nP2,t2,proj,SNP,hg19,p2.vcf,NA,NA\n"));
        let manifest = read_manifest(&path).unwrap();
        assert_eq!(manifest.rows.len(), 2);
        assert_eq!(manifest.rows[0].clinical_info.as_deref(), Some("ataxia"));
        assert_eq!(manifest.rows[1].clinical_info, None);
        assert_eq!(manifest.rows[1].upload_vcf, "p2.vcf");
    }

    #[test]
    fn equivalent_spellings_resolve_to_one_path() {
        let data = Some(Path::new("/data"));
        assert_eq!(resolve("./a.vcf", data), resolve("a.vcf", data));
        assert_eq!(resolve("sub/../a.vcf", data), Some(PathBuf::from("/data/a.vcf")));
        assert_eq!(resolve("/../a.vcf", None), Some(PathBuf::from("/a.vcf")));
    }

    #[test]
    fn na_and_empty_are_absent() {
        assert_eq!(resolve("NA", None), None);
        assert_eq!(resolve("  ", None), None);
        assert_eq!(resolve("/abs/p.vcf", Some(Path::new("/data"))), Some(PathBuf::from("/abs/p.vcf")));
        assert_eq!(resolve("p.vcf", Some(Path::new("/data"))), Some(PathBuf::from("/data/p.vcf")));
        assert!(resolve("p.vcf", None).unwrap().is_absolute());
    }

    #[test]
    fn snp_row_has_no_parents() {
        let row = ManifestRow {
            samples: "P1".into(),
            title: "t1".into(),
            project: "proj".into(),
            vcf_mode: "SNP".into(),
            assembly: "hg19".into(),
            upload_vcf: "p1.vcf.gz".into(),
            upload_father: "NA".into(),
            upload_mother: "NA".into(),
            clinical_info: Some("ataxia".into()),
            upload_cnv: None,
        };
        let config = row.to_config(Some(Path::new("/data")));
        assert_eq!(config.upload_vcf, Some(PathBuf::from("/data/p1.vcf.gz")));
        assert_eq!(config.upload_father, None);
        assert_eq!(config.upload_mother, None);
        assert_eq!(config.vcf_mode, "SNP");
    }
}
