use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Analysis mode requested from the API
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VcfMode {
    /// Proband only
    Snp,
    /// Proband with father and mother
    Trio,
    /// Father and mother, proband optional
    Carrier,
}

impl fmt::Display for VcfMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VcfMode::Snp => write!(f, "SNP"),
            VcfMode::Trio => write!(f, "TRIO"),
            VcfMode::Carrier => write!(f, "CARRIER"),
        }
    }
}

impl FromStr for VcfMode {
    type Err = ();

    /// Exact match only, manifests and configs carry the upper case token verbatim
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SNP" => Ok(VcfMode::Snp),
            "TRIO" => Ok(VcfMode::Trio),
            "CARRIER" => Ok(VcfMode::Carrier),
            _ => Err(()),
        }
    }
}

/// Reference genome build
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assembly {
    Hg19,
    Hg38,
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Assembly::Hg19 => write!(f, "hg19"),
            Assembly::Hg38 => write!(f, "hg38"),
        }
    }
}

impl FromStr for Assembly {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hg19" => Ok(Assembly::Hg19),
            "hg38" => Ok(Assembly::Hg38),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_wire_tokens() {
        for mode in [VcfMode::Snp, VcfMode::Trio, VcfMode::Carrier] {
            assert_eq!(mode.to_string().parse::<VcfMode>(), Ok(mode));
        }
        assert_eq!("hg38".parse::<Assembly>(), Ok(Assembly::Hg38));
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert!("trio".parse::<VcfMode>().is_err());
        assert!("HG19".parse::<Assembly>().is_err());
        assert_eq!(serde_json::to_string(&VcfMode::Carrier).unwrap(), "\"CARRIER\"");
    }
}
