//! Client for the Virtual Geneticist genomics analysis API
//!
//! Uploads VCF and clinical files, creates SNP, TRIO and CARRIER analysis tasks, checks their
//! status, and does the same in bulk from a CSV manifest.

/// Analysis modes and reference assemblies
pub mod mode;

/// API location, token file and output locations
pub mod settings;

/// HTTP client, failure classification and retries
pub mod api;

/// Task configuration loading and validation
pub mod request;

/// Single file uploads and the upload ledger
pub mod upload;

/// Task creation
pub mod task;

/// Status checks and monitoring
pub mod status;

/// CSV driven batch runs
pub mod batch;
