//! Report generation through external report components
//!
//! A report component renders the scan result to an outfile; `report_as`
//! points it at a temp path, reads the bytes back and removes the file on
//! every exit path. A deletion failure is suppressed: when rendering failed
//! the file may never have existed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::grid::issues::Issue;
use crate::scan::state::ScanStats;

// ============================================================================
// Report data
// ============================================================================

/// Everything a report component gets to render
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportData {
    /// Scan target
    pub target: Option<String>,

    /// Complete sitemap of the scan
    pub sitemap: BTreeSet<String>,

    /// All findings
    pub issues: Vec<Issue>,

    /// Final statistics
    pub stats: ScanStats,

    /// Scanner version that produced the report
    pub version: String,
}

// ============================================================================
// Reporter seam
// ============================================================================

/// A report component
pub trait Reporter: Send + Sync {
    /// Component name, used in `report_as(name)`
    fn name(&self) -> &str;

    /// Whether the component can write to an outfile
    fn supports_outfile(&self) -> bool {
        true
    }

    /// Render the report to the given path
    fn write(&self, data: &ReportData, outfile: &Path) -> Result<()>;
}

/// Built-in JSON report component
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn name(&self) -> &str {
        "json"
    }

    fn write(&self, data: &ReportData, outfile: &Path) -> Result<()> {
        let rendered = serde_json::to_vec_pretty(data)?;
        fs::write(outfile, rendered)?;
        Ok(())
    }
}

// ============================================================================
// Report manager
// ============================================================================

/// Registry of report components
pub struct ReportManager {
    reporters: HashMap<String, Box<dyn Reporter>>,
}

impl ReportManager {
    /// Create a manager with the built-in components registered
    pub fn new() -> Self {
        let mut manager = Self {
            reporters: HashMap::new(),
        };
        manager.register(Box::new(JsonReporter));
        manager
    }

    /// Register a report component
    pub fn register(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.insert(reporter.name().to_string(), reporter);
    }

    /// Names of the registered components
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.reporters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Render the report with the named component and return the bytes
    pub fn report_as(&self, name: &str, data: &ReportData) -> Result<Vec<u8>> {
        let reporter = self
            .reporters
            .get(name)
            .ok_or_else(|| Error::ComponentNotFound(name.to_string()))?;

        if !reporter.supports_outfile() {
            return Err(Error::UnsupportedFormat(name.to_string()));
        }

        let outfile = Self::outfile_path(name);
        let result = reporter
            .write(data, &outfile)
            .and_then(|_| fs::read(&outfile).map_err(Error::from));

        // The file may not exist when rendering failed.
        let _ = fs::remove_file(&outfile);

        result
    }

    fn outfile_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gridscan_report_as.{name}"))
    }
}

impl Default for ReportManager {
    fn default() -> Self {
        Self::new()
    }
}
