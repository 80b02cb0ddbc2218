use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as Json;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    /// Every step runs; snapshots must match `snapshots_file`.
    Success,
    /// The declaration is rejected before any instance exists.
    CompileError,
    /// Building the instance or one of the steps fails.
    RuntimeError,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpectedOutcome {
    pub snapshots_file: Option<String>,
    pub error_contains: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    #[serde(default)]
    pub description: String,
    pub expected: ExpectedOutcome,
    /// Build count per getter after the last step, optimizing backend only.
    #[serde(default)]
    pub builds: IndexMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub script_path: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }

    pub fn expected_snapshots(&self) -> Result<Option<Vec<Json>>> {
        let Some(file) = &self.spec.expected.snapshots_file else {
            return Ok(None);
        };
        let raw = self.read_text(file)?;
        let snapshots = serde_json::from_str(&raw)
            .with_context(|| format!("Parsing {} for case {}", file, self.name))?;
        Ok(Some(snapshots))
    }
}

pub fn load_cases(programs_dir: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();

    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        let case_path = path.join("case.yaml");
        if !case_path.exists() {
            continue;
        }

        let script_path = path.join("script.yaml");
        ensure!(
            script_path.exists(),
            "Missing script.yaml for case {}",
            path.display()
        );

        let case_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid case directory name {}", path.display()))?;
        let case_raw = fs::read_to_string(&case_path)
            .with_context(|| format!("Reading {}", case_path.display()))?;
        let spec: CaseSpec = serde_yaml::from_str(&case_raw)
            .with_context(|| format!("Parsing {}", case_path.display()))?;
        validate_spec(&case_name, &spec)?;

        cases.push(Case {
            name: case_name,
            dir: path,
            script_path,
            spec,
        });
    }

    ensure!(
        !cases.is_empty(),
        "No test cases found in {}",
        programs_dir.display()
    );
    cases.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(cases)
}

fn validate_spec(name: &str, spec: &CaseSpec) -> Result<()> {
    match spec.class {
        CaseClass::Success => ensure!(
            spec.expected.snapshots_file.is_some(),
            "Case {name} succeeds but has no snapshots_file"
        ),
        CaseClass::CompileError | CaseClass::RuntimeError => ensure!(
            spec.expected.error_contains.is_some(),
            "Case {name} fails but has no error_contains"
        ),
    }
    Ok(())
}
