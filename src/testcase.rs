//! Testcases: named batches of generated instances with their validity ledger,
//! hex-dump view, and on-disk layout under `<protocol_dir>/testcases/<name>/`.

use crate::ast::ResolvedSchema;
use crate::dump::hexdump;
use crate::fuzz::{Conformance, GenerateError, Generator, GeneratorConfig, MessageInstance, Modifier};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const TESTCASES_DIR: &str = "testcases";
pub const LEDGER_FILE: &str = "results.txt";
pub const BLOB_EXTENSION: &str = "bin";
pub const DUMP_EXTENSION: &str = "xxd";

#[derive(Debug, thiserror::Error)]
pub enum TestcaseError {
    #[error("Testcase already exists: {}", .0.display())]
    OutputCollision(PathBuf),
    #[error("Invalid testcase name: {0:?}")]
    InvalidName(String),
    #[error("IO: {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Ledger line {line:?}: {message}")]
    Ledger { line: String, message: String },
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TestcaseError + '_ {
    move |source| TestcaseError::Io { path: path.to_path_buf(), source }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSize {
    /// One instance per declared message type, in declaration order.
    OnePerType,
    /// This many instances, message types drawn uniformly with repetition.
    Count(usize),
}

/// What to do when an invalid instance is requested for a message type that
/// admits no corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyPoolPolicy {
    #[default]
    Abort,
    Skip,
    SubstituteValid,
}

impl FromStr for EmptyPoolPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(EmptyPoolPolicy::Abort),
            "skip" => Ok(EmptyPoolPolicy::Skip),
            "substitute-valid" | "substitute_valid" | "valid" => Ok(EmptyPoolPolicy::SubstituteValid),
            other => Err(format!("unknown policy {:?} (expected abort, skip or substitute-valid)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestcaseRequest {
    pub name: String,
    pub size: BatchSize,
    pub conformance: Conformance,
    pub on_empty_pool: EmptyPoolPolicy,
}

impl TestcaseRequest {
    pub fn new(name: impl Into<String>, size: BatchSize, conformance: Conformance) -> Self {
        TestcaseRequest { name: name.into(), size, conformance, on_empty_pool: EmptyPoolPolicy::default() }
    }
}

/// One line of `results.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: usize,
    pub message_type: String,
    /// Corrupted field and modifier; `None` for a valid instance.
    pub invalid: Option<(String, Modifier)>,
}

impl LedgerEntry {
    pub fn basename(&self) -> String {
        format!("{:04}_{}", self.id, self.message_type)
    }

    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }
}

impl From<&MessageInstance> for LedgerEntry {
    fn from(inst: &MessageInstance) -> Self {
        LedgerEntry {
            id: inst.id(),
            message_type: inst.message_type().to_string(),
            invalid: inst.invalid_field().map(|(f, m)| (f.to_string(), m)),
        }
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.invalid {
            None => write!(f, "{} - valid", self.basename()),
            Some((field, m)) => write!(f, "{} - invalid - {} - {}", self.basename(), field, m),
        }
    }
}

impl FromStr for LedgerEntry {
    type Err = TestcaseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = |message: &str| TestcaseError::Ledger { line: line.to_string(), message: message.to_string() };
        let parts: Vec<&str> = line.trim().splitn(4, " - ").collect();
        let (id, message_type) = parts[0].split_once('_').ok_or_else(|| bad("missing <id>_<type>"))?;
        let id = id.parse::<usize>().map_err(|_| bad("id is not a number"))?;
        let invalid = match parts.as_slice() {
            [_, "valid"] => None,
            [_, "invalid", field, modifier] => {
                Some((field.to_string(), modifier.parse().map_err(|e: String| bad(&e))?))
            }
            _ => return Err(bad("expected `valid` or `invalid - <field> - <modifier>`")),
        };
        Ok(LedgerEntry { id, message_type: message_type.to_string(), invalid })
    }
}

/// A named batch of generated instances. Built once, never modified.
#[derive(Debug, Clone)]
pub struct Testcase {
    name: String,
    instances: Vec<MessageInstance>,
}

impl Testcase {
    /// Run a generation request with a fresh generator, so ids start at zero.
    pub fn generate(
        schema: &ResolvedSchema,
        config: GeneratorConfig,
        request: &TestcaseRequest,
    ) -> Result<Testcase, TestcaseError> {
        validate_name(&request.name)?;
        let mut generator = Generator::new(schema, config);
        let plan = match request.size {
            BatchSize::OnePerType => schema.messages.iter().collect::<Vec<_>>(),
            BatchSize::Count(n) => (0..n).map(|_| generator.pick_message()).collect::<Result<Vec<_>, _>>()?,
        };
        tracing::info!(
            testcase = %request.name,
            instances = plan.len(),
            conformance = ?request.conformance,
            "generating testcase"
        );

        let mut instances = Vec::with_capacity(plan.len());
        for message in plan {
            match generator.generate_for(message, request.conformance) {
                Ok(inst) => instances.push(inst),
                Err(GenerateError::EmptyCandidatePool { message: name }) => match request.on_empty_pool {
                    EmptyPoolPolicy::Abort => return Err(GenerateError::EmptyCandidatePool { message: name }.into()),
                    EmptyPoolPolicy::Skip => tracing::warn!(message_type = %name, "no corruption possible, skipped"),
                    EmptyPoolPolicy::SubstituteValid => {
                        tracing::warn!(message_type = %name, "no corruption possible, emitting a valid instance");
                        instances.push(generator.generate_for(message, Conformance::Valid)?);
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Testcase { name: request.name.clone(), instances })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instances(&self) -> &[MessageInstance] {
        &self.instances
    }

    pub fn ledger(&self) -> Vec<LedgerEntry> {
        self.instances.iter().map(LedgerEntry::from).collect()
    }

    /// Contents of `results.txt`: one newline-terminated line per instance.
    pub fn ledger_text(&self) -> String {
        self.instances.iter().map(|i| format!("{}\n", i.ledger_line())).collect()
    }

    /// Contents of `<name>.xxd`: a tagged block per instance.
    pub fn hexdump_text(&self) -> String {
        let mut text = String::new();
        for inst in &self.instances {
            let tag = if inst.is_valid() { "[VALID]" } else { "[INVALID]" };
            text.push_str(&format!("{} {} {}\n{}\n\n", tag, inst.id(), inst.message_type(), hexdump(inst.bytes())));
        }
        text.trim_end().to_string()
    }

    /// Write into `<protocol_dir>/testcases/<name>/`. Files are staged in a hidden
    /// sibling directory and renamed into place; an existing testcase is never touched.
    /// Concurrent writers of the same name are not serialized.
    pub fn write(&self, protocol_dir: impl AsRef<Path>) -> Result<PathBuf, TestcaseError> {
        validate_name(&self.name)?;
        let root = protocol_dir.as_ref().join(TESTCASES_DIR);
        std::fs::create_dir_all(&root).map_err(io_error(&root))?;
        let target = root.join(&self.name);
        if target.exists() {
            return Err(TestcaseError::OutputCollision(target));
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&root)
            .map_err(io_error(&root))?;
        for inst in &self.instances {
            let path = staging.path().join(format!("{}.{}", inst.basename(), BLOB_EXTENSION));
            std::fs::write(&path, inst.bytes()).map_err(io_error(&path))?;
        }
        let ledger = staging.path().join(LEDGER_FILE);
        std::fs::write(&ledger, self.ledger_text()).map_err(io_error(&ledger))?;
        let dump = staging.path().join(format!("{}.{}", self.name, DUMP_EXTENSION));
        std::fs::write(&dump, self.hexdump_text()).map_err(io_error(&dump))?;

        // The check and the rename are two steps: on Unix a directory created at
        // `target` in between is replaced if it is still empty.
        if target.exists() {
            return Err(TestcaseError::OutputCollision(target));
        }
        let staged = staging.into_path();
        if let Err(source) = std::fs::rename(&staged, &target) {
            let _ = std::fs::remove_dir_all(&staged);
            return Err(TestcaseError::Io { path: target, source });
        }
        tracing::info!(path = %target.display(), instances = self.instances.len(), "testcase written");
        Ok(target)
    }

    /// Read a testcase directory back: ledger entries with their blobs, in ledger order.
    pub fn load(dir: impl AsRef<Path>) -> Result<LoadedTestcase, TestcaseError> {
        let dir = dir.as_ref();
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TestcaseError::InvalidName(dir.display().to_string()))?
            .to_string();
        let ledger_path = dir.join(LEDGER_FILE);
        let ledger = std::fs::read_to_string(&ledger_path).map_err(io_error(&ledger_path))?;
        let mut records = Vec::new();
        for line in ledger.lines().filter(|l| !l.trim().is_empty()) {
            let entry: LedgerEntry = line.parse()?;
            let path = dir.join(format!("{}.{}", entry.basename(), BLOB_EXTENSION));
            let bytes = std::fs::read(&path).map_err(io_error(&path))?;
            records.push(TestcaseRecord { entry, bytes });
        }
        Ok(LoadedTestcase { name, records })
    }
}

fn validate_name(name: &str) -> Result<(), TestcaseError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != TESTCASES_DIR;
    if ok {
        Ok(())
    } else {
        Err(TestcaseError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestcaseRecord {
    pub entry: LedgerEntry,
    pub bytes: Vec<u8>,
}

/// A testcase read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTestcase {
    pub name: String,
    pub records: Vec<TestcaseRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_entry_parses_both_forms() {
        let valid: LedgerEntry = "0000_UDP - valid".parse().expect("valid");
        assert_eq!(valid, LedgerEntry { id: 0, message_type: "UDP".into(), invalid: None });

        let line = "0012_MY_MSG - invalid - hdr.len - LOW_LIST_LENGTH";
        let invalid: LedgerEntry = line.parse().expect("invalid");
        assert_eq!(invalid.id, 12);
        assert_eq!(invalid.message_type, "MY_MSG");
        assert_eq!(invalid.invalid, Some(("hdr.len".to_string(), Modifier::LowListLength)));
        assert_eq!(invalid.to_string(), line);
    }

    #[test]
    fn ledger_entry_rejects_garbage() {
        for line in ["", "UDP - valid", "0001_UDP - maybe", "0001_UDP - invalid - f - SIDEWAYS"] {
            assert!(line.parse::<LedgerEntry>().is_err(), "{:?}", line);
        }
    }

    #[test]
    fn policy_names() {
        assert_eq!("skip".parse::<EmptyPoolPolicy>(), Ok(EmptyPoolPolicy::Skip));
        assert_eq!("substitute-valid".parse::<EmptyPoolPolicy>(), Ok(EmptyPoolPolicy::SubstituteValid));
        assert!("retry".parse::<EmptyPoolPolicy>().is_err());
    }

    #[test]
    fn names_must_be_plain() {
        assert!(validate_name("run1").is_ok());
        for bad in ["", ".hidden", "a/b", "testcases"] {
            assert!(validate_name(bad).is_err(), "{:?}", bad);
        }
    }
}
