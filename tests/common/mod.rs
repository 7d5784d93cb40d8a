//! Shared helpers for caravel integration tests.

use std::collections::BTreeMap;
use std::path::Path;

use tempfile::TempDir;

use caravel::build::{BuildRunner, ScriptedBuildRunner};
use caravel::config::EngineConfig;
use caravel::{Engine, MemoryTransport, TransportRegistry};

/// An engine over a temp state directory wired to a memory transport.
pub struct TestHarness {
    pub state: TempDir,
    pub engine: Engine,
    pub transport: MemoryTransport,
}

pub fn harness() -> TestHarness {
    harness_with_build(Box::new(ScriptedBuildRunner::succeeding()))
}

pub fn harness_with_build(runner: Box<dyn BuildRunner>) -> TestHarness {
    let state = tempfile::tempdir().expect("temp state dir");
    let transport = MemoryTransport::new();
    let mut registry = TransportRegistry::empty();
    registry.register(Box::new(transport.clone()));
    let engine = Engine::with_parts(state.path(), EngineConfig::default(), registry, runner)
        .expect("engine opens");
    TestHarness {
        state,
        engine,
        transport,
    }
}

/// Credentials the memory transport accepts.
pub fn memory_creds() -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("token".to_string(), "valid".to_string());
    fields
}

/// Write a file tree under a fresh temp directory.
pub fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("temp project dir");
    write_tree(dir.path(), files);
    dir
}

pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(full, content).expect("write fixture file");
    }
}
