use std::path::PathBuf;
use std::sync::LazyLock;

/// `test_output/` at the workspace root, created on first use.
static TEST_OUTPUT_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("crate must live inside the workspace")
        .to_path_buf();
    let dir = workspace_root.join("test_output");
    std::fs::create_dir_all(&dir).expect("Failed to create test_output directory");
    dir
});

pub fn test_output_dir() -> PathBuf {
    TEST_OUTPUT_DIR.clone()
}

/// Path of a file inside the test output directory.
pub fn test_output_path(name: &str) -> PathBuf {
    TEST_OUTPUT_DIR.join(name)
}
