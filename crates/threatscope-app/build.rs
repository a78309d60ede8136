use std::fs;
use std::path::PathBuf;

fn main() {
    let manifest_dir = PathBuf::from(
        std::env::var("CARGO_MANIFEST_DIR").expect("threatscope-app build needs CARGO_MANIFEST_DIR"),
    );
    let version_path = manifest_dir
        .ancestors()
        .nth(2)
        .expect("threatscope-app lives two levels below the workspace root")
        .join("VERSION");

    println!("cargo:rerun-if-changed={}", version_path.display());

    let raw_version = fs::read_to_string(&version_path)
        .unwrap_or_else(|error| panic!("threatscope VERSION file {}: {error}", version_path.display()));
    let version = raw_version.trim();
    assert!(
        !version.is_empty(),
        "threatscope VERSION file must carry a non-empty version"
    );

    println!("cargo:rustc-env=THREATSCOPE_VERSION={version}");
}
