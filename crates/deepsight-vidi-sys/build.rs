use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=VIDI_SDK_DIR");

    // The vendor SDK is proprietary and not present on most build hosts.
    // Without it we still build the declarations (nothing references the
    // symbols until the `vendor` feature of deepsight-client is enabled),
    // we just emit no link directives.
    let Some(sdk_dir) = find_sdk_dir() else {
        println!("cargo:warning=ViDi SDK not found — building without linking (set VIDI_SDK_DIR)");
        return;
    };

    let lib_dir = sdk_dir.join("lib");
    let search = if lib_dir.exists() { lib_dir } else { sdk_dir };
    println!("cargo:rustc-link-search=native={}", search.display());
    println!("cargo:rustc-link-lib=dylib=vidi_runtime");
    println!("cargo:rustc-link-lib=dylib=vidi_training");
}

fn find_sdk_dir() -> Option<PathBuf> {
    let dir = PathBuf::from(env::var("VIDI_SDK_DIR").ok()?);
    dir.exists().then_some(dir)
}
