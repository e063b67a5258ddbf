fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let exporting = std::env::var_os("CARGO_FEATURE_EXPORT").is_some();

    match target_os.as_str() {
        "linux" => {
            // dlsym lives in libdl on older glibc.
            println!("cargo:rustc-link-lib=dl");
            if !exporting {
                return;
            }
            // Only the allocator entry points and the fencemalloc_* diagnostics
            // leave the shared object.
            let script = format!("{}/linker/version_script.lds", manifest_dir);
            println!(
                "cargo:rustc-cdylib-link-arg=-Wl,--version-script={}",
                script
            );
            println!("cargo:rerun-if-changed=linker/version_script.lds");
        }
        "macos" => {
            // All symbols are exported by default on macOS
        }
        _ => {}
    }
}
