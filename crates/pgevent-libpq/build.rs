fn main() {
    // Link libpq only with the `system` feature; without it this crate
    // compiles as a stub (all constructors return errors).
    if std::env::var_os("CARGO_FEATURE_SYSTEM").is_none() {
        return;
    }

    // Same override variable the pq-sys ecosystem uses.
    if let Ok(dir) = std::env::var("PQ_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
    println!("cargo:rustc-link-lib=pq");

    println!("cargo:rerun-if-env-changed=PQ_LIB_DIR");
}
