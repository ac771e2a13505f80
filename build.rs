fn main() {
    // Embedded build timestamp, surfaced by the health endpoint.
    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        chrono::Utc::now().to_rfc3339()
    );
}
