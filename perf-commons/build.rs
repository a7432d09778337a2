use std::{
    process::Command,
    time::{SystemTime, UNIX_EPOCH},
};

fn main() {
    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let built = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    println!("cargo:rustc-env=PERF_COMMONS_GIT_COMMIT={commit}");
    println!("cargo:rustc-env=PERF_COMMONS_BUILD_EPOCH={built}");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
