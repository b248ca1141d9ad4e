use std::process::Command;

fn main() {
    // Container builds have no .git directory, so allow the hash to be injected.
    let git_hash = std::env::var("SYNCER_GIT_HASH").ok().or_else(|| {
        Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
    });

    println!(
        "cargo:rustc-env=GIT_HASH={}",
        git_hash.unwrap_or_else(|| "unknown".to_string())
    );

    println!("cargo:rerun-if-env-changed=SYNCER_GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
}
