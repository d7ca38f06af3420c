use std::process::Command;

fn git(args: &[&str]) -> Option<std::process::Output> {
    Command::new("git").args(args).output().ok()
}

fn main() {
    let hash = git(&["rev-parse", "--short", "HEAD"])
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string());

    // A non-zero exit from `git diff --quiet` means the tree has local changes.
    let dirty = git(&["diff", "--quiet", "HEAD"])
        .map(|o| !o.status.success())
        .unwrap_or(false);

    let build_hash = match hash {
        Some(h) if dirty => format!("{}-dirty", h),
        Some(h) => h,
        None => "unknown".to_string(),
    };

    println!("cargo:rustc-env=BUILD_GIT_HASH={}", build_hash);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
